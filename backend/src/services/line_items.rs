//! Line items shared by quotations, contracts and invoices

use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use shared::{compute_totals, DocumentTotals, LineItemInput};

/// Which document table a set of items belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemTable {
    Quotation,
    Contract,
    Invoice,
}

impl ItemTable {
    fn table(&self) -> &'static str {
        match self {
            ItemTable::Quotation => "quotation_items",
            ItemTable::Contract => "contract_items",
            ItemTable::Invoice => "invoice_items",
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct LineItem {
    pub id: Uuid,
    pub sample_type_id: Option<Uuid>,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub discount_percent: Decimal,
    pub tax_percent: Decimal,
    pub line_total: Decimal,
    pub sort_order: i32,
}

impl From<&LineItem> for LineItemInput {
    fn from(item: &LineItem) -> Self {
        LineItemInput {
            description: item.description.clone(),
            sample_type_id: item.sample_type_id,
            quantity: item.quantity,
            unit_price: item.unit_price,
            discount_percent: item.discount_percent,
            tax_percent: item.tax_percent,
        }
    }
}

/// Validate every line and compute the document totals
pub fn price_items(items: &[LineItemInput]) -> AppResult<DocumentTotals> {
    if items.is_empty() {
        return Err(AppError::validation("items", "At least one line item is required"));
    }
    for (index, item) in items.iter().enumerate() {
        item.validate()
            .and_then(|_| item.amounts())
            .map_err(|m| AppError::validation("items", format!("Line {}: {}", index + 1, m)))?;
    }
    compute_totals(items).map_err(|m| AppError::validation("items", m))
}

pub async fn insert_items(
    conn: &mut PgConnection,
    table: ItemTable,
    parent_id: Uuid,
    items: &[LineItemInput],
) -> AppResult<()> {
    let sql = format!(
        r#"
        INSERT INTO {} (parent_id, sample_type_id, description, quantity, unit_price,
                        discount_percent, tax_percent, line_total, sort_order)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
        table.table()
    );
    for (index, item) in items.iter().enumerate() {
        let amounts = item
            .amounts()
            .map_err(|m| AppError::validation("items", format!("Line {}: {}", index + 1, m)))?;
        sqlx::query(&sql)
            .bind(parent_id)
            .bind(item.sample_type_id)
            .bind(item.description.trim())
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(item.discount_percent)
            .bind(item.tax_percent)
            .bind(amounts.total)
            .bind(index as i32 + 1)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

pub async fn replace_items(
    conn: &mut PgConnection,
    table: ItemTable,
    parent_id: Uuid,
    items: &[LineItemInput],
) -> AppResult<()> {
    sqlx::query(&format!("DELETE FROM {} WHERE parent_id = $1", table.table()))
        .bind(parent_id)
        .execute(&mut *conn)
        .await?;
    insert_items(conn, table, parent_id, items).await
}

pub async fn load_items(conn: &mut PgConnection, table: ItemTable, parent_id: Uuid) -> AppResult<Vec<LineItem>> {
    let items = sqlx::query_as::<_, LineItem>(&format!(
        r#"
        SELECT id, sample_type_id, description, quantity, unit_price, discount_percent,
               tax_percent, line_total, sort_order
        FROM {}
        WHERE parent_id = $1
        ORDER BY sort_order
        "#,
        table.table()
    ))
    .bind(parent_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(items)
}

/// Copy the items of one document onto another, returning the copied inputs
pub async fn copy_items(
    conn: &mut PgConnection,
    from: ItemTable,
    from_id: Uuid,
    to: ItemTable,
    to_id: Uuid,
) -> AppResult<Vec<LineItemInput>> {
    let items: Vec<LineItemInput> = load_items(conn, from, from_id)
        .await?
        .iter()
        .map(LineItemInput::from)
        .collect();
    insert_items(conn, to, to_id, &items).await?;
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(description: &str, qty: i64, price: i64) -> LineItemInput {
        LineItemInput {
            description: description.to_string(),
            sample_type_id: None,
            quantity: Decimal::from(qty),
            unit_price: Decimal::from(price),
            discount_percent: Decimal::ZERO,
            tax_percent: Decimal::from(18),
        }
    }

    #[test]
    fn test_price_items_requires_lines() {
        assert!(matches!(
            price_items(&[]),
            Err(AppError::Validation { ref field, .. }) if field == "items"
        ));
    }

    #[test]
    fn test_price_items_reports_line_number() {
        let err = price_items(&[item("Flash point", 1, 500), item("", 1, 100)]).unwrap_err();
        assert!(err.to_string().contains("Line 2"));
    }

    #[test]
    fn test_price_items_totals() {
        let totals = price_items(&[item("Flash point", 2, 500)]).unwrap();
        assert_eq!(totals.subtotal, Decimal::from(1000));
        assert_eq!(totals.tax_total, Decimal::from(180));
        assert_eq!(totals.total, Decimal::from(1180));
    }
}
