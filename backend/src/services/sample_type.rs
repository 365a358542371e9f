//! Sample types and their test parameters

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::services::audit::AuditEvent;
use crate::services::csv_io::{export_to_csv, non_empty, read_csv_rows, ImportSummary};
use shared::{validate_master_code, SpecLimits};

#[derive(Clone)]
pub struct SampleTypeService {
    db: PgPool,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SampleType {
    pub id: Uuid,
    pub lab_id: Uuid,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub parameter_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Parameter {
    pub id: Uuid,
    pub sample_type_id: Uuid,
    pub name: String,
    pub method: Option<String>,
    pub unit: Option<String>,
    pub spec_min: Option<Decimal>,
    pub spec_max: Option<Decimal>,
    pub sort_order: i32,
}

impl Parameter {
    pub fn limits(&self) -> SpecLimits {
        SpecLimits::new(self.spec_min, self.spec_max)
    }
}

#[derive(Debug, Serialize)]
pub struct SampleTypeWithParameters {
    #[serde(flatten)]
    pub sample_type: SampleType,
    pub parameters: Vec<Parameter>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct SampleTypeInput {
    pub code: String,
    #[validate(length(min = 1, max = 200, message = "is required"))]
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Vec<ParameterInput>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ParameterInput {
    pub name: String,
    pub method: Option<String>,
    pub unit: Option<String>,
    pub spec_min: Option<Decimal>,
    pub spec_max: Option<Decimal>,
    pub sort_order: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSampleTypeInput {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "shared::nullable")]
    pub description: Option<Option<String>>,
    pub is_active: Option<bool>,
    /// When present the parameter list is replaced
    pub parameters: Option<Vec<ParameterInput>>,
}

/// One parameter per row; type columns repeat for every parameter
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SampleTypeCsvRow {
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub parameter: Option<String>,
    pub method: Option<String>,
    pub unit: Option<String>,
    pub spec_min: Option<Decimal>,
    pub spec_max: Option<Decimal>,
    pub sort_order: Option<i32>,
}

#[derive(Debug, sqlx::FromRow)]
struct ExportRow {
    code: String,
    name: String,
    description: Option<String>,
    parameter: Option<String>,
    method: Option<String>,
    unit: Option<String>,
    spec_min: Option<Decimal>,
    spec_max: Option<Decimal>,
    sort_order: Option<i32>,
}

pub fn validate_parameters(parameters: &[ParameterInput]) -> AppResult<()> {
    let mut names = std::collections::HashSet::new();
    for parameter in parameters {
        let name = parameter.name.trim();
        if name.is_empty() {
            return Err(AppError::validation("parameters", "Parameter name is required"));
        }
        if !names.insert(name.to_lowercase()) {
            return Err(AppError::validation(
                "parameters",
                format!("Duplicate parameter {}", name),
            ));
        }
        if !SpecLimits::new(parameter.spec_min, parameter.spec_max).is_consistent() {
            return Err(AppError::validation(
                "parameters",
                format!("Spec min exceeds spec max for {}", name),
            ));
        }
    }
    Ok(())
}

fn validate_sample_type(input: &SampleTypeInput) -> AppResult<()> {
    input.validate()?;
    validate_master_code(&input.code).map_err(|m| AppError::validation("code", m))?;
    validate_parameters(&input.parameters)
}

/// Group CSV rows by code, keeping the first line of each group for errors
pub fn group_csv_rows(rows: Vec<(u64, SampleTypeCsvRow)>) -> BTreeMap<String, (u64, SampleTypeInput)> {
    let mut groups: BTreeMap<String, (u64, SampleTypeInput)> = BTreeMap::new();
    for (line, row) in rows {
        let code = row.code.trim().to_uppercase();
        let entry = groups.entry(code.clone()).or_insert_with(|| {
            (
                line,
                SampleTypeInput {
                    code,
                    name: row.name.trim().to_string(),
                    description: non_empty(row.description.clone()),
                    parameters: Vec::new(),
                },
            )
        });
        if let Some(parameter) = non_empty(row.parameter) {
            let sort_order = row
                .sort_order
                .unwrap_or(entry.1.parameters.len() as i32 + 1);
            entry.1.parameters.push(ParameterInput {
                name: parameter,
                method: non_empty(row.method),
                unit: non_empty(row.unit),
                spec_min: row.spec_min,
                spec_max: row.spec_max,
                sort_order: Some(sort_order),
            });
        }
    }
    groups
}

const SAMPLE_TYPE_SELECT: &str = r#"
    SELECT st.id, st.lab_id, st.code, st.name, st.description, st.is_active,
           (SELECT COUNT(*) FROM sample_type_parameters p WHERE p.sample_type_id = st.id) AS parameter_count,
           st.created_at, st.updated_at
    FROM sample_types st
"#;

pub async fn find_sample_type(conn: &mut PgConnection, lab_id: Uuid, sample_type_id: Uuid) -> AppResult<SampleType> {
    sqlx::query_as::<_, SampleType>(&format!(
        "{} WHERE st.id = $1 AND st.lab_id = $2",
        SAMPLE_TYPE_SELECT
    ))
    .bind(sample_type_id)
    .bind(lab_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound("Sample type".to_string()))
}

/// Parameters of a sample type in display order
pub async fn load_parameters(conn: &mut PgConnection, sample_type_id: Uuid) -> AppResult<Vec<Parameter>> {
    let parameters = sqlx::query_as::<_, Parameter>(
        r#"
        SELECT id, sample_type_id, name, method, unit, spec_min, spec_max, sort_order
        FROM sample_type_parameters
        WHERE sample_type_id = $1
        ORDER BY sort_order, name
        "#,
    )
    .bind(sample_type_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(parameters)
}

async fn replace_parameters(
    conn: &mut PgConnection,
    sample_type_id: Uuid,
    parameters: &[ParameterInput],
) -> AppResult<()> {
    sqlx::query("DELETE FROM sample_type_parameters WHERE sample_type_id = $1")
        .bind(sample_type_id)
        .execute(&mut *conn)
        .await?;

    for (index, parameter) in parameters.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO sample_type_parameters
                (sample_type_id, name, method, unit, spec_min, spec_max, sort_order)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(sample_type_id)
        .bind(parameter.name.trim())
        .bind(&parameter.method)
        .bind(&parameter.unit)
        .bind(parameter.spec_min)
        .bind(parameter.spec_max)
        .bind(parameter.sort_order.unwrap_or(index as i32 + 1))
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

impl SampleTypeService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn list_sample_types(&self, lab_id: Uuid, include_inactive: bool) -> AppResult<Vec<SampleType>> {
        let sample_types = sqlx::query_as::<_, SampleType>(&format!(
            "{} WHERE st.lab_id = $1 AND ($2 OR st.is_active) ORDER BY st.name",
            SAMPLE_TYPE_SELECT
        ))
        .bind(lab_id)
        .bind(include_inactive)
        .fetch_all(&self.db)
        .await?;
        Ok(sample_types)
    }

    pub async fn get_sample_type(&self, lab_id: Uuid, sample_type_id: Uuid) -> AppResult<SampleTypeWithParameters> {
        let mut conn = self.db.acquire().await?;
        let sample_type = find_sample_type(&mut conn, lab_id, sample_type_id).await?;
        let parameters = load_parameters(&mut conn, sample_type_id).await?;
        Ok(SampleTypeWithParameters {
            sample_type,
            parameters,
        })
    }

    pub async fn create_sample_type(
        &self,
        lab_id: Uuid,
        user_id: Uuid,
        mut input: SampleTypeInput,
    ) -> AppResult<SampleTypeWithParameters> {
        input.code = input.code.trim().to_uppercase();
        validate_sample_type(&input)?;

        let mut tx = self.db.begin().await?;
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM sample_types WHERE lab_id = $1 AND code = $2)",
        )
        .bind(lab_id)
        .bind(&input.code)
        .fetch_one(&mut *tx)
        .await?;
        if exists {
            return Err(AppError::Conflict(format!(
                "Sample type code {} already exists",
                input.code
            )));
        }

        let sample_type_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO sample_types (lab_id, code, name, description)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(lab_id)
        .bind(&input.code)
        .bind(input.name.trim())
        .bind(&input.description)
        .fetch_one(&mut *tx)
        .await?;

        replace_parameters(&mut tx, sample_type_id, &input.parameters).await?;

        AuditEvent::new(lab_id, Some(user_id), "create", "sample_type")
            .entity(sample_type_id)
            .details(serde_json::json!({
                "code": input.code,
                "parameters": input.parameters.len(),
            }))
            .record(&mut *tx)
            .await?;
        tx.commit().await?;

        self.get_sample_type(lab_id, sample_type_id).await
    }

    pub async fn update_sample_type(
        &self,
        lab_id: Uuid,
        user_id: Uuid,
        sample_type_id: Uuid,
        input: UpdateSampleTypeInput,
    ) -> AppResult<SampleTypeWithParameters> {
        if let Some(ref name) = input.name {
            if name.trim().is_empty() {
                return Err(AppError::validation("name", "is required"));
            }
        }
        if let Some(ref parameters) = input.parameters {
            validate_parameters(parameters)?;
        }

        let mut tx = self.db.begin().await?;
        let existing = find_sample_type(&mut tx, lab_id, sample_type_id).await?;

        sqlx::query(
            r#"
            UPDATE sample_types
            SET name = $1, description = $2, is_active = $3, updated_at = NOW()
            WHERE id = $4 AND lab_id = $5
            "#,
        )
        .bind(input.name.as_deref().map(str::trim).unwrap_or(&existing.name))
        .bind(shared::patch(input.description.clone(), existing.description.clone()))
        .bind(input.is_active.unwrap_or(existing.is_active))
        .bind(sample_type_id)
        .bind(lab_id)
        .execute(&mut *tx)
        .await?;

        if let Some(ref parameters) = input.parameters {
            replace_parameters(&mut tx, sample_type_id, parameters).await?;
        }

        AuditEvent::new(lab_id, Some(user_id), "update", "sample_type")
            .entity(sample_type_id)
            .details(serde_json::json!({
                "parameters_replaced": input.parameters.as_ref().map(Vec::len),
            }))
            .record(&mut *tx)
            .await?;
        tx.commit().await?;

        self.get_sample_type(lab_id, sample_type_id).await
    }

    /// Delete a sample type no sample uses
    pub async fn delete_sample_type(&self, lab_id: Uuid, user_id: Uuid, sample_type_id: Uuid) -> AppResult<()> {
        let mut tx = self.db.begin().await?;
        let existing = find_sample_type(&mut tx, lab_id, sample_type_id).await?;

        let in_use = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM samples WHERE sample_type_id = $1")
            .bind(sample_type_id)
            .fetch_one(&mut *tx)
            .await?;
        if in_use > 0 {
            return Err(AppError::DeleteBlocked(format!(
                "Cannot delete sample type. {} sample(s) use this sample type.",
                in_use
            )));
        }

        sqlx::query("DELETE FROM sample_types WHERE id = $1 AND lab_id = $2")
            .bind(sample_type_id)
            .bind(lab_id)
            .execute(&mut *tx)
            .await?;

        AuditEvent::new(lab_id, Some(user_id), "delete", "sample_type")
            .entity(sample_type_id)
            .details(serde_json::json!({ "code": existing.code }))
            .record(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn export_csv(&self, lab_id: Uuid) -> AppResult<String> {
        let rows = sqlx::query_as::<_, ExportRow>(
            r#"
            SELECT st.code, st.name, st.description, p.name AS parameter, p.method, p.unit,
                   p.spec_min, p.spec_max, p.sort_order
            FROM sample_types st
            LEFT JOIN sample_type_parameters p ON p.sample_type_id = st.id
            WHERE st.lab_id = $1
            ORDER BY st.code, p.sort_order, p.name
            "#,
        )
        .bind(lab_id)
        .fetch_all(&self.db)
        .await?;

        let records: Vec<SampleTypeCsvRow> = rows
            .into_iter()
            .map(|r| SampleTypeCsvRow {
                code: r.code,
                name: r.name,
                description: r.description,
                parameter: r.parameter,
                method: r.method,
                unit: r.unit,
                spec_min: r.spec_min,
                spec_max: r.spec_max,
                sort_order: r.sort_order,
            })
            .collect();
        export_to_csv(&records)
    }

    /// Upsert sample types by code. A type present in the file has its
    /// parameter list replaced by the rows given for it.
    pub async fn import_csv(&self, lab_id: Uuid, user_id: Uuid, data: &[u8]) -> AppResult<ImportSummary> {
        let mut summary = ImportSummary::default();
        let mut parsed = Vec::new();
        for (line, row) in read_csv_rows::<SampleTypeCsvRow>(data)? {
            match row {
                Ok(row) => parsed.push((line, row)),
                Err(message) => summary.reject(line, message),
            }
        }

        let mut tx = self.db.begin().await?;
        for (_, (line, input)) in group_csv_rows(parsed) {
            if let Err(e) = validate_sample_type(&input) {
                summary.reject(line, e.to_string());
                continue;
            }

            let (sample_type_id, created) = sqlx::query_as::<_, (Uuid, bool)>(
                r#"
                INSERT INTO sample_types (lab_id, code, name, description)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (lab_id, code) DO UPDATE SET
                    name = EXCLUDED.name,
                    description = COALESCE(EXCLUDED.description, sample_types.description),
                    updated_at = NOW()
                RETURNING id, (xmax = 0) AS created
                "#,
            )
            .bind(lab_id)
            .bind(&input.code)
            .bind(&input.name)
            .bind(&input.description)
            .fetch_one(&mut *tx)
            .await?;

            replace_parameters(&mut tx, sample_type_id, &input.parameters).await?;
            if created {
                summary.created += 1;
            } else {
                summary.updated += 1;
            }
        }

        AuditEvent::new(lab_id, Some(user_id), "import", "sample_type")
            .details(serde_json::json!({
                "created": summary.created,
                "updated": summary.updated,
                "rejected": summary.errors.len(),
            }))
            .record(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(value: &str) -> Decimal {
        value.parse().unwrap()
    }

    fn row(code: &str, parameter: Option<&str>, min: Option<Decimal>) -> SampleTypeCsvRow {
        SampleTypeCsvRow {
            code: code.to_string(),
            name: "Diesel".to_string(),
            description: None,
            parameter: parameter.map(str::to_string),
            method: Some("ASTM D4052".to_string()),
            unit: Some("kg/m3".to_string()),
            spec_min: min,
            spec_max: None,
            sort_order: None,
        }
    }

    #[test]
    fn test_rows_grouped_by_code() {
        let groups = group_csv_rows(vec![
            (2, row("hsd", Some("Density"), Some(dec("820")))),
            (3, row("HSD", Some("Flash Point"), None)),
            (4, row("FO", None, None)),
        ]);

        assert_eq!(groups.len(), 2);
        let (line, hsd) = &groups["HSD"];
        assert_eq!(*line, 2);
        assert_eq!(hsd.parameters.len(), 2);
        assert_eq!(hsd.parameters[1].name, "Flash Point");
        assert_eq!(hsd.parameters[1].sort_order, Some(2));
        assert!(groups["FO"].1.parameters.is_empty());
    }

    #[test]
    fn test_parameter_validation() {
        let ok = vec![ParameterInput {
            name: "Density".into(),
            spec_min: Some(dec("820")),
            spec_max: Some(dec("860")),
            ..Default::default()
        }];
        assert!(validate_parameters(&ok).is_ok());

        let inverted = vec![ParameterInput {
            name: "Density".into(),
            spec_min: Some(dec("900")),
            spec_max: Some(dec("860")),
            ..Default::default()
        }];
        assert!(validate_parameters(&inverted).is_err());

        let duplicate = vec![
            ParameterInput { name: "Sulphur".into(), ..Default::default() },
            ParameterInput { name: "sulphur".into(), ..Default::default() },
        ];
        assert!(validate_parameters(&duplicate).is_err());
    }
}
