//! Customer import from Zoho Books contacts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{Connection, PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::external::zoho::ZohoContact;
use crate::external::ZohoClient;
use crate::services::audit::AuditEvent;
use shared::{validate_email, validate_gstin};

/// Skipped contacts kept on a run row; the count covers the rest
const MAX_SKIPPED_RECORDED: usize = 100;

#[derive(Clone)]
pub struct ZohoSyncService {
    db: PgPool,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ZohoSyncRun {
    pub id: Uuid,
    pub lab_id: Uuid,
    pub status: String,
    pub contacts_seen: i32,
    pub created_count: i32,
    pub updated_count: i32,
    pub skipped_count: i32,
    pub skipped: Json<Vec<SkippedContact>>,
    pub error: Option<String>,
    pub triggered_by: Option<Uuid>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// A contact left out of a sync and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedContact {
    pub contact_id: String,
    pub message: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct SyncCounts {
    seen: i32,
    created: i32,
    updated: i32,
    skipped: Vec<SkippedContact>,
}

impl SyncCounts {
    fn skip(&mut self, contact_id: &str, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(contact_id, %message, "Zoho contact skipped");
        if self.skipped.len() < MAX_SKIPPED_RECORDED {
            self.skipped.push(SkippedContact {
                contact_id: contact_id.to_string(),
                message,
            });
        }
    }

    fn skipped_count(&self) -> i32 {
        self.seen - self.created - self.updated
    }
}

/// Customer columns taken from a contact, normalized to fit the table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactFields {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub gstin: Option<String>,
}

/// Normalize a contact, refusing values the customers table cannot hold
pub fn contact_fields(contact: &ZohoContact) -> Result<ContactFields, String> {
    let contact_id = contact.contact_id.trim();
    if contact_id.is_empty() || contact_id.len() > 50 {
        return Err("Contact id must be 1 to 50 characters".to_string());
    }

    let name = truncate(contact.display_name(), 200);
    if name.is_empty() {
        return Err("Contact has no name".to_string());
    }

    let email = contact
        .email
        .as_deref()
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty());
    if let Some(ref email) = email {
        if email.len() > 255 {
            return Err("Email is longer than 255 characters".to_string());
        }
        validate_email(email).map_err(|m| format!("Email {}: {}", email, m))?;
    }

    let gstin = contact
        .gst_no
        .as_deref()
        .map(|g| g.trim().to_uppercase())
        .filter(|g| !g.is_empty());
    if let Some(ref gstin) = gstin {
        validate_gstin(gstin).map_err(|m| format!("GST number {}: {}", gstin, m))?;
    }

    Ok(ContactFields {
        name,
        email,
        phone: contact.best_phone().map(|p| truncate(p, 30)),
        gstin,
    })
}

/// Customer code derived from a Zoho contact id: `ZH` plus its last ten
/// alphanumeric characters.
pub fn zoho_customer_code(contact_id: &str) -> String {
    let chars: Vec<char> = contact_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    let tail: String = chars[chars.len().saturating_sub(10)..].iter().collect();
    format!("ZH{}", tail)
}

fn truncate(value: &str, max: usize) -> String {
    value.trim().chars().take(max).collect()
}

/// First code starting at `base` that no customer of the lab uses yet
async fn free_customer_code(conn: &mut PgConnection, lab_id: Uuid, base: &str) -> AppResult<String> {
    let mut candidate = base.to_string();
    for suffix in 2..100 {
        let taken = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM customers WHERE lab_id = $1 AND code = $2)",
        )
        .bind(lab_id)
        .bind(&candidate)
        .fetch_one(&mut *conn)
        .await?;
        if !taken {
            return Ok(candidate);
        }
        candidate = format!("{}-{}", truncate(base, 17), suffix);
    }
    Err(AppError::Conflict(format!("No free customer code for {}", base)))
}

/// Insert or refresh the customer linked to a contact; returns true when created
async fn upsert_contact(
    conn: &mut PgConnection,
    lab_id: Uuid,
    contact_id: &str,
    fields: &ContactFields,
) -> AppResult<bool> {
    let existing = sqlx::query_scalar::<_, Uuid>(
        "SELECT id FROM customers WHERE lab_id = $1 AND zoho_contact_id = $2",
    )
    .bind(lab_id)
    .bind(contact_id)
    .fetch_optional(&mut *conn)
    .await?;

    let ContactFields {
        name,
        email,
        phone,
        gstin,
    } = fields;

    match existing {
        Some(customer_id) => {
            sqlx::query(
                r#"
                UPDATE customers
                SET name = $1, email = COALESCE($2, email), phone = COALESCE($3, phone),
                    gstin = COALESCE($4, gstin), updated_at = NOW()
                WHERE id = $5
                "#,
            )
            .bind(&name)
            .bind(&email)
            .bind(&phone)
            .bind(&gstin)
            .bind(customer_id)
            .execute(&mut *conn)
            .await?;
            Ok(false)
        }
        None => {
            let code = free_customer_code(conn, lab_id, &zoho_customer_code(contact_id)).await?;
            sqlx::query(
                r#"
                INSERT INTO customers (lab_id, code, name, email, phone, gstin, zoho_contact_id)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(lab_id)
            .bind(&code)
            .bind(&name)
            .bind(&email)
            .bind(&phone)
            .bind(&gstin)
            .bind(contact_id)
            .execute(&mut *conn)
            .await?;
            Ok(true)
        }
    }
}

impl ZohoSyncService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn list_runs(&self, lab_id: Uuid) -> AppResult<Vec<ZohoSyncRun>> {
        let runs = sqlx::query_as::<_, ZohoSyncRun>(
            r#"
            SELECT id, lab_id, status, contacts_seen, created_count, updated_count,
                   skipped_count, skipped, error, triggered_by, started_at, finished_at
            FROM zoho_sync_runs
            WHERE lab_id = $1
            ORDER BY started_at DESC
            LIMIT 50
            "#,
        )
        .bind(lab_id)
        .fetch_all(&self.db)
        .await?;
        Ok(runs)
    }

    /// Pull every contact page and upsert customers. The run row is written
    /// whether the sync succeeds or not.
    pub async fn sync_customers(&self, client: &ZohoClient, lab_id: Uuid, user_id: Uuid) -> AppResult<ZohoSyncRun> {
        let run_id = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO zoho_sync_runs (lab_id, status, triggered_by) VALUES ($1, 'running', $2) RETURNING id",
        )
        .bind(lab_id)
        .bind(user_id)
        .fetch_one(&self.db)
        .await?;

        let outcome = match client.fetch_all_contacts().await {
            Ok(contacts) => self.apply_contacts(lab_id, &contacts).await,
            Err(e) => Err(e),
        };

        let (status, counts, error) = match &outcome {
            Ok(counts) => ("succeeded", counts.clone(), None),
            Err(e) => ("failed", SyncCounts::default(), Some(e.to_string())),
        };
        let skipped_count = counts.skipped_count();

        let mut tx = self.db.begin().await?;
        let run = sqlx::query_as::<_, ZohoSyncRun>(
            r#"
            UPDATE zoho_sync_runs
            SET status = $1, contacts_seen = $2, created_count = $3, updated_count = $4,
                skipped_count = $5, skipped = $6, error = $7, finished_at = NOW()
            WHERE id = $8
            RETURNING id, lab_id, status, contacts_seen, created_count, updated_count,
                      skipped_count, skipped, error, triggered_by, started_at, finished_at
            "#,
        )
        .bind(status)
        .bind(counts.seen)
        .bind(counts.created)
        .bind(counts.updated)
        .bind(skipped_count)
        .bind(Json(&counts.skipped))
        .bind(&error)
        .bind(run_id)
        .fetch_one(&mut *tx)
        .await?;

        AuditEvent::new(lab_id, Some(user_id), "zoho_sync", "customer")
            .details(serde_json::json!({
                "run_id": run_id,
                "status": status,
                "contacts_seen": counts.seen,
                "created": counts.created,
                "updated": counts.updated,
                "skipped": skipped_count,
                "error": error,
            }))
            .record(&mut *tx)
            .await?;
        tx.commit().await?;

        match outcome {
            Ok(_) => {
                tracing::info!(
                    %lab_id,
                    created = counts.created,
                    updated = counts.updated,
                    skipped = skipped_count,
                    "Zoho customer sync finished"
                );
                Ok(run)
            }
            Err(e) => {
                tracing::warn!(%lab_id, error = %e, "Zoho customer sync failed");
                Err(e)
            }
        }
    }

    /// Upsert each importable contact under its own savepoint so one bad
    /// contact is skipped instead of failing the run
    async fn apply_contacts(&self, lab_id: Uuid, contacts: &[ZohoContact]) -> AppResult<SyncCounts> {
        let mut counts = SyncCounts::default();
        let mut tx = self.db.begin().await?;
        for contact in contacts.iter().filter(|c| c.is_importable()) {
            counts.seen += 1;
            let fields = match contact_fields(contact) {
                Ok(fields) => fields,
                Err(message) => {
                    counts.skip(&contact.contact_id, message);
                    continue;
                }
            };

            let mut savepoint = (&mut *tx).begin().await?;
            match upsert_contact(&mut savepoint, lab_id, contact.contact_id.trim(), &fields).await {
                Ok(created) => {
                    savepoint.commit().await?;
                    if created {
                        counts.created += 1;
                    } else {
                        counts.updated += 1;
                    }
                }
                Err(AppError::DatabaseError(e)) => {
                    savepoint.rollback().await?;
                    counts.skip(&contact.contact_id, format!("Could not be saved: {}", e));
                }
                Err(e) => return Err(e),
            }
        }
        tx.commit().await?;
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_customer_code_from_contact_id() {
        assert_eq!(zoho_customer_code("460000000026049"), "ZH0000026049");
        assert_eq!(zoho_customer_code("ab-12"), "ZHAB12");
        assert!(zoho_customer_code("4600000000260491234").len() <= 20);
    }

    fn contact(id: &str) -> ZohoContact {
        serde_json::from_value(serde_json::json!({
            "contact_id": id,
            "contact_name": "Indian Oil Corporation",
        }))
        .unwrap()
    }

    #[test]
    fn test_contact_fields_are_normalized() {
        let mut c = contact("460000000026049");
        c.email = Some("  Lab@IOCL.co.in ".into());
        c.gst_no = Some("27aapfu0939f1zv".into());
        c.mobile = Some("+91 98200 12345".into());

        let fields = contact_fields(&c).unwrap();
        assert_eq!(fields.name, "Indian Oil Corporation");
        assert_eq!(fields.email.as_deref(), Some("lab@iocl.co.in"));
        assert_eq!(fields.gstin.as_deref(), Some("27AAPFU0939F1ZV"));
        assert_eq!(fields.phone.as_deref(), Some("+91 98200 12345"));
    }

    #[test]
    fn test_contact_with_oversized_gst_number_is_skipped() {
        let mut c = contact("460000000026049");
        c.gst_no = Some("27AAPFU0939F1ZV-OLD".into());
        let message = contact_fields(&c).unwrap_err();
        assert!(message.contains("GST number"));

        let mut c = contact("460000000026049");
        c.email = Some("not-an-email".into());
        assert!(contact_fields(&c).is_err());

        assert!(contact_fields(&contact(&"9".repeat(51))).is_err());
    }

    #[test]
    fn test_skipped_contacts_are_capped() {
        let mut counts = SyncCounts::default();
        for i in 0..(MAX_SKIPPED_RECORDED + 5) {
            counts.seen += 1;
            counts.skip(&i.to_string(), "bad");
        }
        counts.seen += 1;
        counts.created += 1;
        assert_eq!(counts.skipped.len(), MAX_SKIPPED_RECORDED);
        assert_eq!(counts.skipped_count(), (MAX_SKIPPED_RECORDED + 5) as i32);
    }

    #[test]
    fn test_truncate_trims() {
        assert_eq!(truncate("  Indian Oil  ", 200), "Indian Oil");
        assert_eq!(truncate("abcdef", 3), "abc");
    }
}
