//! Postgres implementation of [`ClientStore`].
//!
//! Reference-count and reassignment queries interpolate table names; those
//! names only ever come from the compiled-in table lists or from
//! `information_schema`, never from user input.

use anyhow::Context;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use super::{
    ClientRow, ClientStore, ClientUpdate, ImportBatch, MatchRow, ResponseRow, StoreError,
};

/// Roster pages fetched per round trip.
const CLIENT_PAGE_SIZE: i64 = 500;

const UNDEFINED_TABLE: &str = "42P01";
const INSUFFICIENT_PRIVILEGE: &str = "42501";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to Postgres")?;
        Ok(Self::new(pool))
    }
}

/// Map a driver error onto the typed store error via its SQLSTATE.
fn map_sqlx(err: sqlx::Error, what: &str) -> StoreError {
    let code = err
        .as_database_error()
        .and_then(|db| db.code())
        .map(|c| c.to_string());
    match code.as_deref() {
        Some(UNDEFINED_TABLE) => StoreError::NotFound(what.to_string()),
        Some(INSUFFICIENT_PRIVILEGE) => StoreError::PermissionDenied(what.to_string()),
        _ => StoreError::Other(anyhow::Error::new(err).context(format!("query failed: {what}"))),
    }
}

#[derive(sqlx::FromRow)]
struct ClientDbRow {
    id: String,
    first_name: String,
    last_name: String,
    email: Option<String>,
    phone: Option<String>,
    birth_date: Option<chrono::NaiveDate>,
    notes: Option<String>,
    created_at: Option<chrono::DateTime<chrono::Utc>>,
    updated_at: Option<chrono::DateTime<chrono::Utc>>,
    deleted_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<ClientDbRow> for ClientRow {
    fn from(row: ClientDbRow) -> Self {
        ClientRow {
            id: row.id,
            first_name: row.first_name,
            last_name: row.last_name,
            email: row.email,
            phone: row.phone,
            birth_date: row.birth_date,
            notes: row.notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
        }
    }
}

#[async_trait]
impl ClientStore for PgStore {
    async fn load_clients(&self) -> Result<Vec<ClientRow>, StoreError> {
        let mut clients = Vec::new();
        let mut offset: i64 = 0;
        loop {
            let page: Vec<ClientDbRow> = sqlx::query_as(
                "SELECT id, nome AS first_name, cognome AS last_name, email, telefono AS phone, \
                        data_nascita AS birth_date, note AS notes, created_at, updated_at, deleted_at \
                 FROM clienti ORDER BY id LIMIT $1 OFFSET $2",
            )
            .bind(CLIENT_PAGE_SIZE)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx(e, "clienti"))?;

            let fetched = page.len();
            clients.extend(page.into_iter().map(ClientRow::from));
            if (fetched as i64) < CLIENT_PAGE_SIZE {
                break;
            }
            offset += CLIENT_PAGE_SIZE;
        }
        Ok(clients)
    }

    async fn count_active_buste(&self, client_id: &str) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM buste WHERE cliente_id = $1 AND deleted_at IS NULL",
        )
        .bind(client_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx(e, "buste"))?;
        Ok(count)
    }

    async fn count_client_refs(&self, table: &str, client_id: &str) -> Result<u64, StoreError> {
        let (count,): (i64,) = sqlx::query_as(&format!(
            "SELECT COUNT(*) FROM {table} WHERE cliente_id = $1"
        ))
        .bind(client_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx(e, table))?;
        Ok(count as u64)
    }

    async fn client_ref_tables(&self) -> Result<Vec<String>, StoreError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT table_name FROM information_schema.columns \
             WHERE column_name = 'cliente_id' AND table_schema = 'public' \
             ORDER BY table_name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx(e, "information_schema.columns"))?;
        Ok(rows.into_iter().map(|(t,)| t).collect())
    }

    async fn update_client(&self, id: &str, update: &ClientUpdate) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE clienti SET \
                 cognome = COALESCE($2, cognome), \
                 email = COALESCE($3, email), \
                 telefono = COALESCE($4, telefono), \
                 data_nascita = COALESCE($5, data_nascita), \
                 note = COALESCE($6, note), \
                 updated_by = COALESCE($7, updated_by), \
                 updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(&update.last_name)
        .bind(&update.email)
        .bind(&update.phone)
        .bind(update.birth_date)
        .bind(&update.notes)
        .bind(&update.updated_by)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx(e, "clienti"))?;
        Ok(())
    }

    async fn reassign_client_refs(
        &self,
        table: &str,
        from_id: &str,
        to_id: &str,
        actor: Option<&str>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(&format!(
            "UPDATE {table} SET cliente_id = $2, updated_at = NOW(), \
                 updated_by = COALESCE($3, updated_by) \
             WHERE cliente_id = $1"
        ))
        .bind(from_id)
        .bind(to_id)
        .bind(actor)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx(e, table))?;
        let moved = result.rows_affected();

        if moved > 0 {
            // Best-effort trail; a missing audit table never blocks a merge.
            let audit = sqlx::query(
                "INSERT INTO audit_log (action, table_name, record_id, performed_by, details, created_at) \
                 VALUES ('merge_reassign', $1, $2, $3, $4, NOW())",
            )
            .bind(table)
            .bind(from_id)
            .bind(actor)
            .bind(format!("reassigned {moved} row(s) to {to_id}"))
            .execute(&self.pool)
            .await;
            if let Err(e) = audit {
                tracing::warn!(table = %table, error = %e, "audit log write failed");
            }
        }
        Ok(moved)
    }

    async fn soft_delete_client(&self, id: &str, actor: Option<&str>) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE clienti SET deleted_at = NOW(), deleted_by = COALESCE($2, deleted_by), \
                 updated_at = NOW() \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(actor)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx(e, "clienti"))?;
        Ok(())
    }

    async fn insert_import_batch(&self, batch: &ImportBatch) -> Result<String, StoreError> {
        let (id,): (String,) = sqlx::query_as(
            "INSERT INTO survey_import_batches \
                 (source_file, historical, recency_days, notes, row_count, created_at) \
             VALUES ($1, $2, $3, $4, $5, NOW()) \
             RETURNING id",
        )
        .bind(&batch.source_file)
        .bind(batch.historical)
        .bind(batch.recency_days)
        .bind(&batch.notes)
        .bind(batch.row_count)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx(e, "survey_import_batches"))?;
        Ok(id)
    }

    async fn insert_response(
        &self,
        batch_id: &str,
        row: &ResponseRow,
    ) -> Result<String, StoreError> {
        let (id,): (String,) = sqlx::query_as(
            "INSERT INTO survey_responses \
                 (batch_id, raw, overall_score, section_scores, suggestion, badge, \
                  low_sections, very_low_sections, submitted_at, is_recent, \
                  requires_followup, followup_status, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, NOW()) \
             RETURNING id",
        )
        .bind(batch_id)
        .bind(&row.raw)
        .bind(row.overall)
        .bind(&row.sections)
        .bind(&row.suggestion)
        .bind(&row.badge)
        .bind(row.low_sections)
        .bind(row.very_low_sections)
        .bind(row.submitted_at)
        .bind(row.is_recent)
        .bind(row.requires_followup)
        .bind(&row.followup_status)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx(e, "survey_responses"))?;
        Ok(id)
    }

    async fn insert_match(&self, response_id: &str, row: &MatchRow) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO survey_matches \
                 (response_id, cliente_id, confidence, strategy, similarity, \
                  candidate_ids, needs_review, notes, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())",
        )
        .bind(response_id)
        .bind(&row.client_id)
        .bind(&row.confidence)
        .bind(&row.strategy)
        .bind(row.similarity)
        .bind(&row.candidates)
        .bind(row.needs_review)
        .bind(&row.notes)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx(e, "survey_matches"))?;
        Ok(())
    }
}
