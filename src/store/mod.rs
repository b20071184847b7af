//! Store boundary: the customer roster and import-persistence collaborator.
//!
//! The matching core never talks to a driver directly; it sees this trait and
//! the typed [`StoreError`]. The Postgres implementation owns all SQLSTATE
//! mapping, so "table does not exist" reaches the core as
//! [`StoreErrorKind::NotFound`] rather than a driver-specific code.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

/// Coarse classification of a store failure, consumed by the merge guardrail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// The referenced relation does not exist in this deployment.
    NotFound,
    PermissionDenied,
    Other,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("relation not found: {0}")]
    NotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StoreError {
    pub fn kind(&self) -> StoreErrorKind {
        match self {
            StoreError::NotFound(_) => StoreErrorKind::NotFound,
            StoreError::PermissionDenied(_) => StoreErrorKind::PermissionDenied,
            StoreError::Other(_) => StoreErrorKind::Other,
        }
    }
}

/// Raw customer row as loaded from the store. Derived comparison fields are
/// computed client-side, in [`crate::import::clients::ClientRecord`].
#[derive(Debug, Clone, Default)]
pub struct ClientRow {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Field updates applied to a merge winner. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct ClientUpdate {
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub updated_by: Option<String>,
}

/// Import-batch summary row.
#[derive(Debug, Clone)]
pub struct ImportBatch {
    pub source_file: String,
    pub historical: bool,
    pub recency_days: Option<i32>,
    pub notes: Option<String>,
    pub row_count: i64,
}

/// One survey response ready for persistence: verbatim raw payload plus the
/// derived score fields.
#[derive(Debug, Clone)]
pub struct ResponseRow {
    pub raw: serde_json::Value,
    pub overall: Option<f64>,
    pub sections: serde_json::Value,
    pub suggestion: Option<String>,
    pub badge: String,
    pub low_sections: i32,
    pub very_low_sections: i32,
    pub submitted_at: Option<NaiveDateTime>,
    pub is_recent: bool,
    pub requires_followup: bool,
    pub followup_status: String,
}

/// One match row linking a response to a resolved or candidate client.
#[derive(Debug, Clone)]
pub struct MatchRow {
    pub client_id: Option<String>,
    pub confidence: String,
    pub strategy: String,
    pub similarity: Option<f64>,
    pub candidates: Vec<String>,
    pub needs_review: bool,
    pub notes: String,
}

/// Dependent tables the merge routine itself reassigns; the guardrail only
/// probes tables outside this set.
pub const COVERED_TABLES: &[&str] = &["buste", "error_tracking", "voice_notes", "survey_matches"];

/// Fallback list of tables carrying a `cliente_id` column, used when schema
/// introspection is unavailable.
pub const FALLBACK_REF_TABLES: &[&str] = &[
    "buste",
    "error_tracking",
    "voice_notes",
    "survey_matches",
    "lettere_richiamo",
    "audit_log",
];

/// The customer store and import-persistence collaborator.
///
/// All calls are discrete request/response suspension points; the import run
/// never has two calls in flight (single sequential pipeline).
#[async_trait]
pub trait ClientStore: Send + Sync {
    /// Load the full customer roster, soft-deleted rows included.
    async fn load_clients(&self) -> Result<Vec<ClientRow>, StoreError>;

    /// Count non-deleted job envelopes belonging to a client.
    async fn count_active_buste(&self, client_id: &str) -> Result<i64, StoreError>;

    /// Count rows in `table` referencing `client_id` via its `cliente_id`
    /// column. A missing table is reported as [`StoreError::NotFound`], which
    /// callers treat as zero references.
    async fn count_client_refs(&self, table: &str, client_id: &str) -> Result<u64, StoreError>;

    /// Enumerate the tables that carry a `cliente_id` column.
    async fn client_ref_tables(&self) -> Result<Vec<String>, StoreError>;

    async fn update_client(&self, id: &str, update: &ClientUpdate) -> Result<(), StoreError>;

    /// Re-point every row of `table` from one client to another. Returns the
    /// number of rows reassigned.
    async fn reassign_client_refs(
        &self,
        table: &str,
        from_id: &str,
        to_id: &str,
        actor: Option<&str>,
    ) -> Result<u64, StoreError>;

    async fn soft_delete_client(&self, id: &str, actor: Option<&str>) -> Result<(), StoreError>;

    /// Insert the batch summary row; returns the new batch id.
    async fn insert_import_batch(&self, batch: &ImportBatch) -> Result<String, StoreError>;

    /// Insert one response row; returns the new response id.
    async fn insert_response(
        &self,
        batch_id: &str,
        row: &ResponseRow,
    ) -> Result<String, StoreError>;

    async fn insert_match(&self, response_id: &str, row: &MatchRow) -> Result<(), StoreError>;
}
