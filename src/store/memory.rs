//! In-memory [`ClientStore`]. Backs the unit and integration tests: records
//! every write so assertions can inspect what the pipeline would have
//! persisted, and can simulate missing tables and failing probes.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::anyhow;
use async_trait::async_trait;

use super::{
    ClientRow, ClientStore, ClientUpdate, ImportBatch, MatchRow, ResponseRow, StoreError,
    FALLBACK_REF_TABLES,
};

#[derive(Debug, Default)]
pub struct MemoryState {
    pub clients: Vec<ClientRow>,
    /// Active busta count per client id.
    pub buste: HashMap<String, i64>,
    /// (table, client id) -> reference count.
    pub refs: HashMap<(String, String), u64>,
    /// Tables that answer probes with NotFound.
    pub missing_tables: Vec<String>,
    /// Tables whose probes fail with a generic error.
    pub failing_tables: Vec<String>,
    /// When set, overrides the fallback ref-table catalog.
    pub ref_tables: Option<Vec<String>>,
    pub fail_ref_table_listing: bool,

    pub updates: Vec<(String, ClientUpdate)>,
    /// (table, from id, to id, actor) per reassignment call.
    pub reassignments: Vec<(String, String, String, Option<String>)>,
    /// (client id, actor stamped into `deleted_by`).
    pub soft_deleted: Vec<(String, Option<String>)>,
    pub batches: Vec<ImportBatch>,
    pub responses: Vec<(String, ResponseRow)>,
    pub matches: Vec<(String, MatchRow)>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    pub state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn with_clients(clients: Vec<ClientRow>) -> Self {
        let store = Self::default();
        store.state.lock().unwrap().clients = clients;
        store
    }
}

#[async_trait]
impl ClientStore for MemoryStore {
    async fn load_clients(&self) -> Result<Vec<ClientRow>, StoreError> {
        Ok(self.state.lock().unwrap().clients.clone())
    }

    async fn count_active_buste(&self, client_id: &str) -> Result<i64, StoreError> {
        Ok(*self
            .state
            .lock()
            .unwrap()
            .buste
            .get(client_id)
            .unwrap_or(&0))
    }

    async fn count_client_refs(&self, table: &str, client_id: &str) -> Result<u64, StoreError> {
        let state = self.state.lock().unwrap();
        if state.missing_tables.iter().any(|t| t == table) {
            return Err(StoreError::NotFound(table.to_string()));
        }
        if state.failing_tables.iter().any(|t| t == table) {
            return Err(StoreError::Other(anyhow!("probe failed for {table}")));
        }
        Ok(*state
            .refs
            .get(&(table.to_string(), client_id.to_string()))
            .unwrap_or(&0))
    }

    async fn client_ref_tables(&self) -> Result<Vec<String>, StoreError> {
        let state = self.state.lock().unwrap();
        if state.fail_ref_table_listing {
            return Err(StoreError::Other(anyhow!("introspection unavailable")));
        }
        Ok(state.ref_tables.clone().unwrap_or_else(|| {
            FALLBACK_REF_TABLES.iter().map(|t| t.to_string()).collect()
        }))
    }

    async fn update_client(&self, id: &str, update: &ClientUpdate) -> Result<(), StoreError> {
        self.state
            .lock()
            .unwrap()
            .updates
            .push((id.to_string(), update.clone()));
        Ok(())
    }

    async fn reassign_client_refs(
        &self,
        table: &str,
        from_id: &str,
        to_id: &str,
        actor: Option<&str>,
    ) -> Result<u64, StoreError> {
        let mut state = self.state.lock().unwrap();
        let moved = state
            .refs
            .remove(&(table.to_string(), from_id.to_string()))
            .unwrap_or(0);
        *state
            .refs
            .entry((table.to_string(), to_id.to_string()))
            .or_insert(0) += moved;
        state.reassignments.push((
            table.to_string(),
            from_id.to_string(),
            to_id.to_string(),
            actor.map(|a| a.to_string()),
        ));
        Ok(moved)
    }

    async fn soft_delete_client(&self, id: &str, actor: Option<&str>) -> Result<(), StoreError> {
        self.state
            .lock()
            .unwrap()
            .soft_deleted
            .push((id.to_string(), actor.map(|a| a.to_string())));
        Ok(())
    }

    async fn insert_import_batch(&self, batch: &ImportBatch) -> Result<String, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.batches.push(batch.clone());
        Ok(format!("batch-{}", state.batches.len()))
    }

    async fn insert_response(
        &self,
        batch_id: &str,
        row: &ResponseRow,
    ) -> Result<String, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.responses.push((batch_id.to_string(), row.clone()));
        Ok(format!("resp-{}", state.responses.len()))
    }

    async fn insert_match(&self, response_id: &str, row: &MatchRow) -> Result<(), StoreError> {
        self.state
            .lock()
            .unwrap()
            .matches
            .push((response_id.to_string(), row.clone()));
        Ok(())
    }
}
