//! The import run: parse, detect, score, match, merge, report, persist.
//!
//! The pipeline is strictly sequential. The operator summary is printed
//! before any persistence happens, so a failing insert still leaves the
//! operator with the full picture of what the file contained.

use std::collections::HashMap;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use super::clients::{ClientIndexes, ClientRoster};
use super::columns::detect_columns;
use super::matching::{match_respondent, MatchConfig, MatchStats};
use super::rows::parse_survey_csv;
use super::scoring::{score_response, FollowupStatus};
use super::session::ImportSession;
use crate::store::{
    ClientStore, ImportBatch, MatchRow, ResponseRow, FALLBACK_REF_TABLES,
};

/// Run-level options, resolved from the CLI and environment by the caller.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Original file name, stored on the batch row.
    pub source_file: String,
    pub dry_run: bool,
    /// Historical imports never generate pending follow-ups.
    pub historical: bool,
    pub recency_days: Option<u32>,
    pub notes: Option<String>,
    pub auto_merge: bool,
    pub actor: Option<String>,
}

/// Outcome counters for one run.
#[derive(Debug, Default)]
pub struct ImportSummary {
    pub rows: usize,
    pub badges: HashMap<&'static str, usize>,
    pub matches: MatchStats,
    pub pending_followups: usize,
    /// `None` on dry runs.
    pub batch_id: Option<String>,
}

/// Run a full import over already-read CSV text.
///
/// Fatal only when the file yields no headers or no data rows, or when the
/// roster cannot be loaded; per-row anomalies are absorbed into the scored
/// and matched output instead.
pub async fn run_import(
    csv_text: &str,
    store: &dyn ClientStore,
    opts: &RunOptions,
) -> Result<ImportSummary> {
    let parsed = parse_survey_csv(csv_text).context("Failed to parse survey CSV")?;
    if parsed.headers.iter().all(|h| h.is_empty()) {
        bail!("survey file has no header row");
    }
    if parsed.records.is_empty() {
        bail!("survey file has no data rows");
    }

    let cols = detect_columns(&parsed.headers, &parsed.records);
    info!(
        rows = parsed.records.len(),
        numeric_columns = cols.numeric.len(),
        name_header = %cols.name_header,
        "survey file parsed"
    );

    let client_rows = store
        .load_clients()
        .await
        .context("Failed to load customer roster")?;
    let mut roster = ClientRoster::from_rows(client_rows);
    let indexes = ClientIndexes::build(&roster);
    info!(clients = roster.len(), "customer roster loaded");

    // A failed catalog lookup falls back to the known table list; merging
    // must still be guarded even when introspection is unavailable.
    let ref_tables = match store.client_ref_tables().await {
        Ok(tables) => tables,
        Err(e) => {
            warn!(error = %e, "schema introspection failed, using fallback table list");
            FALLBACK_REF_TABLES.iter().map(|t| t.to_string()).collect()
        }
    };

    let match_config = MatchConfig {
        auto_merge: opts.auto_merge,
        dry_run: opts.dry_run,
        ref_tables,
        actor: opts.actor.clone(),
    };

    let mut session = ImportSession::new();
    let mut summary = ImportSummary {
        rows: parsed.records.len(),
        ..ImportSummary::default()
    };
    let mut outputs: Vec<(ResponseRow, MatchRow)> = Vec::with_capacity(parsed.records.len());

    for record in &parsed.records {
        let scored = score_response(record, &cols, opts.historical);
        *summary.badges.entry(scored.badge.as_str()).or_insert(0) += 1;
        if scored.followup_status == FollowupStatus::Pending {
            summary.pending_followups += 1;
        }

        let raw_name = record.get(&cols.name_header).map(String::as_str).unwrap_or("");
        let raw_email = cols
            .email_header
            .as_deref()
            .and_then(|h| record.get(h))
            .map(String::as_str)
            .unwrap_or("");

        let matched = match_respondent(
            raw_name,
            raw_email,
            &mut roster,
            &indexes,
            &mut session,
            store,
            &match_config,
        )
        .await
        .context("Failed to match respondent")?;
        summary.matches.record(&matched);

        let response = ResponseRow {
            raw: serde_json::to_value(record).context("Failed to serialize raw row")?,
            overall: scored.overall,
            sections: serde_json::to_value(&scored.sections)
                .context("Failed to serialize section scores")?,
            suggestion: scored.suggestion.clone(),
            badge: scored.badge.as_str().to_string(),
            low_sections: scored.low_sections as i32,
            very_low_sections: scored.very_low_sections as i32,
            submitted_at: scored.submitted_at,
            is_recent: scored.is_recent,
            requires_followup: scored.requires_followup,
            followup_status: scored.followup_status.as_str().to_string(),
        };
        let match_row = MatchRow {
            client_id: matched.client_id.clone(),
            confidence: matched.confidence.as_str().to_string(),
            strategy: matched.strategy.as_str().to_string(),
            similarity: matched.similarity,
            candidates: matched.candidates.clone(),
            needs_review: matched.needs_review,
            notes: matched.notes.clone(),
        };
        outputs.push((response, match_row));
    }

    print_summary(&summary, opts);

    if !opts.dry_run {
        let batch = ImportBatch {
            source_file: opts.source_file.clone(),
            historical: opts.historical,
            recency_days: opts.recency_days.map(|d| d as i32),
            notes: opts.notes.clone(),
            row_count: summary.rows as i64,
        };
        let batch_id = store
            .insert_import_batch(&batch)
            .await
            .context("Failed to insert import batch")?;
        for (response, match_row) in &outputs {
            let response_id = store
                .insert_response(&batch_id, response)
                .await
                .context("Failed to insert survey response")?;
            store
                .insert_match(&response_id, match_row)
                .await
                .context("Failed to insert survey match")?;
        }
        info!(batch_id = %batch_id, rows = summary.rows, "import batch persisted");
        summary.batch_id = Some(batch_id);
    } else {
        info!(rows = summary.rows, "dry run complete, nothing persisted");
    }

    Ok(summary)
}

fn count(map: &HashMap<&'static str, usize>, key: &str) -> usize {
    map.get(key).copied().unwrap_or(0)
}

/// Operator-facing report on stdout. Logs go to the tracing subscriber; this
/// is the human summary the import was run for.
fn print_summary(summary: &ImportSummary, opts: &RunOptions) {
    println!("Import summary for {}", opts.source_file);
    println!("  rows:             {}", summary.rows);
    println!(
        "  badges:           eccellente {}, positivo {}, attenzione {}, critico {}",
        count(&summary.badges, "eccellente"),
        count(&summary.badges, "positivo"),
        count(&summary.badges, "attenzione"),
        count(&summary.badges, "critico"),
    );
    println!(
        "  match confidence: high {}, medium {}, low {}, none {}",
        count(&summary.matches.by_confidence, "high"),
        count(&summary.matches.by_confidence, "medium"),
        count(&summary.matches.by_confidence, "low"),
        count(&summary.matches.by_confidence, "none"),
    );
    println!("  unmatched:        {}", summary.matches.unmatched);
    println!("  needs review:     {}", summary.matches.needs_review);
    println!(
        "  merges:           {} merged, {} previewed, {} blocked",
        summary.matches.merged, summary.matches.merge_previews, summary.matches.merge_blocked,
    );
    println!("  pending followups: {}", summary.pending_followups);
    if opts.dry_run {
        println!("  dry run: nothing was written");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::store::ClientRow;

    fn opts() -> RunOptions {
        RunOptions {
            source_file: "survey.csv".to_string(),
            dry_run: false,
            historical: true,
            recency_days: None,
            notes: None,
            auto_merge: true,
            actor: None,
        }
    }

    fn client(id: &str, first: &str, last: &str, email: &str) -> ClientRow {
        ClientRow {
            id: id.to_string(),
            first_name: first.to_string(),
            last_name: last.to_string(),
            email: Some(email.to_string()),
            ..ClientRow::default()
        }
    }

    const CSV: &str = "Presentiamoci! Come ti chiami?,Email,Come valuti il servizio ricevuto\n\
                       \"Mario Rossi\",mario@x.com,5\n\
                       \"Sconosciuta Persona\",,3\n";

    #[tokio::test]
    async fn persists_batch_responses_and_matches() {
        let store = MemoryStore::with_clients(vec![client("c1", "Mario", "Rossi", "mario@x.com")]);
        let summary = run_import(CSV, &store, &opts()).await.unwrap();

        assert_eq!(summary.rows, 2);
        assert_eq!(summary.batch_id.as_deref(), Some("batch-1"));
        let state = store.state.lock().unwrap();
        assert_eq!(state.batches.len(), 1);
        assert_eq!(state.batches[0].row_count, 2);
        assert!(state.batches[0].historical);
        assert_eq!(state.responses.len(), 2);
        assert_eq!(state.matches.len(), 2);
        assert_eq!(state.matches[0].1.strategy, "email_and_name_exact");
        assert_eq!(state.matches[0].1.client_id.as_deref(), Some("c1"));
        assert_eq!(state.matches[1].1.strategy, "unmatched");
    }

    #[tokio::test]
    async fn dry_run_writes_nothing() {
        let store = MemoryStore::with_clients(vec![client("c1", "Mario", "Rossi", "mario@x.com")]);
        let mut o = opts();
        o.dry_run = true;
        let summary = run_import(CSV, &store, &o).await.unwrap();

        assert_eq!(summary.batch_id, None);
        let state = store.state.lock().unwrap();
        assert!(state.batches.is_empty());
        assert!(state.responses.is_empty());
        assert!(state.matches.is_empty());
    }

    #[tokio::test]
    async fn file_without_data_rows_is_fatal() {
        let store = MemoryStore::default();
        let err = run_import("Presentiamoci,Email\n", &store, &opts())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no data rows"));
    }

    #[tokio::test]
    async fn empty_file_is_fatal() {
        let store = MemoryStore::default();
        assert!(run_import("", &store, &opts()).await.is_err());
    }

    #[tokio::test]
    async fn introspection_failure_falls_back_to_known_tables() {
        // Two orthographic duplicates; the guardrail must still probe the
        // fallback tables when the catalog query fails.
        let store = MemoryStore::with_clients(vec![
            client("c1", "Mario", "Calò", "mario@x.com"),
            client("c2", "Mario", "Calo'", "mario@x.com"),
        ]);
        {
            let mut state = store.state.lock().unwrap();
            state.fail_ref_table_listing = true;
            state
                .refs
                .insert(("lettere_richiamo".to_string(), "c2".to_string()), 1);
        }
        let csv = "Presentiamoci,Email,Come valuti il servizio\n\
                   \"Mario Calò\",mario@x.com,5\nLuigi,,4\n";
        let summary = run_import(csv, &store, &opts()).await.unwrap();
        assert_eq!(summary.matches.merge_blocked, 1);
        assert!(store.state.lock().unwrap().soft_deleted.is_empty());
    }

    #[tokio::test]
    async fn merge_happens_once_across_repeated_rows() {
        let store = MemoryStore::with_clients(vec![
            client("c1", "Mario", "Calò", "mario@x.com"),
            client("c2", "Mario", "Calo'", "mario@x.com"),
        ]);
        let csv = "Presentiamoci,Email,Come valuti il servizio\n\
                   \"Mario Calò\",mario@x.com,5\n\
                   \"Mario Calò\",mario@x.com,4\n";
        let summary = run_import(csv, &store, &opts()).await.unwrap();

        // First row merges; second resolves straight to the survivor.
        assert_eq!(summary.matches.merged, 1);
        let state = store.state.lock().unwrap();
        assert_eq!(state.soft_deleted, vec![("c2".to_string(), None)]);
        assert_eq!(state.matches[1].1.strategy, "email_and_name_exact");
        assert_eq!(state.matches[1].1.client_id.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn live_import_counts_pending_followups() {
        let store = MemoryStore::default();
        let mut o = opts();
        o.historical = false;
        let csv = "Presentiamoci,Come valuti il servizio\nMario,1\nLuigi,5\n";
        let summary = run_import(csv, &store, &o).await.unwrap();
        assert_eq!(summary.pending_followups, 1);
    }
}
