//! End-to-end pipeline tests: CSV text in, persisted responses and matches
//! out, including a live merge of orthographic duplicate customers.

mod helpers;

use helpers::make_client;
use ottica::import::run::{run_import, RunOptions};
use ottica::store::memory::MemoryStore;

fn options() -> RunOptions {
    RunOptions {
        source_file: "survey.csv".to_string(),
        dry_run: false,
        historical: true,
        recency_days: Some(30),
        notes: Some("august batch".to_string()),
        auto_merge: true,
        actor: Some("admin-1".to_string()),
    }
}

#[tokio::test]
async fn scores_and_matches_a_simple_export() {
    let store = MemoryStore::with_clients(vec![make_client(
        "c1",
        "Mario",
        "Rossi",
        Some("mario@x.com"),
    )]);
    let csv = "Presentiamoci! Come ti chiami?,Email,Come valuti il servizio ricevuto\n\
               \"Mario Rossi\",\"mario@x.com\",\"5\"\n";

    let summary = run_import(csv, &store, &options()).await.unwrap();
    assert_eq!(summary.rows, 1);

    let state = store.state.lock().unwrap();
    let (_, response) = &state.responses[0];
    assert_eq!(response.overall, Some(100.0));
    assert_eq!(response.sections["servizio"], 100.0);
    assert_eq!(response.badge, "eccellente");
    assert!(!response.is_recent);

    let (_, matched) = &state.matches[0];
    assert_eq!(matched.client_id.as_deref(), Some("c1"));
    assert_eq!(matched.confidence, "high");
    assert_eq!(matched.strategy, "email_and_name_exact");
    assert!(!matched.needs_review);

    assert_eq!(state.batches[0].source_file, "survey.csv");
    assert_eq!(state.batches[0].recency_days, Some(30));
    assert_eq!(state.batches[0].notes.as_deref(), Some("august batch"));
}

#[tokio::test]
async fn full_run_merges_duplicates_and_keeps_later_rows_consistent() {
    // Roster carries the same person twice: apostrophe spelling vs accent.
    let store = MemoryStore::with_clients(vec![
        make_client("c1", "Mario", "Calo'", Some("mario@x.com")),
        make_client("c2", "Mario", "Calò", Some("mario@x.com")),
    ]);
    {
        let mut state = store.state.lock().unwrap();
        state.buste.insert("c1".to_string(), 2);
        state.refs.insert(("buste".to_string(), "c2".to_string()), 1);
    }

    let csv = "Presentiamoci,Email,Come valuti il servizio,Ci consiglieresti?\n\
               \"Mario Calò\",mario@x.com,5,3\n\
               \"Mario Calo'\",mario@x.com,4,\n";

    let summary = run_import(csv, &store, &options()).await.unwrap();
    assert_eq!(summary.matches.merged, 1);

    let state = store.state.lock().unwrap();
    // c1 wins on business activity but adopts c2's accented surname; the
    // loser is soft-deleted with the acting admin stamped in deleted_by.
    assert_eq!(
        state.soft_deleted,
        vec![("c2".to_string(), Some("admin-1".to_string()))],
    );
    assert_eq!(state.updates[0].0, "c1");
    assert_eq!(state.updates[0].1.last_name.as_deref(), Some("Calò"));
    assert_eq!(state.refs[&("buste".to_string(), "c1".to_string())], 1);

    // Both rows resolve to the survivor, the second without re-merging.
    assert_eq!(state.matches[0].1.client_id.as_deref(), Some("c1"));
    assert_eq!(
        state.matches[0].1.strategy,
        "email_and_name_exact_orthographic_merged"
    );
    assert_eq!(state.matches[1].1.client_id.as_deref(), Some("c1"));
    assert_eq!(state.matches[1].1.strategy, "email_and_name_exact");
}

#[tokio::test]
async fn live_run_flags_bad_scores_for_followup() {
    let store = MemoryStore::default();
    let mut opts = options();
    opts.historical = false;
    let csv = "Presentiamoci,Come valuti il servizio\n\
               \"Anna Bianchi\",1\n\
               \"Paola Neri\",5\n";

    let summary = run_import(csv, &store, &opts).await.unwrap();
    assert_eq!(summary.pending_followups, 1);

    let state = store.state.lock().unwrap();
    let (_, bad) = &state.responses[0];
    assert_eq!(bad.badge, "critico");
    assert!(bad.requires_followup);
    assert_eq!(bad.followup_status, "pending");
    let (_, good) = &state.responses[1];
    assert_eq!(good.followup_status, "none");
    // Neither respondent exists in the roster.
    assert_eq!(state.matches[0].1.strategy, "unmatched");
}

#[tokio::test]
async fn dry_run_reports_merge_preview_without_touching_the_store() {
    let store = MemoryStore::with_clients(vec![
        make_client("c1", "Mario", "Calo'", Some("mario@x.com")),
        make_client("c2", "Mario", "Calò", Some("mario@x.com")),
    ]);
    let mut opts = options();
    opts.dry_run = true;

    let csv = "Presentiamoci,Email,Come valuti il servizio\n\
               \"Mario Calò\",mario@x.com,5\n";
    let summary = run_import(csv, &store, &opts).await.unwrap();

    assert_eq!(summary.matches.merge_previews, 1);
    assert_eq!(summary.batch_id, None);
    let state = store.state.lock().unwrap();
    assert!(state.batches.is_empty());
    assert!(state.updates.is_empty());
    assert!(state.soft_deleted.is_empty());
    assert!(state.reassignments.is_empty());
}
