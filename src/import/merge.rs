//! Orthographic-duplicate resolution and client merging.
//!
//! When the email+name tier lands on several roster records, this module
//! decides whether they are the same person typed two ways (apostrophe vs
//! accent, swapped orderings) and, when safe, merges the losers into a single
//! surviving record. Safety is enforced by a reference guardrail: a loser
//! with rows in any dependent table outside the covered set is never deleted.

use std::collections::HashSet;

use tracing::{info, warn};

use super::clients::ClientRoster;
use super::matching::{Confidence, MatchConfig, MatchResult, MatchStrategy};
use super::session::{ImportSession, RefProbe};
use super::text::{full_name_token_key, normalize_text};
use crate::store::{ClientStore, ClientUpdate, StoreError, StoreErrorKind, COVERED_TABLES};

/// Vowels carrying a grave or acute accent, as Italian surnames use them.
const ACCENTED_VOWELS: &[char] = &[
    'à', 'è', 'é', 'ì', 'ò', 'ù', 'À', 'È', 'É', 'Ì', 'Ò', 'Ù',
];

pub(crate) fn has_accented_vowel(s: &str) -> bool {
    s.chars().any(|c| ACCENTED_VOWELS.contains(&c))
}

/// Rewrite `vowel + '` sequences to the grave-accented vowel, as in
/// `Calo'` -> `Calò`. Returns `Some` only when a replacement happened.
pub(crate) fn apostrophe_to_accent(surname: &str) -> Option<String> {
    let mut out = String::with_capacity(surname.len());
    let mut changed = false;
    let mut chars = surname.chars().peekable();
    while let Some(c) = chars.next() {
        let accented = match c {
            'a' => Some('à'),
            'e' => Some('è'),
            'i' => Some('ì'),
            'o' => Some('ò'),
            'u' => Some('ù'),
            'A' => Some('À'),
            'E' => Some('È'),
            'I' => Some('Ì'),
            'O' => Some('Ò'),
            'U' => Some('Ù'),
            _ => None,
        };
        match accented {
            Some(acc) if matches!(chars.peek(), Some('\'') | Some('’')) => {
                chars.next();
                out.push(acc);
                changed = true;
            }
            _ => out.push(c),
        }
    }
    changed.then_some(out)
}

/// True when every candidate looks like the same person typed differently:
/// one shared email, one order-independent name token key, and no more than
/// one distinct non-empty value for each of phone digits, birth date and
/// normalized notes.
pub(crate) fn are_orthographic_variants(ids: &[String], roster: &ClientRoster) -> bool {
    let mut emails: HashSet<String> = HashSet::new();
    let mut name_keys: HashSet<String> = HashSet::new();
    let mut phones: HashSet<String> = HashSet::new();
    let mut birth_dates: HashSet<String> = HashSet::new();
    let mut notes: HashSet<String> = HashSet::new();

    for id in ids {
        let Some(client) = roster.get(id) else {
            return false;
        };
        if let Some(email) = &client.email {
            emails.insert(email.clone());
        }
        name_keys.insert(full_name_token_key(&client.first_name, &client.last_name));
        let digits = client.phone_digits();
        if !digits.is_empty() {
            phones.insert(digits);
        }
        if let Some(date) = client.birth_date {
            birth_dates.insert(date.to_string());
        }
        let note = normalize_text(client.notes.as_deref().unwrap_or(""));
        if !note.is_empty() {
            notes.insert(note);
        }
    }

    emails.len() == 1
        && name_keys.len() == 1
        && phones.len() <= 1
        && birth_dates.len() <= 1
        && notes.len() <= 1
}

/// Order candidates so the record worth keeping comes first: most active
/// buste, then a surname already carrying a proper accent, then the oldest
/// creation date (unknown dates last), then lowest id.
pub(crate) async fn rank_candidates(
    ids: &[String],
    roster: &ClientRoster,
    session: &mut ImportSession,
    store: &dyn ClientStore,
) -> Result<Vec<String>, StoreError> {
    for id in ids {
        if !session.buste_counts.contains_key(id) {
            let count = store.count_active_buste(id).await?;
            session.buste_counts.insert(id.clone(), count);
        }
    }

    let mut ranked: Vec<String> = ids.to_vec();
    ranked.sort_by(|a, b| {
        let count_a = session.buste_counts.get(a).copied().unwrap_or(0);
        let count_b = session.buste_counts.get(b).copied().unwrap_or(0);
        count_b.cmp(&count_a).then_with(|| {
            let accent_a = roster.get(a).is_some_and(|c| has_accented_vowel(&c.last_name));
            let accent_b = roster.get(b).is_some_and(|c| has_accented_vowel(&c.last_name));
            accent_b.cmp(&accent_a).then_with(|| {
                let created_a = roster.get(a).and_then(|c| c.created_at);
                let created_b = roster.get(b).and_then(|c| c.created_at);
                match (created_a, created_b) {
                    (Some(x), Some(y)) => x.cmp(&y),
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => std::cmp::Ordering::Equal,
                }
                .then_with(|| a.cmp(b))
            })
        })
    });
    Ok(ranked)
}

/// Probe dependent tables outside the covered set for references to the
/// losers. Returns human-readable blocker descriptions; empty means safe.
async fn guardrail_blockers(
    losers: &[String],
    session: &mut ImportSession,
    store: &dyn ClientStore,
    config: &MatchConfig,
) -> Vec<String> {
    let mut blockers = Vec::new();
    for table in &config.ref_tables {
        if COVERED_TABLES.contains(&table.as_str()) {
            continue;
        }
        for loser in losers {
            let key = (table.clone(), loser.clone());
            let probe = match session.ref_probes.get(&key) {
                Some(p) => *p,
                None => {
                    let probe = match store.count_client_refs(table, loser).await {
                        Ok(count) => RefProbe::Count(count),
                        Err(e) if e.kind() == StoreErrorKind::NotFound => RefProbe::Count(0),
                        Err(e) => {
                            warn!(table = %table, client_id = %loser, error = %e, "reference probe failed");
                            RefProbe::Error
                        }
                    };
                    session.ref_probes.insert(key, probe);
                    probe
                }
            };
            match probe {
                RefProbe::Count(0) => {}
                RefProbe::Count(n) => {
                    blockers.push(format!("{table} has {n} rows for {loser}"));
                }
                RefProbe::Error => {
                    blockers.push(format!("{table} could not be probed for {loser}"));
                }
            }
        }
    }
    blockers
}

/// Pick the surname the surviving record should carry: any candidate surname
/// already written with an accent, otherwise the first candidate surname
/// (winner first) whose apostrophes can be promoted to accents.
fn preferred_surname(winner: &str, ranked: &[String], roster: &ClientRoster) -> Option<String> {
    let winner_surname = roster.get(winner)?.last_name.clone();
    if has_accented_vowel(&winner_surname) {
        return None;
    }
    for id in ranked {
        if let Some(client) = roster.get(id) {
            if has_accented_vowel(&client.last_name) {
                return Some(client.last_name.clone());
            }
        }
    }
    for id in ranked {
        if let Some(converted) = roster.get(id).and_then(|c| apostrophe_to_accent(&c.last_name)) {
            return Some(converted);
        }
    }
    None
}

/// Decide what happens to a group of email+name candidates: tie-break, flag
/// for review, preview, or merge.
pub(crate) async fn resolve_duplicates(
    candidates: Vec<String>,
    roster: &mut ClientRoster,
    session: &mut ImportSession,
    store: &dyn ClientStore,
    config: &MatchConfig,
) -> Result<MatchResult, StoreError> {
    let ranked = rank_candidates(&candidates, roster, session, store).await?;
    let winner = ranked[0].clone();
    let losers: Vec<String> = ranked[1..].to_vec();

    if !are_orthographic_variants(&ranked, roster) {
        return Ok(MatchResult {
            client_id: Some(winner),
            confidence: Confidence::High,
            strategy: MatchStrategy::EmailAndNameExactTiebreak,
            similarity: None,
            candidates: ranked,
            needs_review: true,
            notes: "multiple distinct clients share this email and name".to_string(),
        });
    }

    if !config.auto_merge {
        return Ok(MatchResult {
            client_id: Some(winner),
            confidence: Confidence::High,
            strategy: MatchStrategy::EmailAndNameExactOrthographicReview,
            similarity: None,
            candidates: ranked,
            needs_review: true,
            notes: "orthographic duplicates found, auto-merge disabled".to_string(),
        });
    }

    let blockers = guardrail_blockers(&losers, session, store, config).await;
    if !blockers.is_empty() {
        warn!(winner = %winner, blockers = ?blockers, "merge blocked by reference guardrail");
        return Ok(MatchResult {
            client_id: Some(winner),
            confidence: Confidence::High,
            strategy: MatchStrategy::EmailAndNameExactOrthographicGuardrailReview,
            similarity: None,
            candidates: ranked,
            needs_review: true,
            notes: format!("merge blocked: {}", blockers.join("; ")),
        });
    }

    if config.dry_run {
        for loser in &losers {
            session.record_merge(loser, &winner);
            session.transfer_buste_count(&winner, loser);
        }
        session.merges += losers.len();
        info!(winner = %winner, losers = ?losers, "dry run, merge previewed");
        return Ok(MatchResult {
            client_id: Some(winner),
            confidence: Confidence::High,
            strategy: MatchStrategy::EmailAndNameExactOrthographicPreview,
            similarity: None,
            candidates: ranked,
            needs_review: false,
            notes: format!("would merge {} duplicate(s)", losers.len()),
        });
    }

    merge_clients(&winner, &losers, &ranked, roster, session, store, config).await?;

    Ok(MatchResult {
        client_id: Some(winner),
        confidence: Confidence::High,
        strategy: MatchStrategy::EmailAndNameExactOrthographicMerged,
        similarity: None,
        candidates: ranked,
        needs_review: false,
        notes: format!("merged {} duplicate(s)", losers.len()),
    })
}

/// Merge losers into the winner: fix the surviving surname, backfill missing
/// contact fields from the losers, re-point covered dependent tables and
/// soft-delete each loser. Already-merged losers are skipped so repeated
/// groups in one run stay idempotent.
pub(crate) async fn merge_clients(
    winner: &str,
    losers: &[String],
    ranked: &[String],
    roster: &mut ClientRoster,
    session: &mut ImportSession,
    store: &dyn ClientStore,
    config: &MatchConfig,
) -> Result<(), StoreError> {
    let mut update = ClientUpdate {
        updated_by: config.actor.clone(),
        ..ClientUpdate::default()
    };

    if let Some(surname) = preferred_surname(winner, ranked, roster) {
        update.last_name = Some(surname);
    }
    if let Some(winner_record) = roster.get(winner) {
        for loser in losers {
            let Some(loser_record) = roster.get(loser) else {
                continue;
            };
            if winner_record.email.is_none() && update.email.is_none() {
                update.email = loser_record.email.clone();
            }
            if winner_record.phone.is_none() && update.phone.is_none() {
                update.phone = loser_record.phone.clone();
            }
            if winner_record.birth_date.is_none() && update.birth_date.is_none() {
                update.birth_date = loser_record.birth_date;
            }
            if winner_record.notes.is_none() && update.notes.is_none() {
                update.notes = loser_record.notes.clone();
            }
        }
    }

    let has_changes = update.last_name.is_some()
        || update.email.is_some()
        || update.phone.is_some()
        || update.birth_date.is_some()
        || update.notes.is_some();
    if has_changes {
        store.update_client(winner, &update).await?;
        if let Some(record) = roster.get_mut(winner) {
            if let Some(surname) = &update.last_name {
                record.last_name = surname.clone();
            }
            if update.email.is_some() {
                record.email = update.email.clone();
            }
            if update.phone.is_some() {
                record.phone = update.phone.clone();
            }
            if update.birth_date.is_some() {
                record.birth_date = update.birth_date;
            }
            if update.notes.is_some() {
                record.notes = update.notes.clone();
            }
            record.refresh_derived();
        }
    }

    for loser in losers {
        if session.is_merged_away(loser) {
            continue;
        }
        for table in COVERED_TABLES {
            store
                .reassign_client_refs(table, loser, winner, config.actor.as_deref())
                .await?;
        }
        let already_deleted = roster.get(loser).is_some_and(|c| c.is_deleted());
        if !already_deleted {
            store
                .soft_delete_client(loser, config.actor.as_deref())
                .await?;
            if let Some(record) = roster.get_mut(loser) {
                record.deleted_at = Some(chrono::Utc::now());
            }
        }
        session.record_merge(loser, winner);
        session.transfer_buste_count(winner, loser);
        session.merges += 1;
        info!(winner = %winner, loser = %loser, "clients merged");
    }

    Ok(())
}
