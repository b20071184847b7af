//! Tiered identity matching: resolve one survey respondent against the
//! customer roster.
//!
//! The tiers run in strict precedence order and the first decisive rule
//! short-circuits the rest: email+name exact, email exact, full-name exact,
//! fuzzy token similarity. Candidate ids always pass through the session's
//! redirect map first so rows merged earlier in the run collapse onto their
//! surviving record.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::debug;

use super::clients::{ClientIndexes, ClientRoster};
use super::merge::resolve_duplicates;
use super::session::ImportSession;
use super::text::{jaccard, normalize_email, normalize_text, round2, tokenize_name};
use crate::store::{ClientStore, StoreError};

/// Minimum Jaccard similarity for a fuzzy candidate to qualify.
const FUZZY_THRESHOLD: f64 = 0.55;

/// At most this many fuzzy candidates are reported for review.
const MAX_FUZZY_CANDIDATES: usize = 3;

/// How sure the matcher is about the resolved client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    None,
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(self) -> &'static str {
        match self {
            Confidence::None => "none",
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        }
    }
}

/// Which rule produced the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    EmailAndNameExact,
    EmailAndNameExactTiebreak,
    EmailAndNameExactOrthographicReview,
    EmailAndNameExactOrthographicGuardrailReview,
    EmailAndNameExactOrthographicMerged,
    EmailAndNameExactOrthographicPreview,
    EmailExact,
    NameExact,
    NameSimilarity,
    Unmatched,
}

impl MatchStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchStrategy::EmailAndNameExact => "email_and_name_exact",
            MatchStrategy::EmailAndNameExactTiebreak => "email_and_name_exact_tiebreak",
            MatchStrategy::EmailAndNameExactOrthographicReview => {
                "email_and_name_exact_orthographic_review"
            }
            MatchStrategy::EmailAndNameExactOrthographicGuardrailReview => {
                "email_and_name_exact_orthographic_guardrail_review"
            }
            MatchStrategy::EmailAndNameExactOrthographicMerged => {
                "email_and_name_exact_orthographic_merged"
            }
            MatchStrategy::EmailAndNameExactOrthographicPreview => {
                "email_and_name_exact_orthographic_preview"
            }
            MatchStrategy::EmailExact => "email_exact",
            MatchStrategy::NameExact => "name_exact",
            MatchStrategy::NameSimilarity => "name_similarity",
            MatchStrategy::Unmatched => "unmatched",
        }
    }
}

/// Per-row output of the matcher.
#[derive(Debug, Clone)]
pub struct MatchResult {
    /// Resolved canonical client id, when a single record was chosen.
    pub client_id: Option<String>,
    pub confidence: Confidence,
    pub strategy: MatchStrategy,
    /// Top Jaccard similarity, fuzzy matches only. Two decimals.
    pub similarity: Option<f64>,
    /// Candidate client ids when the decision was ambiguous.
    pub candidates: Vec<String>,
    pub needs_review: bool,
    pub notes: String,
}

impl MatchResult {
    fn unmatched() -> Self {
        Self {
            client_id: None,
            confidence: Confidence::None,
            strategy: MatchStrategy::Unmatched,
            similarity: None,
            candidates: Vec::new(),
            needs_review: false,
            notes: "no roster candidate".to_string(),
        }
    }
}

/// Caller configuration for matching and duplicate resolution.
#[derive(Debug, Clone)]
pub struct MatchConfig {
    /// When false, orthographic duplicates are reported for review instead
    /// of merged.
    pub auto_merge: bool,
    /// When true, merges are previewed but never written.
    pub dry_run: bool,
    /// All store tables carrying a `cliente_id` column (guardrail scope).
    pub ref_tables: Vec<String>,
    /// Admin actor id stamped on merge writes, when known.
    pub actor: Option<String>,
}

/// Resolve raw candidate ids through the redirect map, collapse duplicates
/// and drop soft-deleted (merged-away) records.
pub(crate) fn canonical_candidates(
    raw_ids: &[String],
    roster: &ClientRoster,
    session: &ImportSession,
) -> Vec<String> {
    let mut out = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for id in raw_ids {
        let canon = session.resolve_canonical(id);
        if !seen.insert(canon.clone()) {
            continue;
        }
        if roster.get(&canon).is_some_and(|c| !c.is_deleted()) {
            out.push(canon);
        }
    }
    out
}

/// Match one respondent (raw name and email from the CSV) against the roster.
///
/// May mutate the roster and session: the email+name tier escalates multiple
/// candidates to duplicate resolution, which can merge records.
pub async fn match_respondent(
    raw_name: &str,
    raw_email: &str,
    roster: &mut ClientRoster,
    indexes: &ClientIndexes,
    session: &mut ImportSession,
    store: &dyn ClientStore,
    config: &MatchConfig,
) -> Result<MatchResult, StoreError> {
    let name = normalize_text(raw_name);
    let email = normalize_email(raw_email);

    // Tier 1: exact email AND exact full name (either ordering).
    if !name.is_empty() && !email.is_empty() {
        let email_ids = indexes.by_email.get(&email).cloned().unwrap_or_default();
        let candidates: Vec<String> = canonical_candidates(&email_ids, roster, session)
            .into_iter()
            .filter(|id| {
                roster
                    .get(id)
                    .is_some_and(|c| c.forward_name == name || c.reverse_name == name)
            })
            .collect();

        match candidates.len() {
            0 => {}
            1 => {
                return Ok(MatchResult {
                    client_id: Some(candidates[0].clone()),
                    confidence: Confidence::High,
                    strategy: MatchStrategy::EmailAndNameExact,
                    similarity: None,
                    candidates: Vec::new(),
                    needs_review: false,
                    notes: "email and full name both match".to_string(),
                });
            }
            _ => {
                debug!(
                    count = candidates.len(),
                    email, "multiple exact email+name candidates, resolving duplicates"
                );
                return resolve_duplicates(candidates, roster, session, store, config).await;
            }
        }
    }

    // Tier 2: exact email.
    if !email.is_empty() {
        let email_ids = indexes.by_email.get(&email).cloned().unwrap_or_default();
        let candidates = canonical_candidates(&email_ids, roster, session);
        match candidates.len() {
            0 => {}
            1 => {
                return Ok(MatchResult {
                    client_id: Some(candidates[0].clone()),
                    confidence: Confidence::Medium,
                    strategy: MatchStrategy::EmailExact,
                    similarity: None,
                    candidates: Vec::new(),
                    needs_review: false,
                    notes: "email matches exactly".to_string(),
                });
            }
            n => {
                return Ok(MatchResult {
                    client_id: None,
                    confidence: Confidence::Medium,
                    strategy: MatchStrategy::EmailExact,
                    similarity: None,
                    candidates,
                    needs_review: true,
                    notes: format!("{n} clients share this email"),
                });
            }
        }
    }

    // Tier 3: exact full name, either ordering.
    if !name.is_empty() {
        let name_ids = indexes.by_name.get(&name).cloned().unwrap_or_default();
        let candidates = canonical_candidates(&name_ids, roster, session);
        match candidates.len() {
            0 => {}
            1 => {
                return Ok(MatchResult {
                    client_id: Some(candidates[0].clone()),
                    confidence: Confidence::Medium,
                    strategy: MatchStrategy::NameExact,
                    similarity: None,
                    candidates: Vec::new(),
                    needs_review: false,
                    notes: "full name matches exactly".to_string(),
                });
            }
            n => {
                return Ok(MatchResult {
                    client_id: None,
                    confidence: Confidence::Medium,
                    strategy: MatchStrategy::NameExact,
                    similarity: None,
                    candidates,
                    needs_review: true,
                    notes: format!("{n} clients share this full name"),
                });
            }
        }
    }

    // Tier 4: fuzzy token similarity.
    let tokens: HashSet<String> = tokenize_name(raw_name).into_iter().collect();
    if tokens.is_empty() {
        return Ok(MatchResult::unmatched());
    }

    let mut raw_ids: Vec<String> = Vec::new();
    for token in &tokens {
        if let Some(ids) = indexes.by_token.get(token) {
            raw_ids.extend(ids.iter().cloned());
        }
    }

    let mut scored: Vec<(String, f64)> = canonical_candidates(&raw_ids, roster, session)
        .into_iter()
        .filter_map(|id| {
            let client = roster.get(&id)?;
            let score = jaccard(&tokens, &client.name_tokens);
            (score >= FUZZY_THRESHOLD).then_some((id, score))
        })
        .collect();

    if scored.is_empty() {
        return Ok(MatchResult::unmatched());
    }

    // Highest similarity first; id order as the deterministic tie-break.
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));

    let top_score = round2(scored[0].1);
    let candidates: Vec<String> = scored
        .iter()
        .take(MAX_FUZZY_CANDIDATES)
        .map(|(id, _)| id.clone())
        .collect();

    Ok(MatchResult {
        client_id: Some(candidates[0].clone()),
        confidence: Confidence::Low,
        strategy: MatchStrategy::NameSimilarity,
        similarity: Some(top_score),
        candidates,
        needs_review: true,
        notes: format!("best token similarity {top_score:.2}"),
    })
}

/// Summary counters for one import run, keyed the way the operator report
/// prints them.
#[derive(Debug, Default)]
pub struct MatchStats {
    pub by_confidence: HashMap<&'static str, usize>,
    pub unmatched: usize,
    pub needs_review: usize,
    pub merged: usize,
    pub merge_previews: usize,
    pub merge_blocked: usize,
}

impl MatchStats {
    pub fn record(&mut self, result: &MatchResult) {
        *self.by_confidence.entry(result.confidence.as_str()).or_insert(0) += 1;
        if result.strategy == MatchStrategy::Unmatched {
            self.unmatched += 1;
        }
        if result.needs_review {
            self.needs_review += 1;
        }
        match result.strategy {
            MatchStrategy::EmailAndNameExactOrthographicMerged => self.merged += 1,
            MatchStrategy::EmailAndNameExactOrthographicPreview => self.merge_previews += 1,
            MatchStrategy::EmailAndNameExactOrthographicGuardrailReview => {
                self.merge_blocked += 1;
            }
            _ => {}
        }
    }
}
