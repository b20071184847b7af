//! Per-run mutable state for one import: the merge redirect map and the
//! caches that keep duplicate-resolution decisions consistent without
//! re-querying the store. Scoped to a single sequential run; never shared
//! across concurrent imports.

use std::collections::{HashMap, HashSet};

/// Result of probing an external table for references to a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefProbe {
    Count(u64),
    /// The probe itself failed for a reason other than "table does not
    /// exist". Treated as a blocker, never as zero.
    Error,
}

#[derive(Debug, Default)]
pub struct ImportSession {
    /// Merged-away client id -> surviving client id. Each id appears as a
    /// key at most once; chains are resolved transitively.
    redirects: HashMap<String, String>,
    /// Active (non-deleted) busta counts per client, absorbed across merges.
    pub buste_counts: HashMap<String, i64>,
    /// Guardrail probe cache: (table, client id) -> probe result.
    pub ref_probes: HashMap<(String, String), RefProbe>,
    /// Merges performed (or previewed) this run.
    pub merges: usize,
}

impl ImportSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Follow the redirect map to the ultimate canonical id.
    ///
    /// Cycle-guarded via a seen-set so a malformed map cannot loop; resolving
    /// an id with no redirect returns it unchanged, and resolution is
    /// idempotent.
    pub fn resolve_canonical(&self, id: &str) -> String {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut current = id;
        while let Some(next) = self.redirects.get(current) {
            if !seen.insert(current) {
                break;
            }
            current = next;
        }
        current.to_string()
    }

    /// True when this id was already merged away during this run.
    pub fn is_merged_away(&self, id: &str) -> bool {
        self.redirects.contains_key(id)
    }

    /// Record a merge. A loser keeps its first redirect; re-recording the
    /// same loser is a no-op so repeated merges cannot rewire history.
    pub fn record_merge(&mut self, loser: &str, winner: &str) {
        if loser == winner {
            return;
        }
        self.redirects
            .entry(loser.to_string())
            .or_insert_with(|| winner.to_string());
    }

    /// Move the loser's cached busta count onto the winner so later ranking
    /// decisions in the same run see up-to-date business activity.
    pub fn transfer_buste_count(&mut self, winner: &str, loser: &str) {
        let taken = self
            .buste_counts
            .insert(loser.to_string(), 0)
            .unwrap_or(0);
        *self.buste_counts.entry(winner.to_string()).or_insert(0) += taken;
    }
}
