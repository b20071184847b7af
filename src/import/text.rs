//! Text normalization and token-set similarity for identity matching.
//!
//! All name and email comparisons in the matcher go through these functions,
//! so survey respondents typed as "María  Rossi!" and roster rows stored as
//! "maria rossi" land on the same key.

use std::collections::HashSet;

use unicode_normalization::UnicodeNormalization;

/// Canonicalize free text for comparison.
///
/// Pipeline: lowercase -> NFD decompose -> strip combining marks -> replace
/// anything outside `[a-z0-9]` with a space -> collapse whitespace -> trim.
///
/// # Examples
///
/// ```
/// use ottica::import::text::normalize_text;
///
/// assert_eq!(normalize_text("Perché não?"), "perche nao");
/// assert_eq!(normalize_text("  D'Angelo "), "d angelo");
/// ```
pub fn normalize_text(s: &str) -> String {
    let mapped: String = s
        .to_lowercase()
        .nfd()
        .filter(|c| !unicode_normalization::char::is_combining_mark(*c))
        .map(|c| {
            if c.is_ascii_alphanumeric() { c } else { ' ' }
        })
        .collect();
    collapse_whitespace(&mapped)
}

/// Canonicalize an email address: trim and lowercase only.
pub fn normalize_email(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Collapse runs of whitespace into single spaces and trim.
fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split a name into normalized tokens, dropping tokens of length <= 1.
///
/// Single-letter tokens (initials, stray punctuation residue) carry no
/// matching signal and only inflate the token index.
pub fn tokenize_name(s: &str) -> Vec<String> {
    normalize_text(s)
        .split(' ')
        .filter(|t| t.len() > 1)
        .map(|t| t.to_string())
        .collect()
}

/// Order-independent identity key for a full name.
///
/// Tokenizes `first + last`, sorts the tokens lexically and joins them with
/// spaces, so "Mario Rossi" and "Rossi Mario" (fields swapped or reordered)
/// produce the same key.
pub fn full_name_token_key(first: &str, last: &str) -> String {
    let mut tokens = tokenize_name(&format!("{first} {last}"));
    tokens.sort();
    tokens.join(" ")
}

/// Jaccard similarity between two token sets: `|intersection| / |union|`.
///
/// Returns `0.0` when either set is empty.
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f64 / union as f64
}

/// Round to two decimal places. Scores and similarities are reported and
/// persisted at this precision.
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
