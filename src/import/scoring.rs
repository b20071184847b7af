//! Survey scoring: Likert normalization onto 0-100, per-section aggregation,
//! badge assignment and follow-up eligibility.
//!
//! Score maps are locked from the survey design: the 3-point word-of-mouth
//! and 4-point experience questions use fixed non-linear tables; every other
//! answer rescales linearly against its column's observed scale.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use indexmap::IndexMap;
use serde::Serialize;

use super::columns::{ColumnMap, parse_date};
use super::rows::SurveyRecord;
use super::text::{normalize_text, round2};

/// The ambiguous "how did this experience go" question, in normalized form.
/// Shared between the experience and fit-adjustment survey flows; resolved
/// per row by whether a fit-adjustment answer is present.
const AMBIGUOUS_EXPERIENCE: &str = "com e andata questa esperienza";

/// Fixed 3-point word-of-mouth map.
const PASSAPAROLA_3: [f64; 3] = [0.0, 50.0, 100.0];

/// Semantic section of a survey question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKey {
    Esperienza,
    Passaparola,
    Prodotto,
    Servizio,
    ControlloVista,
    Adattamento,
    /// Unclassified; excluded from scoring.
    Other,
}

impl SectionKey {
    pub fn as_str(self) -> &'static str {
        match self {
            SectionKey::Esperienza => "esperienza",
            SectionKey::Passaparola => "passaparola",
            SectionKey::Prodotto => "prodotto",
            SectionKey::Servizio => "servizio",
            SectionKey::ControlloVista => "controllo_vista",
            SectionKey::Adattamento => "adattamento",
            SectionKey::Other => "other",
        }
    }
}

/// Qualitative badge derived from section averages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Badge {
    Eccellente,
    Positivo,
    Attenzione,
    Critico,
}

impl Badge {
    pub fn as_str(self) -> &'static str {
        match self {
            Badge::Eccellente => "eccellente",
            Badge::Positivo => "positivo",
            Badge::Attenzione => "attenzione",
            Badge::Critico => "critico",
        }
    }
}

/// Follow-up disposition for one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowupStatus {
    Pending,
    IgnoredOld,
    None,
}

impl FollowupStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FollowupStatus::Pending => "pending",
            FollowupStatus::IgnoredOld => "ignored_old",
            FollowupStatus::None => "none",
        }
    }
}

/// Per-row output of the scorer.
#[derive(Debug, Clone)]
pub struct ScoredResponse {
    /// Average of the per-section averages, 2 decimals. `None` when no
    /// section received any scoreable answer.
    pub overall: Option<f64>,
    /// Section key -> averaged 0-100 score, 2 decimals. Sections with no
    /// answers are absent.
    pub sections: IndexMap<String, f64>,
    pub suggestion: Option<String>,
    pub badge: Badge,
    /// Sections averaging <= 50.
    pub low_sections: u32,
    /// Sections averaging <= 25.
    pub very_low_sections: u32,
    pub submitted_at: Option<NaiveDateTime>,
    /// Run-level flag: true unless the import is historical. Not derived
    /// from the submission date.
    pub is_recent: bool,
    pub requires_followup: bool,
    pub followup_status: FollowupStatus,
}

/// Classify a numeric header into its semantic section.
///
/// Designated headers (overall/recommend/product) win first; then keyword
/// substrings over the normalized header text. The ambiguous experience
/// phrase resolves to `adattamento` only when the row answered a
/// fit-adjustment question.
pub fn section_key(header: &str, cols: &ColumnMap, has_fit_answer: bool) -> SectionKey {
    if cols.overall_header.as_deref() == Some(header) {
        return SectionKey::Esperienza;
    }
    if cols.recommend_header.as_deref() == Some(header) {
        return SectionKey::Passaparola;
    }
    if cols.product_header.as_deref() == Some(header) {
        return SectionKey::Prodotto;
    }

    let text = normalize_text(header);
    if text.contains("controllo") && text.contains("vista") {
        return SectionKey::ControlloVista;
    }
    if text.contains("adattamento") || text.contains("regolazione") {
        return SectionKey::Adattamento;
    }
    if text.contains(AMBIGUOUS_EXPERIENCE) {
        return if has_fit_answer {
            SectionKey::Adattamento
        } else {
            SectionKey::Esperienza
        };
    }
    if text.contains("passaparola") || text.contains("consiglieresti") {
        return SectionKey::Passaparola;
    }
    if text.contains("prodotto") {
        return SectionKey::Prodotto;
    }
    if text.contains("servizio") || text.contains("accoglienza") || text.contains("personale") {
        return SectionKey::Servizio;
    }
    if text.contains("esperienza") {
        return SectionKey::Esperienza;
    }
    SectionKey::Other
}

/// True when the row answered any explicitly fit-adjustment numeric column.
fn has_fit_answer(record: &SurveyRecord, cols: &ColumnMap) -> bool {
    cols.numeric.keys().any(|header| {
        let text = normalize_text(header);
        (text.contains("adattamento") || text.contains("regolazione"))
            && record.get(header).is_some_and(|v| !v.is_empty())
    })
}

/// Normalize one Likert answer onto 0-100.
fn normalize_value(section: SectionKey, value: u8, scale: u8, is_overall: bool) -> f64 {
    if section == SectionKey::Passaparola && scale == 3 && (1..=3).contains(&value) {
        return PASSAPAROLA_3[(value - 1) as usize];
    }
    if section == SectionKey::Esperienza && (is_overall || scale == 4) {
        match value {
            1 => return 0.0,
            2 => return 30.0,
            3 => return 65.0,
            4 => return 100.0,
            _ => {}
        }
    }
    if scale <= 1 {
        // A column whose only observed value is 1 cannot be rescaled.
        return 100.0;
    }
    f64::from(value - 1) / f64::from(scale - 1) * 100.0
}

/// Map the product-satisfaction free-text answer onto 0-100.
fn product_text_score(value: &str) -> Option<f64> {
    match normalize_text(value).as_str() {
        "si" => Some(100.0),
        "abbastanza" => Some(60.0),
        "non saprei" => Some(50.0),
        "no" => Some(0.0),
        _ => None,
    }
}

/// Badge assignment, ordered, first match wins. Evaluated over the rounded
/// section averages, not raw answers.
fn assign_badge(overall: Option<f64>, sections: &IndexMap<String, f64>) -> Badge {
    let Some(overall) = overall else {
        return Badge::Attenzione;
    };
    let min_section = sections
        .values()
        .copied()
        .fold(f64::INFINITY, f64::min);
    let any_very_low = sections.values().any(|v| *v <= 25.0);

    if overall >= 90.0 && !any_very_low && min_section >= 75.0 {
        Badge::Eccellente
    } else if overall >= 80.0 && !any_very_low && min_section >= 60.0 {
        Badge::Positivo
    } else if overall < 70.0 || any_very_low {
        Badge::Critico
    } else {
        Badge::Attenzione
    }
}

/// Score one survey record against the detected columns.
///
/// `historical` is the run-level flag from the CLI: a historical import never
/// generates pending follow-ups, regardless of the submission date.
pub fn score_response(record: &SurveyRecord, cols: &ColumnMap, historical: bool) -> ScoredResponse {
    let fit = has_fit_answer(record, cols);

    let mut by_section: BTreeMap<SectionKey, Vec<f64>> = BTreeMap::new();

    for (header, &scale) in &cols.numeric {
        let Some(value) = record.get(header).filter(|v| !v.is_empty()) else {
            continue;
        };
        let Ok(value) = value.parse::<u8>() else {
            // Not reachable for detected numeric columns.
            continue;
        };
        let section = section_key(header, cols, fit);
        if section == SectionKey::Other {
            continue;
        }
        let is_overall = cols.overall_header.as_deref() == Some(header.as_str());
        by_section
            .entry(section)
            .or_default()
            .push(normalize_value(section, value, scale, is_overall));
    }

    // Product free-text answer folds into the prodotto section alongside any
    // numeric product scores.
    if let Some(product_header) = cols.product_header.as_deref()
        && !cols.numeric.contains_key(product_header)
        && let Some(value) = record.get(product_header).filter(|v| !v.is_empty())
        && let Some(score) = product_text_score(value)
    {
        by_section
            .entry(SectionKey::Prodotto)
            .or_default()
            .push(score);
    }

    let mut sections: IndexMap<String, f64> = IndexMap::new();
    for (section, values) in &by_section {
        let avg = values.iter().sum::<f64>() / values.len() as f64;
        sections.insert(section.as_str().to_string(), round2(avg));
    }

    let overall = if sections.is_empty() {
        None
    } else {
        Some(round2(
            sections.values().sum::<f64>() / sections.len() as f64,
        ))
    };

    let badge = assign_badge(overall, &sections);
    let low_sections = sections.values().filter(|v| **v <= 50.0).count() as u32;
    let very_low_sections = sections.values().filter(|v| **v <= 25.0).count() as u32;

    let suggestion = cols
        .suggestion_header
        .as_deref()
        .and_then(|h| record.get(h))
        .filter(|v| !v.is_empty())
        .cloned();

    let submitted_at = cols
        .submitted_header
        .as_deref()
        .and_then(|h| record.get(h))
        .and_then(|v| parse_date(v));

    let is_recent = !historical;
    let would_followup = matches!(badge, Badge::Attenzione | Badge::Critico);
    let requires_followup = is_recent && would_followup;
    let followup_status = if requires_followup {
        FollowupStatus::Pending
    } else if would_followup {
        FollowupStatus::IgnoredOld
    } else {
        FollowupStatus::None
    };

    ScoredResponse {
        overall,
        sections,
        suggestion,
        badge,
        low_sections,
        very_low_sections,
        submitted_at,
        is_recent,
        requires_followup,
        followup_status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::columns::detect_columns;
    use crate::import::rows::parse_survey_csv;

    fn score_csv(csv: &str, historical: bool) -> Vec<ScoredResponse> {
        let parsed = parse_survey_csv(csv).unwrap();
        let cols = detect_columns(&parsed.headers, &parsed.records);
        parsed
            .records
            .iter()
            .map(|r| score_response(r, &cols, historical))
            .collect()
    }

    #[test]
    fn passaparola_three_point_map() {
        // Recommend column with observed max 3 -> {1:0, 2:50, 3:100}.
        let scored = score_csv(
            "Presentiamoci,Ci consiglieresti ai tuoi amici?\nMario,2\nLuigi,3\n",
            true,
        );
        assert_eq!(scored[0].sections["passaparola"], 50.0);
        assert_eq!(scored[1].sections["passaparola"], 100.0);
    }

    #[test]
    fn esperienza_four_point_map() {
        let scored = score_csv(
            "Presentiamoci,Descrivi la tua esperienza in negozio\nMario,3\nLuigi,4\n",
            true,
        );
        assert_eq!(scored[0].sections["esperienza"], 65.0);
        assert_eq!(scored[1].sections["esperienza"], 100.0);
    }

    #[test]
    fn overall_question_uses_experience_map() {
        // Designated overall question gets the fixed map even on a 3-scale.
        let scored = score_csv(
            "Presentiamoci,Come giudichi la tua esperienza complessiva?\nMario,3\nLuigi,2\n",
            true,
        );
        assert_eq!(scored[0].sections["esperienza"], 65.0);
        assert_eq!(scored[1].sections["esperienza"], 30.0);
    }

    #[test]
    fn generic_linear_rescaling() {
        // 4 on a 5-point scale -> 75.
        let scored = score_csv(
            "Presentiamoci,Come valuti il servizio ricevuto\nMario,4\nLuigi,5\n",
            true,
        );
        assert_eq!(scored[0].sections["servizio"], 75.0);
        assert_eq!(scored[1].sections["servizio"], 100.0);
    }

    #[test]
    fn product_text_lexical_table() {
        let scored = score_csv(
            "Presentiamoci,Il prodotto acquistato ti soddisfa?\nMario,Sì\nLuigi,abbastanza\nAnna,No\nPia,Non saprei\nUgo,boh\n",
            true,
        );
        assert_eq!(scored[0].sections["prodotto"], 100.0);
        assert_eq!(scored[1].sections["prodotto"], 60.0);
        assert_eq!(scored[2].sections["prodotto"], 0.0);
        assert_eq!(scored[3].sections["prodotto"], 50.0);
        assert!(scored[4].sections.is_empty());
    }

    #[test]
    fn ambiguous_experience_resolves_by_fit_answer() {
        let csv = "Presentiamoci,Com'è andata questa esperienza?,Valuta l'adattamento della montatura\n\
                   Mario,4,5\n\
                   Luigi,4,\n";
        let scored = score_csv(csv, true);
        // Mario answered the adjustment question: ambiguous header counts as
        // adattamento. Luigi did not: it counts as esperienza.
        assert!(scored[0].sections.contains_key("adattamento"));
        assert!(!scored[0].sections.contains_key("esperienza"));
        assert!(scored[1].sections.contains_key("esperienza"));
        assert!(!scored[1].sections.contains_key("adattamento"));
    }

    #[test]
    fn overall_is_average_of_section_averages() {
        // servizio: 100, prodotto: 50 -> overall 75, not a raw-answer average.
        let scored = score_csv(
            "Presentiamoci,Come valuti il servizio,Voto al prodotto,Altro voto servizio\n\
             Mario,5,3,5\n\
             Luigi,1,5,1\n",
            true,
        );
        let s = &scored[0];
        assert_eq!(s.sections["servizio"], 100.0);
        assert_eq!(s.sections["prodotto"], 50.0);
        assert_eq!(s.overall, Some(75.0));
    }

    #[test]
    fn no_scoreable_sections_defaults_to_attenzione() {
        let scored = score_csv("Presentiamoci,Commento libero\nMario,tutto bene\n", true);
        assert_eq!(scored[0].overall, None);
        assert_eq!(scored[0].badge, Badge::Attenzione);
        assert!(scored[0].sections.is_empty());
    }

    #[test]
    fn badge_eccellente_at_exactly_ninety() {
        let mut sections = IndexMap::new();
        sections.insert("servizio".to_string(), 100.0);
        sections.insert("prodotto".to_string(), 80.0);
        assert_eq!(assign_badge(Some(90.0), &sections), Badge::Eccellente);
    }

    #[test]
    fn badge_below_ninety_is_positivo() {
        let mut sections = IndexMap::new();
        sections.insert("servizio".to_string(), 99.98);
        sections.insert("prodotto".to_string(), 80.0);
        assert_eq!(assign_badge(Some(89.99), &sections), Badge::Positivo);
    }

    #[test]
    fn badge_low_min_section_blocks_eccellente() {
        let mut sections = IndexMap::new();
        sections.insert("servizio".to_string(), 100.0);
        sections.insert("prodotto".to_string(), 70.0);
        // overall 85, min 70: not eccellente (min < 75), positivo fits.
        assert_eq!(assign_badge(Some(85.0), &sections), Badge::Positivo);
    }

    #[test]
    fn badge_any_section_at_25_is_critico() {
        let mut sections = IndexMap::new();
        sections.insert("servizio".to_string(), 100.0);
        sections.insert("prodotto".to_string(), 25.0);
        assert_eq!(assign_badge(Some(95.0), &sections), Badge::Critico);
    }

    #[test]
    fn badge_below_seventy_is_critico() {
        let mut sections = IndexMap::new();
        sections.insert("servizio".to_string(), 69.0);
        assert_eq!(assign_badge(Some(69.0), &sections), Badge::Critico);
    }

    #[test]
    fn badge_middle_ground_is_attenzione() {
        let mut sections = IndexMap::new();
        sections.insert("servizio".to_string(), 75.0);
        sections.insert("prodotto".to_string(), 74.0);
        assert_eq!(assign_badge(Some(74.5), &sections), Badge::Attenzione);
    }

    #[test]
    fn low_section_counters() {
        let scored = score_csv(
            "Presentiamoci,Come valuti il servizio,Voto al prodotto\nMario,1,2\nLuigi,5,5\n",
            true,
        );
        // servizio 0 (<=25 and <=50), prodotto 25 (<=25 and <=50)
        assert_eq!(scored[0].low_sections, 2);
        assert_eq!(scored[0].very_low_sections, 2);
    }

    #[test]
    fn followup_pending_on_live_import() {
        let scored = score_csv(
            "Presentiamoci,Come valuti il servizio\nMario,2\nLuigi,5\n",
            false,
        );
        assert!(scored[0].is_recent);
        assert!(scored[0].requires_followup);
        assert_eq!(scored[0].followup_status, FollowupStatus::Pending);
    }

    #[test]
    fn followup_ignored_on_historical_import() {
        let scored = score_csv(
            "Presentiamoci,Come valuti il servizio\nMario,2\nLuigi,5\n",
            true,
        );
        assert!(!scored[0].is_recent);
        assert!(!scored[0].requires_followup);
        assert_eq!(scored[0].followup_status, FollowupStatus::IgnoredOld);
    }

    #[test]
    fn followup_none_for_good_scores() {
        let scored = score_csv(
            "Presentiamoci,Come valuti il servizio\nMario,5\n",
            false,
        );
        assert_eq!(scored[0].followup_status, FollowupStatus::None);
    }

    #[test]
    fn submitted_at_parsed_from_date_column() {
        let scored = score_csv(
            "Presentiamoci,Come valuti il servizio,Data invio\nMario,5,12/03/2024 10:15\n",
            true,
        );
        let dt = scored[0].submitted_at.unwrap();
        assert_eq!(dt.format("%Y-%m-%d %H:%M").to_string(), "2024-03-12 10:15");
    }

    #[test]
    fn suggestion_captured_when_present() {
        let scored = score_csv(
            "Presentiamoci,Come valuti il servizio,Hai suggerimenti per noi?\nMario,5,più occhiali da sole\n",
            true,
        );
        assert_eq!(
            scored[0].suggestion.as_deref(),
            Some("più occhiali da sole"),
        );
    }
}
