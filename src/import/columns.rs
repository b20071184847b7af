//! Column detection over an arbitrary survey export.
//!
//! Survey platforms rename and reorder columns between campaigns, so the
//! importer inspects headers and every value to locate the respondent name,
//! email, the designated questions, the numeric (Likert) columns with their
//! observed scales, and the submission timestamp.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use indexmap::IndexMap;
use regex::Regex;
use tracing::debug;

use super::rows::SurveyRecord;

/// Header marker for the combined respondent-name question
/// ("Presentiamoci! Come ti chiami?").
const NAME_MARKER: &str = "presentiamoci";

/// The product-satisfaction question starts with this phrase.
const PRODUCT_PREFIX: &str = "il prodotto acquistato";

/// The overall-experience question contains this phrase.
const OVERALL_MARKER: &str = "esperienza complessiva";

/// The word-of-mouth question contains this phrase.
const RECOMMEND_MARKER: &str = "consiglieresti";

/// The free-text suggestion question contains this prefix
/// (matches "suggerimento" and "suggerimenti").
const SUGGESTION_MARKER: &str = "suggeriment";

/// Headers matching this pattern are submission-date candidates.
const DATE_KEYWORDS: &str = r"(?i)(data|date|inviato|compilazione|submitted|timestamp)";

/// Minimum ratio of values that must parse as dates for a candidate header
/// to be chosen as the submission-date column.
const DATE_PARSE_THRESHOLD: f64 = 0.70;

/// Read-only description of one export's shape, built once per import.
#[derive(Debug, Clone)]
pub struct ColumnMap {
    /// Header holding the respondent's combined name. Always present
    /// (falls back to the first header).
    pub name_header: String,
    pub email_header: Option<String>,
    pub product_header: Option<String>,
    pub overall_header: Option<String>,
    pub recommend_header: Option<String>,
    pub suggestion_header: Option<String>,
    pub submitted_header: Option<String>,
    /// Numeric (Likert) headers with their observed scale: the maximum value
    /// seen in the column, not a hard-coded 5.
    pub numeric: IndexMap<String, u8>,
}

/// Inspect headers and all records to build the [`ColumnMap`].
///
/// Detection scans every record: a column is only numeric if *all* of its
/// non-empty values are single digits 1-5, and its scale is the maximum
/// observed value. Columns with no non-empty values at all are skipped
/// entirely (neither numeric nor date candidates).
pub fn detect_columns(headers: &[String], records: &[SurveyRecord]) -> ColumnMap {
    let lower: Vec<String> = headers.iter().map(|h| h.to_lowercase()).collect();

    let find_containing = |marker: &str| -> Option<String> {
        headers
            .iter()
            .zip(&lower)
            .find(|(_, l)| l.contains(marker))
            .map(|(h, _)| h.clone())
    };

    let name_header = find_containing(NAME_MARKER)
        .or_else(|| headers.first().cloned())
        .unwrap_or_default();
    let email_header = find_containing("email");
    let product_header = headers
        .iter()
        .zip(&lower)
        .find(|(_, l)| l.starts_with(PRODUCT_PREFIX))
        .map(|(h, _)| h.clone());
    let overall_header = find_containing(OVERALL_MARKER);
    let recommend_header = find_containing(RECOMMEND_MARKER);
    let suggestion_header = find_containing(SUGGESTION_MARKER);

    // Numeric columns: every non-empty value is a single digit 1-5.
    let mut numeric: IndexMap<String, u8> = IndexMap::new();
    let mut has_values: Vec<bool> = Vec::with_capacity(headers.len());
    for header in headers {
        let values: Vec<&str> = records
            .iter()
            .filter_map(|r| r.get(header))
            .map(|v| v.as_str())
            .filter(|v| !v.is_empty())
            .collect();
        has_values.push(!values.is_empty());
        if values.is_empty() {
            continue;
        }
        let mut max_seen = 0u8;
        let all_likert = values.iter().all(|v| match v.as_bytes() {
            [d @ b'1'..=b'5'] => {
                max_seen = max_seen.max(d - b'0');
                true
            }
            _ => false,
        });
        if all_likert {
            numeric.insert(header.clone(), max_seen);
        }
    }

    // Submission-date header: first non-numeric candidate whose header text
    // matches a date keyword and whose values parse at >= 70%.
    let date_keywords = Regex::new(DATE_KEYWORDS).expect("static regex");
    let mut submitted_header = None;
    for (i, header) in headers.iter().enumerate() {
        if !has_values[i] || numeric.contains_key(header) {
            continue;
        }
        if !date_keywords.is_match(header) {
            continue;
        }
        let values: Vec<&String> = records
            .iter()
            .filter_map(|r| r.get(header))
            .filter(|v| !v.is_empty())
            .collect();
        let parsed = values.iter().filter(|v| parse_date(v).is_some()).count();
        let ratio = parsed as f64 / values.len() as f64;
        if ratio >= DATE_PARSE_THRESHOLD {
            submitted_header = Some(header.clone());
            break;
        }
        debug!(header, ratio, "date candidate below parse threshold");
    }

    ColumnMap {
        name_header,
        email_header,
        product_header,
        overall_header,
        recommend_header,
        suggestion_header,
        submitted_header,
        numeric,
    }
}

/// Parse a submission timestamp.
///
/// Tries ISO forms first, then an explicit day-first `D/M/Y[ H:M[:S]]`
/// pattern that also accepts `-` as a separator. Two-digit years are offset
/// to 2000+year. Returns `None` when nothing fits.
pub fn parse_date(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d.and_time(NaiveTime::MIN));
    }

    parse_day_first(s)
}

/// Day-first parser: `D/M/Y` or `D-M-Y`, optionally followed by `H:M[:S]`.
fn parse_day_first(s: &str) -> Option<NaiveDateTime> {
    let (date_part, time_part) = match s.split_once(' ') {
        Some((d, t)) => (d, Some(t.trim())),
        None => (s, None),
    };

    let sep = if date_part.contains('/') {
        '/'
    } else if date_part.contains('-') {
        '-'
    } else {
        return None;
    };
    let fields: Vec<&str> = date_part.split(sep).collect();
    if fields.len() != 3 {
        return None;
    }
    let day: u32 = fields[0].parse().ok()?;
    let month: u32 = fields[1].parse().ok()?;
    let mut year: i32 = fields[2].parse().ok()?;
    if fields[2].len() <= 2 {
        year += 2000;
    }
    let date = NaiveDate::from_ymd_opt(year, month, day)?;

    let time = match time_part {
        None => NaiveTime::MIN,
        Some(t) => {
            let parts: Vec<&str> = t.split(':').collect();
            if parts.len() < 2 || parts.len() > 3 {
                return None;
            }
            let hour: u32 = parts[0].parse().ok()?;
            let minute: u32 = parts[1].parse().ok()?;
            let second: u32 = if parts.len() == 3 {
                parts[2].parse().ok()?
            } else {
                0
            };
            NaiveTime::from_hms_opt(hour, minute, second)?
        }
    };

    Some(date.and_time(time))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::rows::parse_survey_csv;

    fn detect(csv: &str) -> ColumnMap {
        let parsed = parse_survey_csv(csv).unwrap();
        detect_columns(&parsed.headers, &parsed.records)
    }

    #[test]
    fn name_header_by_marker() {
        let cols = detect("Email,Presentiamoci! Come ti chiami?\nm@x.com,Mario\n");
        assert_eq!(cols.name_header, "Presentiamoci! Come ti chiami?");
    }

    #[test]
    fn name_header_falls_back_to_first() {
        let cols = detect("Nome e cognome,Email\nMario,m@x.com\n");
        assert_eq!(cols.name_header, "Nome e cognome");
    }

    #[test]
    fn email_header_detected() {
        let cols = detect("Presentiamoci,Indirizzo Email\nMario,m@x.com\n");
        assert_eq!(cols.email_header.as_deref(), Some("Indirizzo Email"));
    }

    #[test]
    fn product_header_requires_prefix() {
        let cols = detect(
            "Presentiamoci,Il prodotto acquistato ti soddisfa?,Parliamo del prodotto\n\
             Mario,Si,ok\n",
        );
        assert_eq!(
            cols.product_header.as_deref(),
            Some("Il prodotto acquistato ti soddisfa?"),
        );
    }

    #[test]
    fn overall_and_recommend_headers() {
        let cols = detect(
            "Presentiamoci,Come giudichi la tua esperienza complessiva?,Ci consiglieresti a un amico?\n\
             Mario,4,3\n",
        );
        assert!(cols.overall_header.is_some());
        assert!(cols.recommend_header.is_some());
    }

    #[test]
    fn numeric_scale_is_max_observed() {
        let cols = detect("Presentiamoci,Voto\nMario,2\nLuigi,3\nAnna,1\n");
        assert_eq!(cols.numeric.get("Voto"), Some(&3));
    }

    #[test]
    fn numeric_five_point_scale() {
        let cols = detect("Presentiamoci,Voto\nMario,5\nLuigi,1\n");
        assert_eq!(cols.numeric.get("Voto"), Some(&5));
    }

    #[test]
    fn non_numeric_value_excludes_column() {
        let cols = detect("Presentiamoci,Voto\nMario,3\nLuigi,buono\n");
        assert!(cols.numeric.is_empty());
    }

    #[test]
    fn six_is_not_likert() {
        let cols = detect("Presentiamoci,Voto\nMario,6\n");
        assert!(cols.numeric.is_empty());
    }

    #[test]
    fn empty_column_skipped_entirely() {
        let cols = detect("Presentiamoci,Data di nascita\nMario,\n");
        assert!(cols.numeric.is_empty());
        assert!(cols.submitted_header.is_none());
    }

    #[test]
    fn empty_cells_ignored_for_scale() {
        let cols = detect("Presentiamoci,Voto\nMario,\nLuigi,4\n");
        assert_eq!(cols.numeric.get("Voto"), Some(&4));
    }

    #[test]
    fn submitted_header_needs_seventy_percent() {
        // First candidate: 1 of 3 values parse -> rejected.
        // Second candidate: 3 of 3 -> chosen.
        let cols = detect(
            "Presentiamoci,Data contatto,Data invio\n\
             Mario,12/01/2024,2024-01-12\n\
             Luigi,boh,13/1/24 09:30\n\
             Anna,x,14-01-2024\n",
        );
        assert_eq!(cols.submitted_header.as_deref(), Some("Data invio"));
    }

    #[test]
    fn numeric_header_never_a_date_candidate() {
        let cols = detect("Presentiamoci,Data di valutazione\nMario,4\n");
        assert_eq!(cols.numeric.get("Data di valutazione"), Some(&4));
        assert!(cols.submitted_header.is_none());
    }

    #[test]
    fn parse_iso_datetime() {
        assert_eq!(
            parse_date("2024-03-05 14:30:00"),
            Some(
                NaiveDate::from_ymd_opt(2024, 3, 5)
                    .unwrap()
                    .and_hms_opt(14, 30, 0)
                    .unwrap()
            ),
        );
    }

    #[test]
    fn parse_day_first_slash() {
        assert_eq!(
            parse_date("5/3/2024"),
            Some(NaiveDate::from_ymd_opt(2024, 3, 5).unwrap().and_time(NaiveTime::MIN)),
        );
    }

    #[test]
    fn parse_day_first_with_time() {
        assert_eq!(
            parse_date("05/03/2024 14:30:15"),
            Some(
                NaiveDate::from_ymd_opt(2024, 3, 5)
                    .unwrap()
                    .and_hms_opt(14, 30, 15)
                    .unwrap()
            ),
        );
    }

    #[test]
    fn parse_two_digit_year() {
        assert_eq!(
            parse_date("5-3-24"),
            Some(NaiveDate::from_ymd_opt(2024, 3, 5).unwrap().and_time(NaiveTime::MIN)),
        );
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(parse_date("boh"), None);
        assert_eq!(parse_date("32/13/2024"), None);
        assert_eq!(parse_date(""), None);
    }
}
