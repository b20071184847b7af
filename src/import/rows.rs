//! CSV parsing for survey exports.
//!
//! Survey exports are messy human data: ragged rows, stray blank lines,
//! quoted cells with embedded commas and doubled quotes. Parsing is
//! best-effort and never fatal per row; only a file with no headers or no
//! data rows is an error, and that is the caller's call to make.

use anyhow::{Context, Result};
use csv::ReaderBuilder;
use indexmap::IndexMap;

/// One parsed CSV row: original header -> trimmed cell value.
///
/// Keyed in header order so the raw payload persists in the same column
/// order the export had.
pub type SurveyRecord = IndexMap<String, String>;

/// Parsed survey CSV: trimmed headers plus one record per data row.
#[derive(Debug)]
pub struct ParsedCsv {
    pub headers: Vec<String>,
    pub records: Vec<SurveyRecord>,
}

/// Parse raw CSV text into header/record pairs.
///
/// The first row is the header row. Every data row is zipped positionally
/// against the headers: missing trailing cells become empty strings, extra
/// cells are dropped, every cell is trimmed.
///
/// A row whose every field is empty is silently dropped. This handles
/// trailing blank lines but also drops a genuine row where the respondent
/// left every field blank; the two are indistinguishable in the file.
pub fn parse_survey_csv(text: &str) -> Result<ParsedCsv> {
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .context("Failed to read CSV header row")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.context("Failed to read CSV row")?;

        let mut record: SurveyRecord = IndexMap::with_capacity(headers.len());
        for (i, header) in headers.iter().enumerate() {
            let cell = row.get(i).unwrap_or("").trim();
            record.insert(header.clone(), cell.to_string());
        }

        if record.values().all(|v| v.is_empty()) {
            continue;
        }
        records.push(record);
    }

    Ok(ParsedCsv { headers, records })
}
