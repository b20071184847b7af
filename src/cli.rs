//! Command-line arguments for the import binary.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Output format for tracing logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TracingFormat {
    /// Human-readable output for terminals.
    Pretty,
    /// Structured JSON output for log aggregation.
    Json,
}

/// Import a survey CSV export and match respondents against the customer roster.
#[derive(Debug, Parser)]
#[command(name = "ottica-import", version)]
pub struct Args {
    /// Path to the survey CSV file (relative paths resolve against the
    /// current working directory).
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// Score and match every row but write nothing to the store.
    #[arg(long)]
    pub dry_run: bool,

    /// Mark responses as non-historical: bad scores become follow-up work.
    #[arg(long, conflicts_with = "historical")]
    pub live: bool,

    /// Mark responses as historical (the default); follow-ups are recorded
    /// as `ignored_old` instead of `pending`.
    #[arg(long)]
    pub historical: bool,

    /// Recency window in days, stored as batch metadata.
    #[arg(long)]
    pub recency_days: Option<u32>,

    /// Free-text note stored on the import batch.
    #[arg(long)]
    pub notes: Option<String>,

    /// Disable automatic merging of orthographic duplicate customers;
    /// duplicates are reported for manual review instead.
    #[arg(long)]
    pub no_auto_merge: bool,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = TracingFormat::Pretty)]
    pub tracing: TracingFormat,
}
