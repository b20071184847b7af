//! Survey import and customer deduplication engine for the ottica CRM.
//!
//! The library half of `ottica-import`: parses a survey CSV export, scores
//! each response onto a common 0-100 scale, resolves each respondent against
//! the customer roster, and merges orthographic duplicate customers when it
//! is safe to do so.

pub mod cli;
pub mod config;
pub mod import;
pub mod logging;
pub mod store;
