//! The survey import pipeline: CSV parsing, column detection, response
//! scoring, identity matching and duplicate merging, driven by [`run`].

pub mod clients;
pub mod columns;
pub mod matching;
pub mod merge;
pub mod rows;
pub mod run;
pub mod scoring;
pub mod session;
pub mod text;
