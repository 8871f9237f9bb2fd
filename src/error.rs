//! Error types for the report pipeline.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that abort a report build. Data anomalies (malformed roll
/// numbers, marks without session metadata) are absorbed with fallback
/// behavior instead of surfacing here.
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] sqlx::Error),

    #[error("invalid report scope: {0}")]
    InvalidScope(String),
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("CSV encoding failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("PDF rendering failed: {0}")]
    Pdf(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}
