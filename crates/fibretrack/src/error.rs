use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FibretrackError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Processing error: {0}")]
    Process(#[from] ProcessError),

    #[error("Apply error: {0}")]
    Apply(#[from] ApplyError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

/// Errors from the text-acquisition tiers. These never escape the parse
/// orchestrator — parsing degrades to a best-effort result instead — but
/// the processors report them so callers using the processors directly
/// can tell what went wrong.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to process PDF: {0}")]
    PdfProcessing(String),

    #[error("OCR failed: {0}")]
    OcrFailed(String),

    #[error("Failed to read document '{path}': {source}")]
    ReadDocument {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the apply/upsert engine. Validation variants map to the
/// boundary's 400 responses, `DocumentNotFound` to 404 and
/// `IdentifierConflict` to 409.
#[derive(Error, Debug)]
pub enum ApplyError {
    #[error("Document {0} not found")]
    DocumentNotFound(i64),

    #[error("No parsed entries found to apply")]
    NoEntries,

    #[error("Index {index} out of range for {count} parsed entries")]
    IndexOutOfRange { index: usize, count: usize },

    #[error("Override list length {got} does not match entry count {expected}")]
    OverrideMismatch { expected: usize, got: usize },

    #[error("Work order with identifier '{0}' already exists")]
    IdentifierConflict(String),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

pub type Result<T> = std::result::Result<T, FibretrackError>;
