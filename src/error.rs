//! Error types for SPR analysis

use thiserror::Error;

/// Errors that can occur while running the analysis pipeline
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read delimited input: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid row at line {line}: {message}")]
    InvalidRow { line: u64, message: String },

    #[error("Unknown word position label: {0}")]
    UnknownPosition(String),

    #[error("Empty dataset: {0}")]
    EmptyDataset(String),

    #[error("Chart rendering error: {0}")]
    Plot(String),
}

impl From<toml::de::Error> for AnalysisError {
    fn from(e: toml::de::Error) -> Self {
        AnalysisError::Config(e.to_string())
    }
}
