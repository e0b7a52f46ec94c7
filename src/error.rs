//! Error types for crowd-index

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CrowdError {
    #[error("Report not found: {0}")]
    NotFound(String),

    #[error("Query syntax error at {position}: {message}")]
    QuerySyntax { position: usize, message: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict on report {report_id} after {attempts} attempts")]
    Conflict { report_id: String, attempts: u32 },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CrowdError {
    pub(crate) fn syntax(position: usize, message: impl Into<String>) -> Self {
        Self::QuerySyntax {
            position,
            message: message.into(),
        }
    }

    /// Whether the caller may retry the same request unchanged
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, CrowdError>;
