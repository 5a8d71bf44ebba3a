use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EdfError {
    #[error("Truncated input while reading {field}: needed {needed} bytes, {available} available")]
    TruncatedInput {
        field: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("Malformed field {field}: {value:?}")]
    MalformedField {
        field: &'static str,
        value: String,
    },

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Failed to list objects in {folder}: {reason}")]
    StorageList { folder: String, reason: String },

    #[error("Failed to fetch object {key}: {reason}")]
    StorageFetch { key: String, reason: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EdfError {
    pub(crate) fn malformed(field: &'static str, value: impl Into<String>) -> Self {
        EdfError::MalformedField {
            field,
            value: value.into(),
        }
    }

    /// Decoder failures are per-object; storage failures are worth a retry.
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            EdfError::TruncatedInput { .. } | EdfError::MalformedField { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, EdfError>;
