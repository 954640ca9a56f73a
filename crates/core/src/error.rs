//! Error taxonomy for notebook conversion.
//!
//! Correctness-critical failures (`Format`, `Imputation`, `Validation`) abort
//! the single notebook they occur in; the batch pipeline reports them and
//! moves on to sibling notebooks. Service failures in non-critical paths are
//! degraded locally and never reach this enum.

use std::path::PathBuf;

use crate::ServiceError;

#[derive(Debug, thiserror::Error)]
pub enum NotebookError {
    /// A cell kind the dialogue format does not define.
    #[error("unrecognized cell kind '{kind}'")]
    Format { kind: String },

    /// One or more roles stayed unresolved after the imputation fallback.
    #[error("failed to resolve {} message role(s) after imputation", errors.len())]
    Imputation { errors: Vec<ServiceError> },

    /// The message sequence cannot form a valid turn structure.
    #[error("turn validation failed: {reason}")]
    Validation { reason: String },

    /// Completion-service failure at a correctness-critical call site.
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// No notebook files to process.
    #[error("no notebook files found under {}", root.display())]
    EmptyBatch { root: PathBuf },

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed notebook document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed manifest: {0}")]
    Manifest(#[from] csv::Error),
}
