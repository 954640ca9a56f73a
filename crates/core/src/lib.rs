//! Core normalization logic for synthetic dialogue notebooks.
//!
//! This crate converts notebook documents (ordered markdown/code cells that
//! encode a human/assistant dialogue) into role-labeled conversation records
//! suitable for training language models.

use serde::Serialize;

/// A single request to the external completion service.
///
/// Every call site in this crate asks for deterministic sampling so that
/// repeated runs over the same notebook produce identical records.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub system_instruction: String,
    pub context: String,
    pub max_tokens: usize,
    pub deterministic: bool,
}

/// Failure of a single completion-service call.
#[derive(Debug, Clone, thiserror::Error)]
#[error("completion service failure: {0}")]
pub struct ServiceError(pub String);

/// Trait for the external completion service.
///
/// Implementors provide text completion against a system instruction.
/// Production code wires an HTTP client; tests substitute canned replies.
pub trait CompletionService {
    /// Run one completion and return the raw reply text.
    fn complete(&self, request: &CompletionRequest) -> Result<String, ServiceError>;
}

// Blanket implementation for references to CompletionServices
impl<S: CompletionService + ?Sized> CompletionService for &S {
    fn complete(&self, request: &CompletionRequest) -> Result<String, ServiceError> {
        (*self).complete(request)
    }
}

mod conversation;
mod error;
mod helpers;
mod manifest;
mod matcher;
mod metadata;
mod notebook;
pub mod pipeline;

pub use conversation::{
    extract_messages, group_turns, merge_same_role_runs, split_into_turns, ConversationRecord,
    Message, NotebookConverter, Role, Step, Turn, TurnRole,
};
pub use error::NotebookError;
pub use helpers::{clean_text, fenced_block, flatten_json, strip_header_markers};
pub use manifest::{Manifest, ManifestRow};
pub use matcher::{closest_match, similarity};
pub use metadata::extract_metadata;
pub use notebook::{Cell, CellKind, Notebook};
pub use pipeline::{
    discover_notebook_files, process_all_notebooks, process_notebook, write_jsonl_output,
    NotebookResult, PipelineConfig, PipelineResult,
};

/// Number of leading cells reserved for document metadata and the
/// conversation-start banner. They never carry message content.
pub const HEAD_RESERVED_CELLS: usize = 2;

/// Minimum similarity score for accepting a cell's first line as a role header.
pub const MIN_HEADER_SCORE: u8 = 50;

/// Looser score floor used for best-effort matching (role-name normalization).
pub const LOOSE_MATCH_SCORE: u8 = 25;

/// Role-header templates for markdown cells.
pub const MARKDOWN_HEADERS: [&str; 2] = ["**User**", "**Assistant**"];

/// Role-header templates for code cells.
pub const CODE_HEADERS: [&str; 2] = ["# User", "# Assistant"];

/// Context window around an unresolved message handed to the role imputer.
pub const ROLE_CONTEXT_BEFORE: usize = 2;
pub const ROLE_CONTEXT_AFTER: usize = 2;

/// Reply budget for role imputation (a single word).
pub const ROLE_REPLY_MAX_TOKENS: usize = 8;

/// Reply budget for code-language identification (a single tag).
pub const LANGUAGE_TAG_MAX_TOKENS: usize = 16;

/// Reply budget for the dynamic metadata fallback (a flat JSON object).
pub const METADATA_MAX_TOKENS: usize = 256;
