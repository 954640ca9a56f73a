//! Conversation normalization: notebook cells into role-labeled messages and
//! strictly alternating turns.

use std::collections::BTreeMap;

use serde::{Serialize, Serializer};

use crate::error::NotebookError;
use crate::helpers::{clean_text, fenced_block, strip_header_markers};
use crate::matcher::closest_match;
use crate::metadata::extract_metadata;
use crate::notebook::{Cell, CellKind, Notebook};
use crate::{
    CompletionRequest, CompletionService, ServiceError, CODE_HEADERS, HEAD_RESERVED_CELLS,
    LANGUAGE_TAG_MAX_TOKENS, LOOSE_MATCH_SCORE, MARKDOWN_HEADERS, MIN_HEADER_SCORE,
    ROLE_CONTEXT_AFTER, ROLE_CONTEXT_BEFORE, ROLE_REPLY_MAX_TOKENS,
};

const ROLE_SYSTEM_INSTRUCTION: &str = "Your task is to accurately predict whether the missing \
role is a User or an Assistant. You are only allowed to reply with a single word: 'User' or \
'Assistant'.";

const LANGUAGE_SYSTEM_INSTRUCTION: &str = "Identify the language of the given code block. Reply \
with only the language tag, compatible with markdown syntax highlighting for triple backtick \
code blocks.";

/// Speaker identity of a message. `Unresolved` only exists between extraction
/// and imputation; it never survives a successful conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Unresolved,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Unresolved => "",
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }

    /// Best-effort normalization of a free-form role label.
    pub fn from_label(label: &str) -> Option<Role> {
        match closest_match(label, &["User", "Assistant"], LOOSE_MATCH_SCORE) {
            (Some("User"), _) => Some(Role::User),
            (Some("Assistant"), _) => Some(Role::Assistant),
            _ => None,
        }
    }
}

impl Serialize for Role {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

/// A single message in the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub kind: CellKind,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>, kind: CellKind) -> Self {
        Self {
            role,
            content: content.into(),
            kind,
        }
    }
}

/// Speaker identity in the external turn domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TurnRole {
    Human,
    #[serde(rename = "LLM")]
    Llm,
}

/// One step inside a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Step {
    pub kind: CellKind,
    pub content: String,
}

/// One contiguous run of same-role messages. Consecutive turns never share a
/// role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Turn {
    pub role: TurnRole,
    pub steps: Vec<Step>,
}

/// The externally visible conversion artifact, produced exactly once per
/// notebook.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationRecord {
    pub metadata: BTreeMap<String, String>,
    pub messages: Vec<Message>,
    pub turns: Vec<Vec<Turn>>,
}

/// Turn a notebook's cells into an ordered list of raw message records.
///
/// The two reserved head cells are dropped, as is the run of trailing blank
/// cells. A cell whose first line scores above the header threshold gets the
/// matched role and loses its header line; otherwise the role stays
/// unresolved and the content is the whole raw cell text.
pub fn extract_messages(cells: &[Cell]) -> Result<Vec<Message>, NotebookError> {
    let body: &[Cell] = if cells.len() > HEAD_RESERVED_CELLS {
        &cells[HEAD_RESERVED_CELLS..]
    } else {
        &[]
    };
    let cut_tail = count_trailing_blank(cells);
    let body = &body[..body.len().saturating_sub(cut_tail)];

    let mut messages = Vec::with_capacity(body.len());
    for cell in body {
        let templates: &[&str] = match cell.kind {
            CellKind::Markdown => &MARKDOWN_HEADERS,
            CellKind::Code => &CODE_HEADERS,
            other => {
                return Err(NotebookError::Format {
                    kind: other.to_string(),
                })
            }
        };

        let source = clean_text(&cell.source);
        let mut lines = source.split('\n');
        let first_line = lines.next().unwrap_or_default();
        let message = match closest_match(first_line, templates, LOOSE_MATCH_SCORE) {
            (Some(header), score) if score > MIN_HEADER_SCORE => {
                let label = strip_header_markers(header);
                let content = lines.collect::<Vec<_>>().join("\n");
                Message {
                    role: Role::from_label(&label).unwrap_or(Role::Unresolved),
                    content: content.trim_matches('\n').to_string(),
                    kind: cell.kind,
                }
            }
            _ => Message {
                role: Role::Unresolved,
                content: source.clone(),
                kind: cell.kind,
            },
        };
        messages.push(message);
    }
    Ok(messages)
}

/// Count cells from the end whose trimmed text is empty.
fn count_trailing_blank(cells: &[Cell]) -> usize {
    cells
        .iter()
        .rev()
        .take_while(|cell| cell.source.trim().is_empty())
        .count()
}

/// Merge consecutive messages sharing a role into one message per maximal
/// run, contents joined with a blank line. Never increases the message count
/// and never reorders roles.
pub fn merge_same_role_runs(messages: Vec<Message>) -> Vec<Message> {
    let mut merged: Vec<Message> = Vec::with_capacity(messages.len());
    for mut message in messages {
        if let Some(last) = merged.last_mut() {
            if last.role == message.role {
                let addition = message.content.trim();
                if !addition.is_empty() {
                    if !last.content.is_empty() {
                        last.content.push_str("\n\n");
                    }
                    last.content.push_str(addition);
                }
                continue;
            }
        }
        message.content = message.content.trim().to_string();
        merged.push(message);
    }
    merged
}

/// Group the message sequence into turns: one turn per maximal same-role run,
/// mapped into the external turn domain.
///
/// Fails if the sequence is empty or still contains an unresolved role.
pub fn split_into_turns(messages: &[Message]) -> Result<Vec<Turn>, NotebookError> {
    let Some(first) = messages.first() else {
        return Err(NotebookError::Validation {
            reason: "no messages were provided to the turn splitter".to_string(),
        });
    };

    let mut turns = Vec::new();
    let mut current_role = first.role;
    let mut current_steps = Vec::new();

    for message in messages {
        if message.role != current_role {
            turns.push(close_turn(current_role, std::mem::take(&mut current_steps))?);
            current_role = message.role;
        }
        current_steps.push(Step {
            kind: message.kind,
            content: message.content.clone(),
        });
    }
    if !current_steps.is_empty() {
        turns.push(close_turn(current_role, current_steps)?);
    }
    Ok(turns)
}

fn close_turn(role: Role, steps: Vec<Step>) -> Result<Turn, NotebookError> {
    let role = match role {
        Role::User => TurnRole::Human,
        Role::Assistant => TurnRole::Llm,
        Role::Unresolved => {
            return Err(NotebookError::Validation {
                reason: "contains unrecognized header".to_string(),
            })
        }
    };
    Ok(Turn { role, steps })
}

/// Group turns into consecutive non-overlapping pairs; a trailing unpaired
/// turn forms a group of one. This paired grouping is the training-turn
/// structure consumed downstream.
pub fn group_turns(turns: Vec<Turn>) -> Vec<Vec<Turn>> {
    turns.chunks(2).map(|pair| pair.to_vec()).collect()
}

/// Converts one notebook into a normalized conversation record.
///
/// The completion service is injected at construction; test code substitutes
/// canned replies. A converter owns the processing of one notebook at a time
/// and shares no state across notebooks.
pub struct NotebookConverter<S>
where
    S: CompletionService,
{
    service: S,
}

impl<S> NotebookConverter<S>
where
    S: CompletionService,
{
    pub fn new(service: S) -> Self {
        Self { service }
    }

    /// Full conversion: extract messages, resolve roles, normalize content,
    /// segment turns, with head-cell metadata extracted alongside.
    pub fn convert(&self, notebook: &Notebook) -> Result<ConversationRecord, NotebookError> {
        let mut messages = extract_messages(&notebook.cells)?;
        let metadata = match notebook.cells.first() {
            Some(head) => extract_metadata(&head.source, &self.service),
            None => BTreeMap::new(),
        };

        let errors = self.impute_roles(&mut messages);
        if !errors.is_empty() {
            return Err(NotebookError::Imputation { errors });
        }

        self.tag_code_blocks(&mut messages);
        let messages = merge_same_role_runs(messages);

        let turns = group_turns(split_into_turns(&messages)?);

        Ok(ConversationRecord {
            metadata,
            messages,
            turns,
        })
    }

    /// Resolve messages whose role could not be determined locally by asking
    /// the completion service, handing it a window of surrounding messages.
    ///
    /// Failures are collected rather than raised so the remaining unresolved
    /// messages still get their attempt; the caller escalates a non-empty
    /// error list to a notebook-level failure.
    pub fn impute_roles(&self, messages: &mut [Message]) -> Vec<ServiceError> {
        let mut errors = Vec::new();
        for i in 0..messages.len() {
            if messages[i].role != Role::Unresolved {
                continue;
            }
            let start = i.saturating_sub(ROLE_CONTEXT_BEFORE);
            let end = (i + ROLE_CONTEXT_AFTER + 1).min(messages.len());
            match self.predict_role(&messages[start..end]) {
                Ok(role) => messages[i].role = role,
                Err(error) => {
                    log::warn!("role imputation failed: {}", error);
                    errors.push(error);
                }
            }
        }
        errors
    }

    fn predict_role(&self, window: &[Message]) -> Result<Role, ServiceError> {
        let rendered =
            serde_json::to_string_pretty(window).map_err(|e| ServiceError(e.to_string()))?;
        let request = CompletionRequest {
            system_instruction: ROLE_SYSTEM_INSTRUCTION.to_string(),
            context: format!(
                "Here's a part of the conversation including a missing role:\n\n{}",
                rendered
            ),
            max_tokens: ROLE_REPLY_MAX_TOKENS,
            deterministic: true,
        };
        let reply = self.service.complete(&request)?;
        match reply.as_str() {
            "User" => Ok(Role::User),
            "Assistant" => Ok(Role::Assistant),
            other => Err(ServiceError(format!("invalid role reply: {:?}", other))),
        }
    }

    /// Rewrite code messages into syntax-tagged fenced markdown.
    ///
    /// A failed language lookup degrades to an untagged fence; it never
    /// aborts the notebook.
    pub fn tag_code_blocks(&self, messages: &mut [Message]) {
        for message in messages.iter_mut() {
            if message.kind != CellKind::Code {
                continue;
            }
            let language = match self.identify_language(&message.content) {
                Ok(tag) => Some(tag),
                Err(error) => {
                    log::warn!("language identification failed: {}", error);
                    None
                }
            };
            message.content = fenced_block(language.as_deref(), message.content.trim());
            message.kind = CellKind::Markdown;
        }
    }

    fn identify_language(&self, code: &str) -> Result<String, ServiceError> {
        let request = CompletionRequest {
            system_instruction: LANGUAGE_SYSTEM_INSTRUCTION.to_string(),
            context: format!("Contents:\n{}", code.trim()),
            max_tokens: LANGUAGE_TAG_MAX_TOKENS,
            deterministic: true,
        };
        let reply = self.service.complete(&request)?;
        let tag = reply.trim();
        if tag.is_empty() || tag.contains(char::is_whitespace) {
            return Err(ServiceError(format!("invalid language tag: {:?}", reply)));
        }
        Ok(tag.to_string())
    }
}
