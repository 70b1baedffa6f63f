//! Conversation log: an ordered, append-only list of turns.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ErrorKind;
use crate::llm::ToolCallRequest;
use crate::tools::ToolError;

/// Author of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Model,
    Function,
}

/// What a model turn carries: a final text, or a batch of tool calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelContent {
    Text { text: String },
    ToolCalls { calls: Vec<ToolCallRequest> },
}

/// One entry in the conversation log.
///
/// The variant fixes the shape of the content: a user turn never carries
/// tool calls, and a function turn always answers one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Turn {
    User {
        text: String,
    },
    Model {
        content: ModelContent,
    },
    Function {
        call_id: String,
        name: String,
        result: String,
        /// Set when the call failed; `result` then holds the error text.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorKind>,
    },
}

impl Turn {
    pub fn role(&self) -> Role {
        match self {
            Turn::User { .. } => Role::User,
            Turn::Model { .. } => Role::Model,
            Turn::Function { .. } => Role::Function,
        }
    }
}

/// Text recorded in a function turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionOutput {
    pub text: String,
    pub error: Option<ErrorKind>,
}

impl From<Result<String, ToolError>> for FunctionOutput {
    fn from(result: Result<String, ToolError>) -> Self {
        match result {
            Ok(text) => Self { text, error: None },
            Err(e) => Self {
                text: format!("Error: {}", e),
                error: Some(ErrorKind::from(&e)),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversationError {
    #[error("{0} tool call(s) are still waiting for results")]
    UnresolvedToolCalls(usize),

    #[error("No pending tool call with id '{0}'")]
    UnknownCallId(String),

    #[error("Tool call '{call_id}' was for {expected}, not {actual}")]
    ToolNameMismatch {
        call_id: String,
        expected: String,
        actual: String,
    },

    #[error("Duplicate tool call id '{0}' in one model turn")]
    DuplicateCallId(String),
}

/// The turns of one session, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    turns: Vec<Turn>,
    /// Tool calls from the latest model turn that have no function turn yet.
    pending: Vec<ToolCallRequest>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_user(&mut self, text: &str) -> Result<(), ConversationError> {
        self.ensure_resolved()?;
        self.turns.push(Turn::User {
            text: text.to_string(),
        });
        Ok(())
    }

    pub fn append_model_text(&mut self, text: &str) -> Result<(), ConversationError> {
        self.ensure_resolved()?;
        self.turns.push(Turn::Model {
            content: ModelContent::Text {
                text: text.to_string(),
            },
        });
        Ok(())
    }

    pub fn append_model_tool_calls(
        &mut self,
        calls: Vec<ToolCallRequest>,
    ) -> Result<(), ConversationError> {
        self.ensure_resolved()?;
        for (i, call) in calls.iter().enumerate() {
            if calls[..i].iter().any(|c| c.call_id == call.call_id) {
                return Err(ConversationError::DuplicateCallId(call.call_id.clone()));
            }
        }

        self.pending = calls.clone();
        self.turns.push(Turn::Model {
            content: ModelContent::ToolCalls { calls },
        });
        Ok(())
    }

    /// Record the result of a pending tool call from the latest model turn.
    pub fn append_function_result(
        &mut self,
        call_id: &str,
        tool_name: &str,
        output: FunctionOutput,
    ) -> Result<(), ConversationError> {
        let idx = self
            .pending
            .iter()
            .position(|c| c.call_id == call_id)
            .ok_or_else(|| ConversationError::UnknownCallId(call_id.to_string()))?;

        if self.pending[idx].function_name != tool_name {
            return Err(ConversationError::ToolNameMismatch {
                call_id: call_id.to_string(),
                expected: self.pending[idx].function_name.clone(),
                actual: tool_name.to_string(),
            });
        }

        self.pending.remove(idx);
        self.turns.push(Turn::Function {
            call_id: call_id.to_string(),
            name: tool_name.to_string(),
            result: output.text,
            error: output.error,
        });
        Ok(())
    }

    /// Apply several appends as one unit: all of them land, or none do.
    pub fn atomically<F>(&mut self, apply: F) -> Result<(), ConversationError>
    where
        F: FnOnce(&mut Self) -> Result<(), ConversationError>,
    {
        let len = self.turns.len();
        let pending = self.pending.clone();
        let result = apply(self);
        if result.is_err() {
            self.turns.truncate(len);
            self.pending = pending;
        }
        result
    }

    /// A copy of every turn, in insertion order.
    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.clone()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn pending_calls(&self) -> &[ToolCallRequest] {
        &self.pending
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    fn ensure_resolved(&self) -> Result<(), ConversationError> {
        if self.pending.is_empty() {
            Ok(())
        } else {
            Err(ConversationError::UnresolvedToolCalls(self.pending.len()))
        }
    }
}
