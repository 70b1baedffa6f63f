//! Errors surfaced by `ask`, and the result type handed back to the UI.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agent::ConversationError;
use crate::llm::GatewayError;
use crate::tools::ToolError;

/// Category of a failure, as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    MissingCredential,
    BackendError,
    UnknownTool,
    InvalidArguments,
    ToolExecutionError,
    RoundLimitExceeded,
    Internal,
}

impl From<&ToolError> for ErrorKind {
    fn from(err: &ToolError) -> Self {
        match err {
            ToolError::UnknownTool(_) => ErrorKind::UnknownTool,
            ToolError::InvalidArguments { .. } => ErrorKind::InvalidArguments,
            ToolError::Execution { .. } => ErrorKind::ToolExecutionError,
        }
    }
}

/// Why an `ask` call ended without a final answer.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Message must not be empty")]
    InvalidInput,

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("Model kept requesting tools after {limit} tool rounds")]
    RoundLimitExceeded { limit: usize },

    #[error("Conversation log rejected an update: {0}")]
    Conversation(#[from] ConversationError),
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestratorError::InvalidInput => ErrorKind::InvalidInput,
            OrchestratorError::Gateway(GatewayError::MissingCredential(_)) => {
                ErrorKind::MissingCredential
            }
            OrchestratorError::Gateway(_) => ErrorKind::BackendError,
            OrchestratorError::RoundLimitExceeded { .. } => ErrorKind::RoundLimitExceeded,
            OrchestratorError::Conversation(_) => ErrorKind::Internal,
        }
    }
}

/// Terminal value of one `ask` call. Never carries unresolved tool calls.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OrchestrationResult {
    FinalAnswer { text: String },
    Failure { error_kind: ErrorKind, detail: String },
}

impl OrchestrationResult {
    pub fn is_final_answer(&self) -> bool {
        matches!(self, OrchestrationResult::FinalAnswer { .. })
    }
}

impl From<Result<String, OrchestratorError>> for OrchestrationResult {
    fn from(result: Result<String, OrchestratorError>) -> Self {
        match result {
            Ok(text) => OrchestrationResult::FinalAnswer { text },
            Err(e) => OrchestrationResult::Failure {
                error_kind: e.kind(),
                detail: e.to_string(),
            },
        }
    }
}
