//! Model gateway: the request/response adapter to the LLM backend.
//!
//! A gateway turns the conversation so far plus the tool catalog into one
//! backend request, and the backend's reply into either a final text or a
//! list of tool calls. Gateways hold no conversation state.

mod gemini;
mod prompt;
#[cfg(test)]
pub(crate) mod scripted;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::agent::Turn;
use crate::tools::ToolDescriptor;

pub use gemini::GeminiGateway;
pub use prompt::build_system_prompt;

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Correlates the request with its function-turn result. Unique within a round.
    pub call_id: String,
    pub function_name: String,
    /// Arguments exactly as the model sent them.
    pub arguments: Value,
    /// Set when the backend sent no usable id and `call_id` was made up here.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub minted_locally: bool,
}

impl ToolCallRequest {
    pub fn new(call_id: impl Into<String>, function_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            call_id: call_id.into(),
            function_name: function_name.into(),
            arguments,
            minted_locally: false,
        }
    }
}

/// What the backend answered.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayResponse {
    Text(String),
    ToolCalls(Vec<ToolCallRequest>),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GatewayError {
    #[error("No API key found under '{0}'")]
    MissingCredential(String),

    #[error("{}", describe_backend(.status_code, .message))]
    Backend {
        status_code: Option<u16>,
        message: String,
    },

    #[error("Model request timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Invalid response from backend: {0}")]
    InvalidResponse(String),
}

fn describe_backend(status_code: &Option<u16>, message: &str) -> String {
    match status_code {
        Some(code) => format!("Backend error (HTTP {}): {}", code, message),
        None => format!("Backend error: {}", message),
    }
}

/// Stateless adapter to an LLM backend.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// Check that a request could be sent right now (e.g. credentials exist).
    fn ready(&self) -> Result<(), GatewayError> {
        Ok(())
    }

    /// Send the conversation and tool catalog; return the model's reply.
    async fn send(
        &self,
        turns: &[Turn],
        tools: &[ToolDescriptor],
    ) -> Result<GatewayResponse, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_error_display_includes_status() {
        let err = GatewayError::Backend {
            status_code: Some(429),
            message: "quota exceeded".to_string(),
        };
        assert_eq!(err.to_string(), "Backend error (HTTP 429): quota exceeded");

        let err = GatewayError::Backend {
            status_code: None,
            message: "connection refused".to_string(),
        };
        assert_eq!(err.to_string(), "Backend error: connection refused");
    }
}
