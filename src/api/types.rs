//! API request and response types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::agent::{Phase, Turn};
use crate::tools::ToolDescriptor;

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// Model the gateway talks to
    pub model: String,
}

/// One entry of the tool catalog.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    /// JSON schema of the parameters, as advertised to the model
    pub parameters: Value,
}

impl From<&ToolDescriptor> for ToolInfo {
    fn from(descriptor: &ToolDescriptor) -> Self {
        Self {
            name: descriptor.name.clone(),
            description: descriptor.description.clone(),
            parameters: descriptor.parameters_schema(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateSessionResponse {
    pub id: Uuid,
}

/// A user message for a session.
#[derive(Debug, Clone, Deserialize)]
pub struct AskRequest {
    pub text: String,
}

/// Conversation log of a session, plus what the session is doing now.
#[derive(Debug, Clone, Serialize)]
pub struct TurnsResponse {
    pub phase: Phase,
    pub turns: Vec<Turn>,
}
