//! Gemini `generateContent` gateway.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use super::prompt::build_system_prompt;
use super::{GatewayError, GatewayResponse, ModelGateway, ToolCallRequest};
use crate::agent::{ModelContent, Turn};
use crate::config::{Config, GenerationConfig, API_KEY_CREDENTIAL};
use crate::credentials::CredentialStore;
use crate::tools::ToolDescriptor;

/// Prefix of call ids minted locally when the backend sends none.
const LOCAL_CALL_PREFIX: &str = "local-";

/// Talks to the Gemini REST API.
pub struct GeminiGateway {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    generation: GenerationConfig,
    credentials: Arc<dyn CredentialStore>,
    timeout: Duration,
}

impl GeminiGateway {
    pub fn new(config: &Config, credentials: Arc<dyn CredentialStore>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("toolchat/", env!("CARGO_PKG_VERSION")))
            .timeout(config.model_timeout)
            .build()?;

        Ok(Self {
            client,
            endpoint: generate_content_url(config.base_url.as_str(), &config.model),
            model: config.model.clone(),
            generation: config.generation.clone(),
            credentials,
            timeout: config.model_timeout,
        })
    }

    fn api_key(&self) -> Result<String, GatewayError> {
        self.credentials
            .get(API_KEY_CREDENTIAL)
            .ok_or_else(|| GatewayError::MissingCredential(API_KEY_CREDENTIAL.to_string()))
    }

    fn transport_error(&self, e: reqwest::Error) -> GatewayError {
        if e.is_timeout() {
            GatewayError::Timeout(self.timeout)
        } else {
            GatewayError::Backend {
                status_code: e.status().map(|s| s.as_u16()),
                message: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl ModelGateway for GeminiGateway {
    fn ready(&self) -> Result<(), GatewayError> {
        self.api_key().map(|_| ())
    }

    async fn send(
        &self,
        turns: &[Turn],
        tools: &[ToolDescriptor],
    ) -> Result<GatewayResponse, GatewayError> {
        let api_key = self.api_key()?;

        let body = GenerateContentRequest {
            contents: to_contents(turns),
            tools: declarations(tools),
            generation_config: &self.generation,
            system_instruction: Some(Content {
                role: None,
                parts: vec![Part::text(build_system_prompt(tools))],
            }),
        };

        tracing::debug!(
            model = %self.model,
            turns = turns.len(),
            tools = tools.len(),
            "Sending generateContent request"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorEnvelope>(&text)
                .ok()
                .map(|envelope| envelope.error.message)
                .filter(|m| !m.is_empty())
                .unwrap_or(text);
            tracing::warn!(status = status.as_u16(), "Backend returned an error: {}", message);
            return Err(GatewayError::Backend {
                status_code: Some(status.as_u16()),
                message,
            });
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&text)
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        interpret(parsed)
    }
}

fn generate_content_url(base_url: &str, model: &str) -> String {
    format!(
        "{}/models/{}:generateContent",
        base_url.trim_end_matches('/'),
        model
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolDeclarations>,
    generation_config: &'a GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolDeclarations {
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct FunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

impl Content {
    fn text(role: &str, text: &str) -> Self {
        Self {
            role: Some(role.to_string()),
            parts: vec![Part::text(text.to_string())],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_response: Option<FunctionResponse>,
}

impl Part {
    fn text(text: String) -> Self {
        Self {
            text: Some(text),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FunctionCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FunctionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    name: String,
    response: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Translation
// ─────────────────────────────────────────────────────────────────────────────

fn declarations(tools: &[ToolDescriptor]) -> Vec<ToolDeclarations> {
    if tools.is_empty() {
        return Vec::new();
    }
    vec![ToolDeclarations {
        function_declarations: tools
            .iter()
            .map(|t| FunctionDeclaration {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.parameters_schema(),
            })
            .collect(),
    }]
}

/// Translate the log into Gemini `contents`.
///
/// Consecutive function turns share one `function` content, since Gemini
/// expects all responses to a batch of calls together. Ids made up locally
/// are left off the wire for both the call and its response.
fn to_contents(turns: &[Turn]) -> Vec<Content> {
    let mut contents: Vec<Content> = Vec::with_capacity(turns.len());
    let mut minted: HashSet<&str> = HashSet::new();

    for turn in turns {
        match turn {
            Turn::User { text } => contents.push(Content::text("user", text)),
            Turn::Model {
                content: ModelContent::Text { text },
            } => contents.push(Content::text("model", text)),
            Turn::Model {
                content: ModelContent::ToolCalls { calls },
            } => contents.push(Content {
                role: Some("model".to_string()),
                parts: calls
                    .iter()
                    .map(|call| Part {
                        function_call: Some(FunctionCall {
                            id: if call.minted_locally {
                                minted.insert(call.call_id.as_str());
                                None
                            } else {
                                Some(call.call_id.clone())
                            },
                            name: call.function_name.clone(),
                            args: if call.arguments.is_object() {
                                call.arguments.clone()
                            } else {
                                json!({})
                            },
                        }),
                        ..Default::default()
                    })
                    .collect(),
            }),
            Turn::Function {
                call_id,
                name,
                result,
                ..
            } => {
                let part = Part {
                    function_response: Some(FunctionResponse {
                        id: (!minted.contains(call_id.as_str())).then(|| call_id.clone()),
                        name: name.clone(),
                        response: json!({ "name": name, "content": result }),
                    }),
                    ..Default::default()
                };
                match contents.last_mut() {
                    Some(last) if last.role.as_deref() == Some("function") => last.parts.push(part),
                    _ => contents.push(Content {
                        role: Some("function".to_string()),
                        parts: vec![part],
                    }),
                }
            }
        }
    }

    contents
}

/// Read the first candidate: tool calls win over text.
fn interpret(response: GenerateContentResponse) -> Result<GatewayResponse, GatewayError> {
    let Some(candidate) = response.candidates.into_iter().next() else {
        let detail = match response.prompt_feedback.and_then(|f| f.block_reason) {
            Some(reason) => format!("no candidates (blocked: {})", reason),
            None => "no candidates".to_string(),
        };
        return Err(GatewayError::InvalidResponse(detail));
    };

    let parts = candidate.content.map(|c| c.parts).unwrap_or_default();

    let mut seen = HashSet::new();
    let calls: Vec<ToolCallRequest> = parts
        .iter()
        .filter_map(|p| p.function_call.as_ref())
        .map(|call| {
            match &call.id {
                Some(id) if seen.insert(id.clone()) => {
                    ToolCallRequest::new(id.clone(), call.name.clone(), call.args.clone())
                }
                _ => ToolCallRequest {
                    minted_locally: true,
                    ..ToolCallRequest::new(local_call_id(), call.name.clone(), call.args.clone())
                },
            }
        })
        .collect();

    if !calls.is_empty() {
        tracing::debug!(count = calls.len(), "Model requested tool calls");
        return Ok(GatewayResponse::ToolCalls(calls));
    }

    let text = parts
        .iter()
        .filter_map(|p| p.text.as_deref())
        .collect::<Vec<_>>()
        .join("\n");
    if text.is_empty() {
        tracing::warn!(finish_reason = ?candidate.finish_reason, "Model returned no text");
    }
    Ok(GatewayResponse::Text(text))
}

fn local_call_id() -> String {
    format!("{}{}", LOCAL_CALL_PREFIX, Uuid::new_v4().simple())
}
