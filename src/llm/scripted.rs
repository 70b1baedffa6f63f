//! A gateway that replays canned responses, for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{GatewayError, GatewayResponse, ModelGateway, ToolCallRequest};
use crate::agent::Turn;
use crate::tools::ToolDescriptor;

pub(crate) struct ScriptedGateway {
    script: Mutex<VecDeque<Result<GatewayResponse, GatewayError>>>,
    /// Answer given once the script runs out.
    repeat: Option<GatewayResponse>,
    delay: Duration,
    missing_credential: bool,
    calls: AtomicUsize,
    seen: Mutex<Vec<Vec<Turn>>>,
}

impl ScriptedGateway {
    pub(crate) fn new(
        script: Vec<Result<GatewayResponse, GatewayError>>,
    ) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            repeat: None,
            delay: Duration::ZERO,
            missing_credential: false,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Give the same answer forever.
    pub(crate) fn repeating(response: GatewayResponse) -> Self {
        Self {
            repeat: Some(response),
            ..Self::new(Vec::new())
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn without_credential(mut self) -> Self {
        self.missing_credential = true;
        self
    }

    /// How many times `send` was called.
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The conversation passed to each `send`, in call order.
    pub(crate) fn seen(&self) -> Vec<Vec<Turn>> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ModelGateway for ScriptedGateway {
    fn ready(&self) -> Result<(), GatewayError> {
        if self.missing_credential {
            Err(GatewayError::MissingCredential("GEMINI_API_KEY".to_string()))
        } else {
            Ok(())
        }
    }

    async fn send(
        &self,
        turns: &[Turn],
        _tools: &[ToolDescriptor],
    ) -> Result<GatewayResponse, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(turns.to_vec());
        }

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match (next, &self.repeat) {
            (Some(response), _) => response,
            (None, Some(response)) => Ok(response.clone()),
            (None, None) => Err(GatewayError::InvalidResponse(
                "script exhausted".to_string(),
            )),
        }
    }
}

pub(crate) fn text(text: &str) -> Result<GatewayResponse, GatewayError> {
    Ok(GatewayResponse::Text(text.to_string()))
}

pub(crate) fn call(id: &str, name: &str, arguments: Value) -> ToolCallRequest {
    ToolCallRequest::new(id, name, arguments)
}

pub(crate) fn tool_calls(calls: Vec<ToolCallRequest>) -> Result<GatewayResponse, GatewayError> {
    Ok(GatewayResponse::ToolCalls(calls))
}
