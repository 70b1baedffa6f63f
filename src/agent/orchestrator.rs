//! The ask loop: model call, tool round, repeat until the model answers.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{broadcast, watch, Mutex, RwLock};

use super::conversation::{ConversationError, ConversationState, FunctionOutput, Turn};
use super::events::TurnEvent;
use crate::error::{ErrorKind, OrchestrationResult, OrchestratorError};
use crate::llm::{GatewayError, GatewayResponse, ModelGateway, ToolCallRequest};
use crate::tools::{ToolDescriptor, ToolExecutor};

/// Default cap on tool rounds per `ask`.
pub const DEFAULT_MAX_ROUNDS: usize = 10;

/// Default timeout for one model request.
pub const DEFAULT_MODEL_TIMEOUT: Duration = Duration::from_secs(60);

const EVENT_CAPACITY: usize = 256;

/// Where the orchestrator is in its current `ask`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Phase {
    Idle,
    AwaitingModel { round: usize },
    ExecutingTools { round: usize, pending: Vec<PendingCall> },
    Done,
    Failed { error_kind: ErrorKind },
}

/// A tool call that has been requested but not yet answered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingCall {
    pub call_id: String,
    pub function_name: String,
}

impl From<&ToolCallRequest> for PendingCall {
    fn from(call: &ToolCallRequest) -> Self {
        Self {
            call_id: call.call_id.clone(),
            function_name: call.function_name.clone(),
        }
    }
}

/// Drives one session's conversation.
///
/// `ask` calls are served one at a time, in arrival order. Every turn the
/// orchestrator commits is broadcast to subscribers as a [`TurnEvent`].
pub struct Orchestrator {
    gateway: Arc<dyn ModelGateway>,
    executor: ToolExecutor,
    conversation: RwLock<ConversationState>,
    ask_lock: Mutex<()>,
    events: broadcast::Sender<TurnEvent>,
    phase: watch::Sender<Phase>,
    max_rounds: usize,
    model_timeout: Duration,
}

impl Orchestrator {
    pub fn new(gateway: Arc<dyn ModelGateway>, executor: ToolExecutor) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (phase, _) = watch::channel(Phase::Idle);

        Self {
            gateway,
            executor,
            conversation: RwLock::new(ConversationState::new()),
            ask_lock: Mutex::new(()),
            events,
            phase,
            max_rounds: DEFAULT_MAX_ROUNDS,
            model_timeout: DEFAULT_MODEL_TIMEOUT,
        }
    }

    pub fn with_limits(mut self, max_rounds: usize, model_timeout: Duration) -> Self {
        self.max_rounds = max_rounds;
        self.model_timeout = model_timeout;
        self
    }

    /// Answer one user message. Never returns unresolved tool calls.
    pub async fn ask(&self, text: &str) -> OrchestrationResult {
        OrchestrationResult::from(self.try_ask(text).await)
    }

    /// Like [`ask`](Self::ask), with the error kept typed.
    pub async fn try_ask(&self, text: &str) -> Result<String, OrchestratorError> {
        if text.trim().is_empty() {
            return Err(OrchestratorError::InvalidInput);
        }

        let _serial = self.ask_lock.lock().await;
        self.gateway.ready()?;

        let phase = PhaseGuard::new(&self.phase);
        let result = self.run(text, &phase).await;

        match &result {
            Ok(_) => phase.finish(Phase::Done),
            Err(e) => {
                tracing::warn!("Ask failed: {}", e);
                phase.finish(Phase::Failed {
                    error_kind: e.kind(),
                })
            }
        }
        result
    }

    /// Receive every turn committed from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<TurnEvent> {
        self.events.subscribe()
    }

    pub fn watch_phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    pub fn phase(&self) -> Phase {
        self.phase.borrow().clone()
    }

    pub async fn snapshot(&self) -> Vec<Turn> {
        self.conversation.read().await.snapshot()
    }

    pub fn tools(&self) -> Vec<ToolDescriptor> {
        self.executor.registry().describe_all()
    }

    async fn run(&self, text: &str, phase: &PhaseGuard<'_>) -> Result<String, OrchestratorError> {
        self.commit(|c| c.append_user(text)).await?;

        let tools = self.tools();
        let mut round = 0;

        loop {
            round += 1;
            phase.set(Phase::AwaitingModel { round });

            let turns = self.snapshot().await;
            tracing::debug!(round, turns = turns.len(), "Calling model");

            match self.call_model(&turns, &tools).await? {
                GatewayResponse::Text(answer) => {
                    self.commit(|c| c.append_model_text(&answer)).await?;
                    tracing::info!(rounds = round - 1, "Ask answered");
                    return Ok(answer);
                }
                GatewayResponse::ToolCalls(calls) => {
                    if calls.is_empty() {
                        return Err(GatewayError::InvalidResponse(
                            "tool call list is empty".to_string(),
                        )
                        .into());
                    }
                    if round > self.max_rounds {
                        return Err(OrchestratorError::RoundLimitExceeded {
                            limit: self.max_rounds,
                        });
                    }

                    phase.set(Phase::ExecutingTools {
                        round,
                        pending: calls.iter().map(PendingCall::from).collect(),
                    });
                    self.run_tools(calls).await?;
                }
            }
        }
    }

    async fn call_model(
        &self,
        turns: &[Turn],
        tools: &[ToolDescriptor],
    ) -> Result<GatewayResponse, OrchestratorError> {
        match tokio::time::timeout(self.model_timeout, self.gateway.send(turns, tools)).await {
            Ok(response) => Ok(response?),
            Err(_) => Err(GatewayError::Timeout(self.model_timeout).into()),
        }
    }

    /// Run one batch of tool calls and commit the round.
    ///
    /// The model turn and its function turns land together, so the log
    /// never holds tool calls without results.
    async fn run_tools(&self, calls: Vec<ToolCallRequest>) -> Result<(), OrchestratorError> {
        let names: Vec<&str> = calls.iter().map(|c| c.function_name.as_str()).collect();
        tracing::info!("Executing tools: {}", names.join(", "));

        let results = self.executor.execute_all(&calls).await;

        self.commit(|c| {
            c.append_model_tool_calls(calls.clone())?;
            for (call, result) in calls.iter().zip(results) {
                c.append_function_result(
                    &call.call_id,
                    &call.function_name,
                    FunctionOutput::from(result),
                )?;
            }
            Ok(())
        })
        .await
    }

    /// Apply `apply` atomically and announce the turns it added.
    async fn commit<F>(&self, apply: F) -> Result<(), OrchestratorError>
    where
        F: FnOnce(&mut ConversationState) -> Result<(), ConversationError>,
    {
        let mut conversation = self.conversation.write().await;
        let start = conversation.len();
        conversation.atomically(apply)?;

        let appended_at = Utc::now();
        for (index, turn) in conversation.turns().iter().enumerate().skip(start) {
            // No subscribers is fine.
            let _ = self.events.send(TurnEvent {
                index,
                turn: turn.clone(),
                appended_at,
            });
        }
        Ok(())
    }
}

/// Resets the phase to `Idle` if an ask is dropped mid-flight.
struct PhaseGuard<'a> {
    phase: &'a watch::Sender<Phase>,
}

impl<'a> PhaseGuard<'a> {
    fn new(phase: &'a watch::Sender<Phase>) -> Self {
        Self { phase }
    }

    fn set(&self, phase: Phase) {
        self.phase.send_replace(phase);
    }

    fn finish(self, phase: Phase) {
        self.set(phase);
        std::mem::forget(self);
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.phase.send_replace(Phase::Idle);
    }
}
