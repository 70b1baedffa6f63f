//! HTTP routes and shared server state.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::Stream;
use tokio::sync::{broadcast, watch, RwLock};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use super::types::{AskRequest, CreateSessionResponse, HealthResponse, ToolInfo, TurnsResponse};
use crate::agent::{Orchestrator, Phase, TurnEvent};
use crate::config::Config;
use crate::credentials::EnvCredentialStore;
use crate::error::{ErrorKind, OrchestrationResult};
use crate::llm::{GeminiGateway, ModelGateway};
use crate::tools::{ToolExecutor, ToolRegistry};

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Upper bound on how often idle sessions are swept.
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct SessionEntry {
    orchestrator: Arc<Orchestrator>,
    last_active: Mutex<Instant>,
}

impl SessionEntry {
    fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            last_active: Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        if let Ok(mut last) = self.last_active.lock() {
            *last = Instant::now();
        }
    }

    fn idle_for(&self) -> Duration {
        self.last_active
            .lock()
            .map(|last| last.elapsed())
            .unwrap_or_default()
    }

    /// In use while a request or event stream still holds the orchestrator.
    fn in_use(&self) -> bool {
        Arc::strong_count(&self.orchestrator) > 1
    }
}

/// Shared application state.
pub struct AppState {
    pub config: Config,
    gateway: Arc<dyn ModelGateway>,
    executor: ToolExecutor,
    sessions: RwLock<HashMap<Uuid, SessionEntry>>,
}

impl AppState {
    pub fn new(config: Config, gateway: Arc<dyn ModelGateway>, executor: ToolExecutor) -> Self {
        Self {
            config,
            gateway,
            executor,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Start a session with an empty conversation.
    pub async fn create_session(&self) -> Uuid {
        let id = Uuid::new_v4();
        let orchestrator = Orchestrator::new(self.gateway.clone(), self.executor.clone())
            .with_limits(self.config.max_tool_rounds, self.config.model_timeout);
        self.sessions
            .write()
            .await
            .insert(id, SessionEntry::new(orchestrator));
        tracing::info!(session_id = %id, "Session created");
        id
    }

    /// Look up a session and mark it as active.
    pub async fn session(&self, id: Uuid) -> Option<Arc<Orchestrator>> {
        let sessions = self.sessions.read().await;
        let entry = sessions.get(&id)?;
        entry.touch();
        Some(entry.orchestrator.clone())
    }

    /// Drop a session and its conversation. Returns false if it did not exist.
    pub async fn remove_session(&self, id: Uuid) -> bool {
        let removed = self.sessions.write().await.remove(&id).is_some();
        if removed {
            tracing::info!(session_id = %id, "Session ended");
        }
        removed
    }

    /// Drop sessions unused for at least `max_idle`. Returns how many were dropped.
    ///
    /// A session still held by an ask or an event stream is kept.
    pub async fn expire_idle(&self, max_idle: Duration) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|id, entry| {
            let keep = entry.in_use() || entry.idle_for() < max_idle;
            if !keep {
                tracing::info!(session_id = %id, "Session expired");
            }
            keep
        });
        before - sessions.len()
    }
}

/// Periodically drop idle sessions for as long as `state` is alive elsewhere.
fn spawn_session_sweeper(state: &Arc<AppState>) {
    let max_idle = state.config.session_idle_timeout;
    let period = max_idle.clamp(Duration::from_secs(1), MAX_SWEEP_INTERVAL);
    let state = Arc::downgrade(state);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let Some(state) = state.upgrade() else { break };
            let expired = state.expire_idle(max_idle).await;
            if expired > 0 {
                tracing::debug!(expired, "Swept idle sessions");
            }
        }
    });
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let gateway = GeminiGateway::new(&config, Arc::new(EnvCredentialStore))?;
    let executor = ToolExecutor::new(Arc::new(ToolRegistry::new()));
    let addr = format!("{}:{}", config.host, config.port);

    let state = Arc::new(AppState::new(config, Arc::new(gateway), executor));
    spawn_session_sweeper(&state);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the API router.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health))
        .route("/api/tools", get(list_tools))
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/:id", axum::routing::delete(delete_session))
        .route("/api/sessions/:id/ask", post(ask))
        .route("/api/sessions/:id/turns", get(get_turns))
        .route("/api/sessions/:id/events", get(stream_events))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        model: state.config.model.clone(),
    })
}

async fn list_tools(State(state): State<Arc<AppState>>) -> Json<Vec<ToolInfo>> {
    Json(
        state
            .executor
            .registry()
            .describe_all()
            .iter()
            .map(ToolInfo::from)
            .collect(),
    )
}

async fn create_session(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<CreateSessionResponse>) {
    let id = state.create_session().await;
    (StatusCode::CREATED, Json(CreateSessionResponse { id }))
}

async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    if state.remove_session(id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(session_not_found(id))
    }
}

async fn ask(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<AskRequest>,
) -> Result<(StatusCode, Json<OrchestrationResult>), (StatusCode, String)> {
    let orchestrator = state.session(id).await.ok_or_else(|| session_not_found(id))?;

    tracing::debug!(session_id = %id, "Ask received");
    let result = orchestrator.ask(&req.text).await;
    Ok((status_for(&result), Json(result)))
}

async fn get_turns(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<TurnsResponse>, (StatusCode, String)> {
    let orchestrator = state.session(id).await.ok_or_else(|| session_not_found(id))?;

    Ok(Json(TurnsResponse {
        phase: orchestrator.phase(),
        turns: orchestrator.snapshot().await,
    }))
}

/// Stream committed turns and phase changes of a session via SSE.
async fn stream_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, String)> {
    let orchestrator = state.session(id).await.ok_or_else(|| session_not_found(id))?;
    let turns = orchestrator.subscribe();
    let phases = orchestrator.watch_phase();
    // The stream must not keep a deleted session alive; it ends when the session does.
    drop(orchestrator);

    tracing::info!(session_id = %id, "Event stream opened");

    Ok(Sse::new(session_event_stream(id, turns, phases)).keep_alive(
        KeepAlive::new()
            .interval(KEEPALIVE_INTERVAL)
            .text("keepalive"),
    ))
}

enum Next {
    Turn(Result<TurnEvent, broadcast::error::RecvError>),
    Phase(bool),
}

/// SSE events for one session, ending when its turn channel closes.
///
/// Turns are delivered in log order. Phase changes are coalesced, so a
/// slow reader sees only the latest one.
fn session_event_stream(
    id: Uuid,
    mut turns: broadcast::Receiver<TurnEvent>,
    mut phases: watch::Receiver<Phase>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        let mut phases_open = true;
        loop {
            let next = tokio::select! {
                biased;
                received = turns.recv() => Next::Turn(received),
                changed = phases.changed(), if phases_open => Next::Phase(changed.is_ok()),
            };

            match next {
                Next::Turn(Ok(ev)) => {
                    tracing::debug!(
                        session_id = %id,
                        index = ev.index,
                        role = ?ev.turn.role(),
                        "Session SSE event"
                    );
                    match Event::default().event(ev.event_name()).json_data(&ev) {
                        Ok(sse) => yield Ok(sse),
                        Err(e) => {
                            tracing::error!(
                                session_id = %id,
                                error = %e,
                                "Failed to serialize SSE event; dropping"
                            );
                        }
                    }
                }
                Next::Turn(Err(broadcast::error::RecvError::Lagged(n))) => {
                    tracing::warn!(session_id = %id, skipped = n, "Session SSE stream lagged");
                    match Event::default()
                        .event("error")
                        .json_data(serde_json::json!({
                            "message": "event stream lagged; some turns were dropped",
                            "skipped": n,
                        })) {
                        Ok(sse) => yield Ok(sse),
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to serialize SSE lag event");
                        }
                    }
                }
                Next::Turn(Err(broadcast::error::RecvError::Closed)) => break,
                Next::Phase(false) => phases_open = false,
                Next::Phase(true) => {
                    let phase = phases.borrow_and_update().clone();
                    match Event::default().event("phase_changed").json_data(&phase) {
                        Ok(sse) => yield Ok(sse),
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to serialize SSE phase event");
                        }
                    }
                }
            }
        }
        tracing::info!(session_id = %id, "Event stream closed");
    }
}

fn session_not_found(id: Uuid) -> (StatusCode, String) {
    (StatusCode::NOT_FOUND, format!("Session {} not found", id))
}

fn status_for(result: &OrchestrationResult) -> StatusCode {
    match result {
        OrchestrationResult::FinalAnswer { .. } => StatusCode::OK,
        OrchestrationResult::Failure { error_kind, .. } => match error_kind {
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::MissingCredential => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::BackendError => StatusCode::BAD_GATEWAY,
            ErrorKind::RoundLimitExceeded => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::UnknownTool
            | ErrorKind::InvalidArguments
            | ErrorKind::ToolExecutionError
            | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{PendingCall, Turn};
    use crate::config::DEFAULT_BASE_URL;
    use crate::llm::scripted::{call, text, tool_calls, ScriptedGateway};
    use axum::body::Body;
    use axum::http::{header, Request};
    use axum::response::IntoResponse;
    use chrono::Utc;
    use futures::StreamExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use url::Url;

    fn setup(gateway: ScriptedGateway) -> (Arc<AppState>, Router) {
        let config = Config::new(
            "gemini-test".to_string(),
            Url::parse(DEFAULT_BASE_URL).unwrap(),
        );
        let state = Arc::new(AppState::new(
            config,
            Arc::new(gateway),
            ToolExecutor::new(Arc::new(ToolRegistry::new())),
        ));
        (state.clone(), router(state))
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// Split an SSE body into `(event name, data)` pairs.
    fn sse_frames(body: &[u8]) -> Vec<(String, Value)> {
        let body = String::from_utf8_lossy(body);
        body.split("\n\n")
            .filter_map(|frame| {
                let mut name = None;
                let mut data = None;
                for line in frame.lines() {
                    if let Some(rest) = line.strip_prefix("event: ") {
                        name = Some(rest.to_string());
                    } else if let Some(rest) = line.strip_prefix("data: ") {
                        data = serde_json::from_str(rest).ok();
                    }
                }
                Some((name?, data?))
            })
            .collect()
    }

    async fn read_to_end(response: axum::response::Response) -> Vec<u8> {
        tokio::time::timeout(
            Duration::from_secs(2),
            axum::body::to_bytes(response.into_body(), usize::MAX),
        )
        .await
        .expect("event stream did not end")
        .unwrap()
        .to_vec()
    }

    fn user_turn(index: usize) -> TurnEvent {
        TurnEvent {
            index,
            turn: Turn::User {
                text: format!("message {}", index),
            },
            appended_at: Utc::now(),
        }
    }

    fn ask_request(id: Uuid, text: &str) -> Request<Body> {
        Request::post(format!("/api/sessions/{}/ask", id))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({ "text": text }).to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_model() {
        let (_, app) = setup(ScriptedGateway::new(vec![]));
        let response = app
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["model"], "gemini-test");
    }

    #[tokio::test]
    async fn lists_builtin_tools() {
        let (_, app) = setup(ScriptedGateway::new(vec![]));
        let response = app
            .oneshot(Request::get("/api/tools").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        let names: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["calculate", "fibonacci", "exponential"]);
        assert_eq!(body[0]["parameters"]["required"], json!(["expression"]));
    }

    #[tokio::test]
    async fn ask_runs_tools_and_returns_answer() {
        let (state, app) = setup(ScriptedGateway::new(vec![
            tool_calls(vec![call("a", "calculate", json!({ "expression": "6*7" }))]),
            text("It is 42."),
        ]));
        let id = state.create_session().await;

        let response = app.clone().oneshot(ask_request(id, "6 times 7?")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({ "kind": "final_answer", "text": "It is 42." })
        );

        let response = app
            .oneshot(
                Request::get(format!("/api/sessions/{}/turns", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["phase"]["state"], "done");
        assert_eq!(body["turns"].as_array().unwrap().len(), 4);
        assert_eq!(body["turns"][2]["role"], "function");
        assert_eq!(body["turns"][2]["result"], "42");
    }

    #[tokio::test]
    async fn failures_map_to_status_codes() {
        let (state, app) = setup(ScriptedGateway::new(vec![]));
        let id = state.create_session().await;
        let response = app.oneshot(ask_request(id, "   ")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error_kind"], "invalid_input");

        let (state, app) = setup(ScriptedGateway::new(vec![]).without_credential());
        let id = state.create_session().await;
        let response = app.oneshot(ask_request(id, "hi")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let (state, app) = setup(ScriptedGateway::new(vec![Err(
            crate::llm::GatewayError::Backend {
                status_code: Some(500),
                message: "down".to_string(),
            },
        )]));
        let id = state.create_session().await;
        let response = app.oneshot(ask_request(id, "hi")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let (_, app) = setup(ScriptedGateway::new(vec![]));
        let response = app.oneshot(ask_request(Uuid::new_v4(), "hi")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn deleted_session_is_gone() {
        let (state, app) = setup(ScriptedGateway::new(vec![]));
        let id = state.create_session().await;

        let delete = || {
            Request::delete(format!("/api/sessions/{}", id))
                .body(Body::empty())
                .unwrap()
        };
        let response = app.clone().oneshot(delete()).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app.oneshot(delete()).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(state.session(id).await.is_none());
    }

    #[tokio::test]
    async fn events_endpoint_streams_sse() {
        let (state, app) = setup(ScriptedGateway::new(vec![]));
        let id = state.create_session().await;

        let response = app
            .oneshot(
                Request::get(format!("/api/sessions/{}/events", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );
    }

    #[tokio::test]
    async fn events_deliver_turns_in_log_order() {
        let (state, app) = setup(ScriptedGateway::new(vec![text("hi back")]));
        let id = state.create_session().await;

        let response = app
            .oneshot(
                Request::get(format!("/api/sessions/{}/events", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let orchestrator = state.session(id).await.unwrap();
        assert!(orchestrator.ask("hello").await.is_final_answer());
        drop(orchestrator);
        // Ending the session closes the stream.
        assert!(state.remove_session(id).await);

        let frames = sse_frames(&read_to_end(response).await);
        let turns: Vec<&Value> = frames
            .iter()
            .filter(|(name, _)| name == "turn_appended")
            .map(|(_, data)| data)
            .collect();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0]["index"], 0);
        assert_eq!(turns[0]["turn"]["role"], "user");
        assert_eq!(turns[0]["turn"]["text"], "hello");
        assert_eq!(turns[1]["index"], 1);
        assert_eq!(turns[1]["turn"]["role"], "model");
        assert_eq!(turns[1]["turn"]["content"]["text"], "hi back");
    }

    #[tokio::test]
    async fn lagging_reader_is_told_how_many_turns_it_missed() {
        let (turn_tx, turn_rx) = broadcast::channel(1);
        let (_phase_tx, phase_rx) = watch::channel(Phase::Idle);
        for index in 0..3 {
            turn_tx.send(user_turn(index)).unwrap();
        }
        drop(turn_tx);

        let response = Sse::new(session_event_stream(Uuid::new_v4(), turn_rx, phase_rx))
            .into_response();
        let frames = sse_frames(&read_to_end(response).await);

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].0, "error");
        assert_eq!(frames[0].1["skipped"], 2);
        assert_eq!(frames[1].0, "turn_appended");
        assert_eq!(frames[1].1["index"], 2);
    }

    #[tokio::test]
    async fn phase_changes_are_streamed_while_tools_run() {
        let (turn_tx, turn_rx) = broadcast::channel(4);
        let (phase_tx, phase_rx) = watch::channel(Phase::Idle);
        let response = Sse::new(session_event_stream(Uuid::new_v4(), turn_rx, phase_rx))
            .into_response();
        let mut body = response.into_body().into_data_stream();

        phase_tx.send_replace(Phase::ExecutingTools {
            round: 1,
            pending: vec![PendingCall {
                call_id: "a".to_string(),
                function_name: "calculate".to_string(),
            }],
        });

        let frame = tokio::time::timeout(Duration::from_secs(2), body.next())
            .await
            .expect("no phase event")
            .unwrap()
            .unwrap();
        let frames = sse_frames(&frame);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0, "phase_changed");
        assert_eq!(frames[0].1["state"], "executing_tools");
        assert_eq!(frames[0].1["pending"][0]["function_name"], "calculate");

        drop(phase_tx);
        drop(turn_tx);
        let rest = tokio::time::timeout(Duration::from_secs(2), body.next())
            .await
            .expect("stream did not end");
        assert!(rest.is_none());
    }

    #[tokio::test]
    async fn idle_sessions_expire() {
        let (state, _) = setup(ScriptedGateway::new(vec![]));
        let idle = state.create_session().await;
        let held = state.create_session().await;
        let orchestrator = state.session(held).await.unwrap();

        assert_eq!(state.expire_idle(Duration::from_secs(3600)).await, 0);
        assert!(state.session(idle).await.is_some());

        assert_eq!(state.expire_idle(Duration::ZERO).await, 1);
        assert!(state.session(idle).await.is_none());
        assert!(state.session(held).await.is_some());

        drop(orchestrator);
        assert_eq!(state.expire_idle(Duration::ZERO).await, 1);
        assert!(state.session(held).await.is_none());
    }

    #[test]
    fn round_limit_is_unprocessable() {
        let result = OrchestrationResult::Failure {
            error_kind: ErrorKind::RoundLimitExceeded,
            detail: String::new(),
        };
        assert_eq!(status_for(&result), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
