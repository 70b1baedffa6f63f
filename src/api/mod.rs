//! HTTP API for chat sessions.
//!
//! ## Endpoints
//!
//! - `GET /api/health` - Health check
//! - `GET /api/tools` - Tool catalog
//! - `POST /api/sessions` - Start a session
//! - `POST /api/sessions/:id/ask` - Send a message, wait for the answer
//! - `GET /api/sessions/:id/turns` - Conversation log and current phase
//! - `GET /api/sessions/:id/events` - Stream committed turns and phase changes (SSE)
//! - `DELETE /api/sessions/:id` - End a session

mod routes;
pub mod types;

pub use routes::{router, serve, AppState};
