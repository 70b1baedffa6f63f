//! # toolchat
//!
//! A chat service where a Gemini model can call local tools before it answers.
//!
//! This library provides:
//! - A tool registry with `calculate`, `fibonacci` and `exponential`
//! - A conversation orchestrator that runs tool rounds until the model answers
//! - A Gemini `generateContent` gateway
//! - An HTTP API with per-session conversations and an SSE turn feed
//!
//! ## Architecture
//!
//! Each `ask` follows the "tools in a loop" pattern:
//! 1. Append the user message to the session's conversation
//! 2. Send the conversation and tool catalog to the model
//! 3. Run every requested tool call concurrently, record results in request order
//! 4. Repeat until the model answers in text, or give up after the round limit
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use toolchat::{agent::Orchestrator, config::Config, credentials::EnvCredentialStore};
//! use toolchat::llm::GeminiGateway;
//! use toolchat::tools::{ToolExecutor, ToolRegistry};
//!
//! let config = Config::from_env()?;
//! let gateway = GeminiGateway::new(&config, Arc::new(EnvCredentialStore))?;
//! let executor = ToolExecutor::new(Arc::new(ToolRegistry::new()));
//! let orchestrator = Orchestrator::new(Arc::new(gateway), executor);
//! let result = orchestrator.ask("What is fibonacci(10)?").await;
//! ```

pub mod agent;
pub mod api;
pub mod config;
pub mod credentials;
pub mod error;
pub mod llm;
pub mod tools;

pub use config::Config;
pub use error::{ErrorKind, OrchestrationResult, OrchestratorError};
