//! Agent module - the conversation loop.
//!
//! The orchestrator follows a "tools in a loop" pattern:
//! 1. Append the user's message to the conversation
//! 2. Send the conversation and tool catalog to the model
//! 3. If the model requests tool calls, run them all and append the results
//! 4. Repeat until the model answers in text or the round limit is reached

mod conversation;
mod events;
mod orchestrator;

pub use conversation::{ConversationError, ConversationState, FunctionOutput, ModelContent, Role, Turn};
pub use events::TurnEvent;
pub use orchestrator::{
    Orchestrator, PendingCall, Phase, DEFAULT_MAX_ROUNDS, DEFAULT_MODEL_TIMEOUT,
};
