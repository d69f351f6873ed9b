//! Core AI engine components
//!
//! This module contains the command logic for Tally's AI chat features.

mod chat;

pub use chat::{ChatEngine, ChatError, ChatReply, ChatRequest, RegenerateRequest};
