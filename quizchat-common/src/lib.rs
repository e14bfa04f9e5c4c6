//! quizchat Common Types
//!
//! Wire types shared by the chat backend and its clients.

pub mod chat;

pub use chat::{ChatReply, ChatRequest, ResponseEnvelope, Role, Turn, MIN_MESSAGE_CHARS};
