//! Upstream model client abstraction.
//!
//! The gateway talks to the language model through the `ModelClient` trait so
//! the Gemini HTTP client can be swapped for a stub in tests.

mod gemini;
pub mod session;

pub use gemini::GeminiClient;
pub use session::{ChatSession, GenerationConfig, HarmBlockThreshold, HarmCategory, SafetySetting};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Raw result of one upstream generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelReply {
    pub text: String,
    /// Total tokens reported by the provider, if any.
    pub tokens_used: Option<u32>,
}

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),
    /// The provider refused the request itself (HTTP 400).
    #[error("Request rejected by provider ({status}): {message}")]
    Rejected { status: u16, message: String },
    /// The provider refused the configured API key.
    #[error("Provider refused credentials ({status}): {message}")]
    Unauthorized { status: u16, message: String },
    #[error("Provider error ({status}): {message}")]
    Provider { status: u16, message: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Request cancelled")]
    Cancelled,
}

/// A language model that can answer one chat turn.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Send `message` within `session`, making exactly one upstream call.
    ///
    /// Implementations must stop their in-flight work once `cancel` fires.
    async fn send(
        &self,
        session: &ChatSession,
        message: &str,
        cancel: CancellationToken,
    ) -> Result<ModelReply, UpstreamError>;
}
