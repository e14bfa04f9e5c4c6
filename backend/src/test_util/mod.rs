pub mod mock_gemini;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::{
    Config, CorsConfig, GeminiConfig, LoggingConfig, Mode, RateLimitConfig, RATE_LIMIT_WINDOW,
    REQUEST_DEADLINE,
};
use crate::llm::{ChatSession, ModelClient, ModelReply, UpstreamError};
use crate::AppState;

pub const TEST_MODEL: &str = "gemini-test";

pub fn test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 3000,
        mode: Mode::Production,
        gemini: GeminiConfig {
            api_key: "test-key".to_string(),
            model: TEST_MODEL.to_string(),
            base_url: "http://localhost:9".to_string(),
            max_output_tokens: 1000,
        },
        rate_limit: RateLimitConfig {
            max_requests: 100,
            window: RATE_LIMIT_WINDOW,
            trust_proxy: false,
        },
        cors: CorsConfig {
            allowed_origins: vec![],
        },
        logging: LoggingConfig {
            level: "debug".to_string(),
        },
        request_timeout: REQUEST_DEADLINE,
        static_dir: None,
    }
}

pub fn test_state(config: Config, client: Arc<dyn ModelClient>) -> Arc<AppState> {
    Arc::new(AppState::new(config, client))
}

/// Failure a `StubModelClient` reports on every call.
#[derive(Debug, Clone, Copy)]
pub enum StubFailure {
    Provider,
    Rejected,
    InvalidResponse,
}

impl StubFailure {
    fn to_error(self) -> UpstreamError {
        match self {
            StubFailure::Provider => UpstreamError::Provider {
                status: 500,
                message: "stub provider failure".to_string(),
            },
            StubFailure::Rejected => UpstreamError::Rejected {
                status: 400,
                message: "stub rejected request".to_string(),
            },
            StubFailure::InvalidResponse => {
                UpstreamError::InvalidResponse("stub returned no text".to_string())
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum StubBehavior {
    Reply(String),
    Fail(StubFailure),
    /// Reply after sleeping, ignoring cancellation.
    Delayed(Duration, String),
    /// Never settle.
    Hang,
}

/// In-process `ModelClient` that records how it was used.
pub struct StubModelClient {
    behavior: StubBehavior,
    calls: AtomicUsize,
    aborted: Arc<AtomicUsize>,
    last_message: Mutex<Option<String>>,
    last_session: Mutex<Option<ChatSession>>,
}

impl StubModelClient {
    pub fn new(behavior: StubBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: AtomicUsize::new(0),
            aborted: Arc::new(AtomicUsize::new(0)),
            last_message: Mutex::new(None),
            last_session: Mutex::new(None),
        })
    }

    pub fn replying(text: &str) -> Arc<Self> {
        Self::new(StubBehavior::Reply(text.to_string()))
    }

    /// Number of upstream calls made.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of calls dropped unfinished after their token was cancelled.
    pub fn aborted(&self) -> usize {
        self.aborted.load(Ordering::SeqCst)
    }

    pub fn last_message(&self) -> Option<String> {
        self.last_message.lock().ok().and_then(|m| m.clone())
    }

    pub fn last_session(&self) -> Option<ChatSession> {
        self.last_session.lock().ok().and_then(|s| s.clone())
    }
}

/// Counts an abort when dropped before completion with a cancelled token.
struct AbortProbe {
    cancel: CancellationToken,
    aborted: Arc<AtomicUsize>,
    finished: bool,
}

impl Drop for AbortProbe {
    fn drop(&mut self) {
        if !self.finished && self.cancel.is_cancelled() {
            self.aborted.fetch_add(1, Ordering::SeqCst);
        }
    }
}

fn reply(text: &str) -> ModelReply {
    ModelReply {
        text: text.to_string(),
        tokens_used: Some(text.split_whitespace().count() as u32),
    }
}

#[async_trait]
impl ModelClient for StubModelClient {
    async fn send(
        &self,
        session: &ChatSession,
        message: &str,
        cancel: CancellationToken,
    ) -> Result<ModelReply, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_message.lock() {
            *last = Some(message.to_string());
        }
        if let Ok(mut last) = self.last_session.lock() {
            *last = Some(session.clone());
        }

        let mut probe = AbortProbe {
            cancel,
            aborted: self.aborted.clone(),
            finished: false,
        };

        let result = match &self.behavior {
            StubBehavior::Reply(text) => Ok(reply(text)),
            StubBehavior::Fail(failure) => Err(failure.to_error()),
            StubBehavior::Delayed(delay, text) => {
                tokio::time::sleep(*delay).await;
                Ok(reply(text))
            }
            StubBehavior::Hang => std::future::pending().await,
        };

        probe.finished = true;
        result
    }
}
