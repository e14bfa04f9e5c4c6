use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::session::{ChatSession, GenerationConfig, SafetySetting};
use super::{ModelClient, ModelReply, UpstreamError};

/// Client for the Gemini `generateContent` API.
pub struct GeminiClient {
    http_client: Client,
    base_url: String,
    api_key: String,
}

// ============================================================================
// Gemini API types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    system_instruction: Content<'a>,
    generation_config: &'a GenerationConfig,
    safety_settings: &'a [SafetySetting],
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

impl<'a> Content<'a> {
    fn text(role: Option<&'a str>, text: &'a str) -> Self {
        Self {
            role,
            parts: vec![Part { text }],
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<ResponseContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    total_token_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: GeminiErrorBody,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    details: Vec<GeminiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    #[serde(default)]
    reason: Option<String>,
}

impl GeminiErrorBody {
    /// Invalid, expired or unauthorized API key.
    fn is_credential_failure(&self) -> bool {
        matches!(
            self.status.as_deref(),
            Some("UNAUTHENTICATED" | "PERMISSION_DENIED")
        ) || self
            .details
            .iter()
            .filter_map(|d| d.reason.as_deref())
            .any(|reason| reason.starts_with("API_KEY_"))
    }
}

// ============================================================================
// Client
// ============================================================================

impl GeminiClient {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            http_client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn url(&self, model: &str) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, model)
    }

    async fn generate(
        &self,
        session: &ChatSession,
        message: &str,
    ) -> Result<ModelReply, UpstreamError> {
        let mut contents: Vec<Content> = session
            .history
            .iter()
            .map(|turn| Content::text(Some(turn.role.as_str()), &turn.content))
            .collect();
        contents.push(Content::text(Some("user"), message));

        let request = GenerateContentRequest {
            contents,
            system_instruction: Content::text(None, &session.system_instruction),
            generation_config: &session.generation_config,
            safety_settings: session.safety_settings,
        };

        let url = self.url(&session.model);
        tracing::debug!(model = %session.model, turns = session.history.len(), "Sending request to Gemini");

        let response = self
            .http_client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| UpstreamError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_failure(status, response).await);
        }

        let body: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| UpstreamError::InvalidResponse(e.to_string()))?;

        extract_reply(body)
    }
}

async fn classify_failure(status: StatusCode, response: reqwest::Response) -> UpstreamError {
    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => {
            tracing::debug!(status = status.as_u16(), error = %e, "Failed to read Gemini error body");
            String::new()
        }
    };
    let parsed = serde_json::from_str::<GeminiErrorResponse>(&body).ok();
    let credential_failure = parsed
        .as_ref()
        .is_some_and(|e| e.error.is_credential_failure());
    let message = parsed.map(|e| e.error.message).unwrap_or(body);
    let status_code = status.as_u16();

    let unauthorized = matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN);
    if credential_failure || unauthorized {
        UpstreamError::Unauthorized {
            status: status_code,
            message,
        }
    } else if status == StatusCode::BAD_REQUEST {
        UpstreamError::Rejected {
            status: status_code,
            message,
        }
    } else {
        UpstreamError::Provider {
            status: status_code,
            message,
        }
    }
}

fn extract_reply(body: GenerateContentResponse) -> Result<ModelReply, UpstreamError> {
    let tokens_used = body.usage_metadata.and_then(|u| u.total_token_count);

    let Some(candidate) = body.candidates.into_iter().next() else {
        let reason = body
            .prompt_feedback
            .and_then(|f| f.block_reason)
            .unwrap_or_else(|| "no candidates".to_string());
        return Err(UpstreamError::InvalidResponse(format!(
            "empty response: {}",
            reason
        )));
    };

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        let reason = candidate
            .finish_reason
            .unwrap_or_else(|| "unknown".to_string());
        return Err(UpstreamError::InvalidResponse(format!(
            "candidate has no text (finish reason: {})",
            reason
        )));
    }

    Ok(ModelReply { text, tokens_used })
}

#[async_trait]
impl ModelClient for GeminiClient {
    async fn send(
        &self,
        session: &ChatSession,
        message: &str,
        cancel: CancellationToken,
    ) -> Result<ModelReply, UpstreamError> {
        // Dropping the request future closes the connection.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(model = %session.model, "Gemini request aborted");
                Err(UpstreamError::Cancelled)
            }
            result = self.generate(session, message) => result,
        }
    }
}
