//! `POST /api/chat` - bounded-latency chat completion.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use chrono::Utc;
use quizchat_common::{ChatReply, ChatRequest, ResponseEnvelope, Turn, MIN_MESSAGE_CHARS};
use serde_json::Value;

use crate::error::ApiError;
use crate::llm::ChatSession;
use crate::{rate_limit, AppState};

pub const MESSAGE_REQUIRED: &str = "Message is required and must be a string";
pub const INVALID_BODY: &str = "Request body must be a JSON object";
pub const INVALID_HISTORY: &str = "chatHistory must be a list of {role, content} turns with role 'user' or 'model'";

/// Parse and validate a raw request body.
///
/// The returned request carries the trimmed message.
pub fn validate_chat_request(body: &[u8]) -> Result<ChatRequest, ApiError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|_| ApiError::InvalidInput(INVALID_BODY.to_string()))?;
    let Value::Object(mut fields) = value else {
        return Err(ApiError::InvalidInput(INVALID_BODY.to_string()));
    };

    let message = match fields.remove("message") {
        Some(Value::String(message)) => message,
        _ => return Err(ApiError::InvalidInput(MESSAGE_REQUIRED.to_string())),
    };

    let message = message.trim();
    if message.chars().count() < MIN_MESSAGE_CHARS {
        return Err(ApiError::InvalidInput(format!(
            "Message must be at least {} characters long",
            MIN_MESSAGE_CHARS
        )));
    }

    let chat_history = match fields.remove("chatHistory") {
        None | Some(Value::Null) => Vec::new(),
        Some(history) => serde_json::from_value::<Vec<Turn>>(history)
            .map_err(|_| ApiError::InvalidInput(INVALID_HISTORY.to_string()))?,
    };

    Ok(ChatRequest::new(message).with_history(chat_history))
}

async fn complete(state: &AppState, body: &[u8]) -> Result<ChatReply, ApiError> {
    let request = validate_chat_request(body)?;

    let gemini = &state.config.gemini;
    let session = ChatSession::new(&gemini.model, &request, gemini.max_output_tokens);
    let client = Arc::clone(&state.model_client);

    tracing::debug!(
        model = %session.model,
        history = session.history.len(),
        message_chars = request.message.chars().count(),
        "Dispatching chat request"
    );

    let message = request.message;
    let reply = state
        .runner
        .run(|cancel| async move { client.send(&session, &message, cancel).await })
        .await?;

    Ok(ChatReply {
        response: reply.text,
        timestamp: Utc::now(),
        model: gemini.model.clone(),
        tokens_used: reply.tokens_used,
    })
}

/// POST /api/chat
async fn chat(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    match complete(&state, &body).await {
        Ok(reply) => (StatusCode::OK, Json(ResponseEnvelope::ok(reply))).into_response(),
        Err(err) => err.into_response_for(state.config.mode),
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/chat", post(chat))
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit::enforce))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quizchat_common::Role;

    fn invalid_message(body: &str) -> String {
        match validate_chat_request(body.as_bytes()) {
            Err(ApiError::InvalidInput(message)) => message,
            other => panic!("expected InvalidInput, got {other:?}"),
        }
    }

    #[test]
    fn test_valid_request_is_trimmed() {
        let request =
            validate_chat_request(br#"{"message": "  Compare my i5 CPU to requirements \n"}"#).unwrap();
        assert_eq!(request.message, "Compare my i5 CPU to requirements");
        assert!(request.chat_history.is_empty());
    }

    #[test]
    fn test_short_messages_rejected() {
        assert!(invalid_message(r#"{"message": "hi"}"#).contains("at least 5 characters"));
        assert!(invalid_message(r#"{"message": "   hey    "}"#).contains("at least 5"));
        assert!(invalid_message(r#"{"message": ""}"#).contains("at least 5"));
    }

    #[test]
    fn test_exactly_five_chars_accepted() {
        assert!(validate_chat_request(br#"{"message": " hello "}"#).is_ok());
    }

    #[test]
    fn test_length_counts_characters_not_bytes() {
        // Four characters, twelve bytes.
        assert!(invalid_message(r#"{"message": "ÄÖÜß"}"#).contains("at least 5"));
    }

    #[test]
    fn test_non_string_message_rejected() {
        assert_eq!(invalid_message(r#"{"message": 12345}"#), MESSAGE_REQUIRED);
        assert_eq!(invalid_message(r#"{"message": ["hello world"]}"#), MESSAGE_REQUIRED);
        assert_eq!(invalid_message(r#"{"message": null}"#), MESSAGE_REQUIRED);
        assert_eq!(invalid_message(r#"{}"#), MESSAGE_REQUIRED);
    }

    #[test]
    fn test_malformed_body_rejected() {
        assert_eq!(invalid_message("not json"), INVALID_BODY);
        assert_eq!(invalid_message(r#""just a string""#), INVALID_BODY);
    }

    #[test]
    fn test_history_parsed_in_order() {
        let request = validate_chat_request(
            br#"{
                "message": "What about the GPU?",
                "chatHistory": [
                    {"role": "user", "content": "My CPU is an i5-8400"},
                    {"role": "model", "content": "Good enough."}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(request.chat_history.len(), 2);
        assert_eq!(request.chat_history[0].role, Role::User);
        assert_eq!(request.chat_history[1].content, "Good enough.");
    }

    #[test]
    fn test_null_history_is_empty() {
        let request =
            validate_chat_request(br#"{"message": "hello world", "chatHistory": null}"#).unwrap();
        assert!(request.chat_history.is_empty());
    }

    #[test]
    fn test_bad_history_rejected() {
        assert_eq!(
            invalid_message(r#"{"message": "hello world", "chatHistory": "oops"}"#),
            INVALID_HISTORY
        );
        assert_eq!(
            invalid_message(
                r#"{"message": "hello world", "chatHistory": [{"role": "assistant", "content": "x"}]}"#
            ),
            INVALID_HISTORY
        );
    }
}
