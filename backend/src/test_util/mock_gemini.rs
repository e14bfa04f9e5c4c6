use serde_json::{json, Value};

/// Canned Gemini `generateContent` payloads for wiremock servers.
pub struct MockGeminiResponse;

impl MockGeminiResponse {
    pub const TOTAL_TOKENS: u32 = 42;

    pub fn text(content: &str) -> Value {
        json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [{ "text": content }]
                },
                "finishReason": "STOP"
            }],
            "usageMetadata": {
                "promptTokenCount": 30,
                "candidatesTokenCount": 12,
                "totalTokenCount": Self::TOTAL_TOKENS
            }
        })
    }

    /// A prompt rejected by the safety filters: no candidates at all.
    pub fn blocked(reason: &str) -> Value {
        json!({
            "promptFeedback": { "blockReason": reason }
        })
    }

    pub fn error_json(code: u16, message: &str) -> Value {
        let status = match code {
            400 => "INVALID_ARGUMENT",
            403 => "PERMISSION_DENIED",
            429 => "RESOURCE_EXHAUSTED",
            503 => "UNAVAILABLE",
            _ => "INTERNAL",
        };
        json!({
            "error": {
                "code": code,
                "message": message,
                "status": status
            }
        })
    }

    /// What Gemini answers when the API key is wrong.
    pub fn invalid_api_key() -> Value {
        json!({
            "error": {
                "code": 400,
                "message": "API key not valid. Please pass a valid API key.",
                "status": "INVALID_ARGUMENT",
                "details": [{
                    "@type": "type.googleapis.com/google.rpc.ErrorInfo",
                    "reason": "API_KEY_INVALID",
                    "domain": "googleapis.com"
                }]
            }
        })
    }
}
