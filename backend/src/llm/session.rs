//! Per-request chat session assembly.

use quizchat_common::{ChatRequest, Turn};
use serde::Serialize;

pub const TEMPERATURE: f32 = 0.7;
pub const TOP_P: f32 = 0.8;
pub const TOP_K: u32 = 40;

/// Sampling parameters sent with every generation call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
}

impl GenerationConfig {
    pub fn new(max_output_tokens: u32) -> Self {
        Self {
            max_output_tokens,
            temperature: TEMPERATURE,
            top_p: TOP_P,
            top_k: TOP_K,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HarmCategory {
    #[serde(rename = "HARM_CATEGORY_HARASSMENT")]
    Harassment,
    #[serde(rename = "HARM_CATEGORY_HATE_SPEECH")]
    HateSpeech,
    #[serde(rename = "HARM_CATEGORY_SEXUALLY_EXPLICIT")]
    SexuallyExplicit,
    #[serde(rename = "HARM_CATEGORY_DANGEROUS_CONTENT")]
    DangerousContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HarmBlockThreshold {
    BlockMediumAndAbove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SafetySetting {
    pub category: HarmCategory,
    pub threshold: HarmBlockThreshold,
}

/// Safety filters applied identically to every request.
pub const SAFETY_POLICY: &[SafetySetting] = &[
    SafetySetting {
        category: HarmCategory::Harassment,
        threshold: HarmBlockThreshold::BlockMediumAndAbove,
    },
    SafetySetting {
        category: HarmCategory::HateSpeech,
        threshold: HarmBlockThreshold::BlockMediumAndAbove,
    },
    SafetySetting {
        category: HarmCategory::SexuallyExplicit,
        threshold: HarmBlockThreshold::BlockMediumAndAbove,
    },
    SafetySetting {
        category: HarmCategory::DangerousContent,
        threshold: HarmBlockThreshold::BlockMediumAndAbove,
    },
];

/// Build the system instruction for a message.
///
/// The output depends only on `message`.
pub fn system_instruction(message: &str) -> String {
    format!(
        "You are the hardware advisor of a PC build quiz. Players describe their \
computer components and ask whether they meet the requirements of a game or \
application, or how two components compare.\n\
\n\
Rules:\n\
- Start the answer with \u{2705} when the hardware is compatible, \u{26a0}\u{fe0f} when it \
is borderline and \u{274c} when it is not.\n\
- Name the specific component that limits performance, if any.\n\
- Keep the answer under 200 words and use short bullet points.\n\
- If the question is not about computer hardware, politely steer back to it.\n\
\n\
Question to analyze:\n\
\"\"\"\n\
{}\n\
\"\"\"",
        message
    )
}

/// Everything needed to make one upstream call, built fresh per request.
#[derive(Debug, Clone)]
pub struct ChatSession {
    pub model: String,
    pub system_instruction: String,
    /// Prior turns, oldest first.
    pub history: Vec<Turn>,
    pub generation_config: GenerationConfig,
    pub safety_settings: &'static [SafetySetting],
}

impl ChatSession {
    pub fn new(model: impl Into<String>, request: &ChatRequest, max_output_tokens: u32) -> Self {
        Self {
            model: model.into(),
            system_instruction: system_instruction(&request.message),
            history: request.chat_history.clone(),
            generation_config: GenerationConfig::new(max_output_tokens),
            safety_settings: SAFETY_POLICY,
        }
    }
}
