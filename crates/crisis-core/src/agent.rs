//! Conversation agent adapters.
//!
//! - [`OpenAiAgent`]: OpenAI-compatible `/chat/completions` (OpenAI, OpenRouter, local
//!   servers). Asks for a JSON `{severity, message}` and parses the reply leniently.
//! - [`PlaceholderAgent`]: no model configured; always unavailable, so the
//!   coordinator uses [`fallback_prompt`].

use crate::classifier::EmergencyType;
use crate::config::AgentSettings;
use crate::error::{Collaborator, CrisisError, CrisisResult};
use crate::ports::{Assessment, ConversationAgent, Severity};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const SYSTEM_PROMPT: &str = "You are the assessment step of an emergency voice assistant. \
The user has described a possible emergency. Judge how serious it is and write one or two short, calm \
sentences to say to the user right now with the most important safety instruction. \
Respond with JSON only: {\"severity\": \"minor\" | \"serious\" | \"critical\", \"message\": \"...\"}. \
Do not use markdown. Do not promise that help is on the way.";

/// Deterministic prompt used when the agent fails or times out.
pub fn fallback_prompt(kind: EmergencyType) -> &'static str {
    match kind {
        EmergencyType::Fire => {
            "I'm detecting a fire emergency. If you can, get outside now and stay low, below the smoke."
        }
        EmergencyType::Medical => {
            "I'm detecting a medical emergency. Stay with the person and keep them still and comfortable."
        }
        EmergencyType::Danger => {
            "I'm detecting that you may be in danger. If you can, move somewhere safe and keep your phone with you."
        }
        EmergencyType::General => {
            "I'm detecting an emergency. What can you tell me about the situation?"
        }
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct RawAssessment {
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

pub struct OpenAiAgent {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiAgent {
    /// `None` when no API key is configured.
    pub fn from_settings(settings: &AgentSettings) -> Option<Self> {
        let key = settings.api_key.as_deref()?.trim();
        if key.is_empty() {
            return None;
        }
        Some(
            Self::new(key.to_string())
                .with_model(&settings.model)
                .with_base_url(&settings.base_url),
        )
    }

    pub fn new(api_key: String) -> Self {
        let defaults = AgentSettings::default();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            api_key: api_key.trim().to_string(),
            model: defaults.model,
            base_url: defaults.base_url,
            client,
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn user_prompt(emergency_type: EmergencyType, transcript: &[String]) -> String {
        let mut text = format!("Emergency type: {}\nWhat the user said:\n", emergency_type);
        for line in transcript {
            text.push_str("- ");
            text.push_str(line);
            text.push('\n');
        }
        text
    }
}

#[async_trait]
impl ConversationAgent for OpenAiAgent {
    fn name(&self) -> &str {
        "openai"
    }

    async fn assess(
        &self,
        emergency_type: EmergencyType,
        transcript: &[String],
    ) -> CrisisResult<Assessment> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: Self::user_prompt(emergency_type, transcript),
                },
            ],
            temperature: Some(0.2),
            max_tokens: Some(200),
        };

        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CrisisError::unavailable(Collaborator::Agent, e))?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(CrisisError::unavailable(
                Collaborator::Agent,
                format!("API error {}: {}", status, body),
            ));
        }

        let parsed: ChatResponse = res
            .json()
            .await
            .map_err(|e| CrisisError::unavailable(Collaborator::Agent, e))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        parse_assessment(&content)
            .ok_or_else(|| CrisisError::unavailable(Collaborator::Agent, "empty assessment"))
    }
}

/// Always unavailable. Used when no model is configured.
#[derive(Debug, Default)]
pub struct PlaceholderAgent;

#[async_trait]
impl ConversationAgent for PlaceholderAgent {
    fn name(&self) -> &str {
        "placeholder"
    }

    async fn assess(&self, _: EmergencyType, _: &[String]) -> CrisisResult<Assessment> {
        Err(CrisisError::unavailable(
            Collaborator::Agent,
            "no conversation model configured",
        ))
    }
}

static BOLD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*(.*?)\*\*").unwrap_or_else(|e| panic!("{}", e)));
static ITALIC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*(.*?)\*").unwrap_or_else(|e| panic!("{}", e)));
static CODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`(.*?)`").unwrap_or_else(|e| panic!("{}", e)));

/// Strips markdown emphasis and code marks so the text can be spoken.
pub fn strip_markdown(text: &str) -> String {
    let text = BOLD_RE.replace_all(text, "$1");
    let text = ITALIC_RE.replace_all(&text, "$1");
    let text = CODE_RE.replace_all(&text, "$1");
    text.replace(['*', '`'], "").trim().to_string()
}

/// Reads `{severity, message}` out of a model reply.
///
/// Tolerates code fences and prose around the JSON. A reply that is not JSON is
/// taken as the message itself. Missing or unknown severity counts as critical.
/// Returns `None` when there is no usable message.
pub fn parse_assessment(content: &str) -> Option<Assessment> {
    let trimmed = content.trim();
    let json_slice = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => Some(&trimmed[start..=end]),
        _ => None,
    };
    let raw = json_slice.and_then(|s| serde_json::from_str::<RawAssessment>(s).ok());

    let (severity, message) = match raw {
        Some(raw) => {
            let severity = raw
                .severity
                .as_deref()
                .and_then(|s| s.parse::<Severity>().ok())
                .unwrap_or(Severity::Critical);
            (severity, raw.message.unwrap_or_default())
        }
        None => (Severity::Critical, trimmed.to_string()),
    };

    let message = strip_markdown(&message);
    if message.is_empty() {
        return None;
    }
    Some(Assessment { severity, message })
}
