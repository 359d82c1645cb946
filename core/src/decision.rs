use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::DecisionConfig;
use crate::history::{HistoryTurn, Role};
use crate::retry_logic::{with_retry, RetryConfig};

/// Responses starting with this are errors reported by the service itself.
pub const DECISION_ERROR_PREFIX: &str = "ERROR:";

const SCREENSHOT_MAX_DIM: u32 = 1280;
const SCREENSHOT_QUALITY: u8 = 75;

/// Next-action oracle. Receives the whole history each step and answers with
/// reasoning followed by one JSON action.
#[async_trait]
pub trait DecisionService: Send + Sync {
    async fn decide(&self, history: &[HistoryTurn]) -> Result<String>;
}

/// The error message carried by a response, if it is one.
pub fn error_message(response: &str) -> Option<&str> {
    let trimmed = response.trim_start();
    trimmed.starts_with(DECISION_ERROR_PREFIX).then_some(trimmed)
}

pub fn system_prompt(coordinate_scale: i32) -> String {
    format!(
        r#"You are an agent operating an Android phone to complete the user's goal.
Each turn you get a screenshot of the current screen and a short JSON summary.
Think briefly about what is on screen, then output exactly ONE action as JSON.

Coordinates are relative: [0, 0] is the top-left corner and [{scale}, {scale}] the bottom-right.

Actions:
- {{"action": "tap", "element": [x, y]}}
- {{"action": "double_tap", "element": [x, y]}}
- {{"action": "long_press", "element": [x, y], "duration_ms": 800}}
- {{"action": "swipe", "start": [x1, y1], "end": [x2, y2], "duration_ms": 500}}
- {{"action": "swipe", "element": [x, y], "direction": "up"}}  (the finger moves that way; "up" scrolls to content further down)
- {{"action": "type", "text": "..."}}  (an input field must be focused)
- {{"action": "launch", "app": "App Name"}}
- {{"action": "back"}}
- {{"action": "home"}}
- {{"action": "wait", "seconds": 2}}
- {{"action": "finish", "message": "what was done"}}

Prefer "launch" over hunting for icons. If an action failed, try something else.
When the goal is achieved, use "finish"."#,
        scale = coordinate_scale
    )
}

/// Converts history into chat-completions messages. Image turns become a
/// text part plus a JPEG data URL.
pub fn build_messages(system_prompt: &str, history: &[HistoryTurn]) -> Result<Vec<Value>> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(json!({ "role": "system", "content": system_prompt }));

    for turn in history {
        let text = turn.text.clone().unwrap_or_default();
        let content = match &turn.image {
            Some(image) if turn.role == Role::User => {
                let b64 = image.to_jpeg_base64(SCREENSHOT_MAX_DIM, SCREENSHOT_QUALITY)?;
                json!([
                    { "type": "text", "text": text },
                    {
                        "type": "image_url",
                        "image_url": { "url": format!("data:image/jpeg;base64,{}", b64) }
                    }
                ])
            }
            _ => Value::String(text),
        };
        messages.push(json!({ "role": turn.role.as_str(), "content": content }));
    }
    Ok(messages)
}

/// OpenAI-compatible chat-completions client.
pub struct HttpDecisionClient {
    client: Client,
    config: DecisionConfig,
    api_key: String,
    system_prompt: String,
    retry: RetryConfig,
}

impl HttpDecisionClient {
    pub fn new(config: DecisionConfig, coordinate_scale: i32) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .context("No decision API key (set PILOT_DECISION_API_KEY or OPENAI_API_KEY)")?;
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            config,
            api_key,
            system_prompt: system_prompt(coordinate_scale),
            retry: RetryConfig::default(),
        })
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    async fn post_once(&self, body: &Value) -> Result<String> {
        let res = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .context("Decision request failed")?;

        let status = res.status();
        if !status.is_success() {
            let error_text = res.text().await.unwrap_or_default();
            anyhow::bail!("API error {}: {}", status.as_u16(), error_text);
        }

        let res_json: Value = res.json().await.context("Decision response was not JSON")?;
        extract_content(&res_json)
    }
}

/// Pulls the assistant text out of a chat-completions body.
fn extract_content(body: &Value) -> Result<String> {
    let message = &body["choices"][0]["message"];
    if let Some(refusal) = message["refusal"].as_str() {
        anyhow::bail!("Model refused: {}", refusal);
    }
    message["content"]
        .as_str()
        .map(str::to_string)
        .with_context(|| format!("No content in decision response: {}", body))
}

#[async_trait]
impl DecisionService for HttpDecisionClient {
    async fn decide(&self, history: &[HistoryTurn]) -> Result<String> {
        let messages = build_messages(&self.system_prompt, history)?;
        let body = json!({
            "model": self.config.model,
            "messages": messages,
            "max_tokens": self.config.max_tokens,
            "temperature": 0.0
        });

        let content = with_retry(&self.retry, "decide", || self.post_once(&body))
            .await
            .map_err(|e| {
                warn!("[Decision] {}", e);
                e
            })?;
        debug!("[Decision] {} chars", content.len());
        Ok(content)
    }
}
