use std::time::Duration;

use async_trait::async_trait;

use crate::errors::{DeskDriverError, DeskDriverResult};
use crate::provider::{CallParams, ModelProvider, StepContext};

const SYSTEM_PROMPT: &str = "You are DeskDriver: a careful, step-by-step desktop operator. \
Return ONLY a valid JSON object (no markdown fences) with these exact keys: plan, say, next_action, args, done. \
next_action must be one of: MOVE, CLICK, DOUBLE_CLICK, RIGHT_CLICK, TYPE, HOTKEY, SCROLL, DRAG, WAIT, NONE, CLICK_TEXT, UIA_INVOKE, UIA_SET_VALUE. \
args must be a JSON object. done must be boolean. Keep 'plan' concise (<=80 chars). \
You may use CLICK_TEXT {text,min_score?} when text targeting is available, and \
UIA_INVOKE/UIA_SET_VALUE with a selector when the control tree is available.";

/// Answer substituted when every attempt fails, so the loop keeps moving
/// and the user hears about the outage through `say`.
const FALLBACK_ANSWER: &str = r#"{"plan":"handle provider error","say":"Temporary provider error; please retry.","next_action":"NONE","args":{},"done":false}"#;

const MAX_ATTEMPTS: u32 = 3;
const RECENT_STEP_WINDOW: usize = 6;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Chat-completions provider for any OpenAI-compatible endpoint.
pub struct OpenAiCompatibleProvider {
    id: String,
    api_base: String,
    api_key: String,
    params: CallParams,
    client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(id: String, api_base: String, api_key: String, params: CallParams) -> Self {
        Self {
            id,
            api_base,
            api_key,
            params,
            client: reqwest::Client::new(),
        }
    }

    fn build_body(&self, ctx: &StepContext<'_>) -> serde_json::Value {
        let mut content = vec![serde_json::json!({
            "type": "text",
            "text": build_user_text(ctx),
        })];
        if let Some(url) = ctx.image_data_url {
            content.push(serde_json::json!({
                "type": "image_url",
                "image_url": { "url": url },
            }));
        }
        serde_json::json!({
            "model": self.params.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": content },
            ],
            "temperature": self.params.temperature,
            "max_tokens": self.params.max_output_tokens,
        })
    }

    async fn request(&self, body: &serde_json::Value) -> DeskDriverResult<String> {
        let response = self
            .client
            .post(&self.api_base)
            .bearer_auth(&self.api_key)
            .timeout(REQUEST_TIMEOUT)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let err_body = response.text().await.unwrap_or_default();
            return Err(DeskDriverError::Provider(format!("{status}: {err_body}")));
        }

        let json: serde_json::Value = response.json().await?;
        let content = json["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();
        if content.is_empty() {
            return Err(DeskDriverError::Provider("empty completion content".into()));
        }
        Ok(content)
    }
}

#[async_trait]
impl ModelProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.id
    }

    async fn produce_raw_answer(&self, ctx: &StepContext<'_>) -> DeskDriverResult<String> {
        let body = self.build_body(ctx);

        tracing::debug!(
            provider = %self.id,
            model = %self.params.model,
            has_image = ctx.image_data_url.is_some(),
            "sending model request"
        );
        tracing::debug!(
            body = %sanitized_for_log(&body),
            "request body (sanitized, base64 omitted)"
        );

        for attempt in 0..MAX_ATTEMPTS {
            match self.request(&body).await {
                Ok(content) => {
                    tracing::info!(
                        provider = %self.id,
                        content_len = content.len(),
                        "model answer received"
                    );
                    return Ok(content);
                }
                Err(e) => {
                    tracing::warn!(
                        provider = %self.id,
                        attempt,
                        error = %e,
                        "model request failed, backing off"
                    );
                    tokio::time::sleep(Duration::from_millis(500 * u64::from(attempt + 1)))
                        .await;
                }
            }
        }

        tracing::error!(provider = %self.id, "all model attempts failed, using fallback answer");
        Ok(FALLBACK_ANSWER.to_string())
    }
}

fn build_user_text(ctx: &StepContext<'_>) -> String {
    let tail_start = ctx.recent_steps.len().saturating_sub(RECENT_STEP_WINDOW);
    let recent = serde_json::Value::Array(ctx.recent_steps[tail_start..].to_vec());
    format!(
        "Instruction: {}\nLast observation: {}\nRecent steps: {}\nRespond with the required JSON object.",
        ctx.instruction, ctx.last_observation, recent
    )
}

// Image payloads dwarf everything else in the body, so logs get a copy with
// the data URLs replaced.
fn sanitized_for_log(body: &serde_json::Value) -> String {
    let mut log_body = body.clone();
    if let Some(msgs) = log_body.get_mut("messages").and_then(|m| m.as_array_mut()) {
        for msg in msgs {
            let Some(parts) = msg.get_mut("content").and_then(|c| c.as_array_mut()) else {
                continue;
            };
            for part in parts {
                if part.get("type").and_then(|t| t.as_str()) == Some("image_url") {
                    if let Some(url) = part.get_mut("image_url").and_then(|i| i.get_mut("url")) {
                        *url = serde_json::Value::String("<omitted_base64_image>".to_string());
                    }
                }
            }
        }
    }
    serde_json::to_string(&log_body).unwrap_or_default()
}
