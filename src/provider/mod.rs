//! Model providers. One capability trait, one OpenAI-compatible
//! implementation; downstream decoding treats every answer as opaque text.

mod openai_compatible;

pub use openai_compatible::OpenAiCompatibleProvider;

use async_trait::async_trait;

use crate::errors::DeskDriverResult;

/// Everything a provider sees for one step.
#[derive(Debug, Clone)]
pub struct StepContext<'a> {
    pub instruction: &'a str,
    pub last_observation: &'a str,
    /// Rendered records of recent steps, oldest first.
    pub recent_steps: &'a [serde_json::Value],
    /// JPEG data URL of the current frame.
    pub image_data_url: Option<&'a str>,
}

/// Request-shaping knobs, taken from configuration.
#[derive(Debug, Clone)]
pub struct CallParams {
    pub model: String,
    pub temperature: f64,
    pub max_output_tokens: u32,
}

/// A reasoning model proposing the next step. The return value is opaque
/// text; wrapper markers and fences are the decoder's concern, never ours.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn produce_raw_answer(&self, ctx: &StepContext<'_>) -> DeskDriverResult<String>;
}
