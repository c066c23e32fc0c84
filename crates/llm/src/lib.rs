//! Chat-completion client used by the LLM-backed pipeline stages.

pub mod client;
pub mod scripted;

pub use client::OpenAiClient;
pub use scripted::ScriptedModel;

use async_trait::async_trait;
use mailflow_core::MailflowResult;

/// A model that turns a prompt into text. Stages depend on this trait so
/// they can run against the real API or a scripted stand-in.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        temperature: f32,
    ) -> MailflowResult<String>;
}

/// Extract a JSON value from model output. Handles fenced ```json blocks
/// and bare objects embedded in prose; returns `None` when nothing parses.
pub fn extract_json(text: &str) -> Option<serde_json::Value> {
    if let Some(fenced) = text.split("```json").nth(1) {
        let candidate = fenced.split("```").next().unwrap_or("").trim();
        if let Ok(value) = serde_json::from_str(candidate) {
            return Some(value);
        }
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}
