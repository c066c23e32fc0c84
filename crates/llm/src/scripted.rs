//! Deterministic stand-in for [`ChatModel`]: replays queued replies, then
//! falls back to a generic canned completion. Used by tests and by offline
//! runs when no API key is configured.

use crate::ChatModel;
use async_trait::async_trait;
use mailflow_core::{MailflowError, MailflowResult};
use parking_lot::Mutex;
use std::collections::VecDeque;

enum Reply {
    Text(String),
    Error(String),
}

pub struct ScriptedModel {
    replies: Mutex<VecDeque<Reply>>,
    fallback: String,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            fallback: DEFAULT_COMPLETION.to_string(),
        }
    }

    /// Model for offline runs: every call succeeds with generic content
    /// that satisfies all stage parsers.
    pub fn offline() -> Self {
        Self::new()
    }

    /// Queue a successful reply for the next call.
    pub fn push_text(&self, text: impl Into<String>) {
        self.replies.lock().push_back(Reply::Text(text.into()));
    }

    /// Queue a failure for the next call.
    pub fn push_error(&self, message: impl Into<String>) {
        self.replies.lock().push_back(Reply::Error(message.into()));
    }
}

impl Default for ScriptedModel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(
        &self,
        _system: &str,
        _user: &str,
        _temperature: f32,
    ) -> MailflowResult<String> {
        match self.replies.lock().pop_front() {
            Some(Reply::Text(text)) => Ok(text),
            Some(Reply::Error(message)) => Err(MailflowError::ExternalService(message)),
            None => Ok(self.fallback.clone()),
        }
    }
}

const DEFAULT_COMPLETION: &str = r#"{
  "objectives": "Engage subscribers with a clear, relevant update",
  "target_audience": "All current subscribers",
  "key_messages": "A concise value message tailored to the segment",
  "email_sequence": "Single send",
  "call_to_actions": "Learn more",
  "success_metrics": "Opens and clicks",
  "subject": "An update from our team",
  "greeting": "Hi there,",
  "body": "We have news we think you will find useful. Take a look when you have a moment.",
  "cta": "Learn more on our site",
  "footer": "You are receiving this because you subscribed. Unsubscribe at any time."
}"#;
