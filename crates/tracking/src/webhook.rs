//! Inbound delivery-vendor webhook processing.
//!
//! Each event must map back to a (campaign id, variant, recipient email)
//! triple, either through the `custom_args` echoed by the vendor or
//! through the message-id index populated at send time. Events that
//! resolve to neither are dropped with a warning, never an error.

use crate::ActivityLog;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use mailflow_core::types::{ActivityAction, ActivityEvent};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Maps vendor message ids to (campaign id, variant, recipient email).
/// Populated by the sending stage after send confirmation.
#[derive(Default)]
pub struct MessageIndex {
    entries: DashMap<String, (String, String, String)>,
}

impl MessageIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, message_id: &str, campaign_id: &str, variant: &str, email: &str) {
        self.entries.insert(
            message_id.to_string(),
            (campaign_id.to_string(), variant.to_string(), email.to_string()),
        );
    }

    pub fn resolve(&self, message_id: &str) -> Option<(String, String, String)> {
        self.entries.get(message_id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One event from the SendGrid event webhook payload (an array of these).
#[derive(Debug, Clone, Deserialize)]
pub struct SendGridEvent {
    pub event: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub sg_message_id: Option<String>,
    #[serde(default)]
    pub custom_args: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct WebhookSummary {
    pub received: usize,
    pub recorded: usize,
    pub ignored: usize,
    pub dropped: usize,
}

pub struct WebhookProcessor {
    log: Arc<ActivityLog>,
    index: Arc<MessageIndex>,
}

impl WebhookProcessor {
    pub fn new(log: Arc<ActivityLog>, index: Arc<MessageIndex>) -> Self {
        Self { log, index }
    }

    /// Process one webhook delivery. Unresolvable or unreadable events are
    /// dropped and counted; log-write failures are also counted as drops
    /// so a bad disk cannot fail the vendor's delivery.
    pub fn process(&self, events: Vec<SendGridEvent>) -> WebhookSummary {
        let mut summary = WebhookSummary {
            received: events.len(),
            ..Default::default()
        };

        for event in events {
            let action = match map_action(&event.event) {
                Some(action) => action,
                None => {
                    debug!(event_type = %event.event, "Ignoring webhook event type");
                    summary.ignored += 1;
                    continue;
                }
            };

            let Some((campaign_id, variant, email)) = self.resolve(&event) else {
                warn!(
                    event_type = %event.event,
                    email = %event.email,
                    message_id = event.sg_message_id.as_deref().unwrap_or(""),
                    "Dropping webhook event with unrecognized identifiers"
                );
                metrics::counter!("tracking.webhook_dropped").increment(1);
                summary.dropped += 1;
                continue;
            };

            let timestamp = event
                .timestamp
                .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
                .unwrap_or_else(Utc::now);
            let record = ActivityEvent {
                campaign_id,
                variant,
                email,
                action,
                timestamp,
                details: format!("sendgrid:{}", event.event),
            };
            match self.log.record(record) {
                Ok(()) => summary.recorded += 1,
                Err(e) => {
                    warn!(error = %e, "Failed to append webhook event to activity log");
                    summary.dropped += 1;
                }
            }
        }
        summary
    }

    fn resolve(&self, event: &SendGridEvent) -> Option<(String, String, String)> {
        let campaign = event.custom_args.get("campaign_id");
        let variant = event.custom_args.get("variant");
        if let (Some(campaign), Some(variant)) = (campaign, variant) {
            let email = event
                .custom_args
                .get("recipient_email")
                .unwrap_or(&event.email);
            if !email.is_empty() {
                return Some((campaign.clone(), variant.clone(), email.clone()));
            }
        }
        let message_id = event.sg_message_id.as_deref()?;
        self.index.resolve(message_id)
    }
}

/// Vendor event type -> recorded action. `delivered` and the rest carry no
/// engagement signal and are ignored; `dropped` counts as a bounce.
fn map_action(event_type: &str) -> Option<ActivityAction> {
    match event_type {
        "open" | "opened" => Some(ActivityAction::Open),
        "click" | "clicked" => Some(ActivityAction::Click),
        "bounce" | "bounced" | "dropped" => Some(ActivityAction::Bounce),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processor() -> (WebhookProcessor, Arc<ActivityLog>, Arc<MessageIndex>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(ActivityLog::open(dir.path()).unwrap());
        let index = Arc::new(MessageIndex::new());
        (
            WebhookProcessor::new(Arc::clone(&log), Arc::clone(&index)),
            log,
            index,
            dir,
        )
    }

    fn event_with_args(event: &str, campaign: &str, variant: &str, email: &str) -> SendGridEvent {
        let mut custom_args = BTreeMap::new();
        custom_args.insert("campaign_id".to_string(), campaign.to_string());
        custom_args.insert("variant".to_string(), variant.to_string());
        custom_args.insert("recipient_email".to_string(), email.to_string());
        SendGridEvent {
            event: event.to_string(),
            email: email.to_string(),
            timestamp: Some(1_700_000_000),
            sg_message_id: None,
            custom_args,
        }
    }

    #[test]
    fn records_opens_and_clicks_from_custom_args() {
        let (processor, log, _, _dir) = processor();
        let summary = processor.process(vec![
            event_with_args("open", "c1", "A", "a@x.com"),
            event_with_args("click", "c1", "B", "b@x.com"),
            event_with_args("delivered", "c1", "A", "a@x.com"),
        ]);
        assert_eq!(summary.recorded, 2);
        assert_eq!(summary.ignored, 1);
        assert_eq!(summary.dropped, 0);
        assert_eq!(log.events_for("c1").len(), 2);
    }

    #[test]
    fn falls_back_to_message_index() {
        let (processor, log, index, _dir) = processor();
        index.register("msg-42", "c9", "B", "carol@x.com");
        let summary = processor.process(vec![SendGridEvent {
            event: "open".into(),
            email: "carol@x.com".into(),
            timestamp: None,
            sg_message_id: Some("msg-42".into()),
            custom_args: BTreeMap::new(),
        }]);
        assert_eq!(summary.recorded, 1);
        let events = log.events_for("c9");
        assert_eq!(events[0].variant, "B");
    }

    #[test]
    fn unrecognized_identifiers_are_dropped_not_fatal() {
        let (processor, log, _, _dir) = processor();
        let summary = processor.process(vec![SendGridEvent {
            event: "click".into(),
            email: "ghost@x.com".into(),
            timestamp: None,
            sg_message_id: Some("unknown".into()),
            custom_args: BTreeMap::new(),
        }]);
        assert_eq!(summary.dropped, 1);
        assert_eq!(summary.recorded, 0);
        assert_eq!(log.total_events(), 0);
    }

    #[test]
    fn bounce_and_dropped_map_to_bounce() {
        let (processor, log, _, _dir) = processor();
        processor.process(vec![
            event_with_args("bounce", "c1", "A", "a@x.com"),
            event_with_args("dropped", "c1", "A", "b@x.com"),
        ]);
        let events = log.events_for("c1");
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.action == ActivityAction::Bounce));
    }
}
