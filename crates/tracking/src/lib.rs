//! Activity tracking: the append-only user activity log, the message-id
//! index, and inbound webhook event processing.

pub mod activity;
pub mod webhook;

pub use activity::ActivityLog;
pub use webhook::{MessageIndex, SendGridEvent, WebhookProcessor, WebhookSummary};
