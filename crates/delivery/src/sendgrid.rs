//! SendGrid delivery provider.
//!
//! Sends via the v3 mail API with `custom_args` carrying the campaign id,
//! variant and recipient email so inbound webhook events can be mapped
//! back to the run. Open and click tracking are enabled; sandbox mode
//! validates payloads without delivering.

use crate::DeliveryProvider;
use async_trait::async_trait;
use mailflow_core::config::SendGridConfig;
use mailflow_core::types::{AudienceMember, DeliveryResult, EmailVariant};
use mailflow_core::{MailflowError, MailflowResult};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

const MAIL_SEND_URL: &str = "https://api.sendgrid.com/v3/mail/send";

#[derive(Debug)]
pub struct SendGridProvider {
    http: reqwest::Client,
    config: SendGridConfig,
}

impl SendGridProvider {
    pub fn new(config: SendGridConfig, request_timeout: Duration) -> MailflowResult<Self> {
        if config.api_key.is_empty() {
            return Err(MailflowError::Configuration(
                "SendGrid API key is not configured".into(),
            ));
        }
        if config.from_email.is_empty() {
            return Err(MailflowError::Configuration(
                "SendGrid from_email is not configured".into(),
            ));
        }
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| MailflowError::Configuration(format!("HTTP client: {e}")))?;
        Ok(Self { http, config })
    }

    fn payload(
        &self,
        variant: &EmailVariant,
        recipient: &AudienceMember,
        campaign_id: &str,
    ) -> serde_json::Value {
        let body = variant.full_content();
        let html = format!("<html><body>{}</body></html>", body.replace('\n', "<br>"));
        json!({
            "personalizations": [{
                "to": [{"email": recipient.email, "name": recipient.name}],
                "custom_args": {
                    "campaign_id": campaign_id,
                    "variant": variant.id,
                    "recipient_email": recipient.email,
                }
            }],
            "from": {
                "email": self.config.from_email,
                "name": self.config.from_name,
            },
            "subject": variant.subject,
            "content": [
                {"type": "text/plain", "value": body},
                {"type": "text/html", "value": html},
            ],
            "tracking_settings": {
                "open_tracking": {"enable": true},
                "click_tracking": {"enable": true},
            },
            "mail_settings": {
                "sandbox_mode": {"enable": self.config.sandbox},
            },
        })
    }
}

#[async_trait]
impl DeliveryProvider for SendGridProvider {
    fn name(&self) -> &'static str {
        "sendgrid"
    }

    async fn send(
        &self,
        variant: &EmailVariant,
        recipient: &AudienceMember,
        campaign_id: &str,
    ) -> DeliveryResult {
        let payload = self.payload(variant, recipient, campaign_id);

        let response = match self
            .http
            .post(MAIL_SEND_URL)
            .bearer_auth(&self.config.api_key)
            .json(&payload)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                return DeliveryResult {
                    email: recipient.email.clone(),
                    variant: variant.id.clone(),
                    success: false,
                    status_code: None,
                    message_id: None,
                    error: Some(format!("request failed: {e}")),
                }
            }
        };

        let status = response.status();
        let message_id = response
            .headers()
            .get("x-message-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if status.is_success() {
            debug!(
                email = %recipient.email,
                variant = %variant.id,
                message_id = message_id.as_deref().unwrap_or(""),
                "SendGrid accepted message"
            );
            DeliveryResult {
                email: recipient.email.clone(),
                variant: variant.id.clone(),
                success: true,
                status_code: Some(status.as_u16()),
                message_id,
                error: None,
            }
        } else {
            let detail = response.text().await.unwrap_or_default();
            DeliveryResult {
                email: recipient.email.clone(),
                variant: variant.id.clone(),
                success: false,
                status_code: Some(status.as_u16()),
                message_id: None,
                error: Some(format!("SendGrid returned {status}: {detail}")),
            }
        }
    }
}
