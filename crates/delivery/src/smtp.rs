//! SMTP fallback provider, used when no vendor credential is configured.

use crate::DeliveryProvider;
use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use mailflow_core::config::SmtpConfig;
use mailflow_core::types::{AudienceMember, DeliveryResult, EmailVariant};
use mailflow_core::{MailflowError, MailflowResult};
use tracing::debug;

#[derive(Debug)]
pub struct SmtpProvider {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpProvider {
    pub fn new(config: &SmtpConfig) -> MailflowResult<Self> {
        if config.sender_email.is_empty() {
            return Err(MailflowError::Configuration(
                "SMTP sender_email is not configured".into(),
            ));
        }
        let from: Mailbox = format!("{} <{}>", config.sender_name, config.sender_email)
            .parse()
            .map_err(|e| {
                MailflowError::Configuration(format!(
                    "invalid SMTP sender address '{}': {e}",
                    config.sender_email
                ))
            })?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.server)
            .map_err(|e| {
                MailflowError::Configuration(format!("SMTP relay '{}': {e}", config.server))
            })?
            .port(config.port);
        if !config.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl DeliveryProvider for SmtpProvider {
    fn name(&self) -> &'static str {
        "smtp"
    }

    async fn send(
        &self,
        variant: &EmailVariant,
        recipient: &AudienceMember,
        _campaign_id: &str,
    ) -> DeliveryResult {
        let failure = |error: String| DeliveryResult {
            email: recipient.email.clone(),
            variant: variant.id.clone(),
            success: false,
            status_code: None,
            message_id: None,
            error: Some(error),
        };

        let to: Mailbox = match format!("{} <{}>", recipient.name, recipient.email).parse() {
            Ok(mailbox) => mailbox,
            Err(e) => return failure(format!("invalid recipient address: {e}")),
        };

        let body = variant.full_content();
        let html = format!("<html><body>{}</body></html>", body.replace('\n', "<br>"));
        let message = match Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(&variant.subject)
            .multipart(MultiPart::alternative_plain_html(body, html))
        {
            Ok(message) => message,
            Err(e) => return failure(format!("message build failed: {e}")),
        };

        match self.transport.send(message).await {
            Ok(_) => {
                debug!(email = %recipient.email, variant = %variant.id, "SMTP accepted message");
                DeliveryResult {
                    email: recipient.email.clone(),
                    variant: variant.id.clone(),
                    success: true,
                    status_code: None,
                    message_id: Some(format!("smtp-{}", uuid::Uuid::new_v4())),
                    error: None,
                }
            }
            Err(e) => failure(format!("SMTP send failed: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_sender_is_configuration_error() {
        let config = SmtpConfig {
            sender_email: String::new(),
            ..Default::default()
        };
        assert!(matches!(
            SmtpProvider::new(&config).unwrap_err(),
            MailflowError::Configuration(_)
        ));
    }

    #[test]
    fn builds_transport_for_valid_config() {
        let config = SmtpConfig {
            server: "smtp.example.com".into(),
            port: 587,
            username: "user".into(),
            password: "pass".into(),
            sender_email: "news@example.com".into(),
            sender_name: "Example News".into(),
        };
        assert!(SmtpProvider::new(&config).is_ok());
    }
}
