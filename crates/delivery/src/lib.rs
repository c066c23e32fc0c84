//! Email delivery providers.
//!
//! Per-recipient failures are recorded in the returned results, never
//! raised; only a whole-batch failure (typically a bad credential) is
//! fatal to the campaign.

pub mod sendgrid;
pub mod smtp;

pub use sendgrid::SendGridProvider;
pub use smtp::SmtpProvider;

use async_trait::async_trait;
use mailflow_core::types::{AudienceMember, DeliveryResult, EmailVariant};
use mailflow_core::{MailflowError, MailflowResult};
use tracing::{info, warn};

#[async_trait]
pub trait DeliveryProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Attempt delivery to one recipient. Failures are reported in the
    /// result, not as an error.
    async fn send(
        &self,
        variant: &EmailVariant,
        recipient: &AudienceMember,
        campaign_id: &str,
    ) -> DeliveryResult;
}

/// Send one variant to a batch of recipients.
///
/// Returns `ExternalService` only when every send in a non-empty batch
/// failed, which indicates a provider-level problem rather than bad
/// recipients.
pub async fn send_batch(
    provider: &dyn DeliveryProvider,
    variant: &EmailVariant,
    recipients: &[&AudienceMember],
    campaign_id: &str,
) -> MailflowResult<Vec<DeliveryResult>> {
    let mut results = Vec::with_capacity(recipients.len());
    for recipient in recipients {
        let result = provider.send(variant, recipient, campaign_id).await;
        if result.success {
            metrics::counter!("delivery.sent", "provider" => provider.name()).increment(1);
        } else {
            metrics::counter!("delivery.failed", "provider" => provider.name()).increment(1);
            warn!(
                email = %result.email,
                variant = %result.variant,
                error = result.error.as_deref().unwrap_or("unknown"),
                "Delivery failed for recipient"
            );
        }
        results.push(result);
    }

    let sent = results.iter().filter(|r| r.success).count();
    if !results.is_empty() && sent == 0 {
        let first_error = results
            .iter()
            .find_map(|r| r.error.as_deref())
            .unwrap_or("unknown error");
        return Err(MailflowError::ExternalService(format!(
            "all {} sends via {} failed: {}",
            results.len(),
            provider.name(),
            first_error
        )));
    }

    info!(
        provider = provider.name(),
        campaign_id = %campaign_id,
        variant = %variant.id,
        sent,
        failed = results.len() - sent,
        "Batch send finished"
    );
    Ok(results)
}

/// Provider that records sends without performing any I/O. Used for dry
/// runs and tests.
pub struct NoopProvider;

#[async_trait]
impl DeliveryProvider for NoopProvider {
    fn name(&self) -> &'static str {
        "noop"
    }

    async fn send(
        &self,
        variant: &EmailVariant,
        recipient: &AudienceMember,
        _campaign_id: &str,
    ) -> DeliveryResult {
        DeliveryResult {
            email: recipient.email.clone(),
            variant: variant.id.clone(),
            success: true,
            status_code: None,
            message_id: Some(format!("noop-{}", uuid::Uuid::new_v4())),
            error: None,
        }
    }
}
