//! Sending stage: delivers each variant to its assigned group and records
//! vendor message ids for webhook correlation.

use crate::{Stage, StageContext};
use async_trait::async_trait;
use mailflow_core::types::{AudienceMember, CampaignRecord, StageDelta, StageName};
use mailflow_core::{MailflowError, MailflowResult};
use mailflow_delivery::send_batch;
use std::collections::HashMap;
use tracing::{info, warn};

pub struct SendingStage;

#[async_trait]
impl Stage for SendingStage {
    fn name(&self) -> StageName {
        StageName::Sending
    }

    async fn run(
        &self,
        record: &CampaignRecord,
        ctx: &StageContext<'_>,
    ) -> MailflowResult<StageDelta> {
        let by_email: HashMap<&str, &AudienceMember> = ctx
            .audience
            .iter()
            .map(|m| (m.email.as_str(), m))
            .collect();

        let mut all_results = Vec::new();
        for assignment in &record.assignments {
            for (label, emails) in &assignment.groups {
                if emails.is_empty() {
                    continue;
                }
                let variant = record.variant(label, &assignment.segment).ok_or_else(|| {
                    MailflowError::Validation(format!(
                        "no content for variant {label} in segment '{}'",
                        assignment.segment
                    ))
                })?;

                let mut recipients = Vec::with_capacity(emails.len());
                for email in emails {
                    match by_email.get(email.as_str()) {
                        Some(member) => recipients.push(*member),
                        None => warn!(
                            email = %email,
                            segment = %assignment.segment,
                            "Assigned member missing from audience, skipping"
                        ),
                    }
                }

                let results = send_batch(
                    ctx.provider.as_ref(),
                    variant,
                    &recipients,
                    &record.campaign_id,
                )
                .await?;
                for result in &results {
                    if let (true, Some(message_id)) = (result.success, result.message_id.as_deref())
                    {
                        ctx.messages.register(
                            message_id,
                            &record.campaign_id,
                            &result.variant,
                            &result.email,
                        );
                    }
                }
                all_results.extend(results);
            }
        }

        info!(
            campaign_id = %record.campaign_id,
            sent = all_results.iter().filter(|r| r.success).count(),
            failed = all_results.iter().filter(|r| !r.success).count(),
            "Sending complete"
        );
        Ok(StageDelta {
            send_results: Some(all_results),
            ..Default::default()
        })
    }
}
