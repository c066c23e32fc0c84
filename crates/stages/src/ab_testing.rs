//! A/B testing stage: deterministic variant assignment per segment.

use crate::{variant_labels, Stage, StageContext};
use async_trait::async_trait;
use mailflow_core::types::{CampaignRecord, StageDelta, StageName};
use mailflow_core::MailflowResult;
use mailflow_experiments::{assign, assign_n};
use tracing::info;

pub struct AbTestingStage;

#[async_trait]
impl Stage for AbTestingStage {
    fn name(&self) -> StageName {
        StageName::AbTesting
    }

    async fn run(
        &self,
        record: &CampaignRecord,
        ctx: &StageContext<'_>,
    ) -> MailflowResult<StageDelta> {
        let labels = variant_labels(ctx.config.ab.max_variants);
        // Salting with the campaign id keeps assignment stable within a
        // run but uncorrelated across campaigns.
        let salt = record.campaign_id.as_str();

        let mut assignments = Vec::with_capacity(record.segments().len());
        for segment in record.segments() {
            let assignment = if labels.len() == 2 {
                assign(segment, ctx.config.ab.split_ratio, salt)?
            } else {
                assign_n(segment, labels, salt)?
            };
            assignments.push(assignment);
        }

        info!(
            campaign_id = %record.campaign_id,
            segments = assignments.len(),
            variants = labels.len(),
            "Variant groups assigned"
        );
        Ok(StageDelta {
            assignments: Some(assignments),
            ..Default::default()
        })
    }
}
