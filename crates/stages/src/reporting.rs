//! Reporting stage: assembles the final report from tracked activity.

use crate::{Stage, StageContext};
use async_trait::async_trait;
use mailflow_core::types::{CampaignRecord, StageDelta, StageName};
use mailflow_core::MailflowResult;
use tracing::info;

pub struct ReportingStage;

#[async_trait]
impl Stage for ReportingStage {
    fn name(&self) -> StageName {
        StageName::Reporting
    }

    async fn run(
        &self,
        record: &CampaignRecord,
        ctx: &StageContext<'_>,
    ) -> MailflowResult<StageDelta> {
        let events = ctx.activity.events_for(&record.campaign_id);
        let report = mailflow_reporting::summarize(record, &events);
        info!(
            campaign_id = %record.campaign_id,
            events = events.len(),
            winner = report.winner.as_deref().unwrap_or("none"),
            "Campaign report generated"
        );
        Ok(StageDelta {
            report: Some(report),
            ..Default::default()
        })
    }
}
