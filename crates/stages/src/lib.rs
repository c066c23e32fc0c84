//! Pipeline stages.
//!
//! Each stage reads the immutable campaign record, does its work, and
//! returns a [`StageDelta`] with exactly the fields it owns filled in. The
//! orchestrator merges deltas; stages never mutate the record directly.

pub mod ab_testing;
pub mod deliverability;
pub mod personalization;
pub mod reporting;
pub mod segmentation;
pub mod sending;
pub mod strategy;

pub use ab_testing::AbTestingStage;
pub use deliverability::DeliverabilityStage;
pub use personalization::PersonalizationStage;
pub use reporting::ReportingStage;
pub use segmentation::SegmentationStage;
pub use sending::SendingStage;
pub use strategy::StrategyStage;

use async_trait::async_trait;
use mailflow_core::config::AppConfig;
use mailflow_core::types::{AudienceMember, CampaignRecord, StageDelta, StageName};
use mailflow_core::MailflowResult;
use mailflow_delivery::DeliveryProvider;
use mailflow_llm::ChatModel;
use mailflow_tracking::{ActivityLog, MessageIndex};
use std::sync::Arc;

/// Everything a stage may need beyond the record itself.
pub struct StageContext<'a> {
    pub audience: &'a [AudienceMember],
    pub config: &'a AppConfig,
    pub model: Arc<dyn ChatModel>,
    pub provider: Arc<dyn DeliveryProvider>,
    pub activity: Arc<ActivityLog>,
    pub messages: Arc<MessageIndex>,
}

#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> StageName;

    async fn run(
        &self,
        record: &CampaignRecord,
        ctx: &StageContext<'_>,
    ) -> MailflowResult<StageDelta>;
}

/// The fixed stage list, in execution order.
pub fn pipeline() -> Vec<Box<dyn Stage>> {
    vec![
        Box::new(StrategyStage),
        Box::new(SegmentationStage::default()),
        Box::new(PersonalizationStage),
        Box::new(DeliverabilityStage),
        Box::new(AbTestingStage),
        Box::new(SendingStage),
        Box::new(ReportingStage),
    ]
}

/// Variant labels in use for a run, driven by `ab.max_variants`.
pub(crate) fn variant_labels(max_variants: usize) -> &'static [&'static str] {
    if max_variants >= 3 {
        &["A", "B", "C"]
    } else {
        &["A", "B"]
    }
}
