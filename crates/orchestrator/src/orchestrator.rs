//! Drives one campaign through the fixed stage pipeline.
//!
//! The runner owns the only mutable [`CampaignRecord`]; stages see an
//! immutable snapshot and return deltas. A stage error halts the run with
//! the message preserved verbatim. There are no retries and no rollback of
//! deltas already merged.

use crate::registry::{CampaignEntry, CampaignRegistry};
use chrono::Utc;
use mailflow_core::config::AppConfig;
use mailflow_core::types::{AudienceMember, CampaignRecord, CampaignStatus, StageName};
use mailflow_core::MailflowResult;
use mailflow_delivery::DeliveryProvider;
use mailflow_llm::ChatModel;
use mailflow_stages::{pipeline, Stage, StageContext};
use mailflow_tracking::{ActivityLog, MessageIndex};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct Orchestrator {
    config: Arc<AppConfig>,
    model: Arc<dyn ChatModel>,
    provider: Arc<dyn DeliveryProvider>,
    activity: Arc<ActivityLog>,
    messages: Arc<MessageIndex>,
    registry: Arc<CampaignRegistry>,
    stages: Vec<Box<dyn Stage>>,
}

impl Orchestrator {
    pub fn new(
        config: Arc<AppConfig>,
        model: Arc<dyn ChatModel>,
        provider: Arc<dyn DeliveryProvider>,
        activity: Arc<ActivityLog>,
        messages: Arc<MessageIndex>,
        registry: Arc<CampaignRegistry>,
    ) -> Self {
        Self {
            config,
            model,
            provider,
            activity,
            messages,
            registry,
            stages: pipeline(),
        }
    }

    pub fn registry(&self) -> &Arc<CampaignRegistry> {
        &self.registry
    }

    /// Register a new campaign in `pending` state without starting it.
    pub fn create(&self, name: impl Into<String>, brief: impl Into<String>) -> CampaignRecord {
        let record = CampaignRecord::new(name, brief);
        self.registry.insert(record.clone());
        info!(campaign_id = %record.campaign_id, name = %record.name, "Campaign created");
        record
    }

    /// Run a previously created campaign to completion. The returned record
    /// carries the terminal status; stage failures are reported in it, not
    /// as an `Err`.
    pub async fn run(
        &self,
        campaign_id: &str,
        audience: Vec<AudienceMember>,
    ) -> MailflowResult<CampaignRecord> {
        let entry = self.registry.get(campaign_id)?;
        let mut record = entry.record.read().clone();
        record.status = CampaignStatus::Running;
        publish(&entry, &record);

        let ctx = StageContext {
            audience: &audience,
            config: self.config.as_ref(),
            model: Arc::clone(&self.model),
            provider: Arc::clone(&self.provider),
            activity: Arc::clone(&self.activity),
            messages: Arc::clone(&self.messages),
        };

        for stage in &self.stages {
            if entry.is_cancelled() {
                warn!(campaign_id = %record.campaign_id, stage = stage.name().as_str(), "Campaign cancelled");
                metrics::counter!("campaigns.cancelled").increment(1);
                record.status = CampaignStatus::Cancelled;
                publish(&entry, &record);
                return Ok(record);
            }

            record.stage = stage.name();
            info!(campaign_id = %record.campaign_id, stage = stage.name().as_str(), "Stage starting");
            match stage.run(&record, &ctx).await {
                Ok(delta) => {
                    record.apply(delta);
                    publish(&entry, &record);
                }
                Err(e) => {
                    error!(
                        campaign_id = %record.campaign_id,
                        stage = stage.name().as_str(),
                        error = %e,
                        "Stage failed, halting campaign"
                    );
                    metrics::counter!("campaigns.failed", "stage" => stage.name().as_str())
                        .increment(1);
                    record.set_error(e.to_string());
                    publish(&entry, &record);
                    return Ok(record);
                }
            }
        }

        record.stage = StageName::Completed;
        record.status = CampaignStatus::Completed;
        record.completed_at = Some(Utc::now());
        if let Err(e) = self.write_artifact(&record) {
            record.set_error(format!("result artifact write failed: {e}"));
        } else {
            metrics::counter!("campaigns.completed").increment(1);
            info!(campaign_id = %record.campaign_id, "Campaign completed");
        }
        publish(&entry, &record);
        Ok(record)
    }

    /// Convenience for one-shot CLI runs.
    pub async fn run_new(
        &self,
        name: impl Into<String>,
        brief: impl Into<String>,
        audience: Vec<AudienceMember>,
    ) -> MailflowResult<CampaignRecord> {
        let record = self.create(name, brief);
        self.run(&record.campaign_id, audience).await
    }

    fn write_artifact(&self, record: &CampaignRecord) -> MailflowResult<PathBuf> {
        let dir = PathBuf::from(&self.config.storage.results_dir);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.json", record.campaign_id));
        let json = serde_json::to_string_pretty(record)?;
        std::fs::write(&path, json)?;
        info!(path = %path.display(), "Result artifact written");
        Ok(path)
    }
}

fn publish(entry: &Arc<CampaignEntry>, record: &CampaignRecord) {
    *entry.record.write() = record.clone();
}
