//! Shared registry of campaign runs.
//!
//! Readers (API handlers) take cheap snapshots; the runner holds the only
//! mutable accumulator and publishes a fresh snapshot after every stage.

use dashmap::DashMap;
use mailflow_core::types::CampaignRecord;
use mailflow_core::{MailflowError, MailflowResult};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct CampaignEntry {
    pub record: RwLock<CampaignRecord>,
    cancelled: AtomicBool,
}

impl CampaignEntry {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct CampaignRegistry {
    entries: DashMap<String, Arc<CampaignEntry>>,
}

impl CampaignRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: CampaignRecord) -> Arc<CampaignEntry> {
        let entry = Arc::new(CampaignEntry {
            record: RwLock::new(record.clone()),
            cancelled: AtomicBool::new(false),
        });
        self.entries.insert(record.campaign_id.clone(), Arc::clone(&entry));
        entry
    }

    pub fn get(&self, campaign_id: &str) -> MailflowResult<Arc<CampaignEntry>> {
        self.entries
            .get(campaign_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| MailflowError::NotFound(format!("campaign '{campaign_id}'")))
    }

    /// Current state of one campaign, cloned out of the lock.
    pub fn snapshot(&self, campaign_id: &str) -> MailflowResult<CampaignRecord> {
        Ok(self.get(campaign_id)?.record.read().clone())
    }

    pub fn cancel(&self, campaign_id: &str) -> MailflowResult<()> {
        self.get(campaign_id)?.cancel();
        Ok(())
    }

    /// Snapshots of every known campaign, newest first.
    pub fn list(&self) -> Vec<CampaignRecord> {
        let mut records: Vec<CampaignRecord> = self
            .entries
            .iter()
            .map(|e| e.value().record.read().clone())
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }
}
