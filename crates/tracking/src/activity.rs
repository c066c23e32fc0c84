//! Append-only activity log backed by `user_activity.csv`.
//!
//! Webhook deliveries arrive concurrently, so all appends funnel through
//! one locked writer; a record is fully written and flushed before the
//! lock is released, which keeps concurrent records from interleaving.
//! Events are never rewritten or deduplicated.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use mailflow_core::csvline::{parse_record, write_record};
use mailflow_core::types::{ActivityAction, ActivityEvent};
use mailflow_core::MailflowResult;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const HEADER: &str = "timestamp,campaign_id,variant,email,action,details";

pub struct ActivityLog {
    path: PathBuf,
    writer: Mutex<File>,
    /// In-memory mirror of the file, keyed by campaign id, serving reads.
    events: DashMap<String, Vec<ActivityEvent>>,
}

impl ActivityLog {
    /// Open (or create) the log under `data_dir` and replay existing
    /// events into the in-memory mirror.
    pub fn open(data_dir: impl AsRef<Path>) -> MailflowResult<Self> {
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join("user_activity.csv");

        let events = DashMap::new();
        let mut replayed = 0usize;
        let is_new = !path.exists();
        if !is_new {
            let reader = BufReader::new(File::open(&path)?);
            for (line_no, line) in reader.lines().enumerate() {
                let line = line?;
                if line_no == 0 || line.trim().is_empty() {
                    continue;
                }
                match parse_event_line(&line) {
                    Some(event) => {
                        events
                            .entry(event.campaign_id.clone())
                            .or_insert_with(Vec::new)
                            .push(event);
                        replayed += 1;
                    }
                    None => {
                        warn!(line = line_no + 1, "Skipping unparseable activity log line")
                    }
                }
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        if is_new {
            writeln!(file, "{HEADER}")?;
        }

        info!(path = %path.display(), replayed, "Activity log opened");
        Ok(Self {
            path,
            writer: Mutex::new(file),
            events,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event. The write is serialized and flushed under the
    /// writer lock before the mirror is updated.
    pub fn record(&self, event: ActivityEvent) -> MailflowResult<()> {
        let line = write_record(&[
            &event.timestamp.to_rfc3339(),
            &event.campaign_id,
            &event.variant,
            &event.email,
            event.action.as_str(),
            &event.details,
        ]);
        {
            let mut writer = self.writer.lock();
            writeln!(writer, "{line}")?;
            writer.flush()?;
        }
        metrics::counter!("tracking.events_recorded", "action" => event.action.as_str())
            .increment(1);
        self.events
            .entry(event.campaign_id.clone())
            .or_insert_with(Vec::new)
            .push(event);
        Ok(())
    }

    /// All recorded events for a campaign, in append order.
    pub fn events_for(&self, campaign_id: &str) -> Vec<ActivityEvent> {
        self.events
            .get(campaign_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    pub fn total_events(&self) -> usize {
        self.events.iter().map(|entry| entry.value().len()).sum()
    }
}

fn parse_event_line(line: &str) -> Option<ActivityEvent> {
    let fields = parse_record(line);
    if fields.len() != 6 {
        return None;
    }
    let timestamp = DateTime::parse_from_rfc3339(&fields[0])
        .ok()?
        .with_timezone(&Utc);
    let action = ActivityAction::parse(&fields[4])?;
    Some(ActivityEvent {
        campaign_id: fields[1].clone(),
        variant: fields[2].clone(),
        email: fields[3].clone(),
        action,
        timestamp,
        details: fields[5].clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn event(campaign: &str, email: &str, action: ActivityAction) -> ActivityEvent {
        ActivityEvent {
            campaign_id: campaign.into(),
            variant: "A".into(),
            email: email.into(),
            action,
            timestamp: Utc::now(),
            details: "test".into(),
        }
    }

    #[test]
    fn records_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let log = ActivityLog::open(dir.path()).unwrap();
        log.record(event("c1", "a@x.com", ActivityAction::Open)).unwrap();
        log.record(event("c1", "a@x.com", ActivityAction::Click)).unwrap();
        log.record(event("c2", "b@x.com", ActivityAction::Bounce)).unwrap();

        let events = log.events_for("c1");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].action, ActivityAction::Open);
        assert_eq!(log.events_for("c2").len(), 1);
        assert!(log.events_for("missing").is_empty());
    }

    #[test]
    fn replays_existing_log_on_open() {
        let dir = tempfile::tempdir().unwrap();
        {
            let log = ActivityLog::open(dir.path()).unwrap();
            log.record(event("c1", "a@x.com", ActivityAction::Open)).unwrap();
            log.record(event("c1", "b@x.com", ActivityAction::Click)).unwrap();
        }
        let reopened = ActivityLog::open(dir.path()).unwrap();
        assert_eq!(reopened.events_for("c1").len(), 2);
    }

    #[test]
    fn duplicate_events_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        let log = ActivityLog::open(dir.path()).unwrap();
        let open = event("c1", "a@x.com", ActivityAction::Open);
        log.record(open.clone()).unwrap();
        log.record(open).unwrap();
        assert_eq!(log.events_for("c1").len(), 2);
    }

    #[test]
    fn concurrent_appends_lose_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(ActivityLog::open(dir.path()).unwrap());

        let mut handles = Vec::new();
        for t in 0..8 {
            let log = Arc::clone(&log);
            handles.push(std::thread::spawn(move || {
                for i in 0..50 {
                    log.record(event("c1", &format!("user{t}-{i}@x.com"), ActivityAction::Open))
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(log.events_for("c1").len(), 400);

        // Every line in the file must parse cleanly: no interleaving.
        let reopened = ActivityLog::open(dir.path()).unwrap();
        assert_eq!(reopened.events_for("c1").len(), 400);
    }

    #[test]
    fn fields_with_commas_survive_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        {
            let log = ActivityLog::open(dir.path()).unwrap();
            let mut e = event("c1", "a@x.com", ActivityAction::Click);
            e.details = "url=https://x.com/a,b, source=webhook".into();
            log.record(e).unwrap();
        }
        let reopened = ActivityLog::open(dir.path()).unwrap();
        let events = reopened.events_for("c1");
        assert_eq!(events[0].details, "url=https://x.com/a,b, source=webhook");
    }
}
