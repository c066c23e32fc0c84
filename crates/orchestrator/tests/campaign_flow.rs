//! End-to-end pipeline runs against scripted services.

use mailflow_core::config::AppConfig;
use mailflow_core::types::{AudienceMember, CampaignStatus, StageName};
use mailflow_core::MailflowError;
use mailflow_delivery::NoopProvider;
use mailflow_llm::ScriptedModel;
use mailflow_orchestrator::{CampaignRegistry, Orchestrator};
use mailflow_tracking::{ActivityLog, MessageIndex};
use std::collections::BTreeMap;
use std::sync::Arc;

struct Harness {
    orchestrator: Orchestrator,
    model: Arc<ScriptedModel>,
    registry: Arc<CampaignRegistry>,
    dir: tempfile::TempDir,
}

fn harness(mutate: impl FnOnce(&mut AppConfig)) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AppConfig::default();
    config.storage.data_dir = dir.path().join("data").display().to_string();
    config.storage.results_dir = dir.path().join("results").display().to_string();
    mutate(&mut config);

    let model = Arc::new(ScriptedModel::new());
    let registry = Arc::new(CampaignRegistry::new());
    let activity = Arc::new(ActivityLog::open(&config.storage.data_dir).unwrap());
    let orchestrator = Orchestrator::new(
        Arc::new(config),
        model.clone(),
        Arc::new(NoopProvider),
        activity,
        Arc::new(MessageIndex::new()),
        Arc::clone(&registry),
    );
    Harness {
        orchestrator,
        model,
        registry,
        dir,
    }
}

fn member(email: &str, score: f64) -> AudienceMember {
    AudienceMember {
        email: email.into(),
        name: "Member".into(),
        location: None,
        interests: vec![],
        engagement_score: Some(score),
        purchase_history: None,
        attributes: BTreeMap::new(),
    }
}

fn audience() -> Vec<AudienceMember> {
    vec![
        member("a@x.com", 9.0),
        member("b@x.com", 8.0),
        member("c@x.com", 5.0),
        member("d@x.com", 4.5),
        member("e@x.com", 1.0),
        member("f@x.com", 2.0),
    ]
}

#[tokio::test]
async fn offline_run_completes_and_writes_artifact() {
    let h = harness(|_| {});
    let record = h
        .orchestrator
        .run_new("spring-launch", "Announce the spring line", audience())
        .await
        .unwrap();

    assert_eq!(record.status, CampaignStatus::Completed);
    assert_eq!(record.stage, StageName::Completed);
    assert!(record.completed_at.is_some());
    assert!(record.error.is_none());
    assert!(record.strategy.is_some());

    // Three engagement bands, two variants each.
    let segments = record.segments();
    assert_eq!(segments.len(), 3);
    assert_eq!(record.email_variants.len(), 6);
    assert_eq!(record.assignments.len(), 3);
    let assigned: usize = record.assignments.iter().map(|a| a.total_members()).sum();
    assert_eq!(assigned, 6);

    assert_eq!(record.send_results.len(), 6);
    assert!(record.send_results.iter().all(|r| r.success));
    assert!(record.report.is_some());

    let artifact = h
        .dir
        .path()
        .join("results")
        .join(format!("{}.json", record.campaign_id));
    assert!(artifact.exists());

    // Registry snapshot matches the returned record.
    let snapshot = h.registry.snapshot(&record.campaign_id).unwrap();
    assert_eq!(snapshot.status, CampaignStatus::Completed);
}

#[tokio::test]
async fn stage_failure_halts_and_keeps_earlier_results() {
    let h = harness(|c| c.llm.use_llm_segmentation = false);
    h.model
        .push_text(r#"{"objectives": "Grow signups", "key_messages": "New plan"}"#);
    h.model.push_error("model exploded");

    let record = h
        .orchestrator
        .run_new("doomed", "brief", audience())
        .await
        .unwrap();

    assert_eq!(record.status, CampaignStatus::Error);
    assert_eq!(
        record.error.as_deref(),
        Some("External service error: model exploded")
    );
    assert_eq!(record.stage, StageName::Personalization);
    // Work done before the failure survives; later outputs stay unset.
    assert_eq!(record.strategy.as_ref().unwrap().objectives, "Grow signups");
    assert!(record.segmentation.is_some());
    assert!(record.email_variants.is_empty());
    assert!(record.assignments.is_empty());
    assert!(record.send_results.is_empty());
    assert!(record.completed_at.is_none());
}

#[tokio::test]
async fn cancelled_campaign_never_reaches_completed() {
    let h = harness(|_| {});
    let record = h.orchestrator.create("paused", "brief");
    h.registry.cancel(&record.campaign_id).unwrap();

    let finished = h
        .orchestrator
        .run(&record.campaign_id, audience())
        .await
        .unwrap();
    assert_eq!(finished.status, CampaignStatus::Cancelled);
    assert!(finished.strategy.is_none());
    assert!(finished.completed_at.is_none());
    assert!(!h.dir.path().join("results").exists());
}

#[tokio::test]
async fn running_an_unknown_campaign_is_not_found() {
    let h = harness(|_| {});
    let err = h.orchestrator.run("missing", audience()).await.unwrap_err();
    assert!(matches!(err, MailflowError::NotFound(_)));
}
