//! Strategy stage: turns the campaign brief into a structured strategy.

use crate::{Stage, StageContext};
use async_trait::async_trait;
use mailflow_core::types::{CampaignRecord, StageDelta, StageName, Strategy};
use mailflow_core::MailflowResult;
use mailflow_llm::extract_json;
use serde_json::Value;
use tracing::{info, warn};

const SYSTEM_PROMPT: &str = "You are an expert email marketing strategist. \
Given a campaign brief, produce a focused strategy. Respond with a JSON \
object containing the keys: objectives, target_audience, key_messages, \
email_sequence, call_to_actions, success_metrics.";

pub struct StrategyStage;

#[async_trait]
impl Stage for StrategyStage {
    fn name(&self) -> StageName {
        StageName::Strategy
    }

    async fn run(
        &self,
        record: &CampaignRecord,
        ctx: &StageContext<'_>,
    ) -> MailflowResult<StageDelta> {
        let prompt = format!(
            "Campaign name: {}\nAudience size: {}\n\nBrief:\n{}",
            record.name,
            ctx.audience.len(),
            record.brief
        );
        let reply = ctx
            .model
            .complete(SYSTEM_PROMPT, &prompt, ctx.config.llm.temperature_creative)
            .await?;

        let strategy = match extract_json(&reply) {
            Some(value) => strategy_from_json(&value, &reply),
            None => {
                // Model answered in prose; keep the text rather than fail.
                warn!(campaign_id = %record.campaign_id, "Strategy reply was not JSON, keeping raw text");
                Strategy {
                    raw: reply,
                    ..Default::default()
                }
            }
        };

        info!(
            campaign_id = %record.campaign_id,
            objectives = %strategy.objectives,
            "Strategy created"
        );
        Ok(StageDelta {
            strategy: Some(strategy),
            ..Default::default()
        })
    }
}

fn strategy_from_json(value: &Value, raw: &str) -> Strategy {
    Strategy {
        objectives: field(value, "objectives"),
        target_audience: field(value, "target_audience"),
        key_messages: field(value, "key_messages"),
        email_sequence: field(value, "email_sequence"),
        call_to_actions: field(value, "call_to_actions"),
        success_metrics: field(value, "success_metrics"),
        raw: raw.to_string(),
    }
}

/// Strategy fields may come back as strings or as arrays of strings.
fn field(value: &Value, key: &str) -> String {
    match &value[key] {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .collect::<Vec<_>>()
            .join("; "),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{member, TestEnv};

    #[tokio::test]
    async fn parses_structured_reply() {
        let env = TestEnv::new(vec![member("a@x.com", "Ana")]);
        env.model.push_text(
            r#"{"objectives": "Re-engage lapsed users", "key_messages": ["new features", "discount"]}"#,
        );
        let record = CampaignRecord::new("relaunch", "Bring back lapsed users");
        let delta = StrategyStage.run(&record, &env.ctx()).await.unwrap();
        let strategy = delta.strategy.unwrap();
        assert_eq!(strategy.objectives, "Re-engage lapsed users");
        assert_eq!(strategy.key_messages, "new features; discount");
        assert!(strategy.raw.contains("Re-engage"));
    }

    #[tokio::test]
    async fn prose_reply_lands_in_raw() {
        let env = TestEnv::new(vec![]);
        env.model
            .push_text("I would focus on re-engagement and a seasonal discount.");
        let record = CampaignRecord::new("relaunch", "brief");
        let delta = StrategyStage.run(&record, &env.ctx()).await.unwrap();
        let strategy = delta.strategy.unwrap();
        assert!(strategy.objectives.is_empty());
        assert!(strategy.raw.contains("seasonal discount"));
    }

    #[tokio::test]
    async fn model_failure_aborts() {
        let env = TestEnv::new(vec![]);
        env.model.push_error("rate limited");
        let record = CampaignRecord::new("relaunch", "brief");
        let err = StrategyStage.run(&record, &env.ctx()).await.unwrap_err();
        assert!(err.to_string().contains("rate limited"));
    }
}
