//! Personalization stage: generates email content per segment and variant.

use crate::{variant_labels, Stage, StageContext};
use async_trait::async_trait;
use mailflow_core::types::{CampaignRecord, EmailVariant, Segment, StageDelta, StageName, Strategy};
use mailflow_core::{MailflowError, MailflowResult};
use mailflow_llm::extract_json;
use tracing::info;

const SYSTEM_PROMPT: &str = "You are an email copywriter. Write one \
marketing email tailored to the given segment and writing style. Respond \
with a JSON object containing the keys: subject, greeting, body, cta, \
footer. The footer must include unsubscribe wording.";

/// Writing style per variant label.
fn style_instruction(label: &str) -> &'static str {
    match label {
        "A" => "Professional and direct: lead with the value proposition, no filler.",
        "B" => "Friendly and narrative: open with a short relatable story before the offer.",
        _ => "Concise with urgency: short sentences, a clear deadline, minimal preamble.",
    }
}

pub struct PersonalizationStage;

#[async_trait]
impl Stage for PersonalizationStage {
    fn name(&self) -> StageName {
        StageName::Personalization
    }

    async fn run(
        &self,
        record: &CampaignRecord,
        ctx: &StageContext<'_>,
    ) -> MailflowResult<StageDelta> {
        let labels = variant_labels(ctx.config.ab.max_variants);
        let mut variants = Vec::with_capacity(record.segments().len() * labels.len());

        for segment in record.segments() {
            for label in labels {
                let variant = self
                    .write_variant(record, segment, label, ctx)
                    .await
                    .map_err(|e| match e {
                        MailflowError::Format(msg) => MailflowError::Format(format!(
                            "variant {label} for segment '{}': {msg}",
                            segment.name
                        )),
                        other => other,
                    })?;
                variants.push(variant);
            }
        }

        info!(
            campaign_id = %record.campaign_id,
            variants = variants.len(),
            "Email variants generated"
        );
        Ok(StageDelta {
            email_variants: Some(variants),
            ..Default::default()
        })
    }
}

impl PersonalizationStage {
    async fn write_variant(
        &self,
        record: &CampaignRecord,
        segment: &Segment,
        label: &str,
        ctx: &StageContext<'_>,
    ) -> MailflowResult<EmailVariant> {
        let prompt = format!(
            "Campaign: {}\n\nStrategy:\n{}\n\nSegment: {} ({})\nStyle: {}\n",
            record.name,
            strategy_summary(record.strategy.as_ref()),
            segment.name,
            segment.description,
            style_instruction(label),
        );
        let reply = ctx
            .model
            .complete(SYSTEM_PROMPT, &prompt, ctx.config.llm.temperature_creative)
            .await?;

        let value = extract_json(&reply)
            .ok_or_else(|| MailflowError::Format("model output was not JSON".into()))?;
        let subject = value["subject"].as_str().unwrap_or("").trim().to_string();
        let body = value["body"].as_str().unwrap_or("").trim().to_string();
        if subject.is_empty() || body.is_empty() {
            return Err(MailflowError::Format(
                "model output missing subject or body".into(),
            ));
        }

        Ok(EmailVariant {
            id: label.to_string(),
            segment: segment.name.clone(),
            subject,
            greeting: value["greeting"].as_str().unwrap_or("").trim().to_string(),
            body,
            cta: value["cta"].as_str().unwrap_or("").trim().to_string(),
            footer: value["footer"].as_str().unwrap_or("").trim().to_string(),
        })
    }
}

fn strategy_summary(strategy: Option<&Strategy>) -> String {
    match strategy {
        Some(s) if !s.objectives.is_empty() => format!(
            "Objectives: {}\nKey messages: {}\nCalls to action: {}",
            s.objectives, s.key_messages, s.call_to_actions
        ),
        Some(s) => s.raw.clone(),
        None => "No strategy available.".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{member, TestEnv};
    use mailflow_core::types::{SegmentPolicy, SegmentationOutput};

    fn record_with_segments(names: &[&str]) -> CampaignRecord {
        let mut record = CampaignRecord::new("launch", "brief");
        record.segmentation = Some(SegmentationOutput {
            policy: SegmentPolicy::Exclusive,
            segments: names
                .iter()
                .map(|n| Segment {
                    name: n.to_string(),
                    description: format!("{n} members"),
                    members: vec![],
                })
                .collect(),
        });
        record
    }

    #[tokio::test]
    async fn writes_one_variant_per_segment_and_label() {
        let env = TestEnv::new(vec![member("a@x.com", "Ana")]);
        let record = record_with_segments(&["high", "low"]);
        let delta = PersonalizationStage.run(&record, &env.ctx()).await.unwrap();
        let variants = delta.email_variants.unwrap();
        assert_eq!(variants.len(), 4);
        let pairs: Vec<(&str, &str)> = variants
            .iter()
            .map(|v| (v.segment.as_str(), v.id.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![("high", "A"), ("high", "B"), ("low", "A"), ("low", "B")]
        );
        assert!(variants.iter().all(|v| !v.subject.is_empty()));
    }

    #[tokio::test]
    async fn three_variants_when_configured() {
        let mut env = TestEnv::new(vec![]);
        env.config.ab.max_variants = 3;
        let record = record_with_segments(&["all"]);
        let delta = PersonalizationStage.run(&record, &env.ctx()).await.unwrap();
        let ids: Vec<&str> = delta
            .email_variants
            .as_ref()
            .unwrap()
            .iter()
            .map(|v| v.id.as_str())
            .collect();
        assert_eq!(ids, vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn unparseable_reply_aborts_with_context() {
        let env = TestEnv::new(vec![]);
        env.model.push_text("Sure! Here's a lovely email for you.");
        let record = record_with_segments(&["high"]);
        let err = PersonalizationStage.run(&record, &env.ctx()).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("variant A"));
        assert!(message.contains("high"));
    }

    #[tokio::test]
    async fn model_failure_aborts() {
        let env = TestEnv::new(vec![]);
        env.model.push_error("quota exceeded");
        let record = record_with_segments(&["high"]);
        let err = PersonalizationStage.run(&record, &env.ctx()).await.unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));
    }
}
