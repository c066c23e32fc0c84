//! Segmentation stage: rule-based partition of the audience, with an
//! optional LLM pass that renames and annotates the resulting segments.

use crate::{Stage, StageContext};
use async_trait::async_trait;
use mailflow_core::types::{
    AudienceMember, CampaignRecord, Segment, SegmentPolicy, SegmentationOutput, StageDelta,
    StageName,
};
use mailflow_core::MailflowResult;
use mailflow_llm::extract_json;
use std::collections::BTreeMap;
use tracing::{info, warn};

const REFINE_SYSTEM_PROMPT: &str = "You are a marketing analyst. Given \
audience segments and a sample of member rows, suggest a better name and a \
one-sentence description for each segment. Respond with a JSON object \
{\"segments\": [{\"name\": ..., \"description\": ...}, ...]} with exactly \
one entry per input segment, in the same order.";

#[derive(Default)]
pub struct SegmentationStage {
    policy: SegmentPolicy,
}

impl SegmentationStage {
    pub fn new(policy: SegmentPolicy) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Stage for SegmentationStage {
    fn name(&self) -> StageName {
        StageName::Segmentation
    }

    async fn run(
        &self,
        record: &CampaignRecord,
        ctx: &StageContext<'_>,
    ) -> MailflowResult<StageDelta> {
        let mut segments = partition(ctx.audience);
        if self.policy == SegmentPolicy::Overlapping {
            segments.extend(overlay_groups(ctx.audience));
        }

        if ctx.config.llm.use_llm_segmentation && !segments.is_empty() {
            match refine(&segments, ctx, record).await {
                Ok(refined) => segments = refined,
                Err(e) => {
                    // Refinement is best-effort; the rule-based result stands.
                    warn!(
                        campaign_id = %record.campaign_id,
                        error = %e,
                        "Segment refinement failed, keeping rule-based segments"
                    );
                }
            }
        }

        info!(
            campaign_id = %record.campaign_id,
            segments = segments.len(),
            policy = ?self.policy,
            "Audience segmented"
        );
        Ok(StageDelta {
            segmentation: Some(SegmentationOutput {
                policy: self.policy,
                segments,
            }),
            ..Default::default()
        })
    }
}

/// Exclusive partition: engagement bands when any member is scored, else
/// location groups, else one segment holding everyone. Members without a
/// score count as zero.
fn partition(audience: &[AudienceMember]) -> Vec<Segment> {
    if audience.is_empty() {
        return Vec::new();
    }

    if audience.iter().any(|m| m.engagement_score.is_some()) {
        let mut high = Vec::new();
        let mut medium = Vec::new();
        let mut low = Vec::new();
        for member in audience {
            let score = member.engagement_score.unwrap_or(0.0);
            if score >= 7.0 {
                high.push(member.email.clone());
            } else if score >= 4.0 {
                medium.push(member.email.clone());
            } else {
                low.push(member.email.clone());
            }
        }
        return [
            ("high-engagement", "Members with engagement score 7 or above", high),
            ("medium-engagement", "Members with engagement score between 4 and 7", medium),
            ("low-engagement", "Members with engagement score below 4, or unscored", low),
        ]
        .into_iter()
        .filter(|(_, _, members)| !members.is_empty())
        .map(|(name, description, members)| Segment {
            name: name.to_string(),
            description: description.to_string(),
            members,
        })
        .collect();
    }

    if audience.iter().any(|m| m.location.is_some()) {
        let mut by_location: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for member in audience {
            let key = member
                .location
                .as_deref()
                .map(|l| l.trim().to_lowercase())
                .filter(|l| !l.is_empty())
                .unwrap_or_else(|| "other".to_string());
            by_location.entry(key).or_default().push(member.email.clone());
        }
        return by_location
            .into_iter()
            .map(|(location, members)| Segment {
                name: format!("location-{location}"),
                description: format!("Members located in {location}"),
                members,
            })
            .collect();
    }

    vec![Segment {
        name: "all-members".to_string(),
        description: "All audience members".to_string(),
        members: audience.iter().map(|m| m.email.clone()).collect(),
    }]
}

/// Extra non-exclusive groupings layered on top of the partition when the
/// overlapping policy is active.
fn overlay_groups(audience: &[AudienceMember]) -> Vec<Segment> {
    let mut by_interest: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for member in audience {
        for interest in &member.interests {
            let key = interest.trim().to_lowercase();
            if key.is_empty() {
                continue;
            }
            by_interest.entry(key).or_default().push(member.email.clone());
        }
    }
    by_interest
        .into_iter()
        .map(|(interest, members)| Segment {
            name: format!("interest-{interest}"),
            description: format!("Members interested in {interest}"),
            members,
        })
        .collect()
}

async fn refine(
    segments: &[Segment],
    ctx: &StageContext<'_>,
    record: &CampaignRecord,
) -> MailflowResult<Vec<Segment>> {
    let sample: Vec<String> = ctx
        .audience
        .iter()
        .take(ctx.config.llm.segmentation_sample_size)
        .map(|m| {
            format!(
                "{} | location: {} | score: {} | interests: {}",
                m.email,
                m.location.as_deref().unwrap_or("-"),
                m.engagement_score.map(|s| s.to_string()).unwrap_or_else(|| "-".into()),
                m.interests.join("/")
            )
        })
        .collect();
    let summary: Vec<String> = segments
        .iter()
        .map(|s| format!("{} ({} members): {}", s.name, s.members.len(), s.description))
        .collect();
    let prompt = format!(
        "Campaign: {}\n\nSegments:\n{}\n\nSample rows:\n{}",
        record.name,
        summary.join("\n"),
        sample.join("\n")
    );

    let reply = ctx
        .model
        .complete(REFINE_SYSTEM_PROMPT, &prompt, ctx.config.llm.temperature_analysis)
        .await?;
    let value = extract_json(&reply).ok_or_else(|| {
        mailflow_core::MailflowError::Format("segment refinement reply was not JSON".into())
    })?;
    let entries = value["segments"].as_array().ok_or_else(|| {
        mailflow_core::MailflowError::Format("segment refinement reply missing 'segments'".into())
    })?;

    // Membership is never changed by refinement, only names and blurbs.
    let mut refined = segments.to_vec();
    for (segment, entry) in refined.iter_mut().zip(entries) {
        if let Some(name) = entry["name"].as_str() {
            if !name.trim().is_empty() {
                segment.name = name.trim().to_string();
            }
        }
        if let Some(description) = entry["description"].as_str() {
            segment.description = description.to_string();
        }
    }
    Ok(refined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{member, scored, TestEnv};
    use std::collections::BTreeSet;

    fn located(email: &str, location: &str) -> AudienceMember {
        AudienceMember {
            location: Some(location.into()),
            ..member(email, "Member")
        }
    }

    #[tokio::test]
    async fn engagement_bands_partition_exclusively() {
        let mut env = TestEnv::new(vec![
            scored("hi@x.com", 9.0),
            scored("mid@x.com", 5.5),
            scored("edge@x.com", 7.0),
            scored("low@x.com", 1.0),
            member("unscored@x.com", "No Score"),
        ]);
        env.config.llm.use_llm_segmentation = false;
        let record = CampaignRecord::new("c", "b");
        let delta = SegmentationStage::default().run(&record, &env.ctx()).await.unwrap();
        let output = delta.segmentation.unwrap();

        assert_eq!(output.policy, SegmentPolicy::Exclusive);
        let by_name: BTreeMap<&str, &Segment> = output
            .segments
            .iter()
            .map(|s| (s.name.as_str(), s))
            .collect();
        assert_eq!(by_name["high-engagement"].members, vec!["hi@x.com", "edge@x.com"]);
        assert_eq!(by_name["medium-engagement"].members, vec!["mid@x.com"]);
        assert_eq!(
            by_name["low-engagement"].members,
            vec!["low@x.com", "unscored@x.com"]
        );

        // Exclusive policy: union covers the audience, no member twice.
        let mut seen = BTreeSet::new();
        for segment in &output.segments {
            for email in &segment.members {
                assert!(seen.insert(email.clone()), "{email} appears twice");
            }
        }
        assert_eq!(seen.len(), env.audience.len());
    }

    #[tokio::test]
    async fn falls_back_to_location_then_catch_all() {
        let mut env = TestEnv::new(vec![
            located("a@x.com", "Berlin"),
            located("b@x.com", "berlin "),
            member("c@x.com", "Nowhere"),
        ]);
        env.config.llm.use_llm_segmentation = false;
        let record = CampaignRecord::new("c", "b");
        let delta = SegmentationStage::default().run(&record, &env.ctx()).await.unwrap();
        let segments = delta.segmentation.unwrap().segments;
        let names: Vec<&str> = segments.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["location-berlin", "location-other"]);
        assert_eq!(segments[0].members.len(), 2);

        let mut env = TestEnv::new(vec![member("a@x.com", "A"), member("b@x.com", "B")]);
        env.config.llm.use_llm_segmentation = false;
        let delta = SegmentationStage::default().run(&record, &env.ctx()).await.unwrap();
        let segments = delta.segmentation.unwrap().segments;
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].name, "all-members");
        assert_eq!(segments[0].members.len(), 2);
    }

    #[tokio::test]
    async fn overlapping_policy_adds_interest_groups() {
        let mut audience = vec![scored("a@x.com", 8.0), scored("b@x.com", 2.0)];
        audience[0].interests = vec!["Hiking".into()];
        audience[1].interests = vec!["hiking".into(), "cooking".into()];
        let mut env = TestEnv::new(audience);
        env.config.llm.use_llm_segmentation = false;

        let record = CampaignRecord::new("c", "b");
        let delta = SegmentationStage::new(SegmentPolicy::Overlapping)
            .run(&record, &env.ctx())
            .await
            .unwrap();
        let output = delta.segmentation.unwrap();
        assert_eq!(output.policy, SegmentPolicy::Overlapping);
        let names: Vec<&str> = output.segments.iter().map(|s| s.name.as_str()).collect();
        assert!(names.contains(&"interest-hiking"));
        assert!(names.contains(&"interest-cooking"));
        let hiking = output
            .segments
            .iter()
            .find(|s| s.name == "interest-hiking")
            .unwrap();
        assert_eq!(hiking.members.len(), 2);
    }

    #[tokio::test]
    async fn refinement_renames_without_touching_membership() {
        let env = TestEnv::new(vec![scored("a@x.com", 9.0), scored("b@x.com", 1.0)]);
        env.model.push_text(
            r#"{"segments": [{"name": "champions", "description": "Most active readers"},
                             {"name": "dormant", "description": "Rarely engage"}]}"#,
        );
        let record = CampaignRecord::new("c", "b");
        let delta = SegmentationStage::default().run(&record, &env.ctx()).await.unwrap();
        let segments = delta.segmentation.unwrap().segments;
        assert_eq!(segments[0].name, "champions");
        assert_eq!(segments[0].members, vec!["a@x.com"]);
        assert_eq!(segments[1].name, "dormant");
        assert_eq!(segments[1].members, vec!["b@x.com"]);
    }

    #[tokio::test]
    async fn refinement_failure_keeps_rule_based_segments() {
        let env = TestEnv::new(vec![scored("a@x.com", 9.0)]);
        env.model.push_error("model unavailable");
        let record = CampaignRecord::new("c", "b");
        let delta = SegmentationStage::default().run(&record, &env.ctx()).await.unwrap();
        let segments = delta.segmentation.unwrap().segments;
        assert_eq!(segments[0].name, "high-engagement");
    }
}
