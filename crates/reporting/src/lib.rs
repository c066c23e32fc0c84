//! Campaign report assembly: per-variant metrics, winner selection, and
//! the human-readable insight and recommendation strings surfaced in the
//! final report. Pure functions over the accumulated campaign record.

use chrono::Utc;
use mailflow_core::types::{CampaignRecord, CampaignReport, VariantStats};
use mailflow_experiments::{select_winner, variant_metrics};
use std::collections::BTreeMap;
use tracing::debug;

/// Build the final report for a finished (or failed-late) campaign run.
pub fn summarize(
    record: &CampaignRecord,
    events: &[mailflow_core::types::ActivityEvent],
) -> CampaignReport {
    let variants = variant_metrics(&record.assignments, events, &record.send_results);
    let winner = select_winner(&record.assignments, events);
    let insights = build_insights(record, &variants, winner.as_deref());
    let recommendations = build_recommendations(&variants);

    debug!(
        campaign_id = %record.campaign_id,
        variants = variants.len(),
        winner = winner.as_deref().unwrap_or("none"),
        "Report assembled"
    );

    CampaignReport {
        campaign_id: record.campaign_id.clone(),
        generated_at: Utc::now(),
        variants,
        winner,
        insights,
        recommendations,
    }
}

fn build_insights(
    record: &CampaignRecord,
    variants: &BTreeMap<String, VariantStats>,
    winner: Option<&str>,
) -> Vec<String> {
    let mut insights = Vec::new();

    if let Some(winner) = winner {
        if let Some(stats) = variants.get(winner) {
            insights.push(format!(
                "Variant {winner} won with an engagement score of {} ({} opens, {} clicks across {} recipients)",
                stats.engagement_score, stats.opened, stats.clicked, stats.recipients
            ));
        }
    }

    if let Some((best, stats)) = variants
        .iter()
        .filter(|(_, s)| s.sent > 0)
        .max_by(|(_, a), (_, b)| a.open_rate.total_cmp(&b.open_rate))
    {
        insights.push(format!(
            "Best open rate: variant {best} at {:.1}%",
            stats.open_rate * 100.0
        ));
    }

    if let (Some(a), Some(b)) = (variants.get("A"), variants.get("B")) {
        if a.sent > 0 && b.sent > 0 {
            let delta = (a.open_rate - b.open_rate) * 100.0;
            let (leader, margin) = if delta >= 0.0 { ("A", delta) } else { ("B", -delta) };
            insights.push(format!(
                "Variant {leader} out-opened the other by {margin:.1} percentage points"
            ));
        }
    }

    for check in &record.deliverability {
        if check.spam_score > 0 {
            insights.push(format!(
                "Variant {} ({}) carried a spam score of {} before sending",
                check.variant, check.segment, check.spam_score
            ));
        }
    }

    insights
}

fn build_recommendations(variants: &BTreeMap<String, VariantStats>) -> Vec<String> {
    let mut recommendations = Vec::new();
    for (variant, stats) in variants {
        if stats.sent == 0 {
            continue;
        }
        if stats.open_rate < 0.15 {
            recommendations.push(format!(
                "Variant {variant} open rate is {:.1}%; test a shorter, more specific subject line",
                stats.open_rate * 100.0
            ));
        }
        if stats.opened > 0 && stats.click_rate < 0.02 {
            recommendations.push(format!(
                "Variant {variant} gets opens but few clicks; make the call to action more prominent"
            ));
        }
        if stats.bounced * 20 > stats.sent {
            recommendations.push(format!(
                "Variant {variant} bounce rate exceeds 5%; re-verify the audience list before the next send"
            ));
        }
    }
    if recommendations.is_empty() && variants.values().any(|s| s.sent > 0) {
        recommendations.push("Engagement is healthy; scale the winning variant to the full audience".into());
    }
    recommendations
}
