//! Deliverability stage: static spam and compliance checks per variant.
//!
//! Results are informational. A failed check is surfaced in the record and
//! the final report but never blocks the sending stage.

use crate::{Stage, StageContext};
use async_trait::async_trait;
use mailflow_core::email::is_valid_email;
use mailflow_core::types::{
    CampaignRecord, ComplianceCheck, DeliverabilityCheck, EmailVariant, RiskLevel, StageDelta,
    StageName,
};
use mailflow_core::MailflowResult;
use tracing::{info, warn};

const SPAM_KEYWORDS: &[&str] = &[
    "free",
    "guarantee",
    "winner",
    "cash",
    "urgent",
    "act now",
    "limited time",
    "click here",
    "buy now",
    "100%",
    "risk-free",
    "no obligation",
    "congratulations",
    "double your",
];

pub struct DeliverabilityStage;

#[async_trait]
impl Stage for DeliverabilityStage {
    fn name(&self) -> StageName {
        StageName::Deliverability
    }

    async fn run(
        &self,
        record: &CampaignRecord,
        _ctx: &StageContext<'_>,
    ) -> MailflowResult<StageDelta> {
        let mut checks = Vec::with_capacity(record.email_variants.len());
        for variant in &record.email_variants {
            let ratio = valid_recipient_ratio(record, &variant.segment);
            let check = check_variant(variant, ratio);
            if !check.passed {
                warn!(
                    campaign_id = %record.campaign_id,
                    variant = %check.variant,
                    segment = %check.segment,
                    spam_score = check.spam_score,
                    "Variant flagged by deliverability check"
                );
            }
            checks.push(check);
        }

        info!(
            campaign_id = %record.campaign_id,
            checked = checks.len(),
            flagged = checks.iter().filter(|c| !c.passed).count(),
            "Deliverability checks complete"
        );
        Ok(StageDelta {
            deliverability: Some(checks),
            ..Default::default()
        })
    }
}

fn check_variant(variant: &EmailVariant, valid_recipient_ratio: f64) -> DeliverabilityCheck {
    let subject = &variant.subject;
    let content = variant.full_content();
    let haystack = format!("{} {}", subject.to_lowercase(), content.to_lowercase());

    let mut score = 0u32;
    let mut issues = Vec::new();
    let mut warnings = Vec::new();
    let mut recommendations = Vec::new();

    for keyword in SPAM_KEYWORDS {
        if haystack.contains(keyword) {
            score += 5;
            issues.push(format!("spam trigger word: '{keyword}'"));
        }
    }
    if !issues.is_empty() {
        recommendations.push("Replace spam trigger words with neutral phrasing".to_string());
    }

    let letters: Vec<char> = subject.chars().filter(|c| c.is_alphabetic()).collect();
    if !letters.is_empty() {
        let caps = letters.iter().filter(|c| c.is_uppercase()).count();
        if caps as f64 / letters.len() as f64 > 0.5 {
            score += 10;
            warnings.push("subject is mostly uppercase".to_string());
            recommendations.push("Use sentence case in the subject".to_string());
        }
    }

    let exclamations = content.matches('!').count() + subject.matches('!').count();
    if exclamations > 3 {
        score += 5;
        warnings.push(format!("{exclamations} exclamation marks"));
    }

    if subject.chars().count() > 50 {
        score += 3;
        warnings.push("subject exceeds 50 characters".to_string());
        recommendations.push("Shorten the subject below 50 characters".to_string());
    }

    let links = content.matches("http://").count() + content.matches("https://").count();
    if links > 3 {
        score += 5;
        warnings.push(format!("{links} links in body"));
    }

    let risk = if score < 10 {
        RiskLevel::Low
    } else if score < 20 {
        RiskLevel::Medium
    } else {
        RiskLevel::High
    };

    let compliance = check_compliance(variant);
    if !compliance.unsubscribe_present {
        recommendations.push("Add an unsubscribe link to the footer".to_string());
    }

    DeliverabilityCheck {
        variant: variant.id.clone(),
        segment: variant.segment.clone(),
        spam_score: score,
        risk,
        warnings,
        issues,
        compliance,
        valid_recipient_ratio,
        passed: score < 20,
        recommendations,
    }
}

fn check_compliance(variant: &EmailVariant) -> ComplianceCheck {
    let text = format!("{} {}", variant.body, variant.footer).to_lowercase();
    let unsubscribe_present = text.contains("unsubscribe") || text.contains("opt out");
    let sender_info_present = !variant.footer.trim().is_empty();
    let subject_lower = variant.subject.to_lowercase();
    let subject_clear =
        !subject_lower.starts_with("re:") && !subject_lower.starts_with("fwd:");

    let mut issues = Vec::new();
    if !unsubscribe_present {
        issues.push("no unsubscribe wording".to_string());
    }
    if !sender_info_present {
        issues.push("footer with sender info missing".to_string());
    }
    if !subject_clear {
        issues.push("subject mimics a reply or forward".to_string());
    }

    ComplianceCheck {
        compliant: issues.is_empty(),
        issues,
        unsubscribe_present,
        sender_info_present,
        subject_clear,
    }
}

fn valid_recipient_ratio(record: &CampaignRecord, segment: &str) -> f64 {
    let members = record
        .segments()
        .iter()
        .find(|s| s.name == segment)
        .map(|s| s.members.as_slice())
        .unwrap_or(&[]);
    if members.is_empty() {
        return 1.0;
    }
    // The loader already validated audience rows; re-check here so manual
    // segment edits cannot smuggle in bad addresses.
    let valid = members.iter().filter(|m| is_valid_email(m)).count();
    valid as f64 / members.len() as f64
}
