use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Lifecycle status of a campaign run.
///
/// `Error` is absorbing; the invariant `status == Error <=> error.is_some()`
/// is maintained through [`CampaignRecord::set_error`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Pending,
    Running,
    Completed,
    Cancelled,
    Error,
}

/// Stages of the campaign pipeline, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Created,
    Strategy,
    Segmentation,
    Personalization,
    Deliverability,
    AbTesting,
    Sending,
    Reporting,
    Completed,
}

impl StageName {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Created => "created",
            StageName::Strategy => "strategy",
            StageName::Segmentation => "segmentation",
            StageName::Personalization => "personalization",
            StageName::Deliverability => "deliverability",
            StageName::AbTesting => "ab_testing",
            StageName::Sending => "sending",
            StageName::Reporting => "reporting",
            StageName::Completed => "completed",
        }
    }
}

/// A single audience contact loaded from the audience CSV.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudienceMember {
    pub email: String,
    pub name: String,
    pub location: Option<String>,
    #[serde(default)]
    pub interests: Vec<String>,
    pub engagement_score: Option<f64>,
    pub purchase_history: Option<String>,
    /// Columns the loader did not recognize, preserved verbatim.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// Named subset of the audience sharing a targeting criterion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub name: String,
    /// Human-readable description of the selection predicate.
    pub description: String,
    /// Member emails, in audience order.
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SegmentPolicy {
    /// Every member appears in exactly one segment (default).
    #[default]
    Exclusive,
    /// A member may appear in multiple segments.
    Overlapping,
}

/// Segmentation stage output. The active policy is part of the contract:
/// consumers must not assume disjoint segments unless `policy` says so.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentationOutput {
    pub policy: SegmentPolicy,
    pub segments: Vec<Segment>,
}

/// Structured campaign strategy produced from the brief.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Strategy {
    #[serde(default)]
    pub objectives: String,
    #[serde(default)]
    pub target_audience: String,
    #[serde(default)]
    pub key_messages: String,
    #[serde(default)]
    pub email_sequence: String,
    #[serde(default)]
    pub call_to_actions: String,
    #[serde(default)]
    pub success_metrics: String,
    /// Raw model output, kept for display and debugging.
    #[serde(default)]
    pub raw: String,
}

/// One version of campaign content under A/B test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailVariant {
    /// Variant label: "A", "B" or "C".
    pub id: String,
    /// Segment this content was tailored to.
    pub segment: String,
    pub subject: String,
    #[serde(default)]
    pub greeting: String,
    pub body: String,
    #[serde(default)]
    pub cta: String,
    #[serde(default)]
    pub footer: String,
}

impl EmailVariant {
    /// Assembled message body as sent to recipients.
    pub fn full_content(&self) -> String {
        let mut parts = Vec::with_capacity(4);
        for part in [&self.greeting, &self.body, &self.cta, &self.footer] {
            if !part.is_empty() {
                parts.push(part.as_str());
            }
        }
        parts.join("\n\n")
    }
}

/// Fixed mapping from member emails to variant labels within one segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub segment: String,
    pub ratio: f64,
    /// Variant label -> assigned member emails.
    pub groups: BTreeMap<String, Vec<String>>,
}

impl Assignment {
    pub fn variant_of(&self, email: &str) -> Option<&str> {
        for (variant, members) in &self.groups {
            if members.iter().any(|m| m == email) {
                return Some(variant.as_str());
            }
        }
        None
    }

    pub fn total_members(&self) -> usize {
        self.groups.values().map(|g| g.len()).sum()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    Open,
    Click,
    Bounce,
}

impl ActivityAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityAction::Open => "open",
            ActivityAction::Click => "click",
            ActivityAction::Bounce => "bounce",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(ActivityAction::Open),
            "click" => Some(ActivityAction::Click),
            "bounce" => Some(ActivityAction::Bounce),
            _ => None,
        }
    }
}

/// One webhook-reported recipient action. Append-only; never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub campaign_id: String,
    pub variant: String,
    pub email: String,
    pub action: ActivityAction,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub details: String,
}

/// Per-recipient outcome of a delivery attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryResult {
    pub email: String,
    pub variant: String,
    pub success: bool,
    /// Vendor-specific status code, when the vendor returned one.
    pub status_code: Option<u16>,
    pub message_id: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceCheck {
    pub compliant: bool,
    pub issues: Vec<String>,
    pub unsubscribe_present: bool,
    pub sender_info_present: bool,
    pub subject_clear: bool,
}

/// Deliverability stage output for one variant. Informational only:
/// a failed check never blocks sending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliverabilityCheck {
    pub variant: String,
    pub segment: String,
    pub spam_score: u32,
    pub risk: RiskLevel,
    pub warnings: Vec<String>,
    pub issues: Vec<String>,
    pub compliance: ComplianceCheck,
    /// Fraction of the segment's recipients with a syntactically valid email.
    pub valid_recipient_ratio: f64,
    pub passed: bool,
    pub recommendations: Vec<String>,
}

/// Aggregated counters for one variant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VariantStats {
    pub recipients: u64,
    pub sent: u64,
    pub opened: u64,
    pub clicked: u64,
    pub bounced: u64,
    pub open_rate: f64,
    pub click_rate: f64,
    /// Weighted engagement: opens + 2 * clicks.
    pub engagement_score: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignReport {
    pub campaign_id: String,
    pub generated_at: DateTime<Utc>,
    pub variants: BTreeMap<String, VariantStats>,
    pub winner: Option<String>,
    pub insights: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Partial update returned by a pipeline stage, merged into the record by
/// the orchestrator. Each stage populates exactly the fields it owns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageDelta {
    pub strategy: Option<Strategy>,
    pub segmentation: Option<SegmentationOutput>,
    pub email_variants: Option<Vec<EmailVariant>>,
    pub deliverability: Option<Vec<DeliverabilityCheck>>,
    pub assignments: Option<Vec<Assignment>>,
    pub send_results: Option<Vec<DeliveryResult>>,
    pub report: Option<CampaignReport>,
}

/// Accumulated state of one campaign run. Owned exclusively by the
/// orchestrator while running; snapshots are published to the registry
/// after each stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignRecord {
    pub campaign_id: String,
    pub name: String,
    pub brief: String,
    pub stage: StageName,
    pub status: CampaignStatus,
    pub error: Option<String>,
    pub strategy: Option<Strategy>,
    pub segmentation: Option<SegmentationOutput>,
    #[serde(default)]
    pub email_variants: Vec<EmailVariant>,
    #[serde(default)]
    pub deliverability: Vec<DeliverabilityCheck>,
    #[serde(default)]
    pub assignments: Vec<Assignment>,
    #[serde(default)]
    pub send_results: Vec<DeliveryResult>,
    pub report: Option<CampaignReport>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl CampaignRecord {
    pub fn new(name: impl Into<String>, brief: impl Into<String>) -> Self {
        Self {
            campaign_id: short_id(),
            name: name.into(),
            brief: brief.into(),
            stage: StageName::Created,
            status: CampaignStatus::Pending,
            error: None,
            strategy: None,
            segmentation: None,
            email_variants: Vec::new(),
            deliverability: Vec::new(),
            assignments: Vec::new(),
            send_results: Vec::new(),
            report: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Merge a stage's partial update into the record.
    pub fn apply(&mut self, delta: StageDelta) {
        if let Some(strategy) = delta.strategy {
            self.strategy = Some(strategy);
        }
        if let Some(segmentation) = delta.segmentation {
            self.segmentation = Some(segmentation);
        }
        if let Some(variants) = delta.email_variants {
            self.email_variants = variants;
        }
        if let Some(checks) = delta.deliverability {
            self.deliverability = checks;
        }
        if let Some(assignments) = delta.assignments {
            self.assignments = assignments;
        }
        if let Some(results) = delta.send_results {
            self.send_results = results;
        }
        if let Some(report) = delta.report {
            self.report = Some(report);
        }
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.status = CampaignStatus::Error;
        self.error = Some(message.into());
    }

    pub fn segments(&self) -> &[Segment] {
        self.segmentation
            .as_ref()
            .map(|s| s.segments.as_slice())
            .unwrap_or(&[])
    }

    /// Look up a variant's content by label and segment.
    pub fn variant(&self, id: &str, segment: &str) -> Option<&EmailVariant> {
        self.email_variants
            .iter()
            .find(|v| v.id == id && v.segment == segment)
    }
}

/// Short opaque campaign id: first 8 hex chars of a v4 UUID.
fn short_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}
