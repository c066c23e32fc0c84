//! CSV audience loading.
//!
//! Required columns: `email`, `name`. Recognized optional columns:
//! `location`, `interests` (`;`-separated), `engagement_score` (numeric),
//! `purchase_history`. Any other column is preserved in the member's
//! attribute map.

use mailflow_core::config::MalformedRowPolicy;
use mailflow_core::csvline::parse_record;
use mailflow_core::email::is_valid_email;
use mailflow_core::types::AudienceMember;
use mailflow_core::{MailflowError, MailflowResult};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::warn;

/// Load audience members from a CSV file.
///
/// A missing required column fails with `Validation` before any row is
/// produced. Malformed rows are handled per the process-wide policy:
/// skipped with a warning, or failed fast with `Format`.
pub fn load_audience(
    path: impl AsRef<Path>,
    policy: MalformedRowPolicy,
) -> MailflowResult<Vec<AudienceMember>> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)?;
    let mut lines = raw.lines().enumerate();

    let (_, header_line) = lines.next().ok_or_else(|| {
        MailflowError::Validation(format!("audience file {} is empty", path.display()))
    })?;
    let header = Header::parse(header_line)?;

    let mut members = Vec::new();
    let mut seen = HashSet::new();
    for (line_no, line) in lines {
        if line.trim().is_empty() {
            continue;
        }
        match header.parse_row(line) {
            Ok(member) => {
                if !seen.insert(member.email.clone()) {
                    warn!(
                        email = %member.email,
                        line = line_no + 1,
                        "Duplicate audience email, keeping first occurrence"
                    );
                    continue;
                }
                members.push(member);
            }
            Err(reason) => match policy {
                MalformedRowPolicy::SkipWarn => {
                    warn!(line = line_no + 1, reason = %reason, "Skipping malformed audience row");
                }
                MalformedRowPolicy::FailFast => {
                    return Err(MailflowError::Format(format!(
                        "line {}: {}",
                        line_no + 1,
                        reason
                    )));
                }
            },
        }
    }
    Ok(members)
}

struct Header {
    columns: Vec<String>,
    email_idx: usize,
    name_idx: usize,
}

impl Header {
    fn parse(line: &str) -> MailflowResult<Self> {
        let columns: Vec<String> = parse_record(line)
            .into_iter()
            .map(|c| c.trim().to_lowercase())
            .collect();
        let position = |name: &str| columns.iter().position(|c| c == name);
        let email_idx = position("email").ok_or_else(|| {
            MailflowError::Validation("audience file is missing required column 'email'".into())
        })?;
        let name_idx = position("name").ok_or_else(|| {
            MailflowError::Validation("audience file is missing required column 'name'".into())
        })?;
        Ok(Self {
            columns,
            email_idx,
            name_idx,
        })
    }

    fn parse_row(&self, line: &str) -> Result<AudienceMember, String> {
        let fields = parse_record(line);
        if fields.len() != self.columns.len() {
            return Err(format!(
                "expected {} fields, got {}",
                self.columns.len(),
                fields.len()
            ));
        }

        let email = fields[self.email_idx].trim().to_string();
        if !is_valid_email(&email) {
            return Err(format!("invalid email '{}'", email));
        }
        let name = fields[self.name_idx].trim().to_string();
        if name.is_empty() {
            return Err(format!("empty name for '{}'", email));
        }

        let mut member = AudienceMember {
            email,
            name,
            location: None,
            interests: Vec::new(),
            engagement_score: None,
            purchase_history: None,
            attributes: BTreeMap::new(),
        };

        for (idx, column) in self.columns.iter().enumerate() {
            if idx == self.email_idx || idx == self.name_idx {
                continue;
            }
            let value = fields[idx].trim();
            if value.is_empty() {
                continue;
            }
            match column.as_str() {
                "location" => member.location = Some(value.to_string()),
                "interests" => {
                    member.interests = value
                        .split(';')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect();
                }
                "engagement_score" => {
                    let score: f64 = value
                        .parse()
                        .map_err(|_| format!("non-numeric engagement_score '{}'", value))?;
                    member.engagement_score = Some(score);
                }
                "purchase_history" => member.purchase_history = Some(value.to_string()),
                other => {
                    member
                        .attributes
                        .insert(other.to_string(), value.to_string());
                }
            }
        }
        Ok(member)
    }
}
