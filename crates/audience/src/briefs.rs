//! Campaign brief discovery. Briefs live in the data directory as JSON
//! files (one object or an array of objects with `name` and `brief`) or
//! plain-text files whose filename becomes the campaign name. Only files
//! with "brief" in the name are considered.

use mailflow_core::MailflowResult;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignBrief {
    pub name: String,
    pub brief: String,
}

/// Load all campaign briefs found under `dir`. Unreadable or malformed
/// files are skipped with a warning; a missing directory yields an empty
/// list.
pub fn load_briefs(dir: impl AsRef<Path>) -> MailflowResult<Vec<CampaignBrief>> {
    let dir = dir.as_ref();
    let mut briefs = Vec::new();
    if !dir.exists() {
        return Ok(briefs);
    }

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !file_name.to_lowercase().contains("brief") {
            continue;
        }

        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => match load_json_briefs(&path) {
                Ok(mut loaded) => briefs.append(&mut loaded),
                Err(e) => warn!(file = %path.display(), error = %e, "Skipping brief file"),
            },
            Some("txt") => match std::fs::read_to_string(&path) {
                Ok(text) => {
                    let text = text.trim();
                    if !text.is_empty() {
                        briefs.push(CampaignBrief {
                            name: name_from_stem(&path),
                            brief: text.to_string(),
                        });
                    }
                }
                Err(e) => warn!(file = %path.display(), error = %e, "Skipping brief file"),
            },
            _ => {}
        }
    }
    Ok(briefs)
}

fn load_json_briefs(path: &Path) -> MailflowResult<Vec<CampaignBrief>> {
    let raw = std::fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&raw)?;
    let briefs = match value {
        serde_json::Value::Array(items) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        object => vec![serde_json::from_value(object)?],
    };
    Ok(briefs)
}

fn name_from_stem(path: &Path) -> String {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("campaign");
    stem.split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
