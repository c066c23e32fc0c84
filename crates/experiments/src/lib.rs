//! A/B experiment mechanics: deterministic group assignment and winner
//! selection over reported activity.

use mailflow_core::types::{ActivityAction, ActivityEvent, Assignment, DeliveryResult, Segment, VariantStats};
use mailflow_core::{MailflowError, MailflowResult};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Salted fold hash used to order members deterministically.
fn fold_hash(salt: &str, email: &str) -> u64 {
    salt.bytes()
        .chain([b':'])
        .chain(email.bytes())
        .fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64))
}

/// Split a segment's members into variant groups "A" and "B".
///
/// Members are ordered by salted hash and the first `round(ratio * n)` go
/// to "A", so for any ratio in (0, 1) the group sizes match the ratio
/// within one member, and the same salt always yields the same grouping.
pub fn assign(segment: &Segment, ratio: f64, salt: &str) -> MailflowResult<Assignment> {
    if !(ratio > 0.0 && ratio < 1.0) {
        return Err(MailflowError::Validation(format!(
            "split ratio must be in (0, 1), got {ratio}"
        )));
    }

    let mut ordered: Vec<&String> = segment.members.iter().collect();
    ordered.sort_by_key(|email| (fold_hash(salt, email), email.as_str().to_owned()));

    let n = ordered.len();
    let a_size = ((ratio * n as f64).round() as usize).min(n);

    let mut groups = BTreeMap::new();
    groups.insert(
        "A".to_string(),
        ordered[..a_size].iter().map(|e| (*e).clone()).collect(),
    );
    groups.insert(
        "B".to_string(),
        ordered[a_size..].iter().map(|e| (*e).clone()).collect(),
    );

    debug!(
        segment = %segment.name,
        members = n,
        a = a_size,
        b = n - a_size,
        "Assigned A/B groups"
    );

    Ok(Assignment {
        segment: segment.name.clone(),
        ratio,
        groups,
    })
}

/// Split a segment's members across an arbitrary variant label set
/// (up to three in practice: "A", "B", "C"). Near-even split; the last
/// label takes the remainder.
pub fn assign_n(segment: &Segment, labels: &[&str], salt: &str) -> MailflowResult<Assignment> {
    if labels.is_empty() {
        return Err(MailflowError::Validation("no variant labels given".into()));
    }

    let mut ordered: Vec<&String> = segment.members.iter().collect();
    ordered.sort_by_key(|email| (fold_hash(salt, email), email.as_str().to_owned()));

    let n = ordered.len();
    let base = n / labels.len();
    let mut groups = BTreeMap::new();
    for (i, label) in labels.iter().enumerate() {
        let start = i * base;
        let end = if i == labels.len() - 1 { n } else { start + base };
        groups.insert(
            label.to_string(),
            ordered[start..end].iter().map(|e| (*e).clone()).collect(),
        );
    }

    Ok(Assignment {
        segment: segment.name.clone(),
        ratio: 1.0 / labels.len() as f64,
        groups,
    })
}

/// Pick the winning variant from reported activity.
///
/// Score per variant is `opens + 2 * clicks` over events whose email is
/// assigned to that variant; variants with no events score 0. Duplicate
/// events double-count by design (webhook deliveries are not deduplicated).
/// Ties break toward the variant with more recipients, then toward the
/// lexicographically first label. Returns `None` only when there are no
/// assignments.
pub fn select_winner(assignments: &[Assignment], events: &[ActivityEvent]) -> Option<String> {
    let mut email_to_variant: HashMap<&str, &str> = HashMap::new();
    let mut recipients: BTreeMap<&str, u64> = BTreeMap::new();
    for assignment in assignments {
        for (variant, members) in &assignment.groups {
            let count = recipients.entry(variant.as_str()).or_insert(0);
            *count += members.len() as u64;
            for email in members {
                email_to_variant.entry(email.as_str()).or_insert(variant);
            }
        }
    }
    if recipients.is_empty() {
        return None;
    }

    let mut scores: BTreeMap<&str, u64> = recipients.keys().map(|v| (*v, 0)).collect();
    for event in events {
        let weight = match event.action {
            ActivityAction::Open => 1,
            ActivityAction::Click => 2,
            ActivityAction::Bounce => continue,
        };
        if let Some(variant) = email_to_variant.get(event.email.as_str()) {
            if let Some(score) = scores.get_mut(variant) {
                *score += weight;
            }
        }
    }

    let mut winner: Option<(&str, u64, u64)> = None;
    for (variant, score) in &scores {
        let recipient_count = recipients[variant];
        let better = match winner {
            None => true,
            Some((_, best_score, best_recipients)) => {
                *score > best_score || (*score == best_score && recipient_count > best_recipients)
            }
        };
        if better {
            winner = Some((variant, *score, recipient_count));
        }
    }
    winner.map(|(variant, _, _)| variant.to_string())
}

/// Per-variant counters over assignments, activity events and send results.
pub fn variant_metrics(
    assignments: &[Assignment],
    events: &[ActivityEvent],
    send_results: &[DeliveryResult],
) -> BTreeMap<String, VariantStats> {
    let mut email_to_variant: HashMap<&str, &str> = HashMap::new();
    let mut stats: BTreeMap<String, VariantStats> = BTreeMap::new();
    for assignment in assignments {
        for (variant, members) in &assignment.groups {
            let entry = stats.entry(variant.clone()).or_default();
            entry.recipients += members.len() as u64;
            for email in members {
                email_to_variant.entry(email.as_str()).or_insert(variant);
            }
        }
    }

    for result in send_results {
        if result.success {
            if let Some(entry) = stats.get_mut(&result.variant) {
                entry.sent += 1;
            }
        }
    }

    for event in events {
        let Some(variant) = email_to_variant.get(event.email.as_str()) else {
            continue;
        };
        let Some(entry) = stats.get_mut(*variant) else {
            continue;
        };
        match event.action {
            ActivityAction::Open => entry.opened += 1,
            ActivityAction::Click => entry.clicked += 1,
            ActivityAction::Bounce => entry.bounced += 1,
        }
    }

    for entry in stats.values_mut() {
        entry.engagement_score = entry.opened + 2 * entry.clicked;
        if entry.sent > 0 {
            entry.open_rate = entry.opened as f64 / entry.sent as f64;
            entry.click_rate = entry.clicked as f64 / entry.sent as f64;
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rand::seq::SliceRandom;

    fn segment(n: usize) -> Segment {
        Segment {
            name: "all".into(),
            description: "everyone".into(),
            members: (0..n).map(|i| format!("user{i}@example.com")).collect(),
        }
    }

    fn event(email: &str, variant: &str, action: ActivityAction) -> ActivityEvent {
        ActivityEvent {
            campaign_id: "c1".into(),
            variant: variant.into(),
            email: email.into(),
            action,
            timestamp: Utc::now(),
            details: String::new(),
        }
    }

    /// Assignments with the given recipient counts per variant.
    fn fixed_assignment(a: usize, b: usize) -> Assignment {
        let mut groups = BTreeMap::new();
        groups.insert(
            "A".to_string(),
            (0..a).map(|i| format!("a{i}@example.com")).collect(),
        );
        groups.insert(
            "B".to_string(),
            (0..b).map(|i| format!("b{i}@example.com")).collect(),
        );
        Assignment {
            segment: "all".into(),
            ratio: 0.5,
            groups,
        }
    }

    #[test]
    fn group_sizes_within_one_of_ratio() {
        for n in [1usize, 2, 7, 10, 100, 101] {
            for ratio in [0.1, 0.25, 0.5, 0.7, 0.9] {
                let assignment = assign(&segment(n), ratio, "salt").unwrap();
                let a = assignment.groups["A"].len() as f64;
                assert!(
                    (a - ratio * n as f64).abs() <= 1.0,
                    "n={n} ratio={ratio} a={a}"
                );
                assert_eq!(assignment.total_members(), n);
            }
        }
    }

    #[test]
    fn assignment_is_deterministic_per_salt() {
        let first = assign(&segment(50), 0.5, "campaign-1").unwrap();
        let second = assign(&segment(50), 0.5, "campaign-1").unwrap();
        assert_eq!(first.groups, second.groups);

        let other_salt = assign(&segment(50), 0.5, "campaign-2").unwrap();
        assert_ne!(first.groups, other_salt.groups);
    }

    #[test]
    fn every_member_assigned_exactly_once() {
        let assignment = assign(&segment(31), 0.4, "s").unwrap();
        let mut all: Vec<_> = assignment.groups.values().flatten().cloned().collect();
        all.sort();
        let mut expected = segment(31).members;
        expected.sort();
        assert_eq!(all, expected);
    }

    #[test]
    fn degenerate_ratio_rejected() {
        assert!(assign(&segment(10), 0.0, "s").is_err());
        assert!(assign(&segment(10), 1.0, "s").is_err());
        assert!(assign(&segment(10), -0.3, "s").is_err());
    }

    #[test]
    fn three_way_split_covers_everyone() {
        let assignment = assign_n(&segment(10), &["A", "B", "C"], "s").unwrap();
        assert_eq!(assignment.groups["A"].len(), 3);
        assert_eq!(assignment.groups["B"].len(), 3);
        assert_eq!(assignment.groups["C"].len(), 4);
    }

    #[test]
    fn clicks_weigh_double() {
        // A: 10 opens, 2 clicks = 14. B: 5 opens, 5 clicks = 15.
        let assignment = fixed_assignment(10, 10);
        let mut events = Vec::new();
        for i in 0..10 {
            events.push(event(&format!("a{i}@example.com"), "A", ActivityAction::Open));
        }
        for i in 0..2 {
            events.push(event(&format!("a{i}@example.com"), "A", ActivityAction::Click));
        }
        for i in 0..5 {
            events.push(event(&format!("b{i}@example.com"), "B", ActivityAction::Open));
            events.push(event(&format!("b{i}@example.com"), "B", ActivityAction::Click));
        }
        assert_eq!(select_winner(&[assignment], &events).as_deref(), Some("B"));
    }

    #[test]
    fn winner_is_invariant_under_event_order() {
        let assignment = fixed_assignment(20, 20);
        let mut events = Vec::new();
        for i in 0..7 {
            events.push(event(&format!("a{i}@example.com"), "A", ActivityAction::Open));
        }
        for i in 0..3 {
            events.push(event(&format!("b{i}@example.com"), "B", ActivityAction::Click));
        }
        let baseline = select_winner(std::slice::from_ref(&assignment), &events);
        let mut rng = rand::thread_rng();
        for _ in 0..10 {
            events.shuffle(&mut rng);
            assert_eq!(
                select_winner(std::slice::from_ref(&assignment), &events),
                baseline
            );
        }
    }

    #[test]
    fn score_tie_breaks_on_recipients() {
        // Equal scores of 10, A has 100 recipients, B has 50.
        let assignment = fixed_assignment(100, 50);
        let mut events = Vec::new();
        for i in 0..10 {
            events.push(event(&format!("a{i}@example.com"), "A", ActivityAction::Open));
            events.push(event(&format!("b{i}@example.com"), "B", ActivityAction::Open));
        }
        assert_eq!(select_winner(&[assignment], &events).as_deref(), Some("A"));
    }

    #[test]
    fn full_tie_breaks_lexicographically() {
        let assignment = fixed_assignment(10, 10);
        assert_eq!(select_winner(&[assignment], &[]).as_deref(), Some("A"));
    }

    #[test]
    fn duplicate_events_double_count() {
        let assignment = fixed_assignment(5, 5);
        let open = event("a0@example.com", "A", ActivityAction::Open);
        let once = variant_metrics(std::slice::from_ref(&assignment), &[open.clone()], &[]);
        let twice = variant_metrics(std::slice::from_ref(&assignment), &[open.clone(), open], &[]);
        assert_eq!(once["A"].engagement_score, 1);
        assert_eq!(twice["A"].engagement_score, 2);
    }

    #[test]
    fn unassigned_events_are_ignored() {
        let assignment = fixed_assignment(2, 2);
        let events = vec![event("stranger@example.com", "A", ActivityAction::Open)];
        let stats = variant_metrics(&[assignment.clone()], &events, &[]);
        assert_eq!(stats["A"].opened, 0);
        assert_eq!(select_winner(&[assignment], &events).as_deref(), Some("A"));
    }

    #[test]
    fn no_assignments_no_winner() {
        assert_eq!(select_winner(&[], &[]), None);
    }

    #[test]
    fn metrics_rates_use_sent_counts() {
        let assignment = fixed_assignment(4, 4);
        let sends: Vec<DeliveryResult> = (0..4)
            .map(|i| DeliveryResult {
                email: format!("a{i}@example.com"),
                variant: "A".into(),
                success: i < 2, // two sends succeed
                status_code: Some(if i < 2 { 202 } else { 500 }),
                message_id: None,
                error: None,
            })
            .collect();
        let events = vec![event("a0@example.com", "A", ActivityAction::Open)];
        let stats = variant_metrics(&[assignment], &events, &sends);
        assert_eq!(stats["A"].sent, 2);
        assert_eq!(stats["A"].open_rate, 0.5);
        assert_eq!(stats["B"].sent, 0);
        assert_eq!(stats["B"].open_rate, 0.0);
    }
}
