//! Finding normalisation and per-item aggregation.
//!
//! This module turns raw scores and debt strings into normalized values and
//! folds findings into one [`SummaryRow`] per work item.

use crate::models::{Finding, Severity, SummaryRow};
use std::collections::HashMap;

/// Map a CVSS-style score (0-10) to a severity.
///
/// Lower bounds are inclusive: exactly 7.0 is `High`.
pub fn severity_from_score(score: f64) -> Severity {
    if score >= 9.0 {
        Severity::Critical
    } else if score >= 7.0 {
        Severity::High
    } else if score >= 4.0 {
        Severity::Medium
    } else if score > 0.0 {
        Severity::Low
    } else {
        Severity::Unknown
    }
}

/// Leading decimal digits immediately before `suffix`, if any.
fn number_before(s: &str, suffix: &str) -> Option<u64> {
    let end = s.find(suffix)?;
    let digits: String = s[..end]
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    digits.parse().ok()
}

/// Parse a debt string such as `1h12min`, `2h` or `10min` into minutes.
///
/// Missing components count as zero, and so does anything unparseable.
/// Absurd values saturate at `u64::MAX`.
pub fn parse_time(debt: &str) -> u64 {
    let debt = debt.trim();
    if debt.is_empty() {
        return 0;
    }

    let hours = number_before(debt, "h").unwrap_or(0);
    let minutes = number_before(debt, "min").unwrap_or(0);
    hours.saturating_mul(60).saturating_add(minutes)
}

/// Format minutes as `<H>h<M>min`, dropping zero components.
pub fn format_time(total_minutes: u64) -> String {
    if total_minutes == 0 {
        return "0min".to_string();
    }

    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;

    match (hours, minutes) {
        (h, 0) => format!("{}h", h),
        (0, m) => format!("{}min", m),
        (h, m) => format!("{}h{}min", h, m),
    }
}

/// Fold every finding of one item into a summary row.
///
/// Findings that belong to another item are ignored.
pub fn summarize(item_id: &str, findings: &[Finding]) -> SummaryRow {
    let mut row = SummaryRow::empty(item_id);
    for finding in findings.iter().filter(|f| f.item_id == item_id) {
        row.add(finding);
    }
    row
}

/// One summary row per item, in order of first appearance.
pub fn summarize_all(findings: &[Finding]) -> Vec<SummaryRow> {
    let mut rows: Vec<SummaryRow> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for finding in findings {
        let slot = *index.entry(finding.item_id.as_str()).or_insert_with(|| {
            rows.push(SummaryRow::empty(&finding.item_id));
            rows.len() - 1
        });
        rows[slot].add(finding);
    }

    rows
}
