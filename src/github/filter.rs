//! Threshold filtering of a repository table.

use crate::targets::{parse_topics, Table};

/// Minimum popularity a repository must reach to be kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterThresholds {
    pub min_stars: u64,
    pub min_issues: u64,
    pub min_topics: usize,
}

/// Numeric cell value; anything unparseable is 0.
fn count(value: &str) -> u64 {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v > 0.0)
        .map(|v| v as u64)
        .unwrap_or(0)
}

/// Rows meeting every threshold, with all columns kept.
pub fn filter_repositories(table: &Table, thresholds: &FilterThresholds) -> Table {
    let rows = table
        .rows
        .iter()
        .filter(|row| {
            count(table.value(row, "stargazers_count")) >= thresholds.min_stars
                && count(table.value(row, "open_issues_count")) >= thresholds.min_issues
                && parse_topics(table.value(row, "topics")).len() >= thresholds.min_topics
        })
        .cloned()
        .collect();

    Table {
        headers: table.headers.clone(),
        rows,
    }
}
