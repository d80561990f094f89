//! Data models shared by every collector and scanner.
//!
//! A batch starts from [`WorkItem`]s, runs tools or API calls against them,
//! and ends with [`Finding`]s folded into one [`SummaryRow`] per item.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Severity level of a finding.
///
/// `Unknown` sorts below every real level so that "at least Low" filters
/// never pick it up.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// Score of zero, or a label we do not recognise.
    #[default]
    Unknown,
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Unknown => write!(f, "UNKNOWN"),
            Severity::Low => write!(f, "LOW"),
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::High => write!(f, "HIGH"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl From<&str> for Severity {
    fn from(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "low" | "minor" | "info" => Severity::Low,
            "medium" | "moderate" | "major" => Severity::Medium,
            "high" => Severity::High,
            "critical" | "blocker" => Severity::Critical,
            _ => Severity::Unknown,
        }
    }
}

/// Lifecycle of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ItemStatus {
    Pending,
    Running,
    Done,
    Failed,
    TimedOut,
}

/// A unit of work: one repository on disk or one row of an input table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// Project name (directory name) or `owner/repo`.
    pub id: String,
    /// Directory path or repository URL.
    pub source: String,
    pub status: ItemStatus,
}

impl WorkItem {
    pub fn new(id: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            status: ItemStatus::Pending,
        }
    }

    /// The source interpreted as a filesystem path.
    pub fn path(&self) -> PathBuf {
        PathBuf::from(&self.source)
    }
}

/// How a tool invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationOutcome {
    Succeeded,
    Failed(String),
    TimedOut,
}

/// A completed subprocess run for one work item.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub item_id: String,
    pub program: String,
    pub args: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    /// `None` when the process never started or was killed.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub outcome: InvocationOutcome,
}

impl ToolInvocation {
    pub fn succeeded(&self) -> bool {
        self.outcome == InvocationOutcome::Succeeded
    }

    /// Terminal item status implied by this invocation.
    pub fn item_status(&self) -> ItemStatus {
        match self.outcome {
            InvocationOutcome::Succeeded => ItemStatus::Done,
            InvocationOutcome::Failed(_) => ItemStatus::Failed,
            InvocationOutcome::TimedOut => ItemStatus::TimedOut,
        }
    }

    /// One-line reason suitable for a failure log.
    pub fn failure_reason(&self) -> Option<String> {
        match &self.outcome {
            InvocationOutcome::Succeeded => None,
            InvocationOutcome::Failed(reason) => Some(reason.clone()),
            InvocationOutcome::TimedOut => Some(format!(
                "timed out after {:.0}s",
                self.duration.as_secs_f64()
            )),
        }
    }
}

/// Normalized unit of a result: an issue, a vulnerability, or a metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub item_id: String,
    pub category: String,
    pub severity: Severity,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Finding {
    pub fn new(item_id: impl Into<String>, category: impl Into<String>, severity: Severity) -> Self {
        Self {
            item_id: item_id.into(),
            category: category.into(),
            severity,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<String>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    pub fn attribute(&self, key: &str) -> &str {
        self.attributes.get(key).map(String::as_str).unwrap_or("")
    }
}

/// Per-item fold of findings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub item_id: String,
    pub total: u64,
    pub by_category: BTreeMap<String, u64>,
    pub by_severity: BTreeMap<Severity, u64>,
}

impl SummaryRow {
    /// A row with every counter at zero.
    pub fn empty(item_id: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            ..Self::default()
        }
    }

    pub fn add(&mut self, finding: &Finding) {
        self.total += 1;
        *self.by_category.entry(finding.category.clone()).or_insert(0) += 1;
        *self.by_severity.entry(finding.severity).or_insert(0) += 1;
    }

    pub fn severity_count(&self, severity: Severity) -> u64 {
        self.by_severity.get(&severity).copied().unwrap_or(0)
    }

    /// Findings with a known severity.
    pub fn rated_total(&self) -> u64 {
        self.total - self.severity_count(Severity::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Unknown < Severity::Low);
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn test_severity_from_str() {
        assert_eq!(Severity::from("HIGH"), Severity::High);
        assert_eq!(Severity::from("low"), Severity::Low);
        assert_eq!(Severity::from("BLOCKER"), Severity::Critical);
        assert_eq!(Severity::from("whatever"), Severity::Unknown);
        assert_eq!(Severity::from(""), Severity::Unknown);
    }

    #[test]
    fn test_severity_display() {
        assert_eq!(Severity::Critical.to_string(), "CRITICAL");
        assert_eq!(Severity::Unknown.to_string(), "UNKNOWN");
    }

    #[test]
    fn test_summary_row_counts() {
        let mut row = SummaryRow::empty("a/b");
        row.add(&Finding::new("a/b", "BUG", Severity::High));
        row.add(&Finding::new("a/b", "BUG", Severity::Unknown));
        row.add(&Finding::new("a/b", "CODE_SMELL", Severity::Low));

        assert_eq!(row.total, 3);
        assert_eq!(row.by_category.get("BUG"), Some(&2));
        assert_eq!(row.severity_count(Severity::High), 1);
        assert_eq!(row.rated_total(), 2);
    }

    #[test]
    fn test_finding_attribute_default() {
        let finding = Finding::new("x", "c", Severity::Low).with_attribute("cwe", "CWE-79");
        assert_eq!(finding.attribute("cwe"), "CWE-79");
        assert_eq!(finding.attribute("missing"), "");
    }
}
