//! OWASP Dependency-Check scanning.
//!
//! Each project is scanned into `<project>/dependency-check-report/` and the
//! JSON report is normalised into vulnerability findings. Projects whose scan
//! or report fails still get a summary row with zero counts.

use crate::analysis::{severity_from_score, summarize_all};
use crate::models::{Finding, Severity, SummaryRow, WorkItem};
use crate::report::{FailureLog, Row};
use crate::runner::{ToolCommand, ToolRunner};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

pub const REPORT_DIR: &str = "dependency-check-report";
pub const REPORT_FILE: &str = "dependency-check-report.json";

pub const SUMMARY_COLUMNS: [&str; 6] = [
    "projectName",
    "criticalSeverityCount",
    "highSeverityCount",
    "mediumSeverityCount",
    "lowSeverityCount",
    "totalVulnerabilities",
];

pub const DETAIL_COLUMNS: [&str; 10] = [
    "projectName",
    "packageName",
    "vulnerabilityId",
    "packagePath",
    "severity",
    "cvssScore",
    "cwe",
    "description",
    "references",
    "published",
];

const VULNERABILITY: &str = "vulnerability";

/// Settings of one batch.
#[derive(Debug, Clone)]
pub struct DependencyCheckSettings {
    pub path: String,
    pub no_update: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Report {
    dependencies: Vec<Dependency>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Dependency {
    file_name: String,
    file_path: String,
    vulnerabilities: Vec<Vulnerability>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Vulnerability {
    name: String,
    description: String,
    cwes: Vec<String>,
    references: Vec<Reference>,
    published: Option<String>,
    cvssv3: Option<CvssV3>,
    cvssv2: Option<CvssV2>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct CvssV3 {
    base_score: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CvssV2 {
    score: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Reference {
    url: String,
}

impl Vulnerability {
    /// CVSS v3 base score, else v2, else 0.
    fn score(&self) -> f64 {
        self.cvssv3
            .as_ref()
            .and_then(|c| c.base_score)
            .or_else(|| self.cvssv2.as_ref().and_then(|c| c.score))
            .unwrap_or(0.0)
    }
}

/// Score text with at least one decimal place (`5.0`, `7.4`, `9.25`).
fn format_score(score: f64) -> String {
    if score.fract() == 0.0 {
        format!("{:.1}", score)
    } else {
        score.to_string()
    }
}

/// Scan command for one project.
pub fn scan_command(settings: &DependencyCheckSettings, item: &WorkItem) -> ToolCommand {
    let out_dir = report_dir(item);
    let mut cmd = ToolCommand::new(&settings.path)
        .arg("--project")
        .arg(item.id.clone())
        .arg("--scan")
        .arg(item.source.clone())
        .arg("--format")
        .arg("JSON")
        .arg("--out")
        .arg(out_dir.display().to_string());
    if settings.no_update {
        cmd = cmd.arg("--noupdate");
    }
    cmd.expect_output(out_dir.join(REPORT_FILE))
}

pub fn report_dir(item: &WorkItem) -> PathBuf {
    item.path().join(REPORT_DIR)
}

/// Run `--version` once; the batch must not start when this fails.
pub async fn check_installation(runner: &ToolRunner, path: &str) -> Result<String> {
    let mut version_check = WorkItem::new("dependency-check", ".");
    let invocation = runner
        .run(&mut version_check, &ToolCommand::new(path).arg("--version"))
        .await;

    match invocation.failure_reason() {
        None => Ok(invocation.stdout.trim().to_string()),
        Some(reason) => bail!(
            "Dependency-Check is not usable at '{}': {}. Install it or set dependency_check.path",
            path,
            reason
        ),
    }
}

/// Vulnerability findings of one JSON report.
pub fn parse_report(project: &str, json: &str) -> Result<Vec<Finding>> {
    let report: Report =
        serde_json::from_str(json).context("Failed to parse Dependency-Check report")?;

    let mut findings = Vec::new();
    for dependency in report.dependencies {
        for vuln in &dependency.vulnerabilities {
            let score = vuln.score();
            let references: Vec<&str> = vuln
                .references
                .iter()
                .map(|r| r.url.as_str())
                .filter(|u| !u.is_empty())
                .collect();

            findings.push(
                Finding::new(project, VULNERABILITY, severity_from_score(score))
                    .with_attribute("packageName", dependency.file_name.clone())
                    .with_attribute("packagePath", dependency.file_path.clone())
                    .with_attribute("vulnerabilityId", vuln.name.clone())
                    .with_attribute("cvssScore", format_score(score))
                    .with_attribute("cwe", vuln.cwes.join(", "))
                    .with_attribute("description", vuln.description.clone())
                    .with_attribute("references", references.join(", "))
                    .with_attribute("published", vuln.published.clone().unwrap_or_default()),
            );
        }
    }
    Ok(findings)
}

pub fn load_report(project: &str, path: &Path) -> Result<Vec<Finding>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_report(project, &json)
}

pub fn summary_row(row: &SummaryRow) -> Row {
    let values = [
        row.item_id.clone(),
        row.severity_count(Severity::Critical).to_string(),
        row.severity_count(Severity::High).to_string(),
        row.severity_count(Severity::Medium).to_string(),
        row.severity_count(Severity::Low).to_string(),
        row.rated_total().to_string(),
    ];
    SUMMARY_COLUMNS
        .iter()
        .zip(values)
        .map(|(c, v)| (c.to_string(), v))
        .collect()
}

pub fn detail_row(finding: &Finding) -> Row {
    let mut row = Row::new();
    row.insert("projectName".to_string(), finding.item_id.clone());
    row.insert("severity".to_string(), finding.severity.to_string());
    for column in &DETAIL_COLUMNS {
        if !row.contains_key(*column) {
            row.insert(column.to_string(), finding.attribute(column).to_string());
        }
    }
    row
}

/// Batch-level counts for the closing log lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanStatistics {
    pub projects: usize,
    pub with_vulnerabilities: usize,
    pub total: u64,
    pub critical: u64,
    pub high: u64,
    pub medium: u64,
    pub low: u64,
    pub most_vulnerable: Option<(String, u64)>,
}

impl ScanStatistics {
    pub fn from_summaries(summaries: &[SummaryRow]) -> Self {
        let mut stats = Self {
            projects: summaries.len(),
            ..Self::default()
        };
        for row in summaries {
            let total = row.rated_total();
            if total > 0 {
                stats.with_vulnerabilities += 1;
            }
            stats.total += total;
            stats.critical += row.severity_count(Severity::Critical);
            stats.high += row.severity_count(Severity::High);
            stats.medium += row.severity_count(Severity::Medium);
            stats.low += row.severity_count(Severity::Low);

            let beats = match stats.most_vulnerable {
                Some((_, best)) => total > best,
                None => total > 0,
            };
            if beats {
                stats.most_vulnerable = Some((row.item_id.clone(), total));
            }
        }
        stats
    }

    pub fn log(&self) {
        info!("Projects analyzed: {}", self.projects);
        info!("Projects with vulnerabilities: {}", self.with_vulnerabilities);
        info!(
            "Vulnerabilities: {} total, {} critical, {} high, {} medium, {} low",
            self.total, self.critical, self.high, self.medium, self.low
        );
        if let Some((ref project, count)) = self.most_vulnerable {
            info!("Most vulnerable project: {} ({} vulnerabilities)", project, count);
        }
    }
}

/// Outcome of a scan batch.
#[derive(Debug, Default)]
pub struct DependencyCheckReport {
    pub summaries: Vec<SummaryRow>,
    pub findings: Vec<Finding>,
    pub failures: FailureLog,
}

impl DependencyCheckReport {
    pub fn summary_rows(&self) -> Vec<Row> {
        self.summaries.iter().map(summary_row).collect()
    }

    pub fn detail_rows(&self) -> Vec<Row> {
        self.findings.iter().map(detail_row).collect()
    }
}

/// Scan every project and fold each report into a summary row.
pub async fn scan_projects(
    runner: &ToolRunner,
    settings: &DependencyCheckSettings,
    items: Vec<WorkItem>,
) -> DependencyCheckReport {
    for item in &items {
        if let Err(e) = std::fs::create_dir_all(report_dir(item)) {
            warn!("Could not create report directory for {}: {}", item.id, e);
        }
    }

    let total = items.len();
    let scan_settings = settings.clone();
    let completed = runner
        .run_all(items, move |item| scan_command(&scan_settings, item))
        .await;

    let mut report = DependencyCheckReport::default();
    let mut projects = Vec::with_capacity(total);
    for done in completed {
        let project = done.item.id.clone();
        projects.push(project.clone());
        if let Some(reason) = done.invocation.failure_reason() {
            report.failures.record(project, reason);
            continue;
        }

        match load_report(&project, &report_dir(&done.item).join(REPORT_FILE)) {
            Ok(findings) => {
                info!("{}: {} vulnerabilities reported", project, findings.len());
                report.findings.extend(findings);
            }
            Err(e) => {
                error!("{}: {:#}", project, e);
                report.failures.record(project, format!("{:#}", e));
            }
        }
    }

    report.findings.sort_by(|a, b| a.item_id.cmp(&b.item_id));
    report.summaries = summarize_all(&report.findings);
    for project in projects {
        if !report.summaries.iter().any(|row| row.item_id == project) {
            report.summaries.push(SummaryRow::empty(project));
        }
    }
    report.summaries.sort_by(|a, b| a.item_id.cmp(&b.item_id));
    info!(
        "Dependency-Check finished: {} of {} projects failed",
        report.failures.len(),
        total
    );
    report
}
