//! SonarQube scanning and issue export.
//!
//! A batch runs `sonar-scanner` on every project, exports the issues of the
//! projects that scanned cleanly through the Web API, and folds them into
//! one summary row per project.

use crate::analysis::{format_time, parse_time};
use crate::api::{ApiClient, ApiOutcome};
use crate::error::ApiError;
use crate::models::WorkItem;
use crate::report::{FailureLog, Row};
use crate::runner::{fan_out, ToolCommand, ToolRunner};
use crate::targets::Table;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{error, info, warn};

/// SonarQube refuses to page past this many issues per query.
const RESULT_WINDOW: usize = 10_000;

/// Scanner and export settings of one batch.
#[derive(Debug, Clone)]
pub struct SonarSettings {
    pub url: String,
    pub token: String,
    pub scanner_path: String,
    pub page_size: u32,
    pub export_delay: Duration,
}

/// `sonar-scanner` invocation for one project; the project key is its name.
pub fn scan_command(settings: &SonarSettings, item: &WorkItem) -> ToolCommand {
    ToolCommand::new(&settings.scanner_path)
        .arg(format!("-Dsonar.projectKey={}", item.id))
        .arg(format!("-Dsonar.host.url={}", settings.url))
        .arg(format!("-Dsonar.login={}", settings.token))
        .arg(format!("-Dsonar.projectBaseDir={}", item.source))
        .arg("-Dsonar.scm.disabled=true")
        .current_dir(item.path())
}

/// Software-quality impact of an issue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Impact {
    #[serde(default)]
    pub software_quality: String,
    #[serde(default)]
    pub severity: String,
}

/// One issue of `api/issues/search`; absent fields take defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SonarIssue {
    pub key: String,
    pub rule: String,
    pub severity: String,
    pub component: String,
    pub line: Option<u64>,
    pub message: String,
    #[serde(rename = "type")]
    pub issue_type: String,
    pub status: String,
    pub effort: Option<String>,
    pub debt: Option<String>,
    pub clean_code_attribute: String,
    pub clean_code_attribute_category: String,
    pub impacts: Vec<Impact>,
    pub tags: Vec<String>,
    pub creation_date: String,
    pub update_date: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct IssuePage {
    total: usize,
    issues: Vec<SonarIssue>,
}

/// One row of `all_results.csv`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueRow {
    pub project: String,
    pub key: String,
    pub rule: String,
    pub severity: String,
    pub component: String,
    pub line: String,
    pub message: String,
    #[serde(rename = "type")]
    pub issue_type: String,
    pub status: String,
    pub debt: String,
    pub clean_code_attribute: String,
    pub clean_code_attribute_category: String,
    /// JSON array of `{softwareQuality, severity}`.
    pub impacts: String,
    pub tags: String,
    pub creation_date: String,
    pub update_date: String,
}

impl IssueRow {
    pub const COLUMNS: [&'static str; 16] = [
        "project",
        "key",
        "rule",
        "severity",
        "component",
        "line",
        "message",
        "type",
        "status",
        "debt",
        "cleanCodeAttribute",
        "cleanCodeAttributeCategory",
        "impacts",
        "tags",
        "creationDate",
        "updateDate",
    ];

    pub fn from_issue(project: &str, issue: SonarIssue) -> Self {
        Self {
            project: project.to_string(),
            key: issue.key,
            rule: issue.rule,
            severity: issue.severity,
            component: issue.component,
            line: issue.line.map(|l| l.to_string()).unwrap_or_default(),
            message: issue.message,
            issue_type: issue.issue_type,
            status: issue.status,
            debt: issue.debt.or(issue.effort).unwrap_or_default(),
            clean_code_attribute: issue.clean_code_attribute,
            clean_code_attribute_category: issue.clean_code_attribute_category,
            impacts: serde_json::to_string(&issue.impacts).unwrap_or_else(|_| "[]".to_string()),
            tags: issue.tags.join(","),
            creation_date: issue.creation_date,
            update_date: issue.update_date,
        }
    }
}

/// Parse the `impacts` cell; malformed text means no impacts.
///
/// Single-quoted lists (as left by some exporters) are accepted too.
pub fn parse_impacts(cell: &str) -> Vec<Impact> {
    let cell = cell.trim();
    if cell.is_empty() {
        return Vec::new();
    }
    serde_json::from_str(cell)
        .or_else(|_| serde_json::from_str(&cell.replace('\'', "\"")))
        .unwrap_or_default()
}

/// Per-project counters of `summary.csv`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SonarSummary {
    pub project: String,
    pub consistent: u64,
    pub intentional: u64,
    pub adaptable: u64,
    pub responsible: u64,
    pub bugs: u64,
    pub vulnerabilities: u64,
    pub code_smells: u64,
    pub maintainability: u64,
    pub reliability: u64,
    pub security: u64,
    pub low_severity: u64,
    pub medium_severity: u64,
    pub high_severity: u64,
    pub debt_minutes: u64,
}

impl SonarSummary {
    pub const COLUMNS: [&'static str; 15] = [
        "project",
        "numberOfIssuesRelatedToConsistentCode",
        "numberOfIssuesRelatedToIntentionalCode",
        "numberOfIssuesRelatedToAdaptableCode",
        "numberOfIssuesRelatedToResponsibleCode",
        "numberOfBugs",
        "numberOfVulnerabilities",
        "numberOfCodeSmells",
        "numberOfIssuesRelatedToMaintainability",
        "numberOfIssuesRelatedToReliability",
        "numberOfIssuesRelatedToSecurity",
        "numberOfIssuesWithLowSeverity",
        "numberOfIssuesWithMediumSeverity",
        "numberOfIssuesWithHighSeverity",
        "totalTimeNeededToRemoveDebts",
    ];

    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            ..Self::default()
        }
    }

    /// Count one issue. Unknown categories, types and qualities count nowhere.
    pub fn add(&mut self, category: &str, issue_type: &str, impacts: &[Impact], debt: &str) {
        match category {
            "CONSISTENT" => self.consistent += 1,
            "INTENTIONAL" => self.intentional += 1,
            "ADAPTABLE" => self.adaptable += 1,
            "RESPONSIBLE" => self.responsible += 1,
            _ => {}
        }

        match issue_type {
            "CODE_SMELL" => self.code_smells += 1,
            "BUG" => self.bugs += 1,
            "VULNERABILITY" => self.vulnerabilities += 1,
            _ => {}
        }

        for impact in impacts {
            match impact.software_quality.as_str() {
                "MAINTAINABILITY" => self.maintainability += 1,
                "RELIABILITY" => self.reliability += 1,
                "SECURITY" => self.security += 1,
                _ => {}
            }
            match impact.severity.as_str() {
                "LOW" => self.low_severity += 1,
                "MEDIUM" => self.medium_severity += 1,
                "HIGH" => self.high_severity += 1,
                _ => {}
            }
        }

        self.debt_minutes += parse_time(debt);
    }

    pub fn to_row(&self) -> Row {
        let counts = [
            self.consistent,
            self.intentional,
            self.adaptable,
            self.responsible,
            self.bugs,
            self.vulnerabilities,
            self.code_smells,
            self.maintainability,
            self.reliability,
            self.security,
            self.low_severity,
            self.medium_severity,
            self.high_severity,
        ];

        let mut row = Row::new();
        row.insert(Self::COLUMNS[0].to_string(), self.project.clone());
        for (column, count) in Self::COLUMNS[1..14].iter().zip(counts) {
            row.insert(column.to_string(), count.to_string());
        }
        row.insert(Self::COLUMNS[14].to_string(), format_time(self.debt_minutes));
        row
    }
}

/// Fold issue rows into summaries, in order of first appearance.
pub fn summarize_rows(rows: &[IssueRow]) -> Vec<SonarSummary> {
    let mut order: Vec<String> = Vec::new();
    let mut summaries: HashMap<String, SonarSummary> = HashMap::new();

    for row in rows {
        let summary = summaries.entry(row.project.clone()).or_insert_with(|| {
            order.push(row.project.clone());
            SonarSummary::new(row.project.clone())
        });
        summary.add(
            &row.clean_code_attribute_category,
            &row.issue_type,
            &parse_impacts(&row.impacts),
            &row.debt,
        );
    }

    order
        .into_iter()
        .filter_map(|p| summaries.remove(&p))
        .collect()
}

/// Rebuild summaries from an existing `all_results.csv`.
pub fn summarize_table(table: &Table) -> Vec<SonarSummary> {
    let rows: Vec<IssueRow> = table
        .rows
        .iter()
        .filter(|row| !table.value(row, "project").is_empty())
        .map(|row| IssueRow {
            project: table.value(row, "project").to_string(),
            key: table.value(row, "key").to_string(),
            rule: table.value(row, "rule").to_string(),
            severity: table.value(row, "severity").to_string(),
            component: table.value(row, "component").to_string(),
            line: table.value(row, "line").to_string(),
            message: table.value(row, "message").to_string(),
            issue_type: table.value(row, "type").to_string(),
            status: table.value(row, "status").to_string(),
            debt: table.value(row, "debt").to_string(),
            clean_code_attribute: table.value(row, "cleanCodeAttribute").to_string(),
            clean_code_attribute_category: table
                .value(row, "cleanCodeAttributeCategory")
                .to_string(),
            impacts: table.value(row, "impacts").to_string(),
            tags: table.value(row, "tags").to_string(),
            creation_date: table.value(row, "creationDate").to_string(),
            update_date: table.value(row, "updateDate").to_string(),
        })
        .collect();
    summarize_rows(&rows)
}

/// Every issue of one project, up to the provider's result window.
pub async fn fetch_project_issues(
    client: &ApiClient,
    project_key: &str,
    page_size: u32,
) -> Result<Vec<SonarIssue>, ApiError> {
    let page_size = page_size.clamp(1, 500) as usize;
    let mut issues = Vec::new();
    let mut page = 1usize;

    loop {
        let params = [
            ("componentKeys", project_key.to_string()),
            ("ps", page_size.to_string()),
            ("p", page.to_string()),
        ];
        let value = match client.request("api/issues/search", &params).await? {
            ApiOutcome::Data(value) => value,
            ApiOutcome::LimitReached => {
                warn!("{}: stopped at the {} issue window", project_key, RESULT_WINDOW);
                break;
            }
        };

        let batch: IssuePage = serde_json::from_value(value)?;
        let fetched = batch.issues.len();
        issues.extend(batch.issues);

        if fetched == 0 || issues.len() >= batch.total || page * page_size >= RESULT_WINDOW {
            break;
        }
        page += 1;
    }

    Ok(issues)
}

/// Outcome of a scan batch.
#[derive(Debug, Default)]
pub struct SonarReport {
    pub issues: Vec<IssueRow>,
    pub summaries: Vec<SonarSummary>,
    pub scanned: usize,
    pub failures: FailureLog,
}

/// Scan every project, export the issues of the successful ones and
/// summarise them. Scanned projects without issues get a zero row.
pub async fn scan_projects(
    runner: &ToolRunner,
    client: &ApiClient,
    settings: &SonarSettings,
    items: Vec<WorkItem>,
) -> SonarReport {
    let total = items.len();
    info!("Starting scan of {} projects with {} workers", total, runner.workers());

    let scan_settings = settings.clone();
    let completed = runner
        .run_all(items, move |item| scan_command(&scan_settings, item))
        .await;

    let mut report = SonarReport::default();
    let mut scanned: Vec<String> = Vec::new();
    for done in completed {
        match done.invocation.failure_reason() {
            None => scanned.push(done.item.id),
            Some(reason) => {
                if !done.invocation.stderr.is_empty() {
                    error!(item = %done.item.id, "Scanner stderr: {}", done.invocation.stderr.trim_end());
                }
                report.failures.record(done.item.id, reason);
            }
        }
    }
    scanned.sort();
    report.scanned = scanned.len();
    info!("Completed scanning {} out of {} projects", scanned.len(), total);

    let client = client.clone();
    let delay = settings.export_delay;
    let page_size = settings.page_size;
    let exported = fan_out(scanned.clone(), runner.workers(), move |project, tx| {
        let client = client.clone();
        async move {
            tokio::time::sleep(delay).await;
            let result = fetch_project_issues(&client, &project, page_size).await;
            let _ = tx.send((project, result));
        }
    })
    .await;

    let mut by_project: HashMap<String, Vec<SonarIssue>> = HashMap::new();
    for (project, result) in exported {
        match result {
            Ok(issues) => {
                info!("Exported {} issues for project {}", issues.len(), project);
                by_project.insert(project, issues);
            }
            Err(e) => {
                error!("Error exporting report for {}: {}", project, e);
                report.failures.record(project, format!("export failed: {}", e));
            }
        }
    }

    for project in scanned {
        let Some(issues) = by_project.remove(&project) else {
            continue;
        };
        let rows: Vec<IssueRow> = issues
            .into_iter()
            .map(|issue| IssueRow::from_issue(&project, issue))
            .collect();
        let summary = summarize_rows(&rows)
            .into_iter()
            .next()
            .unwrap_or_else(|| SonarSummary::new(project.clone()));
        report.summaries.push(summary);
        report.issues.extend(rows);
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn settings() -> SonarSettings {
        SonarSettings {
            url: "http://127.0.0.1:9000".to_string(),
            token: "squ_test".to_string(),
            scanner_path: "sonar-scanner".to_string(),
            page_size: 500,
            export_delay: Duration::ZERO,
        }
    }

    fn issue_row(project: &str, category: &str, issue_type: &str, impacts: &str, debt: &str) -> IssueRow {
        IssueRow {
            project: project.to_string(),
            key: String::new(),
            rule: String::new(),
            severity: String::new(),
            component: String::new(),
            line: String::new(),
            message: String::new(),
            issue_type: issue_type.to_string(),
            status: String::new(),
            debt: debt.to_string(),
            clean_code_attribute: String::new(),
            clean_code_attribute_category: category.to_string(),
            impacts: impacts.to_string(),
            tags: String::new(),
            creation_date: String::new(),
            update_date: String::new(),
        }
    }

    #[test]
    fn test_scan_command_arguments() {
        let item = WorkItem::new("demo", "/repos/demo");
        let cmd = scan_command(&settings(), &item);

        assert_eq!(cmd.program, "sonar-scanner");
        assert_eq!(
            cmd.args,
            vec![
                "-Dsonar.projectKey=demo",
                "-Dsonar.host.url=http://127.0.0.1:9000",
                "-Dsonar.login=squ_test",
                "-Dsonar.projectBaseDir=/repos/demo",
                "-Dsonar.scm.disabled=true",
            ]
        );
    }

    #[test]
    fn test_issue_decoding_and_row() {
        let issue: SonarIssue = serde_json::from_value(json!({
            "key": "AX1",
            "rule": "javascript:S1481",
            "severity": "MINOR",
            "component": "demo:src/a.js",
            "line": 12,
            "message": "Remove this unused variable",
            "type": "CODE_SMELL",
            "status": "OPEN",
            "effort": "5min",
            "debt": "5min",
            "cleanCodeAttribute": "CLEAR",
            "cleanCodeAttributeCategory": "INTENTIONAL",
            "impacts": [{"softwareQuality": "MAINTAINABILITY", "severity": "LOW"}],
            "tags": ["unused"],
            "creationDate": "2024-01-01T00:00:00+0000"
        }))
        .unwrap();

        let row = IssueRow::from_issue("demo", issue);
        assert_eq!(row.line, "12");
        assert_eq!(row.issue_type, "CODE_SMELL");
        assert_eq!(row.impacts, r#"[{"softwareQuality":"MAINTAINABILITY","severity":"LOW"}]"#);
        assert_eq!(row.update_date, "");
    }

    #[test]
    fn test_debt_falls_back_to_effort() {
        let issue: SonarIssue = serde_json::from_value(json!({"effort": "1h"})).unwrap();
        assert_eq!(IssueRow::from_issue("p", issue).debt, "1h");
    }

    #[test]
    fn test_parse_impacts() {
        let impacts = parse_impacts(r#"[{"softwareQuality":"SECURITY","severity":"HIGH"}]"#);
        assert_eq!(impacts.len(), 1);
        assert_eq!(impacts[0].software_quality, "SECURITY");

        let quoted = parse_impacts("[{'softwareQuality': 'RELIABILITY', 'severity': 'MEDIUM'}]");
        assert_eq!(quoted[0].severity, "MEDIUM");

        assert!(parse_impacts("not json").is_empty());
        assert!(parse_impacts("").is_empty());
    }

    #[test]
    fn test_summary_counts() {
        let rows = vec![
            issue_row(
                "a",
                "INTENTIONAL",
                "CODE_SMELL",
                r#"[{"softwareQuality":"MAINTAINABILITY","severity":"LOW"}]"#,
                "1h12min",
            ),
            issue_row(
                "a",
                "CONSISTENT",
                "BUG",
                r#"[{"softwareQuality":"RELIABILITY","severity":"HIGH"},{"softwareQuality":"SECURITY","severity":"MEDIUM"}]"#,
                "48min",
            ),
            issue_row("b", "ODD", "SECURITY_HOTSPOT", "garbage", ""),
        ];

        let summaries = summarize_rows(&rows);
        assert_eq!(summaries.len(), 2);

        let a = &summaries[0];
        assert_eq!(a.project, "a");
        assert_eq!((a.intentional, a.consistent), (1, 1));
        assert_eq!((a.code_smells, a.bugs), (1, 1));
        assert_eq!((a.maintainability, a.reliability, a.security), (1, 1, 1));
        assert_eq!((a.low_severity, a.medium_severity, a.high_severity), (1, 1, 1));
        assert_eq!(a.debt_minutes, 120);

        let row = a.to_row();
        assert_eq!(row["totalTimeNeededToRemoveDebts"], "2h");
        assert_eq!(row["numberOfBugs"], "1");
        assert_eq!(row.len(), SonarSummary::COLUMNS.len());

        let b = &summaries[1];
        assert_eq!(b.to_row()["totalTimeNeededToRemoveDebts"], "0min");
        assert_eq!(b.code_smells + b.bugs + b.vulnerabilities, 0);
    }

    #[test]
    fn test_summarize_table_reads_all_results_columns() {
        let table = Table {
            headers: vec![
                "project".to_string(),
                "type".to_string(),
                "cleanCodeAttributeCategory".to_string(),
                "impacts".to_string(),
                "debt".to_string(),
            ],
            rows: vec![
                vec![
                    "p".to_string(),
                    "VULNERABILITY".to_string(),
                    "RESPONSIBLE".to_string(),
                    "[]".to_string(),
                    "10min".to_string(),
                ],
                vec![
                    "".to_string(),
                    "BUG".to_string(),
                    "".to_string(),
                    "".to_string(),
                    "".to_string(),
                ],
            ],
        };

        let summaries = summarize_table(&table);
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].vulnerabilities, 1);
        assert_eq!(summaries[0].responsible, 1);
        assert_eq!(summaries[0].debt_minutes, 10);
    }
}
