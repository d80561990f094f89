//! Issue-tracker statistics: time to fix and keyword categories.

use crate::analysis::categories::CategoryTally;
use crate::analysis::resolution::{resolution_days, ResolutionStats};
use crate::api::{ApiClient, ApiOutcome};
use crate::error::ApiError;
use crate::report::{FailureLog, Row};
use crate::runner::fan_out;
use crate::targets::parse_github_url;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

const PAGE_SIZE: usize = 100;

/// One issue as returned by `GET /repos/{owner}/{repo}/issues`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IssueRecord {
    pub number: u64,
    pub title: String,
    pub body: Option<String>,
    pub state: String,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl IssueRecord {
    /// Seconds from creation to close, if closed.
    pub fn resolution_seconds(&self) -> Option<f64> {
        self.closed_at
            .map(|closed| (closed - self.created_at).num_milliseconds() as f64 / 1000.0)
    }
}

/// One row of the time-to-fix details dataset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolutionDetail {
    pub repository: String,
    pub issue_number: u64,
    pub title: String,
    pub created_at: String,
    pub closed_at: String,
    pub resolution_seconds: f64,
    pub resolution_days: f64,
}

impl ResolutionDetail {
    pub const COLUMNS: [&'static str; 7] = [
        "repository",
        "issue_number",
        "title",
        "created_at",
        "closed_at",
        "resolution_seconds",
        "resolution_days",
    ];
}

/// Start of `date` in UTC.
pub fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc()
}

/// Issues of `owner/repo`, page by page, until a page comes back short or
/// `limit` issues have been read.
async fn fetch_issues(
    client: &ApiClient,
    owner: &str,
    repo: &str,
    params: &[(&str, String)],
    limit: Option<usize>,
) -> Result<Vec<IssueRecord>, ApiError> {
    let endpoint = format!("repos/{}/{}/issues", owner, repo);
    let mut issues = Vec::new();
    let mut page = 1u32;

    loop {
        let mut query: Vec<(&str, String)> = params.to_vec();
        query.push(("per_page", PAGE_SIZE.to_string()));
        query.push(("page", page.to_string()));

        let batch: Vec<IssueRecord> = match client.request(&endpoint, &query).await? {
            ApiOutcome::Data(value) => serde_json::from_value(value)?,
            ApiOutcome::LimitReached => break,
        };
        let short = batch.len() < PAGE_SIZE;
        issues.extend(batch);

        if let Some(limit) = limit {
            if issues.len() >= limit {
                issues.truncate(limit);
                break;
            }
        }
        if short {
            break;
        }
        page += 1;
    }

    Ok(issues)
}

/// Issues closed at or before `cutoff`.
///
/// The issues endpoint lists pull requests too, and they are counted like
/// any other issue.
pub fn resolution_details(
    repository: &str,
    issues: &[IssueRecord],
    cutoff: DateTime<Utc>,
) -> Vec<ResolutionDetail> {
    issues
        .iter()
        .filter_map(|issue| {
            let closed = issue.closed_at.filter(|c| *c <= cutoff)?;
            let seconds = issue.resolution_seconds()?;
            Some(ResolutionDetail {
                repository: repository.to_string(),
                issue_number: issue.number,
                title: issue.title.clone(),
                created_at: issue.created_at.to_rfc3339(),
                closed_at: closed.to_rfc3339(),
                resolution_seconds: seconds,
                resolution_days: resolution_days(seconds),
            })
        })
        .collect()
}

/// Outcome of the time-to-fix collection.
#[derive(Debug, Default)]
pub struct ResolutionReport {
    pub details: Vec<ResolutionDetail>,
    pub summaries: Vec<ResolutionStats>,
    pub failures: FailureLog,
}

/// Time-to-fix details and per-repository statistics, in input order.
///
/// Repositories without a qualifying issue get no summary row.
pub async fn collect_resolution_times(
    client: &ApiClient,
    urls: Vec<String>,
    cutoff: NaiveDate,
    workers: usize,
) -> ResolutionReport {
    let cutoff = start_of_day(cutoff);
    let client = client.clone();
    let jobs: Vec<(usize, String)> = urls.into_iter().enumerate().collect();

    let mut results = fan_out(jobs, workers, move |(index, url), tx| {
        let client = client.clone();
        async move {
            let Some((owner, repo)) = parse_github_url(&url) else {
                let _ = tx.send((index, url, Err("not a GitHub repository URL".to_string())));
                return;
            };
            let params = [
                ("state", "closed".to_string()),
                ("sort", "updated".to_string()),
                ("direction", "desc".to_string()),
            ];
            let repository = format!("{}/{}", owner, repo);
            let result = fetch_issues(&client, &owner, &repo, &params, None)
                .await
                .map(|issues| resolution_details(&repository, &issues, cutoff))
                .map_err(|e| e.to_string());
            let _ = tx.send((index, url, result));
        }
    })
    .await;
    results.sort_by_key(|(index, _, _)| *index);

    let mut report = ResolutionReport::default();
    for (_, url, result) in results {
        match result {
            Ok(details) => {
                let seconds: Vec<f64> = details.iter().map(|d| d.resolution_seconds).collect();
                match details.first() {
                    Some(first) => {
                        if let Some(stats) = ResolutionStats::from_seconds(&first.repository, &seconds) {
                            info!("{}: {} closed issues analysed", first.repository, stats.issues_analyzed);
                            report.summaries.push(stats);
                        }
                    }
                    None => info!("No closed issues before the cutoff for {}", url),
                }
                report.details.extend(details);
            }
            Err(reason) => {
                warn!("Skipping {}: {}", url, reason);
                report.failures.record(url, reason);
            }
        }
    }
    report
}

/// Creation window of categorised issues, both ends inclusive.
#[derive(Debug, Clone, Copy)]
pub struct IssueWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl IssueWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start: start_of_day(start),
            end: start_of_day(end),
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }
}

/// Tally keyword categories over the issues created inside `window`.
pub fn categorize(issues: &[IssueRecord], window: &IssueWindow) -> CategoryTally {
    let mut tally = CategoryTally::new();
    for issue in issues.iter().filter(|i| window.contains(i.created_at)) {
        tally.add_issue(&issue.title, issue.body.as_deref().unwrap_or(""));
    }
    tally
}

/// Category rows, in input order, for repositories with at least one issue
/// in the window.
pub async fn collect_issue_categories(
    client: &ApiClient,
    urls: Vec<String>,
    window: IssueWindow,
    max_issues: usize,
    workers: usize,
) -> (Vec<Row>, FailureLog) {
    let client = client.clone();
    let jobs: Vec<(usize, String)> = urls.into_iter().enumerate().collect();

    let mut results = fan_out(jobs, workers, move |(index, url), tx| {
        let client = client.clone();
        async move {
            let Some((owner, repo)) = parse_github_url(&url) else {
                let _ = tx.send((index, url, Err("not a GitHub repository URL".to_string())));
                return;
            };
            let params = [("state", "all".to_string())];
            let result = fetch_issues(&client, &owner, &repo, &params, Some(max_issues))
                .await
                .map(|issues| categorize(&issues, &window))
                .map_err(|e| e.to_string());
            let _ = tx.send((index, url, result));
        }
    })
    .await;
    results.sort_by_key(|(index, _, _)| *index);

    let mut rows = Vec::new();
    let mut failures = FailureLog::new();
    for (_, url, result) in results {
        match result {
            Ok(tally) if tally.issues() > 0 => {
                info!("{}: {} issues categorised", url, tally.issues());
                rows.push(tally.to_row(&url));
            }
            Ok(_) => {
                warn!("No issues in the date window for {}", url);
                failures.record(url, "no issues in the date window");
            }
            Err(reason) => {
                warn!("Skipping {}: {}", url, reason);
                failures.record(url, reason);
            }
        }
    }
    (rows, failures)
}
