//! Contributor counts per repository.
//!
//! GraphQL `mentionableUsers.totalCount` is tried first. When GraphQL
//! reports errors or the request fails, the count falls back to paging the
//! REST contributors list (anonymous contributors included). The two sources
//! do not measure exactly the same thing, and each row carries whichever
//! succeeded.

use crate::api::{ApiClient, ApiOutcome};
use crate::report::Row;
use crate::runner::fan_out;
use crate::targets::{parse_github_url, Table};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

const CONTRIBUTORS_QUERY: &str = r#"
query($owner: String!, $repo: String!) {
  repository(owner: $owner, name: $repo) {
    mentionableUsers(first: 1) {
      totalCount
    }
  }
}
"#;

const REST_PAGE_SIZE: usize = 100;

/// Input columns carried over to the output, when present.
const CARRIED_COLUMNS: [&str; 3] = ["stargazers_count", "forks_count", "open_issues_count"];

pub const COUNT_COLUMN: &str = "contributors_count";

/// Count from a GraphQL `data` member; `None` when the repository is absent.
fn graphql_count(data: &Value) -> Option<u64> {
    let repository = data.get("repository")?;
    if repository.is_null() {
        return None;
    }
    Some(
        repository
            .pointer("/mentionableUsers/totalCount")
            .and_then(Value::as_u64)
            .unwrap_or(0),
    )
}

/// Count contributors by paging the REST list.
///
/// A missing repository counts 0; any other failure keeps what was counted.
async fn count_via_rest(client: &ApiClient, owner: &str, repo: &str) -> u64 {
    let endpoint = format!("repos/{}/{}/contributors", owner, repo);
    let mut total = 0u64;
    let mut page = 1u32;

    loop {
        let params = [
            ("page", page.to_string()),
            ("per_page", REST_PAGE_SIZE.to_string()),
            ("anon", "true".to_string()),
        ];

        let contributors = match client.request(&endpoint, &params).await {
            Ok(ApiOutcome::Data(Value::Array(items))) => items,
            // GitHub answers 204 with no body for empty repositories.
            Ok(ApiOutcome::Data(_)) | Ok(ApiOutcome::LimitReached) => break,
            Err(e) if e.is_not_found() => {
                warn!("Repository {}/{} not found", owner, repo);
                return 0;
            }
            Err(e) => {
                warn!("REST contributors for {}/{} failed: {}", owner, repo, e);
                break;
            }
        };

        total += contributors.len() as u64;
        if contributors.len() < REST_PAGE_SIZE {
            break;
        }
        page += 1;
    }

    total
}

/// Contributors of `owner/repo`, GraphQL first with REST fallback.
pub async fn contributor_count(client: &ApiClient, owner: &str, repo: &str) -> u64 {
    let variables = json!({ "owner": owner, "repo": repo });

    match client.graphql(CONTRIBUTORS_QUERY, variables).await {
        Ok(data) => match graphql_count(&data) {
            Some(count) => return count,
            None => {
                warn!("Repository {}/{} not found or not accessible", owner, repo);
                return 0;
            }
        },
        Err(e) => debug!("GraphQL failed for {}/{}: {}", owner, repo, e),
    }

    info!("Using REST fallback for {}/{}", owner, repo);
    count_via_rest(client, owner, repo).await
}

/// Output columns: the URL column, the carried counters present in the
/// input, then the contributor count.
pub fn output_columns(table: &Table, url_column: &str) -> Vec<String> {
    let mut columns = vec![url_column.to_string()];
    columns.extend(
        CARRIED_COLUMNS
            .iter()
            .filter(|c| table.has_column(c))
            .map(|c| c.to_string()),
    );
    columns.push(COUNT_COLUMN.to_string());
    columns
}

/// One output row per input row, in input order.
///
/// Rows without a GitHub URL get a count of 0 without any request.
pub async fn collect_contributors(
    client: &ApiClient,
    table: &Table,
    url_column: &str,
    workers: usize,
) -> Vec<Row> {
    let columns = output_columns(table, url_column);
    let carried: Vec<String> = columns[..columns.len() - 1].to_vec();

    let jobs: Vec<(usize, Row, String)> = table
        .rows
        .iter()
        .enumerate()
        .map(|(index, row)| {
            let base: Row = carried
                .iter()
                .map(|c| (c.clone(), table.value(row, c).to_string()))
                .collect();
            (index, base, table.value(row, url_column).trim().to_string())
        })
        .collect();

    let client = client.clone();
    let mut results = fan_out(jobs, workers, move |(index, mut row, url), tx| {
        let client = client.clone();
        async move {
            let count = match parse_github_url(&url) {
                Some((owner, repo)) => {
                    let count = contributor_count(&client, &owner, &repo).await;
                    info!("{}/{}: {} contributors", owner, repo, count);
                    count
                }
                None => {
                    if !url.is_empty() {
                        warn!("Skipping invalid GitHub URL: {}", url);
                    }
                    0
                }
            };
            // A cancelled lookup has no real count.
            if client.is_cancelled() {
                debug!("Dropping unfinished row for {}", url);
                return;
            }
            row.insert(COUNT_COLUMN.to_string(), count.to_string());
            let _ = tx.send((index, row));
        }
    })
    .await;

    results.sort_by_key(|(index, _)| *index);
    results.into_iter().map(|(_, row)| row).collect()
}
