//! Repository search over a creation window.

use crate::api::{ApiClient, ApiOutcome};
use crate::error::ApiError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info, warn};

/// Pause between consecutive search pages.
const PAGE_PAUSE: Duration = Duration::from_secs(1);

/// GitHub caps `per_page` at this value.
const MAX_PER_PAGE: u32 = 100;

/// What to search for and which pages to read.
#[derive(Debug, Clone)]
pub struct SearchParams {
    pub language: String,
    pub created_start: NaiveDate,
    pub created_end: NaiveDate,
    pub pushed_after: NaiveDate,
    pub start_page: u32,
    pub end_page: u32,
    pub per_page: u32,
}

impl SearchParams {
    /// Search qualifier string, e.g.
    /// `language:javascript created:2022-01-01..2022-01-31 pushed:>=2025-02-01`.
    pub fn query(&self) -> String {
        format!(
            "language:{} created:{}..{} pushed:>={}",
            self.language, self.created_start, self.created_end, self.pushed_after
        )
    }
}

#[derive(Debug, Default, Deserialize)]
struct SearchPage {
    #[serde(default)]
    items: Vec<RepositoryItem>,
}

#[derive(Debug, Default, Deserialize)]
struct License {
    #[serde(default)]
    name: Option<String>,
}

/// One search hit as returned by the API; absent fields take defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RepositoryItem {
    id: u64,
    name: String,
    full_name: String,
    html_url: String,
    description: Option<String>,
    language: Option<String>,
    created_at: String,
    updated_at: String,
    pushed_at: String,
    stargazers_count: u64,
    forks_count: u64,
    open_issues_count: u64,
    license: Option<License>,
    topics: Vec<String>,
}

/// One row of the search dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositoryRecord {
    pub id: u64,
    pub name: String,
    pub full_name: String,
    pub html_url: String,
    pub description: String,
    pub language: String,
    pub created_at: String,
    pub updated_at: String,
    pub pushed_at: String,
    pub stargazers_count: u64,
    pub forks_count: u64,
    pub open_issues_count: u64,
    pub license: String,
    /// JSON list, e.g. `["react","ui"]`.
    pub topics: String,
}

impl RepositoryRecord {
    pub const COLUMNS: [&'static str; 14] = [
        "id",
        "name",
        "full_name",
        "html_url",
        "description",
        "language",
        "created_at",
        "updated_at",
        "pushed_at",
        "stargazers_count",
        "forks_count",
        "open_issues_count",
        "license",
        "topics",
    ];
}

impl From<RepositoryItem> for RepositoryRecord {
    fn from(item: RepositoryItem) -> Self {
        Self {
            id: item.id,
            name: item.name,
            full_name: item.full_name,
            html_url: item.html_url,
            description: item.description.unwrap_or_default(),
            language: item.language.unwrap_or_default(),
            created_at: item.created_at,
            updated_at: item.updated_at,
            pushed_at: item.pushed_at,
            stargazers_count: item.stargazers_count,
            forks_count: item.forks_count,
            open_issues_count: item.open_issues_count,
            license: item.license.and_then(|l| l.name).unwrap_or_default(),
            topics: serde_json::to_string(&item.topics).unwrap_or_else(|_| "[]".to_string()),
        }
    }
}

fn parse_page(value: serde_json::Value) -> Result<Vec<RepositoryRecord>, ApiError> {
    let page: SearchPage = serde_json::from_value(value)?;
    Ok(page.items.into_iter().map(RepositoryRecord::from).collect())
}

/// Read search pages `start_page..=end_page`.
///
/// Stops early, keeping what was collected, when the provider's result
/// window is reached, a page comes back empty, or a request fails.
pub async fn search_repositories(client: &ApiClient, params: &SearchParams) -> Vec<RepositoryRecord> {
    let query = params.query();
    let per_page = params.per_page.clamp(1, MAX_PER_PAGE);
    info!("Searching repositories: {}", query);

    let mut records = Vec::new();
    for page in params.start_page..=params.end_page {
        if page > params.start_page {
            tokio::time::sleep(PAGE_PAUSE).await;
        }

        let query_params = [
            ("q", query.clone()),
            ("sort", "updated".to_string()),
            ("order", "desc".to_string()),
            ("per_page", per_page.to_string()),
            ("page", page.to_string()),
        ];

        let value = match client.request("search/repositories", &query_params).await {
            Ok(ApiOutcome::Data(value)) => value,
            Ok(ApiOutcome::LimitReached) => {
                warn!("Search result limit reached at page {}, keeping {} repositories", page, records.len());
                break;
            }
            Err(ApiError::Cancelled) => {
                warn!("Search interrupted at page {}, keeping {} repositories", page, records.len());
                break;
            }
            Err(e) => {
                error!("Search page {} failed: {}", page, e);
                break;
            }
        };

        let items = match parse_page(value) {
            Ok(items) => items,
            Err(e) => {
                error!("Could not decode search page {}: {}", page, e);
                break;
            }
        };

        if items.is_empty() {
            info!("Page {} is empty, stopping", page);
            break;
        }

        info!("Page {}: {} repositories", page, items.len());
        records.extend(items);
    }

    info!("Collected {} repositories", records.len());
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params() -> SearchParams {
        SearchParams {
            language: "javascript".to_string(),
            created_start: NaiveDate::from_ymd_opt(2022, 1, 1).unwrap(),
            created_end: NaiveDate::from_ymd_opt(2022, 1, 31).unwrap(),
            pushed_after: NaiveDate::from_ymd_opt(2025, 2, 1).unwrap(),
            start_page: 1,
            end_page: 3,
            per_page: 100,
        }
    }

    #[test]
    fn test_query_string() {
        assert_eq!(
            params().query(),
            "language:javascript created:2022-01-01..2022-01-31 pushed:>=2025-02-01"
        );
    }

    #[test]
    fn test_parse_page_extracts_fields() {
        let value = json!({
            "total_count": 1,
            "items": [{
                "id": 42,
                "name": "app",
                "full_name": "acme/app",
                "html_url": "https://github.com/acme/app",
                "description": null,
                "language": "JavaScript",
                "created_at": "2022-01-03T10:00:00Z",
                "updated_at": "2025-03-01T10:00:00Z",
                "pushed_at": "2025-03-01T09:00:00Z",
                "stargazers_count": 12,
                "forks_count": 3,
                "open_issues_count": 4,
                "license": {"key": "mit", "name": "MIT License"},
                "topics": ["react", "ui"],
                "owner": {"login": "acme"}
            }]
        });

        let records = parse_page(value).unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.id, 42);
        assert_eq!(record.full_name, "acme/app");
        assert_eq!(record.description, "");
        assert_eq!(record.license, "MIT License");
        assert_eq!(record.topics, r#"["react","ui"]"#);
    }

    #[test]
    fn test_parse_page_defaults_missing_fields() {
        let records = parse_page(json!({"items": [{"name": "bare", "license": null}]})).unwrap();
        assert_eq!(records[0].stargazers_count, 0);
        assert_eq!(records[0].license, "");
        assert_eq!(records[0].topics, "[]");

        assert!(parse_page(json!({})).unwrap().is_empty());
    }
}
