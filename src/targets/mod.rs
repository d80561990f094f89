//! Target enumeration.
//!
//! Work items come from two places: project directories under a root folder,
//! and rows of a CSV table produced by an earlier stage (usually the search
//! output, keyed by `html_url`).

use crate::models::WorkItem;
use anyhow::{Context, Result};
use crate::report::Row;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// An in-memory CSV table with its header order preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub headers: Vec<String>,
    /// Every row has exactly `headers.len()` cells.
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Cell of `row` under `column`, or `""` when the column is absent.
    pub fn value<'a>(&self, row: &'a [String], column: &str) -> &'a str {
        self.column_index(column)
            .and_then(|i| row.get(i))
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Rows as column-keyed maps, for the tabular writer.
    pub fn to_maps(&self) -> Vec<Row> {
        self.rows
            .iter()
            .map(|row| {
                self.headers
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect()
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Every immediate subdirectory of `root`, sorted by name.
///
/// With `require_git`, only directories holding a `.git` entry qualify.
pub fn list_projects(root: &Path, require_git: bool) -> Result<Vec<WorkItem>> {
    let entries = fs::read_dir(root)
        .with_context(|| format!("Failed to read projects folder: {}", root.display()))?;

    let mut items = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        if require_git && !path.join(".git").exists() {
            debug!("Skipping {} (not a git repository)", path.display());
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        items.push(WorkItem::new(name, path.to_string_lossy().to_string()));
    }

    items.sort_by(|a, b| a.id.cmp(&b.id));
    debug!("Found {} projects in {}", items.len(), root.display());
    Ok(items)
}

/// Decode bytes as UTF-8, falling back to Latin-1.
pub fn decode_text(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => e.into_bytes().iter().map(|&b| b as char).collect(),
    }
}

/// Read a CSV file into a [`Table`].
///
/// Short rows are padded with empty cells, long rows are truncated to the
/// header width.
pub fn read_table(path: &Path) -> Result<Table> {
    let bytes =
        fs::read(path).with_context(|| format!("Failed to read table: {}", path.display()))?;
    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => {
            warn!("{} is not valid UTF-8, decoding as Latin-1", path.display());
            decode_text(e.into_bytes())
        }
    };

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .with_context(|| format!("Failed to read header of {}", path.display()))?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.with_context(|| format!("Malformed row in {}", path.display()))?;
        let mut row: Vec<String> = record.iter().map(String::from).collect();
        row.resize(headers.len(), String::new());
        rows.push(row);
    }

    debug!("Read {} rows from {}", rows.len(), path.display());
    Ok(Table { headers, rows })
}

/// Extract `(owner, repo)` from a GitHub repository URL.
///
/// Accepts `https://`, `http://`, scheme-less `github.com/...` and
/// `git@github.com:` forms. Anything after the repository segment is ignored.
pub fn parse_github_url(url: &str) -> Option<(String, String)> {
    let url = url.trim();

    let rest = if let Some(rest) = url.strip_prefix("git@github.com:") {
        rest
    } else {
        let without_scheme = url
            .strip_prefix("https://")
            .or_else(|| url.strip_prefix("http://"))
            .unwrap_or(url);
        let without_www = without_scheme
            .strip_prefix("www.")
            .unwrap_or(without_scheme);
        without_www.strip_prefix("github.com/")?
    };

    let rest = rest.split(['?', '#']).next().unwrap_or("");
    let mut parts = rest.split('/').filter(|p| !p.is_empty());
    let owner = parts.next()?;
    let repo = parts.next()?;
    let repo = repo.strip_suffix(".git").unwrap_or(repo);
    if repo.is_empty() {
        return None;
    }

    Some((owner.to_string(), repo.to_string()))
}

/// Non-empty values of `column`, de-duplicated in first-seen order.
pub fn unique_urls(table: &Table, column: &str) -> Vec<String> {
    let Some(index) = table.column_index(column) else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    table
        .rows
        .iter()
        .filter_map(|row| row.get(index))
        .map(|v| v.trim())
        .filter(|v| !v.is_empty() && seen.insert(v.to_string()))
        .map(String::from)
        .collect()
}

/// Parse a string-encoded topic list such as `['a', 'b']` or `["a","b"]`.
pub fn parse_topics(s: &str) -> Vec<String> {
    let cleaned: String = s
        .chars()
        .filter(|c| !matches!(c, '[' | ']' | '\'' | '"'))
        .collect();

    cleaned
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}
