//! Lines-of-code estimate from source character counts.
//!
//! The estimate is `round(characters / 40)` over every file with one of the
//! configured extensions. Only `.git` is left out of the walk.

use crate::models::WorkItem;
use crate::report::Row;
use crate::targets::decode_text;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// Average characters per line assumed by the estimate.
pub const CHARS_PER_LINE: f64 = 40.0;

pub const COLUMNS: [&str; 2] = ["Repository", "Estimated LOC (JavaScript)"];

fn is_git_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_type().is_dir() && entry.file_name() == ".git"
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

/// Characters in every matching file under `root`.
///
/// Unreadable files are logged and skipped.
pub fn count_characters(root: &Path, extensions: &[String]) -> u64 {
    let mut total = 0u64;

    for entry in WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !is_git_dir(e))
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !entry.file_type().is_file() || !has_extension(path, extensions) {
            continue;
        }

        match std::fs::read(path) {
            Ok(bytes) => total += decode_text(bytes).chars().count() as u64,
            Err(e) => warn!("Could not read {}: {}", path.display(), e),
        }
    }

    total
}

pub fn estimate_lines(characters: u64) -> u64 {
    (characters as f64 / CHARS_PER_LINE).round() as u64
}

/// One row per project, in project order.
pub fn estimate_projects(items: &[WorkItem], extensions: &[String]) -> Vec<Row> {
    items
        .iter()
        .map(|item| {
            let characters = count_characters(&item.path(), extensions);
            let lines = estimate_lines(characters);
            debug!("{}: {} characters, ~{} lines", item.id, characters, lines);

            let mut row = Row::new();
            row.insert(COLUMNS[0].to_string(), item.id.clone());
            row.insert(COLUMNS[1].to_string(), lines.to_string());
            row
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn js() -> Vec<String> {
        vec!["js".to_string()]
    }

    #[test]
    fn test_estimate_rounding() {
        assert_eq!(estimate_lines(0), 0);
        assert_eq!(estimate_lines(19), 0);
        assert_eq!(estimate_lines(20), 1);
        assert_eq!(estimate_lines(80), 2);
        assert_eq!(estimate_lines(99), 2);
    }

    #[test]
    fn test_counts_only_matching_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.js"), "x".repeat(40)).unwrap();
        fs::create_dir_all(dir.path().join("src/lib")).unwrap();
        fs::write(dir.path().join("src/lib/b.JS"), "y".repeat(40)).unwrap();
        fs::write(dir.path().join("readme.md"), "z".repeat(400)).unwrap();
        fs::create_dir_all(dir.path().join("node_modules/dep")).unwrap();
        fs::write(dir.path().join("node_modules/dep/index.js"), "w".repeat(40)).unwrap();
        fs::create_dir_all(dir.path().join(".git/hooks")).unwrap();
        fs::write(dir.path().join(".git/hooks/x.js"), "v".repeat(400)).unwrap();

        assert_eq!(count_characters(dir.path(), &js()), 120);
    }

    #[test]
    fn test_latin1_file_is_counted() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("old.js"), [b'a', 0xE9, b'b']).unwrap();

        assert_eq!(count_characters(dir.path(), &js()), 3);
    }

    #[test]
    fn test_estimate_projects_rows() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("demo");
        fs::create_dir(&project).unwrap();
        fs::write(project.join("index.js"), "c".repeat(400)).unwrap();

        let items = vec![WorkItem::new("demo", project.display().to_string())];
        let rows = estimate_projects(&items, &js());

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["Repository"], "demo");
        assert_eq!(rows[0]["Estimated LOC (JavaScript)"], "10");
    }
}
