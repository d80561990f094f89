//! Parsing of `git log` output into activity and churn figures.

use chrono::NaiveDate;
use serde::Serialize;

/// Number of commits in `git log --pretty=format:%ad --date=short` output.
pub fn count_commit_dates(stdout: &str) -> u64 {
    stdout.lines().filter(|l| !l.trim().is_empty()).count() as u64
}

/// Days in `[since, until]`, both ends included.
pub fn inclusive_days(since: NaiveDate, until: NaiveDate) -> i64 {
    (until - since).num_days() + 1
}

/// Average commits per calendar day over the window.
pub fn commits_per_day(commits: u64, since: NaiveDate, until: NaiveDate) -> f64 {
    let days = inclusive_days(since, until);
    if days > 0 {
        commits as f64 / days as f64
    } else {
        0.0
    }
}

/// Totals from `git log --numstat --pretty=format:%H`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChurnTotals {
    pub commits: u64,
    pub additions: u64,
    pub deletions: u64,
}

impl ChurnTotals {
    pub fn avg_additions(&self) -> f64 {
        per_commit(self.additions, self.commits)
    }

    pub fn avg_deletions(&self) -> f64 {
        per_commit(self.deletions, self.commits)
    }
}

fn per_commit(value: u64, commits: u64) -> f64 {
    if commits == 0 {
        0.0
    } else {
        value as f64 / commits as f64
    }
}

fn is_commit_hash(line: &str) -> bool {
    line.len() == 40 && line.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f'))
}

/// Sum added and deleted lines per commit block.
///
/// Binary files report `-` in numstat and count as zero. Stat lines before
/// the first commit hash are ignored.
pub fn parse_numstat(stdout: &str) -> ChurnTotals {
    let mut totals = ChurnTotals::default();
    let mut in_commit = false;

    for line in stdout.lines().map(str::trim) {
        if is_commit_hash(line) {
            in_commit = true;
            totals.commits += 1;
        } else if !line.is_empty() && in_commit {
            let parts: Vec<&str> = line.split('\t').collect();
            if parts.len() == 3 {
                totals.additions += parts[0].parse::<u64>().unwrap_or(0);
                totals.deletions += parts[1].parse::<u64>().unwrap_or(0);
            }
        }
    }

    totals
}

/// One row of the commit activity dataset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommitActivity {
    pub project: String,
    pub avg_commits_per_day: f64,
    pub avg_lines_added_per_commit: f64,
    pub avg_lines_deleted_per_commit: f64,
}

impl CommitActivity {
    pub const COLUMNS: [&'static str; 4] = [
        "project",
        "avg_commits_per_day",
        "avg_lines_added_per_commit",
        "avg_lines_deleted_per_commit",
    ];

    pub fn new(project: &str, commits_per_day: f64, churn: &ChurnTotals) -> Self {
        Self {
            project: project.to_string(),
            avg_commits_per_day: commits_per_day,
            avg_lines_added_per_commit: churn.avg_additions(),
            avg_lines_deleted_per_commit: churn.avg_deletions(),
        }
    }
}
