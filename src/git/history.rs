//! Git history operations driven through the `git` CLI.
//!
//! Every call goes through the [`ToolRunner`], so each command inherits the
//! per-invocation timeout and the shared cancellation token.

use crate::analysis::git_stats::{self, ChurnTotals, CommitActivity};
use crate::error::GitError;
use crate::models::WorkItem;
use crate::report::FailureLog;
use crate::runner::{fan_out, ToolCommand, ToolRunner};
use chrono::NaiveDate;
use tracing::{info, warn};

/// Branches tried, in order, when the remote HEAD is unknown.
const FALLBACK_BRANCHES: [&str; 2] = ["main", "master"];

/// The commit a repository was reset to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoricalState {
    pub commit: String,
    /// Committer date as printed by `git show -s --format=%ci`.
    pub committed_at: String,
}

/// Runs git subcommands inside work item directories.
#[derive(Debug, Clone)]
pub struct GitCli {
    runner: ToolRunner,
}

impl GitCli {
    pub fn new(runner: ToolRunner) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &ToolRunner {
        &self.runner
    }

    /// Run `git <args>` in the item's directory and return its stdout.
    async fn git(&self, item: &mut WorkItem, args: &[&str]) -> Result<String, GitError> {
        let command = ToolCommand::new("git")
            .args(args.iter().copied())
            .current_dir(item.path());
        let invocation = self.runner.run(item, &command).await;

        match invocation.failure_reason() {
            None => Ok(invocation.stdout),
            Some(reason) => Err(GitError::Command {
                command: args.join(" "),
                reason,
            }),
        }
    }

    /// Default branch: remote HEAD, then `main`/`master` when present
    /// locally, then whatever is checked out.
    pub async fn resolve_default_branch(&self, item: &mut WorkItem) -> Option<String> {
        if let Ok(out) = self
            .git(item, &["symbolic-ref", "refs/remotes/origin/HEAD"])
            .await
        {
            if let Some(branch) = out.trim().rsplit('/').next().filter(|b| !b.is_empty()) {
                return Some(branch.to_string());
            }
        }

        for branch in FALLBACK_BRANCHES {
            if let Ok(out) = self.git(item, &["branch", "--list", branch]).await {
                if !out.trim().is_empty() {
                    return Some(branch.to_string());
                }
            }
        }

        self.git(item, &["branch", "--show-current"])
            .await
            .ok()
            .map(|out| out.trim().to_string())
            .filter(|b| !b.is_empty())
    }

    /// Reset the repository to its last commit at or before the end of `date`.
    ///
    /// Looks across all branches. When no such commit exists nothing is
    /// checked out or reset and [`GitError::NoCommitBefore`] is returned.
    /// Otherwise the default branch is checked out and hard-reset to it.
    pub async fn select_historical_state(
        &self,
        item: &mut WorkItem,
        date: NaiveDate,
    ) -> Result<HistoricalState, GitError> {
        let before = format!("--before={} 23:59:59", date.format("%Y-%m-%d"));
        let commit = self
            .git(item, &["rev-list", "-n", "1", &before, "--all"])
            .await?
            .trim()
            .to_string();

        if commit.is_empty() {
            warn!(item = %item.id, "No commits found before {}", date);
            return Err(GitError::NoCommitBefore(date.to_string()));
        }

        match self.resolve_default_branch(item).await {
            Some(branch) => {
                if let Err(e) = self.git(item, &["checkout", &branch]).await {
                    warn!(item = %item.id, "Could not check out {}: {}", branch, e);
                }
            }
            None => warn!(item = %item.id, "Could not determine the default branch"),
        }

        let committed_at = self
            .git(item, &["show", "-s", "--format=%ci", &commit])
            .await?
            .trim()
            .to_string();
        info!(item = %item.id, commit = %commit, "Resetting to commit from {}", committed_at);

        self.git(item, &["reset", "--hard", &commit]).await?;

        Ok(HistoricalState {
            commit,
            committed_at,
        })
    }

    /// Commits in the window, counted from `git log` dates.
    pub async fn commit_count(
        &self,
        item: &mut WorkItem,
        since: NaiveDate,
        until: NaiveDate,
    ) -> Result<u64, GitError> {
        let since_arg = format!("--since={}", since);
        let until_arg = format!("--until={}", until);
        let out = self
            .git(
                item,
                &["log", &since_arg, &until_arg, "--pretty=format:%ad", "--date=short"],
            )
            .await?;
        Ok(git_stats::count_commit_dates(&out))
    }

    /// Added and deleted line totals in the window.
    pub async fn churn(
        &self,
        item: &mut WorkItem,
        since: NaiveDate,
        until: NaiveDate,
    ) -> Result<ChurnTotals, GitError> {
        let since_arg = format!("--since={}", since);
        let until_arg = format!("--until={}", until);
        let out = self
            .git(
                item,
                &["log", "--numstat", "--pretty=format:%H", &since_arg, &until_arg],
            )
            .await?;
        Ok(git_stats::parse_numstat(&out))
    }

    /// Commit frequency and churn of one project.
    pub async fn activity(
        &self,
        item: &mut WorkItem,
        since: NaiveDate,
        until: NaiveDate,
    ) -> Result<CommitActivity, GitError> {
        let commits = self.commit_count(item, since, until).await?;
        let churn = self.churn(item, since, until).await?;
        let per_day = git_stats::commits_per_day(commits, since, until);
        Ok(CommitActivity::new(&item.id, per_day, &churn))
    }
}

/// Reset every project to `date`; returns the projects that failed.
pub async fn revert_projects(git: &GitCli, items: Vec<WorkItem>, date: NaiveDate) -> FailureLog {
    let total = items.len();
    let git_task = git.clone();
    let results = fan_out(items, git.runner().workers(), move |mut item, tx| {
        let git = git_task.clone();
        async move {
            let result = git.select_historical_state(&mut item, date).await;
            let _ = tx.send((item.id, result));
        }
    })
    .await;

    let mut failures = FailureLog::new();
    for (id, result) in results {
        if let Err(e) = result {
            failures.record(id, e.to_string());
        }
    }
    info!(
        "Reverted {} of {} projects to {}",
        total - failures.len(),
        total,
        date
    );
    failures
}

/// Commit activity of every project, sorted by project name.
///
/// Projects whose git calls fail or time out are skipped and recorded.
pub async fn analyze_activity(
    git: &GitCli,
    items: Vec<WorkItem>,
    since: NaiveDate,
    until: NaiveDate,
) -> (Vec<CommitActivity>, FailureLog) {
    let git_task = git.clone();
    let results = fan_out(items, git.runner().workers(), move |mut item, tx| {
        let git = git_task.clone();
        async move {
            let result = git.activity(&mut item, since, until).await;
            let _ = tx.send((item.id, result));
        }
    })
    .await;

    let mut rows = Vec::new();
    let mut skipped = FailureLog::new();
    for (id, result) in results {
        match result {
            Ok(row) => rows.push(row),
            Err(e) => {
                warn!("Skipping {}: {}", id, e);
                skipped.record(id, e.to_string());
            }
        }
    }
    rows.sort_by(|a, b| a.project.cmp(&b.project));
    (rows, skipped)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::Path;
    use std::process::Command;
    use std::time::Duration;

    fn git_available() -> bool {
        Command::new("git").arg("--version").output().is_ok()
    }

    fn run_git(dir: &Path, args: &[&str], date: Option<&str>) {
        let mut cmd = Command::new("git");
        cmd.args(["-c", "user.name=Test", "-c", "user.email=test@example.com"])
            .args(args)
            .current_dir(dir);
        if let Some(date) = date {
            cmd.env("GIT_AUTHOR_DATE", date).env("GIT_COMMITTER_DATE", date);
        }
        let status = cmd.output().unwrap().status;
        assert!(status.success(), "git {:?} failed", args);
    }

    /// Repository on `main` with commits on 2020-01-05 and 2021-03-01.
    fn fixture_repo(dir: &Path) {
        run_git(dir, &["init", "-q"], None);
        run_git(dir, &["symbolic-ref", "HEAD", "refs/heads/main"], None);

        std::fs::write(dir.join("a.js"), "one\ntwo\n").unwrap();
        run_git(dir, &["add", "."], None);
        run_git(dir, &["commit", "-q", "-m", "first"], Some("2020-01-05T12:00:00"));

        std::fs::write(dir.join("a.js"), "one\nthree\nfour\n").unwrap();
        run_git(dir, &["add", "."], None);
        run_git(dir, &["commit", "-q", "-m", "second"], Some("2021-03-01T12:00:00"));
    }

    fn cli() -> GitCli {
        GitCli::new(ToolRunner::new(2, Duration::from_secs(30)))
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[tokio::test]
    async fn test_resolve_default_branch_falls_back_to_main() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        fixture_repo(dir.path());
        let mut item = WorkItem::new("demo", dir.path().to_string_lossy());

        assert_eq!(
            cli().resolve_default_branch(&mut item).await.as_deref(),
            Some("main")
        );
    }

    #[tokio::test]
    async fn test_select_historical_state() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        fixture_repo(dir.path());
        let mut item = WorkItem::new("demo", dir.path().to_string_lossy());

        let state = cli()
            .select_historical_state(&mut item, date("2020-06-01"))
            .await
            .unwrap();

        assert!(state.committed_at.starts_with("2020-01-05"));
        let content = std::fs::read_to_string(dir.path().join("a.js")).unwrap();
        assert_eq!(content, "one\ntwo\n");
    }

    #[tokio::test]
    async fn test_select_historical_state_without_commits() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        fixture_repo(dir.path());
        let mut item = WorkItem::new("demo", dir.path().to_string_lossy());

        let err = cli()
            .select_historical_state(&mut item, date("2019-01-01"))
            .await
            .unwrap_err();

        assert!(matches!(err, GitError::NoCommitBefore(_)));
        let content = std::fs::read_to_string(dir.path().join("a.js")).unwrap();
        assert_eq!(content, "one\nthree\nfour\n");
    }

    #[tokio::test]
    async fn test_no_commit_before_date_keeps_current_branch() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        fixture_repo(dir.path());
        run_git(dir.path(), &["checkout", "-q", "-b", "feature"], None);
        std::fs::write(dir.path().join("b.js"), "feature\n").unwrap();
        run_git(dir.path(), &["add", "."], None);
        run_git(dir.path(), &["commit", "-q", "-m", "feature"], Some("2021-04-01T12:00:00"));
        let mut item = WorkItem::new("demo", dir.path().to_string_lossy());

        let err = cli()
            .select_historical_state(&mut item, date("2019-01-01"))
            .await
            .unwrap_err();

        assert!(matches!(err, GitError::NoCommitBefore(_)));
        let head = Command::new("git")
            .args(["branch", "--show-current"])
            .current_dir(dir.path())
            .output()
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&head.stdout).trim(), "feature");
        assert!(dir.path().join("b.js").exists());
    }

    #[tokio::test]
    async fn test_activity_over_window() {
        if !git_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        fixture_repo(dir.path());
        let mut item = WorkItem::new("demo", dir.path().to_string_lossy());

        let activity = cli()
            .activity(&mut item, date("2020-01-01"), date("2020-01-10"))
            .await
            .unwrap();

        assert_eq!(activity.project, "demo");
        assert!((activity.avg_commits_per_day - 0.1).abs() < 1e-9);
        assert!((activity.avg_lines_added_per_commit - 2.0).abs() < 1e-9);
        assert_eq!(activity.avg_lines_deleted_per_commit, 0.0);
    }

    #[tokio::test]
    async fn test_revert_projects_logs_failures() {
        if !git_available() {
            return;
        }
        let root = tempfile::tempdir().unwrap();
        let good = root.path().join("good");
        std::fs::create_dir(&good).unwrap();
        fixture_repo(&good);
        let bad = root.path().join("bad");
        std::fs::create_dir(&bad).unwrap();

        let items = vec![
            WorkItem::new("good", good.to_string_lossy()),
            WorkItem::new("bad", bad.to_string_lossy()),
        ];
        let failures = revert_projects(&cli(), items, date("2020-06-01")).await;

        assert_eq!(failures.ids().collect::<Vec<_>>(), vec!["bad"]);
    }
}
