//! Git repository cloning functionality.
//!
//! This module clones repositories listed in a search table into the
//! projects folder using the git2 library. Clones keep full history so that
//! the historical state selector can later reset them to any date.

use crate::error::GitError;
use crate::report::FailureLog;
use crate::runner::{batch_progress, fan_out};
use git2::{FetchOptions, Progress, RemoteCallbacks, Repository};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// What happened at the clone target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloneStatus {
    Cloned,
    /// A repository already existed at the target and was left as is.
    Reused,
}

/// Directory a URL is cloned into: its last path segment under `base`.
pub fn clone_target(base: &Path, url: &str) -> Option<PathBuf> {
    let name = url
        .trim()
        .trim_end_matches('/')
        .rsplit(['/', ':'])
        .next()?
        .trim_end_matches(".git");
    if name.is_empty() {
        return None;
    }
    Some(base.join(name))
}

fn transfer_bar(multi: Option<&MultiProgress>, url: &str) -> Option<ProgressBar> {
    let multi = multi?;
    let pb = multi.add(ProgressBar::new(0));
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} {msg} [{bar:30.cyan/blue}] {pos}/{len} objects")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb.set_message(url.to_string());
    Some(pb)
}

/// Clone `url` into `target` with full history.
///
/// An existing repository at `target` is reused without fetching.
pub fn clone_repository(
    url: &str,
    target: &Path,
    progress: Option<&MultiProgress>,
) -> Result<CloneStatus, GitError> {
    if target.exists() {
        debug!("Target directory already exists: {}", target.display());
        if Repository::open(target).is_ok() {
            info!("Using existing repository at: {}", target.display());
            return Ok(CloneStatus::Reused);
        }
    }

    let progress_bar = transfer_bar(progress, url);
    let pb_clone = progress_bar.clone();
    let mut callbacks = RemoteCallbacks::new();

    callbacks.transfer_progress(move |progress: Progress<'_>| {
        if let Some(ref pb) = pb_clone {
            pb.set_length(progress.total_objects() as u64);
            pb.set_position(progress.received_objects() as u64);
        }
        true
    });

    let mut fetch_opts = FetchOptions::new();
    fetch_opts.remote_callbacks(callbacks);

    let mut builder = git2::build::RepoBuilder::new();
    builder.fetch_options(fetch_opts);

    let result = builder.clone(url, target);

    if let Some(pb) = progress_bar {
        pb.finish_and_clear();
    }

    result?;
    info!("Cloned {} to {}", url, target.display());
    Ok(CloneStatus::Cloned)
}

/// Totals of a clone batch.
#[derive(Debug, Default)]
pub struct CloneReport {
    pub cloned: usize,
    pub reused: usize,
    pub failures: FailureLog,
}

/// Clone every URL into `base`, `workers` at a time.
///
/// Clones run on the blocking thread pool. A failed clone is recorded and
/// never stops the batch.
pub async fn clone_all(urls: Vec<String>, base: &Path, workers: usize, quiet: bool) -> CloneReport {
    let multi = if quiet { None } else { Some(MultiProgress::new()) };
    let overall = batch_progress(urls.len(), "Cloning", quiet);
    if let Some(ref multi) = multi {
        multi.add(overall.clone());
    }

    let base = base.to_path_buf();
    let results = fan_out(urls, workers, move |url, tx| {
        let base = base.clone();
        let multi = multi.clone();
        let overall = overall.clone();
        async move {
            let Some(target) = clone_target(&base, &url) else {
                let _ = tx.send((url, Err("cannot derive a directory name".to_string())));
                return;
            };

            let task_url = url.clone();
            let outcome = tokio::task::spawn_blocking(move || {
                clone_repository(&task_url, &target, multi.as_ref())
            })
            .await;

            let outcome = match outcome {
                Ok(Ok(status)) => Ok(status),
                Ok(Err(e)) => Err(e.to_string()),
                Err(e) => Err(format!("clone task aborted: {}", e)),
            };
            overall.inc(1);
            let _ = tx.send((url, outcome));
        }
    })
    .await;

    let mut report = CloneReport::default();
    for (url, outcome) in results {
        match outcome {
            Ok(CloneStatus::Cloned) => report.cloned += 1,
            Ok(CloneStatus::Reused) => report.reused += 1,
            Err(reason) => {
                error!("Failed to clone {}: {}", url, reason);
                report.failures.record(url, reason);
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    /// A throwaway repository with one commit, built through libgit2.
    fn seed_repository(dir: &Path) {
        let repo = Repository::init(dir).unwrap();
        fs::write(dir.join("index.js"), "console.log('hi');\n").unwrap();

        let mut index = repo.index().unwrap();
        index.add_path(Path::new("index.js")).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = git2::Signature::now("Test", "test@example.com").unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
            .unwrap();
    }

    #[test]
    fn test_clone_target() {
        let base = Path::new("repos");
        assert_eq!(
            clone_target(base, "https://github.com/owner/my-app"),
            Some(base.join("my-app"))
        );
        assert_eq!(
            clone_target(base, "https://github.com/owner/my-app.git/"),
            Some(base.join("my-app"))
        );
        assert_eq!(
            clone_target(base, "git@github.com:owner/tool.git"),
            Some(base.join("tool"))
        );
        assert_eq!(clone_target(base, ""), None);
    }

    #[test]
    fn test_clone_and_reuse_local_repository() {
        let source = tempfile::tempdir().unwrap();
        seed_repository(source.path());

        let dest = tempfile::tempdir().unwrap();
        let target = dest.path().join("copy");
        let url = source.path().to_string_lossy().to_string();

        let status = clone_repository(&url, &target, None).unwrap();
        assert_eq!(status, CloneStatus::Cloned);
        assert!(target.join("index.js").exists());

        let status = clone_repository(&url, &target, None).unwrap();
        assert_eq!(status, CloneStatus::Reused);
    }

    #[test]
    fn test_clone_invalid_source_fails() {
        let dest = tempfile::tempdir().unwrap();
        let result = clone_repository("/definitely/not/a/repo", &dest.path().join("x"), None);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_clone_all_records_failures() {
        let source = tempfile::tempdir().unwrap();
        seed_repository(source.path());
        let dest = tempfile::tempdir().unwrap();

        let urls = vec![
            source.path().to_string_lossy().to_string(),
            "/definitely/not/a/repo".to_string(),
        ];
        let report = clone_all(urls, dest.path(), 2, true).await;

        assert_eq!(report.cloned, 1);
        assert_eq!(report.failures.len(), 1);
    }
}
