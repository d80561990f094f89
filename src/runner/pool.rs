//! Bounded fan-out over work items.
//!
//! Tasks never share a locked result list. Each one sends what it produced
//! over an mpsc channel, and the caller drains the channel once every task
//! has finished.

use indicatif::{ProgressBar, ProgressStyle};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error};

/// Progress bar for a batch of `len` items, hidden when `quiet`.
pub fn batch_progress(len: usize, message: &str, quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} {msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb.set_message(message.to_string());
    pb
}

/// Run `task` for every item with at most `workers` running at once.
///
/// Results come back in completion order. A panicking task is logged and
/// contributes nothing; its siblings keep running.
pub async fn fan_out<I, T, F, Fut>(items: Vec<I>, workers: usize, task: F) -> Vec<T>
where
    I: Send + 'static,
    T: Send + 'static,
    F: Fn(I, mpsc::UnboundedSender<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel();
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let task = Arc::new(task);
    let mut set = JoinSet::new();

    debug!(items = items.len(), workers, "Starting fan-out");

    for item in items {
        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            break;
        };
        let tx = tx.clone();
        let task = Arc::clone(&task);
        set.spawn(async move {
            let _permit = permit;
            task(item, tx).await;
        });
    }
    drop(tx);

    while let Some(joined) = set.join_next().await {
        if let Err(e) = joined {
            error!("Worker task aborted: {}", e);
        }
    }

    let mut results = Vec::new();
    while let Some(result) = rx.recv().await {
        results.push(result);
    }
    results
}
