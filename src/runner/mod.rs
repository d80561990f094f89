//! External tool runner.
//!
//! Every scanner and git call goes through [`ToolRunner::run`]: spawn the
//! child with piped output, race it against the per-invocation deadline and
//! the shared cancellation token, and record the result as a
//! [`ToolInvocation`]. On unix each child leads its own process group, and
//! losing the race kills the whole group so that helpers a wrapper script
//! started (`java` under `sonar-scanner`) go down with it.

pub mod pool;

use crate::models::{InvocationOutcome, ItemStatus, ToolInvocation, WorkItem};
use chrono::Utc;
use indicatif::ProgressBar;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use pool::{batch_progress, fan_out};

/// A program invocation, built per work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// File the tool must leave behind for the run to count as successful.
    pub expected_output: Option<PathBuf>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            expected_output: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn expect_output(mut self, path: impl AsRef<Path>) -> Self {
        self.expected_output = Some(path.as_ref().to_path_buf());
        self
    }

    /// Command line for log messages.
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// An item together with the invocation that finished it.
#[derive(Debug, Clone)]
pub struct Completed {
    pub item: WorkItem,
    pub invocation: ToolInvocation,
}

/// How the race between child, deadline and cancellation ended.
enum Ended {
    Exited(Output),
    SpawnFailed(String),
    WaitFailed(String),
    Deadline,
    Cancelled,
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        if let Err(e) = pipe.read_to_end(&mut buf).await {
            debug!("Could not read child output: {}", e);
        }
    }
    buf
}

/// Kill `child` and everything in its process group, then reap it.
///
/// `group` is the pid taken at spawn time; the group outlives a leader that
/// already exited while its helpers still hold the output pipes.
async fn kill_tree(child: &mut Child, group: Option<u32>) {
    #[cfg(unix)]
    {
        if let Some(pgid) = group {
            // SAFETY: killpg only sends a signal to the group we created.
            let rc = unsafe { libc::killpg(pgid as libc::pid_t, libc::SIGKILL) };
            if rc != 0 {
                debug!(pgid, "killpg failed: {}", std::io::Error::last_os_error());
            }
        }
    }
    #[cfg(not(unix))]
    let _ = group;
    if let Err(e) = child.start_kill() {
        debug!("Child already gone: {}", e);
    }
    if let Err(e) = child.wait().await {
        warn!("Could not reap killed child: {}", e);
    }
}

/// Runs tools under a worker limit and a per-invocation timeout.
#[derive(Debug, Clone)]
pub struct ToolRunner {
    workers: usize,
    timeout: Duration,
    cancel: CancellationToken,
    progress: Option<ProgressBar>,
}

impl ToolRunner {
    pub fn new(workers: usize, timeout: Duration) -> Self {
        Self {
            workers: workers.max(1),
            timeout,
            cancel: CancellationToken::new(),
            progress: None,
        }
    }

    /// Share an external token so that cancelling it kills running children.
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Advance `progress` once per item finished by [`ToolRunner::run_all`].
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run one command for `item`, updating its status.
    pub async fn run(&self, item: &mut WorkItem, command: &ToolCommand) -> ToolInvocation {
        item.status = ItemStatus::Running;
        let started_at = Utc::now();
        let start = Instant::now();
        debug!(item = %item.id, command = %command.display(), "Running tool");

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        if let Some(ref dir) = command.cwd {
            cmd.current_dir(dir);
        }

        let ended = match cmd.spawn() {
            Err(e) => Ended::SpawnFailed(format!("failed to start {}: {}", command.program, e)),
            Ok(mut child) => {
                let group = child.id();
                let stdout = child.stdout.take();
                let stderr = child.stderr.take();
                let ended = tokio::select! {
                    collected = async {
                        tokio::join!(child.wait(), read_pipe(stdout), read_pipe(stderr))
                    } => match collected {
                        (Ok(status), stdout, stderr) => Ended::Exited(Output {
                            status,
                            stdout,
                            stderr,
                        }),
                        (Err(e), _, _) => Ended::WaitFailed(e.to_string()),
                    },
                    _ = tokio::time::sleep(self.timeout) => Ended::Deadline,
                    _ = self.cancel.cancelled() => Ended::Cancelled,
                };
                if matches!(ended, Ended::Deadline | Ended::Cancelled) {
                    kill_tree(&mut child, group).await;
                }
                ended
            }
        };

        let duration = start.elapsed();
        let (exit_code, stdout, stderr, outcome) = match ended {
            Ended::Exited(output) => {
                let code = output.status.code();
                let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
                let outcome = if !output.status.success() {
                    InvocationOutcome::Failed(match code {
                        Some(code) => format!("exit code {}", code),
                        None => "terminated by signal".to_string(),
                    })
                } else {
                    match command.expected_output {
                        Some(ref expected) if !expected.exists() => InvocationOutcome::Failed(
                            format!("expected output not found: {}", expected.display()),
                        ),
                        _ => InvocationOutcome::Succeeded,
                    }
                };
                (code, stdout, stderr, outcome)
            }
            Ended::SpawnFailed(reason) | Ended::WaitFailed(reason) => {
                (None, String::new(), String::new(), InvocationOutcome::Failed(reason))
            }
            Ended::Deadline => (None, String::new(), String::new(), InvocationOutcome::TimedOut),
            Ended::Cancelled => (
                None,
                String::new(),
                String::new(),
                InvocationOutcome::Failed("cancelled".to_string()),
            ),
        };

        let invocation = ToolInvocation {
            item_id: item.id.clone(),
            program: command.program.clone(),
            args: command.args.clone(),
            started_at,
            duration,
            exit_code,
            stdout,
            stderr,
            outcome,
        };
        item.status = invocation.item_status();

        match invocation.outcome {
            InvocationOutcome::Succeeded => info!(
                item = %item.id,
                program = %command.program,
                secs = duration.as_secs_f64(),
                "Tool completed"
            ),
            InvocationOutcome::TimedOut => warn!(
                item = %item.id,
                program = %command.program,
                timeout_secs = self.timeout.as_secs(),
                "Tool timed out and was killed"
            ),
            InvocationOutcome::Failed(ref reason) => {
                error!(item = %item.id, program = %command.program, "Tool failed: {}", reason);
                if !invocation.stderr.is_empty() {
                    debug!(item = %item.id, "stderr: {}", invocation.stderr.trim_end());
                }
            }
        }

        invocation
    }

    /// Run `build(item)` for every item on the worker pool.
    ///
    /// Results arrive in completion order.
    pub async fn run_all<F>(&self, items: Vec<WorkItem>, build: F) -> Vec<Completed>
    where
        F: Fn(&WorkItem) -> ToolCommand + Send + Sync + 'static,
    {
        let runner = self.clone();
        fan_out(items, self.workers, move |mut item, tx| {
            let runner = runner.clone();
            let command = build(&item);
            async move {
                let invocation = runner.run(&mut item, &command).await;
                if let Some(ref pb) = runner.progress {
                    pb.inc(1);
                }
                let _ = tx.send(Completed { item, invocation });
            }
        })
        .await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> ToolCommand {
        ToolCommand::new("sh").arg("-c").arg(script)
    }

    #[tokio::test]
    async fn test_successful_run_captures_output() {
        let runner = ToolRunner::new(1, Duration::from_secs(10));
        let mut item = WorkItem::new("demo", ".");

        let invocation = runner.run(&mut item, &sh("echo hello; echo oops >&2")).await;

        assert!(invocation.succeeded());
        assert_eq!(invocation.exit_code, Some(0));
        assert_eq!(invocation.stdout.trim(), "hello");
        assert_eq!(invocation.stderr.trim(), "oops");
        assert_eq!(item.status, ItemStatus::Done);
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_failure() {
        let runner = ToolRunner::new(1, Duration::from_secs(10));
        let mut item = WorkItem::new("demo", ".");

        let invocation = runner.run(&mut item, &sh("echo bad >&2; exit 3")).await;

        assert_eq!(invocation.exit_code, Some(3));
        assert_eq!(
            invocation.outcome,
            InvocationOutcome::Failed("exit code 3".to_string())
        );
        assert_eq!(invocation.stderr.trim(), "bad");
        assert_eq!(item.status, ItemStatus::Failed);
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let runner = ToolRunner::new(1, Duration::from_millis(200));
        let mut item = WorkItem::new("slow", ".");

        let start = Instant::now();
        let invocation = runner.run(&mut item, &ToolCommand::new("sleep").arg("30")).await;

        assert_eq!(invocation.outcome, InvocationOutcome::TimedOut);
        assert_eq!(item.status, ItemStatus::TimedOut);
        assert!(start.elapsed() < Duration::from_secs(10));
        assert!(invocation.failure_reason().unwrap().contains("timed out"));
    }

    /// A pid is gone once /proc no longer lists it or it is only a zombie.
    #[cfg(target_os = "linux")]
    fn process_gone(pid: u32) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Err(_) => true,
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .map(|rest| rest.trim_start().starts_with('Z'))
                .unwrap_or(false),
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_timeout_kills_background_grandchildren() {
        let dir = tempfile::tempdir().unwrap();
        let pidfile = dir.path().join("pid");
        let script = format!("sleep 30 & echo $! > {}; wait", pidfile.display());
        let runner = ToolRunner::new(1, Duration::from_millis(300));
        let mut item = WorkItem::new("wrapper", ".");

        let start = Instant::now();
        let invocation = runner.run(&mut item, &sh(&script)).await;
        assert_eq!(invocation.outcome, InvocationOutcome::TimedOut);
        assert!(start.elapsed() < Duration::from_secs(10));

        let pid: u32 = std::fs::read_to_string(&pidfile)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        let mut gone = process_gone(pid);
        for _ in 0..40 {
            if gone {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
            gone = process_gone(pid);
        }
        assert!(gone, "background sleep {} outlived the timeout", pid);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_timeout_kills_helpers_of_exited_leader() {
        let dir = tempfile::tempdir().unwrap();
        let pidfile = dir.path().join("pid");
        // The shell exits at once; the helper keeps stdout open.
        let script = format!("sleep 30 & echo $! > {}; exit 0", pidfile.display());
        let runner = ToolRunner::new(1, Duration::from_millis(300));
        let mut item = WorkItem::new("wrapper", ".");

        let invocation = runner.run(&mut item, &sh(&script)).await;
        assert_eq!(invocation.outcome, InvocationOutcome::TimedOut);

        let pid: u32 = std::fs::read_to_string(&pidfile)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        let mut gone = process_gone(pid);
        for _ in 0..40 {
            if gone {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
            gone = process_gone(pid);
        }
        assert!(gone);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_cancellation_kills_background_grandchildren() {
        let dir = tempfile::tempdir().unwrap();
        let pidfile = dir.path().join("pid");
        let script = format!("sleep 30 & echo $! > {}; wait", pidfile.display());
        let token = CancellationToken::new();
        let runner = ToolRunner::new(1, Duration::from_secs(60)).with_cancel_token(token.clone());
        let mut item = WorkItem::new("wrapper", ".");

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            token.cancel();
        });
        let invocation = runner.run(&mut item, &sh(&script)).await;
        canceller.await.unwrap();
        assert_eq!(
            invocation.outcome,
            InvocationOutcome::Failed("cancelled".to_string())
        );

        let pid: u32 = std::fs::read_to_string(&pidfile)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        let mut gone = process_gone(pid);
        for _ in 0..40 {
            if gone {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
            gone = process_gone(pid);
        }
        assert!(gone);
    }

    #[tokio::test]
    async fn test_missing_program_is_failure() {
        let runner = ToolRunner::new(1, Duration::from_secs(5));
        let mut item = WorkItem::new("x", ".");

        let invocation = runner
            .run(&mut item, &ToolCommand::new("definitely-not-a-real-binary-42"))
            .await;

        assert_eq!(item.status, ItemStatus::Failed);
        assert!(invocation.exit_code.is_none());
    }

    #[tokio::test]
    async fn test_missing_expected_output_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let expected = dir.path().join("report.json");
        let runner = ToolRunner::new(1, Duration::from_secs(5));
        let mut item = WorkItem::new("x", ".");

        let invocation = runner
            .run(&mut item, &sh("true").expect_output(&expected))
            .await;
        assert!(!invocation.succeeded());

        let script = format!("echo '{{}}' > {}", expected.display());
        let invocation = runner.run(&mut item, &sh(&script).expect_output(&expected)).await;
        assert!(invocation.succeeded());
    }

    #[tokio::test]
    async fn test_cancellation_stops_children() {
        let token = CancellationToken::new();
        let runner = ToolRunner::new(1, Duration::from_secs(60)).with_cancel_token(token.clone());
        let mut item = WorkItem::new("x", ".");

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            token.cancel();
        });
        let invocation = runner.run(&mut item, &ToolCommand::new("sleep").arg("30")).await;
        canceller.await.unwrap();

        assert_eq!(
            invocation.outcome,
            InvocationOutcome::Failed("cancelled".to_string())
        );
    }

    #[tokio::test]
    async fn test_run_all_isolates_failures() {
        let runner = ToolRunner::new(3, Duration::from_millis(500));
        let items = vec![
            WorkItem::new("ok", "0"),
            WorkItem::new("fail", "1"),
            WorkItem::new("hang", "30"),
            WorkItem::new("ok2", "0"),
        ];

        let completed = runner
            .run_all(items, |item| {
                if item.id == "hang" {
                    ToolCommand::new("sleep").arg(item.source.clone())
                } else {
                    sh(&format!("exit {}", item.source))
                }
            })
            .await;

        assert_eq!(completed.len(), 4);
        let status_of = |id: &str| {
            completed
                .iter()
                .find(|c| c.item.id == id)
                .map(|c| c.item.status)
                .unwrap()
        };
        assert_eq!(status_of("ok"), ItemStatus::Done);
        assert_eq!(status_of("ok2"), ItemStatus::Done);
        assert_eq!(status_of("fail"), ItemStatus::Failed);
        assert_eq!(status_of("hang"), ItemStatus::TimedOut);
    }

    #[test]
    fn test_command_display() {
        let cmd = ToolCommand::new("git").args(["log", "--oneline"]);
        assert_eq!(cmd.display(), "git log --oneline");
        assert_eq!(ToolCommand::new("true").display(), "true");
    }
}
