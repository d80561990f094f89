//! repoharvest - research datasets from GitHub repositories
//!
//! A CLI toolkit that collects GitHub repository metadata, clones and
//! time-travels repositories, runs SonarQube and OWASP Dependency-Check over
//! them, and aggregates git and issue-tracker statistics into CSV files.
//!
//! Exit codes:
//!   0 - Success (per-item failures are logged, not fatal)
//!   1 - Runtime or configuration error

mod analysis;
mod api;
mod cli;
mod config;
mod error;
mod git;
mod github;
mod metrics;
mod models;
mod report;
mod runner;
mod scanners;
mod targets;

use anyhow::{bail, Context, Result};
use api::{ApiClient, ClientConfig};
use cli::{Args, Command, IssuesCommand, SonarCommand};
use config::{Config, CONFIG_FILE};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Secrets may live in a local .env file
    dotenvy::dotenv().ok();

    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle init-config early (no logging needed)
    if matches!(args.command, Command::InitConfig) {
        return handle_init_config();
    }

    let config = match prepare_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Error: {:#}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    if let Err(e) = init_logging(&args, &config) {
        eprintln!("❌ Error: {:#}", e);
        std::process::exit(1);
    }

    info!("repoharvest v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args.command);
    debug!("Configuration: {:?}", config);

    let cancel = CancellationToken::new();
    watch_ctrl_c(cancel.clone());

    let start_time = Instant::now();
    match run_command(&args, &config, cancel).await {
        Ok(()) => {
            info!("Finished in {:.1}s", start_time.elapsed().as_secs_f64());
            std::process::exit(0);
        }
        Err(e) => {
            error!("Command failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle init-config: generate a default .repoharvest.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).with_context(|| format!("Failed to write {}", CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE);
    println!("   Edit it to customize search windows, scanners, timeouts, and more.");
    Ok(())
}

/// Load the configuration, apply CLI overrides and create the output directory.
fn prepare_config(args: &Args) -> Result<Config> {
    let mut config = load_config(args)?;
    config.merge_with_args(args);

    std::fs::create_dir_all(&config.general.output_dir).with_context(|| {
        format!(
            "Failed to create output directory {}",
            config.general.output_dir.display()
        )
    })?;
    Ok(config)
}

/// Load configuration from file or use defaults.
///
/// An explicit `--config` must load; a broken default file is an error too.
fn load_config(args: &Args) -> Result<Config> {
    if let Some(ref config_path) = args.config {
        return Config::load(config_path);
    }

    Ok(Config::load_default()?.unwrap_or_default())
}

/// Console logging, plus a plain-text copy under the output directory when
/// `general.log_file` is set. `RUST_LOG` overrides the level.
fn init_logging(args: &Args, config: &Config) -> Result<()> {
    let level = if config.general.verbose && !args.quiet {
        tracing::Level::DEBUG
    } else {
        args.log_level()
    };

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();

    let console = fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact();

    let file_layer = match config.general.log_file {
        Some(ref name) => {
            let path = config.output_path(name);
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()
        .context("Failed to set tracing subscriber")
}

/// First Ctrl-C cancels running tools and API requests so batches can write
/// what they have;
/// a second one exits immediately.
fn watch_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("Interrupted, stopping running tools and requests (press Ctrl-C again to abort)");
        cancel.cancel();

        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n⛔ Aborted.");
            std::process::exit(1);
        }
    });
}

/// Dataset path: relative names land in the output directory.
fn output_file(config: &Config, path: &Path) -> Result<PathBuf> {
    let path = config.general.output_dir.join(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    Ok(path)
}

fn github_client(args: &Args, config: &Config, cancel: &CancellationToken) -> Result<ApiClient> {
    let token = args.github_token.clone().filter(|t| !t.is_empty());
    if token.is_none() {
        warn!("No GitHub token set; requests are limited to 60 per hour");
    }

    let client_config = ClientConfig::github(&config.github.api_url, token)
        .with_request_delay(Duration::from_millis(config.github.request_delay_ms));
    let client = ApiClient::new(client_config).context("Failed to build GitHub client")?;
    Ok(client.with_cancel_token(cancel.clone()))
}

fn tool_runner(
    config: &Config,
    timeout_seconds: u64,
    cancel: &CancellationToken,
) -> runner::ToolRunner {
    runner::ToolRunner::new(config.general.workers, Duration::from_secs(timeout_seconds))
        .with_cancel_token(cancel.clone())
}

fn read_input(path: &Path, url_column: Option<&str>) -> Result<targets::Table> {
    let table = targets::read_table(path)?;
    if let Some(column) = url_column {
        if !table.has_column(column) {
            bail!("Column '{}' not found in {}", column, path.display());
        }
    }
    info!("Read {} rows from {}", table.len(), path.display());
    Ok(table)
}

fn persist_failures(
    failures: &report::FailureLog,
    config: &Config,
    name: &str,
    header: &str,
) -> Result<()> {
    if failures.persist(&config.output_path(name), header, false)? {
        println!(
            "   ⚠️  {} failed, see {}",
            failures.len(),
            config.output_path(name).display()
        );
    }
    Ok(())
}

/// Dispatch the selected subcommand.
async fn run_command(args: &Args, config: &Config, cancel: CancellationToken) -> Result<()> {
    match args.command {
        Command::Search {
            ref language,
            created_start,
            created_end,
            pushed_after,
            start_page,
            end_page,
            ref output,
        } => {
            let params = github::SearchParams {
                language: language.clone().unwrap_or_else(|| config.github.language.clone()),
                created_start: created_start.unwrap_or(config.github.created_start),
                created_end: created_end.unwrap_or(config.github.created_end),
                pushed_after: pushed_after.unwrap_or(config.github.pushed_after),
                start_page: start_page.unwrap_or(config.github.start_page),
                end_page: end_page.unwrap_or(config.github.end_page),
                per_page: config.github.per_page,
            };
            let client = github_client(args, config, &cancel)?;

            println!("🔎 Searching GitHub: {}", params.query());
            let records = github::search_repositories(&client, &params).await;

            let path = output_file(config, output)?;
            report::write_records(&path, &github::RepositoryRecord::COLUMNS, &records)?;
            println!("\n✅ {} repositories saved to {}", records.len(), path.display());
        }

        Command::Filter {
            ref input,
            ref output,
            min_stars,
            min_issues,
            min_topics,
        } => {
            let table = read_input(input, None)?;
            let thresholds = github::FilterThresholds {
                min_stars,
                min_issues,
                min_topics,
            };
            let filtered = github::filter_repositories(&table, &thresholds);

            let path = output_file(config, output)?;
            report::write_rows(&path, &filtered.headers, &filtered.to_maps())?;
            println!(
                "✅ Kept {} of {} repositories, saved to {}",
                filtered.len(),
                table.len(),
                path.display()
            );
        }

        Command::Contributors {
            ref input,
            ref output,
            ref url_column,
        } => {
            let table = read_input(input, Some(url_column))?;
            let client = github_client(args, config, &cancel)?;

            println!("👥 Counting contributors of {} repositories...", table.len());
            let rows =
                github::collect_contributors(&client, &table, url_column, config.general.workers)
                    .await;

            let path = output_file(config, output)?;
            let columns = github::contributors::output_columns(&table, url_column);
            report::write_rows(&path, &columns, &rows)?;
            println!("✅ Contributor counts saved to {}", path.display());
        }

        Command::Clone {
            ref input,
            ref url_column,
        } => {
            let table = read_input(input, Some(url_column))?;
            let urls = targets::unique_urls(&table, url_column);
            let folder = &config.general.projects_folder;
            std::fs::create_dir_all(folder)
                .with_context(|| format!("Failed to create {}", folder.display()))?;

            println!("📥 Cloning {} repositories into {}", urls.len(), folder.display());
            let clone_report =
                git::clone_all(urls, folder, config.general.workers, args.quiet).await;

            println!("\n📊 Clone Summary:");
            println!("   Cloned: {}", clone_report.cloned);
            println!("   Already present: {}", clone_report.reused);
            println!("   Failed: {}", clone_report.failures.len());
            persist_failures(
                &clone_report.failures,
                config,
                "failed_clones.log",
                "Repositories that failed to clone:",
            )?;
        }

        Command::Revert { ref date } => {
            let date = cli::parse_revert_date(date).map_err(anyhow::Error::msg)?;
            let items = targets::list_projects(&config.general.projects_folder, true)?;
            let git_cli = git::GitCli::new(tool_runner(config, config.git.timeout_seconds, &cancel));

            println!("⏪ Reverting {} projects to {}", items.len(), date);
            let failures = git::revert_projects(&git_cli, items, date).await;

            if failures.is_empty() {
                println!("\n✅ All repositories were successfully reverted.");
            }
            persist_failures(
                &failures,
                config,
                &format!("failed_projects_{}.log", date.format("%d-%m-%Y")),
                "Projects that failed to revert:",
            )?;
        }

        Command::Sonar {
            action: SonarCommand::Scan,
        } => {
            let token = args.sonarqube_token.clone().unwrap_or_default();
            let items = targets::list_projects(&config.general.projects_folder, false)?;
            let settings = scanners::SonarSettings {
                url: config.sonar.url.clone(),
                token: token.clone(),
                scanner_path: config.sonar.scanner_path.clone(),
                page_size: config.sonar.page_size,
                export_delay: Duration::from_millis(config.sonar.export_delay_ms),
            };
            let client = ApiClient::new(ClientConfig::sonarqube(&config.sonar.url, &token))
                .context("Failed to build SonarQube client")?
                .with_cancel_token(cancel.clone());
            let progress = runner::batch_progress(items.len(), "Scanning", args.quiet);
            let runner = tool_runner(config, config.sonar.timeout_seconds, &cancel)
                .with_progress(progress.clone());

            println!("🔬 Scanning {} projects with SonarQube at {}", items.len(), settings.url);
            let sonar_report = scanners::sonar::scan_projects(&runner, &client, &settings, items).await;
            progress.finish_and_clear();

            let results_path = config.output_path("all_results.csv");
            report::write_records(&results_path, &scanners::sonar::IssueRow::COLUMNS, &sonar_report.issues)?;
            let summary_path = config.output_path("summary.csv");
            write_sonar_summary(&summary_path, &sonar_report.summaries)?;

            println!("\n📊 SonarQube Summary:");
            println!("   Projects scanned: {}", sonar_report.scanned);
            println!("   Issues exported: {}", sonar_report.issues.len());
            println!("\n✅ Results saved to {} and {}", results_path.display(), summary_path.display());
            persist_failures(
                &sonar_report.failures,
                config,
                "sonar_failed_projects.log",
                "Projects that failed to scan or export:",
            )?;
        }

        Command::Sonar {
            action: SonarCommand::Summarize {
                ref input,
                ref output,
            },
        } => {
            let input = match input {
                Some(path) => path.clone(),
                None => config.output_path("all_results.csv"),
            };
            let output = match output {
                Some(path) => output_file(config, path)?,
                None => config.output_path("summary.csv"),
            };

            let table = read_input(&input, Some("project"))?;
            let summaries = scanners::sonar::summarize_table(&table);
            write_sonar_summary(&output, &summaries)?;
            println!("✅ Summary of {} projects saved to {}", summaries.len(), output.display());
        }

        Command::DependencyCheck { ref path } => {
            let settings = scanners::DependencyCheckSettings {
                path: path.clone().unwrap_or_else(|| config.dependency_check.path.clone()),
                no_update: config.dependency_check.no_update,
            };
            let runner = tool_runner(config, config.dependency_check.timeout_seconds, &cancel);
            let version =
                scanners::dependency_check::check_installation(&runner, &settings.path).await?;
            info!("Dependency-Check version: {}", version);

            let items = targets::list_projects(&config.general.projects_folder, false)?;
            let progress = runner::batch_progress(items.len(), "Dependency-Check", args.quiet);
            let runner = runner.with_progress(progress.clone());

            println!("🛡️  Scanning {} projects with Dependency-Check", items.len());
            let dc_report = scanners::dependency_check::scan_projects(&runner, &settings, items).await;
            progress.finish_and_clear();

            let summary_path = config.output_path("dependency_check_summary.csv");
            let details_path = config.output_path("dependency_check_details.csv");
            let summary_columns = column_names(&scanners::dependency_check::SUMMARY_COLUMNS);
            let detail_columns = column_names(&scanners::dependency_check::DETAIL_COLUMNS);
            report::write_rows(&summary_path, &summary_columns, &dc_report.summary_rows())?;
            report::write_rows(&details_path, &detail_columns, &dc_report.detail_rows())?;

            let stats = scanners::ScanStatistics::from_summaries(&dc_report.summaries);
            stats.log();

            println!("\n📊 Vulnerability Summary:");
            println!("   Projects analyzed: {}", stats.projects);
            println!("   Projects with vulnerabilities: {}", stats.with_vulnerabilities);
            println!(
                "   - 🔴 Critical: {} | 🟠 High: {} | 🟡 Medium: {} | 🟢 Low: {}",
                stats.critical, stats.high, stats.medium, stats.low
            );
            println!("\n✅ Reports saved to {} and {}", summary_path.display(), details_path.display());
            persist_failures(
                &dc_report.failures,
                config,
                "dependency_check_failed_projects.log",
                "Projects that failed to scan:",
            )?;
        }

        Command::Churn {
            since,
            until,
            ref output,
        } => {
            let since = since.unwrap_or(config.git.since);
            let until = until.unwrap_or(config.git.until);
            if since > until {
                bail!("Window start {} is after its end {}", since, until);
            }

            let items = targets::list_projects(&config.general.projects_folder, true)?;
            let git_cli = git::GitCli::new(tool_runner(config, config.git.timeout_seconds, &cancel));

            println!("📈 Analyzing commits of {} projects from {} to {}", items.len(), since, until);
            let (rows, skipped) = git::analyze_activity(&git_cli, items, since, until).await;

            let path = output_file(config, output)?;
            report::write_records(&path, &analysis::CommitActivity::COLUMNS, &rows)?;
            println!("✅ Commit activity of {} projects saved to {}", rows.len(), path.display());
            persist_failures(&skipped, config, "skipped_projects.txt", "Skipped projects:")?;
        }

        Command::Loc {
            ref extensions,
            ref output,
        } => {
            let extensions = extensions
                .clone()
                .unwrap_or_else(|| config.general.loc_extensions.clone());
            let items = targets::list_projects(&config.general.projects_folder, false)?;

            println!("📏 Estimating lines of code of {} projects", items.len());
            let rows = tokio::task::spawn_blocking(move || {
                metrics::estimate_projects(&items, &extensions)
            })
            .await
            .context("LOC estimation task failed")?;

            let path = output_file(config, output)?;
            report::write_rows(&path, &column_names(&metrics::loc::COLUMNS), &rows)?;
            println!("✅ Estimates saved to {}", path.display());
        }

        Command::Issues {
            action:
                IssuesCommand::Resolution {
                    ref input,
                    ref url_column,
                    cutoff,
                    ref summary,
                    ref details,
                },
        } => {
            let table = read_input(input, Some(url_column))?;
            let urls = targets::unique_urls(&table, url_column);
            let cutoff = cutoff.unwrap_or(config.github.resolution_cutoff);
            let client = github_client(args, config, &cancel)?;

            println!("⏱️  Collecting closed issues of {} repositories (cutoff {})", urls.len(), cutoff);
            let resolution =
                github::collect_resolution_times(&client, urls, cutoff, config.general.workers)
                    .await;

            let details_path = output_file(config, details)?;
            let summary_path = output_file(config, summary)?;
            report::write_records(&details_path, &github::ResolutionDetail::COLUMNS, &resolution.details)?;
            report::write_records(&summary_path, &analysis::ResolutionStats::COLUMNS, &resolution.summaries)?;

            println!("\n📊 Resolution Summary:");
            println!("   Repositories with closed issues: {}", resolution.summaries.len());
            println!("   Issues analyzed: {}", resolution.details.len());
            println!("\n✅ Saved to {} and {}", summary_path.display(), details_path.display());
            persist_failures(
                &resolution.failures,
                config,
                "issues_failed_repositories.log",
                "Repositories that failed:",
            )?;
        }

        Command::Issues {
            action:
                IssuesCommand::Categories {
                    ref input,
                    ref url_column,
                    start,
                    end,
                    max_issues,
                    ref output,
                },
        } => {
            let table = read_input(input, Some(url_column))?;
            let urls = targets::unique_urls(&table, url_column);
            let window = github::IssueWindow::new(
                start.unwrap_or(config.github.issues_start),
                end.unwrap_or(config.github.issues_end),
            );
            let max_issues = max_issues.unwrap_or(config.github.max_issues);
            let client = github_client(args, config, &cancel)?;

            println!("🏷️  Categorizing issues of {} repositories", urls.len());
            let (rows, failures) = github::collect_issue_categories(
                &client,
                urls,
                window,
                max_issues,
                config.general.workers,
            )
            .await;

            let path = output_file(config, output)?;
            report::write_rows(&path, &analysis::categories::columns(), &rows)?;
            println!("✅ Categories of {} repositories saved to {}", rows.len(), path.display());
            persist_failures(
                &failures,
                config,
                "issue_categories_skipped.log",
                "Repositories without categorized issues:",
            )?;
        }

        Command::InitConfig => handle_init_config()?,
    }

    Ok(())
}

fn column_names(columns: &[&str]) -> Vec<String> {
    columns.iter().map(|c| c.to_string()).collect()
}

fn write_sonar_summary(path: &Path, summaries: &[scanners::SonarSummary]) -> Result<()> {
    let rows: Vec<report::Row> = summaries.iter().map(|s| s.to_row()).collect();
    report::write_rows(path, &column_names(&scanners::SonarSummary::COLUMNS), &rows)
}
