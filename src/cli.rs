//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// repoharvest - research datasets from GitHub repositories
///
/// Collect repository metadata from GitHub, clone and time-travel the
/// repositories, run SonarQube and OWASP Dependency-Check over them, and
/// aggregate git and issue-tracker statistics into CSV files.
///
/// Examples:
///   repoharvest search --created-start 2022-01-01 --created-end 2022-01-31
///   repoharvest filter --input output/github_repos.csv --min-stars 100
///   repoharvest clone --input output/github_repos_filtered.csv
///   repoharvest revert --date 01-01-2025
///   repoharvest sonar scan
///   repoharvest issues resolution --input output/github_repos.csv
///   repoharvest init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Path to configuration file
    ///
    /// If not specified, looks for .repoharvest.toml in the current directory
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Number of concurrent work items
    #[arg(long, value_name = "NUM", env = "MAX_WORKERS", global = true)]
    pub workers: Option<usize>,

    /// Directory for datasets and logs
    #[arg(long, value_name = "DIR", global = true)]
    pub output_dir: Option<PathBuf>,

    /// Folder holding one cloned repository per subdirectory
    #[arg(long, value_name = "DIR", env = "PROJECTS_FOLDER", global = true)]
    pub projects_folder: Option<PathBuf>,

    /// GitHub personal access token
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true, global = true)]
    pub github_token: Option<String>,

    /// SonarQube server URL
    #[arg(long, env = "SONARQUBE_URL", global = true)]
    pub sonarqube_url: Option<String>,

    /// SonarQube user token
    #[arg(long, env = "SONARQUBE_TOKEN", hide_env_values = true, global = true)]
    pub sonarqube_token: Option<String>,

    /// Path of the sonar-scanner executable
    #[arg(long, env = "SONAR_SCANNER_PATH", global = true)]
    pub sonar_scanner_path: Option<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Search GitHub repositories by language and date window
    Search {
        /// Language qualifier (default from config)
        #[arg(long)]
        language: Option<String>,

        /// First creation date, YYYY-MM-DD
        #[arg(long, value_name = "DATE")]
        created_start: Option<NaiveDate>,

        /// Last creation date, YYYY-MM-DD
        #[arg(long, value_name = "DATE")]
        created_end: Option<NaiveDate>,

        /// Only repositories pushed on or after this date
        #[arg(long, value_name = "DATE")]
        pushed_after: Option<NaiveDate>,

        #[arg(long, value_name = "PAGE")]
        start_page: Option<u32>,

        #[arg(long, value_name = "PAGE")]
        end_page: Option<u32>,

        /// Output CSV file
        #[arg(short, long, default_value = "github_repos.csv", value_name = "FILE")]
        output: PathBuf,
    },

    /// Keep repositories above popularity thresholds
    Filter {
        /// Input CSV produced by `search`
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        #[arg(short, long, default_value = "github_repos_filtered.csv", value_name = "FILE")]
        output: PathBuf,

        #[arg(long, default_value = "0")]
        min_stars: u64,

        #[arg(long, default_value = "0")]
        min_issues: u64,

        #[arg(long, default_value = "0")]
        min_topics: usize,
    },

    /// Count contributors of every repository in a table
    Contributors {
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        #[arg(short, long, default_value = "contributors.csv", value_name = "FILE")]
        output: PathBuf,

        /// Column holding the repository URL
        #[arg(long, default_value = "html_url")]
        url_column: String,
    },

    /// Clone every repository of a table into the projects folder
    Clone {
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        #[arg(long, default_value = "html_url")]
        url_column: String,
    },

    /// Reset every project to its last commit on or before a date
    Revert {
        /// Target date, DD-MM-YYYY or YYYY-MM-DD
        #[arg(short, long, value_name = "DATE")]
        date: String,
    },

    /// SonarQube scanning and summaries
    Sonar {
        #[command(subcommand)]
        action: SonarCommand,
    },

    /// Scan every project with OWASP Dependency-Check
    DependencyCheck {
        /// Path of the dependency-check executable (default from config)
        #[arg(long, value_name = "PATH")]
        path: Option<String>,
    },

    /// Commit frequency and churn of every project
    Churn {
        /// Window start, YYYY-MM-DD (default from config)
        #[arg(long, value_name = "DATE")]
        since: Option<NaiveDate>,

        /// Window end, YYYY-MM-DD (default from config)
        #[arg(long, value_name = "DATE")]
        until: Option<NaiveDate>,

        #[arg(short, long, default_value = "commit_analysis_summary.csv", value_name = "FILE")]
        output: PathBuf,
    },

    /// Estimate lines of code of every project
    Loc {
        /// File extensions to count (comma-separated)
        #[arg(long, value_name = "EXTS", value_delimiter = ',')]
        extensions: Option<Vec<String>>,

        #[arg(short, long, default_value = "loc.csv", value_name = "FILE")]
        output: PathBuf,
    },

    /// Issue-tracker statistics
    Issues {
        #[command(subcommand)]
        action: IssuesCommand,
    },

    /// Generate a default .repoharvest.toml configuration file
    InitConfig,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SonarCommand {
    /// Scan every project and export its issues
    Scan,

    /// Rebuild summary.csv from an existing all_results.csv
    Summarize {
        #[arg(short, long, value_name = "FILE")]
        input: Option<PathBuf>,

        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum IssuesCommand {
    /// Time-to-fix of closed issues
    Resolution {
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        #[arg(long, default_value = "html_url")]
        url_column: String,

        /// Issues closed after this date are ignored (default from config)
        #[arg(long, value_name = "DATE")]
        cutoff: Option<NaiveDate>,

        #[arg(long, default_value = "time_to_fix_summary.csv", value_name = "FILE")]
        summary: PathBuf,

        #[arg(long, default_value = "issues_details.csv", value_name = "FILE")]
        details: PathBuf,
    },

    /// Keyword categories of issues created in a window
    Categories {
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        #[arg(long, default_value = "html_url")]
        url_column: String,

        #[arg(long, value_name = "DATE")]
        start: Option<NaiveDate>,

        #[arg(long, value_name = "DATE")]
        end: Option<NaiveDate>,

        /// Issues fetched per repository
        #[arg(long, value_name = "COUNT")]
        max_issues: Option<usize>,

        #[arg(short, long, default_value = "issue_categories.csv", value_name = "FILE")]
        output: PathBuf,
    },
}

/// Parse a revert date given as `DD-MM-YYYY` or `YYYY-MM-DD`.
pub fn parse_revert_date(s: &str) -> Result<NaiveDate, String> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%d-%m-%Y")
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
        .map_err(|_| format!("Invalid date '{}': expected DD-MM-YYYY or YYYY-MM-DD", s))
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if self.workers == Some(0) {
            return Err("Workers must be at least 1".to_string());
        }

        if let Some(ref url) = self.sonarqube_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("SonarQube URL must start with 'http://' or 'https://'".to_string());
            }
        }

        match self.command {
            Command::Search {
                created_start: Some(start),
                created_end: Some(end),
                ..
            } if start > end => {
                return Err("--created-start must not be after --created-end".to_string());
            }
            Command::Search {
                start_page: Some(start),
                end_page: Some(end),
                ..
            } if start == 0 || start > end => {
                return Err("Pages start at 1 and --start-page must not exceed --end-page".to_string());
            }
            Command::Churn {
                since: Some(since),
                until: Some(until),
                ..
            } if since > until => {
                return Err("--since must not be after --until".to_string());
            }
            Command::Revert { ref date } => {
                parse_revert_date(date)?;
            }
            Command::Sonar {
                action: SonarCommand::Scan,
            } if self.sonarqube_token.as_deref().unwrap_or("").is_empty() => {
                return Err("SonarQube token is required (--sonarqube-token or SONARQUBE_TOKEN)".to_string());
            }
            Command::Issues {
                action:
                    IssuesCommand::Categories {
                        start: Some(start),
                        end: Some(end),
                        ..
                    },
            } if start > end => {
                return Err("--start must not be after --end".to_string());
            }
            Command::Issues {
                action: IssuesCommand::Categories {
                    max_issues: Some(0), ..
                },
            } => {
                return Err("--max-issues must be at least 1".to_string());
            }
            _ => {}
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
