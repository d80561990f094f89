//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.repoharvest.toml` files. Secrets (GitHub and SonarQube tokens) never
//! live here; they come from the command line or the environment.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file name, looked up in the working directory.
pub const CONFIG_FILE: &str = ".repoharvest.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// GitHub collection settings.
    #[serde(default)]
    pub github: GithubConfig,

    /// SonarQube settings.
    #[serde(default)]
    pub sonar: SonarConfig,

    /// OWASP Dependency-Check settings.
    #[serde(default)]
    pub dependency_check: DependencyCheckConfig,

    /// Git history settings.
    #[serde(default)]
    pub git: GitConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Directory every dataset and log is written to.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Folder holding one cloned repository per subdirectory.
    #[serde(default = "default_projects_folder")]
    pub projects_folder: PathBuf,

    /// Number of concurrent work items.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Log file name inside the output directory (none disables file logging).
    #[serde(default)]
    pub log_file: Option<String>,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,

    /// File extensions counted by the LOC estimate.
    #[serde(default = "default_loc_extensions")]
    pub loc_extensions: Vec<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            projects_folder: default_projects_folder(),
            workers: default_workers(),
            log_file: None,
            verbose: false,
            loc_extensions: default_loc_extensions(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_projects_folder() -> PathBuf {
    PathBuf::from("repos/post-repos")
}

fn default_workers() -> usize {
    4
}

fn default_loc_extensions() -> Vec<String> {
    vec!["js".to_string()]
}

/// GitHub search and issue collection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubConfig {
    /// REST API base URL; GraphQL lives at `<api_url>/graphql`.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Language qualifier of the search query.
    #[serde(default = "default_language")]
    pub language: String,

    /// Inclusive creation window of the search.
    #[serde(default = "default_created_start")]
    pub created_start: NaiveDate,

    #[serde(default = "default_created_end")]
    pub created_end: NaiveDate,

    /// Only repositories pushed on or after this date.
    #[serde(default = "default_pushed_after")]
    pub pushed_after: NaiveDate,

    /// First and last search page to fetch.
    #[serde(default = "default_start_page")]
    pub start_page: u32,

    #[serde(default = "default_end_page")]
    pub end_page: u32,

    /// Results per page (GitHub caps this at 100).
    #[serde(default = "default_per_page")]
    pub per_page: u32,

    /// Pause between consecutive requests of one worker, in milliseconds.
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    /// Issues closed after this date are left out of resolution statistics.
    #[serde(default = "default_resolution_cutoff")]
    pub resolution_cutoff: NaiveDate,

    /// Creation window of categorised issues.
    #[serde(default = "default_issues_start")]
    pub issues_start: NaiveDate,

    #[serde(default = "default_issues_end")]
    pub issues_end: NaiveDate,

    /// Upper bound of issues categorised per repository.
    #[serde(default = "default_max_issues")]
    pub max_issues: usize,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            language: default_language(),
            created_start: default_created_start(),
            created_end: default_created_end(),
            pushed_after: default_pushed_after(),
            start_page: default_start_page(),
            end_page: default_end_page(),
            per_page: default_per_page(),
            request_delay_ms: default_request_delay_ms(),
            resolution_cutoff: default_resolution_cutoff(),
            issues_start: default_issues_start(),
            issues_end: default_issues_end(),
            max_issues: default_max_issues(),
        }
    }
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap_or_default()
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_language() -> String {
    "javascript".to_string()
}

fn default_created_start() -> NaiveDate {
    date(2022, 1, 1)
}

fn default_created_end() -> NaiveDate {
    date(2022, 1, 31)
}

fn default_pushed_after() -> NaiveDate {
    date(2025, 2, 1)
}

fn default_start_page() -> u32 {
    1
}

fn default_end_page() -> u32 {
    3
}

fn default_per_page() -> u32 {
    100
}

fn default_request_delay_ms() -> u64 {
    500
}

fn default_resolution_cutoff() -> NaiveDate {
    date(2021, 1, 1)
}

fn default_issues_start() -> NaiveDate {
    date(2018, 1, 1)
}

fn default_issues_end() -> NaiveDate {
    date(2021, 1, 1)
}

fn default_max_issues() -> usize {
    500
}

/// SonarQube scanner and Web API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SonarConfig {
    /// SonarQube server URL.
    #[serde(default = "default_sonar_url")]
    pub url: String,

    /// Path of the `sonar-scanner` executable.
    #[serde(default = "default_scanner_path")]
    pub scanner_path: String,

    /// Issues requested per page (the API caps this at 500).
    #[serde(default = "default_sonar_page_size")]
    pub page_size: u32,

    /// Per-project scanner timeout in seconds.
    #[serde(default = "default_tool_timeout")]
    pub timeout_seconds: u64,

    /// Pause before exporting each project, in milliseconds.
    #[serde(default = "default_export_delay_ms")]
    pub export_delay_ms: u64,
}

impl Default for SonarConfig {
    fn default() -> Self {
        Self {
            url: default_sonar_url(),
            scanner_path: default_scanner_path(),
            page_size: default_sonar_page_size(),
            timeout_seconds: default_tool_timeout(),
            export_delay_ms: default_export_delay_ms(),
        }
    }
}

fn default_sonar_url() -> String {
    "http://127.0.0.1:9000".to_string()
}

fn default_scanner_path() -> String {
    "sonar-scanner".to_string()
}

fn default_sonar_page_size() -> u32 {
    500
}

fn default_tool_timeout() -> u64 {
    3600
}

fn default_export_delay_ms() -> u64 {
    1000
}

/// OWASP Dependency-Check settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyCheckConfig {
    /// Path of the `dependency-check` executable.
    #[serde(default = "default_dependency_check_path")]
    pub path: String,

    /// Per-project timeout in seconds.
    #[serde(default = "default_tool_timeout")]
    pub timeout_seconds: u64,

    /// Skip the NVD database update on every scan.
    #[serde(default = "default_true")]
    pub no_update: bool,
}

impl Default for DependencyCheckConfig {
    fn default() -> Self {
        Self {
            path: default_dependency_check_path(),
            timeout_seconds: default_tool_timeout(),
            no_update: true,
        }
    }
}

fn default_dependency_check_path() -> String {
    "dependency-check".to_string()
}

fn default_true() -> bool {
    true
}

/// Git history analysis settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitConfig {
    /// Commit window of the activity dataset.
    #[serde(default = "default_since")]
    pub since: NaiveDate,

    #[serde(default = "default_until")]
    pub until: NaiveDate,

    /// Per-command timeout in seconds.
    #[serde(default = "default_git_timeout")]
    pub timeout_seconds: u64,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            since: default_since(),
            until: default_until(),
            timeout_seconds: default_git_timeout(),
        }
    }
}

fn default_since() -> NaiveDate {
    date(2022, 1, 1)
}

fn default_until() -> NaiveDate {
    date(2025, 1, 1)
}

fn default_git_timeout() -> u64 {
    900 // 15 min
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings, but only
    /// when they were actually given.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(workers) = args.workers {
            self.general.workers = workers;
        }
        if let Some(ref dir) = args.output_dir {
            self.general.output_dir = dir.clone();
        }
        if let Some(ref folder) = args.projects_folder {
            self.general.projects_folder = folder.clone();
        }
        if let Some(ref url) = args.sonarqube_url {
            self.sonar.url = url.clone();
        }
        if let Some(ref path) = args.sonar_scanner_path {
            self.sonar.scanner_path = path.clone();
        }

        // Flags always override
        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Full path of a dataset inside the output directory.
    pub fn output_path(&self, file_name: &str) -> PathBuf {
        self.general.output_dir.join(file_name)
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.general.workers, 4);
        assert_eq!(config.github.per_page, 100);
        assert_eq!(config.git.timeout_seconds, 900);
        assert_eq!(config.git.since, NaiveDate::from_ymd_opt(2022, 1, 1).unwrap());
        assert_eq!(config.general.loc_extensions, vec!["js"]);
        assert!(config.dependency_check.no_update);
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[general]
output_dir = "datasets"
workers = 8
log_file = "run.log"

[github]
language = "typescript"
created_start = "2019-06-01"
end_page = 10

[sonar]
url = "http://sonar.local:9000"

[git]
until = "2024-06-30"
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.general.output_dir, PathBuf::from("datasets"));
        assert_eq!(config.general.workers, 8);
        assert_eq!(config.general.log_file.as_deref(), Some("run.log"));
        assert_eq!(config.github.language, "typescript");
        assert_eq!(
            config.github.created_start,
            NaiveDate::from_ymd_opt(2019, 6, 1).unwrap()
        );
        assert_eq!(config.github.end_page, 10);
        assert_eq!(config.github.per_page, 100);
        assert_eq!(config.sonar.url, "http://sonar.local:9000");
        assert_eq!(config.sonar.page_size, 500);
        assert_eq!(config.git.until, NaiveDate::from_ymd_opt(2024, 6, 30).unwrap());
    }

    #[test]
    fn test_output_path() {
        let config = Config::default();
        assert_eq!(
            config.output_path("summary.csv"),
            PathBuf::from("output").join("summary.csv")
        );
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(!toml_str.is_empty());
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[github]"));
        assert!(toml_str.contains("[sonar]"));
        assert!(toml_str.contains("[dependency_check]"));
        assert!(toml_str.contains("[git]"));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.github.end_page, 3);
    }
}
