//! Static-analysis scanners driven as external tools.

pub mod dependency_check;
pub mod sonar;

pub use dependency_check::{DependencyCheckSettings, ScanStatistics};
pub use sonar::{SonarSettings, SonarSummary};
