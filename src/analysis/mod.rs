//! Result aggregation: normalisation of scanner output, git statistics and
//! issue-tracker statistics.

pub mod aggregator;
pub mod categories;
pub mod git_stats;
pub mod resolution;

pub use aggregator::*;
pub use git_stats::CommitActivity;
pub use resolution::ResolutionStats;
