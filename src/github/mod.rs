//! GitHub collectors: repository search, threshold filtering, contributor
//! counts and issue statistics.

pub mod contributors;
pub mod filter;
pub mod issues;
pub mod search;

pub use contributors::collect_contributors;
pub use filter::{filter_repositories, FilterThresholds};
pub use issues::{collect_issue_categories, collect_resolution_times, IssueWindow, ResolutionDetail};
pub use search::{search_repositories, RepositoryRecord, SearchParams};
