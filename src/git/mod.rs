//! Git helpers: cloning, historical state selection and history statistics.

pub mod clone;
pub mod history;

pub use clone::clone_all;
pub use history::{analyze_activity, revert_projects, GitCli};
