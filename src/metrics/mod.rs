//! Source-size metrics.

pub mod loc;

pub use loc::estimate_projects;
