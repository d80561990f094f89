//! Rate-limited HTTP client shared by the GitHub and SonarQube collectors.

pub mod client;
#[cfg(test)]
pub mod stub;

pub use client::{ApiClient, ApiOutcome, ClientConfig};
