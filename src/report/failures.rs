//! Failed and skipped item bookkeeping.

use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::path::Path;
use tracing::info;

/// Identifiers that failed in a batch, with the reason for each.
#[derive(Debug, Clone, Default)]
pub struct FailureLog {
    entries: Vec<(String, String)>,
}

impl FailureLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, id: impl Into<String>, reason: impl Into<String>) {
        self.entries.push((id.into(), reason.into()));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(id, _)| id.as_str())
    }

    /// Text form: `header` on the first line, then `id: reason` per entry.
    pub fn render(&self, header: &str) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", header);
        for (id, reason) in &self.entries {
            let _ = writeln!(out, "{}: {}", id, reason);
        }
        out
    }

    /// Write the log to `path`, returning whether anything was written.
    ///
    /// An empty log is only written when `always` is set.
    pub fn persist(&self, path: &Path, header: &str, always: bool) -> Result<bool> {
        if self.is_empty() && !always {
            return Ok(false);
        }

        std::fs::write(path, self.render(header))
            .with_context(|| format!("Failed to write failure log {}", path.display()))?;
        info!("Recorded {} failed items in {}", self.len(), path.display());
        Ok(true)
    }
}
