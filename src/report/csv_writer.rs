//! CSV dataset writing.

use anyhow::{Context, Result};
use serde::Serialize;
use indexmap::IndexMap;
use std::path::Path;
use tracing::info;

/// A dataset row keyed by column name, in insertion order.
pub type Row = IndexMap<String, String>;

/// Write `rows` under a fixed header.
///
/// When `columns` is empty the first row's keys become the header, in the
/// order they were inserted. Cells a row does not have are written empty,
/// keys outside the header are dropped. The parent directory must already
/// exist.
pub fn write_rows(path: &Path, columns: &[String], rows: &[Row]) -> Result<()> {
    let columns: Vec<String> = if columns.is_empty() {
        rows.first()
            .map(|r| r.keys().cloned().collect())
            .unwrap_or_default()
    } else {
        columns.to_vec()
    };

    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    writer
        .write_record(&columns)
        .with_context(|| format!("Failed to write header to {}", path.display()))?;

    for row in rows {
        let record = columns
            .iter()
            .map(|c| row.get(c).map(String::as_str).unwrap_or(""));
        writer
            .write_record(record)
            .with_context(|| format!("Failed to write row to {}", path.display()))?;
    }

    writer.flush()?;
    info!("Wrote {} rows to {}", rows.len(), path.display());
    Ok(())
}

/// Write typed records under `header`.
///
/// `header` must list the record's fields in declaration order. It is
/// written even when there are no records.
pub fn write_records<T: Serialize>(path: &Path, header: &[&str], records: &[T]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    writer
        .write_record(header)
        .with_context(|| format!("Failed to write header to {}", path.display()))?;

    for record in records {
        writer
            .serialize(record)
            .with_context(|| format!("Failed to write record to {}", path.display()))?;
    }

    writer.flush()?;
    info!("Wrote {} rows to {}", records.len(), path.display());
    Ok(())
}
