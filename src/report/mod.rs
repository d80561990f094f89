//! Tabular output: CSV datasets and failure logs.

pub mod csv_writer;
pub mod failures;

pub use csv_writer::{write_records, write_rows, Row};
pub use failures::FailureLog;
