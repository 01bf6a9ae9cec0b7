//! Output formatting and persistence for pipeline tables.
//!
//! Supports pretty-printing, JSON serialization, and CSV writing of records
//! and wide tables.

use anyhow::Result;
use tracing::{debug, info};

use crate::table::WideTable;
use csv::WriterBuilder;
use serde::Serialize;
use std::fmt::Debug;
use std::fs::File;
use std::path::Path;

/// Logs a value using Rust's debug pretty-print format.
pub fn print_pretty<T: Debug>(value: &T) {
    debug!("{:#?}", value);
}

/// Writes a wide table as CSV: id columns, then value columns, with missing
/// cells left empty.
pub fn write_wide(path: &Path, table: &WideTable) -> Result<()> {
    info!(
        path = %path.display(),
        rows = table.len(),
        columns = table.value_columns.len(),
        "Writing wide table"
    );

    let mut writer = WriterBuilder::new().from_path(path)?;
    writer.write_record(table.id_columns.iter().chain(&table.value_columns))?;
    for row in &table.rows {
        let values = row.values.iter().map(|v| v.map(|v| v.to_string()).unwrap_or_default());
        writer.write_record(row.ids.iter().cloned().chain(values))?;
    }
    writer.flush()?;

    Ok(())
}

/// Writes `records` as CSV rows to `path`, replacing any existing file.
///
/// The header row comes from the record type's field names.
pub fn write_records<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    debug!(path = %path.display(), rows = records.len(), "Writing CSV");

    let file = File::create(path)?;
    let mut writer = WriterBuilder::new().has_headers(true).from_writer(file);
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;

    Ok(())
}

/// Writes `value` as pretty-printed JSON to `path`.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    debug!(path = %path.display(), "Writing JSON");
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, value)?;
    Ok(())
}
