//! Dataset export: JSON passthrough and flattened CSV.
//!
//! CSV columns are dot-paths into the record objects (`location.type`),
//! so nested observation payloads land in a flat table.

use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::str::FromStr;
use thiserror::Error;

use crate::types::Record;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV write failed: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON write failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown export format '{0}' (expected json or csv)")]
    UnknownFormat(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(ExportError::UnknownFormat(other.to_string())),
        }
    }
}

/// Write `records` in the given format.
pub fn write_records<W: Write>(
    records: &[Record],
    format: ExportFormat,
    writer: W,
) -> Result<(), ExportError> {
    match format {
        ExportFormat::Json => to_json(records, writer),
        ExportFormat::Csv => to_csv(records, writer),
    }
}

/// Records as a pretty-printed JSON array, exactly as received.
pub fn to_json<W: Write>(records: &[Record], writer: W) -> Result<(), ExportError> {
    serde_json::to_writer_pretty(writer, records)?;
    Ok(())
}

/// Records as CSV, one row per record.
///
/// The header is the union of every record's flattened paths; a path keeps
/// the position of its first appearance, and records missing it get an empty
/// cell.
pub fn to_csv<W: Write>(records: &[Record], writer: W) -> Result<(), ExportError> {
    let rows: Vec<Vec<(String, String)>> = records.iter().map(flatten).collect();

    let mut columns: Vec<&str> = Vec::new();
    let mut seen = HashSet::new();
    for row in &rows {
        for (path, _) in row {
            if seen.insert(path.as_str()) {
                columns.push(path.as_str());
            }
        }
    }

    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(&columns)?;
    for row in &rows {
        let by_path: HashMap<&str, &str> = row
            .iter()
            .map(|(path, cell)| (path.as_str(), cell.as_str()))
            .collect();
        let cells: Vec<&str> = columns
            .iter()
            .map(|col| by_path.get(col).copied().unwrap_or(""))
            .collect();
        csv.write_record(&cells)?;
    }
    csv.flush()?;
    Ok(())
}

fn flatten(record: &Record) -> Vec<(String, String)> {
    let mut cells = Vec::new();
    for (key, value) in &record.0 {
        flatten_into(key, value, &mut cells);
    }
    cells
}

/// Nested objects contribute `parent.child` paths; arrays stay compact
/// JSON so coordinate pairs survive in one cell; null is an empty cell;
/// strings go in raw, unquoted.
fn flatten_into(path: &str, value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Object(fields) => {
            for (key, value) in fields {
                flatten_into(&format!("{path}.{key}"), value, out);
            }
        }
        Value::Null => out.push((path.to_string(), String::new())),
        Value::String(s) => out.push((path.to_string(), s.clone())),
        other => out.push((path.to_string(), other.to_string())),
    }
}
