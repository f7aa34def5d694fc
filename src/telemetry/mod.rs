//! Device telemetry tables and the sources that produce them.
//!
//! A scan works on exactly one [`TelemetryTable`]. It is built once by a
//! [`TelemetrySource`] (a CSV export or the synthetic generator) and is
//! read-only for the rest of the scan.

pub mod file;
pub mod synthetic;

pub use file::CsvSource;
pub use synthetic::SyntheticSource;

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to read telemetry from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed CSV in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("no .csv file found in {0}")]
    NoCsvFile(PathBuf),

    #[error("telemetry source has no header row")]
    Empty,

    #[error("row {row} does not match the table schema: {reason}")]
    SchemaMismatch { row: usize, reason: String },
}

/// A single cell value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Integer(i64),
    Float(f64),
    Text(String),
    Missing,
}

impl Value {
    /// Numeric view of the value. `Missing` and `Text` have none.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Text(_) | Value::Missing => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => write!(f, "{}", s),
            Value::Missing => write!(f, "NaN"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Numeric,
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
}

impl Column {
    pub fn numeric(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ColumnKind::Numeric,
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ColumnKind::Text,
        }
    }
}

/// One telemetry row. Values are positional, aligned with the table's columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub values: Vec<Value>,
}

/// An ordered set of records sharing one schema.
#[derive(Debug, Clone)]
pub struct TelemetryTable {
    id_field: String,
    columns: Vec<Column>,
    rows: Vec<Record>,
}

impl TelemetryTable {
    pub fn new(id_field: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            id_field: id_field.into(),
            columns,
            rows: Vec::new(),
        }
    }

    /// Append a row, enforcing the shared schema.
    pub fn push(&mut self, values: Vec<Value>) -> Result<(), TelemetryError> {
        let row = self.rows.len();
        if values.len() != self.columns.len() {
            return Err(TelemetryError::SchemaMismatch {
                row,
                reason: format!(
                    "expected {} fields, got {}",
                    self.columns.len(),
                    values.len()
                ),
            });
        }
        for (col, value) in self.columns.iter().zip(&values) {
            if col.kind == ColumnKind::Numeric && matches!(value, Value::Text(_)) {
                return Err(TelemetryError::SchemaMismatch {
                    row,
                    reason: format!("text value in numeric column '{}'", col.name),
                });
            }
        }
        self.rows.push(Record { values });
        Ok(())
    }

    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn rows(&self) -> &[Record] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Positions of the numeric columns, in schema order.
    pub fn numeric_columns(&self) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.kind == ColumnKind::Numeric)
            .map(|(i, _)| i)
            .collect()
    }

    fn id_index(&self) -> Option<usize> {
        self.columns.iter().position(|c| c.name == self.id_field)
    }

    /// Identifier of the row at `index`. Falls back to the row ordinal when the
    /// table has no identifier column.
    pub fn identifier(&self, index: usize) -> String {
        match (self.id_index(), self.rows.get(index)) {
            (Some(col), Some(record)) => record.values[col].to_string(),
            _ => index.to_string(),
        }
    }
}

/// Anything that can hand the scanner a telemetry table.
pub trait TelemetrySource: Send + Sync {
    /// Short human-readable name, used in logs and reports.
    fn name(&self) -> String;

    fn acquire(&self) -> Result<TelemetryTable, TelemetryError>;
}

/// Where the table used by a scan came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TableOrigin {
    Source { name: String },
    Synthetic { reason: String },
}

#[derive(Debug, Clone)]
pub struct Acquisition {
    pub table: TelemetryTable,
    pub origin: TableOrigin,
}

/// Acquire from `source`, substituting the synthetic table on any failure.
/// With no source configured the synthetic table is used directly.
pub fn acquire_or_synthetic(
    source: Option<&dyn TelemetrySource>,
    fallback: &SyntheticSource,
) -> Acquisition {
    let reason = match source {
        Some(source) => match source.acquire() {
            Ok(table) => {
                info!(source = %source.name(), rows = table.len(), "telemetry acquired");
                return Acquisition {
                    table,
                    origin: TableOrigin::Source {
                        name: source.name(),
                    },
                };
            }
            Err(e) => {
                warn!(source = %source.name(), error = %e, "telemetry acquisition failed, using synthetic data");
                e.to_string()
            }
        },
        None => "no telemetry source configured".to_string(),
    };

    let table = fallback.generate();
    info!(rows = table.len(), seed = fallback.seed, "generated synthetic telemetry");
    Acquisition {
        table,
        origin: TableOrigin::Synthetic { reason },
    }
}
