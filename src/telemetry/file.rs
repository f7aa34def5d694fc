//! CSV telemetry exports.

use super::{Column, ColumnKind, TelemetryError, TelemetrySource, TelemetryTable, Value};
use std::path::PathBuf;
use tracing::debug;

/// Reads a CSV export. `path` may name the file itself or a directory holding
/// the export, in which case the first `.csv` file (by name) is used.
#[derive(Debug, Clone)]
pub struct CsvSource {
    pub path: PathBuf,
    pub id_field: String,
}

impl CsvSource {
    pub fn new(path: impl Into<PathBuf>, id_field: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            id_field: id_field.into(),
        }
    }

    fn resolve(&self) -> Result<PathBuf, TelemetryError> {
        if !self.path.is_dir() {
            return Ok(self.path.clone());
        }
        let entries = std::fs::read_dir(&self.path).map_err(|source| TelemetryError::Io {
            path: self.path.clone(),
            source,
        })?;
        let mut csvs: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("csv")))
            .collect();
        csvs.sort();
        csvs.into_iter()
            .next()
            .ok_or_else(|| TelemetryError::NoCsvFile(self.path.clone()))
    }
}

impl TelemetrySource for CsvSource {
    fn name(&self) -> String {
        format!("csv:{}", self.path.display())
    }

    fn acquire(&self) -> Result<TelemetryTable, TelemetryError> {
        let path = self.resolve()?;
        debug!(path = %path.display(), "reading telemetry CSV");
        let file = std::fs::File::open(&path).map_err(|source| TelemetryError::Io {
            path: path.clone(),
            source,
        })?;
        read_csv(file, &self.id_field).map_err(|e| match e {
            CsvReadError::Csv(source) => TelemetryError::Csv { path, source },
            CsvReadError::Table(e) => e,
        })
    }
}

enum CsvReadError {
    Csv(csv::Error),
    Table(TelemetryError),
}

impl From<csv::Error> for CsvReadError {
    fn from(e: csv::Error) -> Self {
        CsvReadError::Csv(e)
    }
}

impl From<TelemetryError> for CsvReadError {
    fn from(e: TelemetryError) -> Self {
        CsvReadError::Table(e)
    }
}

fn read_csv<R: std::io::Read>(reader: R, id_field: &str) -> Result<TelemetryTable, CsvReadError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
    if headers.is_empty() || headers.iter().all(String::is_empty) {
        return Err(TelemetryError::Empty.into());
    }

    let mut raw: Vec<Vec<String>> = Vec::new();
    for record in rdr.records() {
        let record = record?;
        raw.push(record.iter().map(str::to_string).collect());
    }

    // A column is numeric iff every present cell parses as a number.
    let kinds: Vec<(ColumnKind, bool)> = (0..headers.len())
        .map(|col| {
            let cells = raw.iter().filter_map(|r| r.get(col)).filter(|c| !is_missing(c));
            let mut numeric = true;
            let mut integral = true;
            for cell in cells {
                if cell.parse::<i64>().is_ok() {
                    continue;
                }
                integral = false;
                if cell.parse::<f64>().is_err() {
                    numeric = false;
                    break;
                }
            }
            if numeric {
                (ColumnKind::Numeric, integral)
            } else {
                (ColumnKind::Text, false)
            }
        })
        .collect();

    let columns = headers
        .iter()
        .zip(&kinds)
        .map(|(name, (kind, _))| Column {
            name: name.clone(),
            kind: *kind,
        })
        .collect();

    let mut table = TelemetryTable::new(id_field, columns);
    for row in raw {
        let values = row
            .iter()
            .zip(&kinds)
            .map(|(cell, (kind, integral))| parse_cell(cell, *kind, *integral))
            .collect();
        table.push(values)?;
    }
    Ok(table)
}

fn is_missing(cell: &str) -> bool {
    cell.is_empty()
        || cell.eq_ignore_ascii_case("na")
        || cell.eq_ignore_ascii_case("nan")
        || cell.eq_ignore_ascii_case("null")
}

fn parse_cell(cell: &str, kind: ColumnKind, integral: bool) -> Value {
    if is_missing(cell) {
        return Value::Missing;
    }
    match kind {
        ColumnKind::Text => Value::Text(cell.to_string()),
        ColumnKind::Numeric if integral => cell.parse().map(Value::Integer).unwrap_or(Value::Missing),
        ColumnKind::Numeric => cell.parse().map(Value::Float).unwrap_or(Value::Missing),
    }
}

/// Write a table as CSV.
pub fn write_csv<W: std::io::Write>(table: &TelemetryTable, writer: W) -> csv::Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(table.columns().iter().map(|c| c.name.as_str()))?;
    for row in table.rows() {
        wtr.write_record(row.values.iter().map(|v| match v {
            Value::Missing => String::new(),
            other => other.to_string(),
        }))?;
    }
    wtr.flush()?;
    Ok(())
}
