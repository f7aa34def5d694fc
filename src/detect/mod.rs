//! Anomaly detection over telemetry tables.
//!
//! [`detect`] refits an isolation forest on every call, labels each record,
//! and picks the first few anomalous records (in table order) as the
//! [`ThreatBatch`] handed to the explainer.

pub mod isolation;

use crate::telemetry::{Column, Record, TelemetryTable, Value};
use crate::ErrorKind;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use thiserror::Error;
use tracing::{debug, info};

use self::isolation::IsolationForest;

/// Upper bound on the number of records forwarded for explanation.
pub const THREAT_LIMIT: usize = 3;

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("table has no numeric fields to score")]
    NoNumericFeatures,

    #[error("contamination must be in (0, 0.5], got {0}")]
    InvalidContamination(f64),

    #[error("anomaly detection failed: {cause}")]
    DetectionFailed { cause: String },
}

impl DetectError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DetectError::NoNumericFeatures => ErrorKind::NoNumericFeatures,
            DetectError::InvalidContamination(_) | DetectError::DetectionFailed { .. } => {
                ErrorKind::DetectionFailed
            }
        }
    }
}

/// Detector hyperparameters. Defaults are fixed; nothing is tuned per scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorParams {
    /// Expected fraction of anomalous records.
    pub contamination: f64,
    /// Seed for subsampling and split selection.
    pub seed: u64,
    pub n_trees: usize,
    /// Per-tree subsample size (capped at the table size).
    pub max_samples: usize,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            contamination: 0.04,
            seed: 42,
            n_trees: 100,
            max_samples: 256,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Label {
    Normal,
    Anomalous,
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Normal => write!(f, "NORMAL"),
            Label::Anomalous => write!(f, "ANOMALOUS"),
        }
    }
}

/// A telemetry record with its label and isolation score (lower = stranger).
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecord {
    pub id: String,
    pub record: Record,
    pub label: Label,
    pub score: f64,
}

impl ScoredRecord {
    pub fn is_anomalous(&self) -> bool {
        self.label == Label::Anomalous
    }
}

/// Every input record, in input order, labelled exactly once.
#[derive(Debug, Clone)]
pub struct ScoredTable {
    pub columns: Vec<Column>,
    pub rows: Vec<ScoredRecord>,
}

impl ScoredTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn anomaly_count(&self) -> usize {
        self.rows.iter().filter(|r| r.is_anomalous()).count()
    }

    /// The first `n` rows, for raw display.
    pub fn head(&self, n: usize) -> ScoredTable {
        ScoredTable {
            columns: self.columns.clone(),
            rows: self.rows.iter().take(n).cloned().collect(),
        }
    }
}

/// Up to [`THREAT_LIMIT`] anomalous records, in source order. Never re-sorted by score.
#[derive(Debug, Clone)]
pub struct ThreatBatch {
    pub id_field: String,
    pub columns: Vec<Column>,
    pub records: Vec<ScoredRecord>,
}

impl ThreatBatch {
    pub fn from_scored(id_field: &str, scored: &ScoredTable) -> Self {
        Self {
            id_field: id_field.to_string(),
            columns: scored.columns.clone(),
            records: scored
                .rows
                .iter()
                .filter(|r| r.is_anomalous())
                .take(THREAT_LIMIT)
                .cloned()
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Label every record of `table` and select the threat batch.
pub fn detect(
    table: &TelemetryTable,
    params: &DetectorParams,
) -> Result<(ScoredTable, ThreatBatch), DetectError> {
    let numeric = table.numeric_columns();
    if numeric.is_empty() {
        return Err(DetectError::NoNumericFeatures);
    }
    if !(params.contamination > 0.0 && params.contamination <= 0.5) {
        return Err(DetectError::InvalidContamination(params.contamination));
    }

    let matrix = feature_matrix(table, &numeric)?;
    let (scores, flags) = if matrix.is_empty() {
        (Vec::new(), Vec::new())
    } else {
        let mut forest = IsolationForest::new(params.n_trees, params.max_samples);
        forest.fit_predict(&matrix, params.seed, params.contamination)
    };

    if let Some(pos) = scores.iter().position(|s| !s.is_finite()) {
        return Err(DetectError::DetectionFailed {
            cause: format!("non-finite isolation score for row {}", pos),
        });
    }

    let rows: Vec<ScoredRecord> = table
        .rows()
        .iter()
        .zip(scores.iter().zip(&flags))
        .enumerate()
        .map(|(i, (record, (&score, &outlier)))| ScoredRecord {
            id: table.identifier(i),
            record: record.clone(),
            label: if outlier {
                Label::Anomalous
            } else {
                Label::Normal
            },
            score,
        })
        .collect();

    let scored = ScoredTable {
        columns: table.columns().to_vec(),
        rows,
    };
    let batch = ThreatBatch::from_scored(table.id_field(), &scored);

    info!(
        records = scored.len(),
        features = numeric.len(),
        anomalies = scored.anomaly_count(),
        threats = batch.len(),
        contamination = params.contamination,
        "anomaly detection complete"
    );
    Ok((scored, batch))
}

/// Dense matrix of the numeric columns. Missing and NaN cells are imputed as
/// zero; infinities are rejected.
fn feature_matrix(table: &TelemetryTable, numeric: &[usize]) -> Result<Vec<Vec<f64>>, DetectError> {
    let mut imputed = 0usize;
    let matrix = table
        .rows()
        .iter()
        .enumerate()
        .map(|(row, record)| {
            numeric
                .iter()
                .map(|&col| {
                    let v = record.values[col].as_f64().unwrap_or(f64::NAN);
                    if v.is_nan() {
                        imputed += 1;
                        Ok(0.0)
                    } else if v.is_infinite() {
                        Err(DetectError::DetectionFailed {
                            cause: format!(
                                "non-finite value {} in column '{}' at row {}",
                                v,
                                table.columns()[col].name,
                                row
                            ),
                        })
                    } else {
                        Ok(v)
                    }
                })
                .collect::<Result<Vec<f64>, _>>()
        })
        .collect::<Result<Vec<_>, _>>()?;

    if imputed > 0 {
        debug!(cells = imputed, "imputed missing numeric values as zero");
    }
    Ok(matrix)
}

struct RowView<'a> {
    columns: &'a [Column],
    row: &'a ScoredRecord,
}

impl Serialize for RowView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len() + 2))?;
        for (col, value) in self.columns.iter().zip(&self.row.record.values) {
            map.serialize_entry(&col.name, value)?;
        }
        map.serialize_entry("anomaly_label", &self.row.label)?;
        map.serialize_entry("anomaly_score", &self.row.score)?;
        map.end()
    }
}

fn serialize_rows<S: Serializer>(
    serializer: S,
    columns: &[Column],
    rows: &[ScoredRecord],
) -> Result<S::Ok, S::Error> {
    let mut seq = serializer.serialize_seq(Some(rows.len()))?;
    for row in rows {
        seq.serialize_element(&RowView { columns, row })?;
    }
    seq.end()
}

impl Serialize for ScoredTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serialize_rows(serializer, &self.columns, &self.rows)
    }
}

impl Serialize for ThreatBatch {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serialize_rows(serializer, &self.columns, &self.records)
    }
}

/// Left-aligned text grid, one line per row.
fn write_grid(f: &mut fmt::Formatter<'_>, header: &[String], rows: &[Vec<String>]) -> fmt::Result {
    let widths: Vec<usize> = (0..header.len())
        .map(|i| {
            rows.iter()
                .map(|r| r[i].len())
                .chain(std::iter::once(header[i].len()))
                .max()
                .unwrap_or(0)
        })
        .collect();
    let line = |cells: &[String]| -> String {
        cells
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{:<w$}", c, w = *w))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };
    writeln!(f, "{}", line(header))?;
    for row in rows {
        writeln!(f, "{}", line(row))?;
    }
    Ok(())
}

impl fmt::Display for ScoredTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut header: Vec<String> = self.columns.iter().map(|c| c.name.clone()).collect();
        header.push("anomaly_label".to_string());
        let rows: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|r| {
                r.record
                    .values
                    .iter()
                    .map(Value::to_string)
                    .chain(std::iter::once(r.label.to_string()))
                    .collect()
            })
            .collect();
        write_grid(f, &header, &rows)
    }
}

/// Plain-text evidence: the identifier plus every numeric field per record.
impl fmt::Display for ThreatBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.records.is_empty() {
            return writeln!(f, "(no anomalous records)");
        }
        let numeric: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| {
                c.kind == crate::telemetry::ColumnKind::Numeric && c.name != self.id_field
            })
            .map(|(i, _)| i)
            .collect();

        let mut header = vec![self.id_field.clone()];
        header.extend(numeric.iter().map(|&i| self.columns[i].name.clone()));
        let rows: Vec<Vec<String>> = self
            .records
            .iter()
            .map(|r| {
                let mut cells = vec![r.id.clone()];
                cells.extend(numeric.iter().map(|&i| r.record.values[i].to_string()));
                cells
            })
            .collect();
        write_grid(f, &header, &rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{SyntheticSource, Value};

    fn fleet_with_spikes() -> TelemetryTable {
        let mut t = TelemetryTable::new(
            "device_id",
            vec![
                Column::text("device_id"),
                Column::numeric("failed_logins"),
                Column::numeric("data_transfer_mb"),
            ],
        );
        for i in 0..100 {
            let (logins, mb) = match i {
                10 => (95, 9_000),
                40 => (80, 7_500),
                70 => (99, 8_800),
                90 => (120, 9_900),
                _ => ((i % 5) as i64, 100 + (i % 20) as i64),
            };
            t.push(vec![
                Value::Text(format!("dev-{}", i)),
                Value::Integer(logins),
                Value::Integer(mb),
            ])
            .unwrap();
        }
        t
    }

    #[test]
    fn test_every_record_labelled_once() {
        let table = SyntheticSource::default().generate();
        let (scored, _) = detect(&table, &DetectorParams::default()).unwrap();
        assert_eq!(scored.len(), table.len());
        for (i, row) in scored.rows.iter().enumerate() {
            assert_eq!(row.id, format!("Device_{}", i));
        }
    }

    #[test]
    fn test_no_numeric_features() {
        let mut t = TelemetryTable::new("device_id", vec![Column::text("device_id")]);
        t.push(vec![Value::Text("a".into())]).unwrap();
        let err = detect(&t, &DetectorParams::default()).unwrap_err();
        assert!(matches!(err, DetectError::NoNumericFeatures));
        assert_eq!(err.kind(), ErrorKind::NoNumericFeatures);
    }

    #[test]
    fn test_infinite_value_fails_detection() {
        let mut t = fleet_with_spikes();
        t.push(vec![
            Value::Text("bad".into()),
            Value::Float(f64::INFINITY),
            Value::Integer(1),
        ])
        .unwrap();
        let err = detect(&t, &DetectorParams::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DetectionFailed);
        assert!(err.to_string().contains("failed_logins"));
    }

    #[test]
    fn test_invalid_contamination() {
        let params = DetectorParams {
            contamination: 0.0,
            ..Default::default()
        };
        let err = detect(&fleet_with_spikes(), &params).unwrap_err();
        assert!(matches!(err, DetectError::InvalidContamination(_)));
    }

    #[test]
    fn test_missing_values_imputed_not_dropped() {
        let mut t = fleet_with_spikes();
        t.push(vec![Value::Text("gap".into()), Value::Missing, Value::Float(f64::NAN)])
            .unwrap();
        let (scored, _) = detect(&t, &DetectorParams::default()).unwrap();
        assert_eq!(scored.len(), 101);
        assert_eq!(scored.rows[100].id, "gap");
    }

    #[test]
    fn test_spikes_flagged_and_batch_in_table_order() {
        let (scored, batch) = detect(&fleet_with_spikes(), &DetectorParams::default()).unwrap();
        assert_eq!(scored.anomaly_count(), 4);
        assert_eq!(batch.len(), THREAT_LIMIT);
        let ids: Vec<&str> = batch.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["dev-10", "dev-40", "dev-70"]);
    }

    #[test]
    fn test_batch_is_shorter_when_few_anomalies() {
        let table = SyntheticSource::default().generate();
        let (scored, batch) = detect(&table, &DetectorParams::default()).unwrap();
        assert_eq!(batch.len(), scored.anomaly_count().min(THREAT_LIMIT));
        assert!(batch.records.iter().all(ScoredRecord::is_anomalous));

        let positions: Vec<usize> = batch
            .records
            .iter()
            .map(|b| scored.rows.iter().position(|r| r.id == b.id).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_anomaly_count_tracks_contamination() {
        let table = SyntheticSource::new(200, 3).generate();
        let count = |c: f64| {
            let params = DetectorParams {
                contamination: c,
                ..Default::default()
            };
            detect(&table, &params).unwrap().0.anomaly_count()
        };
        let low = count(0.02);
        let mid = count(0.1);
        let high = count(0.3);
        assert!(low <= mid && mid <= high);
        assert!((1..=6).contains(&low), "low = {}", low);
        assert!((50..=65).contains(&high), "high = {}", high);
    }

    #[test]
    fn test_repeat_detection_is_identical() {
        let table = SyntheticSource::default().generate();
        let params = DetectorParams::default();
        let (a, _) = detect(&table, &params).unwrap();
        let (b, _) = detect(&table, &params).unwrap();
        let labels = |t: &ScoredTable| t.rows.iter().map(|r| r.label).collect::<Vec<_>>();
        assert_eq!(labels(&a), labels(&b));
    }

    #[test]
    fn test_empty_table() {
        let t = TelemetryTable::new("device_id", vec![Column::numeric("x")]);
        let (scored, batch) = detect(&t, &DetectorParams::default()).unwrap();
        assert!(scored.is_empty());
        assert!(batch.is_empty());
    }

    #[test]
    fn test_batch_rendering_lists_id_and_numeric_fields() {
        let (_, batch) = detect(&fleet_with_spikes(), &DetectorParams::default()).unwrap();
        let text = batch.to_string();
        let mut lines = text.lines();
        let header = lines.next().unwrap();
        assert!(header.starts_with("device_id"));
        assert!(header.contains("failed_logins"));
        assert!(header.contains("data_transfer_mb"));
        assert!(lines.next().unwrap().starts_with("dev-10"));
        assert!(text.contains("9000"));
    }

    #[test]
    fn test_numeric_id_column_listed_once() {
        let mut t =
            TelemetryTable::new("asset", vec![Column::numeric("asset"), Column::numeric("x")]);
        for i in 0..50i64 {
            let x = if i == 25 { 10_000 } else { 10 + i % 5 };
            t.push(vec![Value::Integer(1000 + i), Value::Integer(x)]).unwrap();
        }
        let (_, batch) = detect(&t, &DetectorParams::default()).unwrap();
        assert!(batch.records.iter().any(|r| r.id == "1025"));

        let text = batch.to_string();
        let header: Vec<&str> = text.lines().next().unwrap().split_whitespace().collect();
        assert_eq!(header, vec!["asset", "x"]);
    }

    #[test]
    fn test_extreme_magnitudes_do_not_panic() {
        let mut t = TelemetryTable::new(
            "device_id",
            vec![Column::text("device_id"), Column::numeric("x")],
        );
        for (i, x) in [-1.7e308, 1.7e308, 0.0, 1.0, 2.0].into_iter().enumerate() {
            t.push(vec![Value::Text(format!("d{}", i)), Value::Float(x)]).unwrap();
        }
        let (scored, _) = detect(&t, &DetectorParams::default()).unwrap();
        assert_eq!(scored.len(), 5);
        assert!(scored.rows.iter().all(|r| r.score.is_finite()));
    }

    #[test]
    fn test_rows_serialize_as_field_maps() {
        let (scored, _) = detect(&fleet_with_spikes(), &DetectorParams::default()).unwrap();
        let json = serde_json::to_value(scored.head(1)).unwrap();
        assert_eq!(json[0]["device_id"], "dev-0");
        assert_eq!(json[0]["failed_logins"], 0);
        assert_eq!(json[0]["anomaly_label"], "NORMAL");
    }
}
