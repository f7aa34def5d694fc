//! One security scan: acquire telemetry, detect anomalies, explain the threats.
//!
//! Stages run strictly in sequence. Detection errors abort the scan; the
//! explainer always yields a displayable summary.

use crate::config::SiemConfig;
use crate::detect::{self, DetectError, DetectorParams, ScoredTable, ThreatBatch};
use crate::explain::{RiskExplainer, RiskSummary, Secret};
use crate::telemetry::{self, CsvSource, SyntheticSource, TableOrigin, TelemetrySource};
use crate::ErrorKind;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

/// Rows of the scored table included for raw display.
pub const PREVIEW_ROWS: usize = 10;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    Detect(#[from] DetectError),

    #[error("detection task panicked or was cancelled: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ScanError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScanError::Detect(e) => e.kind(),
            ScanError::Task(_) => ErrorKind::DetectionFailed,
        }
    }
}

/// Everything the presentation layer shows for one scan.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub scan_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub origin: TableOrigin,
    pub total_records: usize,
    pub anomaly_count: usize,
    /// First [`PREVIEW_ROWS`] scored rows.
    pub preview: ScoredTable,
    pub threats: ThreatBatch,
    pub summary: RiskSummary,
    pub summary_text: String,
}

#[derive(Clone)]
pub struct Scanner {
    source: Option<Arc<dyn TelemetrySource>>,
    fallback: SyntheticSource,
    params: DetectorParams,
    explainer: RiskExplainer,
    credential: Option<Secret>,
}

impl Scanner {
    /// A scanner on synthetic data with default detector parameters and no credential.
    pub fn new(explainer: RiskExplainer) -> Self {
        Self {
            source: None,
            fallback: SyntheticSource::default(),
            params: DetectorParams::default(),
            explainer,
            credential: None,
        }
    }

    pub fn from_config(
        config: &SiemConfig,
        explainer: RiskExplainer,
        credential: Option<Secret>,
    ) -> Self {
        let source = config.telemetry.csv_path.as_ref().map(|path| {
            Arc::new(CsvSource::new(path, &config.telemetry.id_field)) as Arc<dyn TelemetrySource>
        });
        Self {
            source,
            fallback: SyntheticSource::new(
                config.telemetry.synthetic_rows,
                config.telemetry.synthetic_seed,
            ),
            params: config.detector.clone(),
            explainer,
            credential,
        }
    }

    pub fn with_source(mut self, source: Arc<dyn TelemetrySource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_fallback(mut self, fallback: SyntheticSource) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_params(mut self, params: DetectorParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_credential(mut self, credential: Option<Secret>) -> Self {
        self.credential = credential;
        self
    }

    pub fn params(&self) -> &DetectorParams {
        &self.params
    }

    pub async fn run(&self) -> Result<ScanReport, ScanError> {
        let scan_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%scan_id, "scan started");

        // File reads and forest fitting are blocking work.
        let source = self.source.clone();
        let fallback = self.fallback.clone();
        let params = self.params.clone();
        let (acquisition, detected) = tokio::task::spawn_blocking(move || {
            let acquisition = telemetry::acquire_or_synthetic(source.as_deref(), &fallback);
            let detected = detect::detect(&acquisition.table, &params);
            (acquisition, detected)
        })
        .await?;
        let (scored, threats) = detected?;

        let summary = self
            .explainer
            .explain(&threats, self.credential.as_ref())
            .await;

        let report = ScanReport {
            scan_id,
            started_at,
            finished_at: Utc::now(),
            origin: acquisition.origin,
            total_records: scored.len(),
            anomaly_count: scored.anomaly_count(),
            preview: scored.head(PREVIEW_ROWS),
            threats,
            summary_text: summary.text().into_owned(),
            summary,
        };
        info!(
            %scan_id,
            records = report.total_records,
            anomalies = report.anomaly_count,
            summary = ?report.summary.error_kind(),
            "scan complete"
        );
        Ok(report)
    }
}

impl fmt::Display for ScanReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let origin = match &self.origin {
            TableOrigin::Source { name } => name.clone(),
            TableOrigin::Synthetic { reason } => format!("synthetic ({})", reason),
        };
        writeln!(f, "=== Security Scan {} ===", self.scan_id)?;
        writeln!(f, "Telemetry: {}", origin)?;
        writeln!(
            f,
            "Records:   {} scanned, {} flagged anomalous",
            self.total_records, self.anomaly_count
        )?;
        writeln!(f, "\n--- AI Agent Security Analysis ---")?;
        writeln!(f, "{}", self.summary_text)?;
        writeln!(f, "\n--- Detected Threat Samples ---")?;
        write!(f, "{}", self.threats)?;
        writeln!(f, "\n--- Raw Telemetry (first {}) ---", PREVIEW_ROWS)?;
        write!(f, "{}", self.preview)
    }
}
