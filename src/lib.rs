//! SIEMSentry -- agentic security scanning for networked medical devices.
//!
//! A scan ingests device telemetry, flags statistically anomalous records
//! with an isolation forest, and asks a hosted language model to explain the
//! flagged records in plain language for clinical staff.

pub mod api;
pub mod config;
pub mod detect;
pub mod explain;
pub mod scan;
pub mod telemetry;

use anyhow::Result;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// The failure classes a scan can report.
///
/// `NoNumericFeatures` and `DetectionFailed` abort a scan. `CredentialMissing`
/// and `ExplanationUnavailable` only replace the risk summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NoNumericFeatures,
    DetectionFailed,
    CredentialMissing,
    ExplanationUnavailable,
}

impl ErrorKind {
    /// Whether this kind aborts the scan.
    pub fn is_fatal(self) -> bool {
        matches!(self, ErrorKind::NoNumericFeatures | ErrorKind::DetectionFailed)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::NoNumericFeatures => "no_numeric_features",
            ErrorKind::DetectionFailed => "detection_failed",
            ErrorKind::CredentialMissing => "credential_missing",
            ErrorKind::ExplanationUnavailable => "explanation_unavailable",
        };
        f.write_str(s)
    }
}

/// Serve the JSON API: `GET /api/v1/health`, `POST /api/v1/scan`.
pub async fn serve(bind: &str, scanner: scan::Scanner) -> Result<()> {
    let addr: std::net::SocketAddr = bind.parse()?;
    let app = api::router(api::state::AppState {
        scanner: Arc::new(scanner),
    });

    tracing::info!(%addr, "SIEMSentry listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
