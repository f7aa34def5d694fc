//! Plain-language risk summaries for flagged telemetry.
//!
//! [`RiskExplainer::explain`] never fails. A missing credential yields
//! [`RiskSummary::Offline`] without touching the network; any failure of the
//! single completion attempt yields [`RiskSummary::Unavailable`] carrying the
//! technical detail. There are no retries and nothing is cached between scans.

pub mod client;
pub mod prompt;
pub mod secret;

pub use client::{
    ChatMessage, CompletionClient, CompletionRequest, CompletionResponse, HttpCompletionClient,
};
pub use secret::Secret;

use crate::detect::ThreatBatch;
use crate::ErrorKind;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Shown in place of an analysis when no API token is configured.
pub const AGENT_OFFLINE: &str =
    "⚠️ AGENT OFFLINE: Please add 'HF_TOKEN' to Space Secrets to enable AI reasoning.";

#[derive(Debug, Error)]
pub enum ExplainError {
    #[error("request to completion service failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("completion service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed completion response: {0}")]
    Malformed(String),

    #[error("completion response contained no text")]
    NoCompletion,

    #[error("completion service did not answer within {0:?}")]
    Timeout(Duration),

    #[error("failed to render prompt: {0}")]
    Prompt(#[from] askama::Error),
}

/// Outcome of one explanation attempt, always displayable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RiskSummary {
    /// Verbatim text of the first completion choice.
    Analysis { text: String },
    /// No credential was available; the service was not contacted.
    Offline,
    /// The service could not produce a summary.
    Unavailable { detail: String },
}

impl RiskSummary {
    pub fn text(&self) -> Cow<'_, str> {
        match self {
            RiskSummary::Analysis { text } => Cow::Borrowed(text.as_str()),
            RiskSummary::Offline => Cow::Borrowed(AGENT_OFFLINE),
            RiskSummary::Unavailable { detail } => Cow::Owned(format!(
                "AI Agent was unable to process the logs. Technical Error: {}",
                detail
            )),
        }
    }

    /// The soft failure this summary stands in for, if any.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            RiskSummary::Analysis { .. } => None,
            RiskSummary::Offline => Some(ErrorKind::CredentialMissing),
            RiskSummary::Unavailable { .. } => Some(ErrorKind::ExplanationUnavailable),
        }
    }
}

impl fmt::Display for RiskSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text())
    }
}

#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub model: String,
    /// Cap on generated tokens.
    pub max_tokens: u32,
    /// Upper bound on the whole completion call.
    pub timeout: Duration,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            model: "meta-llama/Meta-Llama-3-8B-Instruct".to_string(),
            max_tokens: 200,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Clone)]
pub struct RiskExplainer {
    client: Arc<dyn CompletionClient>,
    settings: AgentSettings,
}

impl RiskExplainer {
    pub fn new(client: Arc<dyn CompletionClient>, settings: AgentSettings) -> Self {
        Self { client, settings }
    }

    /// Build the single completion request for `batch`.
    pub fn build_request(&self, batch: &ThreatBatch) -> Result<CompletionRequest, ExplainError> {
        Ok(CompletionRequest {
            model: self.settings.model.clone(),
            messages: vec![ChatMessage::user(prompt::render(batch)?)],
            max_tokens: self.settings.max_tokens,
        })
    }

    pub async fn explain(&self, batch: &ThreatBatch, credential: Option<&Secret>) -> RiskSummary {
        let Some(credential) = credential.filter(|c| !c.is_empty()) else {
            info!("no completion credential configured, agent offline");
            return RiskSummary::Offline;
        };

        match self.request_summary(batch, credential).await {
            Ok(text) => {
                info!(threats = batch.len(), chars = text.len(), "risk summary generated");
                RiskSummary::Analysis { text }
            }
            Err(e) => {
                warn!(error = %e, "risk explanation unavailable");
                RiskSummary::Unavailable {
                    detail: e.to_string(),
                }
            }
        }
    }

    async fn request_summary(
        &self,
        batch: &ThreatBatch,
        credential: &Secret,
    ) -> Result<String, ExplainError> {
        let request = self.build_request(batch)?;
        let response = tokio::time::timeout(
            self.settings.timeout,
            self.client.complete(&request, credential),
        )
        .await
        .map_err(|_| ExplainError::Timeout(self.settings.timeout))??;

        response.first_text().ok_or(ExplainError::NoCompletion)
    }
}
