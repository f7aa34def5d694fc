//! TOML configuration for the scanner.
//!
//! Every field has a compiled-in default, so an empty or partial file is
//! valid. The completion-service token is NOT stored here; only the name of
//! the environment variable that holds it.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::detect::DetectorParams;
use crate::explain::AgentSettings;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "SIEMSENTRY_CONFIG";
/// Config file looked up in the working directory.
pub const LOCAL_CONFIG: &str = "siemsentry.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiemConfig {
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub detector: DetectorParams,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

impl SiemConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Resolve configuration, in order:
    /// 1. `explicit` (the `--config` flag), which must load.
    /// 2. The path in `SIEMSENTRY_CONFIG`.
    /// 3. `./siemsentry.toml`.
    /// 4. Compiled-in defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "SIEMSENTRY_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let local = Path::new(LOCAL_CONFIG);
        if local.exists() {
            match Self::load(local) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %local.display(),
                        error = %e,
                        "local config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }
}

// ---------------------------------------------------------------------------
// Telemetry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// CSV export, or a directory holding one. Unset means synthetic data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub csv_path: Option<PathBuf>,
    /// Column holding the device identifier.
    pub id_field: String,
    pub synthetic_rows: usize,
    pub synthetic_seed: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            csv_path: None,
            id_field: "device_id".to_string(),
            synthetic_rows: 50,
            synthetic_seed: 42,
        }
    }
}

// ---------------------------------------------------------------------------
// Agent (completion service)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Base URL of an OpenAI-compatible chat-completions API.
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    /// Environment variable holding the API token.
    pub token_env: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        let settings = AgentSettings::default();
        Self {
            base_url: "https://router.huggingface.co/v1".to_string(),
            model: settings.model,
            max_tokens: settings.max_tokens,
            timeout_secs: settings.timeout.as_secs(),
            token_env: "HF_TOKEN".to_string(),
        }
    }
}

impl AgentConfig {
    pub fn settings(&self) -> AgentSettings {
        AgentSettings {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            timeout: std::time::Duration::from_secs(self.timeout_secs.max(1)),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging / API
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = SiemConfig::default();
        assert!(cfg.telemetry.csv_path.is_none());
        assert_eq!(cfg.telemetry.id_field, "device_id");
        assert_eq!(cfg.telemetry.synthetic_rows, 50);
        assert_eq!(cfg.detector.contamination, 0.04);
        assert_eq!(cfg.detector.seed, 42);
        assert_eq!(cfg.agent.max_tokens, 200);
        assert_eq!(cfg.agent.token_env, "HF_TOKEN");
        assert_eq!(cfg.logging.level, "info");
        assert!(!cfg.logging.json);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
[telemetry]
csv_path = "/data/iot"
id_field = "asset_tag"

[detector]
contamination = 0.1
seed = 7
n_trees = 50

[agent]
base_url = "http://localhost:11434/v1"
model = "llama3"
max_tokens = 120
timeout_secs = 5
token_env = "SIEM_TOKEN"

[logging]
level = "debug"
json = true

[api]
bind = "0.0.0.0:9000"
"#;
        let cfg: SiemConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.telemetry.csv_path, Some(PathBuf::from("/data/iot")));
        assert_eq!(cfg.telemetry.id_field, "asset_tag");
        assert_eq!(cfg.detector.contamination, 0.1);
        assert_eq!(cfg.detector.n_trees, 50);
        assert_eq!(cfg.detector.max_samples, 256);
        assert_eq!(cfg.agent.model, "llama3");
        assert_eq!(cfg.agent.token_env, "SIEM_TOKEN");
        assert!(cfg.logging.json);
        assert_eq!(cfg.api.bind, "0.0.0.0:9000");

        let settings = cfg.agent.settings();
        assert_eq!(settings.max_tokens, 120);
        assert_eq!(settings.timeout, std::time::Duration::from_secs(5));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let cfg: SiemConfig = toml::from_str("[detector]\ncontamination = 0.2\n").unwrap();
        assert_eq!(cfg.detector.contamination, 0.2);
        assert_eq!(cfg.detector.seed, 42);
        assert_eq!(cfg.agent.base_url, AgentConfig::default().base_url);
    }

    #[test]
    fn test_explicit_path_must_load() {
        assert!(SiemConfig::resolve(Some(Path::new("/nonexistent/siemsentry.toml"))).is_err());

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("siemsentry.toml");
        std::fs::write(&path, "[api]\nbind = \"0.0.0.0:9999\"\n").unwrap();
        let cfg = SiemConfig::resolve(Some(&path)).unwrap();
        assert_eq!(cfg.api.bind, "0.0.0.0:9999");
    }

    #[test]
    fn test_serialization_roundtrip() {
        let cfg = SiemConfig::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let back: SiemConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(back.agent.model, cfg.agent.model);
        assert_eq!(back.detector.n_trees, cfg.detector.n_trees);
    }
}
