use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use siemsentry::config::{LoggingConfig, SiemConfig};
use siemsentry::explain::{HttpCompletionClient, RiskExplainer, Secret};
use siemsentry::scan::Scanner;
use siemsentry::telemetry::{self, SyntheticSource};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "siemsentry",
    about = "Agentic SIEM for medical device telemetry: isolation-forest detection with AI risk summaries",
    version,
    long_about = None
)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one security scan and print the results
    Scan {
        /// CSV export (or directory containing one); synthetic data if unset
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Expected fraction of anomalous records
        #[arg(long)]
        contamination: Option<f64>,

        /// Detector random seed
        #[arg(long)]
        seed: Option<u64>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Start the JSON API (health + on-demand scans)
    Serve {
        /// Bind address
        #[arg(long)]
        bind: Option<String>,
    },

    /// Print a synthetic telemetry table as CSV
    Synth {
        /// Number of devices
        #[arg(long, default_value = "50")]
        rows: usize,

        /// Generator seed
        #[arg(long, default_value = "42")]
        seed: u64,
    },
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn build_scanner(config: &SiemConfig) -> Result<Scanner> {
    let client = HttpCompletionClient::new(
        config.agent.base_url.clone(),
        config.agent.settings().timeout,
    )
    .context("failed to build completion client")?;
    let explainer = RiskExplainer::new(Arc::new(client), config.agent.settings());
    let credential = Secret::from_env(&config.agent.token_env);
    if credential.is_none() {
        tracing::warn!(var = %config.agent.token_env, "no completion token set, AI agent will be offline");
    }
    Ok(Scanner::from_config(config, explainer, credential))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = SiemConfig::resolve(cli.config.as_deref())?;
    init_tracing(&config.logging);

    match cli.command {
        Commands::Scan {
            csv,
            contamination,
            seed,
            json,
        } => {
            if let Some(csv) = csv {
                config.telemetry.csv_path = Some(csv);
            }
            if let Some(c) = contamination {
                config.detector.contamination = c;
            }
            if let Some(s) = seed {
                config.detector.seed = s;
            }
            tracing::info!(
                csv = ?config.telemetry.csv_path,
                contamination = config.detector.contamination,
                "Running security scan"
            );

            let report = build_scanner(&config)?.run().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("\n{}", report);
            }
        }
        Commands::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.api.bind.clone());
            tracing::info!(%bind, "Starting SIEMSentry API");
            siemsentry::serve(&bind, build_scanner(&config)?).await?;
        }
        Commands::Synth { rows, seed } => {
            let table = SyntheticSource::new(rows, seed).generate();
            telemetry::file::write_csv(&table, std::io::stdout().lock())?;
        }
    }

    Ok(())
}
