use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::prelude::*;

use cellwatch::config::{CellwatchConfig, LoggingConfig};
use cellwatch::features::FEATURE_COUNT;
use cellwatch::scoring::iforest::{ForestParams, IsolationForest};
use cellwatch::scoring::ScoringEngine;

#[derive(Parser)]
#[command(
    name = "cellwatch",
    about = "Edge anomaly detection for cell sensor nodes",
    version,
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (ingest API + scoring pipeline)
    Serve {
        /// Config file (default: $CELLWATCH_CONFIG, then /etc/cellwatch/cellwatch.toml)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Bind address, overrides server.bind
        #[arg(long)]
        bind: Option<String>,
    },

    /// Show which scoring backends load with the current configuration
    ModelInfo {
        #[arg(long)]
        config: Option<PathBuf>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Fit the isolation-forest fallback from a JSON array of feature vectors
    FitFallback {
        /// Input file: `[[f64; 10], ...]`
        #[arg(long)]
        input: PathBuf,

        /// Where to write the fitted forest
        #[arg(long)]
        output: PathBuf,

        /// Number of trees
        #[arg(long, default_value = "100")]
        trees: usize,

        /// Subsample size per tree
        #[arg(long, default_value = "256")]
        max_samples: usize,

        /// Expected outlier fraction, or "auto"
        #[arg(long, default_value = "0.01")]
        contamination: String,

        /// RNG seed
        #[arg(long, default_value = "42")]
        seed: u64,
    },

    /// Load and validate the configuration, then print it
    CheckConfig {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn init_tracing(logging: &LoggingConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    if logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, bind } => {
            let mut config = CellwatchConfig::resolve(config.as_deref())?;
            init_tracing(&config.logging);
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            tracing::info!(bind = %config.server.bind, "Starting cellwatch daemon");
            cellwatch::serve(config).await?;
        }
        Commands::ModelInfo { config, json } => {
            let config = CellwatchConfig::resolve(config.as_deref())?;
            init_tracing(&config.logging);
            let engine = ScoringEngine::from_config(&config.ml);

            if json {
                let report = serde_json::json!({
                    "model_version": engine.active_version(),
                    "primary": engine.primary_version(),
                    "fallback": engine.fallback_version(),
                    "window": config.ml.window_size,
                    "threshold": config.ml.anomaly_threshold,
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("\ncellwatch model info");
                println!("{:<12} | {}", "Active", engine.active_version());
                println!("{:<12} | {}", "Primary", engine.primary_version().unwrap_or("-"));
                println!("{:<12} | {}", "Fallback", engine.fallback_version().unwrap_or("-"));
                println!("{:<12} | {}", "Window", config.ml.window_size);
                println!("{:<12} | {}", "Threshold", config.ml.anomaly_threshold);
            }
        }
        Commands::FitFallback {
            input,
            output,
            trees,
            max_samples,
            contamination,
            seed,
        } => {
            init_tracing(&LoggingConfig::default());
            let params = ForestParams {
                n_trees: trees,
                max_samples,
                contamination: parse_contamination(&contamination)?,
                seed,
            };
            let data = read_feature_rows(&input)?;
            let forest = IsolationForest::fit(&data, params)?;
            forest.save(&output)?;
            println!(
                "Fitted {} trees on {} rows -> {}",
                forest.tree_count(),
                data.len(),
                output.display()
            );
        }
        Commands::CheckConfig { config } => {
            let config = CellwatchConfig::resolve(config.as_deref())?;
            init_tracing(&config.logging);
            config.validate()?;
            println!("{}", toml::to_string_pretty(&config.redacted())?);
            println!("# configuration OK");
        }
    }

    Ok(())
}

fn parse_contamination(raw: &str) -> Result<Option<f64>> {
    if raw.eq_ignore_ascii_case("auto") {
        return Ok(None);
    }
    let value: f64 = raw
        .parse()
        .with_context(|| format!("invalid contamination: {raw}"))?;
    Ok(Some(value))
}

fn read_feature_rows(path: &Path) -> Result<Vec<[f64; FEATURE_COUNT]>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let rows: Vec<[f64; FEATURE_COUNT]> = serde_json::from_str(&content).with_context(|| {
        format!(
            "{} must be a JSON array of {FEATURE_COUNT}-element rows",
            path.display()
        )
    })?;
    Ok(rows)
}
