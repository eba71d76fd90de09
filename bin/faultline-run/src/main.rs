//! ---
//! fl_section: "01-core-functionality"
//! fl_subsection: "binary"
//! fl_type: "source"
//! fl_scope: "code"
//! fl_description: "Binary entrypoint running one fault-injection scenario."
//! fl_version: "v0.1.0"
//! fl_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use faultline_common::config::AppConfig;
use faultline_common::logging::init_tracing;
use faultline_metrics::{new_registry, write_text_file};
use faultline_resilience::ReactiveMetrics;
use faultline_sim::ScenarioRunner;
use faultline_sla::SlaContract;
use tracing::{info, warn};

mod report;

const DEFAULT_CONFIG: &str = "configs/faultline.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Run a fault-injection scenario under the reactive SLA controller",
    long_about = None
)]
struct Cli {
    /// Path to the run configuration (TOML)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// SLA contract document overriding `[sla].contract`
    #[arg(long, value_name = "FILE")]
    contract: Option<PathBuf>,

    /// Failure injector seed overriding `[injector].seed`
    #[arg(long)]
    seed: Option<u64>,

    /// Report format written to stdout
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Write the Prometheus registry in text format to this file
    #[arg(long, value_name = "FILE")]
    metrics_out: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let (mut config, source) = load_config(&cli)?;
    if let Some(seed) = cli.seed {
        config.injector.seed = seed;
    }
    if let Some(contract) = &cli.contract {
        config.sla.contract = contract.clone();
    }
    if let Some(path) = &cli.metrics_out {
        config.metrics.export_path = Some(path.clone());
    }
    config.validate()?;
    init_tracing("faultline-run", &config.logging)?;
    match &source {
        Some(path) => info!(
            config_path = %path.display(),
            seed = config.injector.seed,
            "configuration loaded"
        ),
        None => warn!(
            seed = config.injector.seed,
            "no configuration file found; using built-in scenario defaults"
        ),
    }

    let contract = SlaContract::from_path(&config.sla.contract).with_context(|| {
        format!(
            "failed to load SLA contract {}",
            config.sla.contract.display()
        )
    })?;
    info!(
        contract = %config.sla.contract.display(),
        thresholds = ?contract.thresholds(),
        "sla contract loaded"
    );

    let registry = new_registry();
    let metrics = ReactiveMetrics::new(registry.clone())?;
    let export_path = config.metrics.export_path.clone();
    let runner = ScenarioRunner::new(config, contract).with_metrics(metrics);
    let summary = runner.run()?;

    let rendered = match cli.format {
        OutputFormat::Text => report::render_text(&summary)?,
        OutputFormat::Json => report::render_json(&summary)?,
    };
    println!("{rendered}");

    if let Some(path) = export_path {
        write_text_file(&registry, &path)?;
    }
    Ok(())
}

/// An explicit `--config` must exist; otherwise the default file or the
/// `FAULTLINE_CONFIG` override is used when present.
fn load_config(cli: &Cli) -> Result<(AppConfig, Option<PathBuf>)> {
    let candidates: Vec<PathBuf> = match &cli.config {
        Some(path) => vec![path.clone()],
        None => {
            let env_set = std::env::var_os(AppConfig::ENV_CONFIG_PATH).is_some();
            if !env_set && !Path::new(DEFAULT_CONFIG).exists() {
                return Ok((AppConfig::default(), None));
            }
            vec![PathBuf::from(DEFAULT_CONFIG)]
        }
    };
    let loaded = AppConfig::load_with_source(&candidates)?;
    Ok((loaded.config, Some(loaded.source)))
}
