use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mb_data::Warehouse;
use mb_trainer::ModelBuilderTask;
use mb_types::{RunConfiguration, RunContext};

/// Train a classifier with a hyperparameter search and track the results.
#[derive(Parser, Debug)]
#[command(name = "model-builder", version, about, long_about = None)]
struct Cli {
    /// Job configuration (JSON, or YAML with a .yml/.yaml extension)
    #[arg(long)]
    conf_file: PathBuf,

    /// Root directory holding `<database>/<table>` data
    #[arg(long, default_value = "warehouse")]
    warehouse: PathBuf,

    /// Local tracking store, used when no API URL is set
    #[arg(long)]
    tracking_dir: Option<PathBuf>,

    /// Log filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn default_tracking_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("model-builder"))
        .unwrap_or_else(|| PathBuf::from(".model-builder"))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = RunConfiguration::from_path(&cli.conf_file)
        .with_context(|| format!("loading {}", cli.conf_file.display()))?;
    let context = RunContext::from_env();
    info!("Run context: {:?}", context);

    let tracking_dir = cli.tracking_dir.unwrap_or_else(default_tracking_dir);
    let tracker = mb_tracking::connect(&context, &tracking_dir)?;
    let warehouse = Arc::new(Warehouse::new(&cli.warehouse));

    let task = ModelBuilderTask::new(config, context, warehouse, tracker);
    let summary = task.launch()?;

    println!("{}", serde_json::to_string_pretty(&summary.best_params)?);
    Ok(())
}
