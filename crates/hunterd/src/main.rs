use clap::Parser;
use std::path::PathBuf;

mod config;
mod coordinator;
mod logging;

/// Distributed credential-breach hunter: collects scrap files from
/// plugin sources, classifies them against a pattern library, and
/// indexes matching content for search.
#[derive(Debug, Parser)]
#[command(about, version)]
struct Cli {
    /// Path of the YAML configuration file.
    #[arg(long, env = "CONFIG_FILE", default_value = "config.yaml")]
    config: PathBuf,

    /// Directory holding the schema migration files.
    #[arg(long = "migrations", env = "MIGRATIONS_DIR", default_value = "migrations")]
    migrations_dir: PathBuf,

    /// Override the config's `collecting` flag.
    #[arg(long)]
    collecting: Option<bool>,

    /// Override the config's `processing` flag.
    #[arg(long)]
    processing: Option<bool>,

    #[command(flatten)]
    log_args: logging::LogArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_logging(&cli.log_args);

    let mut config = config::Config::load(&cli.config)?;
    if let Some(collecting) = cli.collecting {
        config.collecting = collecting;
    }
    if let Some(processing) = cli.processing {
        config.processing = processing;
    }

    tracing::info!(
        collecting = config.collecting,
        processing = config.processing,
        "starting hunterd"
    );
    coordinator::run(config, &cli.migrations_dir).await
}
