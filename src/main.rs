use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

mod cmd;

#[derive(Parser)]
#[command(name = "collector-setup")]
#[command(version, about = "Guided setup of Postgres and the pganalyze collector")]
pub struct Cli {
    /// Collector config file to create or update
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// JSON file answering every setup decision; switches to scripted mode
    #[arg(long, global = true)]
    pub inputs: Option<PathBuf>,

    /// TOML file with installer settings
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also write a debug-level log to this file
    #[arg(long, global = true)]
    pub log: Option<PathBuf>,

    /// Do not set up Log Insights (implies --skip-automated-explain)
    #[arg(long, global = true)]
    pub skip_log_insights: bool,

    /// Do not set up Automated EXPLAIN
    #[arg(long, global = true)]
    pub skip_automated_explain: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the setup (the default)
    Run,
    /// List every setup step in run order
    Steps,
    /// Print an inputs file that accepts every recommended choice
    InputsTemplate,
}

fn init_tracing(cli: &Cli) -> Result<Option<WorkerGuard>> {
    let default_level = if cli.verbose { "debug" } else { "warn" };
    let stderr_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let (file_layer, guard) = match &cli.log {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("could not open log file {} for writes", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(LevelFilter::DEBUG);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(stderr_filter),
        )
        .with(file_layer)
        .init();
    Ok(guard)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_tracing(&cli)?;

    match cli.command.as_ref().unwrap_or(&Commands::Run) {
        Commands::Run => cmd::cmd_run(&cli),
        Commands::Steps => cmd::cmd_steps(),
        Commands::InputsTemplate => cmd::cmd_inputs_template(),
    }
}
