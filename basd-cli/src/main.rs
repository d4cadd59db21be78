mod commands;
mod output;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use tracing_subscriber::EnvFilter;

/// Bias adjustment and statistical downscaling batches
#[derive(Parser, Debug)]
#[command(name = "basd", version, about, long_about = None)]
struct Cli {
    /// More log output (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Expand a run request table into a task manifest
    Expand(commands::expand::ExpandArgs),

    /// Run one stage for every task, or for one scheduler array element
    Run(commands::run::RunArgs),

    /// Run every stage of a batch in dependency order in this process
    Pipeline(commands::pipeline::PipelineArgs),

    /// Render Slurm job scripts for a batch and optionally submit them
    Schedule(commands::schedule::ScheduleArgs),

    /// Check a configuration and manifest without running anything
    Validate(commands::validate::ValidateArgs),
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(cli.verbose);
    tracing::debug!(command = ?cli.command, "Starting");

    match cli.command {
        Command::Expand(args) => commands::expand::execute(args),
        Command::Run(args) => commands::run::execute(args).await,
        Command::Pipeline(args) => commands::pipeline::execute(args).await,
        Command::Schedule(args) => commands::schedule::execute(args).await,
        Command::Validate(args) => commands::validate::execute(args),
    }
}
