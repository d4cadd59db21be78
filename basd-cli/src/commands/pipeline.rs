use crate::commands::{drain_events, print_failures};
use crate::output;

use std::path::PathBuf;

use basd_service::{progress_channel, Batch, ExecutorConfig, PipelineRunner, ServiceError};
use clap::Args;
use color_eyre::Result;

/// Run every stage of a batch in this process
#[derive(Args, Debug)]
pub struct PipelineArgs {
    /// Path to the run configuration YAML
    #[arg(long, short = 'c', value_name = "FILE")]
    pub config: PathBuf,

    /// Path to the task manifest CSV
    #[arg(long, short = 'm', value_name = "FILE")]
    pub manifest: PathBuf,

    /// Run later stages even when an earlier stage had failures
    #[arg(long)]
    pub continue_on_error: bool,

    /// Write a JSON run report to this file
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,

    /// Maximum tasks running at once (0 = unlimited)
    #[arg(long, short = 'j', default_value_t = 0)]
    pub jobs: usize,
}

pub async fn execute(args: PipelineArgs) -> Result<()> {
    let batch = Batch::load(&args.config, &args.manifest)?;
    for problem in batch.missing_locations() {
        output::warning(&problem);
    }

    let (tx, rx) = progress_channel();
    let executor = batch
        .executor(ExecutorConfig {
            continue_on_error: args.continue_on_error,
            max_parallel_tasks: args.jobs,
        })
        .with_progress(tx);

    let Batch {
        name,
        graph,
        manifest,
        ..
    } = batch;
    let runner = PipelineRunner::new(name, graph, executor);
    let handle = tokio::spawn(async move { runner.run(&manifest).await });

    let report = drain_events(rx, handle).await??;

    eprintln!();
    for stage in &report.stages {
        print_failures(stage);
    }
    for skipped in &report.skipped_stages {
        output::warning(&format!("{} not run: {}", skipped.stage, skipped.reason));
    }

    if let Some(path) = &args.report {
        report.save(path).map_err(|source| ServiceError::Report {
            path: path.clone(),
            source,
        })?;
        output::status("Report", &format!("{}", path.display()));
    }

    let code = report.exit_code();
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
