use crate::commands::{drain_events, print_failures};
use crate::output;

use std::path::PathBuf;

use basd_service::{progress_channel, Batch, ExecutorConfig, Stage};
use clap::Args;
use color_eyre::Result;

/// Run one stage of a batch
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the run configuration YAML
    #[arg(long, short = 'c', value_name = "FILE")]
    pub config: PathBuf,

    /// Path to the task manifest CSV
    #[arg(long, short = 'm', value_name = "FILE")]
    pub manifest: PathBuf,

    /// Stage to run (stitch, derive-range-skew, adjust-downscale, derive-min-max)
    #[arg(long, short = 's', value_name = "STAGE")]
    pub stage: Stage,

    /// Run only the task at this manifest row (scheduler array index)
    #[arg(long, short = 't', value_name = "INDEX")]
    pub task: Option<usize>,

    /// Maximum tasks running at once (0 = unlimited)
    #[arg(long, short = 'j', default_value_t = 0)]
    pub jobs: usize,
}

pub async fn execute(args: RunArgs) -> Result<()> {
    let batch = Batch::load(&args.config, &args.manifest)?;
    output::status(
        "Loaded",
        &format!("{} ({} tasks)", batch.name, batch.manifest.len()),
    );

    let (tx, rx) = progress_channel();
    let executor = batch
        .executor(ExecutorConfig {
            max_parallel_tasks: args.jobs,
            ..Default::default()
        })
        .with_progress(tx);

    let manifest = batch.manifest;
    let stage = args.stage;
    let task = args.task;
    let handle = tokio::spawn(async move {
        match task {
            Some(index) => executor.run_task(stage, &manifest, index).await,
            None => executor.run_stage(stage, &manifest).await,
        }
    });

    let report = drain_events(rx, handle).await??;
    print_failures(&report);

    let code = report.exit_code();
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
