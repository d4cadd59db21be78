use crate::output;

use std::path::PathBuf;

use basd_service::scheduler::{self, can_submit};
use basd_service::{Batch, SlurmRenderer};
use clap::Args;
use color_eyre::Result;

/// Render Slurm job scripts for a batch
#[derive(Args, Debug)]
pub struct ScheduleArgs {
    /// Path to the run configuration YAML
    #[arg(long, short = 'c', value_name = "FILE")]
    pub config: PathBuf,

    /// Path to the task manifest CSV
    #[arg(long, short = 'm', value_name = "FILE")]
    pub manifest: PathBuf,

    /// Directory the job scripts are written to
    #[arg(long, short = 'o', value_name = "DIR", default_value = "jobs")]
    pub out: PathBuf,

    /// Submit the batch with sbatch after rendering
    #[arg(long)]
    pub submit: bool,
}

pub async fn execute(args: ScheduleArgs) -> Result<()> {
    let batch = Batch::load(&args.config, &args.manifest)?;
    let renderer = SlurmRenderer::new(batch.config.scheduler.clone());

    output::status(
        "Rendering",
        &format!("{} ({} array elements per stage)", batch.name, batch.manifest.len()),
    );
    let rendered = batch.render(&renderer)?;
    let submit_script = rendered.write_to(&args.out)?;

    for (stage, script) in &rendered.stages {
        output::check(&format!("{} -> {}", stage, script.file_name));
    }
    output::status("Wrote", &format!("{}", submit_script.display()));

    if !args.submit {
        output::info(&format!("Submit with: bash {}", submit_script.display()));
        return Ok(());
    }

    if !can_submit(&renderer) {
        output::warning(&format!(
            "sbatch not found on PATH; submit {} on the cluster",
            submit_script.display()
        ));
        std::process::exit(1);
    }

    let submitted = scheduler::submit(&renderer, &submit_script).await?;
    for line in submitted.stdout.lines() {
        output::info(line);
    }
    output::verdict(true, "Batch submitted");
    Ok(())
}
