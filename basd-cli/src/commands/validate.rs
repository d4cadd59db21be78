use crate::output;

use std::path::PathBuf;

use basd_service::Batch;
use clap::Args;
use color_eyre::Result;

/// Check a configuration and manifest
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Path to the run configuration YAML
    #[arg(long, short = 'c', value_name = "FILE")]
    pub config: PathBuf,

    /// Path to the task manifest CSV
    #[arg(long, short = 'm', value_name = "FILE")]
    pub manifest: PathBuf,
}

pub fn execute(args: ValidateArgs) -> Result<()> {
    output::status("Validating", &format!("{}", args.config.display()));

    let batch = match Batch::load(&args.config, &args.manifest) {
        Ok(batch) => batch,
        Err(e) => {
            output::error(&e.to_string());
            std::process::exit(1);
        }
    };

    output::check("Configuration valid");
    output::check(&format!("Manifest: {} tasks", batch.manifest.len()));
    let order: Vec<&str> = batch
        .graph
        .topological_order()
        .iter()
        .map(|node| node.stage.name())
        .collect();
    output::check(&format!("Stages: {}", order.join(" -> ")));

    let services = batch.services();
    let mut problems = batch.missing_locations();
    if services.adjuster.is_none() {
        problems.push("No adjustment backend available; adjust-downscale tasks will fail".to_string());
    }
    if batch.manifest.uses_stitched() && services.stitcher.is_none() {
        problems.push("No stitching generator available; stitch tasks will fail".to_string());
    }

    if problems.is_empty() {
        output::check("All inputs and adapters available");
        return Ok(());
    }
    for problem in &problems {
        output::warning(problem);
    }
    output::verdict(false, &format!("{} problem(s) found", problems.len()));
    std::process::exit(1);
}
