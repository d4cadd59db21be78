use crate::output;

use std::path::PathBuf;

use basd_service::expand_request;
use clap::Args;
use color_eyre::Result;

/// Expand a run request table into a task manifest
#[derive(Args, Debug)]
pub struct ExpandArgs {
    /// Path to the run request CSV
    pub request: PathBuf,

    /// Directory the manifest is written to
    #[arg(long, short = 'o', value_name = "DIR", default_value = "intermediate")]
    pub out: PathBuf,
}

pub fn execute(args: ExpandArgs) -> Result<()> {
    if !args.request.exists() {
        color_eyre::eyre::bail!("Run request not found: {}", args.request.display());
    }

    output::status("Expanding", &format!("{}", args.request.display()));
    let expanded = expand_request(&args.request, &args.out)?;

    for invalid in &expanded.invalid {
        output::warning(&format!("Excluded {}: {}", invalid.label, invalid.reason));
    }
    output::check(&format!(
        "{} tasks from {} combinations",
        expanded.manifest.len(),
        expanded.candidates
    ));
    if expanded.manifest.derives_minmax() {
        output::info("tasmin/tasmax requested: tas, tasrange and tasskew are adjusted, then reconstructed");
    }
    if expanded.manifest.uses_stitched() {
        output::info("Stitched batch: base variables are generated before adjustment");
    }
    output::status("Wrote", &format!("{}", expanded.manifest_path.display()));

    Ok(())
}
