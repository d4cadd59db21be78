// Slurm Renderer
// One array job per stage, chained with afterok dependencies

use crate::config::SchedulerConfig;
use crate::execution::stage::Stage;
use crate::scheduler::{
    shell_quote, JobBatch, RenderedBatch, RenderedScript, SchedulerError, SchedulerRenderer,
};

use std::fmt::Write as _;

pub struct SlurmRenderer {
    config: SchedulerConfig,
}

impl SlurmRenderer {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    fn script_name(batch: &JobBatch<'_>, stage: Stage) -> String {
        format!("{}_{}.job", batch.name, stage.name())
    }

    /// Shell variable holding a stage's submitted job id
    fn job_var(stage: Stage) -> String {
        format!("{}_job", stage.name().replace('-', "_"))
    }

    fn array_spec(&self, task_count: usize) -> String {
        format!("0-{}%{}", task_count - 1, self.config.max_concurrent.max(1))
    }

    fn stage_script(&self, batch: &JobBatch<'_>, stage: Stage) -> String {
        let cfg = &self.config;
        let mut s = String::from("#!/bin/bash\n\n# Slurm settings\n");
        let mut directive = |line: String| {
            let _ = writeln!(s, "#SBATCH {}", line);
        };

        if let Some(account) = &cfg.account {
            directive(format!("--account={}", account));
        }
        if let Some(partition) = &cfg.partition {
            directive(format!("--partition={}", partition));
        }
        directive(format!("--job-name={}_{}", batch.name, stage.name()));
        directive(format!("--time={}", cfg.time));
        if let Some(mail_type) = &cfg.mail_type {
            directive(format!("--mail-type={}", mail_type));
        }
        if let Some(mail_user) = &cfg.mail_user {
            directive(format!("--mail-user={}", mail_user));
        }
        directive(format!(
            "--output=\"{}/%x_%A_%a.out\"",
            cfg.log_dir.display()
        ));
        if let Some(cpus) = cfg.cpus_per_task {
            directive(format!("--cpus-per-task={}", cpus));
        }
        if let Some(memory) = &cfg.memory {
            directive(format!("--mem={}", memory));
        }
        directive(format!("--array={}", self.array_spec(batch.task_count)));

        if !cfg.setup.is_empty() {
            s.push_str("\n# Setup\n");
            for line in &cfg.setup {
                s.push_str(line);
                s.push('\n');
            }
        }

        let _ = write!(
            s,
            "\nstart=$(date +%s)\n\
             {command} run --config {config} --manifest {manifest} --stage {stage} --task \"$SLURM_ARRAY_TASK_ID\"\n\
             status=$?\n\
             end=$(date +%s)\n\
             echo \"{stage} task $SLURM_ARRAY_TASK_ID finished with status $status in $((end - start)) seconds\"\n\
             exit $status\n",
            command = cfg.command,
            config = shell_quote(&batch.config_path.display().to_string()),
            manifest = shell_quote(&batch.manifest_path.display().to_string()),
            stage = stage.name(),
        );
        s
    }

    fn submit_script(&self, batch: &JobBatch<'_>) -> String {
        let mut s = String::from(
            "#!/bin/bash\nset -euo pipefail\ncd \"$(dirname \"$0\")\"\n",
        );
        let _ = writeln!(s, "mkdir -p {}\n", shell_quote(&self.config.log_dir.display().to_string()));

        let order = batch.graph.topological_order();
        for node in &order {
            let dependency = if node.dependencies.is_empty() {
                String::new()
            } else {
                let ids: Vec<String> = node
                    .dependencies
                    .iter()
                    .map(|dep| format!("${{{}}}", Self::job_var(*dep)))
                    .collect();
                format!(" --dependency=afterok:{}", ids.join(":"))
            };
            let _ = writeln!(
                s,
                "{var}=$(sbatch --parsable{dependency} {script} | cut -d ';' -f 1)",
                var = Self::job_var(node.stage),
                script = Self::script_name(batch, node.stage),
            );
        }

        s.push('\n');
        for node in &order {
            let _ = writeln!(
                s,
                "echo \"{}: ${{{}}}\"",
                node.stage.name(),
                Self::job_var(node.stage)
            );
        }
        s
    }
}

impl SchedulerRenderer for SlurmRenderer {
    fn name(&self) -> &str {
        "slurm"
    }

    fn submit_program(&self) -> &str {
        "sbatch"
    }

    fn render(&self, batch: &JobBatch<'_>) -> Result<RenderedBatch, SchedulerError> {
        if batch.task_count == 0 {
            return Err(SchedulerError::EmptyManifest);
        }

        let stages = batch
            .graph
            .topological_order()
            .into_iter()
            .map(|node| {
                let script = RenderedScript {
                    file_name: Self::script_name(batch, node.stage),
                    content: self.stage_script(batch, node.stage),
                };
                (node.stage, script)
            })
            .collect();

        Ok(RenderedBatch {
            stages,
            submit: RenderedScript {
                file_name: format!("{}_submit.sh", batch.name),
                content: self.submit_script(batch),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::graph::PipelineGraph;
    use std::path::PathBuf;

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            account: Some("GCIMS".to_string()),
            partition: Some("slurm".to_string()),
            time: "02:00:00".to_string(),
            max_concurrent: 10,
            mail_user: Some("someone@example.org".to_string()),
            mail_type: Some("FAIL".to_string()),
            setup: vec!["module load gcc/11.2.0".to_string()],
            ..Default::default()
        }
    }

    fn batch(graph: &PipelineGraph, task_count: usize) -> JobBatch<'_> {
        JobBatch {
            name: "run_manager".to_string(),
            config_path: PathBuf::from("/runs/config.yaml"),
            manifest_path: PathBuf::from("/runs/intermediate/run_manager_explicit_list.csv"),
            task_count,
            graph,
        }
    }

    #[test]
    fn test_stage_script_contents() {
        let graph = PipelineGraph::for_batch(false, false).unwrap();
        let rendered = SlurmRenderer::new(config()).render(&batch(&graph, 12)).unwrap();

        let script = &rendered.stage_script(Stage::AdjustAndDownscale).unwrap();
        assert_eq!(script.file_name, "run_manager_adjust-downscale.job");
        let content = &script.content;
        assert!(content.starts_with("#!/bin/bash\n"));
        assert!(content.contains("#SBATCH --account=GCIMS\n"));
        assert!(content.contains("#SBATCH --partition=slurm\n"));
        assert!(content.contains("#SBATCH --job-name=run_manager_adjust-downscale\n"));
        assert!(content.contains("#SBATCH --time=02:00:00\n"));
        assert!(content.contains("#SBATCH --mail-type=FAIL\n"));
        assert!(content.contains("#SBATCH --mail-user=someone@example.org\n"));
        assert!(content.contains("#SBATCH --output=\".out/%x_%A_%a.out\"\n"));
        assert!(content.contains("#SBATCH --array=0-11%10\n"));
        assert!(content.contains("module load gcc/11.2.0\n"));
        assert!(content.contains(
            "basd run --config '/runs/config.yaml' --manifest '/runs/intermediate/run_manager_explicit_list.csv' --stage adjust-downscale --task \"$SLURM_ARRAY_TASK_ID\"\n"
        ));
        assert!(content.ends_with("exit $status\n"));
        assert!(!content.contains("--mem"));
    }

    #[test]
    fn test_optional_settings_are_omitted() {
        let graph = PipelineGraph::for_batch(false, false).unwrap();
        let rendered = SlurmRenderer::new(SchedulerConfig::default())
            .render(&batch(&graph, 1))
            .unwrap();
        let content = &rendered.stages[0].1.content;

        assert!(content.contains("#SBATCH --array=0-0%20\n"));
        assert!(!content.contains("--account"));
        assert!(!content.contains("--mail-user"));
        assert!(!content.contains("# Setup"));
    }

    #[test]
    fn test_submit_chains_dependencies() {
        let graph = PipelineGraph::for_batch(true, true).unwrap();
        let rendered = SlurmRenderer::new(config()).render(&batch(&graph, 3)).unwrap();

        let stages: Vec<Stage> = rendered.stages.iter().map(|(s, _)| *s).collect();
        assert_eq!(stages, Stage::ALL.to_vec());

        let submit = &rendered.submit.content;
        assert_eq!(rendered.submit.file_name, "run_manager_submit.sh");
        assert!(submit.contains(
            "stitch_job=$(sbatch --parsable run_manager_stitch.job | cut -d ';' -f 1)\n"
        ));
        assert!(submit.contains(
            "derive_range_skew_job=$(sbatch --parsable --dependency=afterok:${stitch_job} run_manager_derive-range-skew.job"
        ));
        assert!(submit.contains(
            "adjust_downscale_job=$(sbatch --parsable --dependency=afterok:${derive_range_skew_job}:${stitch_job} run_manager_adjust-downscale.job"
        ));
        assert!(submit.contains(
            "derive_min_max_job=$(sbatch --parsable --dependency=afterok:${adjust_downscale_job} run_manager_derive-min-max.job"
        ));
        let stitch_at = submit.find("stitch_job=").unwrap();
        let minmax_at = submit.find("derive_min_max_job=").unwrap();
        assert!(stitch_at < minmax_at);
    }

    #[test]
    fn test_direct_batch_has_no_stitch_job() {
        let graph = PipelineGraph::for_batch(false, false).unwrap();
        let rendered = SlurmRenderer::new(config()).render(&batch(&graph, 3)).unwrap();

        assert!(rendered.stage_script(Stage::Stitch).is_none());
        assert!(!rendered.submit.content.contains("stitch_job"));
        assert!(rendered.submit.content.contains(
            "adjust_downscale_job=$(sbatch --parsable --dependency=afterok:${derive_range_skew_job} "
        ));
    }

    #[test]
    fn test_empty_manifest_is_rejected() {
        let graph = PipelineGraph::for_batch(false, false).unwrap();
        assert!(matches!(
            SlurmRenderer::new(config()).render(&batch(&graph, 0)),
            Err(SchedulerError::EmptyManifest)
        ));
    }
}
