// Stitch Stage
// Generates the stitched base variables a model and scenario still lack

use crate::sources::StitchedSource;
use crate::stages::{remove_work_dir, StageError, StageServices, StageWork, TaskRunSummary};
use crate::stitch::{StitchError, StitchRequest, Trajectory};
use crate::tasks::TaskContext;
use crate::transform::base_variables;

use async_trait::async_trait;
use std::path::PathBuf;
use tracing::info;

pub struct StitchWork;

impl StitchWork {
    fn variables(ctx: &TaskContext) -> Vec<String> {
        if ctx.stitch_variables.is_empty() {
            base_variables(ctx.variable())
                .into_iter()
                .map(String::from)
                .collect()
        } else {
            ctx.stitch_variables.clone()
        }
    }

    fn file(ctx: &TaskContext, variable: &str) -> PathBuf {
        StitchedSource::file_path(
            &ctx.task.stitched_dir(),
            &ctx.task.model,
            variable,
            &ctx.task.scenario,
            &ctx.extension,
        )
    }
}

#[async_trait]
impl StageWork for StitchWork {
    async fn missing_inputs(&self, _ctx: &TaskContext, services: &StageServices) -> Vec<String> {
        match &services.config.stitching {
            Some(stitching) if !stitching.trajectory.is_file() => {
                vec![format!("trajectory {}", stitching.trajectory.display())]
            }
            _ => Vec::new(),
        }
    }

    fn outputs(&self, ctx: &TaskContext) -> Vec<PathBuf> {
        Self::variables(ctx)
            .iter()
            .map(|v| Self::file(ctx, v))
            .collect()
    }

    async fn run(
        &self,
        ctx: &TaskContext,
        services: &StageServices,
    ) -> Result<TaskRunSummary, StageError> {
        let stitching = services.config.stitching.as_ref().ok_or_else(|| {
            StageError::Configuration("stitched task but no stitching section".to_string())
        })?;
        let generator = services.stitcher.clone().ok_or_else(|| {
            StageError::Configuration("no stitching generator is available".to_string())
        })?;

        let mut summary = TaskRunSummary::default();
        let missing: Vec<String> = Self::variables(ctx)
            .into_iter()
            .filter(|v| !services.gate.exists(&Self::file(ctx, v)))
            .collect();
        if missing.is_empty() {
            summary.note("stitched data already present");
            return Ok(summary);
        }

        let trajectory = Trajectory::from_csv(&stitching.trajectory)?.to_anomaly(&stitching.baseline)?;
        let work_dir = ctx.task.stitched_dir().join(format!(
            ".work_{}_{}_{}",
            ctx.task.model, ctx.task.scenario, ctx.index
        ));
        let request = StitchRequest {
            model: ctx.task.model.clone(),
            scenario: ctx.task.scenario.clone(),
            experiment: stitching.experiment.clone(),
            variables: missing.clone(),
            trajectory,
            ensemble_label: stitching.ensemble_label.clone(),
            trajectory_source: stitching.trajectory_source.clone(),
            chunk_years: stitching.chunk_years,
            work_dir: work_dir.clone(),
        };

        info!(
            task = %ctx.label(),
            generator = generator.name(),
            variables = ?missing,
            "Stitching"
        );
        let generated = generator.generate(&request).await;
        let result = generated.map_err(StageError::from).and_then(|mut generated| {
            for variable in &missing {
                let data = generated
                    .remove(variable)
                    .ok_or_else(|| StitchError::MissingOutput(variable.clone()))?;
                services.write(Self::file(ctx, variable), &services.encode(data), &mut summary)?;
            }
            Ok(())
        });
        remove_work_dir(&work_dir);
        result.map(|_| summary)
    }
}
