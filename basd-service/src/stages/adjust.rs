// Adjust and Downscale Stage
// Runs the external adjustment backend for one variable and persists ba/basd outputs

use crate::adjust::{AdjustmentError, AdjustmentInputs, AdjustmentRequest};
use crate::artifacts::naming::{Resolution, StageDir};
use crate::stages::{
    acquire_segment, missing_base_inputs, remove_work_dir, StageError, StageServices, StageWork,
    TaskRunSummary,
};
use crate::tasks::{Segment, TaskContext};
use crate::transform::{is_decomposed, GriddedDataset};

use async_trait::async_trait;
use std::fs;
use std::path::PathBuf;
use tracing::info;

pub struct AdjustAndDownscaleWork;

impl AdjustAndDownscaleWork {
    /// Model series for one segment: derived raw artifacts for tasrange and
    /// tasskew, the data source for everything else
    async fn simulated(
        ctx: &TaskContext,
        services: &StageServices,
        segment: Segment,
    ) -> Result<GriddedDataset, StageError> {
        let variable = ctx.variable();
        if is_decomposed(variable) {
            let path = ctx.path(&ctx.raw_artifact(variable, segment));
            return Ok(services.gate.read(&path)?);
        }
        let source = services.source_for(ctx)?;
        acquire_segment(source.as_ref(), ctx, variable, segment).await
    }

    fn finish(
        ctx: &TaskContext,
        services: &StageServices,
        data: GriddedDataset,
        resolution: Resolution,
    ) -> GriddedDataset {
        let attributes = services.config.attributes.for_resolution(resolution);
        let variable_attributes = attributes.for_variable(ctx.variable());
        let data = if attributes.global.is_empty() && variable_attributes.is_empty() {
            data
        } else {
            data.with_attributes(&attributes.global, &variable_attributes)
        };
        services.encode(data)
    }

    async fn adjust_and_downscale(
        ctx: &TaskContext,
        services: &StageServices,
        work_dir: PathBuf,
    ) -> Result<TaskRunSummary, StageError> {
        let backend = services.adjuster.clone().ok_or_else(|| {
            StageError::Configuration("no adjustment backend is configured".to_string())
        })?;
        let variable = ctx.variable();
        let task = &ctx.task;

        let obs_reference = services
            .observed(ctx)
            .load(variable)?
            .select_years(&task.target_period)?;
        let sim_reference = Self::simulated(ctx, services, Segment::Reference).await?;
        let sim_application = Self::simulated(ctx, services, Segment::Application).await?;

        let parameters = services.config.parameters_for(variable);
        let request = AdjustmentRequest {
            variable: variable.to_string(),
            parameters: parameters.clone(),
            chunks: services.config.chunks.resolve(sim_application.dims()),
            work_dir,
            monthly: task.monthly,
        };
        let inputs = AdjustmentInputs {
            obs_reference,
            sim_reference,
            sim_application,
        };

        info!(task = %ctx.label(), backend = backend.name(), "Adjusting");
        let mut adjustment = backend.prepare(inputs, request).await?;
        let mut summary = TaskRunSummary::default();

        let adjusted = adjustment.adjust().await?;
        if task.daily {
            let path = ctx.path(&ctx.artifact(StageDir::Ba, variable, Resolution::Daily));
            let data = Self::finish(ctx, services, adjusted.daily.clone(), Resolution::Daily);
            services.write(path, &data, &mut summary)?;
        }
        if task.monthly {
            let monthly = adjusted
                .monthly
                .ok_or_else(|| AdjustmentError::MissingOutput("ba_monthly".to_string()))?;
            let path = ctx.path(&ctx.artifact(StageDir::Ba, variable, Resolution::Monthly));
            let data = Self::finish(ctx, services, monthly, Resolution::Monthly);
            services.write(path, &data, &mut summary)?;
        }

        info!(task = %ctx.label(), "Downscaling");
        let downscaled = adjustment
            .downscale(&adjusted.daily, &parameters.for_downscaling(variable))
            .await?;
        let path = ctx.path(&ctx.artifact(StageDir::Basd, variable, Resolution::Daily));
        let data = Self::finish(ctx, services, downscaled.daily, Resolution::Daily);
        services.write(path, &data, &mut summary)?;
        if task.monthly {
            let monthly = downscaled
                .monthly
                .ok_or_else(|| AdjustmentError::MissingOutput("basd_monthly".to_string()))?;
            let path = ctx.path(&ctx.artifact(StageDir::Basd, variable, Resolution::Monthly));
            let data = Self::finish(ctx, services, monthly, Resolution::Monthly);
            services.write(path, &data, &mut summary)?;
        }

        Ok(summary)
    }
}

#[async_trait]
impl StageWork for AdjustAndDownscaleWork {
    async fn missing_inputs(&self, ctx: &TaskContext, services: &StageServices) -> Vec<String> {
        let variable = ctx.variable();
        let mut missing = Vec::new();

        if is_decomposed(variable) {
            for segment in [Segment::Reference, Segment::Application] {
                let path = ctx.path(&ctx.raw_artifact(variable, segment));
                if !services.gate.exists(&path) {
                    missing.push(path.display().to_string());
                }
            }
        } else if let Ok(source) = services.source_for(ctx) {
            missing.extend(missing_base_inputs(source.as_ref(), ctx, &[variable]).await);
        }

        let observed = services.observed(ctx);
        if !observed.contains(variable) {
            missing.push(format!(
                "observed {} in {}",
                variable,
                observed.root().display()
            ));
        }
        missing
    }

    fn outputs(&self, ctx: &TaskContext) -> Vec<PathBuf> {
        let variable = ctx.variable();
        let mut keys = vec![ctx.artifact(StageDir::Basd, variable, Resolution::Daily)];
        if ctx.task.daily {
            keys.push(ctx.artifact(StageDir::Ba, variable, Resolution::Daily));
        }
        if ctx.task.monthly {
            keys.push(ctx.artifact(StageDir::Ba, variable, Resolution::Monthly));
            keys.push(ctx.artifact(StageDir::Basd, variable, Resolution::Monthly));
        }
        keys.iter().map(|key| ctx.path(key)).collect()
    }

    async fn run(
        &self,
        ctx: &TaskContext,
        services: &StageServices,
    ) -> Result<TaskRunSummary, StageError> {
        let work_dir = ctx.temp_dir();
        // Leftovers of an interrupted run would be picked up as inputs
        remove_work_dir(&work_dir);
        fs::create_dir_all(&work_dir).map_err(|source| AdjustmentError::Io {
            path: work_dir.clone(),
            source,
        })?;

        let result = Self::adjust_and_downscale(ctx, services, work_dir.clone()).await;
        remove_work_dir(&work_dir);
        result
    }
}
