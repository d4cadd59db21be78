// Derive Min/Max Stage
// Reconstructs tasmin and tasmax from adjusted tas, tasrange and tasskew

use crate::artifacts::naming::{ArtifactKey, Resolution, StageDir};
use crate::stages::{StageError, StageServices, StageWork, TaskRunSummary};
use crate::tasks::TaskContext;
use crate::transform::{derive_minmax, TAS, TASMAX, TASMIN, TASRANGE, TASSKEW};

use async_trait::async_trait;
use std::path::PathBuf;
use tracing::warn;

pub struct DeriveMinMaxWork;

/// One adjusted product the reconstruction runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Variant {
    stage_dir: StageDir,
    resolution: Resolution,
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.stage_dir, self.resolution)
    }
}

impl DeriveMinMaxWork {
    /// ba daily only when daily output was requested, monthly only when monthly was
    fn variants(ctx: &TaskContext) -> Vec<Variant> {
        let mut variants = Vec::with_capacity(4);
        for stage_dir in [StageDir::Ba, StageDir::Basd] {
            if ctx.task.daily || stage_dir == StageDir::Basd {
                variants.push(Variant {
                    stage_dir,
                    resolution: Resolution::Daily,
                });
            }
            if ctx.task.monthly {
                variants.push(Variant {
                    stage_dir,
                    resolution: Resolution::Monthly,
                });
            }
        }
        variants
    }

    fn key(ctx: &TaskContext, variant: Variant, variable: &str) -> ArtifactKey {
        ctx.artifact(variant.stage_dir, variable, variant.resolution)
    }

    fn inputs(ctx: &TaskContext, variant: Variant) -> [PathBuf; 3] {
        [TAS, TASRANGE, TASSKEW].map(|v| ctx.path(&Self::key(ctx, variant, v)))
    }

    fn variant_outputs(ctx: &TaskContext, variant: Variant) -> [PathBuf; 2] {
        // tas key with the variable swapped, so every coordinate but the name matches
        let tas = Self::key(ctx, variant, TAS);
        [
            ctx.path(&tas.with_variable(TASMIN)),
            ctx.path(&tas.with_variable(TASMAX)),
        ]
    }

    fn reconstruct(
        ctx: &TaskContext,
        services: &StageServices,
        variant: Variant,
        summary: &mut TaskRunSummary,
    ) -> Result<(), StageError> {
        let [tas_path, range_path, skew_path] = Self::inputs(ctx, variant);
        let tas = services.gate.read(&tas_path)?;
        let tasrange = services.gate.read(&range_path)?;
        let tasskew = services.gate.read(&skew_path)?;

        let attributes = services.config.attributes.for_resolution(variant.resolution);
        let derived = derive_minmax(&tas, &tasrange, &tasskew, &attributes)?;

        let [min_path, max_path] = Self::variant_outputs(ctx, variant);
        services.write(min_path, &services.encode(derived.tasmin), summary)?;
        services.write(max_path, &services.encode(derived.tasmax), summary)?;
        Ok(())
    }
}

#[async_trait]
impl StageWork for DeriveMinMaxWork {
    async fn missing_inputs(&self, ctx: &TaskContext, services: &StageServices) -> Vec<String> {
        // The daily downscaled variant is always produced upstream
        let basd_daily = Variant {
            stage_dir: StageDir::Basd,
            resolution: Resolution::Daily,
        };
        Self::inputs(ctx, basd_daily)
            .into_iter()
            .filter(|path| !services.gate.exists(path))
            .map(|path| path.display().to_string())
            .collect()
    }

    fn outputs(&self, ctx: &TaskContext) -> Vec<PathBuf> {
        Self::variants(ctx)
            .into_iter()
            .flat_map(|variant| Self::variant_outputs(ctx, variant))
            .collect()
    }

    async fn run(
        &self,
        ctx: &TaskContext,
        services: &StageServices,
    ) -> Result<TaskRunSummary, StageError> {
        let mut summary = TaskRunSummary::default();
        let mut failed = Vec::new();

        for variant in Self::variants(ctx) {
            let outputs = Self::variant_outputs(ctx, variant);
            if outputs.iter().all(|path| services.gate.exists(path)) {
                summary.note(format!("{} already reconstructed", variant));
                continue;
            }
            if Self::inputs(ctx, variant)
                .iter()
                .any(|path| !services.gate.exists(path))
            {
                warn!(task = %ctx.label(), variant = %variant, "Adjusted inputs missing, variant skipped");
                summary.note(format!("{} inputs missing", variant));
                continue;
            }

            if let Err(e) = Self::reconstruct(ctx, services, variant, &mut summary) {
                warn!(task = %ctx.label(), variant = %variant, error = %e, "Reconstruction failed");
                failed.push(format!("{}: {}", variant, e));
            }
        }

        if failed.is_empty() {
            Ok(summary)
        } else {
            Err(StageError::Variants(failed))
        }
    }
}
