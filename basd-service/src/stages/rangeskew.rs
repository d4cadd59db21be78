// Derive Range/Skew Stage
// Decomposes tas/tasmin/tasmax into raw tasrange and tasskew for both segments

use crate::artifacts::naming::Resolution;
use crate::stages::{
    acquire_segment, missing_base_inputs, StageError, StageServices, StageWork, TaskRunSummary,
};
use crate::tasks::{Segment, TaskContext};
use crate::transform::{derive_rangeskew, TAS, TASMAX, TASMIN, TASRANGE, TASSKEW};

use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{info, warn};

const SEGMENTS: [Segment; 2] = [Segment::Reference, Segment::Application];

pub struct DeriveRangeSkewWork;

impl DeriveRangeSkewWork {
    fn segment_outputs(ctx: &TaskContext, segment: Segment) -> [PathBuf; 2] {
        [
            ctx.path(&ctx.raw_artifact(TASRANGE, segment)),
            ctx.path(&ctx.raw_artifact(TASSKEW, segment)),
        ]
    }
}

#[async_trait]
impl StageWork for DeriveRangeSkewWork {
    async fn missing_inputs(&self, ctx: &TaskContext, services: &StageServices) -> Vec<String> {
        // Configuration problems surface when the task runs
        let Ok(source) = services.source_for(ctx) else {
            return Vec::new();
        };
        missing_base_inputs(source.as_ref(), ctx, &[TAS, TASMIN, TASMAX]).await
    }

    fn outputs(&self, ctx: &TaskContext) -> Vec<PathBuf> {
        SEGMENTS
            .iter()
            .flat_map(|&segment| Self::segment_outputs(ctx, segment))
            .collect()
    }

    async fn run(
        &self,
        ctx: &TaskContext,
        services: &StageServices,
    ) -> Result<TaskRunSummary, StageError> {
        let source = services.source_for(ctx)?;
        let attributes = services.config.attributes.for_resolution(Resolution::Daily);
        let policy = services.config.zero_range_policy;
        let mut summary = TaskRunSummary::default();

        for segment in SEGMENTS {
            let [range_path, skew_path] = Self::segment_outputs(ctx, segment);
            if services.gate.exists(&range_path) && services.gate.exists(&skew_path) {
                summary.note(format!("{:?} segment already derived", segment));
                continue;
            }

            let tas = acquire_segment(source.as_ref(), ctx, TAS, segment).await?;
            let tasmin = acquire_segment(source.as_ref(), ctx, TASMIN, segment).await?;
            let tasmax = acquire_segment(source.as_ref(), ctx, TASMAX, segment).await?;

            let derived = derive_rangeskew(&tas, &tasmin, &tasmax, policy, &attributes)?;
            let counts = derived.summary;
            if counts.zero_range > 0 {
                info!(
                    task = %ctx.label(),
                    cells = counts.zero_range,
                    policy = %policy,
                    "Zero daily range; tasskew set by policy"
                );
            }
            if counts.missing > 0 {
                warn!(task = %ctx.label(), cells = counts.missing, "Missing input cells");
            }

            services.write(range_path, &services.encode(derived.tasrange), &mut summary)?;
            services.write(skew_path, &services.encode(derived.tasskew), &mut summary)?;
        }

        Ok(summary)
    }
}
