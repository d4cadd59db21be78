// Stage Executor
// Runs one stage over the task manifest, isolating failures per task

use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::graph::PipelineGraph;
use crate::execution::report::{
    PipelineReport, SkipReason, SkippedStage, StageReport, TaskOutcome, TaskStatus,
};
use crate::execution::stage::Stage;
use crate::stages::{work_for, StageError, StageServices, StageWork};
use crate::tasks::{ManifestError, TaskContext, TaskManifest};

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// Configuration for stage execution
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Run later stages even when an earlier one had failures
    pub continue_on_error: bool,
    /// Maximum tasks of one stage running at once (0 = unlimited)
    pub max_parallel_tasks: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            continue_on_error: false,
            max_parallel_tasks: 0,
        }
    }
}

/// Stage executor
pub struct StageExecutor {
    services: Arc<StageServices>,
    config: ExecutorConfig,
    event_tx: Option<ProgressSender>,
}

impl StageExecutor {
    pub fn new(services: StageServices) -> Self {
        Self {
            services: Arc::new(services),
            config: ExecutorConfig::default(),
            event_tx: None,
        }
    }

    /// Set executor configuration
    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Set progress event sender
    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn services(&self) -> &StageServices {
        &self.services
    }

    /// Run `stage` for every task it applies to
    pub async fn run_stage(
        &self,
        stage: Stage,
        manifest: &TaskManifest,
    ) -> Result<StageReport, ManifestError> {
        let extension = self.services.gate.extension().to_string();
        let mut contexts = Vec::new();
        for (index, task) in manifest.iter() {
            if stage.applies_to(task) {
                contexts.push(TaskContext::from_manifest(manifest, index, &extension)?);
            }
        }
        Ok(self.execute(stage, contexts).await)
    }

    /// Run `stage` for the single task at `index` (one scheduler array element)
    pub async fn run_task(
        &self,
        stage: Stage,
        manifest: &TaskManifest,
        index: usize,
    ) -> Result<StageReport, ManifestError> {
        let ctx = TaskContext::from_manifest(manifest, index, self.services.gate.extension())?;
        if !stage.applies_to(&ctx.task) {
            info!(stage = %stage, task = %ctx.label(), "Stage does not apply to task");
            return Ok(StageReport {
                stage,
                outcomes: vec![TaskOutcome::skipped(
                    index,
                    ctx.label(),
                    SkipReason::NotApplicable,
                )],
                duration: Duration::ZERO,
            });
        }
        Ok(self.execute(stage, vec![ctx]).await)
    }

    async fn execute(&self, stage: Stage, contexts: Vec<TaskContext>) -> StageReport {
        let start = Instant::now();
        self.event_tx.send_event(ExecutionEvent::stage_started(
            stage.name(),
            stage.description(),
            contexts.len(),
        ));
        info!(stage = %stage, tasks = contexts.len(), "Stage started");

        let limit = match self.config.max_parallel_tasks {
            0 => contexts.len().max(1),
            n => n,
        };
        let semaphore = Arc::new(Semaphore::new(limit));
        let work = work_for(stage);

        let mut handles = Vec::with_capacity(contexts.len());
        for ctx in contexts {
            let index = ctx.index;
            let label = ctx.label();
            let semaphore = semaphore.clone();
            let work = work.clone();
            let services = self.services.clone();
            let events = self.event_tx.clone();
            let handle = tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                run_one(stage, work, ctx, services, events).await
            });
            handles.push((index, label, handle));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (index, label, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(join_error) => {
                    let message = if join_error.is_panic() {
                        panic_message(join_error.into_panic())
                    } else {
                        "cancelled".to_string()
                    };
                    let error = StageError::Panicked(message).to_string();
                    warn!(stage = %stage, task = %label, error = %error, "Task failed");
                    self.event_tx.send_event(ExecutionEvent::task_failed(
                        stage.name(),
                        index,
                        &label,
                        &error,
                    ));
                    TaskOutcome {
                        index,
                        task: label,
                        status: TaskStatus::Failed { error },
                        written: Vec::new(),
                        notes: Vec::new(),
                        duration: Duration::ZERO,
                    }
                }
            };
            outcomes.push(outcome);
        }

        let report = StageReport {
            stage,
            outcomes,
            duration: start.elapsed(),
        };

        info!(
            stage = %stage,
            succeeded = report.succeeded(),
            skipped = report.skipped(),
            failed = report.failed(),
            "Stage finished"
        );
        self.event_tx.send_event(ExecutionEvent::StageCompleted {
            stage_name: stage.name().to_string(),
            succeeded: report.succeeded(),
            skipped: report.skipped(),
            failed: report.failed(),
            duration: report.duration,
        });

        report
    }
}

async fn run_one(
    stage: Stage,
    work: Arc<dyn StageWork>,
    ctx: TaskContext,
    services: Arc<StageServices>,
    events: Option<ProgressSender>,
) -> TaskOutcome {
    let start = Instant::now();
    let label = ctx.label();

    let skip = |reason: SkipReason| {
        events.send_event(ExecutionEvent::task_skipped(
            stage.name(),
            ctx.index,
            &label,
            reason.to_string(),
        ));
        TaskOutcome::skipped(ctx.index, label.clone(), reason)
    };

    let outputs = work.outputs(&ctx);
    if !outputs.is_empty() && outputs.iter().all(|path| services.gate.exists(path)) {
        info!(stage = %stage, task = %label, "Outputs already present, skipping");
        return skip(SkipReason::AlreadySatisfied);
    }

    let missing = work.missing_inputs(&ctx, &services).await;
    if !missing.is_empty() {
        warn!(stage = %stage, task = %label, missing = ?missing, "Required inputs missing, skipping");
        return skip(SkipReason::MissingPrecondition(missing));
    }

    events.send_event(ExecutionEvent::task_started(stage.name(), ctx.index, &label));
    match work.run(&ctx, &services).await {
        Ok(summary) => {
            let duration = start.elapsed();
            info!(
                stage = %stage,
                task = %label,
                written = summary.written.len(),
                "Task completed"
            );
            for note in &summary.notes {
                events.send_event(ExecutionEvent::info(
                    format!("{}: {}", label, note),
                    Some(stage.name().to_string()),
                    Some(ctx.index),
                ));
            }
            events.send_event(ExecutionEvent::TaskCompleted {
                stage_name: stage.name().to_string(),
                task_index: ctx.index,
                label: label.clone(),
                written: summary.written.len(),
                duration,
            });
            TaskOutcome {
                index: ctx.index,
                task: label,
                status: TaskStatus::Succeeded,
                written: summary.written,
                notes: summary.notes,
                duration,
            }
        }
        Err(e) => {
            warn!(stage = %stage, task = %label, error = %e, "Task failed");
            events.send_event(ExecutionEvent::task_failed(
                stage.name(),
                ctx.index,
                &label,
                e.to_string(),
            ));
            TaskOutcome {
                index: ctx.index,
                task: label,
                status: TaskStatus::Failed {
                    error: e.to_string(),
                },
                written: Vec::new(),
                notes: Vec::new(),
                duration: start.elapsed(),
            }
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs every stage of a batch in dependency order within one process
pub struct PipelineRunner {
    name: String,
    graph: PipelineGraph,
    executor: StageExecutor,
}

impl PipelineRunner {
    pub fn new(name: impl Into<String>, graph: PipelineGraph, executor: StageExecutor) -> Self {
        Self {
            name: name.into(),
            graph,
            executor,
        }
    }

    pub async fn run(&self, manifest: &TaskManifest) -> Result<PipelineReport, ManifestError> {
        let start = Instant::now();
        let events = &self.executor.event_tx;
        events.send_event(ExecutionEvent::pipeline_started(&self.name, self.graph.len()));

        let mut stages = Vec::new();
        let mut skipped_stages = Vec::new();
        let mut unavailable: HashSet<Stage> = HashSet::new();
        let mut success = true;

        for level in self.graph.parallel_stages() {
            for node in level {
                let blocked = node
                    .dependencies
                    .iter()
                    .find(|dep| unavailable.contains(*dep));
                if let (Some(dep), false) = (blocked, self.executor.config.continue_on_error) {
                    let reason = format!("Dependencies failed ({})", dep);
                    warn!(stage = %node.stage, reason = %reason, "Stage skipped");
                    events.send_event(ExecutionEvent::stage_skipped(node.stage.name(), &reason));
                    unavailable.insert(node.stage);
                    skipped_stages.push(SkippedStage {
                        stage: node.stage,
                        reason,
                    });
                    continue;
                }

                let report = self.executor.run_stage(node.stage, manifest).await?;
                if !report.success() {
                    success = false;
                    unavailable.insert(node.stage);
                }
                stages.push(report);
            }
        }

        let duration = start.elapsed();
        events.send_event(ExecutionEvent::pipeline_completed(&self.name, success, duration));

        Ok(PipelineReport {
            name: self.name.clone(),
            stages,
            skipped_stages,
            duration,
            success,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::gate::ArtifactGate;
    use crate::artifacts::naming::{Resolution, StageDir};
    use crate::config::{CommandSpec, RunConfig, StitchingConfig};
    use crate::execution::events::progress_channel;
    use crate::execution::fixtures::{
        base_triplet, stitched_task, task, triplet, write_observed, write_observed_years,
        FixtureStitcher, IdentityAdjuster, MemorySource, PanickingAdjuster, STITCHED_YEARS,
    };
    use crate::tasks::{Segment, TaskEntry};
    use std::fs;
    use std::path::Path;

    fn services(source: MemorySource, adjuster: Arc<IdentityAdjuster>) -> StageServices {
        StageServices::new(RunConfig::default(), ArtifactGate::default())
            .with_archive(Arc::new(source))
            .with_adjuster(adjuster)
    }

    fn plain_tasks(root: &Path, variables: &[&str]) -> Vec<TaskEntry> {
        variables
            .iter()
            .map(|v| {
                let mut entry = task(v, root);
                entry.derive_minmax = false;
                entry
            })
            .collect()
    }

    #[tokio::test]
    async fn test_failure_is_isolated_to_one_task() {
        let temp = tempfile::tempdir().unwrap();
        let variables = ["pr", "hurs", "sfcwind", "rsds"];
        write_observed(temp.path(), &variables);
        let source = MemorySource::with_variables(&variables).failing("hurs");
        let (tx, mut rx) = progress_channel();
        let executor =
            StageExecutor::new(services(source, Arc::new(IdentityAdjuster::default())))
                .with_progress(tx);
        let manifest = TaskManifest::new(plain_tasks(temp.path(), &variables));

        let report = executor
            .run_stage(Stage::AdjustAndDownscale, &manifest)
            .await
            .unwrap();

        assert_eq!(report.succeeded(), 3);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.exit_code(), 1);
        let failure = report.failures().next().unwrap();
        assert!(failure.task.contains("/hurs/"));

        let ctx = TaskContext::from_manifest(&manifest, 0, "json").unwrap();
        assert!(ctx
            .path(&ctx.artifact(StageDir::Basd, "pr", Resolution::Daily))
            .is_file());

        drop(executor);
        let mut failed_events = 0;
        while let Some(event) = rx.recv().await {
            if matches!(event, ExecutionEvent::TaskFailed { .. }) {
                failed_events += 1;
            }
        }
        assert_eq!(failed_events, 1);
    }

    #[tokio::test]
    async fn test_rerun_leaves_artifacts_untouched() {
        let temp = tempfile::tempdir().unwrap();
        write_observed(temp.path(), &["pr"]);
        let adjuster = Arc::new(IdentityAdjuster::default());
        let executor = StageExecutor::new(services(
            MemorySource::with_variables(&["pr"]),
            adjuster.clone(),
        ));
        let manifest = TaskManifest::new(plain_tasks(temp.path(), &["pr"]));
        let ctx = TaskContext::from_manifest(&manifest, 0, "json").unwrap();
        let path = ctx.path(&ctx.artifact(StageDir::Basd, "pr", Resolution::Daily));

        let first = executor
            .run_stage(Stage::AdjustAndDownscale, &manifest)
            .await
            .unwrap();
        assert_eq!(first.succeeded(), 1);
        let content = fs::read(&path).unwrap();
        let modified = fs::metadata(&path).unwrap().modified().unwrap();

        let second = executor
            .run_stage(Stage::AdjustAndDownscale, &manifest)
            .await
            .unwrap();

        assert_eq!(second.failed(), 0);
        assert_eq!(
            second.outcomes[0].status,
            TaskStatus::Skipped {
                skip: SkipReason::AlreadySatisfied
            }
        );
        assert_eq!(fs::read(&path).unwrap(), content);
        assert_eq!(fs::metadata(&path).unwrap().modified().unwrap(), modified);
        assert_eq!(adjuster.prepared(), 1);
    }

    #[tokio::test]
    async fn test_missing_reference_skips_without_failing() {
        let temp = tempfile::tempdir().unwrap();
        // No observed data written
        let executor = StageExecutor::new(services(
            MemorySource::with_variables(&["pr"]),
            Arc::new(IdentityAdjuster::default()),
        ));
        let manifest = TaskManifest::new(plain_tasks(temp.path(), &["pr"]));

        let report = executor
            .run_stage(Stage::AdjustAndDownscale, &manifest)
            .await
            .unwrap();

        assert_eq!(report.skipped(), 1);
        assert_eq!(report.exit_code(), 0);
        assert!(matches!(
            &report.outcomes[0].status,
            TaskStatus::Skipped {
                skip: SkipReason::MissingPrecondition(missing)
            } if missing[0].starts_with("observed pr")
        ));
    }

    #[tokio::test]
    async fn test_panicking_backend_is_contained() {
        let temp = tempfile::tempdir().unwrap();
        write_observed(temp.path(), &["pr", "hurs"]);
        let services = StageServices::new(RunConfig::default(), ArtifactGate::default())
            .with_archive(Arc::new(MemorySource::with_variables(&["pr", "hurs"])))
            .with_adjuster(Arc::new(PanickingAdjuster::on("hurs")));
        let executor = StageExecutor::new(services);
        let manifest = TaskManifest::new(plain_tasks(temp.path(), &["pr", "hurs"]));

        let report = executor
            .run_stage(Stage::AdjustAndDownscale, &manifest)
            .await
            .unwrap();

        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 1);
        assert!(matches!(
            &report.outcomes[1].status,
            TaskStatus::Failed { error } if error.contains("panicked")
        ));
    }

    #[tokio::test]
    async fn test_single_task_selection() {
        let temp = tempfile::tempdir().unwrap();
        let executor = StageExecutor::new(services(
            MemorySource::with_variables(&["pr"]),
            Arc::new(IdentityAdjuster::default()),
        ));
        let manifest = TaskManifest::new(plain_tasks(temp.path(), &["pr"]));

        let report = executor
            .run_task(Stage::DeriveMinMax, &manifest, 0)
            .await
            .unwrap();
        assert_eq!(
            report.outcomes[0].status,
            TaskStatus::Skipped {
                skip: SkipReason::NotApplicable
            }
        );

        assert!(matches!(
            executor.run_task(Stage::DeriveMinMax, &manifest, 5).await,
            Err(ManifestError::IndexOutOfRange { index: 5, len: 1 })
        ));
    }

    #[tokio::test]
    async fn test_tasmax_request_reconstructs_minmax() {
        let temp = tempfile::tempdir().unwrap();
        write_observed(temp.path(), &["tas", "tasrange", "tasskew"]);
        let manifest = TaskManifest::new(vec![
            task("tas", temp.path()),
            task("tasrange", temp.path()),
            task("tasskew", temp.path()),
        ]);
        let executor = StageExecutor::new(services(
            MemorySource::with_variables(&["tas", "tasmin", "tasmax"]),
            Arc::new(IdentityAdjuster::default()),
        ));
        let graph = PipelineGraph::from_manifest(&manifest).unwrap();
        let runner = PipelineRunner::new("tasmax", graph, executor);

        let report = runner.run(&manifest).await.unwrap();

        assert!(report.success, "{:?}", report);
        assert_eq!(report.stages.len(), 3);
        let rangeskew = report.stage(Stage::DeriveRangeSkew).unwrap();
        assert_eq!(rangeskew.succeeded() + rangeskew.skipped(), 2);
        assert_eq!(report.stage(Stage::AdjustAndDownscale).unwrap().succeeded(), 3);
        assert_eq!(report.stage(Stage::DeriveMinMax).unwrap().succeeded(), 1);

        let ctx = TaskContext::from_manifest(&manifest, 0, "json").unwrap();
        let gate = ArtifactGate::default();
        let (_, expected_min, expected_max) = base_triplet("ssp245");
        for (stage_dir, name, expected) in [
            (StageDir::Basd, "tasmin", &expected_min),
            (StageDir::Basd, "tasmax", &expected_max),
            (StageDir::Ba, "tasmin", &expected_min),
        ] {
            let key = ctx.artifact(stage_dir, name, Resolution::Daily);
            let path = ctx.path(&key);
            assert!(
                path.file_name()
                    .unwrap()
                    .to_string_lossy()
                    .starts_with(&format!("X_r1i1p1f1_W5E5_ssp245_{}_global_daily_2015_2016", name)),
                "{}",
                path.display()
            );
            let data = gate.read(&path).unwrap();
            assert_eq!(data.variable, name);
            for (got, want) in data.values.iter().zip(expected.values.iter()) {
                assert!((got - want).abs() < 1e-9, "{} vs {}", got, want);
            }
        }
    }

    #[tokio::test]
    async fn test_failed_stage_blocks_dependents() {
        let temp = tempfile::tempdir().unwrap();
        write_observed(temp.path(), &["tas", "tasrange", "tasskew"]);
        let manifest = TaskManifest::new(vec![
            task("tas", temp.path()),
            task("tasrange", temp.path()),
        ]);
        let source = MemorySource::with_variables(&["tas", "tasmin", "tasmax"]).failing("tasmin");
        let executor = StageExecutor::new(services(source, Arc::new(IdentityAdjuster::default())));
        let graph = PipelineGraph::from_manifest(&manifest).unwrap();

        let report = PipelineRunner::new("blocked", graph, executor)
            .run(&manifest)
            .await
            .unwrap();

        assert!(!report.success);
        assert_eq!(report.exit_code(), 1);
        assert_eq!(report.stages.len(), 1);
        let skipped: Vec<Stage> = report.skipped_stages.iter().map(|s| s.stage).collect();
        assert_eq!(skipped, vec![Stage::AdjustAndDownscale, Stage::DeriveMinMax]);
    }

    #[tokio::test]
    async fn test_continue_on_error_runs_dependents() {
        let temp = tempfile::tempdir().unwrap();
        write_observed(temp.path(), &["tas", "tasrange", "tasskew"]);
        let manifest = TaskManifest::new(vec![
            task("tas", temp.path()),
            task("tasrange", temp.path()),
        ]);
        let source = MemorySource::with_variables(&["tas", "tasmin", "tasmax"]).failing("tasmin");
        let executor = StageExecutor::new(services(source, Arc::new(IdentityAdjuster::default())))
            .with_config(ExecutorConfig {
                continue_on_error: true,
                ..Default::default()
            });
        let graph = PipelineGraph::from_manifest(&manifest).unwrap();

        let report = PipelineRunner::new("continue", graph, executor)
            .run(&manifest)
            .await
            .unwrap();

        assert!(!report.success);
        assert!(report.skipped_stages.is_empty());
        let adjust = report.stage(Stage::AdjustAndDownscale).unwrap();
        // tas adjusts; tasrange has no raw inputs
        assert_eq!(adjust.succeeded(), 1);
        assert_eq!(adjust.skipped(), 1);
    }

    #[tokio::test]
    async fn test_application_periods_get_separate_scratch() {
        let temp = tempfile::tempdir().unwrap();
        write_observed(temp.path(), &["pr"]);
        let mut early = task("pr", temp.path());
        early.derive_minmax = false;
        early.application_period = "2015-2015".parse().unwrap();
        let late = TaskEntry {
            application_period: "2016-2016".parse().unwrap(),
            ..early.clone()
        };
        let manifest = TaskManifest::new(vec![early, late]);
        let executor = StageExecutor::new(services(
            MemorySource::with_variables(&["pr"]),
            Arc::new(IdentityAdjuster::through_work_dir()),
        ));

        let report = executor
            .run_stage(Stage::AdjustAndDownscale, &manifest)
            .await
            .unwrap();

        assert_eq!(report.succeeded(), 2, "{:?}", report);
        let gate = ArtifactGate::default();
        for (index, year) in [(0, 2015), (1, 2016)] {
            let ctx = TaskContext::from_manifest(&manifest, index, "json").unwrap();
            for stage_dir in [StageDir::Ba, StageDir::Basd] {
                let path = ctx.path(&ctx.artifact(stage_dir, "pr", Resolution::Daily));
                let data = gate.read(&path).unwrap();
                assert_eq!(data.year_span(), Some((year, year)), "{}", path.display());
            }
            assert!(!ctx.temp_dir().exists());
        }
    }

    #[tokio::test]
    async fn test_missing_monthly_output_fails_task() {
        let temp = tempfile::tempdir().unwrap();
        write_observed(temp.path(), &["pr"]);
        let mut entry = task("pr", temp.path());
        entry.derive_minmax = false;
        entry.monthly = true;
        let manifest = TaskManifest::new(vec![entry]);
        let executor = StageExecutor::new(services(
            MemorySource::with_variables(&["pr"]),
            Arc::new(IdentityAdjuster::without_monthly()),
        ));

        let report = executor
            .run_stage(Stage::AdjustAndDownscale, &manifest)
            .await
            .unwrap();

        assert_eq!(report.failed(), 1);
        match &report.outcomes[0].status {
            TaskStatus::Failed { error } => assert!(error.contains("ba_monthly"), "{}", error),
            other => panic!("unexpected status {:?}", other),
        }
    }

    fn stitching(root: &Path) -> StitchingConfig {
        let trajectory = root.join("trajectory.csv");
        fs::write(&trajectory, "year,temp\n1995,0.6\n2014,0.9\n2100,3.2\n").unwrap();
        StitchingConfig {
            command: CommandSpec {
                program: "stitch".to_string(),
                args: Vec::new(),
                env: Default::default(),
            },
            trajectory,
            experiment: "GSAT_trajectory".to_string(),
            trajectory_source: "user".to_string(),
            ensemble_label: "traj1".to_string(),
            chunk_years: 9,
            baseline: "1995-2014".parse().unwrap(),
        }
    }

    #[tokio::test]
    async fn test_stitched_batch_runs_every_stage() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        let (first, last) = STITCHED_YEARS;
        write_observed_years(root, &["tas", "tasrange", "tasskew"], first, last);
        let manifest = TaskManifest::new(vec![
            stitched_task("tas", root),
            stitched_task("tasrange", root),
            stitched_task("tasskew", root),
        ]);
        let config = RunConfig {
            stitching: Some(stitching(root)),
            ..Default::default()
        };
        let stitcher = Arc::new(FixtureStitcher::default());
        let services = StageServices::new(config, ArtifactGate::default())
            .with_stitcher(stitcher.clone())
            .with_adjuster(Arc::new(IdentityAdjuster::default()));
        let graph = PipelineGraph::from_manifest(&manifest).unwrap();

        let report = PipelineRunner::new("stitched", graph, StageExecutor::new(services))
            .run(&manifest)
            .await
            .unwrap();

        assert!(report.success, "{:?}", report);
        assert_eq!(report.stages.len(), 4);
        assert_eq!(report.stage(Stage::Stitch).unwrap().failed(), 0);
        assert!(stitcher.calls() >= 1);
        for variable in ["tas", "tasmin", "tasmax"] {
            let file = format!("out/X/stitched/stitched_X_{}_ssp245.json", variable);
            assert!(root.join(file).is_file());
        }

        // One continuous series split into both segments of the same scenario
        let gate = ArtifactGate::default();
        let skew = TaskContext::from_manifest(&manifest, 2, "json").unwrap();
        let reference = skew.path(&skew.raw_artifact("tasskew", Segment::Reference));
        assert_eq!(
            reference,
            root.join("out/W5E5/X/ssp245/raw/X_STITCHES_W5E5_ssp245_tasskew_global_daily_2015_2017.json")
        );
        assert_eq!(gate.read(&reference).unwrap().year_span(), Some((2015, 2017)));
        let application = skew.path(&skew.raw_artifact("tasskew", Segment::Application));
        assert_eq!(gate.read(&application).unwrap().year_span(), Some((2018, 2020)));

        let ctx = TaskContext::from_manifest(&manifest, 0, "json").unwrap();
        let (_, tasmin, tasmax) = triplet(first, last);
        let period = "2018-2020".parse().unwrap();
        for (name, expected) in [("tasmin", tasmin), ("tasmax", tasmax)] {
            let path = ctx.path(&ctx.artifact(StageDir::Basd, name, Resolution::Daily));
            assert_eq!(
                path.file_name().unwrap().to_string_lossy(),
                format!("X_STITCHES_W5E5_ssp245_{}_global_daily_2018_2020.json", name)
            );
            let expected = expected.select_years(&period).unwrap();
            let data = gate.read(&path).unwrap();
            for (got, want) in data.values.iter().zip(expected.values.iter()) {
                assert!((got - want).abs() < 1e-9, "{} vs {}", got, want);
            }
        }
    }

    /// tas, tasrange and tasskew adjusted with monthly aggregates
    async fn adjusted_with_monthly(root: &Path) -> (TaskManifest, StageExecutor) {
        write_observed(root, &["tas", "tasrange", "tasskew"]);
        let manifest = TaskManifest::new(
            ["tas", "tasrange", "tasskew"]
                .iter()
                .map(|v| TaskEntry {
                    monthly: true,
                    ..task(v, root)
                })
                .collect(),
        );
        let executor = StageExecutor::new(services(
            MemorySource::with_variables(&["tas", "tasmin", "tasmax"]),
            Arc::new(IdentityAdjuster::default()),
        ));
        for stage in [Stage::DeriveRangeSkew, Stage::AdjustAndDownscale] {
            let report = executor.run_stage(stage, &manifest).await.unwrap();
            assert_eq!(report.failed(), 0, "{:?}", report);
        }
        (manifest, executor)
    }

    fn outcome_of(report: &StageReport, index: usize) -> &TaskOutcome {
        report.outcomes.iter().find(|o| o.index == index).unwrap()
    }

    fn assert_reconstructed(ctx: &TaskContext, expected: [(StageDir, Resolution, bool); 4]) {
        for (stage_dir, resolution, present) in expected {
            for name in ["tasmin", "tasmax"] {
                let path = ctx.path(&ctx.artifact(stage_dir, name, resolution));
                assert_eq!(path.is_file(), present, "{}", path.display());
            }
        }
    }

    #[tokio::test]
    async fn test_minmax_variant_without_inputs_is_noted() {
        let temp = tempfile::tempdir().unwrap();
        let (manifest, executor) = adjusted_with_monthly(temp.path()).await;
        let ctx = TaskContext::from_manifest(&manifest, 0, "json").unwrap();
        fs::remove_file(ctx.path(&ctx.artifact(StageDir::Ba, "tasskew", Resolution::Monthly)))
            .unwrap();

        let report = executor
            .run_stage(Stage::DeriveMinMax, &manifest)
            .await
            .unwrap();

        assert_eq!(report.failed(), 0);
        let outcome = outcome_of(&report, 0);
        assert_eq!(outcome.status, TaskStatus::Succeeded);
        assert!(
            outcome.notes.iter().any(|n| n == "ba monthly inputs missing"),
            "{:?}",
            outcome.notes
        );
        assert_reconstructed(
            &ctx,
            [
                (StageDir::Ba, Resolution::Daily, true),
                (StageDir::Ba, Resolution::Monthly, false),
                (StageDir::Basd, Resolution::Daily, true),
                (StageDir::Basd, Resolution::Monthly, true),
            ],
        );
    }

    #[tokio::test]
    async fn test_minmax_failing_variant_leaves_others_written() {
        let temp = tempfile::tempdir().unwrap();
        let (manifest, executor) = adjusted_with_monthly(temp.path()).await;
        let ctx = TaskContext::from_manifest(&manifest, 0, "json").unwrap();
        fs::write(
            ctx.path(&ctx.artifact(StageDir::Ba, "tasrange", Resolution::Daily)),
            "not a dataset",
        )
        .unwrap();

        let report = executor
            .run_stage(Stage::DeriveMinMax, &manifest)
            .await
            .unwrap();

        assert_eq!(report.failed(), 1);
        match &outcome_of(&report, 0).status {
            TaskStatus::Failed { error } => {
                assert!(error.starts_with("Failed variants: ba daily:"), "{}", error);
                assert!(!error.contains("monthly"), "{}", error);
            }
            other => panic!("unexpected status {:?}", other),
        }
        assert_reconstructed(
            &ctx,
            [
                (StageDir::Ba, Resolution::Daily, false),
                (StageDir::Ba, Resolution::Monthly, true),
                (StageDir::Basd, Resolution::Daily, true),
                (StageDir::Basd, Resolution::Monthly, true),
            ],
        );
    }
}
