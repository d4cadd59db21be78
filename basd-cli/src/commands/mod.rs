pub mod expand;
pub mod pipeline;
pub mod run;
pub mod schedule;
pub mod validate;

use crate::output;

use basd_service::{ExecutionEvent, StageReport, TaskStatus};
use color_eyre::Result;

/// Print one progress event
pub fn print_event(event: &ExecutionEvent) {
    match event {
        ExecutionEvent::PipelineStarted {
            pipeline_name,
            total_stages,
        } => output::batch_header(pipeline_name, *total_stages),

        ExecutionEvent::PipelineCompleted {
            success, duration, ..
        } => {
            eprintln!();
            let message = if *success {
                format!("Batch completed successfully in {:.2}s", duration.as_secs_f64())
            } else {
                format!("Batch finished with failures after {:.2}s", duration.as_secs_f64())
            };
            output::verdict(*success, &message);
        }

        ExecutionEvent::StageStarted {
            stage_name,
            description,
            total_tasks,
        } => output::stage_header(stage_name, description, *total_tasks),

        ExecutionEvent::StageCompleted {
            stage_name,
            succeeded,
            skipped,
            failed,
            duration,
        } => output::stage_summary(stage_name, *succeeded, *skipped, *failed, *duration),

        ExecutionEvent::StageSkipped { stage_name, reason } => {
            output::warning(&format!("  Stage '{}' skipped: {}", stage_name, reason));
        }

        ExecutionEvent::TaskStarted { label, .. } => {
            eprintln!("    {}", label);
        }

        ExecutionEvent::TaskCompleted {
            label,
            written,
            duration,
            ..
        } => {
            output::task_line(
                true,
                &format!(
                    "{} OK, {} written ({:.2}s)",
                    label,
                    written,
                    duration.as_secs_f64()
                ),
            );
        }

        ExecutionEvent::TaskSkipped { label, reason, .. } => {
            output::dim(&format!("    {} skipped: {}", label, reason));
        }

        ExecutionEvent::TaskFailed { label, error, .. } => {
            output::task_line(false, &format!("{} FAIL", label));
            output::task_error(error);
        }

        ExecutionEvent::Log { level, message, .. } => {
            use basd_service::execution::LogLevel;
            match level {
                LogLevel::Error => output::error(message),
                LogLevel::Warning => output::warning(message),
                _ => output::dim(message),
            }
        }
    }
}

/// Print the failures of a stage once more at the end of the run
pub fn print_failures(report: &StageReport) {
    for outcome in report.failures() {
        if let TaskStatus::Failed { error } = &outcome.status {
            output::error(&format!("{} {}: {}", report.stage, outcome.task, error));
        }
    }
}

/// Await the executor task while printing its events
pub async fn drain_events<T>(
    mut rx: basd_service::execution::ProgressReceiver,
    handle: tokio::task::JoinHandle<T>,
) -> Result<T> {
    while let Some(event) = rx.recv().await {
        print_event(&event);
    }
    Ok(handle.await?)
}
