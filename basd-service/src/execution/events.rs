// Execution Events
// Progress reporting and event types for stage execution

use std::time::Duration;
use tokio::sync::mpsc;

/// Sender for execution progress events
pub type ProgressSender = mpsc::UnboundedSender<ExecutionEvent>;

/// Receiver for execution progress events
pub type ProgressReceiver = mpsc::UnboundedReceiver<ExecutionEvent>;

/// Create a new progress channel
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Events emitted while stages run
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    /// Pipeline execution started
    PipelineStarted {
        pipeline_name: String,
        total_stages: usize,
    },

    /// Pipeline execution completed
    PipelineCompleted {
        pipeline_name: String,
        success: bool,
        duration: Duration,
    },

    /// Stage execution started
    StageStarted {
        stage_name: String,
        description: String,
        total_tasks: usize,
    },

    /// Stage execution completed
    StageCompleted {
        stage_name: String,
        succeeded: usize,
        skipped: usize,
        failed: usize,
        duration: Duration,
    },

    /// Stage was not run (a prerequisite stage failed)
    StageSkipped { stage_name: String, reason: String },

    /// Task work started
    TaskStarted {
        stage_name: String,
        task_index: usize,
        label: String,
    },

    /// Task work completed and its artifacts are in place
    TaskCompleted {
        stage_name: String,
        task_index: usize,
        label: String,
        written: usize,
        duration: Duration,
    },

    /// Task was skipped (outputs present, or inputs missing)
    TaskSkipped {
        stage_name: String,
        task_index: usize,
        label: String,
        reason: String,
    },

    /// Task work failed; the rest of the stage continues
    TaskFailed {
        stage_name: String,
        task_index: usize,
        label: String,
        error: String,
    },

    /// Log message (info, warning, error)
    Log {
        level: LogLevel,
        message: String,
        stage_name: Option<String>,
        task_index: Option<usize>,
    },
}

/// Log level for log events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl ExecutionEvent {
    /// Create a pipeline started event
    pub fn pipeline_started(name: impl Into<String>, total_stages: usize) -> Self {
        Self::PipelineStarted {
            pipeline_name: name.into(),
            total_stages,
        }
    }

    /// Create a pipeline completed event
    pub fn pipeline_completed(name: impl Into<String>, success: bool, duration: Duration) -> Self {
        Self::PipelineCompleted {
            pipeline_name: name.into(),
            success,
            duration,
        }
    }

    /// Create a stage started event
    pub fn stage_started(
        name: impl Into<String>,
        description: impl Into<String>,
        total_tasks: usize,
    ) -> Self {
        Self::StageStarted {
            stage_name: name.into(),
            description: description.into(),
            total_tasks,
        }
    }

    pub fn stage_skipped(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StageSkipped {
            stage_name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn task_started(stage_name: impl Into<String>, task_index: usize, label: impl Into<String>) -> Self {
        Self::TaskStarted {
            stage_name: stage_name.into(),
            task_index,
            label: label.into(),
        }
    }

    pub fn task_skipped(
        stage_name: impl Into<String>,
        task_index: usize,
        label: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::TaskSkipped {
            stage_name: stage_name.into(),
            task_index,
            label: label.into(),
            reason: reason.into(),
        }
    }

    pub fn task_failed(
        stage_name: impl Into<String>,
        task_index: usize,
        label: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self::TaskFailed {
            stage_name: stage_name.into(),
            task_index,
            label: label.into(),
            error: error.into(),
        }
    }

    /// Create an info log event
    pub fn info(message: impl Into<String>, stage_name: Option<String>, task_index: Option<usize>) -> Self {
        Self::Log {
            level: LogLevel::Info,
            message: message.into(),
            stage_name,
            task_index,
        }
    }
}

/// Helper trait for sending events, ignoring errors (fire-and-forget)
pub trait EventSender {
    fn send_event(&self, event: ExecutionEvent);
}

impl EventSender for ProgressSender {
    fn send_event(&self, event: ExecutionEvent) {
        let _ = self.send(event);
    }
}

impl EventSender for Option<ProgressSender> {
    fn send_event(&self, event: ExecutionEvent) {
        if let Some(sender) = self {
            let _ = sender.send(event);
        }
    }
}
