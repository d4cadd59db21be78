// Run Report
// Per-task outcomes aggregated per stage and per pipeline run

use crate::execution::stage::Stage;

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Why a task did no work
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    /// Every output artifact already exists
    AlreadySatisfied,
    /// Required inputs are absent
    MissingPrecondition(Vec<String>),
    /// The stage has nothing to do for this task
    NotApplicable,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::AlreadySatisfied => write!(f, "outputs already present"),
            SkipReason::MissingPrecondition(missing) => {
                write!(f, "missing inputs: {}", missing.join(", "))
            }
            SkipReason::NotApplicable => write!(f, "not applicable"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskStatus {
    Succeeded,
    Skipped { skip: SkipReason },
    Failed { error: String },
}

/// What one task did in one stage
#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    pub index: usize,
    pub task: String,
    #[serde(flatten)]
    pub status: TaskStatus,
    /// Artifacts this task created
    pub written: Vec<PathBuf>,
    pub notes: Vec<String>,
    pub duration: Duration,
}

impl TaskOutcome {
    pub fn skipped(index: usize, task: impl Into<String>, reason: SkipReason) -> Self {
        Self {
            index,
            task: task.into(),
            status: TaskStatus::Skipped { skip: reason },
            written: Vec::new(),
            notes: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.status, TaskStatus::Failed { .. })
    }
}

/// All task outcomes of one stage
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    pub outcomes: Vec<TaskOutcome>,
    pub duration: Duration,
}

impl StageReport {
    pub fn succeeded(&self) -> usize {
        self.count(|s| matches!(s, TaskStatus::Succeeded))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, TaskStatus::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, TaskStatus::Failed { .. }))
    }

    fn count(&self, predicate: impl Fn(&TaskStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| predicate(&o.status)).count()
    }

    pub fn success(&self) -> bool {
        self.failed() == 0
    }

    /// Scheduler convention: 0 when no task failed
    pub fn exit_code(&self) -> i32 {
        if self.success() {
            0
        } else {
            1
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &TaskOutcome> {
        self.outcomes.iter().filter(|o| o.is_failure())
    }
}

/// A stage that never ran
#[derive(Debug, Clone, Serialize)]
pub struct SkippedStage {
    pub stage: Stage,
    pub reason: String,
}

/// Result of running every stage of a batch in process
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub name: String,
    pub stages: Vec<StageReport>,
    pub skipped_stages: Vec<SkippedStage>,
    pub duration: Duration,
    pub success: bool,
}

impl PipelineReport {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_json()?)
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageReport> {
        self.stages.iter().find(|r| r.stage == stage)
    }

    pub fn exit_code(&self) -> i32 {
        if self.success {
            0
        } else {
            1
        }
    }
}
