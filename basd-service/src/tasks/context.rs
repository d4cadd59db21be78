// Task Context
// Immutable per-task view of names and locations, built once from the manifest

use crate::artifacts::naming::{ArtifactKey, Member, Period, Resolution, StageDir, HISTORICAL};
use crate::sources::AcquisitionKey;
use crate::tasks::manifest::{ManifestError, TaskManifest};
use crate::tasks::matrix::TaskEntry;

use std::path::{Path, PathBuf};

/// Which slice of a model series an artifact covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Segment {
    /// Target period of the reference scenario
    Reference,
    /// Application period of the task's scenario
    Application,
}

/// Everything a stage needs to know about one task
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub index: usize,
    pub task: TaskEntry,
    pub member: Member,
    /// Artifact file extension of the configured codec
    pub extension: String,
    /// Base variables the stitched trajectory of this model and scenario must provide
    pub stitch_variables: Vec<String>,
}

impl TaskContext {
    pub fn new(index: usize, task: TaskEntry, extension: impl Into<String>) -> Self {
        let member = task.member();
        Self {
            index,
            task,
            member,
            extension: extension.into(),
            stitch_variables: Vec::new(),
        }
    }

    pub fn from_manifest(
        manifest: &TaskManifest,
        index: usize,
        extension: &str,
    ) -> Result<Self, ManifestError> {
        let task = manifest.get(index)?.clone();
        let stitch_variables = if task.stitched {
            manifest.stitch_variables(&task.model, &task.scenario)
        } else {
            Vec::new()
        };
        Ok(Self {
            stitch_variables,
            ..Self::new(index, task, extension)
        })
    }

    pub fn variable(&self) -> &str {
        &self.task.variable
    }

    pub fn output_root(&self) -> &Path {
        &self.task.output_location
    }

    /// Scenario the model's reference segment comes from
    pub fn reference_scenario(&self) -> &str {
        if self.task.stitched {
            &self.task.scenario
        } else {
            HISTORICAL
        }
    }

    pub fn segment(&self, segment: Segment) -> (&str, Period) {
        match segment {
            Segment::Reference => (self.reference_scenario(), self.task.target_period),
            Segment::Application => (&self.task.scenario, self.task.application_period),
        }
    }

    /// Key of an adjusted artifact of `variable` for this task
    pub fn artifact(&self, stage_dir: StageDir, variable: &str, resolution: Resolution) -> ArtifactKey {
        ArtifactKey {
            model: self.task.model.clone(),
            member: self.member.clone(),
            reference: self.task.reference.clone(),
            scenario: self.task.scenario.clone(),
            stage_dir,
            variable: variable.to_string(),
            resolution,
            period: self.task.application_period,
        }
    }

    /// Key of a derived, unadjusted artifact for one segment
    pub fn raw_artifact(&self, variable: &str, segment: Segment) -> ArtifactKey {
        let (scenario, period) = self.segment(segment);
        ArtifactKey {
            model: self.task.model.clone(),
            member: self.member.clone(),
            reference: self.task.reference.clone(),
            scenario: scenario.to_string(),
            stage_dir: StageDir::Raw,
            variable: variable.to_string(),
            resolution: Resolution::Daily,
            period,
        }
    }

    pub fn path(&self, key: &ArtifactKey) -> PathBuf {
        key.path(self.output_root(), &self.extension)
    }

    pub fn acquisition_key(&self, variable: &str, segment: Segment) -> AcquisitionKey {
        let (scenario, _) = self.segment(segment);
        AcquisitionKey {
            variable: variable.to_string(),
            model: self.task.model.clone(),
            scenario: scenario.to_string(),
            ensemble: self.task.ensemble.clone(),
        }
    }

    /// Scratch directory handed to the adjustment backend.
    ///
    /// Unique per task: tasks sharing a variable and member still differ in
    /// their application period.
    pub fn temp_dir(&self) -> PathBuf {
        let period = self.task.application_period;
        self.output_root()
            .join(&self.task.reference)
            .join(&self.task.model)
            .join(&self.task.scenario)
            .join(format!(
                "{}_{}_{}_{}_temp_intermediate",
                self.task.variable, self.member, period.start, period.end
            ))
    }

    pub fn label(&self) -> String {
        format!("#{} {}", self.index, self.task.key())
    }
}
