// Pipeline Graph (DAG)
// Stage ordering for a batch, with the conditional stitch and min/max stages

use crate::execution::stage::Stage;
use crate::tasks::TaskManifest;

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

/// Error type for graph operations
#[derive(Debug, Clone)]
pub struct GraphError {
    pub message: String,
    pub kind: GraphErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphErrorKind {
    /// Circular dependency detected
    CyclicDependency,
    /// Reference to a stage that is not in the graph
    UnknownDependency,
    /// Invalid graph structure
    InvalidStructure,
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "graph error: {}", self.message)
    }
}

impl std::error::Error for GraphError {}

impl GraphError {
    pub fn cyclic(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: GraphErrorKind::CyclicDependency,
        }
    }

    pub fn unknown_dependency(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: GraphErrorKind::UnknownDependency,
        }
    }

    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: GraphErrorKind::InvalidStructure,
        }
    }
}

/// A stage and the stages it waits for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageNode {
    pub stage: Stage,
    pub dependencies: Vec<Stage>,
}

/// The stages of one batch as a DAG
#[derive(Debug, Clone)]
pub struct PipelineGraph {
    pub stages: Vec<StageNode>,
    stage_indices: HashMap<Stage, usize>,
}

impl PipelineGraph {
    /// Build and validate a graph from explicit nodes
    pub fn new(stages: Vec<StageNode>) -> Result<Self, GraphError> {
        let mut stage_indices = HashMap::new();
        for (i, node) in stages.iter().enumerate() {
            if stage_indices.insert(node.stage, i).is_some() {
                return Err(GraphError::invalid_structure(format!(
                    "stage '{}' is declared more than once",
                    node.stage
                )));
            }
        }

        let graph = Self {
            stages,
            stage_indices,
        };
        graph.validate()?;
        Ok(graph)
    }

    /// Graph for a batch. Stitch is present only for stitched batches and
    /// DeriveMinMax only when tasmin/tasmax were requested; edges to absent
    /// stages are dropped.
    pub fn for_batch(stitched: bool, derive_minmax: bool) -> Result<Self, GraphError> {
        let present: Vec<Stage> = Stage::ALL
            .into_iter()
            .filter(|stage| match stage {
                Stage::Stitch => stitched,
                Stage::DeriveMinMax => derive_minmax,
                _ => true,
            })
            .collect();

        let nodes = present
            .iter()
            .map(|&stage| StageNode {
                stage,
                dependencies: stage
                    .prerequisites()
                    .iter()
                    .copied()
                    .filter(|dep| present.contains(dep))
                    .collect(),
            })
            .collect();

        Self::new(nodes)
    }

    pub fn from_manifest(manifest: &TaskManifest) -> Result<Self, GraphError> {
        Self::for_batch(manifest.uses_stitched(), manifest.derives_minmax())
    }

    /// Validate the graph (check for cycles and unknown dependencies)
    pub fn validate(&self) -> Result<(), GraphError> {
        for node in &self.stages {
            for dep in &node.dependencies {
                if !self.stage_indices.contains_key(dep) {
                    return Err(GraphError::unknown_dependency(format!(
                        "stage '{}' depends on unknown stage '{}'",
                        node.stage, dep
                    )));
                }
            }
        }

        self.detect_cycles()
    }

    /// Detect cycles in stage dependencies using DFS
    fn detect_cycles(&self) -> Result<(), GraphError> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();

        for node in &self.stages {
            if !visited.contains(&node.stage) {
                if let Some(cycle) = self.dfs_cycle(node, &mut visited, &mut rec_stack) {
                    let names: Vec<&str> = cycle.iter().map(|s| s.name()).collect();
                    return Err(GraphError::cyclic(format!(
                        "circular dependency detected in stages: {}",
                        names.join(" -> ")
                    )));
                }
            }
        }

        Ok(())
    }

    fn dfs_cycle(
        &self,
        node: &StageNode,
        visited: &mut HashSet<Stage>,
        rec_stack: &mut HashSet<Stage>,
    ) -> Option<Vec<Stage>> {
        visited.insert(node.stage);
        rec_stack.insert(node.stage);

        for dep in &node.dependencies {
            if !visited.contains(dep) {
                if let Some(&idx) = self.stage_indices.get(dep) {
                    if let Some(mut cycle) = self.dfs_cycle(&self.stages[idx], visited, rec_stack) {
                        cycle.insert(0, node.stage);
                        return Some(cycle);
                    }
                }
            } else if rec_stack.contains(dep) {
                return Some(vec![node.stage, *dep]);
            }
        }

        rec_stack.remove(&node.stage);
        None
    }

    /// Stages in dependency order; ties keep declaration order
    pub fn topological_order(&self) -> Vec<&StageNode> {
        // Kahn's algorithm
        let mut in_degree: HashMap<Stage, usize> = HashMap::new();
        let mut adj_list: HashMap<Stage, Vec<Stage>> = HashMap::new();

        for node in &self.stages {
            in_degree.entry(node.stage).or_insert(0);
            adj_list.entry(node.stage).or_default();

            for dep in &node.dependencies {
                adj_list.entry(*dep).or_default().push(node.stage);
                *in_degree.entry(node.stage).or_insert(0) += 1;
            }
        }

        let mut queue: VecDeque<Stage> = self
            .stages
            .iter()
            .map(|node| node.stage)
            .filter(|stage| in_degree.get(stage) == Some(&0))
            .collect();

        let mut result = Vec::new();

        while let Some(stage) = queue.pop_front() {
            if let Some(&idx) = self.stage_indices.get(&stage) {
                result.push(&self.stages[idx]);
            }

            if let Some(neighbors) = adj_list.get(&stage) {
                for neighbor in neighbors {
                    if let Some(deg) = in_degree.get_mut(neighbor) {
                        *deg -= 1;
                        if *deg == 0 {
                            queue.push_back(*neighbor);
                        }
                    }
                }
            }
        }

        result
    }

    /// Group stages into levels; every stage only depends on earlier levels
    pub fn parallel_stages(&self) -> Vec<Vec<&StageNode>> {
        let mut levels: Vec<Vec<&StageNode>> = Vec::new();
        let mut assigned: HashMap<Stage, usize> = HashMap::new();

        for node in self.topological_order() {
            let level = node
                .dependencies
                .iter()
                .filter_map(|dep| assigned.get(dep))
                .max()
                .map(|l| l + 1)
                .unwrap_or(0);

            assigned.insert(node.stage, level);

            if level >= levels.len() {
                levels.resize(level + 1, Vec::new());
            }
            levels[level].push(node);
        }

        levels
    }

    pub fn get_stage(&self, stage: Stage) -> Option<&StageNode> {
        self.stage_indices.get(&stage).map(|&idx| &self.stages[idx])
    }

    pub fn contains(&self, stage: Stage) -> bool {
        self.stage_indices.contains_key(&stage)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}
