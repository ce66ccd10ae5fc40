// Execution Graph (DAG) Builder
// Feasibility check over declared dependencies; dispatch order is the
// scheduler's concern because readiness also depends on runtime outcomes.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::DefinitionError;
use crate::parser::models::Pipeline;

/// Validated dependency structure of a pipeline: one node per stage, one
/// node per job within each stage, with declaration indices preserved.
#[derive(Debug, Clone)]
pub struct ExecutionGraph {
    pub stages: Vec<StageNode>,
    stage_index: HashMap<String, usize>,
}

#[derive(Debug, Clone)]
pub struct StageNode {
    pub name: String,
    /// Names of stages this stage depends on
    pub depends_on: Vec<String>,
    /// Declaration index within the pipeline
    pub index: usize,
    pub jobs: Vec<JobNode>,
    job_index: HashMap<String, usize>,
}

#[derive(Debug, Clone)]
pub struct JobNode {
    pub name: String,
    /// Names of jobs in the same stage this job depends on
    pub depends_on: Vec<String>,
    /// Declaration index within the stage
    pub index: usize,
}

impl ExecutionGraph {
    /// Build and validate the graph: every referenced name must exist and
    /// the dependency relation must be acyclic at both levels.
    pub fn build(pipeline: &Pipeline) -> Result<Self, DefinitionError> {
        let mut stages = Vec::with_capacity(pipeline.stages.len());
        let mut stage_index = HashMap::new();

        for (index, stage) in pipeline.stages.iter().enumerate() {
            stage_index.insert(stage.stage.clone(), index);

            let mut jobs = Vec::with_capacity(stage.jobs.len());
            let mut job_index = HashMap::new();
            for (job_idx, job) in stage.jobs.iter().enumerate() {
                job_index.insert(job.job.clone(), job_idx);
                jobs.push(JobNode {
                    name: job.job.clone(),
                    depends_on: job.depends_on.names(),
                    index: job_idx,
                });
            }

            stages.push(StageNode {
                name: stage.stage.clone(),
                depends_on: stage.depends_on.names(),
                index,
                jobs,
                job_index,
            });
        }

        let graph = Self {
            stages,
            stage_index,
        };
        graph.validate()?;
        Ok(graph)
    }

    pub fn stage(&self, name: &str) -> Option<&StageNode> {
        self.stage_index.get(name).map(|&idx| &self.stages[idx])
    }

    pub fn stage_position(&self, name: &str) -> Option<usize> {
        self.stage_index.get(name).copied()
    }

    fn validate(&self) -> Result<(), DefinitionError> {
        for stage in &self.stages {
            for dep in &stage.depends_on {
                if !self.stage_index.contains_key(dep) {
                    return Err(DefinitionError::UnknownDependency {
                        kind: "stage",
                        name: stage.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
            for job in &stage.jobs {
                for dep in &job.depends_on {
                    if !stage.job_index.contains_key(dep) {
                        return Err(DefinitionError::UnknownDependency {
                            kind: "job",
                            name: job.name.clone(),
                            dependency: dep.clone(),
                        });
                    }
                }
            }
        }

        self.detect_stage_cycles()?;
        for stage in &self.stages {
            stage.detect_job_cycles()?;
        }
        Ok(())
    }

    /// DFS with a recursion stack; the error names the cycle path.
    fn detect_stage_cycles(&self) -> Result<(), DefinitionError> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();

        for stage in &self.stages {
            if !visited.contains(&stage.name) {
                if let Some(cycle) = self.dfs_stage(stage, &mut visited, &mut rec_stack) {
                    return Err(DefinitionError::CyclicDependency { cycle });
                }
            }
        }
        Ok(())
    }

    fn dfs_stage(
        &self,
        node: &StageNode,
        visited: &mut HashSet<String>,
        rec_stack: &mut HashSet<String>,
    ) -> Option<Vec<String>> {
        visited.insert(node.name.clone());
        rec_stack.insert(node.name.clone());

        for dep in &node.depends_on {
            if !visited.contains(dep) {
                let next = &self.stages[self.stage_index[dep]];
                if let Some(mut cycle) = self.dfs_stage(next, visited, rec_stack) {
                    cycle.insert(0, node.name.clone());
                    return Some(cycle);
                }
            } else if rec_stack.contains(dep) {
                return Some(vec![node.name.clone(), dep.clone()]);
            }
        }

        rec_stack.remove(&node.name);
        None
    }
}

impl StageNode {
    pub fn job(&self, name: &str) -> Option<&JobNode> {
        self.job_index.get(name).map(|&idx| &self.jobs[idx])
    }

    fn detect_job_cycles(&self) -> Result<(), DefinitionError> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();

        for job in &self.jobs {
            if !visited.contains(&job.name) {
                if let Some(cycle) = self.dfs_job(job, &mut visited, &mut rec_stack) {
                    return Err(DefinitionError::CyclicDependency { cycle });
                }
            }
        }
        Ok(())
    }

    fn dfs_job(
        &self,
        node: &JobNode,
        visited: &mut HashSet<String>,
        rec_stack: &mut HashSet<String>,
    ) -> Option<Vec<String>> {
        visited.insert(node.name.clone());
        rec_stack.insert(node.name.clone());

        for dep in &node.depends_on {
            if !visited.contains(dep) {
                let next = &self.jobs[self.job_index[dep]];
                if let Some(mut cycle) = self.dfs_job(next, visited, rec_stack) {
                    cycle.insert(0, node.name.clone());
                    return Some(cycle);
                }
            } else if rec_stack.contains(dep) {
                return Some(vec![node.name.clone(), dep.clone()]);
            }
        }

        rec_stack.remove(&node.name);
        None
    }

    /// Group jobs into levels: jobs in one level have no dependency between
    /// them and may run concurrently; a level only starts after the previous
    /// one. Levels hold declaration indices, ordered within each level.
    pub fn job_levels(&self) -> Vec<Vec<usize>> {
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

        for job in &self.jobs {
            in_degree.entry(&job.name).or_insert(0);
            dependents.entry(&job.name).or_default();
            for dep in &job.depends_on {
                dependents.entry(dep.as_str()).or_default().push(&job.name);
                *in_degree.entry(&job.name).or_insert(0) += 1;
            }
        }

        // Kahn's algorithm, tracking the level of each node as
        // max(dependency levels) + 1.
        let mut level_of: HashMap<&str, usize> = HashMap::new();
        let mut queue: VecDeque<&str> = self
            .jobs
            .iter()
            .filter(|j| in_degree[j.name.as_str()] == 0)
            .map(|j| j.name.as_str())
            .collect();

        for name in &queue {
            level_of.insert(*name, 0);
        }

        while let Some(name) = queue.pop_front() {
            let level = level_of[name];
            for &dependent in &dependents[name] {
                let entry = level_of.entry(dependent).or_insert(0);
                *entry = (*entry).max(level + 1);
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(dependent);
                    }
                }
            }
        }

        let depth = level_of.values().copied().max().map_or(0, |d| d + 1);
        let mut levels = vec![Vec::new(); depth];
        for job in &self.jobs {
            levels[level_of[job.name.as_str()]].push(job.index);
        }
        levels
    }
}
