// Semantic validation of parsed pipeline definitions
// Collects every finding rather than stopping at the first; a definition
// that validates cleanly can still fail graph building on a cycle, which
// is checked when the execution graph is constructed.

use std::collections::HashSet;

use crate::agent::task::{TaskRef, TaskRegistry};
use crate::error::DefinitionError;
use crate::parser::models::{Pipeline, StepAction, Variable};

pub struct PipelineValidator;

impl PipelineValidator {
    /// Validate a parsed pipeline against the task registry.
    pub fn validate(
        pipeline: &Pipeline,
        registry: &TaskRegistry,
    ) -> Result<(), Vec<DefinitionError>> {
        let mut errors = Vec::new();

        if pipeline.stages.is_empty() {
            errors.push(DefinitionError::Empty {
                what: "pipeline",
                path: "pipeline".to_string(),
            });
        }

        Self::check_duplicate_variables(&pipeline.variables, "variables", &mut errors);

        let mut stage_names = HashSet::new();
        for (stage_idx, stage) in pipeline.stages.iter().enumerate() {
            let stage_path = format!("stages[{}]", stage_idx);

            if !stage_names.insert(stage.stage.as_str()) {
                errors.push(DefinitionError::DuplicateName {
                    kind: "stage",
                    name: stage.stage.clone(),
                    path: stage_path.clone(),
                });
            }

            if stage.jobs.is_empty() {
                errors.push(DefinitionError::Empty {
                    what: "stage",
                    path: stage_path.clone(),
                });
            }

            Self::check_duplicate_variables(
                &stage.variables,
                &format!("{}.variables", stage_path),
                &mut errors,
            );

            let mut job_names = HashSet::new();
            for (job_idx, job) in stage.jobs.iter().enumerate() {
                let job_path = format!("{}.jobs[{}]", stage_path, job_idx);

                if !job_names.insert(job.job.as_str()) {
                    errors.push(DefinitionError::DuplicateName {
                        kind: "job",
                        name: job.job.clone(),
                        path: job_path.clone(),
                    });
                }

                if job.steps.is_empty() {
                    errors.push(DefinitionError::Empty {
                        what: "job",
                        path: job_path.clone(),
                    });
                }

                Self::check_duplicate_variables(
                    &job.variables,
                    &format!("{}.variables", job_path),
                    &mut errors,
                );

                // Job dependencies must name jobs of the same stage.
                for dep in job.depends_on.names() {
                    if !stage.jobs.iter().any(|j| j.job == dep) {
                        errors.push(DefinitionError::UnknownDependency {
                            kind: "job",
                            name: job.job.clone(),
                            dependency: dep,
                        });
                    }
                }

                let mut step_names = HashSet::new();
                for (step_idx, step) in job.steps.iter().enumerate() {
                    let step_path = format!("{}.steps[{}]", job_path, step_idx);

                    if let Some(name) = &step.name {
                        if !step_names.insert(name.as_str()) {
                            errors.push(DefinitionError::DuplicateName {
                                kind: "step",
                                name: name.clone(),
                                path: step_path.clone(),
                            });
                        }
                    }

                    if let StepAction::Task(task) = &step.action {
                        match TaskRef::parse(&task.task) {
                            Some(reference) => {
                                if !registry.contains(&reference.kind) {
                                    errors.push(DefinitionError::UnknownTaskKind {
                                        kind: reference.kind,
                                        path: step_path.clone(),
                                    });
                                }
                            }
                            None => {
                                errors.push(DefinitionError::MalformedTaskReference {
                                    reference: task.task.clone(),
                                    path: step_path.clone(),
                                });
                            }
                        }
                    }
                }
            }

            // Stage dependencies must name declared stages.
            for dep in stage.depends_on.names() {
                if !pipeline.stages.iter().any(|s| s.stage == dep) {
                    errors.push(DefinitionError::UnknownDependency {
                        kind: "stage",
                        name: stage.stage.clone(),
                        dependency: dep,
                    });
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn check_duplicate_variables(
        variables: &[Variable],
        path: &str,
        errors: &mut Vec<DefinitionError>,
    ) {
        let mut seen = HashSet::new();
        for variable in variables {
            if !seen.insert(variable.name.as_str()) {
                errors.push(DefinitionError::DuplicateName {
                    kind: "variable",
                    name: variable.name.clone(),
                    path: path.to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validate(yaml: &str) -> Result<(), Vec<DefinitionError>> {
        let pipeline: Pipeline = serde_yaml::from_str(yaml).unwrap();
        PipelineValidator::validate(&pipeline, &TaskRegistry::builtin())
    }

    #[test]
    fn accepts_a_well_formed_pipeline() {
        validate(
            r#"
stages:
  - stage: Build
    jobs:
      - job: Compile
        steps:
          - script: echo ok
          - task: CmdLine@2
            inputs: {script: echo task}
"#,
        )
        .unwrap();
    }

    #[test]
    fn rejects_duplicate_stage_names() {
        let errors = validate(
            r#"
stages:
  - stage: Build
    jobs: [{job: A, steps: [{script: echo}]}]
  - stage: Build
    jobs: [{job: B, steps: [{script: echo}]}]
"#,
        )
        .unwrap_err();
        assert!(errors.iter().any(|e| matches!(
            e,
            DefinitionError::DuplicateName { kind: "stage", name, .. } if name == "Build"
        )));
    }

    #[test]
    fn rejects_duplicate_job_and_variable_names() {
        let errors = validate(
            r#"
variables:
  - {name: tag, value: a}
  - {name: tag, value: b}
stages:
  - stage: Build
    jobs:
      - job: Same
        steps: [{script: echo}]
      - job: Same
        steps: [{script: echo}]
"#,
        )
        .unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, DefinitionError::DuplicateName { kind: "variable", .. })));
        assert!(errors
            .iter()
            .any(|e| matches!(e, DefinitionError::DuplicateName { kind: "job", .. })));
    }

    #[test]
    fn rejects_unknown_stage_dependency() {
        let errors = validate(
            r#"
stages:
  - stage: Test
    dependsOn: [NonExistentStage]
    jobs: [{job: T, steps: [{script: echo}]}]
"#,
        )
        .unwrap_err();
        assert!(errors.iter().any(|e| matches!(
            e,
            DefinitionError::UnknownDependency { kind: "stage", dependency, .. }
                if dependency == "NonExistentStage"
        )));
    }

    #[test]
    fn rejects_empty_structures() {
        let errors = validate("stages:\n  - stage: Build\n    jobs: []\n").unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, DefinitionError::Empty { what: "stage", .. })));

        let errors = validate("stages: []\n").unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, DefinitionError::Empty { what: "pipeline", .. })));
    }

    #[test]
    fn rejects_unknown_and_malformed_task_references() {
        let errors = validate(
            r#"
stages:
  - stage: Build
    jobs:
      - job: J
        steps:
          - task: Docker@2
            inputs: {}
          - task: NoVersion
            inputs: {}
"#,
        )
        .unwrap_err();
        assert!(errors.iter().any(|e| matches!(
            e,
            DefinitionError::UnknownTaskKind { kind, .. } if kind == "Docker"
        )));
        assert!(errors.iter().any(|e| matches!(
            e,
            DefinitionError::MalformedTaskReference { reference, .. } if reference == "NoVersion"
        )));
    }
}
