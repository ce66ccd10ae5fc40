// Variable Resolver
// Scope-chained substitution of $(name) placeholders into literal strings

use std::collections::HashMap;

use thiserror::Error;

use crate::parser::models::{Pipeline, StepAction, Variable};

/// A placeholder referenced a name absent at every scope in the chain.
///
/// Fatal to the run before any stage starts: the whole pipeline is resolved
/// up front by [`resolve_pipeline`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unresolved variable '$({name})' in {context}")]
pub struct UnresolvedVariable {
    /// The name that resolved nowhere
    pub name: String,
    /// Where the placeholder sits in the definition
    pub context: String,
}

/// Ordered lookup over nested variable scopes.
///
/// Scopes are pushed outermost first (pipeline, then stage, then job);
/// lookup walks inner to outer, so a job variable shadows a stage variable
/// which shadows a pipeline variable.
#[derive(Debug, Clone, Default)]
pub struct ScopeChain<'a> {
    layers: Vec<&'a HashMap<String, String>>,
}

impl<'a> ScopeChain<'a> {
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    /// Push a scope; later pushes shadow earlier ones.
    pub fn push(&mut self, scope: &'a HashMap<String, String>) {
        self.layers.push(scope);
    }

    pub fn lookup(&self, name: &str) -> Option<&'a str> {
        self.layers
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).map(String::as_str))
    }

    /// Substitute every `$(name)` placeholder in `template`.
    ///
    /// Single non-recursive pass: resolved values are not re-scanned, so a
    /// variable whose value contains `$(...)` cannot start a substitution
    /// loop. An unterminated `$(` and the empty `$()` are left verbatim.
    pub fn resolve(&self, template: &str, context: &str) -> Result<String, UnresolvedVariable> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find("$(") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match after.find(')') {
                Some(end) if end > 0 => {
                    let name = &after[..end];
                    match self.lookup(name) {
                        Some(value) => out.push_str(value),
                        None => {
                            return Err(UnresolvedVariable {
                                name: name.to_string(),
                                context: context.to_string(),
                            })
                        }
                    }
                    rest = &after[end + 1..];
                }
                Some(_) => {
                    // Empty placeholder "$()": not a reference, keep it.
                    out.push_str("$()");
                    rest = &after[1..];
                }
                None => {
                    out.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }

        out.push_str(rest);
        Ok(out)
    }
}

/// Flatten a declared variable list into a scope map.
/// Duplicates are rejected earlier by validation; last write wins here.
pub fn scope_map(variables: &[Variable]) -> HashMap<String, String> {
    variables
        .iter()
        .map(|v| (v.name.clone(), v.value.clone()))
        .collect()
}

/// Built-in pseudo-variables injected into the pipeline scope at run
/// creation. Ordinary variables otherwise: a pipeline-defined variable of
/// the same name shadows the built-in.
pub fn builtin_variables(run_id: u64, pipeline_name: &str) -> HashMap<String, String> {
    let mut builtins = HashMap::new();
    builtins.insert("run.id".to_string(), run_id.to_string());
    builtins.insert("pipeline.name".to_string(), pipeline_name.to_string());
    builtins
}

/// Materialize a fully-substituted copy of the pipeline: step scripts, task
/// inputs, step env values, and working directories, each resolved against
/// its job → stage → pipeline scope chain.
///
/// Runs after parse and before dispatch, so an unresolved reference fails
/// the run before any stage starts.
pub fn resolve_pipeline(
    pipeline: &Pipeline,
    builtins: &HashMap<String, String>,
) -> Result<Pipeline, UnresolvedVariable> {
    let mut resolved = pipeline.clone();

    let mut pipeline_scope = builtins.clone();
    pipeline_scope.extend(scope_map(&pipeline.variables));

    for stage in &mut resolved.stages {
        let stage_scope = scope_map(&stage.variables);

        for job in &mut stage.jobs {
            let job_scope = scope_map(&job.variables);

            let mut chain = ScopeChain::new();
            chain.push(&pipeline_scope);
            chain.push(&stage_scope);
            chain.push(&job_scope);

            for (index, step) in job.steps.iter_mut().enumerate() {
                let at = |field: &str| {
                    format!(
                        "stages.{}.jobs.{}.steps[{}].{}",
                        stage.stage, job.job, index, field
                    )
                };

                for value in step.env.values_mut() {
                    *value = chain.resolve(value, &at("env"))?;
                }

                match &mut step.action {
                    StepAction::Script(script) => {
                        script.script = chain.resolve(&script.script, &at("script"))?;
                        if let Some(dir) = script.working_directory.take() {
                            script.working_directory =
                                Some(chain.resolve(&dir, &at("workingDirectory"))?);
                        }
                    }
                    StepAction::Task(task) => {
                        for value in task.inputs.values_mut() {
                            *value = chain.resolve(value, &at("inputs"))?;
                        }
                    }
                }
            }
        }
    }

    Ok(resolved)
}
