// Error taxonomy
// Definition-time errors are fatal to starting a run and never retried;
// run-time failures live on result records, not in these types.

use thiserror::Error;

use crate::agent::AgentError;
use crate::variables::UnresolvedVariable;

/// Errors detected at parse/validation time.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("duplicate {kind} name '{name}' at '{path}'")]
    DuplicateName {
        kind: &'static str,
        name: String,
        path: String,
    },

    #[error("{kind} '{name}' depends on unknown {kind} '{dependency}'")]
    UnknownDependency {
        kind: &'static str,
        name: String,
        dependency: String,
    },

    #[error("circular dependency detected: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("unknown task kind '{kind}' at '{path}'")]
    UnknownTaskKind { kind: String, path: String },

    #[error("malformed task reference '{reference}' at '{path}': expected Kind@Version")]
    MalformedTaskReference { reference: String, path: String },

    #[error("{what} at '{path}' has nothing to run")]
    Empty { what: &'static str, path: String },
}

/// Errors that prevent a run from starting.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error(transparent)]
    UnresolvedVariable(#[from] UnresolvedVariable),

    #[error("trigger predicate rejected branch '{branch}'")]
    TriggerRejected { branch: String },

    #[error("agent setup failed: {0}")]
    Agent(#[from] AgentError),
}
