// Task-kind dispatch
// A registry maps task kind strings to handlers; a handler renders a task
// call into shell text the agent executes. Unknown kinds fail fast at
// validation time rather than silently doing nothing.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::agent::AgentError;

/// Parsed `Kind@Version` task reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRef {
    pub kind: String,
    pub version: u32,
}

impl TaskRef {
    /// Parse a `Kind@Version` reference. The kind must be non-empty and the
    /// version a decimal integer.
    pub fn parse(reference: &str) -> Option<Self> {
        let (kind, version) = reference.split_once('@')?;
        if kind.is_empty() {
            return None;
        }
        let version = version.parse().ok()?;
        Some(Self {
            kind: kind.to_string(),
            version,
        })
    }
}

impl fmt::Display for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.kind, self.version)
    }
}

/// One invocation of a typed task: the reference plus resolved inputs.
#[derive(Debug, Clone)]
pub struct TaskCall {
    pub reference: TaskRef,
    pub inputs: HashMap<String, String>,
}

impl TaskCall {
    pub fn required_input(&self, name: &str) -> Result<&str, AgentError> {
        self.inputs
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| AgentError::MissingInput {
                task: self.reference.to_string(),
                input: name.to_string(),
            })
    }
}

/// Renders a task call into shell text.
pub trait TaskHandler: Send + Sync + fmt::Debug {
    /// The kind this handler serves, e.g. "CmdLine".
    fn kind(&self) -> &'static str;

    /// Produce the shell command implementing this call.
    fn render(&self, call: &TaskCall) -> Result<String, AgentError>;
}

/// Registry of task kinds, keyed case-insensitively.
pub struct TaskRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl TaskRegistry {
    /// An empty registry; every task reference will be rejected.
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// The built-in task set: `CmdLine` and `Bash`.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(CmdLineTask));
        registry.register(Arc::new(BashTask));
        registry
    }

    pub fn register(&mut self, handler: Arc<dyn TaskHandler>) {
        self.handlers
            .insert(handler.kind().to_lowercase(), handler);
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.handlers.contains_key(&kind.to_lowercase())
    }

    pub fn handler(&self, kind: &str) -> Result<Arc<dyn TaskHandler>, AgentError> {
        self.handlers
            .get(&kind.to_lowercase())
            .cloned()
            .ok_or_else(|| AgentError::UnknownTaskKind(kind.to_string()))
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// `CmdLine@2`: runs the `script` input through the default shell.
#[derive(Debug)]
struct CmdLineTask;

impl TaskHandler for CmdLineTask {
    fn kind(&self) -> &'static str {
        "CmdLine"
    }

    fn render(&self, call: &TaskCall) -> Result<String, AgentError> {
        Ok(call.required_input("script")?.to_string())
    }
}

/// `Bash@3` with inline target: runs the `script` input under bash.
#[derive(Debug)]
struct BashTask;

impl TaskHandler for BashTask {
    fn kind(&self) -> &'static str {
        "Bash"
    }

    fn render(&self, call: &TaskCall) -> Result<String, AgentError> {
        Ok(call.required_input("script")?.to_string())
    }
}
