// Pipeline Definition Data Models
// Typed representation of the declarative YAML pipeline schema

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Root pipeline definition.
///
/// Parsed once per definition and immutable afterwards; any number of
/// concurrent runs may share one `Pipeline` read-only.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Pipeline {
    /// Pipeline name
    pub name: Option<String>,

    /// Trigger predicate deciding which branches start a run
    pub trigger: Option<Trigger>,

    /// Pipeline-scoped variables
    #[serde(default, deserialize_with = "deserialize_variables")]
    pub variables: Vec<Variable>,

    /// Default agent pool for all jobs
    pub pool: Option<Pool>,

    /// Ordered stage list
    #[serde(default)]
    pub stages: Vec<Stage>,
}

impl Pipeline {
    /// Evaluate the trigger predicate against a branch name.
    ///
    /// No trigger block means every branch triggers; `trigger: none`
    /// disables automatic runs entirely.
    pub fn should_trigger(&self, branch: &str) -> bool {
        match &self.trigger {
            None => true,
            Some(Trigger::Keyword(TriggerKeyword::None)) => false,
            Some(Trigger::Branches(patterns)) => {
                patterns.iter().any(|p| wildcard_match(p, branch))
            }
            Some(Trigger::Full(config)) => config
                .branches
                .as_ref()
                .map(|filter| filter.matches(branch))
                .unwrap_or(true),
        }
    }

    /// Display name for the pipeline, falling back to "unnamed".
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("unnamed")
    }
}

// =============================================================================
// Trigger
// =============================================================================

/// CI trigger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Trigger {
    /// Simple: trigger: none
    Keyword(TriggerKeyword),
    /// Branch pattern list
    Branches(Vec<String>),
    /// Full configuration with include/exclude filters
    Full(TriggerConfig),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKeyword {
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TriggerConfig {
    pub branches: Option<BranchFilter>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BranchFilter {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl BranchFilter {
    /// A branch matches when it hits the include list (or the include list
    /// is empty) and misses the exclude list. Exclude wins over include.
    pub fn matches(&self, branch: &str) -> bool {
        let included = self.include.is_empty()
            || self.include.iter().any(|p| wildcard_match(p, branch));
        let excluded = self.exclude.iter().any(|p| wildcard_match(p, branch));
        included && !excluded
    }
}

/// Glob-lite matching: `*` matches any run of characters, everything else
/// is literal. Sufficient for branch filters like `release/*`.
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    fn inner(p: &[u8], t: &[u8]) -> bool {
        match p.first() {
            None => t.is_empty(),
            Some(b'*') => inner(&p[1..], t) || (!t.is_empty() && inner(p, &t[1..])),
            Some(c) => t.first() == Some(c) && inner(&p[1..], &t[1..]),
        }
    }
    inner(pattern.as_bytes(), text.as_bytes())
}

// =============================================================================
// Variables
// =============================================================================

/// A named literal value scoped to its enclosing pipeline, stage, or job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    pub value: String,
}

/// Custom deserializer for variables supporting both map and list formats:
///
/// ```yaml
/// variables:
///   tag: v1
/// # or
/// variables:
///   - name: tag
///     value: v1
/// ```
fn deserialize_variables<'de, D>(deserializer: D) -> Result<Vec<Variable>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::{MapAccess, SeqAccess, Visitor};

    struct VariablesVisitor;

    impl<'de> Visitor<'de> for VariablesVisitor {
        type Value = Vec<Variable>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a map of variables or a list of name/value entries")
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: SeqAccess<'de>,
        {
            let mut vars = Vec::new();
            while let Some(var) = seq.next_element::<Variable>()? {
                vars.push(var);
            }
            Ok(vars)
        }

        fn visit_map<M>(self, mut map: M) -> Result<Self::Value, M::Error>
        where
            M: MapAccess<'de>,
        {
            let mut vars = Vec::new();
            while let Some((name, value)) = map.next_entry::<String, String>()? {
                vars.push(Variable { name, value });
            }
            Ok(vars)
        }
    }

    deserializer.deserialize_any(VariablesVisitor)
}

// =============================================================================
// Pool
// =============================================================================

/// Agent pool reference: a bare name or a spec with explicit capacity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Pool {
    /// Named pool: pool: builders
    Name(String),
    /// Full pool spec
    Spec(PoolSpec),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSpec {
    pub name: String,
    /// Maximum concurrent agent leases; unset means the scheduler default
    pub capacity: Option<usize>,
}

impl Pool {
    pub fn name(&self) -> &str {
        match self {
            Pool::Name(name) => name,
            Pool::Spec(spec) => &spec.name,
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        match self {
            Pool::Name(_) => None,
            Pool::Spec(spec) => spec.capacity,
        }
    }
}

// =============================================================================
// Stage
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    /// Stage identifier, unique within the pipeline
    pub stage: String,

    /// Display name in reporting
    pub display_name: Option<String>,

    /// Names of stages that must succeed before this one starts.
    /// Absent means the stage is a root and eligible immediately.
    #[serde(default)]
    pub depends_on: DependsOn,

    /// Stage-scoped variables
    #[serde(default, deserialize_with = "deserialize_variables")]
    pub variables: Vec<Variable>,

    /// Pool override for all jobs in this stage
    pub pool: Option<Pool>,

    /// An optional stage may end Skipped (or Failed) without blocking
    /// overall run success; its failure still skips dependents.
    #[serde(default)]
    pub optional: bool,

    /// Stage timeout; expiry fails the stage
    pub timeout_in_minutes: Option<u64>,

    /// Ordered job list
    #[serde(default)]
    pub jobs: Vec<Job>,
}

// =============================================================================
// Job
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Job identifier, unique within its stage
    pub job: String,

    /// Display name in reporting
    pub display_name: Option<String>,

    /// Names of jobs in the same stage that must succeed first.
    /// Jobs without a dependency between them may run concurrently.
    #[serde(default)]
    pub depends_on: DependsOn,

    /// Job-scoped variables
    #[serde(default, deserialize_with = "deserialize_variables")]
    pub variables: Vec<Variable>,

    /// Pool override for this job
    pub pool: Option<Pool>,

    /// Job timeout; expiry fails the job
    pub timeout_in_minutes: Option<u64>,

    /// Ordered step list, executed strictly in declaration order
    #[serde(default)]
    pub steps: Vec<Step>,
}

// =============================================================================
// DependsOn
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(untagged)]
pub enum DependsOn {
    /// No dependencies declared
    #[default]
    None,
    /// Single dependency
    Single(String),
    /// Multiple dependencies
    Multiple(Vec<String>),
}

impl DependsOn {
    pub fn names(&self) -> Vec<String> {
        match self {
            DependsOn::None => Vec::new(),
            DependsOn::Single(name) => vec![name.clone()],
            DependsOn::Multiple(names) => names.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, DependsOn::None) || matches!(self, DependsOn::Multiple(v) if v.is_empty())
    }
}

// =============================================================================
// Step
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// Step name for result addressing
    pub name: Option<String>,

    /// Display name in reporting
    pub display_name: Option<String>,

    /// Record a failure of this step without failing the enclosing job
    #[serde(default)]
    pub continue_on_error: bool,

    /// Step timeout; expiry is treated as a step failure
    pub timeout_in_minutes: Option<u64>,

    /// Step-level environment overlay, applied for this step only
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// The action to perform (flattened from the step's discriminating key)
    #[serde(flatten)]
    pub action: StepAction,
}

/// The specific action a step performs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepAction {
    /// Script step: - script: echo hello
    Script(ScriptStep),
    /// Task step: - task: CmdLine@2
    Task(TaskStep),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptStep {
    /// Opaque shell text, handed to the agent verbatim after substitution
    pub script: String,
    /// Sets the job's working directory before this step runs; the change
    /// persists for subsequent steps of the same job.
    pub working_directory: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStep {
    /// Typed task reference in `Kind@Version` form
    pub task: String,
    /// Named string inputs for the task handler
    #[serde(default)]
    pub inputs: HashMap<String, String>,
}

impl Step {
    /// Label used in events and result records: explicit name, display name,
    /// or the action's own text as a last resort.
    pub fn label(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        if let Some(display) = &self.display_name {
            return display.clone();
        }
        match &self.action {
            StepAction::Script(s) => {
                s.script.lines().next().unwrap_or_default().trim().to_string()
            }
            StepAction::Task(t) => t.task.clone(),
        }
    }
}
