//! Workflow definitions and primitives
//!
//! A workflow is a declarative graph of named phases. Each phase carries
//! an execution mode, an ordered list of agent invocations, explicit
//! dependency edges on other phases, and (for conditional phases) a guard
//! predicate over the context.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::condition::Condition;

/// How a phase is scheduled once its dependencies are terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PhaseMode {
    /// Runs concurrently with other parallel phases in the same wavefront
    Parallel,

    /// Runs alone, after every phase declared before it is terminal
    #[default]
    Sequential,

    /// Gated by a predicate evaluated when its dependencies complete
    Conditional,
}

/// A single agent invocation within a phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInvocation {
    /// Name of the agent to resolve (must exist in the registry at dispatch)
    pub agent: String,

    /// Structured input; string values may carry `{key}` placeholders
    /// substituted from the context snapshot
    #[serde(default)]
    pub input: Value,

    /// Context key the invocation's primary output is stored under
    #[serde(default)]
    pub output_key: Option<String>,
}

impl AgentInvocation {
    /// Create an invocation of the named agent
    pub fn new(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            input: Value::Null,
            output_key: None,
        }
    }

    /// Set a string input template
    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = Value::String(input.into());
        self
    }

    /// Set a structured input value
    pub fn with_input_value(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    /// Set the output context key
    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }
}

/// A named unit of work within a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowPhase {
    /// Unique name within the parent workflow
    pub name: String,

    /// Execution mode
    #[serde(default)]
    pub mode: PhaseMode,

    /// Agent invocations, executed in order
    #[serde(default)]
    pub invocations: Vec<AgentInvocation>,

    /// Names of phases that must succeed before this one starts
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Guard predicate for conditional phases
    #[serde(default)]
    pub condition: Option<Condition>,
}

impl WorkflowPhase {
    /// Create a sequential phase
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode: PhaseMode::Sequential,
            invocations: Vec::new(),
            depends_on: Vec::new(),
            condition: None,
        }
    }

    /// Set the execution mode
    pub fn with_mode(mut self, mode: PhaseMode) -> Self {
        self.mode = mode;
        self
    }

    /// Mark the phase parallel
    pub fn parallel(self) -> Self {
        self.with_mode(PhaseMode::Parallel)
    }

    /// Mark the phase conditional with the given guard
    pub fn conditional(mut self, condition: Condition) -> Self {
        self.mode = PhaseMode::Conditional;
        self.condition = Some(condition);
        self
    }

    /// Add an agent invocation
    pub fn with_invocation(mut self, invocation: AgentInvocation) -> Self {
        self.invocations.push(invocation);
        self
    }

    /// Add a dependency edge
    pub fn depends_on(mut self, phase: impl Into<String>) -> Self {
        self.depends_on.push(phase.into());
        self
    }
}

/// A complete workflow definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique identifier for this workflow
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Phases in declaration order
    #[serde(default)]
    pub phases: Vec<WorkflowPhase>,
}

impl Workflow {
    /// Create a new workflow
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            phases: Vec::new(),
        }
    }

    /// Set the description
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    /// Add a phase
    pub fn with_phase(mut self, phase: WorkflowPhase) -> Self {
        self.phases.push(phase);
        self
    }

    /// Look up a phase by name
    pub fn phase(&self, name: &str) -> Option<&WorkflowPhase> {
        self.phases.iter().find(|p| p.name == name)
    }

    /// Load a workflow from a TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self, WorkflowError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| WorkflowError::IoError(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Load a workflow from a TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, WorkflowError> {
        toml::from_str(toml_str).map_err(|e| WorkflowError::ParseError(e.to_string()))
    }
}

/// Workflow-related errors
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Workflow not found: {0}")]
    NotFound(String),
}

/// Collection of built-in workflows
pub fn builtin_workflows() -> HashMap<String, Workflow> {
    let mut workflows = HashMap::new();

    // Implement Feature: plan, implement, then review and test in parallel
    workflows.insert(
        "implement-feature".to_string(),
        Workflow::new("implement-feature")
            .with_description("Plan, implement, and verify a new feature")
            .with_phase(
                WorkflowPhase::new("plan").with_invocation(
                    AgentInvocation::new("planner")
                        .with_input("Analyze and plan: {task}")
                        .with_output_key("plan"),
                ),
            )
            .with_phase(
                WorkflowPhase::new("implement")
                    .depends_on("plan")
                    .with_invocation(
                        AgentInvocation::new("implementer")
                            .with_input("Implement based on plan:\n\n{plan}")
                            .with_output_key("changes"),
                    ),
            )
            .with_phase(
                WorkflowPhase::new("review")
                    .parallel()
                    .depends_on("implement")
                    .with_invocation(
                        AgentInvocation::new("reviewer")
                            .with_input("Review the changes:\n\n{changes}")
                            .with_output_key("review"),
                    ),
            )
            .with_phase(
                WorkflowPhase::new("test")
                    .parallel()
                    .depends_on("implement")
                    .with_invocation(
                        AgentInvocation::new("tester")
                            .with_input("Test the changes:\n\n{changes}")
                            .with_output_key("test_results"),
                    ),
            ),
    );

    // Fix Bug: investigate, fix only when a cause was found, then verify
    workflows.insert(
        "fix-bug".to_string(),
        Workflow::new("fix-bug")
            .with_description("Investigate, fix, and verify a bug")
            .with_phase(
                WorkflowPhase::new("investigate").with_invocation(
                    AgentInvocation::new("investigator")
                        .with_input("Investigate: {task}")
                        .with_output_key("investigation"),
                ),
            )
            .with_phase(
                WorkflowPhase::new("fix")
                    .depends_on("investigate")
                    .conditional(Condition::key_exists("investigation"))
                    .with_invocation(
                        AgentInvocation::new("implementer")
                            .with_input("Fix based on investigation:\n\n{investigation}")
                            .with_output_key("changes"),
                    ),
            )
            .with_phase(
                WorkflowPhase::new("verify")
                    .depends_on("fix")
                    .with_invocation(
                        AgentInvocation::new("tester")
                            .with_input("Verify the fix:\n\n{changes}")
                            .with_output_key("test_results"),
                    ),
            ),
    );

    // Quick Fix: implement and verify, no planning
    workflows.insert(
        "quick-fix".to_string(),
        Workflow::new("quick-fix")
            .with_description("Quick fix without planning - for simple changes")
            .with_phase(
                WorkflowPhase::new("change").with_invocation(
                    AgentInvocation::new("implementer")
                        .with_input("Make this change: {task}")
                        .with_output_key("changes"),
                ),
            )
            .with_phase(
                WorkflowPhase::new("verify")
                    .depends_on("change")
                    .with_invocation(
                        AgentInvocation::new("tester")
                            .with_input("Verify the change:\n\n{changes}")
                            .with_output_key("test_results"),
                    ),
            ),
    );

    workflows
}

/// Load custom workflows from a directory of TOML files
///
/// Malformed workflows are logged as warnings and skipped, never fatal.
pub fn load_workflows(dir: &Path) -> Result<HashMap<String, Workflow>, WorkflowError> {
    let mut workflows = HashMap::new();

    if !dir.exists() {
        return Ok(workflows);
    }

    let entries = std::fs::read_dir(dir).map_err(|e| WorkflowError::IoError(e.to_string()))?;

    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "toml") {
            match Workflow::from_toml_file(&path) {
                Ok(workflow) => {
                    workflows.insert(workflow.name.clone(), workflow);
                }
                Err(e) => {
                    tracing::warn!("Failed to load workflow from {:?}: {}", path, e);
                }
            }
        }
    }

    Ok(workflows)
}
