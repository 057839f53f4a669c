//! Structural validation of workflow definitions
//!
//! Validation runs before any phase executes: duplicate phase names,
//! dangling dependency edges, and dependency cycles are all rejected up
//! front. Agent existence is deliberately not checked here; the registry
//! resolves names lazily at dispatch time.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::workflow::Workflow;

/// A single structural problem found in a workflow definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// Two phases share a name
    DuplicatePhase { name: String },

    /// A `depends_on` entry names a phase that does not exist
    UnknownDependency { phase: String, depends_on: String },

    /// The dependency graph contains a cycle
    DependencyCycle { phases: Vec<String> },

    /// An invocation has an empty agent name
    EmptyAgentName { phase: String, index: usize },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicatePhase { name } => write!(f, "duplicate phase name '{}'", name),
            Self::UnknownDependency { phase, depends_on } => write!(
                f,
                "phase '{}' depends on unknown phase '{}'",
                phase, depends_on
            ),
            Self::DependencyCycle { phases } => {
                write!(f, "dependency cycle: {}", phases.join(" -> "))
            }
            Self::EmptyAgentName { phase, index } => write!(
                f,
                "phase '{}' invocation {} has an empty agent name",
                phase, index
            ),
        }
    }
}

/// Outcome of validating a workflow definition
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    violations: Vec<Violation>,
}

impl ValidationResult {
    /// True when no violations were found
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    /// The violations found, in detection order
    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    fn push(&mut self, violation: Violation) {
        self.violations.push(violation);
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.violations.is_empty() {
            return write!(f, "valid");
        }
        let rendered: Vec<String> = self.violations.iter().map(|v| v.to_string()).collect();
        write!(f, "{}", rendered.join("; "))
    }
}

/// Validate a workflow definition
///
/// Checks phase-name uniqueness, dependency existence, and graph
/// acyclicity. Returns every violation found; an empty result is valid.
pub fn validate(workflow: &Workflow) -> ValidationResult {
    let mut result = ValidationResult::default();

    // (a) unique phase names
    let mut seen = HashSet::new();
    for phase in &workflow.phases {
        if !seen.insert(phase.name.as_str()) {
            result.push(Violation::DuplicatePhase {
                name: phase.name.clone(),
            });
        }
    }

    // (b) every dependency names an existing phase
    for phase in &workflow.phases {
        for dep in &phase.depends_on {
            if !seen.contains(dep.as_str()) {
                result.push(Violation::UnknownDependency {
                    phase: phase.name.clone(),
                    depends_on: dep.clone(),
                });
            }
        }
    }

    // (c) the dependency graph is acyclic
    if let Some(cycle) = find_cycle(workflow) {
        result.push(Violation::DependencyCycle { phases: cycle });
    }

    // (d) invocations carry a resolvable agent name pattern; existence is
    // checked lazily at dispatch
    for phase in &workflow.phases {
        for (index, invocation) in phase.invocations.iter().enumerate() {
            if invocation.agent.trim().is_empty() {
                result.push(Violation::EmptyAgentName {
                    phase: phase.name.clone(),
                    index,
                });
            }
        }
    }

    result
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Depth-first search for a cycle among declared dependencies
///
/// Unknown dependency names are ignored here; they are reported
/// separately as `UnknownDependency`.
fn find_cycle(workflow: &Workflow) -> Option<Vec<String>> {
    let index: HashMap<&str, usize> = workflow
        .phases
        .iter()
        .enumerate()
        .map(|(i, p)| (p.name.as_str(), i))
        .collect();

    let mut marks = vec![Mark::Unvisited; workflow.phases.len()];
    let mut stack = Vec::new();

    fn visit(
        node: usize,
        workflow: &Workflow,
        index: &HashMap<&str, usize>,
        marks: &mut [Mark],
        stack: &mut Vec<usize>,
    ) -> Option<Vec<String>> {
        marks[node] = Mark::InProgress;
        stack.push(node);

        for dep in &workflow.phases[node].depends_on {
            let Some(&next) = index.get(dep.as_str()) else {
                continue;
            };
            match marks[next] {
                Mark::InProgress => {
                    // Close the loop from the first occurrence on the stack
                    let start = stack.iter().position(|&n| n == next).unwrap_or(0);
                    let mut cycle: Vec<String> = stack[start..]
                        .iter()
                        .map(|&n| workflow.phases[n].name.clone())
                        .collect();
                    cycle.push(workflow.phases[next].name.clone());
                    return Some(cycle);
                }
                Mark::Unvisited => {
                    if let Some(cycle) = visit(next, workflow, index, marks, stack) {
                        return Some(cycle);
                    }
                }
                Mark::Done => {}
            }
        }

        stack.pop();
        marks[node] = Mark::Done;
        None
    }

    for node in 0..workflow.phases.len() {
        if marks[node] == Mark::Unvisited {
            if let Some(cycle) = visit(node, workflow, &index, &mut marks, &mut stack) {
                return Some(cycle);
            }
        }
    }

    None
}
