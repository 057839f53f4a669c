//! Workflow execution engine
//!
//! Executes multi-phase workflows with:
//! - Dependency-aware wavefront scheduling
//! - Parallel phase execution on context snapshots
//! - Conditional phase gating
//! - Context propagation between phases
//! - Transitive skip on upstream failure
//!
//! The engine is the sole writer of the live context. Parallel phases in
//! one wavefront read a snapshot taken at dispatch and their output merges
//! are applied serially, in declaration order, after the wavefront
//! completes.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::context::WorkflowContext;
use crate::invoker::{AgentInvoker, InvocationError, TemplateInvoker};
use crate::registry::{AgentRegistry, RegistryError};
use crate::validate::{validate, ValidationResult};
use crate::workflow::{
    builtin_workflows, load_workflows, PhaseMode, Workflow, WorkflowPhase,
};

/// Per-phase execution status
///
/// `pending -> {skipped | running -> {succeeded | failed}}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    Running,
    Skipped,
    Succeeded,
    Failed,
}

impl PhaseStatus {
    /// Whether the phase can no longer change state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Skipped | Self::Succeeded | Self::Failed)
    }
}

/// Overall verdict of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every phase succeeded or was skipped, with at least one success
    Succeeded,
    Failed,
}

/// Aggregate quality metrics for one run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunMetrics {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    pub phase_durations_ms: HashMap<String, u64>,
}

/// Terminal record of one workflow run, emitted to the caller
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowRun {
    pub id: String,
    pub workflow_name: String,
    pub status: RunStatus,
    pub phase_statuses: HashMap<String, PhaseStatus>,
    pub context: WorkflowContext,
    pub metrics: RunMetrics,
    pub started_at: DateTime<Utc>,
}

/// Errors that abort a run
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid workflow definition: {0}")]
    DefinitionInvalid(ValidationResult),

    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("phase '{phase}' references unknown agent '{agent}'")]
    AgentNotFound { phase: String, agent: String },

    #[error("fatal invocation failure in phase '{phase}': {source}")]
    FatalInvocation {
        phase: String,
        #[source]
        source: InvocationError,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

/// Configuration for the workflow engine
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Default per-invocation timeout; none unless configured.
    /// Per-agent `timeout_secs` overrides this.
    pub invocation_timeout: Option<Duration>,

    /// Directory for custom workflow files
    pub custom_workflows_dir: Option<PathBuf>,
}

/// Outcome of one phase's invocations
enum PhaseOutcome {
    /// All invocations succeeded; outputs to merge into the context
    Succeeded(HashMap<String, Value>),
    /// A recoverable invocation failure; the run continues
    Failed(String),
}

/// Workflow execution engine
pub struct WorkflowEngine {
    /// Agent registry, read-only for the duration of any run
    registry: Arc<AgentRegistry>,

    /// External executor boundary
    invoker: Arc<dyn AgentInvoker>,

    /// Engine configuration
    config: EngineConfig,

    /// Built-in workflows
    builtin_workflows: HashMap<String, Workflow>,

    /// Custom workflows loaded from files
    custom_workflows: HashMap<String, Workflow>,
}

impl WorkflowEngine {
    /// Create a new workflow engine
    pub fn new(
        registry: Arc<AgentRegistry>,
        invoker: Arc<dyn AgentInvoker>,
        config: EngineConfig,
    ) -> Self {
        let mut custom_workflows = HashMap::new();
        if let Some(ref dir) = config.custom_workflows_dir {
            match load_workflows(dir) {
                Ok(workflows) => custom_workflows = workflows,
                Err(e) => tracing::warn!("Failed to load custom workflows: {}", e),
            }
        }

        Self {
            registry,
            invoker,
            config,
            builtin_workflows: builtin_workflows(),
            custom_workflows,
        }
    }

    /// Create an engine with the built-in registry and template invoker
    pub fn with_defaults() -> Self {
        Self::new(
            Arc::new(AgentRegistry::with_builtin()),
            Arc::new(TemplateInvoker),
            EngineConfig::default(),
        )
    }

    /// Get a workflow by name (checks custom first, then built-in)
    pub fn get_workflow(&self, name: &str) -> Option<&Workflow> {
        self.custom_workflows
            .get(name)
            .or_else(|| self.builtin_workflows.get(name))
    }

    /// List all available workflows as (name, description, is_custom)
    pub fn list_workflows(&self) -> Vec<(&str, &str, bool)> {
        let mut workflows: Vec<_> = self
            .builtin_workflows
            .iter()
            .map(|(name, w)| (name.as_str(), w.description.as_str(), false))
            .collect();

        workflows.extend(
            self.custom_workflows
                .iter()
                .map(|(name, w)| (name.as_str(), w.description.as_str(), true)),
        );

        workflows.sort_by_key(|(name, _, _)| *name);
        workflows
    }

    /// Run a workflow by name
    pub async fn run(
        &self,
        workflow_name: &str,
        initial: HashMap<String, Value>,
    ) -> Result<WorkflowRun, EngineError> {
        let workflow = self
            .get_workflow(workflow_name)
            .ok_or_else(|| EngineError::WorkflowNotFound(workflow_name.to_string()))?
            .clone();

        self.execute(&workflow, initial).await
    }

    /// Execute a workflow with the given initial context values
    ///
    /// Validation failures abort before any phase runs. Recoverable
    /// invocation failures mark their phase failed and skip its
    /// dependents; fatal failures cancel in-flight phases and surface as
    /// an error with no run record.
    pub async fn execute(
        &self,
        workflow: &Workflow,
        initial: HashMap<String, Value>,
    ) -> Result<WorkflowRun, EngineError> {
        let report = validate(workflow);
        if !report.is_valid() {
            return Err(EngineError::DefinitionInvalid(report));
        }

        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let started = Instant::now();
        tracing::info!(run = %run_id, workflow = %workflow.name, "starting workflow run");

        let phases = &workflow.phases;
        let index: HashMap<&str, usize> = phases
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name.as_str(), i))
            .collect();
        let dependents = transitive_dependents(workflow, &index);

        let mut context = WorkflowContext::from_values(initial);
        let mut statuses = vec![PhaseStatus::Pending; phases.len()];
        let mut durations: HashMap<String, u64> = HashMap::new();

        while statuses.iter().any(|s| *s == PhaseStatus::Pending) {
            // Readiness wavefront: pending phases with all dependencies terminal
            let ready: Vec<usize> = (0..phases.len())
                .filter(|&i| {
                    statuses[i] == PhaseStatus::Pending
                        && phases[i]
                            .depends_on
                            .iter()
                            .all(|d| statuses[index[d.as_str()]].is_terminal())
                })
                .collect();

            if ready.is_empty() {
                // Unreachable after validation; a cycle would have been rejected
                return Err(EngineError::Internal(
                    "no phase is ready but pending phases remain".to_string(),
                ));
            }

            let mut progressed = false;
            let mut runnable = Vec::new();

            for &i in &ready {
                let phase = &phases[i];

                // A failed or skipped dependency skips the phase; the skip
                // propagates transitively since skipped is terminal
                let deps_succeeded = phase
                    .depends_on
                    .iter()
                    .all(|d| statuses[index[d.as_str()]] == PhaseStatus::Succeeded);
                if !deps_succeeded {
                    tracing::debug!(phase = %phase.name, "skipped: dependency not succeeded");
                    statuses[i] = PhaseStatus::Skipped;
                    progressed = true;
                    continue;
                }

                // Conditional guard, evaluated exactly once, at the moment
                // all dependencies are terminal
                if phase.mode == PhaseMode::Conditional {
                    let passes = phase
                        .condition
                        .as_ref()
                        .map(|c| c.evaluate(&context))
                        .unwrap_or(true);
                    if !passes {
                        tracing::debug!(phase = %phase.name, "skipped: condition false");
                        statuses[i] = PhaseStatus::Skipped;
                        progressed = true;
                        continue;
                    }
                }

                runnable.push(i);
            }

            let (parallel, serial): (Vec<usize>, Vec<usize>) = runnable
                .into_iter()
                .partition(|&i| phases[i].mode == PhaseMode::Parallel);

            // Parallel batch: concurrent tasks on context snapshots, merges
            // queued and applied in declaration order after the batch
            if !parallel.is_empty() {
                progressed = true;
                let mut set = JoinSet::new();
                for &i in &parallel {
                    statuses[i] = PhaseStatus::Running;
                    let phase = phases[i].clone();
                    let snapshot = context.snapshot();
                    let registry = Arc::clone(&self.registry);
                    let invoker = Arc::clone(&self.invoker);
                    let timeout = self.config.invocation_timeout;
                    set.spawn(async move {
                        let start = Instant::now();
                        let result = run_phase(&phase, &snapshot, registry, invoker, timeout).await;
                        (i, result, start.elapsed().as_millis() as u64)
                    });
                }

                let mut merges: Vec<(usize, HashMap<String, Value>)> = Vec::new();
                while let Some(joined) = set.join_next().await {
                    let (i, result, elapsed) =
                        joined.map_err(|e| EngineError::Internal(e.to_string()))?;
                    durations.insert(phases[i].name.clone(), elapsed);
                    match result {
                        Ok(PhaseOutcome::Succeeded(outputs)) => {
                            statuses[i] = PhaseStatus::Succeeded;
                            merges.push((i, outputs));
                        }
                        Ok(PhaseOutcome::Failed(reason)) => {
                            tracing::warn!(phase = %phases[i].name, "phase failed: {}", reason);
                            statuses[i] = PhaseStatus::Failed;
                        }
                        Err(e) => {
                            // Fatal: cancel in-flight phases, apply none of
                            // the queued merges
                            set.abort_all();
                            return Err(e);
                        }
                    }
                }

                merges.sort_by_key(|(i, _)| *i);
                for (_, outputs) in merges {
                    context.merge(outputs);
                }
            }

            // Serial batch, in declaration order. A sequential phase also
            // waits for every phase declared before it (its own dependents
            // excepted, so declaration order cannot deadlock a valid graph).
            let mut deferred = Vec::new();
            for &i in &serial {
                if phases[i].mode == PhaseMode::Sequential
                    && !prior_phases_terminal(i, &statuses, &dependents)
                {
                    deferred.push(i);
                    continue;
                }
                progressed = true;
                self.dispatch_serial(i, phases, &mut statuses, &mut durations, &mut context)
                    .await?;
            }

            // Guarantee forward progress on definitions whose declaration
            // order is inconsistent with their dependency edges
            if !progressed {
                if let Some(&i) = deferred.first() {
                    self.dispatch_serial(i, phases, &mut statuses, &mut durations, &mut context)
                        .await?;
                }
            }
        }

        let metrics = RunMetrics {
            succeeded: statuses
                .iter()
                .filter(|s| **s == PhaseStatus::Succeeded)
                .count(),
            failed: statuses
                .iter()
                .filter(|s| **s == PhaseStatus::Failed)
                .count(),
            skipped: statuses
                .iter()
                .filter(|s| **s == PhaseStatus::Skipped)
                .count(),
            duration_ms: started.elapsed().as_millis() as u64,
            phase_durations_ms: durations,
        };

        let status = if metrics.failed == 0 && metrics.succeeded > 0 {
            RunStatus::Succeeded
        } else {
            RunStatus::Failed
        };

        tracing::info!(
            run = %run_id,
            workflow = %workflow.name,
            ?status,
            succeeded = metrics.succeeded,
            failed = metrics.failed,
            skipped = metrics.skipped,
            "workflow run finished"
        );

        Ok(WorkflowRun {
            id: run_id,
            workflow_name: workflow.name.clone(),
            status,
            phase_statuses: phases
                .iter()
                .zip(&statuses)
                .map(|(p, s)| (p.name.clone(), *s))
                .collect(),
            context,
            metrics,
            started_at,
        })
    }

    /// Run one serial phase to completion and merge its outputs
    async fn dispatch_serial(
        &self,
        i: usize,
        phases: &[WorkflowPhase],
        statuses: &mut [PhaseStatus],
        durations: &mut HashMap<String, u64>,
        context: &mut WorkflowContext,
    ) -> Result<(), EngineError> {
        statuses[i] = PhaseStatus::Running;
        let start = Instant::now();
        let result = run_phase(
            &phases[i],
            &context.snapshot(),
            Arc::clone(&self.registry),
            Arc::clone(&self.invoker),
            self.config.invocation_timeout,
        )
        .await;
        durations.insert(phases[i].name.clone(), start.elapsed().as_millis() as u64);

        match result {
            Ok(PhaseOutcome::Succeeded(outputs)) => {
                context.merge(outputs);
                statuses[i] = PhaseStatus::Succeeded;
                Ok(())
            }
            Ok(PhaseOutcome::Failed(reason)) => {
                tracing::warn!(phase = %phases[i].name, "phase failed: {}", reason);
                statuses[i] = PhaseStatus::Failed;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Execute all invocations of one phase against a context snapshot
///
/// Returns the merged outputs on success, a recoverable failure as
/// `PhaseOutcome::Failed`, and fatal failures (unresolvable agent,
/// contract violation) as an error.
async fn run_phase(
    phase: &WorkflowPhase,
    snapshot: &WorkflowContext,
    registry: Arc<AgentRegistry>,
    invoker: Arc<dyn AgentInvoker>,
    default_timeout: Option<Duration>,
) -> Result<PhaseOutcome, EngineError> {
    let mut outputs = HashMap::new();

    for invocation in &phase.invocations {
        let agent = match registry.resolve(&invocation.agent) {
            Ok(agent) => agent,
            Err(RegistryError::AgentNotFound(agent)) => {
                return Err(EngineError::AgentNotFound {
                    phase: phase.name.clone(),
                    agent,
                });
            }
            Err(e) => {
                return Err(EngineError::FatalInvocation {
                    phase: phase.name.clone(),
                    source: InvocationError::Contract(e.to_string()),
                });
            }
        };

        let timeout = agent
            .timeout_secs
            .map(Duration::from_secs)
            .or(default_timeout);

        let fut = invoker.invoke(agent, invocation, snapshot);
        let result = match timeout {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(result) => result,
                Err(_) => Err(InvocationError::Timeout(limit)),
            },
            None => fut.await,
        };

        match result {
            Ok(output) => outputs.extend(output.values),
            Err(e) if e.is_fatal() => {
                return Err(EngineError::FatalInvocation {
                    phase: phase.name.clone(),
                    source: e,
                });
            }
            Err(e) => {
                tracing::warn!(
                    phase = %phase.name,
                    agent = %invocation.agent,
                    "invocation failed: {}", e
                );
                return Ok(PhaseOutcome::Failed(e.to_string()));
            }
        }
    }

    Ok(PhaseOutcome::Succeeded(outputs))
}

/// For each phase, the set of phases that transitively depend on it
fn transitive_dependents(
    workflow: &Workflow,
    index: &HashMap<&str, usize>,
) -> Vec<HashSet<usize>> {
    let n = workflow.phases.len();
    let mut direct: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, phase) in workflow.phases.iter().enumerate() {
        for dep in &phase.depends_on {
            if let Some(&d) = index.get(dep.as_str()) {
                direct[d].push(i);
            }
        }
    }

    let mut result = vec![HashSet::new(); n];
    for start in 0..n {
        let mut queue = direct[start].clone();
        while let Some(node) = queue.pop() {
            if result[start].insert(node) {
                queue.extend(direct[node].iter().copied());
            }
        }
    }
    result
}

/// Whether every phase declared before `i` (excluding phases that depend
/// on `i`) has reached a terminal state
fn prior_phases_terminal(
    i: usize,
    statuses: &[PhaseStatus],
    dependents: &[HashSet<usize>],
) -> bool {
    (0..i).all(|j| statuses[j].is_terminal() || dependents[i].contains(&j))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::Condition;
    use crate::invoker::InvocationOutput;
    use crate::registry::AgentDefinition;
    use crate::workflow::AgentInvocation;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Invoker that records dispatch order and fails or stalls on demand
    #[derive(Default)]
    struct ScriptedInvoker {
        calls: Mutex<Vec<String>>,
        fail: HashSet<String>,
        fatal: HashSet<String>,
        delay: HashMap<String, Duration>,
    }

    impl ScriptedInvoker {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AgentInvoker for ScriptedInvoker {
        async fn invoke(
            &self,
            agent: &AgentDefinition,
            invocation: &AgentInvocation,
            _context: &WorkflowContext,
        ) -> Result<InvocationOutput, InvocationError> {
            self.calls.lock().unwrap().push(agent.name.clone());

            if let Some(delay) = self.delay.get(&agent.name) {
                tokio::time::sleep(*delay).await;
            }
            if self.fatal.contains(&agent.name) {
                return Err(InvocationError::Contract("malformed invocation".into()));
            }
            if self.fail.contains(&agent.name) {
                return Err(InvocationError::Failed("agent error".into()));
            }

            match &invocation.output_key {
                Some(key) => Ok(InvocationOutput::single(
                    key.clone(),
                    json!(format!("{} output", agent.name)),
                )),
                None => Ok(InvocationOutput::empty()),
            }
        }
    }

    fn registry_with(agents: &[&str]) -> Arc<AgentRegistry> {
        let mut registry = AgentRegistry::new();
        for agent in agents {
            registry
                .register(AgentDefinition::new(*agent, "test agent"))
                .unwrap();
        }
        Arc::new(registry)
    }

    fn engine(
        registry: Arc<AgentRegistry>,
        invoker: Arc<dyn AgentInvoker>,
        config: EngineConfig,
    ) -> WorkflowEngine {
        WorkflowEngine::new(registry, invoker, config)
    }

    fn phase(name: &str, agent: &str, deps: &[&str]) -> WorkflowPhase {
        let mut phase = WorkflowPhase::new(name)
            .with_invocation(AgentInvocation::new(agent).with_output_key(name));
        for dep in deps {
            phase = phase.depends_on(*dep);
        }
        phase
    }

    #[tokio::test]
    async fn test_cyclic_definition_never_executes() {
        let invoker = Arc::new(ScriptedInvoker::default());
        let engine = engine(
            registry_with(&["a", "b"]),
            invoker.clone(),
            EngineConfig::default(),
        );

        let workflow = Workflow::new("cyclic")
            .with_phase(phase("one", "a", &["two"]))
            .with_phase(phase("two", "b", &["one"]));

        let err = engine.execute(&workflow, HashMap::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::DefinitionInvalid(_)));
        assert!(invoker.calls().is_empty());
    }

    #[tokio::test]
    async fn test_phases_wait_for_dependencies() {
        let invoker = Arc::new(ScriptedInvoker::default());
        let engine = engine(
            registry_with(&["a", "b", "c"]),
            invoker.clone(),
            EngineConfig::default(),
        );

        let workflow = Workflow::new("chain")
            .with_phase(phase("first", "a", &[]))
            .with_phase(phase("second", "b", &["first"]))
            .with_phase(phase("third", "c", &["second"]));

        let run = engine.execute(&workflow, HashMap::new()).await.unwrap();

        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(invoker.calls(), vec!["a", "b", "c"]);
        assert!(run.phase_statuses.values().all(|s| s.is_terminal()));
        assert_eq!(run.metrics.succeeded, 3);
    }

    #[tokio::test]
    async fn test_failure_skips_dependents_transitively() {
        let invoker = Arc::new(ScriptedInvoker {
            fail: HashSet::from(["a".to_string()]),
            ..Default::default()
        });
        let engine = engine(
            registry_with(&["a", "b", "c"]),
            invoker.clone(),
            EngineConfig::default(),
        );

        let workflow = Workflow::new("fail-chain")
            .with_phase(phase("first", "a", &[]))
            .with_phase(phase("second", "b", &["first"]))
            .with_phase(phase("third", "c", &["second"]));

        let run = engine.execute(&workflow, HashMap::new()).await.unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.phase_statuses["first"], PhaseStatus::Failed);
        assert_eq!(run.phase_statuses["second"], PhaseStatus::Skipped);
        assert_eq!(run.phase_statuses["third"], PhaseStatus::Skipped);
        // Skipped phases never dispatch
        assert_eq!(invoker.calls(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_conditional_false_skips_and_evaluates_once() {
        let evaluations = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&evaluations);

        let workflow = Workflow::new("gated")
            .with_phase(phase("first", "a", &[]))
            .with_phase(
                phase("gate", "b", &["first"]).conditional(Condition::custom(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    false
                })),
            )
            .with_phase(phase("after", "c", &["gate"]));

        let invoker = Arc::new(ScriptedInvoker::default());
        let engine = engine(
            registry_with(&["a", "b", "c"]),
            invoker.clone(),
            EngineConfig::default(),
        );

        let run = engine.execute(&workflow, HashMap::new()).await.unwrap();

        assert_eq!(evaluations.load(Ordering::SeqCst), 1);
        assert_eq!(run.phase_statuses["gate"], PhaseStatus::Skipped);
        assert_eq!(run.phase_statuses["after"], PhaseStatus::Skipped);
        // One success among skips still counts as an overall success
        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(invoker.calls(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_parallel_merge_is_declaration_ordered() {
        // Both parallel phases write the same key; the later-declared
        // phase wins deterministically
        let workflow = Workflow::new("race")
            .with_phase(
                WorkflowPhase::new("left").parallel().with_invocation(
                    AgentInvocation::new("a")
                        .with_input("from-left")
                        .with_output_key("winner"),
                ),
            )
            .with_phase(
                WorkflowPhase::new("right").parallel().with_invocation(
                    AgentInvocation::new("b")
                        .with_input("from-right")
                        .with_output_key("winner"),
                ),
            );

        let engine = engine(
            registry_with(&["a", "b"]),
            Arc::new(TemplateInvoker),
            EngineConfig::default(),
        );

        for _ in 0..8 {
            let run = engine.execute(&workflow, HashMap::new()).await.unwrap();
            assert_eq!(run.context.get("winner"), Some(&json!("from-right")));
        }
    }

    #[tokio::test]
    async fn test_conditional_chain_scenario() {
        // A writes x=1; B is conditional on x == 1 and writes y=2; C is
        // sequential after B. All three succeed.
        let workflow = Workflow::new("scenario")
            .with_phase(
                WorkflowPhase::new("a").with_invocation(
                    AgentInvocation::new("writer")
                        .with_input_value(json!(1))
                        .with_output_key("x"),
                ),
            )
            .with_phase(
                WorkflowPhase::new("b")
                    .depends_on("a")
                    .conditional(Condition::equals("x", json!(1)))
                    .with_invocation(
                        AgentInvocation::new("writer")
                            .with_input_value(json!(2))
                            .with_output_key("y"),
                    ),
            )
            .with_phase(
                WorkflowPhase::new("c")
                    .depends_on("b")
                    .with_invocation(AgentInvocation::new("writer")),
            );

        let engine = engine(
            registry_with(&["writer"]),
            Arc::new(TemplateInvoker),
            EngineConfig::default(),
        );

        let run = engine.execute(&workflow, HashMap::new()).await.unwrap();

        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(run.phase_statuses["a"], PhaseStatus::Succeeded);
        assert_eq!(run.phase_statuses["b"], PhaseStatus::Succeeded);
        assert_eq!(run.phase_statuses["c"], PhaseStatus::Succeeded);
        assert_eq!(run.context.get("x"), Some(&json!(1)));
        assert_eq!(run.context.get("y"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn test_unknown_agent_aborts_run() {
        let engine = engine(
            registry_with(&["a"]),
            Arc::new(ScriptedInvoker::default()),
            EngineConfig::default(),
        );

        let workflow = Workflow::new("missing").with_phase(phase("only", "ghost", &[]));

        let err = engine.execute(&workflow, HashMap::new()).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::AgentNotFound { ref agent, .. } if agent == "ghost"
        ));
    }

    #[tokio::test]
    async fn test_fatal_invocation_aborts_run() {
        let invoker = Arc::new(ScriptedInvoker {
            fatal: HashSet::from(["bad".to_string()]),
            ..Default::default()
        });
        let engine = engine(
            registry_with(&["good", "bad"]),
            invoker,
            EngineConfig::default(),
        );

        let workflow = Workflow::new("fatal")
            .with_phase(phase("fine", "good", &[]).parallel())
            .with_phase(phase("broken", "bad", &[]).parallel());

        let err = engine.execute(&workflow, HashMap::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::FatalInvocation { .. }));
    }

    #[tokio::test]
    async fn test_invocation_timeout_is_recoverable() {
        let invoker = Arc::new(ScriptedInvoker {
            delay: HashMap::from([("slow".to_string(), Duration::from_secs(5))]),
            ..Default::default()
        });
        let engine = engine(
            registry_with(&["slow", "fast"]),
            invoker,
            EngineConfig {
                invocation_timeout: Some(Duration::from_millis(50)),
                ..Default::default()
            },
        );

        let workflow = Workflow::new("timeouts")
            .with_phase(phase("stuck", "slow", &[]))
            .with_phase(phase("after", "fast", &["stuck"]));

        let run = engine.execute(&workflow, HashMap::new()).await.unwrap();

        assert_eq!(run.phase_statuses["stuck"], PhaseStatus::Failed);
        assert_eq!(run.phase_statuses["after"], PhaseStatus::Skipped);
        assert_eq!(run.status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_sequential_waits_for_prior_declared_phases() {
        // "tail" has no dependencies but is declared after "mid", so it
        // must not start until "mid" (and "start") are terminal
        let workflow = Workflow::new("barrier")
            .with_phase(phase("start", "a", &[]))
            .with_phase(phase("mid", "b", &["start"]).parallel())
            .with_phase(phase("tail", "c", &[]));

        let invoker = Arc::new(ScriptedInvoker {
            delay: HashMap::from([("b".to_string(), Duration::from_millis(50))]),
            ..Default::default()
        });
        let engine = engine(
            registry_with(&["a", "b", "c"]),
            invoker.clone(),
            EngineConfig::default(),
        );

        let run = engine.execute(&workflow, HashMap::new()).await.unwrap();

        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(invoker.calls(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_backward_declared_dependencies_terminate() {
        // Declaration order inconsistent with the edges: the first phase
        // depends on the last-declared one, and two independent
        // sequential phases sit in between. Every phase still reaches a
        // terminal state.
        let workflow = Workflow::new("backward")
            .with_phase(phase("consumer", "a", &["producer"]))
            .with_phase(phase("bystander", "b", &[]))
            .with_phase(phase("producer", "c", &[]));

        let invoker = Arc::new(ScriptedInvoker::default());
        let engine = engine(
            registry_with(&["a", "b", "c"]),
            invoker.clone(),
            EngineConfig::default(),
        );

        let run = engine.execute(&workflow, HashMap::new()).await.unwrap();

        assert_eq!(run.status, RunStatus::Succeeded);
        assert!(run.phase_statuses.values().all(|s| s.is_terminal()));
        assert_eq!(run.metrics.succeeded, 3);
        // "producer" must still run before its dependent
        let calls = invoker.calls();
        let producer = calls.iter().position(|c| c == "c").unwrap();
        let consumer = calls.iter().position(|c| c == "a").unwrap();
        assert!(producer < consumer);
    }

    #[tokio::test]
    async fn test_custom_workflows_dir_is_listed_and_resolvable() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("site-deploy.toml"),
            "name = \"site-deploy\"\ndescription = \"Deploy the site\"\n\n[[phases]]\nname = \"ship\"\n",
        )
        .unwrap();

        let engine = WorkflowEngine::new(
            registry_with(&["a"]),
            Arc::new(TemplateInvoker),
            EngineConfig {
                custom_workflows_dir: Some(dir.path().to_path_buf()),
                ..Default::default()
            },
        );

        assert!(engine.get_workflow("site-deploy").is_some());
        let listed = engine
            .list_workflows()
            .into_iter()
            .find(|(name, _, _)| *name == "site-deploy");
        assert_eq!(listed, Some(("site-deploy", "Deploy the site", true)));
    }

    #[tokio::test]
    async fn test_run_by_name_resolves_builtin() {
        let engine = WorkflowEngine::with_defaults();

        let mut initial = HashMap::new();
        initial.insert("task".to_string(), json!("add dark mode"));

        let run = engine.run("quick-fix", initial).await.unwrap();

        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(
            run.context.get("changes"),
            Some(&json!("Make this change: add dark mode"))
        );
    }

    #[tokio::test]
    async fn test_unknown_workflow_name() {
        let engine = WorkflowEngine::with_defaults();
        let err = engine.run("no-such-workflow", HashMap::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::WorkflowNotFound(_)));
    }
}
