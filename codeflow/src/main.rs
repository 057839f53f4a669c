//! Codeflow CLI
//!
//! Provides workflow orchestration commands.
//!
//! Usage:
//!   codeflow workflow run implement-feature --task "Add dark mode"
//!   codeflow workflow list
//!   codeflow workflow show implement-feature
//!   codeflow workflow validate my-workflow.toml
//!   codeflow agents list
//!   codeflow agents show planner

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use codeflow::config::FileConfig;
use codeflow::engine::{EngineConfig, WorkflowEngine};
use codeflow::invoker::TemplateInvoker;
use codeflow::registry::AgentRegistry;
use codeflow::validate::validate;
use codeflow::workflow::Workflow;

#[derive(Parser)]
#[command(name = "codeflow")]
#[command(about = "Multi-phase workflow orchestration")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Project root to scan for project-scoped agents
    #[arg(long, env = "CODEFLOW_PROJECT", global = true)]
    project: Option<PathBuf>,

    /// Increase verbosity (-v info, -vv debug, -vvv trace). Default is warn.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Workflow management and execution
    Workflow {
        #[command(subcommand)]
        command: WorkflowCommands,
    },
    /// Agent management
    Agents {
        #[command(subcommand)]
        command: AgentCommands,
    },
}

#[derive(Subcommand)]
enum WorkflowCommands {
    /// Run a workflow
    Run {
        /// Workflow name (e.g., "implement-feature", "fix-bug")
        workflow: String,

        /// Task description, stored under the "task" context key
        #[arg(long, short)]
        task: Option<String>,

        /// Additional initial context entries as key=value (value parsed
        /// as JSON when possible, otherwise kept as a string)
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,

        /// Directory for custom workflow files
        #[arg(long)]
        workflows_dir: Option<PathBuf>,

        /// Per-invocation timeout in seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// List available workflows
    List {
        /// Directory for custom workflow files
        #[arg(long)]
        workflows_dir: Option<PathBuf>,
    },
    /// Show workflow definition
    Show {
        /// Workflow name
        workflow: String,

        /// Directory for custom workflow files
        #[arg(long)]
        workflows_dir: Option<PathBuf>,
    },
    /// Validate a workflow TOML file
    Validate {
        /// Path to a workflow TOML file
        path: PathBuf,
    },
}

#[derive(Subcommand)]
enum AgentCommands {
    /// List available agents
    List,
    /// Show agent definition
    Show {
        /// Agent name
        agent: String,
    },
}

/// Initialize tracing with the given verbosity level
///
/// - 0: warn (default)
/// - 1: info (-v)
/// - 2: debug (-vv)
/// - 3+: trace (-vvv)
fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    // Allow RUST_LOG to override if set
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string()));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();
}

/// Build the agent registry: built-ins, then project-scoped overrides
fn build_registry(project: Option<&PathBuf>, file_config: &FileConfig) -> Result<AgentRegistry> {
    let mut registry = AgentRegistry::with_builtin();

    let project_root = project
        .cloned()
        .or_else(|| file_config.project.root.clone())
        .or_else(|| std::env::current_dir().ok());

    if let Some(root) = project_root {
        let registered = registry.load_project(&root)?;
        if registered > 0 {
            tracing::info!("Loaded {} project agent(s) from {}", registered, root.display());
        }
    }

    Ok(registry)
}

/// Resolve engine settings: CLI flags first, then `.codeflow.toml`
fn resolve_engine_config(
    workflows_dir: Option<PathBuf>,
    timeout_secs: Option<u64>,
    file_config: &FileConfig,
) -> EngineConfig {
    EngineConfig {
        invocation_timeout: timeout_secs
            .map(Duration::from_secs)
            .or_else(|| file_config.invocation_timeout()),
        custom_workflows_dir: workflows_dir.or_else(|| file_config.engine.workflows_dir.clone()),
    }
}

/// Engine for read-only workflow lookup (list, show)
fn lookup_engine(workflows_dir: Option<PathBuf>, file_config: &FileConfig) -> WorkflowEngine {
    WorkflowEngine::new(
        Arc::new(AgentRegistry::with_builtin()),
        Arc::new(TemplateInvoker),
        resolve_engine_config(workflows_dir, None, file_config),
    )
}

/// Parse a `key=value` pair, treating the value as JSON when it parses
fn parse_context_entry(entry: &str) -> Result<(String, Value)> {
    let (key, raw) = entry
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("expected KEY=VALUE, got '{}'", entry))?;
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    let file_config = FileConfig::load()?;

    match cli.command {
        Commands::Workflow { command } => {
            run_workflow_command(command, cli.project.as_ref(), &file_config).await
        }
        Commands::Agents { command } => {
            run_agents_command(command, cli.project.as_ref(), &file_config)
        }
    }
}

async fn run_workflow_command(
    command: WorkflowCommands,
    project: Option<&PathBuf>,
    file_config: &FileConfig,
) -> Result<()> {
    match command {
        WorkflowCommands::Run {
            workflow,
            task,
            set,
            workflows_dir,
            timeout_secs,
        } => {
            let registry = build_registry(project, file_config)?;
            let config = resolve_engine_config(workflows_dir, timeout_secs, file_config);

            let engine = WorkflowEngine::new(Arc::new(registry), Arc::new(TemplateInvoker), config);

            let mut initial: HashMap<String, Value> = HashMap::new();
            if let Some(task) = task {
                initial.insert("task".to_string(), Value::String(task));
            }
            for entry in &set {
                let (key, value) = parse_context_entry(entry)?;
                initial.insert(key, value);
            }

            let run = engine.run(&workflow, initial).await?;

            println!("Run {} ({}): {:?}", run.id, run.workflow_name, run.status);
            println!(
                "Phases: {} succeeded, {} failed, {} skipped ({}ms total)",
                run.metrics.succeeded,
                run.metrics.failed,
                run.metrics.skipped,
                run.metrics.duration_ms
            );

            let mut names: Vec<_> = run.phase_statuses.keys().collect();
            names.sort();
            for name in names {
                let duration = run
                    .metrics
                    .phase_durations_ms
                    .get(name)
                    .map(|ms| format!(" ({}ms)", ms))
                    .unwrap_or_default();
                println!("  {} -> {:?}{}", name, run.phase_statuses[name], duration);
            }

            println!("\nFinal context:");
            let mut entries: Vec<_> = run.context.iter().collect();
            entries.sort_by_key(|(k, _)| *k);
            for (key, value) in entries {
                println!("  {} = {}", key, value);
            }
        }

        WorkflowCommands::List { workflows_dir } => {
            let engine = lookup_engine(workflows_dir, file_config);

            println!("Available Workflows:\n");

            let workflows = engine.list_workflows();
            let mut builtins = Vec::new();
            let mut customs = Vec::new();

            for (name, desc, is_custom) in workflows {
                if is_custom {
                    customs.push((name, desc));
                } else {
                    builtins.push((name, desc));
                }
            }

            println!("Built-in:");
            for (name, desc) in builtins {
                println!("  {} - {}", name, desc);
            }

            if !customs.is_empty() {
                println!("\nCustom:");
                for (name, desc) in customs {
                    println!("  {} - {}", name, desc);
                }
            }

            println!("\nRun a workflow with: codeflow workflow run <name> --task \"description\"");
        }

        WorkflowCommands::Show {
            workflow,
            workflows_dir,
        } => {
            let engine = lookup_engine(workflows_dir, file_config);

            match engine.get_workflow(&workflow) {
                Some(wf) => {
                    println!("Workflow: {}\n", wf.name);
                    if !wf.description.is_empty() {
                        println!("Description: {}\n", wf.description);
                    }
                    println!("Phases:");
                    for phase in &wf.phases {
                        println!("  {} [{:?}]", phase.name, phase.mode);
                        if !phase.depends_on.is_empty() {
                            println!("    Depends on: {}", phase.depends_on.join(", "));
                        }
                        if let Some(condition) = &phase.condition {
                            println!("    Condition: {:?}", condition);
                        }
                        for invocation in &phase.invocations {
                            println!("    Agent: {}", invocation.agent);
                        }
                    }
                }
                None => {
                    eprintln!("Workflow '{}' not found.", workflow);
                    eprintln!("Use 'codeflow workflow list' to see available workflows.");
                    std::process::exit(1);
                }
            }
        }

        WorkflowCommands::Validate { path } => {
            let workflow = Workflow::from_toml_file(&path)?;
            let result = validate(&workflow);

            if result.is_valid() {
                println!("{}: valid ({} phases)", workflow.name, workflow.phases.len());
            } else {
                eprintln!("{}: invalid", workflow.name);
                for violation in result.violations() {
                    eprintln!("  - {}", violation);
                }
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn run_agents_command(
    command: AgentCommands,
    project: Option<&PathBuf>,
    file_config: &FileConfig,
) -> Result<()> {
    let registry = build_registry(project, file_config)?;

    match command {
        AgentCommands::List => {
            println!("Available Agents:\n");
            for name in registry.names() {
                if let Ok(agent) = registry.resolve(name) {
                    println!("  {} [{:?}] - {}", agent.name, agent.scope, agent.description);
                }
            }
        }

        AgentCommands::Show { agent } => match registry.resolve(&agent) {
            Ok(definition) => {
                println!("Agent: {}\n", definition.name);
                println!("Scope: {:?}", definition.scope);
                println!("Description: {}", definition.description);
                if let Some(contract) = &definition.input_contract {
                    println!("Input: {}", contract);
                }
                if let Some(contract) = &definition.output_contract {
                    println!("Output: {}", contract);
                }
                if let Some(timeout) = definition.timeout_secs {
                    println!("Timeout: {}s", timeout);
                }
            }
            Err(_) => {
                eprintln!("Agent '{}' not found.", agent);
                eprintln!("Use 'codeflow agents list' to see available agents.");
                std::process::exit(1);
            }
        },
    }

    Ok(())
}
