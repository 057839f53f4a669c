//! Multi-phase workflow orchestration engine
//!
//! This crate provides:
//! - An agent registry merging built-in and project-scoped definitions
//! - Declarative workflow definitions with dependency edges, execution
//!   modes, and conditional guards
//! - Structural validation (duplicate names, dangling edges, cycles)
//! - A wavefront-scheduling engine with context propagation and
//!   deterministic parallel merges
//!
//! # Example
//!
//! ```rust,ignore
//! use codeflow::{WorkflowEngine, AgentRegistry, TemplateInvoker, EngineConfig};
//! use std::sync::Arc;
//!
//! let registry = Arc::new(AgentRegistry::with_builtin());
//! let engine = WorkflowEngine::new(registry, Arc::new(TemplateInvoker), EngineConfig::default());
//!
//! let run = engine.run("implement-feature", initial_context).await?;
//! ```

pub mod condition;
pub mod config;
pub mod context;
pub mod engine;
pub mod invoker;
pub mod registry;
pub mod validate;
pub mod workflow;

pub use condition::Condition;
pub use config::FileConfig;
pub use context::WorkflowContext;
pub use engine::{
    EngineConfig, EngineError, PhaseStatus, RunMetrics, RunStatus, WorkflowEngine, WorkflowRun,
};
pub use invoker::{AgentInvoker, InvocationError, InvocationOutput, TemplateInvoker};
pub use registry::{AgentDefinition, AgentLoader, AgentRegistry, AgentScope, RegistryError};
pub use validate::{validate, ValidationResult, Violation};
pub use workflow::{AgentInvocation, PhaseMode, Workflow, WorkflowError, WorkflowPhase};
