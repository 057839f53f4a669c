//! Agent invocation boundary
//!
//! The engine dispatches resolved agents through the `AgentInvoker` trait;
//! real execution backends (LLM calls, subprocess runners) live behind it.
//! `TemplateInvoker` is the built-in implementation used by CLI dry runs:
//! it renders the invocation input against the context snapshot and
//! returns it as the declared output.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::WorkflowContext;
use crate::registry::AgentDefinition;
use crate::workflow::AgentInvocation;

/// Output of one agent invocation: declared key/value pairs to merge
/// into the workflow context on phase success
#[derive(Debug, Clone, Default)]
pub struct InvocationOutput {
    pub values: HashMap<String, Value>,
}

impl InvocationOutput {
    /// An output with no declared values
    pub fn empty() -> Self {
        Self::default()
    }

    /// An output declaring a single key/value pair
    pub fn single(key: impl Into<String>, value: Value) -> Self {
        let mut values = HashMap::new();
        values.insert(key.into(), value);
        Self { values }
    }
}

/// Invocation failures
///
/// `Failed` and `Timeout` are recoverable: the owning phase is marked
/// failed and the run continues. `Contract` is fatal and aborts the run.
#[derive(Debug, thiserror::Error)]
pub enum InvocationError {
    #[error("invocation failed: {0}")]
    Failed(String),

    #[error("invocation timed out after {0:?}")]
    Timeout(Duration),

    #[error("invocation contract violated: {0}")]
    Contract(String),
}

impl InvocationError {
    /// Whether this error aborts the entire run
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Contract(_))
    }
}

/// External executor boundary
///
/// Implementations receive the resolved agent, the invocation, and a
/// read-only context snapshot, and produce a structured output or a typed
/// failure.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    async fn invoke(
        &self,
        agent: &AgentDefinition,
        invocation: &AgentInvocation,
        context: &WorkflowContext,
    ) -> Result<InvocationOutput, InvocationError>;
}

/// Substitute `{key}` placeholders in every string leaf of a value
pub fn render_input(input: &Value, context: &WorkflowContext) -> Value {
    match input {
        Value::String(s) => Value::String(context.render_template(s)),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| render_input(v, context)).collect())
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_input(v, context)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Invoker that renders input templates and echoes them as outputs
///
/// Used by `codeflow workflow run` when no external executor is attached,
/// and by tests that only exercise scheduling semantics.
#[derive(Debug, Clone, Default)]
pub struct TemplateInvoker;

#[async_trait]
impl AgentInvoker for TemplateInvoker {
    async fn invoke(
        &self,
        agent: &AgentDefinition,
        invocation: &AgentInvocation,
        context: &WorkflowContext,
    ) -> Result<InvocationOutput, InvocationError> {
        let rendered = render_input(&invocation.input, context);
        tracing::debug!(agent = %agent.name, "rendered invocation input");

        match &invocation.output_key {
            Some(key) => Ok(InvocationOutput::single(key.clone(), rendered)),
            None => Ok(InvocationOutput::empty()),
        }
    }
}
