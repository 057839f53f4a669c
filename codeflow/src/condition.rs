//! Phase guard predicates
//!
//! Conditional phases carry a predicate over the workflow context. The
//! predicate is pure: it reads the context and returns a boolean, and the
//! engine evaluates it exactly once, at the moment all of the phase's
//! dependencies have completed.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::WorkflowContext;

/// A predicate over the workflow context
///
/// Declarative variants deserialize from workflow TOML; `Custom` wraps a
/// caller-supplied closure for programmatic workflows and is never
/// serialized.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    /// True when the context value under `key` equals `value`
    Equals { key: String, value: Value },

    /// True when `key` is present in the context
    KeyExists { key: String },

    /// Negation of the inner condition
    Not { condition: Box<Condition> },

    /// True when every inner condition holds
    All { conditions: Vec<Condition> },

    /// True when at least one inner condition holds
    Any { conditions: Vec<Condition> },

    /// Caller-supplied predicate (programmatic workflows only)
    #[serde(skip)]
    Custom(Arc<dyn Fn(&WorkflowContext) -> bool + Send + Sync>),
}

impl Condition {
    /// Condition on a context value equaling `value`
    pub fn equals(key: impl Into<String>, value: Value) -> Self {
        Self::Equals {
            key: key.into(),
            value,
        }
    }

    /// Condition on a context key being present
    pub fn key_exists(key: impl Into<String>) -> Self {
        Self::KeyExists { key: key.into() }
    }

    /// Wrap a caller-supplied predicate
    pub fn custom(f: impl Fn(&WorkflowContext) -> bool + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(f))
    }

    /// Evaluate the predicate against a context
    ///
    /// Read-only: the condition never mutates the context.
    pub fn evaluate(&self, context: &WorkflowContext) -> bool {
        match self {
            Self::Equals { key, value } => context.get(key) == Some(value),
            Self::KeyExists { key } => context.contains(key),
            Self::Not { condition } => !condition.evaluate(context),
            Self::All { conditions } => conditions.iter().all(|c| c.evaluate(context)),
            Self::Any { conditions } => conditions.iter().any(|c| c.evaluate(context)),
            Self::Custom(f) => f(context),
        }
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equals { key, value } => write!(f, "Equals({} == {})", key, value),
            Self::KeyExists { key } => write!(f, "KeyExists({})", key),
            Self::Not { condition } => write!(f, "Not({:?})", condition),
            Self::All { conditions } => write!(f, "All({:?})", conditions),
            Self::Any { conditions } => write!(f, "Any({:?})", conditions),
            Self::Custom(_) => write!(f, "Custom(<fn>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context_with(key: &str, value: Value) -> WorkflowContext {
        let mut context = WorkflowContext::new();
        context.insert(key, value);
        context
    }

    #[test]
    fn test_equals() {
        let context = context_with("x", json!(1));

        assert!(Condition::equals("x", json!(1)).evaluate(&context));
        assert!(!Condition::equals("x", json!(2)).evaluate(&context));
        assert!(!Condition::equals("y", json!(1)).evaluate(&context));
    }

    #[test]
    fn test_combinators() {
        let context = context_with("status", json!("ok"));

        let all = Condition::All {
            conditions: vec![
                Condition::key_exists("status"),
                Condition::equals("status", json!("ok")),
            ],
        };
        assert!(all.evaluate(&context));

        let negated = Condition::Not {
            condition: Box::new(Condition::key_exists("missing")),
        };
        assert!(negated.evaluate(&context));
    }

    #[test]
    fn test_custom_closure() {
        let context = context_with("count", json!(3));

        let condition = Condition::custom(|ctx| {
            ctx.get("count").and_then(Value::as_i64).unwrap_or(0) > 2
        });

        assert!(condition.evaluate(&context));
    }

    #[test]
    fn test_condition_from_toml() {
        let toml = r#"
            kind = "equals"
            key = "x"
            value = 1
        "#;

        let condition: Condition = toml::from_str(toml).unwrap();
        assert!(condition.evaluate(&context_with("x", json!(1))));
    }
}
