//! Shared workflow context
//!
//! The context is the key-value state accumulated across phases within one
//! run. Only the engine writes to the live context; phases receive a
//! snapshot taken at dispatch time and hand their outputs back as a merge
//! set that the engine applies serially.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Mutable key-value state propagated across phases within one run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowContext {
    values: HashMap<String, Value>,
}

impl WorkflowContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    /// Create a context from caller-supplied initial values
    pub fn from_values(values: HashMap<String, Value>) -> Self {
        Self { values }
    }

    /// Get a value by key
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Check whether a key is present
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Set a single value
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    /// Merge a set of produced key/value pairs into the context
    ///
    /// Existing keys are overwritten. The engine calls this once per
    /// completed phase, in declaration order, so collisions between
    /// concurrent phases resolve deterministically.
    pub fn merge(&mut self, outputs: HashMap<String, Value>) {
        self.values.extend(outputs);
    }

    /// Take a point-in-time copy for dispatch to a phase
    pub fn snapshot(&self) -> Self {
        self.clone()
    }

    /// Iterate over all entries
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the context holds no entries
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Consume the context, returning the underlying map
    pub fn into_values(self) -> HashMap<String, Value> {
        self.values
    }

    /// Substitute `{key}` placeholders in a template string
    ///
    /// String values are inserted as-is; other values are rendered as
    /// compact JSON. Unknown placeholders are left untouched. Substituted
    /// values are never re-scanned, so a value containing braces comes
    /// through literally.
    pub fn render_template(&self, template: &str) -> String {
        let mut result = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            result.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            match after.find('}') {
                Some(close) => {
                    let key = &after[..close];
                    match self.values.get(key) {
                        Some(Value::String(s)) => result.push_str(s),
                        Some(other) => result.push_str(&other.to_string()),
                        None => {
                            result.push('{');
                            result.push_str(key);
                            result.push('}');
                        }
                    }
                    rest = &after[close + 1..];
                }
                None => {
                    result.push('{');
                    rest = after;
                }
            }
        }

        result.push_str(rest);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_overwrites_existing_keys() {
        let mut context = WorkflowContext::new();
        context.insert("x", json!(1));

        let mut outputs = HashMap::new();
        outputs.insert("x".to_string(), json!(2));
        outputs.insert("y".to_string(), json!("out"));
        context.merge(outputs);

        assert_eq!(context.get("x"), Some(&json!(2)));
        assert_eq!(context.get("y"), Some(&json!("out")));
    }

    #[test]
    fn test_snapshot_is_independent() {
        let mut context = WorkflowContext::new();
        context.insert("x", json!(1));

        let snapshot = context.snapshot();
        context.insert("x", json!(2));

        assert_eq!(snapshot.get("x"), Some(&json!(1)));
        assert_eq!(context.get("x"), Some(&json!(2)));
    }

    #[test]
    fn test_render_template() {
        let mut context = WorkflowContext::new();
        context.insert("task", json!("Add dark mode"));
        context.insert("attempt", json!(2));

        let result = context.render_template("Implement: {task} (attempt {attempt}, {missing})");

        assert_eq!(result, "Implement: Add dark mode (attempt 2, {missing})");
    }

    #[test]
    fn test_render_template_does_not_rescan_substituted_values() {
        let mut context = WorkflowContext::new();
        context.insert("a", json!("{b}"));
        context.insert("b", json!("deep"));

        // The braces inside a's value are literal output, never a second
        // round of substitution
        assert_eq!(context.render_template("{a} {b}"), "{b} deep");
    }

    #[test]
    fn test_render_template_unterminated_placeholder() {
        let mut context = WorkflowContext::new();
        context.insert("task", json!("ship"));

        assert_eq!(context.render_template("{task} and {rest"), "ship and {rest");
    }
}
