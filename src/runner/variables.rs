//! Runtime variable state
//!
//! The store holds ordered name -> value bindings with optional pattern
//! validation and sensitivity masking. Entering a referenced task takes a
//! snapshot: an overlay whose writes never reach the parent, so callee
//! bindings are discarded on return.

use crate::error::{ExecutionError, ExecutionResult};
use indexmap::IndexMap;
use regex::Regex;
use std::sync::Arc;

/// Mask shown in place of sensitive values in logs
pub const SENSITIVE_MASK: &str = "**sensitive**";

/// A single variable binding
#[derive(Debug, Clone)]
pub struct VariableValue {
    pub value: String,
    pub sensitive: bool,
    pub pattern: Option<String>,
}

impl VariableValue {
    /// Value as it may appear in logs
    pub fn display_value(&self) -> &str {
        if self.sensitive {
            SENSITIVE_MASK
        } else {
            &self.value
        }
    }
}

/// Hierarchical variable store with scoped overlays
#[derive(Debug, Clone, Default)]
pub struct VariableStore {
    parent: Option<Arc<VariableStore>>,
    vars: IndexMap<String, VariableValue>,
}

impl VariableStore {
    pub fn new() -> Self {
        VariableStore::default()
    }

    /// Write a binding, validating against `pattern` when one is given
    pub fn set(
        &mut self,
        name: &str,
        value: &str,
        pattern: Option<&str>,
        sensitive: bool,
    ) -> ExecutionResult<()> {
        if let Some(pattern) = pattern.filter(|p| !p.is_empty()) {
            check_value(name, value, pattern)?;
        }
        self.vars.insert(
            name.to_string(),
            VariableValue {
                value: value.to_string(),
                sensitive,
                pattern: pattern.filter(|p| !p.is_empty()).map(str::to_string),
            },
        );
        Ok(())
    }

    /// Read a binding, consulting the overlay first, then the parent chain
    pub fn get(&self, name: &str) -> Option<&str> {
        if let Some(entry) = self.vars.get(name) {
            return Some(&entry.value);
        }
        self.parent.as_ref().and_then(|p| p.get(name))
    }

    /// Full entry lookup (value + sensitivity + pattern)
    pub fn entry(&self, name: &str) -> Option<&VariableValue> {
        if let Some(entry) = self.vars.get(name) {
            return Some(entry);
        }
        self.parent.as_ref().and_then(|p| p.entry(name))
    }

    /// Re-validate the current value of a variable against its pattern
    pub fn check_pattern(&self, name: &str) -> ExecutionResult<()> {
        if let Some(entry) = self.entry(name) {
            if let Some(pattern) = &entry.pattern {
                check_value(name, &entry.value, pattern)?;
            }
        }
        Ok(())
    }

    /// Independent overlay inheriting current bindings; writes to the
    /// snapshot do not affect this store.
    pub fn snapshot(&self) -> VariableStore {
        VariableStore {
            parent: Some(Arc::new(self.clone())),
            vars: IndexMap::new(),
        }
    }

    /// Flattened view of every visible binding, parent bindings first,
    /// overlay writes winning on collision.
    pub fn flatten(&self) -> IndexMap<String, VariableValue> {
        let mut merged = match &self.parent {
            Some(parent) => parent.flatten(),
            None => IndexMap::new(),
        };
        for (name, entry) in &self.vars {
            merged.insert(name.clone(), entry.clone());
        }
        merged
    }
}

fn check_value(name: &str, value: &str, pattern: &str) -> ExecutionResult<()> {
    let re = Regex::new(pattern).map_err(|_| ExecutionError::PatternMismatch {
        name: name.to_string(),
        pattern: pattern.to_string(),
    })?;
    if !re.is_match(value) {
        return Err(ExecutionError::PatternMismatch {
            name: name.to_string(),
            pattern: pattern.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let mut store = VariableStore::new();
        store.set("key", "value", None, false).unwrap();
        assert_eq!(store.get("key"), Some("value"));
        assert_eq!(store.get("missing"), None);
    }

    #[test]
    fn test_later_writes_overwrite() {
        let mut store = VariableStore::new();
        store.set("key", "first", None, false).unwrap();
        store.set("key", "second", None, false).unwrap();
        assert_eq!(store.get("key"), Some("second"));
    }

    #[test]
    fn test_pattern_validated_on_write() {
        let mut store = VariableStore::new();
        assert!(store.set("sha", "abc123", Some("^[0-9a-f]+$"), false).is_ok());

        let result = store.set("sha", "not hex!", Some("^[0-9a-f]+$"), false);
        assert!(matches!(
            result,
            Err(ExecutionError::PatternMismatch { .. })
        ));
    }

    #[test]
    fn test_invalid_pattern_is_a_mismatch() {
        let mut store = VariableStore::new();
        let result = store.set("x", "v", Some("(unclosed"), false);
        assert!(matches!(
            result,
            Err(ExecutionError::PatternMismatch { .. })
        ));
    }

    #[test]
    fn test_check_pattern() {
        let mut store = VariableStore::new();
        store.set("num", "42", Some(r"^\d+$"), false).unwrap();
        assert!(store.check_pattern("num").is_ok());
        assert!(store.check_pattern("absent").is_ok());
    }

    #[test]
    fn test_snapshot_inherits_bindings() {
        let mut store = VariableStore::new();
        store.set("base", "value", None, false).unwrap();

        let snapshot = store.snapshot();
        assert_eq!(snapshot.get("base"), Some("value"));
    }

    #[test]
    fn test_snapshot_writes_do_not_leak_upward() {
        let mut store = VariableStore::new();
        store.set("base", "value", None, false).unwrap();

        let mut snapshot = store.snapshot();
        snapshot.set("local", "callee", None, false).unwrap();
        snapshot.set("base", "shadowed", None, false).unwrap();

        assert_eq!(store.get("local"), None);
        assert_eq!(store.get("base"), Some("value"));
        assert_eq!(snapshot.get("base"), Some("shadowed"));
    }

    #[test]
    fn test_flatten_overlay_wins() {
        let mut store = VariableStore::new();
        store.set("a", "parent", None, false).unwrap();
        store.set("b", "parent", None, false).unwrap();

        let mut snapshot = store.snapshot();
        snapshot.set("b", "child", None, false).unwrap();

        let merged = snapshot.flatten();
        assert_eq!(merged.get("a").unwrap().value, "parent");
        assert_eq!(merged.get("b").unwrap().value, "child");
    }

    #[test]
    fn test_sensitive_display_masked() {
        let mut store = VariableStore::new();
        store.set("token", "hunter2", None, true).unwrap();
        assert_eq!(store.entry("token").unwrap().display_value(), SENSITIVE_MASK);
        // The raw value is still readable for env injection.
        assert_eq!(store.get("token"), Some("hunter2"));
    }
}
