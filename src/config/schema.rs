//! Manifest validation
//!
//! Field constraints checked after parsing, before any task resolves.

use crate::config::types::{Action, Manifest, Task};
use crate::error::{ConfigError, ConfigResult};
use std::collections::HashSet;

/// Validate a complete manifest
pub fn validate_manifest(manifest: &Manifest) -> ConfigResult<()> {
    let mut include_names = HashSet::new();
    for (name, source) in manifest.includes() {
        if name.is_empty() || name.contains(':') {
            return Err(ConfigError::Schema(format!(
                "include name '{}' must be a non-empty identifier without ':'",
                name
            )));
        }
        if source.is_empty() {
            return Err(ConfigError::Schema(format!(
                "include '{}' has an empty source",
                name
            )));
        }
        if !include_names.insert(name.to_string()) {
            return Err(ConfigError::Schema(format!(
                "duplicate include name '{}'",
                name
            )));
        }
    }

    for variable in &manifest.variables {
        if !is_identifier(&variable.name) {
            return Err(ConfigError::Schema(format!(
                "variable name '{}' is not a valid identifier",
                variable.name
            )));
        }
    }

    let mut task_names = HashSet::new();
    for task in &manifest.tasks {
        validate_task(task)?;
        if !task_names.insert(task.name.clone()) {
            return Err(ConfigError::Schema(format!(
                "duplicate task name '{}'",
                task.name
            )));
        }
    }

    Ok(())
}

/// Validate a single task
pub fn validate_task(task: &Task) -> ConfigResult<()> {
    if task.name.is_empty() {
        return Err(ConfigError::Schema("task name must not be empty".to_string()));
    }
    if task.name.matches(':').count() > 1 {
        return Err(ConfigError::Schema(format!(
            "task name '{}' may contain at most one ':'",
            task.name
        )));
    }

    for (index, action) in task.actions.iter().enumerate() {
        validate_action(&task.name, index, action)?;
    }

    Ok(())
}

/// An action is either a task reference or a shell step, never both
fn validate_action(task_name: &str, index: usize, action: &Action) -> ConfigResult<()> {
    let has_reference = action
        .task_reference
        .as_ref()
        .is_some_and(|r| !r.is_empty());
    let has_cmd = action.base.cmd.is_some();
    let has_wait = action.base.wait.is_some();

    if has_reference && (has_cmd || has_wait) {
        return Err(ConfigError::Schema(format!(
            "action {} of task '{}' mixes a task reference with a command",
            index, task_name
        )));
    }
    if !has_reference && !has_cmd && !has_wait {
        return Err(ConfigError::Schema(format!(
            "action {} of task '{}' needs one of cmd, wait, or taskReference",
            index, task_name
        )));
    }
    if has_cmd && has_wait {
        return Err(ConfigError::Schema(format!(
            "action {} of task '{}' sets both cmd and wait",
            index, task_name
        )));
    }

    if let Some(wait) = &action.base.wait {
        match (&wait.cluster, &wait.network) {
            (Some(_), None) | (None, Some(_)) => {}
            _ => {
                return Err(ConfigError::Schema(format!(
                    "wait in action {} of task '{}' needs exactly one of cluster or network",
                    index, task_name
                )))
            }
        }
    }

    for set_variable in &action.base.set_variables {
        if !is_identifier(&set_variable.name) {
            return Err(ConfigError::Schema(format!(
                "setVariables name '{}' in task '{}' is not a valid identifier",
                set_variable.name, task_name
            )));
        }
    }

    Ok(())
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
