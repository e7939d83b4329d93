//! Core manifest types
//!
//! This module defines the data structures that represent a tasks.yaml manifest.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Top-level manifest structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Manifest {
    /// Named imports of other manifests, in declaration order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub includes: Vec<IndexMap<String, String>>,

    /// Variable defaults seeded into the store at startup
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<Variable>,

    /// Tasks defined in the manifest, in declaration order
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl Manifest {
    /// Iterate includes as (name, source) pairs in declaration order
    pub fn includes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.includes
            .iter()
            .flat_map(|entry| entry.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }

    /// Find a task by name
    pub fn find_task(&self, name: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.name == name)
    }
}

/// A variable declaration with an optional default value
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    /// Variable name
    pub name: String,

    /// Default value
    #[serde(default)]
    pub default: String,

    /// Description for help text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Whether the value is masked in logs
    #[serde(default)]
    pub sensitive: bool,

    /// Regex the value must match on every write
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

/// A task definition
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Task name; may carry a single namespace prefix (`ns:local`)
    pub name: String,

    /// Description for help text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Parameter contracts keyed by input name
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub inputs: IndexMap<String, InputSpec>,

    /// Actions to execute, in declaration order
    #[serde(default)]
    pub actions: Vec<Action>,

    /// Files associated with the task
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,

    /// Env file whose lines are appended to every action environment,
    /// resolved relative to the manifest directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_path: Option<String>,
}

/// A parameter contract for a task input
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InputSpec {
    /// Description for help text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Whether the caller must supply a value (when no default exists)
    #[serde(default = "default_required")]
    pub required: bool,

    /// Default value used when the caller supplies none
    #[serde(default)]
    pub default: String,

    /// Deprecation notice logged when the input is supplied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecated_message: Option<String>,

    /// Regex a supplied value must match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validate: Option<String>,
}

fn default_required() -> bool {
    true
}

impl Default for InputSpec {
    fn default() -> Self {
        InputSpec {
            description: None,
            required: true,
            default: String::new(),
            deprecated_message: None,
            validate: None,
        }
    }
}

/// An atomic step: either a reference to another task or a shell action
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    /// Name of the task this action invokes instead of running a command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_reference: Option<String>,

    /// Input bindings passed to the referenced task
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub with: IndexMap<String, String>,

    /// Shell step fields
    #[serde(flatten)]
    pub base: BaseAction,
}

/// Truncate a string for display, appending an ellipsis when cut
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{}...", cut)
    }
}

/// A shell step
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseAction {
    /// Description for logs; shown instead of the command when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Shell command to run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<String>,

    /// Declarative readiness probe, translated to a command at run time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait: Option<ActionWait>,

    /// Conditional: the literal string "false" (after templating) skips the action
    #[serde(default, rename = "if", skip_serializing_if = "Option::is_none")]
    pub r#if: Option<String>,

    /// Working directory for the command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,

    /// Environment assignments ("K=V") for the command
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,

    /// Whether to suppress live output forwarding
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mute: Option<bool>,

    /// Overall deadline in seconds; 0 means unbounded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_total_seconds: Option<u64>,

    /// Retries after the first attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,

    /// Per-OS shell preference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<ShellPreference>,

    /// Variables assigned from the trimmed stdout on success
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub set_variables: Vec<SetVariable>,
}

/// A declarative readiness probe
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ActionWait {
    /// Wait for a cluster resource to reach a condition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<WaitCluster>,

    /// Wait for a network endpoint to respond
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<WaitNetwork>,
}

/// Cluster resource wait parameters
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WaitCluster {
    pub kind: String,
    pub identifier: String,
    #[serde(default)]
    pub condition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Network endpoint wait parameters
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WaitNetwork {
    pub protocol: String,
    pub address: String,
    #[serde(default)]
    pub code: u16,
}

/// Output capture specification
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SetVariable {
    /// Variable name to assign
    pub name: String,

    /// Regex the captured value must match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    /// Whether the captured value is masked in logs
    #[serde(default)]
    pub sensitive: bool,
}

/// Per-OS shell preference
///
/// Recognized values are `sh`, `bash`, `pwsh`, `cmd`, and `default`;
/// `default` maps to the platform shell.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ShellPreference {
    #[serde(default = "default_shell")]
    pub linux: String,
    #[serde(default = "default_shell")]
    pub darwin: String,
    #[serde(default = "default_shell")]
    pub windows: String,
}

fn default_shell() -> String {
    "default".to_string()
}

impl Default for ShellPreference {
    fn default() -> Self {
        ShellPreference {
            linux: default_shell(),
            darwin: default_shell(),
            windows: default_shell(),
        }
    }
}
