//! Error types for Maru

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Maru operations
pub type Result<T> = std::result::Result<T, MaruError>;

/// Main error type for Maru
#[derive(Error, Debug)]
pub enum MaruError {
    /// Manifest loading and validation errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Task resolution errors
    #[error("Resolution error: {0}")]
    Resolve(#[from] ResolveError),

    /// Action execution errors
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// Template expansion errors
    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// YAML parsing errors
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl MaruError {
    /// Process exit code for this error: 1 for user/config problems,
    /// 2 for failed commands, 3 for timeouts.
    pub fn exit_code(&self) -> i32 {
        match self {
            MaruError::Execution(ExecutionError::CommandTimeout { .. }) => 3,
            MaruError::Execution(ExecutionError::CommandFailed { .. }) => 2,
            _ => 1,
        }
    }
}

/// Manifest loading and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load '{source_name}': {error}")]
    Load { source_name: String, error: String },

    #[error("Failed to parse '{source_name}': {error}")]
    Parse { source_name: String, error: String },

    #[error("Authentication failed for '{source_name}': {error}")]
    Auth { source_name: String, error: String },

    #[error("Invalid manifest: {0}")]
    Schema(String),

    #[error("Failed to read env file '{path}': {error}")]
    EnvFile { path: PathBuf, error: String },
}

/// Task resolution errors
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Task '{0}' is not defined")]
    TaskNotFound(String),

    #[error("No include named '{0}' in the manifest")]
    IncludeNotFound(String),

    #[error("Task loop detected: {}", chain.join(" -> "))]
    CycleDetected { chain: Vec<String> },

    #[error("Task '{task}' is missing required inputs: {}", missing.join(", "))]
    MissingInput { task: String, missing: Vec<String> },

    #[error("Input '{input}' of task '{task}' does not match '{pattern}'")]
    InputMismatch {
        task: String,
        input: String,
        pattern: String,
    },
}

/// Action execution errors
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Command \"{cmd}\" failed after {retries} retries (last exit: {last_exit})")]
    CommandFailed {
        cmd: String,
        retries: u32,
        last_exit: String,
    },

    #[error("Command \"{cmd}\" timed out after {seconds} seconds")]
    CommandTimeout { cmd: String, seconds: u64 },

    #[error("Variable '{name}' value does not match pattern '{pattern}'")]
    PatternMismatch { name: String, pattern: String },

    #[error("Wait action is missing a cluster or network block")]
    InvalidWait,

    #[error("Failed to spawn command: {0}")]
    Spawn(String),
}

/// Template expansion errors
#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("Invalid template syntax: {0}")]
    InvalidSyntax(String),
}

/// Specialized result type for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Specialized result type for resolution operations
pub type ResolveResult<T> = std::result::Result<T, ResolveError>;

/// Specialized result type for execution operations
pub type ExecutionResult<T> = std::result::Result<T, ExecutionError>;
