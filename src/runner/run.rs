//! Top-level run orchestration
//!
//! Drives loader -> resolver -> executor for one invocation: seeds the
//! variable store, resolves the target task, and walks its actions in
//! order. Referenced tasks run against a store snapshot so their writes
//! are discarded on return.

use crate::config::loader::{Loader, Source};
use crate::config::types::{Manifest, Task};
use crate::error::{ConfigError, Result};
use crate::runner::exec::{run_action, should_skip, ActionDefaults};
use crate::runner::resolver::{validate_inputs, ResolvedTasks, Resolver};
use crate::runner::template::expand;
use crate::runner::variables::VariableStore;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info};

/// One top-level invocation
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Root manifest path
    pub manifest: PathBuf,
    /// Task to run
    pub task: String,
    /// CLI-supplied input bindings for the target task
    pub withs: IndexMap<String, String>,
    /// CLI-supplied variable overrides, seeded after manifest defaults
    pub set_values: IndexMap<String, String>,
    /// host -> token map for remote includes
    pub credentials: HashMap<String, String>,
    /// Log commands instead of spawning them
    pub dry_run: bool,
}

/// Run a task from a root manifest
pub fn run(opts: &RunOptions) -> Result<()> {
    let source = Source::Local(opts.manifest.clone());
    let mut loader = Loader::new().with_credentials(opts.credentials.clone());
    let root = loader.load(&source)?;

    let mut store = seed_store(&root, &opts.set_values)?;

    let resolved = Resolver::new(&mut loader, &source, &root)?.resolve(&opts.task)?;
    let entry = resolved.entry_task().clone();

    let withs = template_withs(&opts.withs, &store);
    validate_inputs(&entry, &withs)?;

    let runner = Runner {
        resolved,
        dry_run: opts.dry_run,
    };
    runner.run_task(&entry, &withs, &mut store)
}

/// Enumerate the tasks a manifest offers (name, description)
pub fn list_tasks(manifest_path: &PathBuf) -> Result<Vec<(String, Option<String>)>> {
    let source = Source::Local(manifest_path.clone());
    let mut loader = Loader::new();
    let root = loader.load(&source)?;
    Ok(root
        .tasks
        .iter()
        .map(|t| (t.name.clone(), t.description.clone()))
        .collect())
}

/// Seed the store with manifest defaults, then CLI overrides. Overrides
/// honor the declared pattern and sensitivity of the variable.
fn seed_store(root: &Manifest, set_values: &IndexMap<String, String>) -> Result<VariableStore> {
    let mut store = VariableStore::new();
    for variable in &root.variables {
        store.set(
            &variable.name,
            &variable.default,
            variable.pattern.as_deref(),
            variable.sensitive,
        )?;
    }
    for (name, value) in set_values {
        let declared = root.variables.iter().find(|v| v.name == *name);
        store.set(
            name,
            value,
            declared.and_then(|d| d.pattern.as_deref()),
            declared.is_some_and(|d| d.sensitive),
        )?;
    }
    Ok(store)
}

fn template_withs(
    withs: &IndexMap<String, String>,
    store: &VariableStore,
) -> IndexMap<String, String> {
    withs
        .iter()
        .map(|(k, v)| (k.clone(), expand(v, store)))
        .collect()
}

/// Caller-supplied withs plus unfilled input defaults, as env assignments
fn input_env(task: &Task, withs: &IndexMap<String, String>) -> Vec<String> {
    let mut env = Vec::new();
    for (name, value) in withs {
        env.push(format_input_env(name, value));
    }
    for (name, spec) in &task.inputs {
        if !withs.contains_key(name) && !spec.default.is_empty() {
            env.push(format_input_env(name, &spec.default));
        }
    }
    env
}

fn format_input_env(name: &str, value: &str) -> String {
    format!("INPUT_{}={}", name.to_uppercase().replace('-', "_"), value)
}

struct Runner {
    resolved: ResolvedTasks,
    dry_run: bool,
}

impl Runner {
    fn run_task(
        &self,
        task: &Task,
        withs: &IndexMap<String, String>,
        store: &mut VariableStore,
    ) -> Result<()> {
        info!("Running task {}", task.name);

        let with_env = input_env(task, withs);
        let env_file = self.env_file_lines(task)?;
        let defaults = ActionDefaults::default();

        for action in &task.actions {
            match action.task_reference.as_deref().filter(|r| !r.is_empty()) {
                Some(reference) => {
                    if should_skip(action.base.r#if.as_deref(), store) {
                        info!("Skipping action {}", reference);
                        continue;
                    }

                    let callee = self.resolved.resolve_reference(&task.name, reference)?;
                    let callee_withs = template_withs(&action.with, store);
                    validate_inputs(callee, &callee_withs)?;

                    // Callee-local writes live in the snapshot and are
                    // discarded when the referenced task returns.
                    let mut snapshot = store.snapshot();
                    self.run_task(callee, &callee_withs, &mut snapshot)?;
                }
                None => {
                    run_action(
                        &action.base,
                        &with_env,
                        &env_file,
                        &defaults,
                        store,
                        self.dry_run,
                    )?;
                }
            }
        }

        debug!("Task completed: {}", task.name);
        Ok(())
    }

    fn env_file_lines(&self, task: &Task) -> Result<Vec<String>> {
        let Some(env_path) = task.env_path.as_deref().filter(|p| !p.is_empty()) else {
            return Ok(Vec::new());
        };
        let path = self.resolved.source_dir(&task.name).join(env_path);
        let contents = fs::read_to_string(&path).map_err(|e| ConfigError::EnvFile {
            path: path.clone(),
            error: e.to_string(),
        })?;
        Ok(contents.lines().map(str::to_string).collect())
    }
}
