//! Task resolution
//!
//! Resolves a task name against the root manifest and its includes.
//! Included tasks are renamed under their `ns:` prefix and spliced into a
//! flat pool; references are walked with a visit stack so a cycle fails
//! before anything runs. Includes are spliced at most once, keyed by
//! namespace and canonical source identity.

use crate::config::loader::{Loader, Source};
use crate::config::types::{InputSpec, Manifest, Task};
use crate::error::{ConfigError, ResolveError, ResolveResult, Result};
use indexmap::IndexMap;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// A resolved task pool: every reference reachable from the entry task
/// maps to exactly one task, under its fully-qualified name.
#[derive(Debug, Clone)]
pub struct ResolvedTasks {
    pool: IndexMap<String, Task>,
    sources: HashMap<String, Source>,
    entry: String,
}

impl ResolvedTasks {
    /// Fully-qualified name of the entry task
    pub fn entry_name(&self) -> &str {
        &self.entry
    }

    /// The entry task
    pub fn entry_task(&self) -> &Task {
        &self.pool[&self.entry]
    }

    /// Look up a task by fully-qualified name
    pub fn get(&self, name: &str) -> Option<&Task> {
        self.pool.get(name)
    }

    /// Every task in the pool, in splice order
    pub fn tasks(&self) -> impl Iterator<Item = (&str, &Task)> {
        self.pool.iter().map(|(name, task)| (name.as_str(), task))
    }

    /// Resolve a reference as seen from `caller`: names without a
    /// namespace bind inside the caller's namespace first.
    pub fn resolve_reference(&self, caller: &str, reference: &str) -> ResolveResult<&Task> {
        let qualified = qualify(&self.pool, caller_namespace(caller), reference);
        self.pool
            .get(&qualified)
            .ok_or_else(|| ResolveError::TaskNotFound(reference.to_string()))
    }

    /// Directory of the manifest that defines `task_name`, for env files
    pub fn source_dir(&self, task_name: &str) -> std::path::PathBuf {
        let ns = caller_namespace(task_name);
        self.sources
            .get(ns)
            .map(Source::dir)
            .unwrap_or_else(|| std::path::PathBuf::from("."))
    }
}

fn caller_namespace(name: &str) -> &str {
    name.split_once(':').map(|(ns, _)| ns).unwrap_or("")
}

fn qualify(pool: &IndexMap<String, Task>, caller_ns: &str, reference: &str) -> String {
    if reference.contains(':') {
        return reference.to_string();
    }
    if !caller_ns.is_empty() {
        let candidate = format!("{}:{}", caller_ns, reference);
        if pool.contains_key(&candidate) {
            return candidate;
        }
    }
    reference.to_string()
}

/// Walks the reference graph rooted at one manifest
pub struct Resolver<'a> {
    loader: &'a mut Loader,
    pool: IndexMap<String, Task>,
    includes: IndexMap<String, Source>,
    sources: HashMap<String, Source>,
    processed: HashSet<(String, String)>,
}

impl<'a> Resolver<'a> {
    pub fn new(loader: &'a mut Loader, root_source: &Source, root: &Manifest) -> Result<Self> {
        let mut resolver = Resolver {
            loader,
            pool: IndexMap::new(),
            includes: IndexMap::new(),
            sources: HashMap::from([(String::new(), root_source.clone())]),
            processed: HashSet::new(),
        };
        resolver.register_includes(root, root_source)?;
        for task in &root.tasks {
            resolver.pool.insert(task.name.clone(), task.clone());
        }
        Ok(resolver)
    }

    /// Resolve `task_name` and every task it transitively references
    pub fn resolve(mut self, task_name: &str) -> Result<ResolvedTasks> {
        let mut stack = Vec::new();
        let entry = self.resolve_name(task_name, "", &mut stack)?;
        Ok(ResolvedTasks {
            pool: self.pool,
            sources: self.sources,
            entry,
        })
    }

    fn register_includes(&mut self, manifest: &Manifest, importer: &Source) -> Result<()> {
        for (name, spec) in manifest.includes() {
            let source = Source::classify(spec, importer);
            if let Some(existing) = self.includes.get(name) {
                if existing.key() != source.key() {
                    return Err(ConfigError::Schema(format!(
                        "include '{}' is declared with conflicting sources",
                        name
                    ))
                    .into());
                }
                continue;
            }
            self.includes.insert(name.to_string(), source);
        }
        Ok(())
    }

    /// Splice an include's tasks into the pool under `ns:`, once per
    /// canonical source.
    fn splice_include(&mut self, ns: &str) -> Result<()> {
        let source = self
            .includes
            .get(ns)
            .cloned()
            .ok_or_else(|| ResolveError::IncludeNotFound(ns.to_string()))?;

        if !self.processed.insert((ns.to_string(), source.key())) {
            return Ok(());
        }

        let manifest = self.loader.load(&source)?;
        self.register_includes(&manifest, &source)?;
        self.sources.insert(ns.to_string(), source);

        for task in &manifest.tasks {
            if task.name.contains(':') {
                return Err(ConfigError::Schema(format!(
                    "included task '{}' may not carry its own namespace",
                    task.name
                ))
                .into());
            }
            let mut renamed = task.clone();
            renamed.name = format!("{}:{}", ns, task.name);
            self.pool.insert(renamed.name.clone(), renamed);
        }
        Ok(())
    }

    fn ensure_task(&mut self, qualified: &str) -> Result<()> {
        if self.pool.contains_key(qualified) {
            return Ok(());
        }
        if let Some((ns, _)) = qualified.split_once(':') {
            let ns = ns.to_string();
            self.splice_include(&ns)?;
            if self.pool.contains_key(qualified) {
                return Ok(());
            }
        }
        Err(ResolveError::TaskNotFound(qualified.to_string()).into())
    }

    fn resolve_name(
        &mut self,
        reference: &str,
        caller_ns: &str,
        stack: &mut Vec<String>,
    ) -> Result<String> {
        let qualified = qualify(&self.pool, caller_ns, reference);
        self.ensure_task(&qualified)?;

        if stack.contains(&qualified) {
            let mut chain = stack.clone();
            chain.push(qualified);
            return Err(ResolveError::CycleDetected { chain }.into());
        }
        stack.push(qualified.clone());

        let actions = self.pool[&qualified].actions.clone();
        let ns = caller_namespace(&qualified).to_string();
        for action in &actions {
            if let Some(reference) = action.task_reference.as_deref().filter(|r| !r.is_empty()) {
                let callee = self.resolve_name(reference, &ns, stack)?;
                let callee_task = self.pool[&callee].clone();
                validate_inputs(&callee_task, &action.with)?;
            }
        }

        stack.pop();
        Ok(qualified)
    }
}

/// Validate a caller's with-map against the callee's input contracts.
///
/// Required inputs with no default must be supplied non-empty. Unknown
/// with keys and deprecated inputs warn without failing. With-values that
/// still carry unexpanded placeholders are checked again at run time.
pub fn validate_inputs(task: &Task, withs: &IndexMap<String, String>) -> ResolveResult<()> {
    let mut missing: Vec<String> = task
        .inputs
        .iter()
        .filter(|(_, spec)| spec.required && spec.default.is_empty())
        .filter(|(name, _)| withs.get(*name).map_or(true, |v| v.is_empty()))
        .map(|(name, _)| name.clone())
        .collect();
    missing.sort();
    if !missing.is_empty() {
        return Err(ResolveError::MissingInput {
            task: task.name.clone(),
            missing,
        });
    }

    let mut with_keys: Vec<&String> = withs.keys().collect();
    with_keys.sort();
    for key in with_keys {
        match task.inputs.get(key) {
            Some(spec) => {
                if let Some(message) = &spec.deprecated_message {
                    warn!(task = %task.name, input = %key, "input is deprecated: {}", message);
                }
                check_input_value(task, key, spec, &withs[key])?;
            }
            None => {
                warn!(task = %task.name, "task does not have an input named '{}'", key);
            }
        }
    }

    Ok(())
}

fn check_input_value(
    task: &Task,
    name: &str,
    spec: &InputSpec,
    value: &str,
) -> ResolveResult<()> {
    let Some(pattern) = spec.validate.as_deref().filter(|p| !p.is_empty()) else {
        return Ok(());
    };
    // Values still holding placeholders validate after templating instead.
    if value.contains("${") {
        return Ok(());
    }
    let matched = Regex::new(pattern)
        .map(|re| re.is_match(value))
        .unwrap_or(false);
    if !matched {
        return Err(ResolveError::InputMismatch {
            task: task.name.to_string(),
            input: name.to_string(),
            pattern: pattern.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::Loader;
    use std::fs;
    use tempfile::TempDir;

    fn write_manifest(dir: &TempDir, name: &str, content: &str) -> Source {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        Source::Local(path)
    }

    fn resolve(loader: &mut Loader, root: &Source, task: &str) -> Result<ResolvedTasks> {
        let manifest = loader.load(root)?;
        Resolver::new(loader, root, &manifest)?.resolve(task)
    }

    #[test]
    fn test_resolve_root_task() {
        let dir = TempDir::new().unwrap();
        let root = write_manifest(
            &dir,
            "tasks.yaml",
            r#"
tasks:
  - name: hello
    actions:
      - cmd: echo hi
"#,
        );
        let mut loader = Loader::new();
        let resolved = resolve(&mut loader, &root, "hello").unwrap();
        assert_eq!(resolved.entry_name(), "hello");
    }

    #[test]
    fn test_resolve_unknown_task() {
        let dir = TempDir::new().unwrap();
        let root = write_manifest(&dir, "tasks.yaml", "tasks: []");
        let mut loader = Loader::new();
        let result = resolve(&mut loader, &root, "nope");
        assert!(matches!(
            result,
            Err(crate::error::MaruError::Resolve(ResolveError::TaskNotFound(_)))
        ));
    }

    #[test]
    fn test_resolve_namespaced_task() {
        let dir = TempDir::new().unwrap();
        write_manifest(
            &dir,
            "sub.yaml",
            r#"
tasks:
  - name: build
    actions:
      - cmd: make
"#,
        );
        let root = write_manifest(
            &dir,
            "tasks.yaml",
            r#"
includes:
  - sub: ./sub.yaml
tasks: []
"#,
        );
        let mut loader = Loader::new();
        let resolved = resolve(&mut loader, &root, "sub:build").unwrap();
        assert_eq!(resolved.entry_name(), "sub:build");
        assert!(resolved.get("sub:build").is_some());
    }

    #[test]
    fn test_reference_resolves_namespace_relative() {
        let dir = TempDir::new().unwrap();
        write_manifest(
            &dir,
            "sub.yaml",
            r#"
tasks:
  - name: build
    actions:
      - taskReference: clean
      - cmd: make
  - name: clean
    actions:
      - cmd: make clean
"#,
        );
        let root = write_manifest(
            &dir,
            "tasks.yaml",
            r#"
includes:
  - sub: ./sub.yaml
tasks: []
"#,
        );
        let mut loader = Loader::new();
        let resolved = resolve(&mut loader, &root, "sub:build").unwrap();

        let callee = resolved.resolve_reference("sub:build", "clean").unwrap();
        assert_eq!(callee.name, "sub:clean");
    }

    #[test]
    fn test_cycle_detected_with_chain() {
        let dir = TempDir::new().unwrap();
        let root = write_manifest(
            &dir,
            "tasks.yaml",
            r#"
tasks:
  - name: a
    actions:
      - taskReference: b
  - name: b
    actions:
      - taskReference: a
"#,
        );
        let mut loader = Loader::new();
        let result = resolve(&mut loader, &root, "a");
        match result {
            Err(crate::error::MaruError::Resolve(ResolveError::CycleDetected { chain })) => {
                assert_eq!(chain, vec!["a", "b", "a"]);
            }
            other => panic!("expected cycle, got {:?}", other.map(|r| r.entry_name().to_string())),
        }
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let dir = TempDir::new().unwrap();
        let root = write_manifest(
            &dir,
            "tasks.yaml",
            r#"
tasks:
  - name: narcissist
    actions:
      - taskReference: narcissist
"#,
        );
        let mut loader = Loader::new();
        let result = resolve(&mut loader, &root, "narcissist");
        assert!(matches!(
            result,
            Err(crate::error::MaruError::Resolve(ResolveError::CycleDetected { .. }))
        ));
    }

    #[test]
    fn test_include_spliced_once() {
        let dir = TempDir::new().unwrap();
        write_manifest(
            &dir,
            "sub.yaml",
            r#"
tasks:
  - name: build
    actions:
      - cmd: make
"#,
        );
        let root = write_manifest(
            &dir,
            "tasks.yaml",
            r#"
includes:
  - sub: ./sub.yaml
tasks:
  - name: all
    actions:
      - taskReference: sub:build
      - taskReference: sub:build
"#,
        );
        let mut loader = Loader::new();
        let resolved = resolve(&mut loader, &root, "all").unwrap();
        let spliced: Vec<_> = resolved
            .tasks()
            .filter(|(name, _)| name.starts_with("sub:"))
            .collect();
        assert_eq!(spliced.len(), 1);
    }

    #[test]
    fn test_missing_input_fails_before_any_resolution_of_actions() {
        let dir = TempDir::new().unwrap();
        let root = write_manifest(
            &dir,
            "tasks.yaml",
            r#"
tasks:
  - name: all
    actions:
      - taskReference: greet
        with: {}
  - name: greet
    inputs:
      name:
        required: true
    actions:
      - cmd: echo hello
"#,
        );
        let mut loader = Loader::new();
        let result = resolve(&mut loader, &root, "all");
        match result {
            Err(crate::error::MaruError::Resolve(ResolveError::MissingInput {
                task,
                missing,
            })) => {
                assert_eq!(task, "greet");
                assert_eq!(missing, vec!["name"]);
            }
            _ => panic!("expected MissingInput"),
        }
    }

    #[test]
    fn test_missing_inputs_sorted() {
        let task: Task = serde_yaml::from_str(
            r#"
name: greet
inputs:
  zeta: {}
  alpha: {}
actions:
  - cmd: echo hi
"#,
        )
        .unwrap();
        let withs = IndexMap::new();
        match validate_inputs(&task, &withs) {
            Err(ResolveError::MissingInput { missing, .. }) => {
                assert_eq!(missing, vec!["alpha", "zeta"]);
            }
            _ => panic!("expected MissingInput"),
        }
    }

    #[test]
    fn test_unknown_with_warns_but_passes() {
        let task: Task = serde_yaml::from_str(
            r#"
name: greet
inputs:
  name:
    required: false
actions:
  - cmd: echo hi
"#,
        )
        .unwrap();
        let mut withs = IndexMap::new();
        withs.insert("unexpected".to_string(), "value".to_string());
        assert!(validate_inputs(&task, &withs).is_ok());
    }

    #[test]
    fn test_input_validate_pattern() {
        let task: Task = serde_yaml::from_str(
            r#"
name: deploy
inputs:
  env:
    validate: "^(dev|prod)$"
actions:
  - cmd: echo hi
"#,
        )
        .unwrap();
        let mut withs = IndexMap::new();
        withs.insert("env".to_string(), "prod".to_string());
        assert!(validate_inputs(&task, &withs).is_ok());

        withs.insert("env".to_string(), "staging".to_string());
        assert!(matches!(
            validate_inputs(&task, &withs),
            Err(ResolveError::InputMismatch { .. })
        ));

        // Unexpanded placeholders validate later, after templating.
        withs.insert("env".to_string(), "${TARGET}".to_string());
        assert!(validate_inputs(&task, &withs).is_ok());
    }

    #[test]
    fn test_conflicting_include_sources_rejected() {
        let dir = TempDir::new().unwrap();
        write_manifest(
            &dir,
            "one.yaml",
            r#"
includes:
  - shared: ./other.yaml
tasks:
  - name: go
    actions:
      - cmd: echo one
"#,
        );
        write_manifest(&dir, "other.yaml", "tasks: []");
        let root = write_manifest(
            &dir,
            "tasks.yaml",
            r#"
includes:
  - shared: ./one.yaml
tasks: []
"#,
        );
        // Root declares 'shared' -> one.yaml; one.yaml declares
        // 'shared' -> other.yaml. Conflicting identity must fail.
        let mut loader = Loader::new();
        let result = resolve(&mut loader, &root, "shared:go");
        assert!(result.is_err());
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let dir = TempDir::new().unwrap();
        write_manifest(
            &dir,
            "sub.yaml",
            r#"
tasks:
  - name: build
    actions:
      - cmd: make
"#,
        );
        let root = write_manifest(
            &dir,
            "tasks.yaml",
            r#"
includes:
  - sub: ./sub.yaml
tasks:
  - name: all
    actions:
      - taskReference: sub:build
"#,
        );
        let mut names_first: Vec<String> = Vec::new();
        for attempt in 0..3 {
            let mut loader = Loader::new();
            let resolved = resolve(&mut loader, &root, "all").unwrap();
            let names: Vec<String> = resolved.tasks().map(|(n, _)| n.to_string()).collect();
            if attempt == 0 {
                names_first = names;
            } else {
                assert_eq!(names, names_first);
            }
        }
    }
}
