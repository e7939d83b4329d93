//! Action execution
//!
//! Turns a declarative action into a concrete command invocation: wait
//! probes translate to a readiness-utility call, defaults merge with the
//! action's overrides, the command runs under the platform shell with the
//! store injected as environment, and a retry loop bounded by the action
//! deadline drives the attempts.

use crate::config::types::{ActionWait, BaseAction, ShellPreference, truncate};
use crate::error::{ExecutionError, ExecutionResult};
use crate::runner::template::{expand, expand_list};
use crate::runner::variables::VariableStore;
use std::io::{BufRead, BufReader, Read};
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// External readiness utility invoked for wait actions
const WAIT_UTILITY: &str = "zarf tools";

/// Default wait deadline when the action sets none
const DEFAULT_WAIT_SECONDS: u64 = 300;

/// Poll interval while a child process runs
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Merged execution settings for one action
#[derive(Debug, Clone, Default)]
pub struct ActionDefaults {
    pub mute: bool,
    pub max_total_seconds: u64,
    pub max_retries: u32,
    pub dir: String,
    pub env: Vec<String>,
    pub shell: ShellPreference,
}

/// Check whether an action's `if` condition (after templating) disables it
pub fn should_skip(condition: Option<&str>, store: &VariableStore) -> bool {
    condition.is_some_and(|c| expand(c, store) == "false")
}

/// Execute a shell action under the retry/timeout policy.
///
/// `prepend_env` carries caller-supplied input assignments and
/// `append_env` the manifest env-file lines; both compose with the
/// action's own env before the store is injected.
pub fn run_action(
    base: &BaseAction,
    prepend_env: &[String],
    append_env: &[String],
    defaults: &ActionDefaults,
    store: &mut VariableStore,
    dry_run: bool,
) -> ExecutionResult<()> {
    if should_skip(base.r#if.as_deref(), store) {
        info!("Skipping action {:?}", action_label(base));
        return Ok(());
    }

    let mut action = base.clone();

    // A wait probe becomes a command against the readiness utility.
    if let Some(wait) = &action.wait {
        let timeout = action.max_total_seconds.unwrap_or(DEFAULT_WAIT_SECONDS);
        action.cmd = Some(convert_wait_to_cmd(wait, timeout)?);
        action.max_total_seconds = Some(timeout);
        action.mute = Some(true);
        action.max_retries = Some(0);
        action.dir = None;
        action.env = Vec::new();
        action.set_variables = Vec::new();
    }

    let label = action_label(&action);
    let cfg = merge_config(defaults, &action, prepend_env, append_env, store);

    let cmd = expand(action.cmd.as_deref().unwrap_or_default(), store);
    let dir = expand(&cfg.dir, store);
    let env = expand_list(&cfg.env, store);

    if dry_run {
        info!("Dry-running {:?}", label);
        println!("{}", cmd);
        return Ok(());
    }

    let deadline = (cfg.max_total_seconds > 0)
        .then(|| Instant::now() + Duration::from_secs(cfg.max_total_seconds));

    let mut last_exit = "not run".to_string();
    for attempt in 0..=cfg.max_retries {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(ExecutionError::CommandTimeout {
                cmd: label,
                seconds: cfg.max_total_seconds,
            });
        }

        if attempt > 0 {
            warn!("Retrying {:?} ({}/{})", label, attempt, cfg.max_retries);
        }

        match attempt_command(&cmd, &dir, &env, &cfg, deadline)? {
            Attempt::Succeeded(stdout) => {
                let out = stdout.trim();
                for set_variable in &action.set_variables {
                    store.set(
                        &set_variable.name,
                        out,
                        set_variable.pattern.as_deref(),
                        set_variable.sensitive,
                    )?;
                }
                info!("Completed {:?}", label);
                return Ok(());
            }
            Attempt::Failed(exit) => {
                debug!("Attempt for {:?} failed with {}", label, exit);
                last_exit = exit;
            }
            Attempt::TimedOut => {
                return Err(ExecutionError::CommandTimeout {
                    cmd: label,
                    seconds: cfg.max_total_seconds,
                });
            }
        }
    }

    Err(ExecutionError::CommandFailed {
        cmd: label,
        retries: cfg.max_retries,
        last_exit,
    })
}

fn action_label(action: &BaseAction) -> String {
    if let Some(description) = &action.description {
        return description.clone();
    }
    truncate(action.cmd.as_deref().unwrap_or("wait"), 60)
}

/// Merge the defaults with the action's non-nil overrides and compose the
/// environment: defaults, caller inputs, action env, env-file lines, the
/// variable store, then the runner extras. Later entries win.
fn merge_config(
    defaults: &ActionDefaults,
    action: &BaseAction,
    prepend_env: &[String],
    append_env: &[String],
    store: &VariableStore,
) -> ActionDefaults {
    let mut cfg = defaults.clone();

    if let Some(mute) = action.mute {
        cfg.mute = mute;
    }
    if let Some(seconds) = action.max_total_seconds {
        cfg.max_total_seconds = seconds;
    }
    if let Some(retries) = action.max_retries {
        cfg.max_retries = retries;
    }
    if let Some(dir) = &action.dir {
        cfg.dir = dir.clone();
    }
    if let Some(shell) = &action.shell {
        cfg.shell = shell.clone();
    }

    cfg.env.extend(prepend_env.iter().cloned());
    cfg.env.extend(action.env.iter().cloned());
    cfg.env.extend(append_env.iter().cloned());
    for (name, entry) in store.flatten() {
        cfg.env.push(format!("{}={}", name, entry.value));
    }
    cfg.env.extend(extra_env());

    cfg
}

/// Environment the runner appends to every action
pub fn extra_env() -> Vec<String> {
    vec![format!("MARU_ARCH={}", std::env::consts::ARCH)]
}

/// Translate a wait probe into a readiness-utility command
fn convert_wait_to_cmd(wait: &ActionWait, timeout: u64) -> ExecutionResult<String> {
    if let Some(cluster) = &wait.cluster {
        let ns = cluster
            .namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .map(|ns| format!(" -n {}", ns))
            .unwrap_or_default();
        return Ok(format!(
            "{} wait-for {} {} {}{} --timeout {}s",
            WAIT_UTILITY, cluster.kind, cluster.identifier, cluster.condition, ns, timeout
        ));
    }

    if let Some(network) = &wait.network {
        let protocol = network.protocol.to_lowercase();
        let mut code = network.code;
        if protocol.starts_with("http") && code == 0 {
            code = 200;
        }
        return Ok(format!(
            "{} wait-for {} {} {} --timeout {}s",
            WAIT_UTILITY, protocol, network.address, code, timeout
        ));
    }

    Err(ExecutionError::InvalidWait)
}

/// Platform shell command and its argument prefix
fn os_shell(pref: &ShellPreference) -> (String, Vec<String>) {
    let name = if cfg!(target_os = "windows") {
        &pref.windows
    } else if cfg!(target_os = "macos") {
        &pref.darwin
    } else {
        &pref.linux
    };

    match name.as_str() {
        "cmd" => ("cmd".to_string(), vec!["/c".to_string()]),
        "pwsh" | "powershell" => ("pwsh".to_string(), vec!["-Command".to_string()]),
        "bash" => ("bash".to_string(), vec!["-c".to_string()]),
        "sh" => ("sh".to_string(), vec!["-c".to_string()]),
        "default" | "" => {
            if cfg!(target_os = "windows") {
                ("pwsh".to_string(), vec!["-Command".to_string()])
            } else {
                ("sh".to_string(), vec!["-c".to_string()])
            }
        }
        other => (other.to_string(), vec!["-c".to_string()]),
    }
}

enum Attempt {
    Succeeded(String),
    Failed(String),
    TimedOut,
}

/// Run one attempt, bounded by the remaining time to the deadline. On the
/// deadline the child is killed and any partial output is discarded.
fn attempt_command(
    cmd: &str,
    dir: &str,
    env: &[String],
    cfg: &ActionDefaults,
    deadline: Option<Instant>,
) -> ExecutionResult<Attempt> {
    let (shell, shell_args) = os_shell(&cfg.shell);
    debug!("Running command in {}: {}", shell, cmd);

    let mut command = Command::new(&shell);
    command.args(&shell_args);
    command.arg(cmd);
    if !dir.is_empty() {
        command.current_dir(dir);
    }
    for line in env {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            command.env(key, value);
        }
    }
    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    let mut child = command
        .spawn()
        .map_err(|e| ExecutionError::Spawn(e.to_string()))?;

    let stdout = spawn_reader(child.stdout.take(), cfg.mute, false);
    let stderr = spawn_reader(child.stderr.take(), cfg.mute, true);

    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    let _ = child.kill();
                    let _ = child.wait();
                    join_reader(stdout);
                    join_reader(stderr);
                    return Ok(Attempt::TimedOut);
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ExecutionError::Spawn(e.to_string()));
            }
        }
    };

    let out = join_reader(stdout);
    let err_out = join_reader(stderr);
    if !cfg.mute {
        debug!("{} {} {}", cmd, out, err_out);
    }

    if status.success() {
        Ok(Attempt::Succeeded(out))
    } else {
        let exit = status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        Ok(Attempt::Failed(exit))
    }
}

/// Collect a child stream, forwarding lines live unless muted. Output is
/// captured either way so setVariables can read it.
fn spawn_reader<R: Read + Send + 'static>(
    stream: Option<R>,
    mute: bool,
    is_stderr: bool,
) -> Option<JoinHandle<String>> {
    let stream = stream?;
    Some(thread::spawn(move || {
        let mut collected = String::new();
        for line in BufReader::new(stream).lines() {
            let Ok(line) = line else { break };
            if !mute {
                if is_stderr {
                    eprintln!("{}", line);
                } else {
                    println!("{}", line);
                }
            }
            collected.push_str(&line);
            collected.push('\n');
        }
        collected
    }))
}

fn join_reader(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}
