//! Main CLI application

use crate::config::loader::{credentials_from_env, parse_credentials, DEFAULT_MANIFEST};
use crate::error::{ConfigError, Result};
use crate::runner::run::{list_tasks, run, RunOptions};
use clap::{Arg, ArgAction, ArgMatches, Command};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::path::PathBuf;

/// Build the clap command tree
fn build_command() -> Command {
    Command::new("maru")
        .version(env!("CARGO_PKG_VERSION"))
        .about("A YAML-driven task runner")
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Print verbose output")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(
            Command::new("run")
                .about("Run a task from the manifest")
                .arg(
                    Arg::new("task")
                        .value_name("TASK")
                        .help("Task to run (optionally namespaced, e.g. sub:build)")
                        .required_unless_present("list"),
                )
                .arg(file_arg())
                .arg(
                    Arg::new("set")
                        .long("set")
                        .value_name("K=V")
                        .help("Seed a variable (repeatable)")
                        .action(ArgAction::Append),
                )
                .arg(
                    Arg::new("with")
                        .long("with")
                        .value_name("K=V")
                        .help("Supply a task input (repeatable)")
                        .action(ArgAction::Append),
                )
                .arg(
                    Arg::new("dry-run")
                        .long("dry-run")
                        .help("Print commands without running them")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("list")
                        .long("list")
                        .help("List tasks instead of running one")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("auth")
                        .long("auth")
                        .value_name("JSON")
                        .help("Credentials map for remote includes, e.g. '{\"host\": \"token\"}'"),
                ),
        )
        .subcommand(
            Command::new("list")
                .about("List the tasks a manifest offers")
                .arg(file_arg()),
        )
}

fn file_arg() -> Arg {
    Arg::new("file")
        .short('f')
        .long("file")
        .value_name("FILE")
        .help("Path to the root manifest")
        .default_value(DEFAULT_MANIFEST)
}

/// Run the CLI application
pub fn run_cli() -> Result<()> {
    let matches = build_command().get_matches();
    init_logging(matches.get_flag("verbose"));

    match matches.subcommand() {
        Some(("run", sub)) if sub.get_flag("list") => print_tasks(sub),
        Some(("run", sub)) => run_task(sub),
        Some(("list", sub)) => print_tasks(sub),
        _ => {
            build_command().print_help().ok();
            println!();
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env("MARU_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run_task(matches: &ArgMatches) -> Result<()> {
    let manifest = manifest_path(matches);
    let task = matches
        .get_one::<String>("task")
        .cloned()
        .unwrap_or_default();

    let opts = RunOptions {
        manifest,
        task,
        withs: parse_pairs(matches, "with")?,
        set_values: parse_pairs(matches, "set")?,
        credentials: parse_auth(matches)?,
        dry_run: matches.get_flag("dry-run"),
    };
    run(&opts)
}

fn print_tasks(matches: &ArgMatches) -> Result<()> {
    let manifest = manifest_path(matches);
    for (name, description) in list_tasks(&manifest)? {
        match description {
            Some(description) => println!("{:<24} {}", name, description),
            None => println!("{}", name),
        }
    }
    Ok(())
}

fn manifest_path(matches: &ArgMatches) -> PathBuf {
    matches
        .get_one::<String>("file")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_MANIFEST))
}

/// Parse repeated `K=V` flags into an ordered map
fn parse_pairs(matches: &ArgMatches, id: &str) -> Result<IndexMap<String, String>> {
    let mut pairs = IndexMap::new();
    if let Some(values) = matches.get_many::<String>(id) {
        for value in values {
            let (key, val) = value.split_once('=').ok_or_else(|| {
                ConfigError::Schema(format!("--{} expects K=V, got '{}'", id, value))
            })?;
            pairs.insert(key.to_string(), val.to_string());
        }
    }
    Ok(pairs)
}

fn parse_auth(matches: &ArgMatches) -> Result<HashMap<String, String>> {
    match matches.get_one::<String>("auth") {
        Some(json) => Ok(parse_credentials(json)?),
        None => Ok(credentials_from_env()?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pairs() {
        let cmd = Command::new("test").arg(
            Arg::new("set")
                .long("set")
                .action(ArgAction::Append),
        );
        let matches = cmd.get_matches_from(vec!["test", "--set", "A=1", "--set", "B=two=parts"]);
        let pairs = parse_pairs(&matches, "set").unwrap();
        assert_eq!(pairs.get("A").unwrap(), "1");
        // Only the first '=' splits.
        assert_eq!(pairs.get("B").unwrap(), "two=parts");
    }

    #[test]
    fn test_parse_pairs_rejects_missing_equals() {
        let cmd = Command::new("test").arg(
            Arg::new("set")
                .long("set")
                .action(ArgAction::Append),
        );
        let matches = cmd.get_matches_from(vec!["test", "--set", "novalue"]);
        assert!(parse_pairs(&matches, "set").is_err());
    }

    #[test]
    fn test_command_parses_run_invocation() {
        let matches = build_command().get_matches_from(vec![
            "maru", "run", "sub:build", "--file", "t.yaml", "--with", "name=x", "--dry-run",
        ]);
        let (name, sub) = matches.subcommand().unwrap();
        assert_eq!(name, "run");
        assert_eq!(sub.get_one::<String>("task").unwrap(), "sub:build");
        assert!(sub.get_flag("dry-run"));
    }

    #[test]
    fn test_run_list_needs_no_task() {
        let matches = build_command().get_matches_from(vec!["maru", "run", "--list"]);
        let (_, sub) = matches.subcommand().unwrap();
        assert!(sub.get_flag("list"));
        assert!(sub.get_one::<String>("task").is_none());
    }
}
