//! Template expansion
//!
//! Substitutes `${VAR}` placeholders against the variable store. Expansion
//! is a single pass: replacements are never re-scanned, and placeholders
//! with no binding stay literal.

use crate::runner::variables::VariableStore;
use regex::Regex;
use std::sync::LazyLock;

#[allow(clippy::expect_used)]
static VAR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("constant regex pattern is valid"));

/// Expand `${VAR}` placeholders in a string
pub fn expand(text: &str, store: &VariableStore) -> String {
    VAR_PATTERN
        .replace_all(text, |caps: &regex::Captures| {
            let name = &caps[1];
            store
                .get(name)
                .map(str::to_string)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .to_string()
}

/// Expand every string in a list
pub fn expand_list(list: &[String], store: &VariableStore) -> Vec<String> {
    list.iter().map(|s| expand(s, store)).collect()
}
