//! Manifest loading and discovery
//!
//! Manifests load from local paths or http(s) URLs. Remote fetches attach a
//! bearer token when the host appears in the credentials map, and a
//! per-invocation cache keyed by canonical source identity avoids refetching.

use crate::config::schema::validate_manifest;
use crate::config::types::Manifest;
use crate::error::{ConfigError, ConfigResult};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Default manifest file name
pub const DEFAULT_MANIFEST: &str = "tasks.yaml";

/// Environment variable holding the credentials map as JSON
pub const AUTH_ENV_VAR: &str = "MARU_AUTH";

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// A classified manifest source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// Filesystem path
    Local(PathBuf),
    /// http(s) URL
    Remote(String),
}

impl Source {
    /// Classify a source spec, resolving relative paths against the
    /// importing manifest's location.
    pub fn classify(spec: &str, importer: &Source) -> Source {
        if spec.starts_with("http://") || spec.starts_with("https://") {
            return Source::Remote(spec.to_string());
        }
        match importer {
            Source::Local(path) => {
                let base = path.parent().unwrap_or_else(|| Path::new("."));
                Source::Local(base.join(spec))
            }
            Source::Remote(url) => {
                let base = match url.rfind('/') {
                    Some(idx) => &url[..idx],
                    None => url.as_str(),
                };
                Source::Remote(format!("{}/{}", base, spec.trim_start_matches("./")))
            }
        }
    }

    /// Canonical identity used for the cache and the processed-includes set
    pub fn key(&self) -> String {
        match self {
            Source::Local(path) => fs::canonicalize(path)
                .unwrap_or_else(|_| path.clone())
                .display()
                .to_string(),
            Source::Remote(url) => url.clone(),
        }
    }

    /// Directory the source lives in, for env files and relative includes
    pub fn dir(&self) -> PathBuf {
        match self {
            Source::Local(path) => path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
            Source::Remote(_) => PathBuf::from("."),
        }
    }

    fn display_name(&self) -> String {
        match self {
            Source::Local(path) => path.display().to_string(),
            Source::Remote(url) => url.clone(),
        }
    }
}

/// Manifest loader with a content cache and remote credentials
pub struct Loader {
    cache: HashMap<String, Manifest>,
    credentials: HashMap<String, String>,
    strict: bool,
}

impl Loader {
    pub fn new() -> Self {
        Loader {
            cache: HashMap::new(),
            credentials: HashMap::new(),
            strict: false,
        }
    }

    /// Set the host -> token credentials map for remote fetches
    pub fn with_credentials(mut self, credentials: HashMap<String, String>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Reject manifests with unknown top-level keys
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Load and validate a manifest, consulting the cache first
    pub fn load(&mut self, source: &Source) -> ConfigResult<Manifest> {
        let key = source.key();
        if let Some(cached) = self.cache.get(&key) {
            debug!(source = %key, "manifest cache hit");
            return Ok(cached.clone());
        }

        let contents = match source {
            Source::Local(path) => fs::read_to_string(path).map_err(|e| ConfigError::Load {
                source_name: source.display_name(),
                error: e.to_string(),
            })?,
            Source::Remote(url) => self.fetch(url)?,
        };

        let manifest = parse_manifest(&contents, &source.display_name(), self.strict)?;
        validate_manifest(&manifest)?;

        self.cache.insert(key, manifest.clone());
        Ok(manifest)
    }

    /// Fetch a remote manifest, attaching auth for recognized hosts
    fn fetch(&self, url: &str) -> ConfigResult<String> {
        let source_name = url.to_string();
        let client = reqwest::blocking::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| ConfigError::Load {
                source_name: source_name.clone(),
                error: e.to_string(),
            })?;

        let mut request = client.get(url);
        if let Some(token) = self.token_for(url) {
            request = request.bearer_auth(token);
        }

        let response = request.send().map_err(|e| ConfigError::Load {
            source_name: source_name.clone(),
            error: e.to_string(),
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ConfigError::Auth {
                source_name,
                error: format!("server returned {}", status),
            });
        }
        if !status.is_success() {
            return Err(ConfigError::Load {
                source_name,
                error: format!("server returned {}", status),
            });
        }

        response.text().map_err(|e| ConfigError::Load {
            source_name: url.to_string(),
            error: e.to_string(),
        })
    }

    fn token_for(&self, url: &str) -> Option<&String> {
        let host = reqwest::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))?;
        self.credentials.get(&host)
    }
}

impl Default for Loader {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse manifest text, optionally rejecting unknown top-level keys
pub fn parse_manifest(yaml: &str, source_name: &str, strict: bool) -> ConfigResult<Manifest> {
    if strict {
        let value: serde_yaml::Value =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse {
                source_name: source_name.to_string(),
                error: e.to_string(),
            })?;
        if let serde_yaml::Value::Mapping(map) = &value {
            for key in map.keys() {
                let key = key.as_str().unwrap_or_default();
                if !matches!(key, "includes" | "variables" | "tasks") {
                    return Err(ConfigError::Parse {
                        source_name: source_name.to_string(),
                        error: format!("unknown field '{}'", key),
                    });
                }
            }
        }
    }

    serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse {
        source_name: source_name.to_string(),
        error: e.to_string(),
    })
}

/// Parse the credentials map from a JSON string (`{"host": "token"}`)
pub fn parse_credentials(json: &str) -> ConfigResult<HashMap<String, String>> {
    serde_json::from_str(json).map_err(|e| ConfigError::Parse {
        source_name: "credentials".to_string(),
        error: e.to_string(),
    })
}

/// Read the credentials map from the environment, if present
pub fn credentials_from_env() -> ConfigResult<HashMap<String, String>> {
    match env::var(AUTH_ENV_VAR) {
        Ok(json) if !json.is_empty() => parse_credentials(&json),
        _ => Ok(HashMap::new()),
    }
}
