use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::action::Action;
use crate::error::ConfigError;
use crate::middleware::{Middleware, SharedMiddleware};

/// Default maximum request body size
pub const DEFAULT_JSON_LIMIT: &str = "1mb";

/// Pseudo-ref that matches every validated delivery
pub const ALL_HOOKS_REF: &str = "hook";

/// Settings of one webhook endpoint. Frozen once handed to `GitHook::new`.
#[derive(Clone)]
pub struct HookConfig {
    pub github_ref: String,
    pub action: Action,
    pub secret: Option<String>,
    pub json_limit: String,
    pub middleware: Vec<SharedMiddleware>,
    pub working_dir: Option<PathBuf>,
}

impl HookConfig {
    pub fn new(github_ref: impl Into<String>, action: impl Into<Action>) -> Self {
        Self {
            github_ref: github_ref.into(),
            action: action.into(),
            secret: None,
            json_limit: DEFAULT_JSON_LIMIT.to_string(),
            middleware: Vec::new(),
            working_dir: None,
        }
    }

    /// Runs `action` on every delivery regardless of its ref.
    pub fn for_every_hook(action: impl Into<Action>) -> Self {
        Self::new(ALL_HOOKS_REF, action)
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    pub fn with_json_limit(mut self, limit: impl Into<String>) -> Self {
        self.json_limit = limit.into();
        self
    }

    pub fn with_middleware<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Checks invariants and returns the body limit in bytes.
    pub fn validate(&self) -> Result<usize, ConfigError> {
        if self.github_ref.is_empty() {
            return Err(ConfigError::EmptyRef);
        }
        if self.secret.as_deref().is_some_and(str::is_empty) {
            return Err(ConfigError::EmptySecret);
        }
        parse_size(&self.json_limit)
    }
}

impl fmt::Debug for HookConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookConfig")
            .field("github_ref", &self.github_ref)
            .field("action", &self.action)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("json_limit", &self.json_limit)
            .field("middleware", &self.middleware.len())
            .field("working_dir", &self.working_dir)
            .finish()
    }
}

/// Parses sizes such as `1mb`, `512kb`, `100b` or `2048` (1024 based).
pub fn parse_size(input: &str) -> Result<usize, ConfigError> {
    let invalid = || ConfigError::InvalidLimit(input.to_string());
    let normalized = input.trim().to_ascii_lowercase();
    let split = normalized
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(normalized.len());
    let (number, unit) = normalized.split_at(split);

    let multiplier: f64 = match unit.trim() {
        "" | "b" => 1.0,
        "kb" => 1024.0,
        "mb" => 1024.0 * 1024.0,
        "gb" => 1024.0 * 1024.0 * 1024.0,
        _ => return Err(invalid()),
    };
    let value: f64 = number.parse().map_err(|_| invalid())?;
    let bytes = (value * multiplier).floor();

    if !bytes.is_finite() || bytes < 1.0 || bytes > usize::MAX as f64 {
        return Err(invalid());
    }
    Ok(bytes as usize)
}

/// On-disk configuration for the server binary
#[derive(Debug, Default, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(rename = "ref")]
    pub github_ref: Option<String>,
    pub action: Option<String>,
    pub secret: Option<String>,
    pub json_limit: Option<String>,
    pub working_dir: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub log_dir: Option<PathBuf>,
}

/// Load and parse the configuration file
pub fn load_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let config_str = fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        source: e,
    })?;

    toml::from_str(&config_str).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        source: e,
    })
}
