use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration loaded from `~/.termpool/config.toml`.
///
/// Every section and field has a default, so a missing file or a partial
/// file both produce a complete configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub limits: SessionLimits,
    #[serde(default)]
    pub terminal: TerminalConfig,
}

impl Config {
    /// Load config from `~/.termpool/config.toml`, falling back to defaults
    /// when the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(path)
        } else {
            let cfg = Config::default();
            cfg.validate()?;
            Ok(cfg)
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let cfg = Self::from_toml(&text)?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(cfg)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let cfg: Config = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        self.validate()?;
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Semantic validation for settings that are not expressible via types.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.limits.validate()?;
        self.terminal.validate()?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".termpool")
            .join("config.toml")
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("validation: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// General
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit logs as JSON lines instead of human-readable text.
    #[serde(default)]
    pub json_logs: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

// ---------------------------------------------------------------------------
// Session limits
// ---------------------------------------------------------------------------

/// Capacity policy for the session registry. Fixed once a registry is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionLimits {
    /// Hard cap on registered sessions.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Registering at or above this count logs a capacity warning.
    #[serde(default = "default_warning_threshold")]
    pub warning_threshold: usize,
    /// Most-recently-used running sessions exempt from LRU eviction.
    #[serde(default = "default_protected_count")]
    pub protected_count: usize,
    /// Delay before the final read once a process is seen to have exited.
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            warning_threshold: default_warning_threshold(),
            protected_count: default_protected_count(),
            grace_period_ms: default_grace_period_ms(),
        }
    }
}

impl SessionLimits {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_sessions == 0 {
            return Err(ConfigError::Validation(
                "limits.max_sessions must be at least 1".to_string(),
            ));
        }
        if self.protected_count >= self.max_sessions {
            return Err(ConfigError::Validation(format!(
                "limits.protected_count ({}) must be below limits.max_sessions ({})",
                self.protected_count, self.max_sessions
            )));
        }
        if self.warning_threshold > self.max_sessions {
            return Err(ConfigError::Validation(format!(
                "limits.warning_threshold ({}) must not exceed limits.max_sessions ({})",
                self.warning_threshold, self.max_sessions
            )));
        }
        Ok(())
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

fn default_max_sessions() -> usize {
    20
}
fn default_warning_threshold() -> usize {
    15
}
fn default_protected_count() -> usize {
    8
}
fn default_grace_period_ms() -> u64 {
    50
}

// ---------------------------------------------------------------------------
// Terminal tools
// ---------------------------------------------------------------------------

/// Defaults applied by the terminal tools when a call leaves a field unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalConfig {
    /// Shell used to run commands. Falls back to `$SHELL`, then `/bin/sh`.
    #[serde(default)]
    pub default_shell: Option<String>,
    /// Run commands through a login shell (`-lc` instead of `-c`).
    #[serde(default)]
    pub login_shell: bool,
    #[serde(default = "default_exec_yield_time_ms")]
    pub exec_yield_time_ms: u64,
    #[serde(default = "default_write_yield_time_ms")]
    pub write_yield_time_ms: u64,
    /// Upper bound for any caller-supplied yield time.
    #[serde(default = "default_max_yield_time_ms")]
    pub max_yield_time_ms: u64,
    #[serde(default = "default_max_output_lines")]
    pub default_max_output_lines: usize,
    #[serde(default)]
    pub default_max_output_tokens: Option<usize>,
    /// Extra environment variables for spawned commands.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Terminal width reported to spawned commands.
    #[serde(default = "default_cols")]
    pub cols: u16,
    #[serde(default = "default_rows")]
    pub rows: u16,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            default_shell: None,
            login_shell: false,
            exec_yield_time_ms: default_exec_yield_time_ms(),
            write_yield_time_ms: default_write_yield_time_ms(),
            max_yield_time_ms: default_max_yield_time_ms(),
            default_max_output_lines: default_max_output_lines(),
            default_max_output_tokens: None,
            env: BTreeMap::new(),
            cols: default_cols(),
            rows: default_rows(),
        }
    }
}

impl TerminalConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.exec_yield_time_ms > self.max_yield_time_ms
            || self.write_yield_time_ms > self.max_yield_time_ms
        {
            return Err(ConfigError::Validation(format!(
                "terminal yield defaults must not exceed terminal.max_yield_time_ms ({})",
                self.max_yield_time_ms
            )));
        }
        if self.cols == 0 || self.rows == 0 {
            return Err(ConfigError::Validation(
                "terminal.cols and terminal.rows must be > 0".to_string(),
            ));
        }
        if let Some(shell) = &self.default_shell {
            if shell.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "terminal.default_shell must not be empty when set".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// The shell commands run under.
    pub fn resolve_shell(&self) -> String {
        self.default_shell
            .clone()
            .or_else(|| std::env::var("SHELL").ok().filter(|s| !s.trim().is_empty()))
            .unwrap_or_else(|| "/bin/sh".to_string())
    }

    /// Clamp a caller-supplied yield time, using `default_ms` when absent.
    pub fn clamp_yield(&self, requested: Option<u64>, default_ms: u64) -> Duration {
        Duration::from_millis(requested.unwrap_or(default_ms).min(self.max_yield_time_ms))
    }
}

fn default_exec_yield_time_ms() -> u64 {
    10_000
}
fn default_write_yield_time_ms() -> u64 {
    250
}
fn default_max_yield_time_ms() -> u64 {
    60_000
}
fn default_cols() -> u16 {
    80
}
fn default_rows() -> u16 {
    24
}
fn default_max_output_lines() -> usize {
    256
}
