//! Environment-driven configuration.
//!
//! Variables owned by aexec carry the `AEXEC_` prefix. Two variables keep the
//! names the Go distribution already uses for its Android exec wrapper:
//! `GOANDROID_ADB_FLAGS` and `GOPROXY`.
//!
//! Parse errors are collected so every problem can be reported at once.

use crate::layout::DEFAULT_DEVICE_ROOT;
use std::path::PathBuf;
use thiserror::Error;

/// Flags prepended to every relay invocation, split on single spaces.
pub const RELAY_FLAGS_VAR: &str = "GOANDROID_ADB_FLAGS";

/// Module proxy setting forwarded verbatim to the device.
pub const PROXY_VAR: &str = "GOPROXY";

/// Errors that can occur during environment variable parsing.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Invalid value for a variable.
    #[error("Invalid value for {var}: expected {expected}, got '{value}'")]
    InvalidValue {
        var: String,
        expected: String,
        value: String,
    },

    /// Invalid log level.
    #[error("Invalid log level for {var}: {value}")]
    InvalidLogLevel { var: String, value: String },

    /// More than one variable was invalid.
    #[error("{}", join_errors(.0))]
    Multiple(Vec<EnvError>),
}

fn join_errors(errors: &[EnvError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Type-safe environment variable parser.
///
/// The lookup function is injectable so configuration can be exercised
/// without touching the process environment.
pub struct EnvParser<F = fn(&str) -> Option<String>> {
    prefix: &'static str,
    lookup: F,
    errors: Vec<EnvError>,
}

fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

impl EnvParser {
    /// Create a parser over the process environment with the AEXEC_ prefix.
    pub fn new() -> Self {
        Self::with_lookup(process_env)
    }
}

impl Default for EnvParser {
    fn default() -> Self {
        Self::new()
    }
}

impl<F> EnvParser<F>
where
    F: Fn(&str) -> Option<String>,
{
    pub fn with_lookup(lookup: F) -> Self {
        Self {
            prefix: "AEXEC_",
            lookup,
            errors: Vec::new(),
        }
    }

    /// Consume the parser, folding accumulated errors into one.
    pub fn finish(mut self) -> Result<(), EnvError> {
        match self.errors.len() {
            0 => Ok(()),
            1 => Err(self.errors.remove(0)),
            _ => Err(EnvError::Multiple(self.errors)),
        }
    }

    fn var_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    /// Get a prefixed string value with default.
    pub fn get_string(&mut self, name: &str, default: &str) -> String {
        (self.lookup)(&self.var_name(name))
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| default.to_string())
    }

    /// Get an optional prefixed string (None if not set or empty).
    pub fn get_optional_string(&mut self, name: &str) -> Option<String> {
        (self.lookup)(&self.var_name(name)).filter(|value| !value.is_empty())
    }

    /// Get an unprefixed variable verbatim (empty if unset).
    pub fn get_raw(&mut self, var: &str) -> String {
        (self.lookup)(var).unwrap_or_default()
    }

    /// Get an absolute, slash-separated device path.
    pub fn get_device_path(&mut self, name: &str, default: &str) -> String {
        let var_name = self.var_name(name);
        let Some(value) = (self.lookup)(&var_name).filter(|v| !v.is_empty()) else {
            return default.to_string();
        };
        let trimmed = value.trim_end_matches('/');
        if !value.starts_with('/') || trimmed.is_empty() {
            self.errors.push(EnvError::InvalidValue {
                var: var_name,
                expected: "absolute device path other than /".to_string(),
                value,
            });
            return default.to_string();
        }
        trimmed.to_string()
    }

    /// Get a log level value with validation.
    pub fn get_log_level(&mut self, name: &str, default: &str) -> String {
        let var_name = self.var_name(name);
        match (self.lookup)(&var_name) {
            Some(value) if !value.is_empty() => {
                let lower = value.to_lowercase();
                match lower.as_str() {
                    "trace" | "debug" | "info" | "warn" | "error" | "off" => lower,
                    _ => {
                        self.errors.push(EnvError::InvalidLogLevel {
                            var: var_name,
                            value,
                        });
                        default.to_string()
                    }
                }
            }
            _ => default.to_string(),
        }
    }
}

/// Runtime configuration for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecConfig {
    /// Relay program, normally `adb`.
    pub relay_program: String,
    /// Extra arguments placed before every relay command.
    pub relay_flags: Vec<String>,
    /// Value exported as GOPROXY on the device.
    pub proxy: String,
    /// Root directory on the device.
    pub device_root: String,
    /// Host directory holding the relay lock and sync status files.
    pub state_dir: PathBuf,
}

impl ExecConfig {
    pub fn from_env() -> Result<Self, EnvError> {
        Self::from_parser(EnvParser::new())
    }

    pub fn from_parser<F>(mut parser: EnvParser<F>) -> Result<Self, EnvError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let relay_program = parser.get_string("RELAY", "adb");
        let relay_flags = split_relay_flags(&parser.get_raw(RELAY_FLAGS_VAR));
        let proxy = parser.get_raw(PROXY_VAR);
        let device_root = parser.get_device_path("DEVICE_ROOT", DEFAULT_DEVICE_ROOT);
        let state_dir = parser
            .get_optional_string("STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);
        parser.finish()?;

        Ok(Self {
            relay_program,
            relay_flags,
            proxy,
            device_root,
            state_dir,
        })
    }
}

/// Split the flag-injection variable on single spaces. Empty means no flags.
pub fn split_relay_flags(raw: &str) -> Vec<String> {
    if raw.is_empty() {
        return Vec::new();
    }
    raw.split(' ').map(str::to_string).collect()
}
