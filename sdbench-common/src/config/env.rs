//! `SDBENCH_*` environment parsing.
//!
//! Every getter falls back to its default on a bad value and records the
//! problem, so a single run reports all misconfigured variables together.

use super::source::Sourced;
use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

const LOG_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("Invalid value for {var}: expected {expected}, got '{value}'")]
    InvalidValue {
        var: String,
        expected: String,
        value: String,
    },

    #[error("Value out of range for {var}: {value} (valid: {min}..={max})")]
    OutOfRange {
        var: String,
        value: String,
        min: String,
        max: String,
    },

    #[error("Invalid log level for {var}: {value}")]
    InvalidLogLevel { var: String, value: String },
}

/// Reads prefixed variables and accumulates parse errors.
#[derive(Debug)]
pub struct EnvParser {
    prefix: &'static str,
    errors: Vec<EnvError>,
}

impl Default for EnvParser {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvParser {
    pub fn new() -> Self {
        Self {
            prefix: "SDBENCH_",
            errors: Vec::new(),
        }
    }

    pub fn errors(&self) -> &[EnvError] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn take_errors(&mut self) -> Vec<EnvError> {
        std::mem::take(&mut self.errors)
    }

    /// Record a domain check that failed after the value parsed.
    pub fn push_invalid(&mut self, name: &str, expected: &str, value: impl Into<String>) {
        let var = format!("{}{name}", self.prefix);
        self.invalid(var, expected, value.into());
    }

    /// Full variable name and its value, if set. A value that is not
    /// UTF-8 is recorded as an error and treated as unset.
    fn lookup(&mut self, name: &str) -> (String, Option<String>) {
        let var = format!("{}{name}", self.prefix);
        match env::var(&var) {
            Ok(value) => (var, Some(value)),
            Err(env::VarError::NotPresent) => (var, None),
            Err(env::VarError::NotUnicode(raw)) => {
                let raw = raw.to_string_lossy().into_owned();
                self.invalid(var.clone(), "UTF-8 text", raw);
                (var, None)
            }
        }
    }

    fn invalid(&mut self, var: String, expected: impl Into<String>, value: String) {
        self.errors.push(EnvError::InvalidValue {
            var,
            expected: expected.into(),
            value,
        });
    }

    /// `1/true/yes/on` or `0/false/no/off/""`, case-insensitive.
    pub fn get_bool(&mut self, name: &str, default: bool) -> Sourced<bool> {
        let (var, Some(raw)) = self.lookup(name) else {
            return Sourced::default_value(default);
        };
        let value = parse_bool(&raw).unwrap_or_else(|| {
            self.invalid(var.clone(), "boolean (true/false/1/0/yes/no)", raw);
            default
        });
        Sourced::from_env(value, var)
    }

    pub fn get_u32_range(&mut self, name: &str, default: u32, min: u32, max: u32) -> Sourced<u32> {
        self.get_range(name, default, min, max, "unsigned 32-bit integer")
    }

    pub fn get_u64_range(&mut self, name: &str, default: u64, min: u64, max: u64) -> Sourced<u64> {
        self.get_range(name, default, min, max, "unsigned 64-bit integer")
    }

    /// Unparseable values keep the default as a default; out-of-range ones
    /// keep it but are still attributed to the variable.
    fn get_range<T>(&mut self, name: &str, default: T, min: T, max: T, kind: &str) -> Sourced<T>
    where
        T: FromStr + PartialOrd + Display + Copy,
    {
        let (var, Some(raw)) = self.lookup(name) else {
            return Sourced::default_value(default);
        };
        match raw.trim().parse::<T>() {
            Ok(n) if (min..=max).contains(&n) => Sourced::from_env(n, var),
            Ok(n) => {
                self.errors.push(EnvError::OutOfRange {
                    var: var.clone(),
                    value: n.to_string(),
                    min: min.to_string(),
                    max: max.to_string(),
                });
                Sourced::from_env(default, var)
            }
            Err(_) => {
                self.invalid(var, kind, raw);
                Sourced::default_value(default)
            }
        }
    }

    /// A path with `~/` expanded. An empty variable counts as unset.
    pub fn get_path(&mut self, name: &str, default: &str) -> Sourced<PathBuf> {
        match self.lookup(name) {
            (var, Some(raw)) if !raw.is_empty() => Sourced::from_env(expand_home(&raw), var),
            _ => Sourced::default_value(expand_home(default)),
        }
    }

    pub fn get_log_level(&mut self, name: &str, default: &str) -> Sourced<String> {
        let (var, Some(raw)) = self.lookup(name) else {
            return Sourced::default_value(default.to_string());
        };
        let level = raw.to_ascii_lowercase();
        if LOG_LEVELS.contains(&level.as_str()) {
            Sourced::from_env(level, var)
        } else {
            self.errors.push(EnvError::InvalidLogLevel {
                var: var.clone(),
                value: raw,
            });
            Sourced::from_env(default.to_string(), var)
        }
    }

    /// One of `choices`, matched case-insensitively.
    pub fn get_choice(
        &mut self,
        name: &str,
        default: &'static str,
        choices: &[&'static str],
    ) -> Sourced<String> {
        let (var, Some(raw)) = self.lookup(name) else {
            return Sourced::default_value(default.to_string());
        };
        let choice = raw.trim().to_ascii_lowercase();
        if choices.contains(&choice.as_str()) {
            return Sourced::from_env(choice, var);
        }
        self.invalid(var.clone(), format!("one of {}", choices.join("/")), raw);
        Sourced::from_env(default.to_string(), var)
    }

    /// `None` when unset or empty.
    pub fn get_optional_string(&mut self, name: &str) -> Sourced<Option<String>> {
        match self.lookup(name) {
            (var, Some(raw)) => Sourced::from_env(Some(raw).filter(|v| !v.is_empty()), var),
            (_, None) => Sourced::default_value(None),
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

/// Expand a leading `~/` to the home directory.
pub fn expand_home(value: &str) -> PathBuf {
    if let Some(rest) = value.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(value)
}
