//! Logging initialisation shared by the sdbench binary and its tests.
//!
//! Benchmark rows never travel through this path; they go to the
//! presentation sink. Logs are diagnostics: what was opened, which rows
//! failed and why, how long pad-file creation took.

use crate::config::EnvParser;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt as tfmt, prelude::*};

/// Output style for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Compact,
    Json,
}

impl LogFormat {
    pub const NAMES: [&'static str; 3] = ["pretty", "compact", "json"];

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "pretty" => Some(Self::Pretty),
            "compact" => Some(Self::Compact),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            Self::Pretty => "pretty",
            Self::Compact => "compact",
            Self::Json => "json",
        };
        write!(f, "{value}")
    }
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Invalid log filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },

    #[error("Log file {path} has no file name")]
    InvalidFile { path: PathBuf },

    #[error("Failed to create log directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("A global tracing subscriber is already installed")]
    AlreadyInitialized,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default filter directive, e.g. `info` or `sdbench=debug`.
    pub level: String,
    pub format: LogFormat,
    /// Emit to stderr (stdout is reserved for benchmark rows).
    pub stderr: bool,
    /// Optional file that receives a JSON copy of every event.
    pub file: Option<PathBuf>,
}

impl LogConfig {
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            format: LogFormat::Compact,
            stderr: false,
            file: None,
        }
    }

    /// Build from `SDBENCH_LOG_LEVEL`, `SDBENCH_LOG_FORMAT` and `SDBENCH_LOG_FILE`.
    ///
    /// Invalid values fall back to defaults and stay in `parser.errors()`
    /// for the caller to report.
    pub fn from_env(parser: &mut EnvParser, default_level: &str) -> Self {
        let level = parser.get_log_level("LOG_LEVEL", default_level).value;
        let format = parser
            .get_choice("LOG_FORMAT", "compact", &LogFormat::NAMES)
            .value;
        let file = parser.get_optional_string("LOG_FILE").value.map(PathBuf::from);

        Self {
            level,
            format: LogFormat::parse(&format).unwrap_or(LogFormat::Compact),
            stderr: false,
            file,
        }
    }

    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    #[must_use]
    pub fn with_stderr(mut self) -> Self {
        self.stderr = true;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Resolve the filter: `RUST_LOG` wins over the configured level.
    pub fn filter(&self) -> Result<EnvFilter, LoggingError> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        EnvFilter::try_new(&self.level).map_err(|e| LoggingError::InvalidFilter {
            filter: self.level.clone(),
            reason: e.to_string(),
        })
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::new("info")
    }
}

/// Keeps non-blocking writers alive. Hold until the end of `main`.
#[must_use = "dropping the guards stops file logging"]
#[derive(Default)]
pub struct LoggingGuards {
    _guards: Vec<WorkerGuard>,
}

impl fmt::Debug for LoggingGuards {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggingGuards")
            .field("writers", &self._guards.len())
            .finish()
    }
}

/// Install the global tracing subscriber.
pub fn init_logging(config: &LogConfig) -> Result<LoggingGuards, LoggingError> {
    let filter = config.filter()?;
    let mut guards = Vec::new();

    let stderr_layer: Option<Box<dyn Layer<Registry> + Send + Sync>> = if config.stderr {
        let layer = tfmt::layer().with_writer(std::io::stderr).with_target(true);
        let layer = match config.format {
            LogFormat::Pretty => layer.pretty().boxed(),
            LogFormat::Compact => layer.compact().boxed(),
            LogFormat::Json => layer.json().boxed(),
        };
        Some(layer)
    } else {
        None
    };

    let file_layer = match &config.file {
        Some(path) => {
            let file_name = path
                .file_name()
                .ok_or_else(|| LoggingError::InvalidFile { path: path.clone() })?;
            let dir = match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            };
            std::fs::create_dir_all(&dir).map_err(|source| LoggingError::CreateDir {
                path: dir.clone(),
                source,
            })?;
            let appender = tracing_appender::rolling::never(&dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            guards.push(guard);
            Some(
                tfmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .with(filter)
        .try_init()
        .map_err(|_| LoggingError::AlreadyInitialized)?;

    Ok(LoggingGuards { _guards: guards })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("JSON"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse("pretty"), Some(LogFormat::Pretty));
        assert_eq!(LogFormat::parse("compact"), Some(LogFormat::Compact));
        assert_eq!(LogFormat::parse("yaml"), None);
    }

    #[test]
    fn test_builder_methods() {
        let config = LogConfig::new("info")
            .with_level("debug")
            .with_stderr()
            .with_format(LogFormat::Json)
            .with_file("logs/sdbench.jsonl");

        assert_eq!(config.level, "debug");
        assert!(config.stderr);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.file, Some(PathBuf::from("logs/sdbench.jsonl")));
    }

    #[test]
    #[allow(unsafe_code)]
    fn test_from_env_leaves_errors_in_parser() {
        let _lock = crate::config::env_test_lock();
        // SAFETY: env access is serialized by env_test_lock.
        unsafe {
            std::env::set_var("SDBENCH_LOG_LEVEL", "warn");
            std::env::set_var("SDBENCH_LOG_FORMAT", "xml");
            std::env::set_var("SDBENCH_LOG_FILE", "logs/sdbench.jsonl");
        }
        let mut parser = EnvParser::new();
        let config = LogConfig::from_env(&mut parser, "info");
        // SAFETY: as above.
        unsafe {
            for var in ["SDBENCH_LOG_LEVEL", "SDBENCH_LOG_FORMAT", "SDBENCH_LOG_FILE"] {
                std::env::remove_var(var);
            }
        }

        assert_eq!(config.level, "warn");
        assert_eq!(config.format, LogFormat::Compact);
        assert_eq!(config.file, Some(PathBuf::from("logs/sdbench.jsonl")));
        let errors = parser.take_errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("SDBENCH_LOG_FORMAT"));
    }

    #[test]
    fn test_invalid_file_rejected_before_install() {
        let config = LogConfig::new("info").with_file("/");
        let err = init_logging(&config).unwrap_err();
        assert!(matches!(err, LoggingError::InvalidFile { .. }));
    }

    #[test]
    fn test_debug_hides_guard_internals() {
        let guards = LoggingGuards::default();
        assert_eq!(format!("{guards:?}"), "LoggingGuards { writers: 0 }");
    }
}
