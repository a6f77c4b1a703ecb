//! Shared plumbing for sdbench: logging setup and environment-driven
//! configuration with source tracking.

pub mod config;
pub mod logging;

pub use config::{ConfigSource, EnvError, EnvParser, Sourced};
pub use logging::{LogConfig, LogFormat, LoggingError, LoggingGuards, init_logging};
