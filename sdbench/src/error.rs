//! Benchmark error taxonomy.
//!
//! Two tiers. [`BenchError`] ends a whole invocation (or, for allocation, the
//! whole session) and is returned through `Result`. [`RowFailure`] only ends
//! the current sweep row; it is carried inside the row's outcome and the
//! sweep moves on to the next block size.

use serde::Serialize;
use std::fmt;
use std::io;
use std::path::PathBuf;

/// Errors that stop a benchmark invocation or session.
#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    #[error("Could not open '{}': {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Out of memory: transfer buffer of {requested} bytes unavailable")]
    Allocation { requested: usize },

    #[error("Pad file '{}' creation failed after {written} bytes: {reason}", path.display())]
    PadFileCreate {
        path: PathBuf,
        written: u64,
        reason: String,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Cancelled by user")]
    Cancelled,
}

impl BenchError {
    /// Whether no further benchmark can run in this session.
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, Self::Allocation { .. })
    }

    /// Whether repeating the same call later may succeed without any change
    /// of configuration.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Open { .. } | Self::PadFileCreate { .. })
    }
}

/// Storage operation named in row failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IoOp {
    Seek,
    Read,
    Write,
}

impl fmt::Display for IoOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            Self::Seek => "seek",
            Self::Read => "read",
            Self::Write => "write",
        };
        write!(f, "{value}")
    }
}

/// Why a single sweep row stopped early.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RowFailure {
    #[error("short {op} at iteration {iteration}: {transferred} of {requested} bytes")]
    ShortIo {
        op: IoOp,
        iteration: u32,
        requested: usize,
        transferred: usize,
    },

    #[error("{op} failed at iteration {iteration}: {message}")]
    Io {
        op: IoOp,
        iteration: u32,
        message: String,
    },

    #[error(
        "readback mismatch at iteration {iteration}, address {address:#x}, byte {first_difference}"
    )]
    IntegrityMismatch {
        iteration: u32,
        address: u64,
        first_difference: usize,
    },
}

impl RowFailure {
    pub fn iteration(&self) -> u32 {
        match self {
            Self::ShortIo { iteration, .. }
            | Self::Io { iteration, .. }
            | Self::IntegrityMismatch { iteration, .. } => *iteration,
        }
    }

    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::IntegrityMismatch { .. })
    }
}
