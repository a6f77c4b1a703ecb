//! Backing file lifecycle.
//!
//! Every benchmark targets one pre-sized pad file. It is written once, in 1 KiB
//! chunks of generator output, and from then on its existence is taken as
//! proof of validity: neither size nor contents are checked on reuse.

use crate::config::MIB;
use crate::error::BenchError;
use crate::pattern::PatternGenerator;
use crate::report::RowSink;
use crate::storage::{StorageBackend, StorageHandle};
use std::fmt;
use std::path::Path;
use tracing::{debug, info, warn};

/// Bytes written per chunk while materializing.
pub const PAD_CHUNK_SIZE: usize = 1024;

/// Progress is reported each time this many bytes have been written.
pub const PROGRESS_INTERVAL: u64 = MIB as u64;

/// What [`PadFileManager::ensure`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadStatus {
    /// The file was already there; nothing was written.
    Existing,
    Created { bytes: u64 },
}

impl fmt::Display for PadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Existing => write!(f, "present"),
            Self::Created { bytes } => write!(f, "created ({bytes} bytes)"),
        }
    }
}

pub struct PadFileManager<'a> {
    backend: &'a dyn StorageBackend,
}

impl<'a> PadFileManager<'a> {
    pub fn new(backend: &'a dyn StorageBackend) -> Self {
        Self { backend }
    }

    /// Make sure `path` exists, creating it with `size` bytes if not.
    ///
    /// A failed creation removes the partial file, so the next call starts
    /// over from scratch.
    pub fn ensure(
        &self,
        path: &Path,
        size: u64,
        generator: &mut PatternGenerator,
        sink: &mut dyn RowSink,
    ) -> Result<PadStatus, BenchError> {
        if self.backend.exists(path) {
            debug!(path = %path.display(), "Pad file present");
            return Ok(PadStatus::Existing);
        }

        info!(
            path = %path.display(),
            size,
            backend = self.backend.name(),
            "Creating pad file"
        );

        let handle = self.backend.create(path).map_err(|e| BenchError::PadFileCreate {
            path: path.to_path_buf(),
            written: 0,
            reason: e.to_string(),
        })?;

        match write_pattern(handle, path, size, generator, sink) {
            Ok(()) => {
                info!(path = %path.display(), size, "Pad file created");
                Ok(PadStatus::Created { bytes: size })
            }
            Err((written, reason)) => {
                warn!(path = %path.display(), written, %reason, "Pad file creation failed");
                if let Err(e) = self.backend.remove(path) {
                    warn!(path = %path.display(), error = %e, "Could not remove partial pad file");
                }
                Err(BenchError::PadFileCreate {
                    path: path.to_path_buf(),
                    written,
                    reason,
                })
            }
        }
    }
}

/// Fill the file chunk by chunk. On failure returns the bytes written so far
/// and why it stopped; the handle is closed either way.
fn write_pattern(
    mut handle: Box<dyn StorageHandle>,
    path: &Path,
    size: u64,
    generator: &mut PatternGenerator,
    sink: &mut dyn RowSink,
) -> Result<(), (u64, String)> {
    let mut chunk = [0u8; PAD_CHUNK_SIZE];
    let mut written = 0u64;

    while written < size {
        let len = usize::try_from(size - written)
            .map_or(PAD_CHUNK_SIZE, |rest| rest.min(PAD_CHUNK_SIZE));
        generator.fill(&mut chunk[..len]);

        let outcome = match handle.write(&chunk[..len]) {
            Ok(n) if n == len => Ok(()),
            Ok(n) => Err(format!("short write: {n} of {len} bytes")),
            Err(e) => Err(e.to_string()),
        };
        if let Err(reason) = outcome {
            if let Err(e) = handle.close() {
                debug!(error = %e, "Close after failed pad write");
            }
            return Err((written, reason));
        }

        written += len as u64;
        if written % PROGRESS_INTERVAL == 0 || written == size {
            sink.pad_progress(path, written, size);
        }
    }

    handle.close().map_err(|e| (written, format!("close failed: {e}")))
}
