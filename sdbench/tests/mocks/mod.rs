//! Storage and sink doubles for failure-path tests.
//!
//! [`SeekFailingStorage`] wraps a [`MemoryStorage`] and fails one chosen
//! seek. [`CancellingSink`] raises a cancel token after a number of rows, the
//! way an operator pressing Ctrl-C mid-sweep would.

#![allow(dead_code)]

use sdbench::engine::CancelToken;
use sdbench::report::{CollectingSink, RowSink, SweepHeader, SweepRow, SweepSummary};
use sdbench::storage::{MemoryStorage, OpenMode, StorageBackend, StorageHandle};
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Fails the `fail_at`th seek (zero-based) across every handle it opens.
#[derive(Debug, Clone)]
pub struct SeekFailingStorage {
    inner: MemoryStorage,
    fail_at: u64,
    seeks: Arc<AtomicU64>,
}

impl SeekFailingStorage {
    pub fn new(inner: MemoryStorage, fail_at: u64) -> Self {
        Self {
            inner,
            fail_at,
            seeks: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn seeks(&self) -> u64 {
        self.seeks.load(Ordering::SeqCst)
    }
}

impl StorageBackend for SeekFailingStorage {
    fn name(&self) -> &'static str {
        "seek-failing"
    }

    fn exists(&self, path: &Path) -> bool {
        self.inner.exists(path)
    }

    fn open(&self, path: &Path, mode: OpenMode) -> io::Result<Box<dyn StorageHandle>> {
        let inner = self.inner.open(path, mode)?;
        Ok(Box::new(SeekFailingHandle {
            inner,
            fail_at: self.fail_at,
            seeks: Arc::clone(&self.seeks),
        }))
    }

    fn create(&self, path: &Path) -> io::Result<Box<dyn StorageHandle>> {
        self.inner.create(path)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        self.inner.remove(path)
    }
}

struct SeekFailingHandle {
    inner: Box<dyn StorageHandle>,
    fail_at: u64,
    seeks: Arc<AtomicU64>,
}

impl StorageHandle for SeekFailingHandle {
    fn seek(&mut self, offset: u64) -> io::Result<()> {
        let n = self.seeks.fetch_add(1, Ordering::SeqCst);
        if n == self.fail_at {
            return Err(io::Error::other("injected seek failure"));
        }
        self.inner.seek(offset)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn establish_seek_cache(&mut self) -> bool {
        self.inner.establish_seek_cache()
    }

    fn close(self: Box<Self>) -> io::Result<()> {
        self.inner.close()
    }
}

/// Collects like [`CollectingSink`] and cancels after `after_rows` rows.
pub struct CancellingSink {
    pub collected: CollectingSink,
    token: CancelToken,
    after_rows: usize,
}

impl CancellingSink {
    pub fn new(token: CancelToken, after_rows: usize) -> Self {
        Self {
            collected: CollectingSink::new(),
            token,
            after_rows,
        }
    }
}

impl RowSink for CancellingSink {
    fn sweep_started(&mut self, header: &SweepHeader) {
        self.collected.sweep_started(header);
    }

    fn row(&mut self, row: &SweepRow) {
        self.collected.row(row);
        if self.collected.rows.len() >= self.after_rows {
            self.token.cancel();
        }
    }

    fn sweep_finished(&mut self, summary: &SweepSummary) {
        self.collected.sweep_finished(summary);
    }
}
