//! Storage I/O collaborator.
//!
//! The engine only needs byte-addressable files: open, absolute seek, read,
//! write, close. [`FileStorage`] maps that onto the host filesystem;
//! [`MemoryStorage`] keeps files in memory, counts every operation and can
//! inject short transfers or corrupted reads for failure-path testing.
//!
//! Transfers report how many bytes moved. A count lower than requested is a
//! short transfer; the storage layer does not raise a distinct error for it.

use crate::timer::SimulatedTimer;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// How an existing file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenMode {
    ReadOnly,
    /// Read-write; the file must already exist.
    ReadWrite,
}

/// An open file on the device under test.
pub trait StorageHandle {
    /// Seek to an absolute byte offset.
    fn seek(&mut self, offset: u64) -> io::Result<()>;

    /// Read up to `buf.len()` bytes, returning the count transferred.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write `buf`, returning the count transferred.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Ask the driver to build a seek lookup cache for this handle.
    ///
    /// Advisory. Returns whether the backend honoured it.
    fn establish_seek_cache(&mut self) -> bool {
        false
    }

    /// Flush and release the handle.
    fn close(self: Box<Self>) -> io::Result<()>;
}

/// A filesystem on the device under test.
pub trait StorageBackend {
    /// Short backend name for logs and reports.
    fn name(&self) -> &'static str;

    /// Whether `path` can be opened for reading.
    fn exists(&self, path: &Path) -> bool;

    fn open(&self, path: &Path, mode: OpenMode) -> io::Result<Box<dyn StorageHandle>>;

    /// Create (or truncate) `path` for writing.
    fn create(&self, path: &Path) -> io::Result<Box<dyn StorageHandle>>;

    fn remove(&self, path: &Path) -> io::Result<()>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Host filesystem
// ---------------------------------------------------------------------------

/// Host filesystem backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileStorage;

impl FileStorage {
    pub fn new() -> Self {
        Self
    }
}

impl StorageBackend for FileStorage {
    fn name(&self) -> &'static str {
        "file"
    }

    fn exists(&self, path: &Path) -> bool {
        File::open(path).is_ok()
    }

    fn open(&self, path: &Path, mode: OpenMode) -> io::Result<Box<dyn StorageHandle>> {
        let file = match mode {
            OpenMode::ReadOnly => File::open(path)?,
            OpenMode::ReadWrite => OpenOptions::new().read(true).write(true).open(path)?,
        };
        Ok(Box::new(FileHandle {
            file,
            writable: mode == OpenMode::ReadWrite,
        }))
    }

    fn create(&self, path: &Path) -> io::Result<Box<dyn StorageHandle>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Box::new(FileHandle {
            file,
            writable: true,
        }))
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }
}

struct FileHandle {
    file: File,
    writable: bool,
}

impl StorageHandle for FileHandle {
    fn seek(&mut self, offset: u64) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset)).map(|_| ())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut total = 0;
        while total < buf.len() {
            match self.file.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if total == 0 => return Err(e),
                Err(e) => {
                    debug!(error = %e, transferred = total, "Read stopped early");
                    break;
                }
            }
        }
        Ok(total)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut total = 0;
        while total < buf.len() {
            match self.file.write(&buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if total == 0 => return Err(e),
                Err(e) => {
                    debug!(error = %e, transferred = total, "Write stopped early");
                    break;
                }
            }
        }
        Ok(total)
    }

    fn close(self: Box<Self>) -> io::Result<()> {
        if self.writable {
            self.file.sync_data()?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

/// Operation counters shared by every handle of a [`MemoryStorage`].
#[derive(Debug, Default)]
struct Counters {
    opens: AtomicU64,
    seeks: AtomicU64,
    reads: AtomicU64,
    writes: AtomicU64,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    seek_cache_requests: AtomicU64,
    closes: AtomicU64,
}

/// Snapshot of [`MemoryStorage`] activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IoStats {
    pub opens: u64,
    pub seeks: u64,
    pub reads: u64,
    pub writes: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub seek_cache_requests: u64,
    pub closes: u64,
}

/// Faults armed on a [`MemoryStorage`]. Indices count operations of that
/// kind from the moment the fault was armed, starting at zero.
#[derive(Debug, Default)]
struct Faults {
    short_read_at: Option<u64>,
    short_write_at: Option<u64>,
    corrupt_read_at: Option<u64>,
    failing_write_from: Option<u64>,
    read_ops: u64,
    write_ops: u64,
    denied_opens: HashSet<PathBuf>,
}

type FileData = Arc<Mutex<Vec<u8>>>;

#[derive(Debug, Default)]
struct MemoryInner {
    files: Mutex<HashMap<PathBuf, FileData>>,
    counters: Counters,
    seek_log: Mutex<Vec<u64>>,
    faults: Mutex<Faults>,
    clock: Mutex<Option<(SimulatedTimer, u32)>>,
}

/// In-memory backend with operation accounting and fault injection.
///
/// Clones share state, so a test can keep one clone for inspection while the
/// session owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<MemoryInner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance `clock` by `ticks_per_kib` for every KiB transferred, so
    /// throughput numbers come out deterministic.
    #[must_use]
    pub fn with_clock(self, clock: SimulatedTimer, ticks_per_kib: u32) -> Self {
        *lock(&self.inner.clock) = Some((clock, ticks_per_kib));
        self
    }

    /// Install a file with the given contents.
    pub fn insert(&self, path: impl Into<PathBuf>, data: Vec<u8>) {
        lock(&self.inner.files).insert(path.into(), Arc::new(Mutex::new(data)));
    }

    /// Copy of a file's contents.
    pub fn contents(&self, path: &Path) -> Option<Vec<u8>> {
        lock(&self.inner.files).get(path).map(|data| lock(data).clone())
    }

    pub fn len_of(&self, path: &Path) -> Option<usize> {
        lock(&self.inner.files).get(path).map(|data| lock(data).len())
    }

    pub fn stats(&self) -> IoStats {
        let c = &self.inner.counters;
        IoStats {
            opens: c.opens.load(Ordering::SeqCst),
            seeks: c.seeks.load(Ordering::SeqCst),
            reads: c.reads.load(Ordering::SeqCst),
            writes: c.writes.load(Ordering::SeqCst),
            bytes_read: c.bytes_read.load(Ordering::SeqCst),
            bytes_written: c.bytes_written.load(Ordering::SeqCst),
            seek_cache_requests: c.seek_cache_requests.load(Ordering::SeqCst),
            closes: c.closes.load(Ordering::SeqCst),
        }
    }

    /// Every absolute seek target, in order.
    pub fn seek_log(&self) -> Vec<u64> {
        lock(&self.inner.seek_log).clone()
    }

    pub fn clear_seek_log(&self) {
        lock(&self.inner.seek_log).clear();
    }

    /// The `n`th read from now transfers only half of what was asked.
    pub fn inject_short_read(&self, n: u64) {
        let mut faults = lock(&self.inner.faults);
        faults.short_read_at = Some(n);
        faults.read_ops = 0;
    }

    /// The `n`th write from now transfers only half of what was asked.
    pub fn inject_short_write(&self, n: u64) {
        let mut faults = lock(&self.inner.faults);
        faults.short_write_at = Some(n);
        faults.write_ops = 0;
    }

    /// Every write from the `n`th on transfers nothing.
    pub fn inject_write_failure_from(&self, n: u64) {
        let mut faults = lock(&self.inner.faults);
        faults.failing_write_from = Some(n);
        faults.write_ops = 0;
    }

    /// The `n`th read from now returns data with its first byte flipped.
    pub fn inject_corrupt_read(&self, n: u64) {
        let mut faults = lock(&self.inner.faults);
        faults.corrupt_read_at = Some(n);
        faults.read_ops = 0;
    }

    /// Make `open` and `exists` fail for `path`.
    pub fn deny_open(&self, path: impl Into<PathBuf>) {
        lock(&self.inner.faults).denied_opens.insert(path.into());
    }

    pub fn clear_faults(&self) {
        *lock(&self.inner.faults) = Faults::default();
    }

    fn is_denied(&self, path: &Path) -> bool {
        lock(&self.inner.faults).denied_opens.contains(path)
    }

    fn handle(&self, data: FileData, mode: OpenMode) -> Box<dyn StorageHandle> {
        self.inner.counters.opens.fetch_add(1, Ordering::SeqCst);
        Box::new(MemoryHandle {
            storage: self.clone(),
            data,
            position: 0,
            writable: mode == OpenMode::ReadWrite,
        })
    }

    fn charge_time(&self, bytes: usize) {
        if let Some((clock, ticks_per_kib)) = lock(&self.inner.clock).as_ref() {
            let kib = (bytes as u64).div_ceil(1024);
            let ticks = kib.saturating_mul(u64::from(*ticks_per_kib));
            clock.advance(u32::try_from(ticks).unwrap_or(u32::MAX));
        }
    }
}

impl StorageBackend for MemoryStorage {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn exists(&self, path: &Path) -> bool {
        !self.is_denied(path) && lock(&self.inner.files).contains_key(path)
    }

    fn open(&self, path: &Path, mode: OpenMode) -> io::Result<Box<dyn StorageHandle>> {
        if self.is_denied(path) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("open denied for {}", path.display()),
            ));
        }
        let data = lock(&self.inner.files)
            .get(path)
            .cloned()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no such file: {}", path.display()),
                )
            })?;
        Ok(self.handle(data, mode))
    }

    fn create(&self, path: &Path) -> io::Result<Box<dyn StorageHandle>> {
        if self.is_denied(path) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("create denied for {}", path.display()),
            ));
        }
        let data: FileData = Arc::new(Mutex::new(Vec::new()));
        lock(&self.inner.files).insert(path.to_path_buf(), Arc::clone(&data));
        Ok(self.handle(data, OpenMode::ReadWrite))
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        lock(&self.inner.files)
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))
    }
}

struct MemoryHandle {
    storage: MemoryStorage,
    data: FileData,
    position: u64,
    writable: bool,
}

impl StorageHandle for MemoryHandle {
    fn seek(&mut self, offset: u64) -> io::Result<()> {
        let inner = &self.storage.inner;
        inner.counters.seeks.fetch_add(1, Ordering::SeqCst);
        lock(&inner.seek_log).push(offset);
        self.position = offset;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let inner = &self.storage.inner;
        let (short, corrupt) = {
            let mut faults = lock(&inner.faults);
            let op = faults.read_ops;
            faults.read_ops += 1;
            (
                faults.short_read_at == Some(op),
                faults.corrupt_read_at == Some(op),
            )
        };

        let data = lock(&self.data);
        let start = usize::try_from(self.position).unwrap_or(usize::MAX).min(data.len());
        let mut count = buf.len().min(data.len() - start);
        if short {
            count = count.min(buf.len() / 2);
        }
        buf[..count].copy_from_slice(&data[start..start + count]);
        drop(data);

        if corrupt && count > 0 {
            buf[0] ^= 0xFF;
        }

        self.position += count as u64;
        inner.counters.reads.fetch_add(1, Ordering::SeqCst);
        inner.counters.bytes_read.fetch_add(count as u64, Ordering::SeqCst);
        self.storage.charge_time(count);
        Ok(count)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.writable {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "handle opened read-only",
            ));
        }
        let inner = &self.storage.inner;
        let (short, failing) = {
            let mut faults = lock(&inner.faults);
            let op = faults.write_ops;
            faults.write_ops += 1;
            (
                faults.short_write_at == Some(op),
                faults.failing_write_from.is_some_and(|from| op >= from),
            )
        };

        let count = if failing {
            0
        } else if short {
            buf.len() / 2
        } else {
            buf.len()
        };

        let start = usize::try_from(self.position)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset too large"))?;
        let mut data = lock(&self.data);
        if data.len() < start + count {
            data.resize(start + count, 0);
        }
        data[start..start + count].copy_from_slice(&buf[..count]);
        drop(data);

        self.position += count as u64;
        inner.counters.writes.fetch_add(1, Ordering::SeqCst);
        inner.counters.bytes_written.fetch_add(count as u64, Ordering::SeqCst);
        self.storage.charge_time(count);
        Ok(count)
    }

    fn establish_seek_cache(&mut self) -> bool {
        self.storage
            .inner
            .counters
            .seek_cache_requests
            .fetch_add(1, Ordering::SeqCst);
        true
    }

    fn close(self: Box<Self>) -> io::Result<()> {
        self.storage.inner.counters.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
