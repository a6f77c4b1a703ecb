//! Block-size sweep engine.
//!
//! One invocation opens the pad file, walks a geometric sequence of block
//! sizes and hands one row per size to the sink. A failed transfer only ends
//! its own row; the sweep carries on with the next size. The whole invocation
//! stops early only when the file cannot be opened or the operator cancels
//! between rows.

use crate::config::{BenchmarkConfig, KIB, MIB, MIN_BLOCK_SIZE, Mode, PAD_FILE_SIZE, Window};
use crate::error::{BenchError, IoOp, RowFailure};
use crate::format::{Throughput, block_size_label};
use crate::pattern::{PatternGenerator, SequentialCursor};
use crate::report::{RowOutcome, RowSink, SweepHeader, SweepRow, SweepSummary};
use crate::storage::{OpenMode, StorageBackend, StorageHandle};
use crate::timer::{Ticks, TimerSource, elapsed};
use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Iterations of the largest read block.
pub const READ_BASE_ITERATIONS: u32 = 4;

/// Iterations of the smallest write and readback block.
pub const WRITE_BASE_ITERATIONS: u32 = 1024;

/// Shared flag the controller raises to stop a sweep between rows.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear a previous cancellation so the next invocation can run.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// One block size and how many transfers to time at it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedRow {
    pub block_size: usize,
    pub iterations: u32,
}

/// Block sizes and iteration counts for a sweep of `mode`.
///
/// Reads go from the ceiling down to 512 bytes, doubling the count at every
/// size from 1 KiB up to (not including) 1 MiB. Writes and readback go from
/// 512 bytes up to `largest`, halving the count over the same range.
pub fn sweep_plan(mode: Mode, largest: usize) -> Vec<PlannedRow> {
    let scaled_sizes = KIB..MIB;
    let mut plan = Vec::new();

    if mode.is_read() {
        let mut iterations = READ_BASE_ITERATIONS;
        let mut size = largest;
        while size >= MIN_BLOCK_SIZE {
            if scaled_sizes.contains(&size) {
                iterations = iterations.saturating_mul(2);
            }
            plan.push(PlannedRow {
                block_size: size,
                iterations,
            });
            size >>= 1;
        }
    } else {
        let mut iterations = WRITE_BASE_ITERATIONS;
        let mut size = MIN_BLOCK_SIZE;
        while size <= largest {
            if scaled_sizes.contains(&size) {
                iterations = (iterations >> 1).max(1);
            }
            plan.push(PlannedRow {
                block_size: size,
                iterations,
            });
            size <<= 1;
        }
    }
    plan
}

/// What one row's transfers produced before outcome classification.
struct Measurement {
    completed: u32,
    elapsed: Ticks,
    failure: Option<RowFailure>,
}

/// Runs sweeps against one backend with session-owned state.
pub struct BenchmarkEngine<'a> {
    backend: &'a dyn StorageBackend,
    timer: &'a dyn TimerSource,
    generator: &'a mut PatternGenerator,
    buffer: &'a mut [u8],
    cancel: CancelToken,
}

impl<'a> BenchmarkEngine<'a> {
    pub fn new(
        backend: &'a dyn StorageBackend,
        timer: &'a dyn TimerSource,
        generator: &'a mut PatternGenerator,
        buffer: &'a mut [u8],
    ) -> Self {
        Self {
            backend,
            timer,
            generator,
            buffer,
            cancel: CancelToken::new(),
        }
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run one full sweep of `mode`, emitting rows to `sink` as they finish.
    pub fn run(
        &mut self,
        mode: Mode,
        config: &BenchmarkConfig,
        sink: &mut dyn RowSink,
    ) -> Result<SweepSummary, BenchError> {
        config.validate(PAD_FILE_SIZE)?;
        if self.buffer.len() < config.ceiling {
            return Err(BenchError::InvalidConfig(format!(
                "transfer buffer of {} bytes is smaller than the {}-byte ceiling",
                self.buffer.len(),
                config.ceiling
            )));
        }

        let largest = match mode {
            Mode::Readback => config.largest_block(mode).min(self.buffer.len() / 2),
            _ => config.largest_block(mode),
        };
        let plan = sweep_plan(mode, largest);
        let window = config.windows.for_mode(mode);
        let offset = config.byte_offset.value();

        let open_mode = if mode.writes() {
            OpenMode::ReadWrite
        } else {
            OpenMode::ReadOnly
        };
        let mut handle = match self.backend.open(&config.pad_path, open_mode) {
            Ok(handle) => handle,
            Err(source) => {
                warn!(path = %config.pad_path.display(), error = %source, "Could not open pad file");
                sink.notice(&format!("Could not open '{}'!", config.pad_path.display()));
                return Err(BenchError::Open {
                    path: config.pad_path.clone(),
                    source,
                });
            }
        };

        if config.seek_cache {
            let honoured = handle.establish_seek_cache();
            debug!(honoured, backend = self.backend.name(), "Seek cache requested");
        }

        info!(
            mode = %mode,
            rows = plan.len(),
            offset,
            bus_priority = %config.bus_priority,
            window_base = window.base,
            window_size = window.size,
            "Starting sweep"
        );
        sink.sweep_started(&SweepHeader {
            mode,
            backend: self.backend.name().to_string(),
            config: config.clone(),
            started_at: Utc::now(),
        });

        let mut summary = SweepSummary::default();
        for (index, planned) in plan.iter().enumerate() {
            if self.cancel.is_cancelled() {
                info!(mode = %mode, completed_rows = index, "Sweep cancelled");
                summary.cancelled = true;
                break;
            }

            let measured = self.measure_row(handle.as_mut(), mode, *planned, window, offset);
            let outcome = self.classify(mode, planned.block_size, &measured);
            if let Some(failure) = outcome.failure() {
                warn!(mode = %mode, block_size = planned.block_size, %failure, "Row failed");
            }
            debug!(
                mode = %mode,
                block_size = planned.block_size,
                iterations = planned.iterations,
                completed = measured.completed,
                ticks = measured.elapsed.0,
                status = %outcome.status_text(),
                "Row measured"
            );

            let row = SweepRow {
                block_size: planned.block_size,
                label: block_size_label(planned.block_size),
                iterations: planned.iterations,
                completed: measured.completed,
                elapsed: measured.elapsed,
                outcome,
            };
            summary.record(&row.outcome);
            sink.row(&row);

            if !config.row_pause.is_zero() && index + 1 < plan.len() {
                std::thread::sleep(config.row_pause);
            }
        }

        if let Err(e) = handle.close() {
            warn!(path = %config.pad_path.display(), error = %e, "Closing pad file failed");
        }
        sink.sweep_finished(&summary);

        if summary.cancelled {
            return Err(BenchError::Cancelled);
        }
        info!(
            mode = %mode,
            rows = summary.rows,
            errors = summary.errors,
            failures = summary.failures,
            "Sweep finished"
        );
        Ok(summary)
    }

    fn classify(&self, mode: Mode, block_size: usize, measured: &Measurement) -> RowOutcome {
        match (&measured.failure, mode) {
            (Some(failure), Mode::Readback) => RowOutcome::Fail(failure.clone()),
            (Some(failure), _) => RowOutcome::Error(failure.clone()),
            (None, Mode::Readback) => RowOutcome::Pass,
            (None, _) => {
                // A row faster than one tick is charged one tick.
                let ticks = measured.elapsed.max(Ticks(1));
                let bytes = block_size as u64 * u64::from(measured.completed);
                let seconds = self.timer.to_seconds(ticks);
                let rate = Throughput::from_transfer(bytes, seconds).unwrap_or_else(|| {
                    warn!(seconds, "Unusable elapsed time, reporting zero throughput");
                    Throughput::from_kbps(0.0)
                });
                RowOutcome::Throughput(rate)
            }
        }
    }

    fn measure_row(
        &mut self,
        handle: &mut dyn StorageHandle,
        mode: Mode,
        planned: PlannedRow,
        window: Window,
        offset: u32,
    ) -> Measurement {
        let block = planned.block_size;
        // Every row starts its sequential walk at the window base.
        let mut cursor = mode
            .is_sequential()
            .then(|| SequentialCursor::new(window.size, window.base + u64::from(offset)))
            .flatten();
        let mut completed = 0;
        let mut failure = None;

        let start = self.timer.now();
        for iteration in 0..planned.iterations {
            let result = match (mode, cursor.as_mut()) {
                (Mode::SequentialRead | Mode::SequentialWrite, Some(cursor)) => {
                    self.sequential_step(handle, mode, block, iteration, cursor)
                }
                (Mode::Readback, _) => self.readback_step(handle, block, iteration, window, offset),
                _ => self.random_step(handle, mode, block, iteration, window, offset),
            };
            if let Err(row_failure) = result {
                failure = Some(row_failure);
                break;
            }
            completed += 1;
        }
        let end = self.timer.now();

        Measurement {
            completed,
            elapsed: elapsed(start, end),
            failure,
        }
    }

    fn random_step(
        &mut self,
        handle: &mut dyn StorageHandle,
        mode: Mode,
        block: usize,
        iteration: u32,
        window: Window,
        offset: u32,
    ) -> Result<(), RowFailure> {
        let address = window.base + self.generator.random_address(window.mask(), offset);
        seek(handle, address, iteration)?;
        self.transfer(handle, mode.is_read(), block, iteration)
    }

    fn sequential_step(
        &mut self,
        handle: &mut dyn StorageHandle,
        mode: Mode,
        block: usize,
        iteration: u32,
        cursor: &mut SequentialCursor,
    ) -> Result<(), RowFailure> {
        let step = cursor.advance(block as u64);
        if step.needs_seek {
            seek(handle, step.address, iteration)?;
        }
        self.transfer(handle, mode.is_read(), block, iteration)
    }

    fn readback_step(
        &mut self,
        handle: &mut dyn StorageHandle,
        block: usize,
        iteration: u32,
        window: Window,
        offset: u32,
    ) -> Result<(), RowFailure> {
        let (payload, rest) = self.buffer.split_at_mut(block);
        let readback = &mut rest[..block];

        self.generator.fill(payload);
        let address = window.base + self.generator.random_address(window.mask(), offset);

        seek(handle, address, iteration)?;
        check_transfer(handle.write(payload), IoOp::Write, block, iteration)?;
        seek(handle, address, iteration)?;
        check_transfer(handle.read(readback), IoOp::Read, block, iteration)?;

        match payload.iter().zip(readback.iter()).position(|(a, b)| a != b) {
            Some(first_difference) => Err(RowFailure::IntegrityMismatch {
                iteration,
                address,
                first_difference,
            }),
            None => Ok(()),
        }
    }

    fn transfer(
        &mut self,
        handle: &mut dyn StorageHandle,
        read: bool,
        block: usize,
        iteration: u32,
    ) -> Result<(), RowFailure> {
        let buf = &mut self.buffer[..block];
        if read {
            check_transfer(handle.read(buf), IoOp::Read, block, iteration)
        } else {
            check_transfer(handle.write(buf), IoOp::Write, block, iteration)
        }
    }
}

fn seek(handle: &mut dyn StorageHandle, address: u64, iteration: u32) -> Result<(), RowFailure> {
    handle.seek(address).map_err(|e| RowFailure::Io {
        op: IoOp::Seek,
        iteration,
        message: e.to_string(),
    })
}

fn check_transfer(
    result: std::io::Result<usize>,
    op: IoOp,
    requested: usize,
    iteration: u32,
) -> Result<(), RowFailure> {
    match result {
        Ok(transferred) if transferred == requested => Ok(()),
        Ok(transferred) => Err(RowFailure::ShortIo {
            op,
            iteration,
            requested,
            transferred,
        }),
        Err(e) => Err(RowFailure::Io {
            op,
            iteration,
            message: e.to_string(),
        }),
    }
}
