//! Block-storage throughput and integrity benchmark.
//!
//! Measures random and sequential read/write throughput across a sweep of
//! block sizes against a fixed pad file, and checks written data reads back
//! intact. Timing, storage and presentation are traits so the engine runs
//! unchanged against real files or the simulated collaborators in
//! [`storage::MemoryStorage`] and [`timer::SimulatedTimer`].

pub mod config;
pub mod engine;
pub mod error;
pub mod format;
pub mod padfile;
pub mod pattern;
pub mod report;
pub mod session;
pub mod storage;
pub mod timer;

pub use config::{AccessPattern, BenchmarkConfig, BusPriority, ByteOffset, Direction, Mode};
pub use engine::{BenchmarkEngine, CancelToken};
pub use error::{BenchError, RowFailure};
pub use format::Throughput;
pub use padfile::{PadFileManager, PadStatus};
pub use pattern::PatternGenerator;
pub use report::{CollectingSink, ConsoleSink, JsonSink, RowOutcome, RowSink, SweepRow};
pub use session::{Action, ActionOutcome, Session};
pub use storage::{FileStorage, MemoryStorage, StorageBackend};
pub use timer::{CascadedTimer, SimulatedTimer, Ticks, TimerSource};

pub use sdbench_common::{LogConfig, init_logging};
