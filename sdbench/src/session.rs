//! Session state and the action controller.
//!
//! A [`Session`] owns everything that outlives a single benchmark: the
//! transfer buffer (allocated once), the generator stream, the timer, the
//! storage backend and the current configuration. Operator choices arrive as
//! [`Action`] values and are dispatched here.

use crate::config::{BenchmarkConfig, Direction, Mode, PAD_FILE_SIZE};
use crate::engine::{BenchmarkEngine, CancelToken};
use crate::error::BenchError;
use crate::padfile::{PadFileManager, PadStatus};
use crate::pattern::PatternGenerator;
use crate::report::{RowSink, SweepSummary};
use crate::storage::StorageBackend;
use crate::timer::TimerSource;
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

/// Something the operator can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Benchmark(Direction),
    RunAll,
    CycleOffset,
    ToggleSeekCache,
    ToggleSequential,
    ToggleBusPriority,
    EnsurePad,
}

impl Action {
    pub const NAMES: &'static [&'static str] = &[
        "read",
        "write",
        "readback",
        "all",
        "cycle-offset",
        "toggle-seek-cache",
        "toggle-sequential",
        "toggle-bus-priority",
        "pad",
    ];

    /// Parse a comma-separated action list such as `"pad,read,cycle-offset,read"`.
    pub fn parse_list(list: &str) -> Result<Vec<Action>, BenchError> {
        list.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::parse)
            .collect()
    }
}

impl FromStr for Action {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "read" => Ok(Self::Benchmark(Direction::Read)),
            "write" => Ok(Self::Benchmark(Direction::Write)),
            "readback" => Ok(Self::Benchmark(Direction::Readback)),
            "all" => Ok(Self::RunAll),
            "cycle-offset" => Ok(Self::CycleOffset),
            "toggle-seek-cache" => Ok(Self::ToggleSeekCache),
            "toggle-sequential" => Ok(Self::ToggleSequential),
            "toggle-bus-priority" => Ok(Self::ToggleBusPriority),
            "pad" => Ok(Self::EnsurePad),
            other => Err(BenchError::InvalidConfig(format!(
                "unknown action '{other}' (expected one of {})",
                Self::NAMES.join(", ")
            ))),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Benchmark(direction) => write!(f, "{direction}"),
            Self::RunAll => write!(f, "all"),
            Self::CycleOffset => write!(f, "cycle-offset"),
            Self::ToggleSeekCache => write!(f, "toggle-seek-cache"),
            Self::ToggleSequential => write!(f, "toggle-sequential"),
            Self::ToggleBusPriority => write!(f, "toggle-bus-priority"),
            Self::EnsurePad => write!(f, "pad"),
        }
    }
}

/// Result of one dispatched action.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    Sweeps(Vec<(Mode, SweepSummary)>),
    Setting { name: &'static str, value: String },
    Pad(PadStatus),
    /// The invocation failed but the session can go on.
    Failed(String),
}

pub struct Session {
    backend: Box<dyn StorageBackend>,
    timer: Box<dyn TimerSource>,
    generator: PatternGenerator,
    buffer: Vec<u8>,
    config: BenchmarkConfig,
    cancel: CancelToken,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("backend", &self.backend.name())
            .field("buffer_len", &self.buffer.len())
            .field("generator", &self.generator)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Allocate the zeroed transfer buffer, reporting failure instead of aborting.
fn allocate_buffer(size: usize) -> Result<Vec<u8>, BenchError> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(size)
        .map_err(|_| BenchError::Allocation { requested: size })?;
    buffer.resize(size, 0);
    Ok(buffer)
}

impl Session {
    /// Check the configuration, allocate the transfer buffer and zero the
    /// timer. The buffer is sized to the ceiling and never reallocated.
    pub fn new(
        backend: Box<dyn StorageBackend>,
        mut timer: Box<dyn TimerSource>,
        config: BenchmarkConfig,
    ) -> Result<Self, BenchError> {
        config.validate(PAD_FILE_SIZE)?;
        let buffer = allocate_buffer(config.ceiling)?;
        timer.reset();

        info!(
            backend = backend.name(),
            pad = %config.pad_path.display(),
            ceiling = config.ceiling,
            tick_rate = timer.tick_rate(),
            "Session started"
        );

        Ok(Self {
            backend,
            timer,
            generator: PatternGenerator::new(),
            buffer,
            config,
            cancel: CancelToken::new(),
        })
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &BenchmarkConfig {
        &self.config
    }

    pub fn generator(&self) -> &PatternGenerator {
        &self.generator
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Materialize the pad file if it is missing.
    pub fn ensure_pad(&mut self, sink: &mut dyn RowSink) -> Result<PadStatus, BenchError> {
        PadFileManager::new(self.backend.as_ref()).ensure(
            &self.config.pad_path,
            PAD_FILE_SIZE,
            &mut self.generator,
            sink,
        )
    }

    /// Run one sweep, creating the pad file first if needed.
    pub fn run(&mut self, mode: Mode, sink: &mut dyn RowSink) -> Result<SweepSummary, BenchError> {
        self.ensure_pad(sink)?;
        BenchmarkEngine::new(
            self.backend.as_ref(),
            self.timer.as_ref(),
            &mut self.generator,
            &mut self.buffer,
        )
        .with_cancel(self.cancel.clone())
        .run(mode, &self.config, sink)
    }

    /// Every mode in [`Mode::ALL`] order, sharing this session's stream.
    pub fn run_all(
        &mut self,
        sink: &mut dyn RowSink,
    ) -> Result<Vec<(Mode, SweepSummary)>, BenchError> {
        let mut results = Vec::with_capacity(Mode::ALL.len());
        for mode in Mode::ALL {
            results.push((mode, self.run(mode, sink)?));
        }
        Ok(results)
    }

    /// Carry out one action.
    pub fn dispatch(
        &mut self,
        action: Action,
        sink: &mut dyn RowSink,
    ) -> Result<ActionOutcome, BenchError> {
        match action {
            Action::Benchmark(direction) => {
                let mode = Mode::resolve(direction, self.config.access);
                let summary = self.run(mode, sink)?;
                Ok(ActionOutcome::Sweeps(vec![(mode, summary)]))
            }
            Action::RunAll => self.run_all(sink).map(ActionOutcome::Sweeps),
            Action::EnsurePad => {
                let status = self.ensure_pad(sink)?;
                sink.setting("Pad file", &status.to_string());
                Ok(ActionOutcome::Pad(status))
            }
            Action::CycleOffset => {
                self.config.byte_offset = self.config.byte_offset.next();
                Ok(self.announce("Byte offset", self.config.byte_offset.to_string(), sink))
            }
            Action::ToggleSeekCache => {
                self.config.seek_cache = !self.config.seek_cache;
                let value = if self.config.seek_cache { "on" } else { "off" };
                Ok(self.announce("Seek cache", value.to_string(), sink))
            }
            Action::ToggleSequential => {
                self.config.access = self.config.access.toggled();
                Ok(self.announce("Access", self.config.access.to_string(), sink))
            }
            Action::ToggleBusPriority => {
                self.config.bus_priority = self.config.bus_priority.toggled();
                Ok(self.announce("Bus priority", self.config.bus_priority.to_string(), sink))
            }
        }
    }

    fn announce(&self, name: &'static str, value: String, sink: &mut dyn RowSink) -> ActionOutcome {
        info!(setting = name, %value, "Setting changed");
        sink.setting(name, &value);
        ActionOutcome::Setting { name, value }
    }

    /// Dispatch `actions` in order.
    ///
    /// A failed invocation is recorded and the script moves on, as the
    /// operator would from the menu. Cancellation and session-fatal errors
    /// end the script.
    pub fn run_script(
        &mut self,
        actions: &[Action],
        sink: &mut dyn RowSink,
    ) -> Result<Vec<ActionOutcome>, BenchError> {
        let mut outcomes = Vec::with_capacity(actions.len());
        for action in actions {
            match self.dispatch(*action, sink) {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) if e.is_session_fatal() || matches!(e, BenchError::Cancelled) => {
                    return Err(e);
                }
                Err(e) => {
                    warn!(%action, error = %e, "Action failed");
                    outcomes.push(ActionOutcome::Failed(e.to_string()));
                }
            }
        }
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AccessPattern, BusPriority, MIB};
    use crate::report::CollectingSink;
    use crate::storage::MemoryStorage;
    use crate::timer::SimulatedTimer;
    use std::path::Path;

    fn session(storage: &MemoryStorage, ceiling: usize) -> Session {
        Session::new(
            Box::new(storage.clone()),
            Box::new(SimulatedTimer::default().with_auto_step(3)),
            BenchmarkConfig::default().with_ceiling(ceiling),
        )
        .unwrap()
    }

    #[test]
    fn test_parse_action_list() {
        let actions = Action::parse_list("pad, read,cycle-offset,,READBACK").unwrap();
        assert_eq!(
            actions,
            vec![
                Action::EnsurePad,
                Action::Benchmark(Direction::Read),
                Action::CycleOffset,
                Action::Benchmark(Direction::Readback),
            ]
        );
        assert!(Action::parse_list("read,dance").is_err());
    }

    #[test]
    fn test_action_names_round_trip() {
        for name in Action::NAMES {
            let action: Action = name.parse().unwrap();
            assert_eq!(action.to_string(), *name);
        }
    }

    #[test]
    fn test_new_rejects_invalid_ceiling() {
        let err = Session::new(
            Box::new(MemoryStorage::new()),
            Box::new(SimulatedTimer::default()),
            BenchmarkConfig::default().with_ceiling(1000),
        )
        .unwrap_err();
        assert!(matches!(err, BenchError::InvalidConfig(_)));
    }

    #[test]
    fn test_allocation_failure_reported() {
        let err = allocate_buffer(usize::MAX).unwrap_err();
        assert!(err.is_session_fatal());
    }

    #[test]
    fn test_run_creates_pad_then_reuses_it() {
        let storage = MemoryStorage::new();
        let mut session = session(&storage, 4096);
        let mut sink = CollectingSink::new();

        session.run(Mode::RandomRead, &mut sink).unwrap();
        let writes_after_first = storage.stats().writes;
        assert_eq!(storage.len_of(Path::new("sdbench.pad")), Some(8 * MIB));

        session.run(Mode::SequentialRead, &mut sink).unwrap();
        assert_eq!(storage.stats().writes, writes_after_first);
        assert_eq!(sink.summaries.len(), 2);
    }

    #[test]
    fn test_settings_cycle_through_dispatch() {
        let storage = MemoryStorage::new();
        let mut session = session(&storage, 4096);
        let mut sink = CollectingSink::new();

        session.dispatch(Action::CycleOffset, &mut sink).unwrap();
        session.dispatch(Action::CycleOffset, &mut sink).unwrap();
        session.dispatch(Action::ToggleSequential, &mut sink).unwrap();
        session.dispatch(Action::ToggleBusPriority, &mut sink).unwrap();
        let outcome = session.dispatch(Action::ToggleSeekCache, &mut sink).unwrap();

        assert_eq!(session.config().byte_offset.value(), 2);
        assert_eq!(session.config().access, AccessPattern::Sequential);
        assert_eq!(session.config().bus_priority, BusPriority::Coprocessor);
        assert!(session.config().seek_cache);
        assert_eq!(
            outcome,
            ActionOutcome::Setting {
                name: "Seek cache",
                value: "on".to_string()
            }
        );
        assert_eq!(sink.settings.len(), 5);
    }

    #[test]
    fn test_benchmark_follows_access_pattern() {
        let storage = MemoryStorage::new();
        let mut session = session(&storage, 4096);
        let mut sink = CollectingSink::new();

        session.dispatch(Action::ToggleSequential, &mut sink).unwrap();
        let outcome = session
            .dispatch(Action::Benchmark(Direction::Write), &mut sink)
            .unwrap();
        match outcome {
            ActionOutcome::Sweeps(sweeps) => assert_eq!(sweeps[0].0, Mode::SequentialWrite),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_script_continues_after_failed_invocation() {
        let storage = MemoryStorage::new();
        let mut session = session(&storage, 2048);
        let mut sink = CollectingSink::new();
        session.ensure_pad(&mut sink).unwrap();
        storage.deny_open("sdbench.pad");

        let actions = Action::parse_list("read,cycle-offset").unwrap();
        let outcomes = session.run_script(&actions, &mut sink).unwrap();
        assert!(matches!(outcomes[0], ActionOutcome::Failed(_)));
        assert!(matches!(outcomes[1], ActionOutcome::Setting { .. }));
    }

    #[test]
    fn test_script_stops_on_cancel() {
        let storage = MemoryStorage::new();
        let cancel = CancelToken::new();
        let mut session = session(&storage, 2048).with_cancel(cancel.clone());
        let mut sink = CollectingSink::new();
        cancel.cancel();

        let actions = Action::parse_list("read,cycle-offset").unwrap();
        let err = session.run_script(&actions, &mut sink).unwrap_err();
        assert!(matches!(err, BenchError::Cancelled));
        assert_eq!(session.config().byte_offset.value(), 0);
        assert!(sink.rows.is_empty());
        assert_eq!(storage.stats().closes, 2);
    }

    #[test]
    fn test_ensure_pad_dispatch_reports_status() {
        let storage = MemoryStorage::new();
        let mut session = session(&storage, 2048);
        let mut sink = CollectingSink::new();
        assert_eq!(session.generator().state(), 0);

        let created = session.dispatch(Action::EnsurePad, &mut sink).unwrap();
        let state_after_create = session.generator().state();
        let existing = session.dispatch(Action::EnsurePad, &mut sink).unwrap();

        assert_eq!(
            created,
            ActionOutcome::Pad(PadStatus::Created {
                bytes: PAD_FILE_SIZE
            })
        );
        assert_eq!(existing, ActionOutcome::Pad(PadStatus::Existing));
        // Creation draws from the session stream; reuse leaves it alone.
        assert_ne!(state_after_create, 0);
        assert_eq!(session.generator().state(), state_after_create);
        assert_eq!(
            sink.settings,
            vec![
                ("Pad file".to_string(), "created (8388608 bytes)".to_string()),
                ("Pad file".to_string(), "present".to_string()),
            ]
        );
    }

    #[test]
    fn test_cancel_token_stops_run_until_reset() {
        let storage = MemoryStorage::new();
        let mut session = session(&storage, 2048);
        let mut sink = CollectingSink::new();

        session.cancel_token().cancel();
        let err = session.run(Mode::RandomRead, &mut sink).unwrap_err();
        assert!(matches!(err, BenchError::Cancelled));
        assert!(sink.rows.is_empty());

        session.cancel_token().reset();
        let summary = session.run(Mode::RandomRead, &mut sink).unwrap();
        assert!(summary.is_clean());
        assert_eq!(sink.rows.len(), 3);
    }

    #[test]
    fn test_run_all_order() {
        let storage = MemoryStorage::new();
        let mut session = session(&storage, 2048);
        let mut sink = CollectingSink::new();

        let results = session.run_all(&mut sink).unwrap();
        let modes: Vec<Mode> = results.iter().map(|(mode, _)| *mode).collect();
        assert_eq!(modes, Mode::ALL.to_vec());
        assert!(results.iter().all(|(_, summary)| summary.is_clean()));
    }
}
