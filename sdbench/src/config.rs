//! Benchmark configuration.
//!
//! [`BenchmarkConfig`] is built by the controller for one invocation and only
//! read by the engine. [`EnvSettings`] loads the `SDBENCH_*` layer and
//! [`CliOverrides`] lays command-line flags over it.

use crate::error::BenchError;
use crate::pattern::BLOCK_ALIGN_MASK;
use sdbench_common::{EnvParser, Sourced};
use serde::{Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub const KIB: usize = 1024;
pub const MIB: usize = 1024 * KIB;

/// Size of the backing file every benchmark targets.
pub const PAD_FILE_SIZE: u64 = 8 * MIB as u64;

/// Smallest block size in any sweep.
pub const MIN_BLOCK_SIZE: usize = 512;

/// Largest block size a write or readback sweep reaches.
pub const WRITE_BLOCK_CAP: usize = MIB;

/// Largest accepted sweep ceiling, and the default.
pub const MAX_CEILING: usize = 2 * MIB;

pub const MAX_BYTE_OFFSET: u32 = 256;

pub const DEFAULT_PAD_PATH: &str = "sdbench.pad";

/// Upper bound accepted for the inter-row pause.
pub const MAX_ROW_PAUSE_MS: u64 = 60_000;

/// Byte offset added to every transfer address.
///
/// Always 0 or a power of two up to [`MAX_BYTE_OFFSET`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ByteOffset(u32);

impl ByteOffset {
    pub fn new(value: u32) -> Option<Self> {
        (value == 0 || (value.is_power_of_two() && value <= MAX_BYTE_OFFSET)).then_some(Self(value))
    }

    pub fn value(self) -> u32 {
        self.0
    }

    /// Next offset in the cycle 0, 1, 2, 4, ..., 256, 0.
    #[must_use]
    pub fn next(self) -> Self {
        match self.0 {
            0 => Self(1),
            MAX_BYTE_OFFSET => Self(0),
            n => Self(n << 1),
        }
    }
}

impl fmt::Display for ByteOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessPattern {
    #[default]
    Random,
    Sequential,
}

impl AccessPattern {
    #[must_use]
    pub fn toggled(self) -> Self {
        match self {
            Self::Random => Self::Sequential,
            Self::Sequential => Self::Random,
        }
    }
}

impl fmt::Display for AccessPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            Self::Random => "random",
            Self::Sequential => "sequential",
        };
        write!(f, "{value}")
    }
}

/// Which processor the storage bus is granted to.
///
/// Advisory only: recorded in reports, never acted on by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BusPriority {
    #[default]
    Application,
    Coprocessor,
}

impl BusPriority {
    #[must_use]
    pub fn toggled(self) -> Self {
        match self {
            Self::Application => Self::Coprocessor,
            Self::Coprocessor => Self::Application,
        }
    }
}

impl fmt::Display for BusPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            Self::Application => "application",
            Self::Coprocessor => "coprocessor",
        };
        write!(f, "{value}")
    }
}

/// What the operator asked to measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Read,
    Write,
    Readback,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Readback => "readback",
        };
        write!(f, "{value}")
    }
}

/// Benchmark mode run by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    RandomRead,
    RandomWrite,
    SequentialRead,
    SequentialWrite,
    Readback,
}

impl Mode {
    /// Order used by the run-all command.
    pub const ALL: [Mode; 5] = [
        Mode::RandomRead,
        Mode::SequentialRead,
        Mode::RandomWrite,
        Mode::SequentialWrite,
        Mode::Readback,
    ];

    pub fn resolve(direction: Direction, access: AccessPattern) -> Self {
        match (direction, access) {
            (Direction::Read, AccessPattern::Random) => Self::RandomRead,
            (Direction::Read, AccessPattern::Sequential) => Self::SequentialRead,
            (Direction::Write, AccessPattern::Random) => Self::RandomWrite,
            (Direction::Write, AccessPattern::Sequential) => Self::SequentialWrite,
            (Direction::Readback, _) => Self::Readback,
        }
    }

    pub fn is_read(self) -> bool {
        matches!(self, Self::RandomRead | Self::SequentialRead)
    }

    pub fn is_sequential(self) -> bool {
        matches!(self, Self::SequentialRead | Self::SequentialWrite)
    }

    /// Whether transfers modify the pad file.
    pub fn writes(self) -> bool {
        matches!(self, Self::RandomWrite | Self::SequentialWrite | Self::Readback)
    }

    /// Sweep header shown above the rows.
    pub fn heading(self) -> &'static str {
        match self {
            Self::RandomRead => "Testing reads...",
            Self::SequentialRead => "Testing sequential reads...",
            Self::RandomWrite => "Testing writes...",
            Self::SequentialWrite => "Testing sequential writes...",
            Self::Readback => "Testing readback...",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            Self::RandomRead => "random-read",
            Self::RandomWrite => "random-write",
            Self::SequentialRead => "sequential-read",
            Self::SequentialWrite => "sequential-write",
            Self::Readback => "readback",
        };
        write!(f, "{value}")
    }
}

/// Region of the pad file a mode draws addresses from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Window {
    pub base: u64,
    /// Power of two.
    pub size: u64,
}

impl Window {
    pub const fn new(base: u64, size: u64) -> Self {
        Self { base, size }
    }

    /// Mask for random addresses inside the window.
    pub fn mask(&self) -> u32 {
        u32::try_from(self.size.saturating_sub(1)).unwrap_or(u32::MAX)
    }

    /// One past the last byte a transfer of `block` bytes could touch.
    pub fn reach(&self, block: usize, offset: ByteOffset, sequential: bool) -> u64 {
        let block = block as u64;
        let offset = u64::from(offset.value());
        if sequential {
            self.base + offset + self.size.max(block)
        } else {
            let highest = u64::from(self.mask() & !BLOCK_ALIGN_MASK);
            self.base + offset + highest + block
        }
    }
}

/// Per-mode windows over the pad file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WindowLayout {
    pub random_read: Window,
    pub random_write: Window,
    pub readback: Window,
    pub sequential_read: Window,
    pub sequential_write: Window,
}

impl WindowLayout {
    pub fn for_mode(&self, mode: Mode) -> Window {
        match mode {
            Mode::RandomRead => self.random_read,
            Mode::RandomWrite => self.random_write,
            Mode::Readback => self.readback,
            Mode::SequentialRead => self.sequential_read,
            Mode::SequentialWrite => self.sequential_write,
        }
    }
}

impl Default for WindowLayout {
    fn default() -> Self {
        let mib = MIB as u64;
        Self {
            random_read: Window::new(0, 4 * mib),
            random_write: Window::new(4 * mib, 2 * mib),
            readback: Window::new(6 * mib, mib),
            sequential_read: Window::new(0, 4 * mib),
            sequential_write: Window::new(4 * mib, 2 * mib),
        }
    }
}

fn serialize_pause<S: Serializer>(pause: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&humantime::format_duration(*pause))
}

/// Settings for one benchmark invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkConfig {
    pub pad_path: PathBuf,
    pub byte_offset: ByteOffset,
    /// Largest block size; also the transfer buffer size.
    pub ceiling: usize,
    pub access: AccessPattern,
    /// Ask the storage driver for a seek lookup cache before each sweep.
    pub seek_cache: bool,
    pub bus_priority: BusPriority,
    /// Pause after each row so results can be read as they appear.
    #[serde(serialize_with = "serialize_pause")]
    pub row_pause: Duration,
    pub windows: WindowLayout,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            pad_path: PathBuf::from(DEFAULT_PAD_PATH),
            byte_offset: ByteOffset::default(),
            ceiling: MAX_CEILING,
            access: AccessPattern::default(),
            seek_cache: false,
            bus_priority: BusPriority::default(),
            row_pause: Duration::ZERO,
            windows: WindowLayout::default(),
        }
    }
}

impl BenchmarkConfig {
    pub fn new(pad_path: impl Into<PathBuf>) -> Self {
        Self {
            pad_path: pad_path.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_ceiling(mut self, ceiling: usize) -> Self {
        self.ceiling = ceiling;
        self
    }

    #[must_use]
    pub fn with_byte_offset(mut self, offset: ByteOffset) -> Self {
        self.byte_offset = offset;
        self
    }

    #[must_use]
    pub fn with_access(mut self, access: AccessPattern) -> Self {
        self.access = access;
        self
    }

    #[must_use]
    pub fn with_seek_cache(mut self, enabled: bool) -> Self {
        self.seek_cache = enabled;
        self
    }

    #[must_use]
    pub fn with_bus_priority(mut self, priority: BusPriority) -> Self {
        self.bus_priority = priority;
        self
    }

    #[must_use]
    pub fn with_row_pause(mut self, pause: Duration) -> Self {
        self.row_pause = pause;
        self
    }

    #[must_use]
    pub fn with_windows(mut self, windows: WindowLayout) -> Self {
        self.windows = windows;
        self
    }

    /// Largest block a sweep of `mode` transfers.
    pub fn largest_block(&self, mode: Mode) -> usize {
        match mode {
            Mode::RandomRead | Mode::SequentialRead => self.ceiling,
            Mode::RandomWrite | Mode::SequentialWrite => self.ceiling.min(WRITE_BLOCK_CAP),
            Mode::Readback => (self.ceiling / 2).min(WRITE_BLOCK_CAP),
        }
    }

    /// Check the ceiling and that no mode can address past `pad_size`.
    pub fn validate(&self, pad_size: u64) -> Result<(), BenchError> {
        if !self.ceiling.is_power_of_two()
            || self.ceiling < MIN_BLOCK_SIZE
            || self.ceiling > MAX_CEILING
        {
            return Err(BenchError::InvalidConfig(format!(
                "ceiling {} must be a power of two between {MIN_BLOCK_SIZE} and {MAX_CEILING}",
                self.ceiling
            )));
        }

        for mode in Mode::ALL {
            let window = self.windows.for_mode(mode);
            if !window.size.is_power_of_two() || window.size < MIN_BLOCK_SIZE as u64 {
                return Err(BenchError::InvalidConfig(format!(
                    "{mode} window size {} must be a power of two of at least {MIN_BLOCK_SIZE}",
                    window.size
                )));
            }
            let reach = window.reach(
                self.largest_block(mode),
                self.byte_offset,
                mode.is_sequential(),
            );
            if reach > pad_size {
                return Err(BenchError::InvalidConfig(format!(
                    "{mode} window at {:#x} can reach byte {reach:#x}, past the {pad_size}-byte pad file",
                    window.base
                )));
            }
        }
        Ok(())
    }
}

/// The `SDBENCH_*` layer with the origin of each value.
#[derive(Debug, Clone)]
pub struct EnvSettings {
    pub pad_path: Sourced<PathBuf>,
    pub byte_offset: Sourced<ByteOffset>,
    pub ceiling: Sourced<usize>,
    pub sequential: Sourced<bool>,
    pub seek_cache: Sourced<bool>,
    pub bus_priority_coprocessor: Sourced<bool>,
    pub row_pause: Sourced<Duration>,
}

impl EnvSettings {
    /// Read every setting, leaving problems in `parser.errors()`.
    pub fn load(parser: &mut EnvParser) -> Self {
        let pad_path = parser.get_path("PAD_PATH", DEFAULT_PAD_PATH);

        let raw_offset = parser.get_u32_range("BYTE_OFFSET", 0, 0, MAX_BYTE_OFFSET);
        let byte_offset = match ByteOffset::new(raw_offset.value) {
            Some(offset) => raw_offset.map(|_| offset),
            None => {
                parser.push_invalid(
                    "BYTE_OFFSET",
                    "0 or a power of two up to 256",
                    raw_offset.value.to_string(),
                );
                Sourced::default_value(ByteOffset::default())
            }
        };

        let raw_ceiling = parser.get_u64_range(
            "CEILING",
            MAX_CEILING as u64,
            MIN_BLOCK_SIZE as u64,
            MAX_CEILING as u64,
        );
        let ceiling = if raw_ceiling.value.is_power_of_two() {
            raw_ceiling.map(|value| value as usize)
        } else {
            parser.push_invalid("CEILING", "power of two", raw_ceiling.value.to_string());
            Sourced::default_value(MAX_CEILING)
        };

        Self {
            pad_path,
            byte_offset,
            ceiling,
            sequential: parser.get_bool("SEQUENTIAL", false),
            seek_cache: parser.get_bool("SEEK_CACHE", false),
            bus_priority_coprocessor: parser.get_bool("BUS_PRIORITY_COPROCESSOR", false),
            row_pause: parser
                .get_u64_range("ROW_PAUSE_MS", 0, 0, MAX_ROW_PAUSE_MS)
                .map(Duration::from_millis),
        }
    }

    pub fn to_config(&self) -> BenchmarkConfig {
        let access = if self.sequential.value {
            AccessPattern::Sequential
        } else {
            AccessPattern::Random
        };
        let bus_priority = if self.bus_priority_coprocessor.value {
            BusPriority::Coprocessor
        } else {
            BusPriority::Application
        };
        BenchmarkConfig::new(self.pad_path.value.clone())
            .with_byte_offset(self.byte_offset.value)
            .with_ceiling(self.ceiling.value)
            .with_access(access)
            .with_seek_cache(self.seek_cache.value)
            .with_bus_priority(bus_priority)
            .with_row_pause(self.row_pause.value)
    }

    /// Apply command-line values; each one given becomes the effective value.
    #[must_use]
    pub fn with_overrides(self, cli: CliOverrides) -> Self {
        Self {
            pad_path: self.pad_path.override_with(cli.pad_path),
            byte_offset: self.byte_offset.override_with(cli.byte_offset),
            ceiling: self.ceiling.override_with(cli.ceiling),
            sequential: self.sequential.override_with(cli.sequential.then_some(true)),
            seek_cache: self.seek_cache.override_with(cli.seek_cache.then_some(true)),
            bus_priority_coprocessor: self
                .bus_priority_coprocessor
                .override_with(cli.coprocessor_priority.then_some(true)),
            row_pause: self.row_pause.override_with(cli.row_pause),
        }
    }
}

/// Command-line flags that take precedence over `SDBENCH_*`.
///
/// Switch flags can only turn a setting on; absent flags leave the
/// environment value in place.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub pad_path: Option<PathBuf>,
    pub byte_offset: Option<ByteOffset>,
    pub ceiling: Option<usize>,
    pub sequential: bool,
    pub seek_cache: bool,
    pub coprocessor_priority: bool,
    pub row_pause: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_offset_cycle() {
        let mut offset = ByteOffset::default();
        let mut seen = vec![offset.value()];
        for _ in 0..10 {
            offset = offset.next();
            seen.push(offset.value());
        }
        assert_eq!(seen, vec![0, 1, 2, 4, 8, 16, 32, 64, 128, 256, 0]);
    }

    #[test]
    fn test_byte_offset_rejects_invalid() {
        assert!(ByteOffset::new(3).is_none());
        assert!(ByteOffset::new(512).is_none());
        assert_eq!(ByteOffset::new(64).map(ByteOffset::value), Some(64));
        assert_eq!(ByteOffset::new(0), Some(ByteOffset::default()));
    }

    #[test]
    fn test_mode_resolution() {
        assert_eq!(
            Mode::resolve(Direction::Read, AccessPattern::Random),
            Mode::RandomRead
        );
        assert_eq!(
            Mode::resolve(Direction::Write, AccessPattern::Sequential),
            Mode::SequentialWrite
        );
        assert_eq!(
            Mode::resolve(Direction::Readback, AccessPattern::Sequential),
            Mode::Readback
        );
    }

    #[test]
    fn test_toggles_are_involutions() {
        assert_eq!(AccessPattern::Random.toggled().toggled(), AccessPattern::Random);
        assert_eq!(BusPriority::Application.toggled(), BusPriority::Coprocessor);
        assert_eq!(BusPriority::Coprocessor.toggled(), BusPriority::Application);
    }

    #[test]
    fn test_default_layout_fits_pad_file() {
        let config = BenchmarkConfig::default()
            .with_byte_offset(ByteOffset::new(MAX_BYTE_OFFSET).unwrap());
        config.validate(PAD_FILE_SIZE).unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_ceiling() {
        for ceiling in [256, 3000, 4 * MIB] {
            let err = BenchmarkConfig::default()
                .with_ceiling(ceiling)
                .validate(PAD_FILE_SIZE)
                .unwrap_err();
            assert!(matches!(err, BenchError::InvalidConfig(_)), "{ceiling}");
        }
    }

    #[test]
    fn test_validate_rejects_window_past_pad() {
        let windows = WindowLayout {
            readback: Window::new(7 * MIB as u64 + 512 * 1024, MIB as u64),
            ..WindowLayout::default()
        };
        let err = BenchmarkConfig::default()
            .with_windows(windows)
            .validate(PAD_FILE_SIZE)
            .unwrap_err();
        assert!(err.to_string().contains("readback"));
    }

    #[test]
    fn test_validate_small_pad() {
        assert!(BenchmarkConfig::default().validate(4 * MIB as u64).is_err());
    }

    #[test]
    fn test_window_reach() {
        let window = Window::new(0, 4 * MIB as u64);
        let offset = ByteOffset::new(256).unwrap();
        assert_eq!(
            window.reach(2 * MIB, offset, false),
            4 * MIB as u64 - 512 + 256 + 2 * MIB as u64
        );
        assert_eq!(window.reach(2 * MIB, offset, true), 4 * MIB as u64 + 256);
        assert_eq!(window.mask(), 0x3F_FFFF);
    }

    #[test]
    fn test_largest_block_per_mode() {
        let config = BenchmarkConfig::default();
        assert_eq!(config.largest_block(Mode::RandomRead), 2 * MIB);
        assert_eq!(config.largest_block(Mode::RandomWrite), MIB);
        assert_eq!(config.largest_block(Mode::Readback), MIB);

        let small = config.with_ceiling(4 * KIB);
        assert_eq!(small.largest_block(Mode::SequentialWrite), 4 * KIB);
        assert_eq!(small.largest_block(Mode::Readback), 2 * KIB);
    }

    #[test]
    fn test_config_serializes_pause_as_humantime() {
        let config = BenchmarkConfig::default().with_row_pause(Duration::from_millis(1500));
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["row_pause"], "1s 500ms");
        assert_eq!(json["access"], "random");
        assert_eq!(json["byte_offset"], 0);
    }
}
