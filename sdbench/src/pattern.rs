//! Deterministic address and payload generation.
//!
//! One 32-bit linear congruential generator drives everything: random seek
//! targets, pad-file contents and readback payloads. The generator is owned by
//! the session and never reseeded between benchmarks, so consecutive runs in
//! one session draw from a single continuing stream and two sessions started
//! the same way report over identical address sequences.

/// LCG multiplier.
pub const LCG_MULTIPLIER: u32 = 0xFDB9_7531;
/// LCG increment.
pub const LCG_INCREMENT: u32 = 0x0246_8ACE;
/// Low bits cleared from random addresses (512-byte alignment).
pub const BLOCK_ALIGN_MASK: u32 = 0x1FF;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternGenerator {
    state: u32,
}

impl PatternGenerator {
    /// Generator seeded at zero.
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    pub fn with_seed(seed: u32) -> Self {
        Self { state: seed }
    }

    pub fn state(&self) -> u32 {
        self.state
    }

    /// Advance and return the new state.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> u32 {
        self.state = self
            .state
            .wrapping_mul(LCG_MULTIPLIER)
            .wrapping_add(LCG_INCREMENT);
        self.state
    }

    /// Block-aligned address in `[offset, offset + window_mask]`.
    ///
    /// `window_mask` is normally `window_size - 1` for a power-of-two window.
    pub fn random_address(&mut self, window_mask: u32, offset: u32) -> u64 {
        let aligned = self.next() & !BLOCK_ALIGN_MASK;
        u64::from(aligned & window_mask) + u64::from(offset)
    }

    /// Fill `buf` with consecutive outputs, little-endian.
    ///
    /// Only `buf.len() / 4` whole words are written; trailing bytes of a
    /// length that is not a multiple of four are left as they were.
    pub fn fill(&mut self, buf: &mut [u8]) {
        for word in buf.chunks_exact_mut(4) {
            word.copy_from_slice(&self.next().to_le_bytes());
        }
    }
}

impl Default for PatternGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// One step of a sequential sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequentialStep {
    /// Where this transfer lands.
    pub address: u64,
    /// True when the cursor was at zero and an explicit seek is required;
    /// otherwise the transfer continues from the current file position.
    pub needs_seek: bool,
    pub next_cursor: u64,
}

/// Address for the transfer at `cursor` and the cursor that follows it.
///
/// `window_size` must be a power of two.
pub fn sequential_address(
    cursor: u64,
    block_size: u64,
    window_size: u64,
    offset: u64,
) -> SequentialStep {
    SequentialStep {
        address: offset + cursor,
        needs_seek: cursor == 0,
        next_cursor: cursor.wrapping_add(block_size) & (window_size - 1),
    }
}

/// Wrapping cursor over a power-of-two window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequentialCursor {
    cursor: u64,
    window_size: u64,
    offset: u64,
}

impl SequentialCursor {
    /// Returns `None` unless `window_size` is a power of two.
    pub fn new(window_size: u64, offset: u64) -> Option<Self> {
        window_size.is_power_of_two().then_some(Self {
            cursor: 0,
            window_size,
            offset,
        })
    }

    pub fn position(&self) -> u64 {
        self.cursor
    }

    pub fn advance(&mut self, block_size: u64) -> SequentialStep {
        let step = sequential_address(self.cursor, block_size, self.window_size, self.offset);
        self.cursor = step.next_cursor;
        step
    }
}
