use sdbench::config::PAD_FILE_SIZE;
use sdbench::pattern::PatternGenerator;
use sdbench::storage::MemoryStorage;
use sdbench::timer::SimulatedTimer;
use std::sync::Once;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

#[allow(dead_code)]
pub const PAD: &str = "sdbench.pad";

pub fn init_test_logging() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_test_writer()
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_thread_ids(true)
                    .json(),
            )
            .with(filter)
            .init();
    });
}

/// In-memory device holding a ready pad file, charging `ticks_per_kib` to
/// `timer` for every KiB moved.
#[allow(dead_code)]
pub fn padded_storage(timer: &SimulatedTimer, ticks_per_kib: u32) -> MemoryStorage {
    let storage = MemoryStorage::new().with_clock(timer.clone(), ticks_per_kib);
    let mut contents = vec![0u8; PAD_FILE_SIZE as usize];
    PatternGenerator::with_seed(0xC0FF_EE00).fill(&mut contents);
    storage.insert(PAD, contents);
    storage
}
