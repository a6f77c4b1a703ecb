//! Configuration plumbing for sdbench.
//!
//! Settings are layered: built-in defaults, then `SDBENCH_*` environment
//! variables, then command-line flags applied by the binary. Every value read
//! through [`EnvParser`] is wrapped in [`Sourced`] so `--verbose` runs can show
//! where a setting came from.

pub mod env;
pub mod source;

pub use env::{EnvError, EnvParser};
pub use source::{ConfigSource, Sourced};

#[cfg(test)]
pub(crate) fn env_test_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
