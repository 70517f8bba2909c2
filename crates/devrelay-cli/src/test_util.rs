//! Shared helpers for `#[cfg(test)]` modules in this crate.

use std::sync::{Mutex, MutexGuard, OnceLock};

/// Serializes tests that mutate process environment variables
/// (`DATABASE_URL`, `WEBHOOK_SECRET`, `HOME`, `XDG_CONFIG_HOME`), which
/// would otherwise race across the crate's parallel test threads.
pub fn lock_env() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    match LOCK.get_or_init(|| Mutex::new(())).lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
