//! Process-wide debug-print toggle.
//!
//! Mirrors the traditional environment-driven switch: the first open (or an
//! explicit [`init_debug`] call) latches `CTFKIT_DEBUG`, and diagnostic
//! prints across the crates go through [`dprint!`], which forwards to
//! `tracing` at debug level only when the toggle is on.

use std::sync::OnceLock;

static DEBUG: OnceLock<bool> = OnceLock::new();

/// Latch the debug toggle from the `CTFKIT_DEBUG` environment variable.
/// Idempotent; later calls keep the first result.
pub fn init_debug() {
    DEBUG.get_or_init(read_env);
}

/// Whether diagnostic printing is enabled. Initializes lazily.
pub fn debug_enabled() -> bool {
    *DEBUG.get_or_init(read_env)
}

fn read_env() -> bool {
    std::env::var_os("CTFKIT_DEBUG").is_some_and(|v| !v.is_empty())
}

/// Emit a diagnostic line when the debug toggle is on.
#[macro_export]
macro_rules! dprint {
    ($($arg:tt)*) => {
        if $crate::debug_enabled() {
            ::tracing::debug!($($arg)*);
        }
    };
}
