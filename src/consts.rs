//! Project-wide constants.

use std::path::PathBuf;

pub const AUTHOR: &str = env!("CARGO_PKG_AUTHORS");
pub const HOMEPAGE: &str = env!("CARGO_PKG_HOMEPAGE");
pub const REPO: &str = env!("CARGO_PKG_REPOSITORY");

/// Capability used when the caller does not ask for one.
pub const DEFAULT_CAPABILITY: &str = "haiku";

/// Inclusive bounds on submitted text, in characters.
pub const MIN_TEXT_CHARS: usize = 10;
pub const MAX_TEXT_CHARS: usize = 5000;

/// Trailing window for per-caller rate limiting.
pub const DEFAULT_RATE_WINDOW_SECS: u64 = 3600;
/// Longest accepted rate window: 30 days.
pub const MAX_RATE_WINDOW_SECS: u64 = 30 * 24 * 3600;
pub const DEFAULT_ANONYMOUS_LIMIT: u32 = 5;
pub const DEFAULT_AUTHENTICATED_LIMIT: u32 = 50;
/// Minimum gap between opportunistic sweeps of the limiter table.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;

/// Deadline for a single provider attempt.
pub const DEFAULT_ATTEMPT_TIMEOUT_SECS: u64 = 30;
/// Additional attempts after the first one fails transiently.
pub const DEFAULT_MAX_RETRIES: u32 = 2;
/// First backoff delay; doubles on every retry.
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 1000;

/// Number of sessions `redpen history` shows by default.
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Default database path: `~/.redpen/redpen.db`.
/// Single DB for config, sessions and the phrase bank.
pub fn default_db_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".redpen").join("redpen.db"))
}

/// Format a number with comma separators (e.g. 1,234,567).
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i).is_multiple_of(3) {
            result.push(',');
        }
        result.push(c);
    }
    result
}
