//! Monotonic-enough wall clock and unguessable token generation.
//!
//! Both are injected rather than called directly so that the dispatcher and
//! watchdog can be driven deterministically in tests.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use rand::RngCore;

/// Source of "now", injected so tests can freeze or advance time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Real-time [`Clock`] backed by the system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Source of unguessable credentials, injected so tests can produce
/// deterministic tokens.
pub trait TokenSource: Send + Sync {
    /// Generates a fresh 32-byte URL-safe random token (no namespace prefix).
    fn opaque_token(&self) -> String;
}

/// [`TokenSource`] backed by the OS CSPRNG via `rand`.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsTokenSource;

impl TokenSource for OsTokenSource {
    fn opaque_token(&self) -> String {
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }
}
