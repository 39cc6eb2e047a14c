//! Graceful shutdown traits for cooperative background loops.
//!
//! Mirrors the `SyncShutdown`/`AsyncShutdown` split used elsewhere in the
//! Tucano ecosystem: most components can stop synchronously, but a loop
//! that owns a spawned task needs to await its join.

use std::future::Future;

/// Components that can be shut down immediately, without async operations.
pub trait SyncShutdown {
    type Result;
    fn shutdown(&mut self) -> Self::Result;
}

/// Components that need to perform async work to shut down, such as
/// signalling cancellation and awaiting a spawned task's join.
pub trait AsyncShutdown {
    type Result;
    fn shutdown(&mut self) -> impl Future<Output = Self::Result>;
}
