#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    unused_crate_dependencies,
    unused_extern_crates,
    clippy::unused_self,
    missing_debug_implementations,
    rust_2018_idioms
)]
#![allow(clippy::type_complexity, clippy::too_many_arguments)]

//! # Capitais — Request Dispatch & Token Lifecycle
//!
//! Sits between an upstream producer of trading requests and many
//! downstream trading accounts. A request targets a robot (an abstract
//! strategy, `id_robo`); this crate fans it out into per-account orders,
//! publishes each account's current order set into a short-lived keyed
//! credential, and keeps those credentials fresh via a background
//! reconciliation loop.
//!
//! ## Components
//!
//! - [`clock`]: injected time source and unguessable token generation.
//! - [`config`]: `WatchdogConfig`, loaded from environment variables.
//! - [`store`]: the keyed TTL store contract (`KeyedStore`) and its Redis
//!   implementation.
//! - [`repo`]: the relational repository contract (`Repository`) and its
//!   Postgres implementation.
//! - [`payload`]: the v2 order-list document and its upgrade rules.
//! - [`dispatcher`]: [`dispatcher::RequestDispatcher`], the one-shot
//!   request-to-orders transform.
//! - [`watchdog`]: [`watchdog::TokenWatchdog`], the periodic credential
//!   reconciliation loop.
//!
//! ## Wiring
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tucano_capitais::{
//!     clock::OsTokenSource, config::WatchdogConfig, dispatcher::RequestDispatcher,
//!     repo::PgRepository, store::RedisStore, watchdog::TokenWatchdog,
//! };
//!
//! # async fn wire() -> anyhow::Result<()> {
//! let repo = Arc::new(PgRepository::connect("postgres://...").await?);
//! let store = Arc::new(RedisStore::connect("redis://...").await?);
//! let tokens = Arc::new(OsTokenSource);
//! let config = WatchdogConfig::from_env();
//!
//! let dispatcher = RequestDispatcher::new(repo.clone(), store.clone(), tokens.clone(), config.clone());
//! let watchdog = Arc::new(TokenWatchdog::new(repo, store, tokens, config));
//! let _handle = watchdog.spawn();
//! # Ok(())
//! # }
//! ```

/// Injected clock and unguessable token source.
pub mod clock;

/// Watchdog tunables, loaded from environment variables.
pub mod config;

/// Error taxonomy for the dispatcher, watchdog, store, and repository.
pub mod error;

/// The relational repository contract and its Postgres implementation.
pub mod repo;

/// The v2 payload document and its upgrade/merge rules.
pub mod payload;

/// The keyed TTL store contract and its Redis implementation.
pub mod store;

/// One-shot transformation of a request into per-account orders and
/// published credentials.
pub mod dispatcher;

/// Periodic credential reconciliation loop.
pub mod watchdog;

/// Graceful shutdown traits for cooperative background loops.
pub mod shutdown;

/// Default `tracing` initialisers.
pub mod logging;
