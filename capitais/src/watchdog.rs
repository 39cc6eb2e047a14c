//! # Token Watchdog
//!
//! Single-writer cooperative reconciliation loop: one pass every
//! `interval`, each pass running to completion before the next is
//! scheduled. A pass never aborts on a single account's failure — every
//! per-account step is wrapped and logged, not propagated.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::clock::TokenSource;
use crate::config::WatchdogConfig;
use crate::payload::upgrade;
use crate::repo::{ActiveTokenAccount, LogLevel, Repository};
use crate::shutdown::AsyncShutdown;
use crate::store::{KeyedStore, PTTL_ABSENT};

/// Maintains the liveness of per-account credentials: emits a credential for
/// accounts that lost theirs, rotates near-expiry credentials with a grace
/// overlap, and retires credentials for accounts flagged as consumed.
pub struct TokenWatchdog {
    repo: Arc<dyn Repository>,
    store: Arc<dyn KeyedStore>,
    tokens: Arc<dyn TokenSource>,
    config: WatchdogConfig,
}

impl TokenWatchdog {
    pub fn new(
        repo: Arc<dyn Repository>,
        store: Arc<dyn KeyedStore>,
        tokens: Arc<dyn TokenSource>,
        config: WatchdogConfig,
    ) -> Self {
        Self {
            repo,
            store,
            tokens,
            config,
        }
    }

    /// Spawns the periodic loop on the current runtime and returns a handle
    /// that can be used to request a graceful shutdown. Does nothing (and
    /// returns a handle whose task exits immediately) if the watchdog is
    /// disabled via configuration.
    pub fn spawn(self: Arc<Self>) -> TokenWatchdogHandle {
        let (tx, mut rx) = watch::channel(false);
        let enabled = self.config.enabled;

        let join = tokio::spawn(async move {
            if !enabled {
                return;
            }

            let mut ticker = tokio::time::interval(self.config.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick fires immediately; skip it so startup can settle.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.pass().await;
                    }
                    _ = rx.changed() => {
                        if *rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        TokenWatchdogHandle { tx, join: Some(join) }
    }

    /// Runs one full pass: consumed-cleanup followed by keep-alive/rotate.
    /// Top-level failures inside a phase are logged and do not propagate;
    /// the watchdog always schedules its next tick.
    pub async fn pass(&self) {
        self.consumed_cleanup_phase().await;
        self.keep_alive_phase().await;
    }

    async fn consumed_cleanup_phase(&self) {
        let accounts = match self
            .repo
            .list_accounts_with_consumed_token(self.config.consumed_scan_limit)
            .await
        {
            Ok(accounts) => accounts,
            Err(err) => {
                self.repo
                    .log(
                        LogLevel::TokenWatchdogErro,
                        &format!("consumed-cleanup scan failed: {err}"),
                        None,
                        None,
                    )
                    .await;
                return;
            }
        };

        for account in accounts {
            if !account.chave_do_token.is_empty() {
                if let Err(err) = self.store.delete(&account.chave_do_token).await {
                    self.repo
                        .log(
                            LogLevel::Warn,
                            &format!(
                                "failed to delete consumed credential {}: {err}",
                                account.chave_do_token
                            ),
                            Some(account.id),
                            None,
                        )
                        .await;
                }
            }

            if let Err(err) = self.repo.set_account_token_key(account.id, None).await {
                self.repo
                    .log(
                        LogLevel::Warn,
                        &format!("failed to clear consumed token key: {err}"),
                        Some(account.id),
                        None,
                    )
                    .await;
            }
        }
    }

    async fn keep_alive_phase(&self) {
        let accounts = match self
            .repo
            .list_accounts_with_active_token(self.config.active_scan_limit)
            .await
        {
            Ok(accounts) => accounts,
            Err(err) => {
                self.repo
                    .log(
                        LogLevel::TokenWatchdogErro,
                        &format!("keep-alive scan failed: {err}"),
                        None,
                        None,
                    )
                    .await;
                return;
            }
        };

        for account in accounts {
            self.keep_alive_one(account).await;
        }
    }

    async fn keep_alive_one(&self, account: ActiveTokenAccount) {
        if account.chave_do_token.is_empty() {
            self.emit_fresh(&account).await;
            return;
        }

        let pttl = match self.store.pttl(&account.chave_do_token).await {
            Ok(pttl) => pttl,
            Err(err) => {
                self.repo
                    .log(
                        LogLevel::Warn,
                        &format!("pttl lookup failed for {}: {err}", account.chave_do_token),
                        Some(account.id),
                        None,
                    )
                    .await;
                return;
            }
        };

        if pttl == PTTL_ABSENT {
            self.rotate(&account, pttl).await;
        } else if pttl <= self.config.rotate_threshold_ms {
            self.rotate(&account, pttl).await;
        }
    }

    /// Lost-credential branch: builds a skeleton payload and writes it under
    /// a freshly minted credential with full TTL.
    async fn emit_fresh(&self, account: &ActiveTokenAccount) {
        let payload = upgrade(None, account.id, account.numero_unico.as_deref());
        let serialized = match serde_json::to_string(&payload) {
            Ok(serialized) => serialized,
            Err(err) => {
                self.repo
                    .log(
                        LogLevel::Problema,
                        &format!("failed to serialize skeleton payload: {err}"),
                        Some(account.id),
                        None,
                    )
                    .await;
                return;
            }
        };

        let opaque = self.tokens.opaque_token();
        let new_key = self.config.key_for(&opaque);

        if let Err(err) = self
            .store
            .set(&new_key, &serialized, self.config.token_ttl_seconds)
            .await
        {
            self.repo
                .log(
                    LogLevel::Warn,
                    &format!("failed to emit fresh credential: {err}"),
                    Some(account.id),
                    None,
                )
                .await;
            return;
        }

        if let Err(err) = self
            .repo
            .set_account_token_key(account.id, Some(&new_key))
            .await
        {
            self.repo
                .log(
                    LogLevel::Warn,
                    &format!("failed to persist emitted credential: {err}"),
                    Some(account.id),
                    None,
                )
                .await;
        }
    }

    /// Rotates `account`'s credential: reads and upgrades the current
    /// payload, writes it under a fresh key with full TTL, and — only if the
    /// old key still exists — shortens its TTL to the grace window in the
    /// same pipelined round-trip.
    async fn rotate(&self, account: &ActiveTokenAccount, old_pttl: crate::store::PttlMs) {
        let old_key_still_exists = old_pttl != PTTL_ABSENT;

        let raw = if old_key_still_exists {
            // A transient read failure here must not be treated as "payload
            // absent": that would rebuild an empty skeleton and overwrite
            // every other robot's order already published under this key.
            match self.store.get(&account.chave_do_token).await {
                Ok(raw) => raw,
                Err(err) => {
                    self.repo
                        .log(
                            LogLevel::Warn,
                            &format!(
                                "rotation read failed for {}, retrying next tick: {err}",
                                account.chave_do_token
                            ),
                            Some(account.id),
                            None,
                        )
                        .await;
                    return;
                }
            }
        } else {
            None
        };

        let payload = upgrade(raw.as_deref(), account.id, account.numero_unico.as_deref());
        let serialized = match serde_json::to_string(&payload) {
            Ok(serialized) => serialized,
            Err(err) => {
                self.repo
                    .log(
                        LogLevel::Problema,
                        &format!("failed to serialize rotated payload: {err}"),
                        Some(account.id),
                        None,
                    )
                    .await;
                return;
            }
        };

        let opaque = self.tokens.opaque_token();
        let new_key = self.config.key_for(&opaque);

        if let Err(err) = self
            .store
            .rotate(
                &new_key,
                &serialized,
                self.config.token_ttl_seconds,
                &account.chave_do_token,
                old_key_still_exists,
                self.config.grace_ms,
            )
            .await
        {
            self.repo
                .log(
                    LogLevel::Warn,
                    &format!("rotation pipeline failed for conta {}: {err}", account.id),
                    Some(account.id),
                    None,
                )
                .await;
            return;
        }

        if let Err(err) = self
            .repo
            .set_account_token_key(account.id, Some(&new_key))
            .await
        {
            self.repo
                .log(
                    LogLevel::Warn,
                    &format!("failed to persist rotated credential: {err}"),
                    Some(account.id),
                    None,
                )
                .await;
            return;
        }

        self.repo
            .log(
                LogLevel::Info,
                &format!(
                    "rotated{{old={}, new={new_key}, old_ttl_ms={old_pttl}}}",
                    account.chave_do_token
                ),
                Some(account.id),
                None,
            )
            .await;
    }
}

/// Handle returned by [`TokenWatchdog::spawn`]. Dropping it leaves the loop
/// running; call [`AsyncShutdown::shutdown`] to stop it.
pub struct TokenWatchdogHandle {
    tx: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
}

impl AsyncShutdown for TokenWatchdogHandle {
    type Result = Result<(), tokio::task::JoinError>;

    async fn shutdown(&mut self) -> Self::Result {
        let _ = self.tx.send(true);
        if let Some(join) = self.join.take() {
            join.await?;
        }
        Ok(())
    }
}
