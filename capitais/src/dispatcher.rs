//! # Request Dispatcher
//!
//! One-shot transformation of an incoming request into per-account orders
//! and published token-store entries. Synchronous from the caller's
//! perspective; nothing here blocks on the watchdog, and a failure to
//! publish for one account never poisons another.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::clock::TokenSource;
use crate::config::WatchdogConfig;
use crate::error::DispatchError;
use crate::payload::{upgrade, OrderEntry};
use crate::repo::{BoundAccount, LogLevel, OrderCreationStatus, Repository, RequestData};
use crate::store::KeyedStore;

/// Caller-supplied context accompanying a dispatch, used for audit logging.
#[derive(Debug, Clone)]
pub struct ActorContext {
    pub system_user_id: i64,
}

/// Per-account publish outcome inside a successful [`DispatchOutcome`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountDispatchDetail {
    pub conta: i64,
    pub status: &'static str,
    pub token_gerado: bool,
    pub token: Option<String>,
    pub ordem_id: Option<i64>,
}

/// Structured result of [`RequestDispatcher::dispatch`].
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    /// One or more accounts were resolved; `details` covers every account,
    /// including those the repository reported as failed.
    Success {
        requisicao_id: i64,
        details: Vec<AccountDispatchDetail>,
        tokens_por_conta: std::collections::HashMap<i64, String>,
    },
    /// No accounts are bound to the requested robot. Terminal, not an error.
    NoAccounts { requisicao_id: i64 },
    /// Caught at the top level and surfaced with the elapsed time, per the
    /// spec's failure semantics for the dispatcher.
    Error {
        code: &'static str,
        message: String,
        elapsed: std::time::Duration,
    },
}

/// Turns one request into N per-account side effects: an `Order` row plus a
/// payload mutation published under a (new or existing) credential.
pub struct RequestDispatcher {
    repo: Arc<dyn Repository>,
    store: Arc<dyn KeyedStore>,
    tokens: Arc<dyn TokenSource>,
    config: WatchdogConfig,
}

impl RequestDispatcher {
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

    /// Runs the full dispatch algorithm described by the spec's C5. Never
    /// panics: any unhandled failure is caught and returned as
    /// [`DispatchOutcome::Error`].
    pub async fn dispatch(
        &self,
        request: RequestData,
        actor: ActorContext,
    ) -> DispatchOutcome {
        let started = Instant::now();
        match self.dispatch_inner(&request, &actor).await {
            Ok(outcome) => outcome,
            Err(err) => {
                self.repo
                    .log(
                        LogLevel::Problema,
                        &format!("dispatch failed: {err}"),
                        None,
                        Some(request.id_robo),
                    )
                    .await;
                DispatchOutcome::Error {
                    code: err.code(),
                    message: err.to_string(),
                    elapsed: started.elapsed(),
                }
            }
        }
    }

    async fn dispatch_inner(
        &self,
        request: &RequestData,
        actor: &ActorContext,
    ) -> Result<DispatchOutcome, DispatchError> {
        let requisicao_id = self.repo.create_request(request).await?;
        self.repo
            .log(
                LogLevel::Info,
                &format!(
                    "request created by system_user {} for robot {}",
                    actor.system_user_id, request.id_robo
                ),
                None,
                Some(request.id_robo),
            )
            .await;

        let accounts: Vec<BoundAccount> = self.repo.list_bound_accounts(request.id_robo).await?;

        if accounts.is_empty() {
            self.repo
                .log(
                    LogLevel::Warn,
                    &format!("no accounts bound to robot {}", request.id_robo),
                    None,
                    Some(request.id_robo),
                )
                .await;
            return Ok(DispatchOutcome::NoAccounts { requisicao_id });
        }

        let creation_details = self
            .repo
            .create_orders_for_request(requisicao_id, request, &accounts)
            .await?;

        let mut details = Vec::with_capacity(creation_details.len());
        let mut tokens_por_conta = std::collections::HashMap::new();

        for detail in creation_details {
            if detail.status != OrderCreationStatus::Success {
                details.push(AccountDispatchDetail {
                    conta: detail.id_conta,
                    status: "failed",
                    token_gerado: false,
                    token: None,
                    ordem_id: None,
                });
                continue;
            }

            let ordem_id = match detail.ordem_id {
                Some(id) => id,
                None => {
                    details.push(AccountDispatchDetail {
                        conta: detail.id_conta,
                        status: "failed",
                        token_gerado: false,
                        token: None,
                        ordem_id: None,
                    });
                    continue;
                }
            };

            let published = self
                .publish_account(detail.id_conta, requisicao_id, request, ordem_id)
                .await;

            match published {
                Ok((token, token_gerado)) => {
                    tokens_por_conta.insert(detail.id_conta, token.clone());
                    details.push(AccountDispatchDetail {
                        conta: detail.id_conta,
                        status: "success",
                        token_gerado,
                        token: Some(token),
                        ordem_id: Some(ordem_id),
                    });
                }
                Err(err) => {
                    // Leaving the account without a credential is acceptable:
                    // the watchdog mints one on its next pass.
                    self.repo
                        .log(
                            LogLevel::Warn,
                            &format!(
                                "failed to publish token for conta {}: {err}",
                                detail.id_conta
                            ),
                            Some(detail.id_conta),
                            Some(request.id_robo),
                        )
                        .await;
                    details.push(AccountDispatchDetail {
                        conta: detail.id_conta,
                        status: "success",
                        token_gerado: false,
                        token: None,
                        ordem_id: Some(ordem_id),
                    });
                }
            }
        }

        Ok(DispatchOutcome::Success {
            requisicao_id,
            details,
            tokens_por_conta,
        })
    }

    /// Publishes the candidate order for one account, merging into its
    /// existing payload or minting a fresh credential. Returns the opaque
    /// token string (without namespace) and whether it was freshly minted.
    async fn publish_account(
        &self,
        id_conta: i64,
        requisicao_id: i64,
        request: &RequestData,
        ordem_id: i64,
    ) -> Result<(String, bool), DispatchError> {
        let candidate = OrderEntry {
            ordem_id,
            id_robo: request.id_robo,
            id_tipo_ordem: request.id_tipo_ordem,
            tipo: request.tipo.to_uppercase(),
            symbol: request.symbol.clone(),
        };

        let existing_key = self.repo.get_account_token_key(id_conta).await?;

        if let Some(key) = existing_key {
            // Propagate store read failures rather than treating them as an
            // absent payload: a transient error here must not silently
            // discard another robot's already-published order.
            let raw = self.store.get(&key).await?;
            let mut payload = upgrade(raw.as_deref(), id_conta, None);
            payload.requisicao_id = payload.requisicao_id.or(Some(requisicao_id));

            if let Some(displaced) = payload.merge_order(candidate) {
                if displaced != ordem_id {
                    if let Err(err) = self.repo.delete_order(displaced).await {
                        self.repo
                            .log(
                                LogLevel::Warn,
                                &format!("failed to delete superseded order {displaced}: {err}"),
                                Some(id_conta),
                                Some(request.id_robo),
                            )
                            .await;
                    }
                }
            }

            let serialized = serde_json::to_string(&payload)
                .map_err(|err| DispatchError::Internal(err.to_string()))?;
            self.store
                .set(&key, &serialized, self.config.token_ttl_seconds)
                .await?;

            // Idempotent: covers drift if the row's key somehow lagged.
            self.repo.set_account_token_key(id_conta, Some(&key)).await?;

            let opaque = key
                .strip_prefix(&format!("{}:", self.config.namespace))
                .unwrap_or(&key)
                .to_string();
            Ok((opaque, false))
        } else {
            let opaque = self.tokens.opaque_token();
            let key = self.config.key_for(&opaque);

            let mut payload = crate::payload::Payload::build_skeleton(id_conta, Some(requisicao_id));
            payload.merge_order(candidate);

            let serialized = serde_json::to_string(&payload)
                .map_err(|err| DispatchError::Internal(err.to_string()))?;
            self.store
                .set(&key, &serialized, self.config.token_ttl_seconds)
                .await?;
            self.repo.set_account_token_key(id_conta, Some(&key)).await?;

            Ok((opaque, true))
        }
    }
}
