//! In-memory `Repository`/`KeyedStore` doubles used by the dispatcher and
//! watchdog integration tests. Time in `MockStore` is virtual (advanced
//! explicitly by tests) rather than wall-clock, so rotation/expiry
//! scenarios are deterministic.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use tucano_capitais::clock::TokenSource;
use tucano_capitais::error::StoreError;
use tucano_capitais::repo::{
    ActiveTokenAccount, BoundAccount, ConsumedTokenAccount, LogLevel, OrderCreationDetail,
    OrderCreationStatus, Repository, RequestData,
};
use tucano_capitais::store::{KeyedStore, PttlMs, PTTL_ABSENT, PTTL_NO_EXPIRY};

#[derive(Debug, Clone)]
struct AccountRow {
    nome: String,
    conta_meta_trader: String,
    id_user: i64,
    chave_do_token: String,
}

#[derive(Debug, Clone)]
struct BindingRow {
    id_user: i64,
    id_robo: i64,
    id_conta: Option<i64>,
    ligado: bool,
}

#[derive(Debug, Clone)]
struct OrderRow {
    id_conta: i64,
    numero_unico: String,
}

#[derive(Default)]
struct RepoState {
    next_request_id: i64,
    next_order_id: i64,
    accounts: HashMap<i64, AccountRow>,
    bindings: Vec<BindingRow>,
    orders: HashMap<i64, OrderRow>,
    consumed: HashSet<i64>,
    fail_accounts: HashSet<i64>,
    pub logs: Vec<(LogLevel, String)>,
}

pub struct MockRepository {
    state: Mutex<RepoState>,
}

impl MockRepository {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RepoState::default()),
        }
    }

    pub fn add_account(&self, id_conta: i64, nome: &str, conta_meta_trader: &str, id_user: i64) {
        let mut state = self.state.lock().unwrap();
        state.accounts.insert(
            id_conta,
            AccountRow {
                nome: nome.to_string(),
                conta_meta_trader: conta_meta_trader.to_string(),
                id_user,
                chave_do_token: String::new(),
            },
        );
    }

    pub fn bind(&self, id_user: i64, id_robo: i64, id_conta: i64, ligado: bool) {
        let mut state = self.state.lock().unwrap();
        state.bindings.push(BindingRow {
            id_user,
            id_robo,
            id_conta: Some(id_conta),
            ligado,
        });
    }

    pub fn mark_consumed(&self, id_conta: i64) {
        self.state.lock().unwrap().consumed.insert(id_conta);
    }

    pub fn fail_order_creation_for(&self, id_conta: i64) {
        self.state.lock().unwrap().fail_accounts.insert(id_conta);
    }

    pub fn token_key(&self, id_conta: i64) -> String {
        self.state
            .lock()
            .unwrap()
            .accounts
            .get(&id_conta)
            .map(|a| a.chave_do_token.clone())
            .unwrap_or_default()
    }

    pub fn order_exists(&self, ordem_id: i64) -> bool {
        self.state.lock().unwrap().orders.contains_key(&ordem_id)
    }

    pub fn log_count_matching(&self, needle: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .logs
            .iter()
            .filter(|(_, msg)| msg.contains(needle))
            .count()
    }
}

#[async_trait]
impl Repository for MockRepository {
    async fn create_request(&self, _data: &RequestData) -> Result<i64, tucano_capitais::error::RepoError> {
        let mut state = self.state.lock().unwrap();
        state.next_request_id += 1;
        Ok(state.next_request_id)
    }

    async fn list_bound_accounts(
        &self,
        id_robo: i64,
    ) -> Result<Vec<BoundAccount>, tucano_capitais::error::RepoError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .bindings
            .iter()
            .enumerate()
            .filter(|(_, b)| b.id_robo == id_robo && b.ligado && b.id_conta.is_some())
            .map(|(idx, b)| {
                let id_conta = b.id_conta.unwrap();
                BoundAccount {
                    id_conta,
                    nome: state
                        .accounts
                        .get(&id_conta)
                        .map(|a| a.nome.clone())
                        .unwrap_or_default(),
                    id_user: b.id_user,
                    id_robo_user: idx as i64 + 1,
                }
            })
            .collect())
    }

    async fn create_orders_for_request(
        &self,
        requisicao_id: i64,
        _data: &RequestData,
        accounts: &[BoundAccount],
    ) -> Result<Vec<OrderCreationDetail>, tucano_capitais::error::RepoError> {
        let mut state = self.state.lock().unwrap();
        let mut details = Vec::with_capacity(accounts.len());

        for account in accounts {
            if state.fail_accounts.contains(&account.id_conta) {
                details.push(OrderCreationDetail {
                    id_conta: account.id_conta,
                    status: OrderCreationStatus::Failed,
                    ordem_id: None,
                });
                continue;
            }

            state.next_order_id += 1;
            let ordem_id = state.next_order_id;
            let conta_meta_trader = state
                .accounts
                .get(&account.id_conta)
                .map(|a| a.conta_meta_trader.clone())
                .unwrap_or_default();
            let numero_unico = format!("REQ-{requisicao_id}-{conta_meta_trader}");
            state.orders.insert(
                ordem_id,
                OrderRow {
                    id_conta: account.id_conta,
                    numero_unico,
                },
            );
            details.push(OrderCreationDetail {
                id_conta: account.id_conta,
                status: OrderCreationStatus::Success,
                ordem_id: Some(ordem_id),
            });
        }

        Ok(details)
    }

    async fn delete_order(&self, ordem_id: i64) -> Result<(), tucano_capitais::error::RepoError> {
        self.state.lock().unwrap().orders.remove(&ordem_id);
        Ok(())
    }

    async fn get_account_token_key(
        &self,
        id_conta: i64,
    ) -> Result<Option<String>, tucano_capitais::error::RepoError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .accounts
            .get(&id_conta)
            .map(|a| a.chave_do_token.clone())
            .filter(|key| !key.is_empty()))
    }

    async fn set_account_token_key(
        &self,
        id_conta: i64,
        key: Option<&str>,
    ) -> Result<(), tucano_capitais::error::RepoError> {
        let mut state = self.state.lock().unwrap();
        if let Some(account) = state.accounts.get_mut(&id_conta) {
            account.chave_do_token = key.unwrap_or("").to_string();
        }
        Ok(())
    }

    async fn list_accounts_with_active_token(
        &self,
        limit: i64,
    ) -> Result<Vec<ActiveTokenAccount>, tucano_capitais::error::RepoError> {
        let state = self.state.lock().unwrap();
        let mut participating: Vec<i64> = state.orders.values().map(|o| o.id_conta).collect();
        participating.sort_unstable();
        participating.dedup();

        Ok(participating
            .into_iter()
            .take(limit as usize)
            .filter_map(|id_conta| {
                state.accounts.get(&id_conta).map(|account| ActiveTokenAccount {
                    id: id_conta,
                    chave_do_token: account.chave_do_token.clone(),
                    conta_meta_trader: account.conta_meta_trader.clone(),
                    numero_unico: state
                        .orders
                        .values()
                        .filter(|o| o.id_conta == id_conta)
                        .map(|o| o.numero_unico.clone())
                        .last(),
                })
            })
            .collect())
    }

    async fn list_accounts_with_consumed_token(
        &self,
        limit: i64,
    ) -> Result<Vec<ConsumedTokenAccount>, tucano_capitais::error::RepoError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .consumed
            .iter()
            .filter_map(|id| {
                state.accounts.get(id).and_then(|a| {
                    (!a.chave_do_token.is_empty()).then(|| ConsumedTokenAccount {
                        id: *id,
                        chave_do_token: a.chave_do_token.clone(),
                    })
                })
            })
            .take(limit as usize)
            .collect())
    }

    async fn log(&self, level: LogLevel, message: &str, _id_conta: Option<i64>, _id_robo: Option<i64>) {
        self.state.lock().unwrap().logs.push((level, message.to_string()));
    }
}

struct Entry {
    value: String,
    expires_at_ms: Option<i64>,
}

#[derive(Default)]
struct MockStoreState {
    now_ms: i64,
    entries: HashMap<String, Entry>,
}

pub struct MockStore {
    state: Mutex<MockStoreState>,
}

impl MockStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockStoreState::default()),
        }
    }

    /// Test-only seam: seeds `key` with `value` and a remaining TTL in ms
    /// (`None` for no expiry).
    pub fn seed(&self, key: &str, value: &str, remaining_ttl_ms: Option<i64>) {
        let mut state = self.state.lock().unwrap();
        let now_ms = state.now_ms;
        state.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at_ms: remaining_ttl_ms.map(|ms| now_ms + ms),
            },
        );
    }

    pub fn advance(&self, ms: i64) {
        self.state.lock().unwrap().now_ms += ms;
    }

    pub fn contains(&self, key: &str) -> bool {
        let state = self.state.lock().unwrap();
        match state.entries.get(key) {
            Some(entry) => !is_expired(entry, state.now_ms),
            None => false,
        }
    }

    pub fn raw_value(&self, key: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state
            .entries
            .get(key)
            .filter(|entry| !is_expired(entry, state.now_ms))
            .map(|entry| entry.value.clone())
    }
}

fn is_expired(entry: &Entry, now_ms: i64) -> bool {
    matches!(entry.expires_at_ms, Some(expiry) if expiry <= now_ms)
}

#[async_trait]
impl KeyedStore for MockStore {
    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        let now_ms = state.now_ms;
        state.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at_ms: Some(now_ms + ttl_seconds as i64 * 1000),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.raw_value(key))
    }

    async fn pttl(&self, key: &str) -> Result<PttlMs, StoreError> {
        let state = self.state.lock().unwrap();
        match state.entries.get(key) {
            Some(entry) if !is_expired(entry, state.now_ms) => match entry.expires_at_ms {
                Some(expiry) => Ok(expiry - state.now_ms),
                None => Ok(PTTL_NO_EXPIRY),
            },
            _ => Ok(PTTL_ABSENT),
        }
    }

    async fn pexpire(&self, key: &str, ttl_ms: i64) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        let now_ms = state.now_ms;
        if let Some(entry) = state.entries.get_mut(key) {
            entry.expires_at_ms = Some(now_ms + ttl_ms);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.state.lock().unwrap().entries.remove(key);
        Ok(())
    }

    async fn rotate(
        &self,
        new_key: &str,
        value: &str,
        ttl_seconds: u64,
        old_key: &str,
        old_key_still_exists: bool,
        old_key_grace_ms: i64,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        let now_ms = state.now_ms;
        state.entries.insert(
            new_key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at_ms: Some(now_ms + ttl_seconds as i64 * 1000),
            },
        );
        if old_key_still_exists {
            if let Some(entry) = state.entries.get_mut(old_key) {
                entry.expires_at_ms = Some(now_ms + old_key_grace_ms);
            }
        }
        Ok(())
    }
}

pub struct FixedTokenSource {
    next: Mutex<Vec<String>>,
}

impl FixedTokenSource {
    pub fn new(tokens: Vec<&str>) -> Self {
        Self {
            next: Mutex::new(tokens.into_iter().rev().map(str::to_string).collect()),
        }
    }
}

impl TokenSource for FixedTokenSource {
    fn opaque_token(&self) -> String {
        self.next
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| "fallback-token".to_string())
    }
}
