//! # Relational Repository
//!
//! Narrow contract over the accounts/orders/requests/bindings schema. This
//! is the *only* surface the dispatcher and watchdog depend on; everything
//! else about the relational schema (users, wallets, CRUD routers) is out of
//! scope for this core.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};

use crate::error::RepoError;

/// Domain payload for a single incoming request, fanned out to every
/// account bound to `id_robo`.
#[derive(Debug, Clone)]
pub struct RequestData {
    pub tipo: String,
    pub id_robo: i64,
    pub quantidade: f64,
    pub preco: Option<f64>,
    pub symbol: Option<String>,
    pub id_tipo_ordem: Option<i64>,
}

/// An account bound to the requested robot, as returned by
/// [`Repository::list_bound_accounts`].
#[derive(Debug, Clone, FromRow)]
pub struct BoundAccount {
    pub id_conta: i64,
    pub nome: String,
    pub id_user: i64,
    pub id_robo_user: i64,
}

/// Per-account outcome of [`Repository::create_orders_for_request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderCreationStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone)]
pub struct OrderCreationDetail {
    pub id_conta: i64,
    pub status: OrderCreationStatus,
    pub ordem_id: Option<i64>,
}

/// An account whose stored credential should still exist, as returned by
/// [`Repository::list_accounts_with_active_token`].
#[derive(Debug, Clone, FromRow)]
pub struct ActiveTokenAccount {
    pub id: i64,
    pub chave_do_token: String,
    pub conta_meta_trader: String,
    pub numero_unico: Option<String>,
}

/// An account flagged as consumed but still carrying a stale credential.
#[derive(Debug, Clone, FromRow)]
pub struct ConsumedTokenAccount {
    pub id: i64,
    pub chave_do_token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Problema,
    TokenWatchdogErro,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warn => "warning",
            Self::Problema => "problema",
            Self::TokenWatchdogErro => "token_watchdog_erro",
        }
    }
}

/// Relational repository contract consumed by the dispatcher and watchdog.
/// See the spec's C3 for the exhaustive method list this mirrors.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn create_request(&self, data: &RequestData) -> Result<i64, RepoError>;

    async fn list_bound_accounts(&self, id_robo: i64) -> Result<Vec<BoundAccount>, RepoError>;

    async fn create_orders_for_request(
        &self,
        requisicao_id: i64,
        data: &RequestData,
        accounts: &[BoundAccount],
    ) -> Result<Vec<OrderCreationDetail>, RepoError>;

    async fn delete_order(&self, ordem_id: i64) -> Result<(), RepoError>;

    async fn get_account_token_key(&self, id_conta: i64) -> Result<Option<String>, RepoError>;

    async fn set_account_token_key(
        &self,
        id_conta: i64,
        key: Option<&str>,
    ) -> Result<(), RepoError>;

    async fn list_accounts_with_active_token(
        &self,
        limit: i64,
    ) -> Result<Vec<ActiveTokenAccount>, RepoError>;

    async fn list_accounts_with_consumed_token(
        &self,
        limit: i64,
    ) -> Result<Vec<ConsumedTokenAccount>, RepoError>;

    async fn log(&self, level: LogLevel, message: &str, id_conta: Option<i64>, id_robo: Option<i64>);
}

/// [`Repository`] backed by Postgres via `sqlx`.
#[derive(Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub async fn connect(database_url: &str) -> Result<Self, RepoError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Repository for PgRepository {
    async fn create_request(&self, data: &RequestData) -> Result<i64, RepoError> {
        let row: (i64,) = sqlx::query_as(
            "INSERT INTO requisicao (tipo, id_robo, quantidade, preco, symbol, id_tipo_ordem) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
        )
        .bind(&data.tipo)
        .bind(data.id_robo)
        .bind(data.quantidade)
        .bind(data.preco)
        .bind(&data.symbol)
        .bind(data.id_tipo_ordem)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    async fn list_bound_accounts(&self, id_robo: i64) -> Result<Vec<BoundAccount>, RepoError> {
        let accounts = sqlx::query_as::<_, BoundAccount>(
            "SELECT b.id_conta AS id_conta, c.nome AS nome, b.id_user AS id_user, \
                    b.id AS id_robo_user \
             FROM robos_do_user b \
             JOIN contas c ON c.id = b.id_conta \
             WHERE b.id_robo = $1 AND b.ligado = TRUE AND b.id_conta IS NOT NULL",
        )
        .bind(id_robo)
        .fetch_all(&self.pool)
        .await?;
        Ok(accounts)
    }

    async fn create_orders_for_request(
        &self,
        requisicao_id: i64,
        data: &RequestData,
        accounts: &[BoundAccount],
    ) -> Result<Vec<OrderCreationDetail>, RepoError> {
        let mut tx = self.pool.begin().await?;
        let mut details = Vec::with_capacity(accounts.len());

        for account in accounts {
            let numero_unico = format!("REQ-{}-{}", requisicao_id, account.id_conta);
            let inserted: Result<(i64,), sqlx::Error> = sqlx::query_as(
                "INSERT INTO ordens (id_conta, id_robo_user, id_user, tipo, symbol, preco, \
                        quantidade, numero_unico) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING id",
            )
            .bind(account.id_conta)
            .bind(account.id_robo_user)
            .bind(account.id_user)
            .bind(&data.tipo)
            .bind(&data.symbol)
            .bind(data.preco)
            .bind(data.quantidade)
            .bind(&numero_unico)
            .fetch_one(&mut *tx)
            .await;

            match inserted {
                Ok((ordem_id,)) => details.push(OrderCreationDetail {
                    id_conta: account.id_conta,
                    status: OrderCreationStatus::Success,
                    ordem_id: Some(ordem_id),
                }),
                Err(_) => details.push(OrderCreationDetail {
                    id_conta: account.id_conta,
                    status: OrderCreationStatus::Failed,
                    ordem_id: None,
                }),
            }
        }

        tx.commit().await?;
        Ok(details)
    }

    async fn delete_order(&self, ordem_id: i64) -> Result<(), RepoError> {
        sqlx::query("DELETE FROM ordens WHERE id = $1")
            .bind(ordem_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_account_token_key(&self, id_conta: i64) -> Result<Option<String>, RepoError> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT chave_do_token FROM contas WHERE id = $1")
                .bind(id_conta)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.and_then(|(key,)| key).filter(|key| !key.is_empty()))
    }

    async fn set_account_token_key(
        &self,
        id_conta: i64,
        key: Option<&str>,
    ) -> Result<(), RepoError> {
        sqlx::query("UPDATE contas SET chave_do_token = $1 WHERE id = $2")
            .bind(key.unwrap_or(""))
            .bind(id_conta)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_accounts_with_active_token(
        &self,
        limit: i64,
    ) -> Result<Vec<ActiveTokenAccount>, RepoError> {
        // An account counts as "should have an active token" once it has been
        // dispatched to at least once; chave_do_token may legitimately be
        // empty here (credential lost to a restart or a failed publish).
        let accounts = sqlx::query_as::<_, ActiveTokenAccount>(
            "SELECT DISTINCT ON (c.id) c.id AS id, COALESCE(c.chave_do_token, '') AS chave_do_token, \
                    c.conta_meta_trader AS conta_meta_trader, o.numero_unico AS numero_unico \
             FROM contas c \
             JOIN ordens dispatched ON dispatched.id_conta = c.id \
             LEFT JOIN LATERAL ( \
                 SELECT numero_unico FROM ordens WHERE id_conta = c.id \
                 ORDER BY id DESC LIMIT 1 \
             ) o ON TRUE \
             ORDER BY c.id \
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(accounts)
    }

    async fn list_accounts_with_consumed_token(
        &self,
        limit: i64,
    ) -> Result<Vec<ConsumedTokenAccount>, RepoError> {
        let accounts = sqlx::query_as::<_, ConsumedTokenAccount>(
            "SELECT id, chave_do_token FROM contas \
             WHERE token_consumido = TRUE AND chave_do_token IS NOT NULL AND chave_do_token <> '' \
             ORDER BY id \
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(accounts)
    }

    async fn log(
        &self,
        level: LogLevel,
        message: &str,
        id_conta: Option<i64>,
        id_robo: Option<i64>,
    ) {
        let now: DateTime<Utc> = Utc::now();
        let result = sqlx::query(
            "INSERT INTO logs (nivel, mensagem, id_conta, id_robo, criado_em) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(level.as_str())
        .bind(message)
        .bind(id_conta)
        .bind(id_robo)
        .bind(now)
        .execute(&self.pool)
        .await;

        if let Err(err) = result {
            tracing::warn!(error = %err, "failed to persist log row, continuing");
        }
    }
}
