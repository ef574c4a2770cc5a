//! Ports through which workers and the launcher reach the relational store,
//! plus their PostgreSQL implementations.
//!
//! Workers own their `Indexer.last_block`, the transfers they fetched and the
//! balances of tokens they watch; the operator plane owns row definitions and
//! `status`. Nothing else touches the store.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use sqlx::{FromRow, PgPool};
use std::str::FromStr;

use crate::error::TokenwatchError;
use crate::types::{Indexer, IndexerStatus, Network, NewTransfer, Token};

/// Read access to operator-managed configuration rows, plus the two fields a
/// running system writes back (`last_block` by workers, `status` by the
/// launcher).
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn indexer_by_name(&self, name: &str) -> Result<Indexer, TokenwatchError>;
    async fn network(&self, id: i64) -> Result<Network, TokenwatchError>;
    /// Watched tokens in a stable order; fetcher iteration order follows it.
    async fn watched_tokens(&self, indexer_id: i64) -> Result<Vec<Token>, TokenwatchError>;
    async fn set_last_block(&self, indexer_id: i64, last_block: u64)
        -> Result<(), TokenwatchError>;
    async fn set_status(&self, name: &str, status: IndexerStatus)
        -> Result<(), TokenwatchError>;
}

/// Write access to indexed data. `tx_hash` uniqueness is the idempotence
/// authority for transfers; balance rows are keyed by (holder, token) or
/// (holder, token, token_id) for enumerable NFTs.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn transfer_exists(&self, tx_hash: &str) -> Result<bool, TokenwatchError>;
    /// Returns false when a concurrent writer won the `tx_hash` race; that is
    /// a benign skip, not an error.
    async fn insert_transfer(&self, transfer: NewTransfer) -> Result<bool, TokenwatchError>;
    /// Distinct union of senders and recipients over stored transfers of one
    /// token.
    async fn transfer_participants(&self, token_id: i64) -> Result<Vec<String>, TokenwatchError>;

    async fn balance_amount(
        &self,
        token_id: i64,
        holder: &str,
    ) -> Result<Option<BigDecimal>, TokenwatchError>;
    async fn upsert_balance_amount(
        &self,
        token_id: i64,
        holder: &str,
        amount: &BigDecimal,
        tracked_by: i64,
    ) -> Result<(), TokenwatchError>;

    async fn held_token_ids(
        &self,
        token_id: i64,
        holder: &str,
    ) -> Result<Vec<BigDecimal>, TokenwatchError>;
    async fn insert_held_token(
        &self,
        token_id: i64,
        holder: &str,
        nft_id: &BigDecimal,
        tracked_by: i64,
    ) -> Result<(), TokenwatchError>;
    async fn delete_held_token(
        &self,
        token_id: i64,
        holder: &str,
        nft_id: &BigDecimal,
    ) -> Result<(), TokenwatchError>;
}

// =====================
// PostgreSQL rows
// =====================

#[derive(FromRow)]
struct NetworkRow {
    id: i64,
    chain_id: i64,
    name: String,
    rpc_url: String,
    max_step: i64,
    #[sqlx(rename = "type")]
    kind: String,
    need_poa: bool,
    explorer_url: String,
}

impl TryFrom<NetworkRow> for Network {
    type Error = TokenwatchError;

    fn try_from(row: NetworkRow) -> Result<Self, Self::Error> {
        Ok(Network {
            id: row.id,
            chain_id: row.chain_id as u64,
            name: row.name,
            rpc_url: row.rpc_url,
            max_step: row.max_step as u64,
            kind: row.kind.parse()?,
            need_poa: row.need_poa,
            explorer_url: row.explorer_url,
        })
    }
}

#[derive(FromRow)]
struct TokenRow {
    id: i64,
    address: Option<String>,
    name: String,
    network_id: i64,
    #[sqlx(rename = "type")]
    kind: String,
    strategy: String,
}

impl TryFrom<TokenRow> for Token {
    type Error = TokenwatchError;

    fn try_from(row: TokenRow) -> Result<Self, Self::Error> {
        Ok(Token {
            id: row.id,
            address: row.address,
            name: row.name,
            network_id: row.network_id,
            kind: row.kind.parse()?,
            strategy: row.strategy.parse()?,
        })
    }
}

#[derive(FromRow)]
struct IndexerRow {
    id: i64,
    name: String,
    network_id: i64,
    #[sqlx(rename = "type")]
    kind: String,
    strategy: String,
    strategy_params: Option<serde_json::Value>,
    last_block: i64,
    short_sleep_seconds: i64,
    long_sleep_seconds: i64,
    status: String,
}

impl TryFrom<IndexerRow> for Indexer {
    type Error = TokenwatchError;

    fn try_from(row: IndexerRow) -> Result<Self, Self::Error> {
        Ok(Indexer {
            id: row.id,
            name: row.name,
            network_id: row.network_id,
            kind: row.kind.parse()?,
            strategy: row.strategy.parse()?,
            strategy_params: row.strategy_params.unwrap_or(serde_json::Value::Null),
            last_block: row.last_block as u64,
            short_sleep_seconds: row.short_sleep_seconds as u64,
            long_sleep_seconds: row.long_sleep_seconds as u64,
            status: IndexerStatus::from_str(&row.status)?,
        })
    }
}

// =====================
// PostgreSQL implementations
// =====================

pub struct PgConfigStore {
    pool: PgPool,
}

impl PgConfigStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConfigStore for PgConfigStore {
    async fn indexer_by_name(&self, name: &str) -> Result<Indexer, TokenwatchError> {
        let row: Option<IndexerRow> = sqlx::query_as(
            "SELECT id, name, network_id, type, strategy, strategy_params,
                    last_block, short_sleep_seconds, long_sleep_seconds, status
             FROM indexers WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| TokenwatchError::NotFound(format!("indexer {name}")))?
            .try_into()
    }

    async fn network(&self, id: i64) -> Result<Network, TokenwatchError> {
        let row: Option<NetworkRow> = sqlx::query_as(
            "SELECT id, chain_id, name, rpc_url, max_step, type, need_poa, explorer_url
             FROM networks WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| TokenwatchError::NotFound(format!("network {id}")))?
            .try_into()
    }

    async fn watched_tokens(&self, indexer_id: i64) -> Result<Vec<Token>, TokenwatchError> {
        let rows: Vec<TokenRow> = sqlx::query_as(
            "SELECT t.id, t.address, t.name, t.network_id, t.type, t.strategy
             FROM tokens t
             JOIN indexer_watched_tokens w ON w.token_id = t.id
             WHERE w.indexer_id = $1
             ORDER BY t.id",
        )
        .bind(indexer_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Token::try_from).collect()
    }

    async fn set_last_block(
        &self,
        indexer_id: i64,
        last_block: u64,
    ) -> Result<(), TokenwatchError> {
        sqlx::query("UPDATE indexers SET last_block = $2 WHERE id = $1")
            .bind(indexer_id)
            .bind(last_block as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_status(
        &self,
        name: &str,
        status: IndexerStatus,
    ) -> Result<(), TokenwatchError> {
        sqlx::query("UPDATE indexers SET status = $2 WHERE name = $1")
            .bind(name)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

pub struct PgPersistence {
    pool: PgPool,
}

impl PgPersistence {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Persistence for PgPersistence {
    async fn transfer_exists(&self, tx_hash: &str) -> Result<bool, TokenwatchError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM token_transfers WHERE tx_hash = $1)")
                .bind(tx_hash)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn insert_transfer(&self, transfer: NewTransfer) -> Result<bool, TokenwatchError> {
        let result = sqlx::query(
            "INSERT INTO token_transfers
                (token_instance_id, operator, sender, recipient, tx_hash, token_id, amount, fetched_by_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(transfer.token_instance_id)
        .bind(&transfer.operator)
        .bind(&transfer.sender)
        .bind(&transfer.recipient)
        .bind(&transfer.tx_hash)
        .bind(&transfer.token_id)
        .bind(&transfer.amount)
        .bind(transfer.fetched_by)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(true),
            // A concurrent writer inserted the same tx_hash first; the
            // uniqueness constraint is the authority and the row is there.
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                tracing::info!(tx_hash = %transfer.tx_hash, "transfer already stored, skipping");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn transfer_participants(&self, token_id: i64) -> Result<Vec<String>, TokenwatchError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT sender AS participant FROM token_transfers WHERE token_instance_id = $1
             UNION
             SELECT recipient FROM token_transfers WHERE token_instance_id = $1
             ORDER BY participant",
        )
        .bind(token_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(p,)| p).collect())
    }

    async fn balance_amount(
        &self,
        token_id: i64,
        holder: &str,
    ) -> Result<Option<BigDecimal>, TokenwatchError> {
        let row: Option<(Option<BigDecimal>,)> = sqlx::query_as(
            "SELECT amount FROM token_balances
             WHERE token_instance_id = $1 AND holder = $2 AND token_id IS NULL",
        )
        .bind(token_id)
        .bind(holder)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.and_then(|(amount,)| amount))
    }

    async fn upsert_balance_amount(
        &self,
        token_id: i64,
        holder: &str,
        amount: &BigDecimal,
        tracked_by: i64,
    ) -> Result<(), TokenwatchError> {
        let updated = sqlx::query(
            "UPDATE token_balances SET amount = $3, tracked_by_id = $4
             WHERE token_instance_id = $1 AND holder = $2 AND token_id IS NULL",
        )
        .bind(token_id)
        .bind(holder)
        .bind(amount)
        .bind(tracked_by)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            sqlx::query(
                "INSERT INTO token_balances (token_instance_id, holder, amount, token_id, tracked_by_id)
                 VALUES ($1, $2, $3, NULL, $4)",
            )
            .bind(token_id)
            .bind(holder)
            .bind(amount)
            .bind(tracked_by)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn held_token_ids(
        &self,
        token_id: i64,
        holder: &str,
    ) -> Result<Vec<BigDecimal>, TokenwatchError> {
        let rows: Vec<(BigDecimal,)> = sqlx::query_as(
            "SELECT token_id FROM token_balances
             WHERE token_instance_id = $1 AND holder = $2 AND token_id IS NOT NULL",
        )
        .bind(token_id)
        .bind(holder)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn insert_held_token(
        &self,
        token_id: i64,
        holder: &str,
        nft_id: &BigDecimal,
        tracked_by: i64,
    ) -> Result<(), TokenwatchError> {
        sqlx::query(
            "INSERT INTO token_balances (token_instance_id, holder, amount, token_id, tracked_by_id)
             VALUES ($1, $2, NULL, $3, $4)",
        )
        .bind(token_id)
        .bind(holder)
        .bind(nft_id)
        .bind(tracked_by)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_held_token(
        &self,
        token_id: i64,
        holder: &str,
        nft_id: &BigDecimal,
    ) -> Result<(), TokenwatchError> {
        sqlx::query(
            "DELETE FROM token_balances
             WHERE token_instance_id = $1 AND holder = $2 AND token_id = $3",
        )
        .bind(token_id)
        .bind(holder)
        .bind(nft_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
