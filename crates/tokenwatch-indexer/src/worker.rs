//! The per-indexer control loops. One process, one control thread; the only
//! suspension points are the configured sleeps and blocking RPC or database
//! futures. The loop itself is the retry mechanism: a failed step is logged,
//! the watermark stays, and the next cycle re-attempts the range.

use std::sync::Arc;
use std::time::Duration;

use tokenwatch_common::{
    ConfigStore, Indexer, IndexerKind, Network, Persistence, TokenwatchError,
};

use crate::balance::{balance_caller_for, BalanceCaller, BalanceDelta};
use crate::fetch::{transfer_fetcher_for, TransferFetcher};
use crate::rpc::RpcClient;
use crate::strategy::{BalanceStrategy, TransferStrategy};

/// Pause between holders so balance polling does not hammer the node.
const HOLDER_PAUSE: Duration = Duration::from_secs(1);

/// Load the indexer row named by the environment and run the matching worker
/// until the process is stopped. Only configuration errors return.
pub async fn run_worker(
    config_store: Arc<dyn ConfigStore>,
    persistence: Arc<dyn Persistence>,
    name: &str,
) -> Result<(), TokenwatchError> {
    let indexer = config_store.indexer_by_name(name).await?;
    indexer.validate()?;
    match indexer.kind {
        IndexerKind::TransferIndexer => {
            TransferWorker::new(config_store, persistence, indexer)
                .await?
                .run()
                .await
        }
        IndexerKind::BalanceIndexer => {
            BalanceWorker::new(config_store, persistence, indexer)
                .await?
                .run()
                .await
        }
    }
}

// =====================
// Transfer worker
// =====================

pub struct TransferWorker {
    config_store: Arc<dyn ConfigStore>,
    persistence: Arc<dyn Persistence>,
    indexer: Indexer,
    network: Network,
    rpc: Arc<RpcClient>,
    fetchers: Vec<Box<dyn TransferFetcher>>,
    strategy: TransferStrategy,
}

impl TransferWorker {
    pub async fn new(
        config_store: Arc<dyn ConfigStore>,
        persistence: Arc<dyn Persistence>,
        indexer: Indexer,
    ) -> Result<Self, TokenwatchError> {
        let network = config_store.network(indexer.network_id).await?;
        let rpc = Arc::new(RpcClient::new(&network)?);
        let strategy = TransferStrategy::from_indexer(&indexer)?;

        let tokens = config_store.watched_tokens(indexer.id).await?;
        let mut fetchers = Vec::with_capacity(tokens.len());
        for token in tokens {
            fetchers.push(transfer_fetcher_for(Arc::clone(&rpc), token, network.kind)?);
        }

        Ok(Self {
            config_store,
            persistence,
            indexer,
            network,
            rpc,
            fetchers,
            strategy,
        })
    }

    pub async fn run(mut self) -> Result<(), TokenwatchError> {
        loop {
            tracing::info!(
                indexer = %self.indexer.name,
                "starting a cycle, sleeping {} seconds",
                self.indexer.short_sleep_seconds
            );
            tokio::time::sleep(Duration::from_secs(self.indexer.short_sleep_seconds)).await;

            match self.config_store.indexer_by_name(&self.indexer.name).await {
                Ok(reloaded) => self.indexer = reloaded,
                Err(e) => {
                    tracing::warn!("failed to reload indexer row: {e}");
                    continue;
                }
            }

            if let Err(e) = self.run_cycle().await {
                tracing::warn!("cycle failed: {e}");
            }
        }
    }

    /// One pass over the next block range. Failures inside the pass log and
    /// leave the watermark alone so the range is retried next cycle.
    pub async fn run_cycle(&mut self) -> Result<(), TokenwatchError> {
        let latest = match self.rpc.latest_block().await {
            Ok(latest) => latest,
            Err(e) => {
                tracing::warn!("fetching latest block failed, skipping cycle: {e}");
                return Ok(());
            }
        };

        let from_block = self.indexer.last_block;
        let to_block = (from_block + self.network.max_step).min(latest);
        if to_block <= from_block {
            tracing::info!("no new blocks found, last block is {from_block}");
            tokio::time::sleep(Duration::from_secs(self.indexer.long_sleep_seconds)).await;
            return Ok(());
        }

        tracing::info!("fetching transfers in blocks [{from_block}; {to_block}]");
        for index in 0..self.fetchers.len() {
            let (transfers, describe, token) = {
                let fetcher = &self.fetchers[index];
                let describe = fetcher.describe();
                let token = fetcher.token().clone();
                match fetcher.get_transfers(from_block, to_block).await {
                    Ok(transfers) => (transfers, describe, token),
                    Err(e) => {
                        tracing::warn!("fetching {describe} failed: {e}");
                        continue;
                    }
                }
            };

            if transfers.is_empty() {
                tracing::debug!("no events from {describe}, advancing");
                self.advance_watermark(to_block).await?;
                continue;
            }

            tracing::info!("fetched {} transfers from {describe}", transfers.len());
            match self
                .strategy
                .apply(
                    self.persistence.as_ref(),
                    &token,
                    self.indexer.id,
                    &transfers,
                )
                .await
            {
                Ok(()) => self.advance_watermark(to_block).await?,
                Err(e) => {
                    tracing::warn!(
                        "handling transfers from {describe} failed, range will be retried: {e}"
                    );
                }
            }
        }
        Ok(())
    }

    async fn advance_watermark(&mut self, to_block: u64) -> Result<(), TokenwatchError> {
        self.config_store
            .set_last_block(self.indexer.id, to_block)
            .await?;
        self.indexer.last_block = to_block;
        Ok(())
    }
}

// =====================
// Balance worker
// =====================

pub struct BalanceWorker {
    config_store: Arc<dyn ConfigStore>,
    persistence: Arc<dyn Persistence>,
    indexer: Indexer,
    callers: Vec<Box<dyn BalanceCaller>>,
    strategy: BalanceStrategy,
}

impl BalanceWorker {
    pub async fn new(
        config_store: Arc<dyn ConfigStore>,
        persistence: Arc<dyn Persistence>,
        indexer: Indexer,
    ) -> Result<Self, TokenwatchError> {
        let network = config_store.network(indexer.network_id).await?;
        let rpc = Arc::new(RpcClient::new(&network)?);
        let strategy = BalanceStrategy::from_indexer(&indexer)?;

        let tokens = config_store.watched_tokens(indexer.id).await?;
        let mut callers = Vec::with_capacity(tokens.len());
        for token in tokens {
            callers.push(balance_caller_for(Arc::clone(&rpc), token)?);
        }

        Ok(Self {
            config_store,
            persistence,
            indexer,
            callers,
            strategy,
        })
    }

    pub async fn run(mut self) -> Result<(), TokenwatchError> {
        loop {
            tracing::info!(
                indexer = %self.indexer.name,
                "starting a cycle, sleeping {} seconds",
                self.indexer.short_sleep_seconds
            );
            tokio::time::sleep(Duration::from_secs(self.indexer.short_sleep_seconds)).await;

            match self.config_store.indexer_by_name(&self.indexer.name).await {
                Ok(reloaded) => self.indexer = reloaded,
                Err(e) => {
                    tracing::warn!("failed to reload indexer row: {e}");
                    continue;
                }
            }

            if let Err(e) = self.run_cycle().await {
                tracing::warn!("cycle failed: {e}");
            }
        }
    }

    /// Poll every holder of every watched token once, with a pause between
    /// holders.
    pub async fn run_cycle(&mut self) -> Result<(), TokenwatchError> {
        for caller in &self.callers {
            let holders = self
                .strategy
                .pick_holders(self.persistence.as_ref(), caller.token())
                .await?;
            for holder in holders {
                let deltas = caller.get_balance(self.persistence.as_ref(), holder).await;
                self.apply_deltas(caller.token().id, deltas).await?;
                tokio::time::sleep(HOLDER_PAUSE).await;
            }
        }
        Ok(())
    }

    async fn apply_deltas(
        &self,
        token_id: i64,
        deltas: Vec<BalanceDelta>,
    ) -> Result<(), TokenwatchError> {
        for delta in deltas {
            match delta {
                BalanceDelta::SetAmount { holder, amount } => {
                    self.persistence
                        .upsert_balance_amount(
                            token_id,
                            &holder.to_string(),
                            &amount,
                            self.indexer.id,
                        )
                        .await?;
                }
                BalanceDelta::AddTokenId { holder, token_id: nft_id } => {
                    self.persistence
                        .insert_held_token(token_id, &holder.to_string(), &nft_id, self.indexer.id)
                        .await?;
                }
                BalanceDelta::RemoveTokenId { holder, token_id: nft_id } => {
                    self.persistence
                        .delete_held_token(token_id, &holder.to_string(), &nft_id)
                        .await?;
                }
            }
        }
        Ok(())
    }
}
