//! Drives [`BatchFetcher`] → [`BlocksStore`] continuously for one chain.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::Context;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::{
    fetcher::BatchFetcher,
    store::BlocksStore,
    types::StoredBlock,
};

const TIP_REFRESH_INTERVAL: Duration = Duration::from_secs(1);
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

pub struct FetchLoop {
    store: Arc<BlocksStore>,
    fetcher: Arc<BatchFetcher>,
    chain_name: String,
    evm_chain_id: u64,
    poll_interval: Duration,
    cancel: CancellationToken,
}

impl FetchLoop {
    pub fn new(
        store: Arc<BlocksStore>,
        fetcher: Arc<BatchFetcher>,
        chain_name: String,
        evm_chain_id: u64,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            fetcher,
            chain_name,
            evm_chain_id,
            poll_interval,
            cancel,
        }
    }

    #[instrument(name = "fetch_loop", skip_all, fields(chain = %self.chain_name))]
    pub async fn run(&self) -> anyhow::Result<()> {
        self.verify_chain_identity().await?;

        let mut tip: Option<(u64, Instant)> = None;
        let mut caught_up = false;
        let mut backoff = INITIAL_BACKOFF;

        while !self.cancel.is_cancelled() {
            let tip_value = match tip {
                Some((value, refreshed)) if refreshed.elapsed() < TIP_REFRESH_INTERVAL => value,
                _ => match self.fetcher.get_current_block_number().await {
                    Ok(value) => {
                        self.store.set_blockchain_latest_block_num(value).await?;
                        tip = Some((value, Instant::now()));
                        value
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "failed to refresh chain tip");
                        self.sleep_cancellable(backoff).await;
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                        continue;
                    }
                },
            };

            let last_stored = self.store.get_last_stored_block_number().await?;
            if last_stored >= tip_value as i64 {
                if !caught_up {
                    caught_up = true;
                    self.store.set_caught_up(true).await?;
                    tracing::info!(tip = tip_value, "caught up with chain tip");
                }
                self.run_maintenance().await;
                self.sleep_cancellable(self.poll_interval).await;
                continue;
            }
            if caught_up {
                caught_up = false;
                self.store.set_caught_up(false).await?;
            }

            let from = (last_stored + 1) as u64;
            match self.fetcher.fetch_next_range(from, tip_value).await {
                Ok(blocks) => {
                    self.check_parent_link(last_stored, &blocks).await?;
                    let first = blocks.first().map(|b| b.block.number).unwrap_or(from);
                    let last = blocks.last().map(|b| b.block.number).unwrap_or(from);
                    match self.store.store_blocks(blocks).await {
                        Ok(()) => {
                            tracing::debug!(first, last, "stored block range");
                            backoff = INITIAL_BACKOFF;
                        }
                        Err(err) => {
                            tracing::error!(error = %err, first, last, "failed to store blocks, backing off");
                            self.sleep_cancellable(backoff).await;
                            backoff = (backoff * 2).min(MAX_BACKOFF);
                        }
                    }
                }
                Err(err) => {
                    return Err(err).context(format!(
                        "fetching blocks from {from} failed permanently"
                    ));
                }
            }
        }

        tracing::info!("fetch loop stopped");
        Ok(())
    }

    /// Cross-checks the endpoint against the configured chain: `eth_chainId`
    /// must match, and on chains exposing the warp precompile the blockchain
    /// id is pinned in the catalog on first contact.
    async fn verify_chain_identity(&self) -> anyhow::Result<()> {
        let remote = self
            .fetcher
            .get_chain_id()
            .await
            .context("failed to query eth_chainId")?;
        anyhow::ensure!(
            remote == self.evm_chain_id,
            "rpc endpoint serves chain id {remote}, configuration expects {}",
            self.evm_chain_id
        );

        match self.fetcher.fetch_blockchain_id_from_precompile().await {
            Ok(blockchain_id) => match self.store.get_precompile_blockchain_id().await? {
                None => {
                    self.store
                        .set_precompile_blockchain_id(blockchain_id)
                        .await?
                }
                Some(stored) => anyhow::ensure!(
                    stored == blockchain_id,
                    "blockchain id from precompile changed; store belongs to a different chain"
                ),
            },
            Err(err) => {
                tracing::debug!(error = %err, "blockchain id precompile not available");
            }
        }
        Ok(())
    }

    /// Refuses a fetched run whose first block does not extend the stored
    /// chain. Input chains are assumed final-consistent, so a mismatch means
    /// the store needs external reconciliation, not an automatic rewind.
    async fn check_parent_link(
        &self,
        last_stored: i64,
        blocks: &[StoredBlock],
    ) -> anyhow::Result<()> {
        let (Some(first), true) = (blocks.first(), last_stored >= 0) else {
            return Ok(());
        };
        let stored_hash = self
            .store
            .get_block_hash(last_stored as u64)
            .await?
            .context("stored head block is missing its payload")?;
        anyhow::ensure!(
            first.block.parent_hash.eq_ignore_ascii_case(&stored_hash),
            "parent hash of block {} does not match stored block {last_stored}; \
             external reconciliation required",
            first.block.number
        );
        Ok(())
    }

    async fn run_maintenance(&self) {
        if let Err(err) = self.store.perform_compression_maintenance().await {
            tracing::warn!(error = %err, "tx compression maintenance failed");
        }
        if let Err(err) = self.store.perform_block_compression_maintenance().await {
            tracing::warn!(error = %err, "block compression maintenance failed");
        }
    }

    async fn sleep_cancellable(&self, duration: Duration) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = sleep(duration) => {}
        }
    }
}
