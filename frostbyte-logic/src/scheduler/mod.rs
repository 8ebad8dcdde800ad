//! Per-(chain, indexer) scheduling of pluggable extractors over the store's
//! tx stream.
//!
//! Each scheduler owns one plugin and one plugin database. Progress is a
//! single cursor (the greatest fully consumed `tx_num`), updated in the same
//! transaction as the plugin's derived rows, so a crash never loses or
//! replays acknowledged work. Batches are processed in strictly increasing
//! `tx_num` order; across plugins no ordering is guaranteed.

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use sea_orm::TransactionTrait;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::{settings::SchedulerSettings, store::BlocksStore};

pub mod lookahead;
pub mod plugin;
pub mod plugin_db;


pub use lookahead::LookaheadManager;
pub use plugin::IndexerPlugin;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

pub struct IndexerScheduler<P: IndexerPlugin> {
    plugin: P,
    store: Arc<BlocksStore>,
    chain_dir: PathBuf,
    lookahead: Arc<LookaheadManager>,
    settings: SchedulerSettings,
    cancel: CancellationToken,
}

impl<P: IndexerPlugin> IndexerScheduler<P> {
    pub fn new(
        plugin: P,
        store: Arc<BlocksStore>,
        chain_dir: PathBuf,
        lookahead: Arc<LookaheadManager>,
        settings: SchedulerSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            plugin,
            store,
            chain_dir,
            lookahead,
            settings,
            cancel,
        }
    }

    #[instrument(name = "indexer_scheduler", skip_all, fields(indexer = %self.plugin.name()))]
    pub async fn run(&self) -> anyhow::Result<()> {
        let db =
            plugin_db::open_or_reset(&self.chain_dir, &self.plugin, self.store.has_debug()).await?;
        let mut cursor = plugin_db::get_cursor(&db).await?;
        tracing::info!(cursor, version = self.plugin.version(), "indexer scheduler started");

        let filter = self.plugin.filter_topics();
        let mut failures = 0u32;

        while !self.cancel.is_cancelled() {
            if self.lookahead.current() == 0 {
                self.sleep_cancellable(self.settings.poll_interval).await;
                continue;
            }

            match self.step(&db, cursor, filter.as_deref()).await {
                Ok(Some(new_cursor)) => {
                    cursor = new_cursor;
                    failures = 0;
                }
                Ok(None) => {
                    self.sleep_cancellable(self.settings.poll_interval).await;
                }
                Err(err) => {
                    failures += 1;
                    if failures > self.settings.max_consecutive_failures {
                        return Err(err).context(format!(
                            "indexer {} failed {failures} times in a row",
                            self.plugin.name()
                        ));
                    }
                    let delay =
                        (INITIAL_BACKOFF * 2u32.saturating_pow(failures - 1)).min(MAX_BACKOFF);
                    tracing::error!(error = ?err, failures, ?delay, "indexer step failed, backing off");
                    self.sleep_cancellable(delay).await;
                }
            }
        }

        tracing::info!("indexer scheduler stopped");
        Ok(())
    }

    /// One fetch–extract–save round. Returns the new cursor, or `None` when
    /// there is nothing to do yet.
    async fn step(
        &self,
        db: &sea_orm::DatabaseConnection,
        cursor: i64,
        filter: Option<&[String]>,
    ) -> anyhow::Result<Option<i64>> {
        let batch = self
            .store
            .get_tx_batch(
                cursor,
                self.settings.batch_size,
                self.plugin.uses_traces(),
                filter,
            )
            .await?;
        let max_tx_num = batch.max_tx_num as i64;

        if batch.txs.is_empty() {
            if max_tx_num <= cursor {
                return Ok(None);
            }
            // A topic filter matched nothing in the remaining stream; the
            // whole range up to max_tx_num was scanned, so skip ahead.
            let txn = db.begin().await?;
            plugin_db::set_cursor(&txn, max_tx_num).await?;
            txn.commit().await?;
            return Ok(Some(max_tx_num));
        }

        let last = batch.txs.last().map(|tx| tx.tx_num as i64).unwrap_or(cursor);
        let extracted = self.plugin.extract_data(&batch).await?;

        let txn = db.begin().await?;
        self.plugin
            .save_extracted_data(&txn, self.store.as_ref(), extracted)
            .await?;
        plugin_db::set_cursor(&txn, last).await?;
        txn.commit().await?;

        tracing::debug!(cursor = last, txs = batch.txs.len(), "processed tx batch");
        Ok(Some(last))
    }

    async fn sleep_cancellable(&self, duration: Duration) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = sleep(duration) => {}
        }
    }
}
