use async_trait::async_trait;
use sea_orm::{DatabaseConnection, DatabaseTransaction};

use crate::{store::BlocksStore, types::TxBatch};

/// A pluggable extractor driven by the scheduler.
///
/// `extract_data` is a pure transform from a tx batch to an arbitrary
/// derived record; `save_extracted_data` persists it inside the transaction
/// the scheduler also uses for the cursor update, so derived rows and
/// progress commit together. Implementations own their whole database
/// schema; bumping `version` wipes the database and restarts from tx 0.
#[async_trait]
pub trait IndexerPlugin: Send + Sync + 'static {
    type Extracted: Send + 'static;

    /// Stable slug; part of the plugin database file name.
    fn name(&self) -> &str;

    fn version(&self) -> u32;

    fn uses_traces(&self) -> bool {
        false
    }

    /// When set, the scheduler streams only txs carrying one of these
    /// topic\[0\] values (or [`crate::store::CONTRACT_CREATION_TOPIC`]).
    fn filter_topics(&self) -> Option<Vec<String>> {
        None
    }

    /// Creates the plugin's schema. Must be idempotent.
    async fn initialize(&self, db: &DatabaseConnection) -> anyhow::Result<()>;

    async fn extract_data(&self, batch: &TxBatch) -> anyhow::Result<Self::Extracted>;

    async fn save_extracted_data(
        &self,
        txn: &DatabaseTransaction,
        blocks_store: &BlocksStore,
        extracted: Self::Extracted,
    ) -> anyhow::Result<()>;
}
