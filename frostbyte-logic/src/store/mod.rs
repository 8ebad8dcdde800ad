//! Embedded per-chain blocks store.
//!
//! One SQLite file per chain holds compressed block and tx payloads, a
//! 5-byte hash-prefix lookup index, the topic-prefix index used for event
//! filtering, trained compression dictionaries and a small catalog of named
//! counters. Writes are append-only: blocks land strictly contiguously and
//! `tx_num` is the autoincrement row id of the `txs` table, which makes it
//! unique and dense per chain.

use std::{
    collections::{BTreeSet, HashMap},
    path::Path,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use sea_orm::{
    ConnectionTrait, Database, DatabaseConnection, DbBackend, Statement, TransactionTrait,
};

use crate::{
    settings::CompressionSettings,
    types::{Block, CallFrame, StoredBlock, StoredTx, TxBatch, TxTrace},
};
use frostbyte_entity::txs;
use frostbyte_migration::{Migrator, MigratorTrait};

pub(crate) mod compression;
mod maintenance;
pub(crate) mod repository;

#[cfg(test)]
pub(crate) mod tests;

use repository::{
    blocks as blocks_repo, catalog, dictionaries, dictionaries::TxDictKind, topics as topics_repo,
    txs as txs_repo,
};

/// Length of the hash- and topic-prefix secondary index values. The prefix
/// is a bloom, not an identifier: lookups must re-check the full hash after
/// decoding and skip mismatches.
pub const PREFIX_LEN: usize = 5;

/// Pseudo-topic accepted by `get_tx_batch` filters to select
/// contract-creating transactions (null `to`, or any CREATE*-family trace
/// node).
pub const CONTRACT_CREATION_TOPIC: &str = "contract-creation";

const CONTRACT_CREATION_PREFIX: [u8; PREFIX_LEN] = *b"creat";

/// Hard cap on topic-filtered reads regardless of the caller's limit.
const MAX_FILTER_LIMIT: u64 = 10_000;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("batch is empty")]
    EmptyBatch,
    #[error("batch is not contiguous: expected first block {expected}, got {got}")]
    NotContiguous { expected: i64, got: i64 },
    #[error("gap inside batch at block {number}")]
    GapInBatch { number: u64 },
    #[error("batch mixes blocks with and without traces")]
    MixedTraces,
    #[error("hasDebug mismatch: store holds {stored}, caller passed {requested}")]
    HasDebugMismatch { stored: i64, requested: bool },
    #[error("evm chain id mismatch: store holds {stored}, caller passed {requested}")]
    ChainIdMismatch { stored: i64, requested: u64 },
    #[error("invalid hex value: {0}")]
    InvalidHex(String),
    #[error("receipts of block {block} do not match its transactions")]
    ReceiptMismatch { block: u64 },
    #[error("missing trace for tx {0}")]
    MissingTrace(String),
}

/// Block selector for the slow reassembly path used by the read API.
#[derive(Clone, Debug)]
pub enum BlockId {
    Number(u64),
    Hash(String),
}

impl From<u64> for BlockId {
    fn from(number: u64) -> Self {
        BlockId::Number(number)
    }
}

pub struct BlocksStore {
    db: DatabaseConnection,
    has_debug: bool,
    compression: CompressionSettings,
    dict_cache: DictionaryCache,
}

impl BlocksStore {
    pub fn file_name(has_debug: bool) -> &'static str {
        if has_debug {
            "blocks.db"
        } else {
            "blocks_nodebug.db"
        }
    }

    /// Opens (creating if necessary) the chain's store under `chain_dir`.
    ///
    /// Fails fast when the directory already carries a store bound to the
    /// opposite debug mode, or when the stored EVM chain id disagrees.
    pub async fn open(
        chain_dir: &Path,
        evm_chain_id: u64,
        has_debug: bool,
        compression: CompressionSettings,
    ) -> Result<Self, StoreError> {
        std::fs::create_dir_all(chain_dir)?;

        let counterpart = chain_dir.join(Self::file_name(!has_debug));
        if counterpart.exists() {
            return Err(StoreError::HasDebugMismatch {
                stored: !has_debug as i64,
                requested: has_debug,
            });
        }

        let path = chain_dir.join(Self::file_name(has_debug));
        let db = Database::connect(format!("sqlite://{}?mode=rwc", path.display())).await?;
        db.execute(Statement::from_string(
            DbBackend::Sqlite,
            "PRAGMA journal_mode = WAL".to_owned(),
        ))
        .await?;
        Migrator::up(&db, None).await?;

        let stored_debug = catalog::get_int(&db, catalog::HAS_DEBUG).await?.unwrap_or(-1);
        if stored_debug != -1 && stored_debug != has_debug as i64 {
            return Err(StoreError::HasDebugMismatch {
                stored: stored_debug,
                requested: has_debug,
            });
        }

        match catalog::get_int(&db, catalog::EVM_CHAIN_ID).await? {
            None => catalog::set_int(&db, catalog::EVM_CHAIN_ID, evm_chain_id as i64).await?,
            Some(stored) if stored != evm_chain_id as i64 => {
                return Err(StoreError::ChainIdMismatch {
                    stored,
                    requested: evm_chain_id,
                })
            }
            Some(_) => {}
        }

        let dict_cache = DictionaryCache::new(compression.dict_cache_ttl);
        Ok(Self {
            db,
            has_debug,
            compression,
            dict_cache,
        })
    }

    /// The debug mode this handle was opened with.
    pub fn has_debug(&self) -> bool {
        self.has_debug
    }

    pub(crate) fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    pub async fn get_last_stored_block_number(&self) -> Result<i64, StoreError> {
        Ok(catalog::get_int(&self.db, catalog::LAST_STORED_BLOCK_NUMBER)
            .await?
            .unwrap_or(-1))
    }

    pub async fn get_tx_count(&self) -> Result<u64, StoreError> {
        Ok(catalog::get_int(&self.db, catalog::TX_COUNT)
            .await?
            .unwrap_or(0) as u64)
    }

    pub async fn get_evm_chain_id(&self) -> Result<Option<i64>, StoreError> {
        Ok(catalog::get_int(&self.db, catalog::EVM_CHAIN_ID).await?)
    }

    pub async fn set_evm_chain_id(&self, id: u64) -> Result<(), StoreError> {
        Ok(catalog::set_int(&self.db, catalog::EVM_CHAIN_ID, id as i64).await?)
    }

    pub async fn get_blockchain_latest_block_num(&self) -> Result<i64, StoreError> {
        Ok(catalog::get_int(&self.db, catalog::BLOCKCHAIN_LATEST_BLOCK)
            .await?
            .unwrap_or(-1))
    }

    pub async fn set_blockchain_latest_block_num(&self, number: u64) -> Result<(), StoreError> {
        Ok(catalog::set_int(&self.db, catalog::BLOCKCHAIN_LATEST_BLOCK, number as i64).await?)
    }

    /// −1 until the first `store_blocks` commit binds it to 0 or 1.
    pub async fn get_has_debug(&self) -> Result<i64, StoreError> {
        Ok(catalog::get_int(&self.db, catalog::HAS_DEBUG)
            .await?
            .unwrap_or(-1))
    }

    pub async fn set_caught_up(&self, caught_up: bool) -> Result<(), StoreError> {
        Ok(catalog::set_int(&self.db, catalog::IS_CAUGHT_UP, caught_up as i64).await?)
    }

    pub async fn is_caught_up(&self) -> Result<bool, StoreError> {
        Ok(catalog::get_int(&self.db, catalog::IS_CAUGHT_UP)
            .await?
            .unwrap_or(0)
            == 1)
    }

    pub async fn get_precompile_blockchain_id(&self) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(catalog::get_blob(&self.db, catalog::PRECOMPILE_BLOCKCHAIN_ID).await?)
    }

    pub async fn set_precompile_blockchain_id(&self, id: Vec<u8>) -> Result<(), StoreError> {
        Ok(catalog::set_blob(&self.db, catalog::PRECOMPILE_BLOCKCHAIN_ID, id).await?)
    }

    /// Appends a contiguous, sorted run of blocks. All-or-nothing: either the
    /// whole range (blocks, txs, topic rows, catalog counters) commits, or
    /// the store is left untouched.
    pub async fn store_blocks(&self, batch: Vec<StoredBlock>) -> Result<(), StoreError> {
        let first = batch.first().ok_or(StoreError::EmptyBatch)?;

        let last_stored = self.get_last_stored_block_number().await?;
        let expected = last_stored + 1;
        if first.block.number as i64 != expected {
            return Err(StoreError::NotContiguous {
                expected,
                got: first.block.number as i64,
            });
        }
        for window in batch.windows(2) {
            if window[1].block.number != window[0].block.number + 1 {
                return Err(StoreError::GapInBatch {
                    number: window[1].block.number,
                });
            }
        }

        let batch_has_traces = first.traces.is_some();
        if batch.iter().any(|b| b.traces.is_some() != batch_has_traces) {
            return Err(StoreError::MixedTraces);
        }
        let stored_debug = self.get_has_debug().await?;
        if stored_debug != -1 && stored_debug != batch_has_traces as i64 {
            return Err(StoreError::HasDebugMismatch {
                stored: stored_debug,
                requested: batch_has_traces,
            });
        }
        if batch_has_traces != self.has_debug {
            return Err(StoreError::HasDebugMismatch {
                stored: self.has_debug as i64,
                requested: batch_has_traces,
            });
        }

        let level = self.compression.level;
        let last_number = batch
            .last()
            .map(|b| b.block.number)
            .unwrap_or(first.block.number);

        let txn = self.db.begin().await?;
        let mut new_txs: i64 = 0;

        for stored_block in batch {
            let StoredBlock {
                mut block,
                mut receipts,
                traces,
            } = stored_block;

            let block_txs = block.transactions.take().unwrap_or_default();
            block.logs_bloom = None;
            let number = block.number;
            let block_prefix = hex_prefix(&block.hash)?;
            let payload = compression::compress(&serde_json::to_vec(&block)?, level)?;
            blocks_repo::insert(&txn, number as i64, block_prefix.to_vec(), payload).await?;

            let trace_by_hash: Option<HashMap<String, CallFrame>> = traces
                .map(|list| list.into_iter().map(|t| (t.tx_hash, t.result)).collect());

            for tx in block_txs {
                let mut receipt = receipts
                    .remove(&tx.hash)
                    .ok_or(StoreError::ReceiptMismatch { block: number })?;
                receipt.logs_bloom = None;

                let trace = if let Some(map) = &trace_by_hash {
                    let frame = map
                        .get(&tx.hash)
                        .cloned()
                        .ok_or_else(|| StoreError::MissingTrace(tx.hash.clone()))?;
                    Some(frame)
                } else {
                    None
                };

                let tx_prefix = hex_prefix(&tx.hash)?;
                let is_creation = tx.to.is_none()
                    || trace.as_ref().map(CallFrame::contains_create).unwrap_or(false);

                let stored_tx = StoredTx {
                    tx_num: 0,
                    tx,
                    receipt,
                    block_timestamp: block.timestamp,
                };
                let payload = compression::compress(&serde_json::to_vec(&stored_tx)?, level)?;
                let traces_payload = trace
                    .as_ref()
                    .map(|frame| -> Result<Vec<u8>, StoreError> {
                        Ok(compression::compress(&serde_json::to_vec(frame)?, level)?)
                    })
                    .transpose()?;

                let tx_num =
                    txs_repo::insert(&txn, tx_prefix.to_vec(), number as i64, payload, traces_payload)
                        .await?;

                let mut prefixes: BTreeSet<[u8; PREFIX_LEN]> = BTreeSet::new();
                for log in &stored_tx.receipt.logs {
                    if let Some(topic0) = log.topics.first() {
                        prefixes.insert(hex_prefix(topic0)?);
                    }
                }
                if is_creation {
                    prefixes.insert(CONTRACT_CREATION_PREFIX);
                }
                topics_repo::insert_many(
                    &txn,
                    prefixes.into_iter().map(|p| (p.to_vec(), tx_num)).collect(),
                )
                .await?;

                new_txs += 1;
            }

            if !receipts.is_empty() {
                return Err(StoreError::ReceiptMismatch { block: number });
            }
        }

        let tx_count = catalog::get_int(&txn, catalog::TX_COUNT)
            .await?
            .unwrap_or(0)
            + new_txs;
        catalog::set_int(&txn, catalog::TX_COUNT, tx_count).await?;
        catalog::set_int(
            &txn,
            catalog::LAST_STORED_BLOCK_NUMBER,
            last_number as i64,
        )
        .await?;
        if stored_debug == -1 {
            catalog::set_int(&txn, catalog::HAS_DEBUG, batch_has_traces as i64).await?;
        }

        txn.commit().await?;
        Ok(())
    }

    /// The core streaming read used by indexers. Returns txs with
    /// `tx_num > greater_than_tx_num` in ascending order, optionally
    /// restricted to txs carrying one of `filter_topics` (topic\[0\] hex
    /// strings, or [`CONTRACT_CREATION_TOPIC`]).
    pub async fn get_tx_batch(
        &self,
        greater_than_tx_num: i64,
        limit: u64,
        include_traces: bool,
        filter_topics: Option<&[String]>,
    ) -> Result<TxBatch, StoreError> {
        let rows = match filter_topics {
            Some(topics) if !topics.is_empty() => {
                let prefixes = topics
                    .iter()
                    .map(|topic| filter_prefix(topic))
                    .collect::<Result<Vec<_>, _>>()?;
                let tx_nums = topics_repo::tx_nums_for_prefixes(
                    &self.db,
                    prefixes.into_iter().map(|p| p.to_vec()).collect(),
                    greater_than_tx_num,
                    limit.min(MAX_FILTER_LIMIT),
                )
                .await?;
                if tx_nums.is_empty() {
                    vec![]
                } else {
                    txs_repo::by_tx_nums(&self.db, tx_nums).await?
                }
            }
            _ => txs_repo::stream_after(&self.db, greater_than_tx_num, limit).await?,
        };

        let include_traces = include_traces && self.get_has_debug().await? == 1;
        let mut decoded = Vec::with_capacity(rows.len());
        let mut traces = include_traces.then(|| Vec::with_capacity(rows.len()));
        for row in rows {
            let (stored_tx, trace) = self.decode_tx_row(row, include_traces).await?;
            decoded.push(stored_tx);
            if let Some(traces) = traces.as_mut() {
                traces.push(trace);
            }
        }

        Ok(TxBatch {
            txs: decoded,
            traces,
            max_tx_num: self.get_tx_count().await?,
        })
    }

    /// Reassembles a block with its full ordered transaction list. Slow by
    /// design: meant for the read API, not the streaming path.
    pub async fn slow_get_block_with_transactions(
        &self,
        id: BlockId,
    ) -> Result<Option<Block>, StoreError> {
        let row = match &id {
            BlockId::Number(number) => blocks_repo::get(&self.db, *number as i64).await?,
            BlockId::Hash(hash) => {
                let prefix = hex_prefix(hash)?;
                let mut found = None;
                for candidate in
                    blocks_repo::find_by_hash_prefix(&self.db, prefix.to_vec()).await?
                {
                    let block = self.decode_block(&candidate).await?;
                    if block.hash.eq_ignore_ascii_case(hash) {
                        found = Some(candidate);
                        break;
                    }
                }
                found
            }
        };
        let row = match row {
            Some(row) => row,
            None => return Ok(None),
        };

        let mut block = self.decode_block(&row).await?;
        let tx_rows = txs_repo::by_block(&self.db, row.number).await?;
        let mut transactions = Vec::with_capacity(tx_rows.len());
        for tx_row in tx_rows {
            let (stored_tx, _) = self.decode_tx_row(tx_row, false).await?;
            transactions.push(stored_tx.tx);
        }
        block.transactions = Some(transactions);
        Ok(Some(block))
    }

    /// Hash of a stored block, for parent-link verification.
    pub async fn get_block_hash(&self, number: u64) -> Result<Option<String>, StoreError> {
        match blocks_repo::get(&self.db, number as i64).await? {
            Some(row) => Ok(Some(self.decode_block(&row).await?.hash)),
            None => Ok(None),
        }
    }

    /// Point lookup by full tx hash; resolves 5-byte-prefix collisions by
    /// comparing the decoded hash.
    pub async fn get_tx_receipt(
        &self,
        hash: &str,
    ) -> Result<Option<crate::types::Receipt>, StoreError> {
        let prefix = hex_prefix(hash)?;
        for row in txs_repo::find_by_hash_prefix(&self.db, prefix.to_vec()).await? {
            let (stored_tx, _) = self.decode_tx_row(row, false).await?;
            if stored_tx.tx.hash.eq_ignore_ascii_case(hash) {
                return Ok(Some(stored_tx.receipt));
            }
        }
        Ok(None)
    }

    /// All top-level traces of one block, in tx order. Empty when the store
    /// has no debug data.
    pub async fn slow_get_block_traces(&self, number: u64) -> Result<Vec<TxTrace>, StoreError> {
        let mut traces = Vec::new();
        for row in txs_repo::by_block(&self.db, number as i64).await? {
            if row.traces.is_none() {
                continue;
            }
            let (stored_tx, trace) = self.decode_tx_row(row, true).await?;
            if let Some(result) = trace {
                traces.push(TxTrace {
                    tx_hash: stored_tx.tx.hash,
                    result,
                });
            }
        }
        Ok(traces)
    }

    fn tx_batch_num(&self, tx_num: i64) -> i64 {
        (tx_num - 1) / self.compression.batch_size.max(1) as i64
    }

    fn block_batch_num(&self, number: i64) -> i64 {
        number / self.compression.batch_size.max(1) as i64
    }

    async fn decode_tx_row(
        &self,
        row: txs::Model,
        include_traces: bool,
    ) -> Result<(StoredTx, Option<CallFrame>), StoreError> {
        let batch_num = self.tx_batch_num(row.tx_num);

        let dict = self.tx_dictionary(batch_num, TxDictKind::Data).await?;
        let payload = compression::decompress(&row.payload, dict.as_ref().map(|d| d.as_slice()))?;
        let mut stored_tx: StoredTx = serde_json::from_slice(&payload)?;
        stored_tx.tx_num = row.tx_num as u64;

        let trace = if include_traces {
            match &row.traces {
                Some(bytes) => {
                    let dict = self.tx_dictionary(batch_num, TxDictKind::Traces).await?;
                    let raw =
                        compression::decompress(bytes, dict.as_ref().map(|d| d.as_slice()))?;
                    Some(serde_json::from_slice(&raw)?)
                }
                None => None,
            }
        } else {
            None
        };

        Ok((stored_tx, trace))
    }

    async fn decode_block(
        &self,
        row: &frostbyte_entity::blocks::Model,
    ) -> Result<Block, StoreError> {
        let dict = self.block_dictionary(self.block_batch_num(row.number)).await?;
        let payload = compression::decompress(&row.payload, dict.as_ref().map(|d| d.as_slice()))?;
        Ok(serde_json::from_slice(&payload)?)
    }

    /// Dictionary for a tx batch, or `None` while the batch has not been
    /// re-compressed yet. Misses are not cached: a freshly installed
    /// dictionary must become visible to readers immediately.
    async fn tx_dictionary(
        &self,
        batch_num: i64,
        kind: TxDictKind,
    ) -> Result<Option<Arc<Vec<u8>>>, StoreError> {
        if let Some(dict) = self.dict_cache.get_tx(batch_num, kind) {
            return Ok(Some(dict));
        }
        match dictionaries::get_tx_dict(&self.db, batch_num, kind).await? {
            Some(bytes) => Ok(Some(self.dict_cache.insert_tx(batch_num, kind, bytes))),
            None => Ok(None),
        }
    }

    async fn block_dictionary(&self, batch_num: i64) -> Result<Option<Arc<Vec<u8>>>, StoreError> {
        if let Some(dict) = self.dict_cache.get_block(batch_num) {
            return Ok(Some(dict));
        }
        match dictionaries::get_block_dict(&self.db, batch_num).await? {
            Some(bytes) => Ok(Some(self.dict_cache.insert_block(batch_num, bytes))),
            None => Ok(None),
        }
    }
}

/// First [`PREFIX_LEN`] bytes of a `0x`-prefixed hex string.
pub(crate) fn hex_prefix(value: &str) -> Result<[u8; PREFIX_LEN], StoreError> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    let bytes = hex::decode(digits).map_err(|_| StoreError::InvalidHex(value.to_owned()))?;
    bytes
        .get(..PREFIX_LEN)
        .and_then(|slice| <[u8; PREFIX_LEN]>::try_from(slice).ok())
        .ok_or_else(|| StoreError::InvalidHex(value.to_owned()))
}

fn filter_prefix(topic: &str) -> Result<[u8; PREFIX_LEN], StoreError> {
    if topic == CONTRACT_CREATION_TOPIC {
        Ok(CONTRACT_CREATION_PREFIX)
    } else {
        hex_prefix(topic)
    }
}

/// Append-only in-memory cache of installed dictionaries, keyed by batch
/// ordinal. Cleared wholesale when older than its TTL so long-running
/// readers don't pin arbitrary memory; entries themselves never mutate.
struct DictionaryCache {
    ttl: Duration,
    inner: Mutex<CacheInner>,
}

struct CacheInner {
    last_cleared: Instant,
    tx: HashMap<(i64, TxDictKind), Arc<Vec<u8>>>,
    blocks: HashMap<i64, Arc<Vec<u8>>>,
}

impl DictionaryCache {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Mutex::new(CacheInner {
                last_cleared: Instant::now(),
                tx: HashMap::new(),
                blocks: HashMap::new(),
            }),
        }
    }

    fn get_tx(&self, batch_num: i64, kind: TxDictKind) -> Option<Arc<Vec<u8>>> {
        let inner = self.lock();
        inner.tx.get(&(batch_num, kind)).cloned()
    }

    fn insert_tx(&self, batch_num: i64, kind: TxDictKind, bytes: Vec<u8>) -> Arc<Vec<u8>> {
        let dict = Arc::new(bytes);
        let mut inner = self.lock();
        inner.tx.insert((batch_num, kind), dict.clone());
        dict
    }

    fn get_block(&self, batch_num: i64) -> Option<Arc<Vec<u8>>> {
        let inner = self.lock();
        inner.blocks.get(&batch_num).cloned()
    }

    fn insert_block(&self, batch_num: i64, bytes: Vec<u8>) -> Arc<Vec<u8>> {
        let dict = Arc::new(bytes);
        let mut inner = self.lock();
        inner.blocks.insert(batch_num, dict.clone());
        dict
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner> {
        let mut inner = self.inner.lock().expect("dictionary cache lock poisoned");
        if inner.last_cleared.elapsed() >= self.ttl {
            inner.tx.clear();
            inner.blocks.clear();
            inner.last_cleared = Instant::now();
        }
        inner
    }
}
