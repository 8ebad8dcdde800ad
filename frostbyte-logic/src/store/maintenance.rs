//! Online compression maintenance.
//!
//! Recent data is stored at a cheap compression level; once a full batch of
//! records is present, one maintenance step trains per-batch dictionaries
//! over the decoded payloads and re-compresses the whole batch inside a
//! single transaction. Each invocation processes at most one batch, so the
//! caller can interleave steps with regular work. Interruption is safe: the
//! batch pointer only advances in the same transaction that rewrites the
//! payloads and installs the dictionaries.

use sea_orm::TransactionTrait;

use super::{
    compression,
    repository::{
        blocks as blocks_repo, catalog, dictionaries, dictionaries::TxDictKind, txs as txs_repo,
    },
    BlocksStore, StoreError,
};

impl BlocksStore {
    /// Re-compresses the next eligible tx batch. Returns `true` when a batch
    /// was processed, `false` when no full batch is pending.
    pub async fn perform_compression_maintenance(&self) -> Result<bool, StoreError> {
        let batch_size = self.compression.batch_size.max(1) as i64;
        let next_batch = catalog::get_int(&self.db, catalog::LAST_COMPRESSED_BATCH_NUM)
            .await?
            .unwrap_or(-1)
            + 1;
        let first_tx = next_batch * batch_size + 1;
        let last_tx = (next_batch + 1) * batch_size;
        if (self.get_tx_count().await? as i64) < last_tx {
            return Ok(false);
        }

        let rows = txs_repo::range(&self.db, first_tx, last_tx).await?;

        // Rows of a not-yet-compressed batch carry dictionary-less frames.
        let mut decoded = Vec::with_capacity(rows.len());
        for row in &rows {
            let data = compression::decompress(&row.payload, None)?;
            let trace = row
                .traces
                .as_ref()
                .map(|bytes| compression::decompress(bytes, None))
                .transpose()?;
            decoded.push((data, trace));
        }

        let sample_every = self.compression.dict_sample_every.max(1) as usize;
        let data_samples: Vec<&[u8]> = decoded
            .iter()
            .step_by(sample_every)
            .map(|(data, _)| data.as_slice())
            .collect();
        let trace_samples: Vec<&[u8]> = decoded
            .iter()
            .step_by(sample_every)
            .filter_map(|(_, trace)| trace.as_deref())
            .collect();

        let data_dict = compression::train_dictionary(&data_samples, self.compression.max_dict_size)?;
        let traces_dict = if trace_samples.is_empty() {
            None
        } else {
            Some(compression::train_dictionary(
                &trace_samples,
                self.compression.max_dict_size,
            )?)
        };

        let level = self.compression.dict_level;
        let txn = self.db.begin().await?;
        for (row, (data, trace)) in rows.iter().zip(decoded.iter()) {
            let payload = compression::compress_with_dict(data, level, &data_dict)?;
            let traces_payload = match (trace, &traces_dict) {
                (Some(raw), Some(dict)) => Some(compression::compress_with_dict(raw, level, dict)?),
                _ => None,
            };
            txs_repo::update_compressed(&txn, row.tx_num, payload, traces_payload).await?;
        }
        dictionaries::insert_tx_dict(&txn, next_batch, TxDictKind::Data, data_dict).await?;
        if let Some(dict) = traces_dict {
            dictionaries::insert_tx_dict(&txn, next_batch, TxDictKind::Traces, dict).await?;
        }
        catalog::set_int(&txn, catalog::LAST_COMPRESSED_BATCH_NUM, next_batch).await?;
        txn.commit().await?;

        tracing::info!(
            batch = next_batch,
            records = rows.len(),
            "re-compressed tx batch with trained dictionaries"
        );
        Ok(true)
    }

    /// Same shape as [`Self::perform_compression_maintenance`], keyed by
    /// block number.
    pub async fn perform_block_compression_maintenance(&self) -> Result<bool, StoreError> {
        let batch_size = self.compression.batch_size.max(1) as i64;
        let next_batch = catalog::get_int(&self.db, catalog::LAST_COMPRESSED_BLOCK_BATCH_NUM)
            .await?
            .unwrap_or(-1)
            + 1;
        let first_block = next_batch * batch_size;
        let last_block = (next_batch + 1) * batch_size - 1;
        if self.get_last_stored_block_number().await? < last_block {
            return Ok(false);
        }

        let rows = blocks_repo::range(&self.db, first_block, last_block).await?;

        let mut decoded = Vec::with_capacity(rows.len());
        for row in &rows {
            decoded.push(compression::decompress(&row.payload, None)?);
        }

        let sample_every = self.compression.dict_sample_every.max(1) as usize;
        let samples: Vec<&[u8]> = decoded
            .iter()
            .step_by(sample_every)
            .map(|data| data.as_slice())
            .collect();
        let dict = compression::train_dictionary(&samples, self.compression.max_dict_size)?;

        let level = self.compression.dict_level;
        let txn = self.db.begin().await?;
        for (row, data) in rows.iter().zip(decoded.iter()) {
            let payload = compression::compress_with_dict(data, level, &dict)?;
            blocks_repo::update_payload(&txn, row.number, payload).await?;
        }
        dictionaries::insert_block_dict(&txn, next_batch, dict).await?;
        catalog::set_int(&txn, catalog::LAST_COMPRESSED_BLOCK_BATCH_NUM, next_batch).await?;
        txn.commit().await?;

        tracing::info!(
            batch = next_batch,
            records = rows.len(),
            "re-compressed block batch with trained dictionary"
        );
        Ok(true)
    }
}
