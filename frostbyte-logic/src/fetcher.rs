//! Composes [`RpcClient`] calls into whole-block fetches.
//!
//! A fetch retrieves a run of consecutive blocks with full transactions,
//! every receipt (through `eth_getBlockReceipts` when the endpoint supports
//! it, probed once) and, when the debug namespace is enabled, one
//! `callTracer` trace per transaction. The number of blocks requested per
//! round adapts to the server: responses that fit comfortably grow the batch
//! (when enabled), oversize failures halve it down to a floor and the same
//! range is retried. A range is never skipped.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicI8, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use reqwest::StatusCode;
use serde_json::json;
use tokio::time::sleep;

use crate::{
    rpc_client::{RpcClient, RpcClientError, RpcRequest},
    settings::RpcSettings,
    types::{parse_hex_u64, Block, Receipt, StoredBlock, TxTrace},
};

/// Rough upper bound on what one fetch round is allowed to pull back;
/// `utilization_ratio` is measured against this. Diagnostics only.
const RESPONSE_BYTES_CAP: f64 = 100.0 * 1024.0 * 1024.0;

/// Grow the batch only while responses stay comfortably under the cap.
const GROWTH_UTILIZATION_THRESHOLD: f64 = 0.5;

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(15);

/// JSON-RPC "method not found", returned for `eth_getBlockReceipts` by
/// endpoints that don't implement it.
const METHOD_NOT_FOUND: i64 = -32601;

/// Avalanche warp precompile and the `getBlockchainID()` selector, used to
/// cross-check chain identity against the configured blockchain id.
const BLOCKCHAIN_ID_PRECOMPILE: &str = "0x0200000000000000000000000000000000000005";
const GET_BLOCKCHAIN_ID_CALLDATA: &str = "0x4213cf78";

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("rpc error: {0}")]
    Rpc(#[from] RpcClientError),
    #[error("block {0} not available yet")]
    BlockUnavailable(u64),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("receipts of block {0} do not match its transactions")]
    ReceiptMismatch(u64),
    #[error("traces of block {0} do not match its transactions")]
    TraceMismatch(u64),
    #[error("range [{from}, {to}] could not be fetched at minimum batch size")]
    Exhausted {
        from: u64,
        to: u64,
        #[source]
        source: Box<FetchError>,
    },
}

impl FetchError {
    fn is_size_related(&self) -> bool {
        match self {
            FetchError::Rpc(err) => {
                if err.is_timeout() {
                    return true;
                }
                match err {
                    RpcClientError::Http(status) => *status == StatusCode::PAYLOAD_TOO_LARGE,
                    RpcClientError::Rpc { message, .. } => {
                        let message = message.to_ascii_lowercase();
                        message.contains("too large")
                            || message.contains("response size")
                            || message.contains("limit exceeded")
                    }
                    _ => false,
                }
            }
            _ => false,
        }
    }

    /// Any per-sub-request error on a required call fails the whole round;
    /// the round is then retried at a smaller batch size.
    fn is_sub_request_error(&self) -> bool {
        matches!(self, FetchError::Rpc(RpcClientError::Rpc { .. }))
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BatchSizeStats {
    pub current: u64,
    pub min: u64,
    pub utilization_ratio: f64,
}

struct Sizing {
    current: u64,
    last_utilization: f64,
}

pub struct BatchFetcher {
    client: Arc<RpcClient>,
    rpc_supports_debug: bool,
    initial_batch_size: u64,
    min_batch_size: u64,
    enable_growth: bool,
    max_retries: u32,
    sizing: Mutex<Sizing>,
    /// −1 unknown, 0 unsupported, 1 supported.
    block_receipts_support: AtomicI8,
}

impl BatchFetcher {
    pub fn new(client: Arc<RpcClient>, settings: &RpcSettings) -> Self {
        let min = settings.min_blocks_per_batch.max(1);
        let initial = settings.blocks_per_batch.max(min);
        Self {
            client,
            rpc_supports_debug: settings.rpc_supports_debug,
            initial_batch_size: initial,
            min_batch_size: min,
            enable_growth: settings.enable_batch_size_growth,
            max_retries: settings.max_retries,
            sizing: Mutex::new(Sizing {
                current: initial,
                last_utilization: 0.0,
            }),
            block_receipts_support: AtomicI8::new(-1),
        }
    }

    pub async fn get_current_block_number(&self) -> Result<u64, FetchError> {
        let result = self.client.call("eth_blockNumber", json!([])).await?;
        let hex: String = serde_json::from_value(result)
            .map_err(|e| FetchError::Malformed(e.to_string()))?;
        parse_hex_u64(&hex).map_err(|e| FetchError::Malformed(e.to_string()))
    }

    pub async fn get_chain_id(&self) -> Result<u64, FetchError> {
        let result = self.client.call("eth_chainId", json!([])).await?;
        let hex: String = serde_json::from_value(result)
            .map_err(|e| FetchError::Malformed(e.to_string()))?;
        parse_hex_u64(&hex).map_err(|e| FetchError::Malformed(e.to_string()))
    }

    /// One-shot `eth_call` to the warp precompile; returns the raw 32-byte
    /// blockchain id. Chains without the precompile fail the call and the
    /// caller decides whether that matters.
    pub async fn fetch_blockchain_id_from_precompile(&self) -> Result<Vec<u8>, FetchError> {
        let params = json!([
            {"to": BLOCKCHAIN_ID_PRECOMPILE, "data": GET_BLOCKCHAIN_ID_CALLDATA},
            "latest",
        ]);
        let result = self.client.call("eth_call", params).await?;
        let hex: String = serde_json::from_value(result)
            .map_err(|e| FetchError::Malformed(e.to_string()))?;
        let digits = hex.strip_prefix("0x").unwrap_or(&hex);
        hex::decode(digits).map_err(|e| FetchError::Malformed(e.to_string()))
    }

    pub fn get_batch_size_stats(&self) -> BatchSizeStats {
        let sizing = self.sizing.lock().expect("sizing lock poisoned");
        BatchSizeStats {
            current: sizing.current,
            min: self.min_batch_size,
            utilization_ratio: sizing.last_utilization,
        }
    }

    /// Fetches the contiguous run starting at `from`, sized by the adaptive
    /// controller and clipped to `tip`. Retries with halving on failures
    /// attributable to response size; surfaces a fatal error once retries at
    /// the minimum batch size are exhausted.
    pub async fn fetch_next_range(&self, from: u64, tip: u64) -> Result<Vec<StoredBlock>, FetchError> {
        let mut attempt = 0u32;
        let mut delay = INITIAL_BACKOFF;
        loop {
            let current = self.current_batch_size();
            let to = tip.min(from + current - 1);
            let numbers: Vec<u64> = (from..=to).collect();
            match self.get_blocks_with_receipts(&numbers).await {
                Ok(blocks) => {
                    self.record_success();
                    return Ok(blocks);
                }
                Err(err) => {
                    let should_halve = err.is_size_related() || err.is_sub_request_error();
                    if should_halve && current > self.min_batch_size {
                        let halved = self.halve_batch_size();
                        tracing::warn!(
                            error = %err,
                            batch_size = halved,
                            "fetch failed, halving batch size and retrying the range"
                        );
                        continue;
                    }
                    attempt += 1;
                    if attempt > self.max_retries {
                        return Err(FetchError::Exhausted {
                            from,
                            to,
                            source: Box::new(err),
                        });
                    }
                    tracing::warn!(error = %err, attempt, ?delay, "fetch failed, retrying");
                    sleep(delay).await;
                    delay = (delay * 2).min(MAX_BACKOFF);
                }
            }
        }
    }

    /// Retrieves the given blocks with all receipts (and traces when debug
    /// is enabled) and reassembles them into [`StoredBlock`]s, in the same
    /// order as `numbers`.
    pub async fn get_blocks_with_receipts(
        &self,
        numbers: &[u64],
    ) -> Result<Vec<StoredBlock>, FetchError> {
        if numbers.is_empty() {
            return Ok(vec![]);
        }
        let mut bytes_total = 0usize;

        let mut requests: Vec<RpcRequest> = numbers
            .iter()
            .map(|n| RpcRequest::new("eth_getBlockByNumber", json!([format!("{n:#x}"), true])))
            .collect();
        if self.rpc_supports_debug {
            requests.extend(numbers.iter().map(|n| {
                RpcRequest::new(
                    "debug_traceBlockByNumber",
                    json!([format!("{n:#x}"), {"tracer": "callTracer"}]),
                )
            }));
        }

        let response = self.client.batch(requests).await?;
        bytes_total += response.bytes_received;
        let mut results = response.results.into_iter();

        let mut blocks = Vec::with_capacity(numbers.len());
        for number in numbers {
            let value = results
                .next()
                .ok_or_else(|| FetchError::Malformed("short batch response".into()))??;
            if value.is_null() {
                return Err(FetchError::BlockUnavailable(*number));
            }
            let block: Block = serde_json::from_value(value)
                .map_err(|e| FetchError::Malformed(format!("block {number}: {e}")))?;
            blocks.push(block);
        }

        let mut traces_by_block = None;
        if self.rpc_supports_debug {
            let mut all = Vec::with_capacity(numbers.len());
            for number in numbers {
                let value = results
                    .next()
                    .ok_or_else(|| FetchError::Malformed("short batch response".into()))??;
                let traces: Vec<TxTrace> = serde_json::from_value(value)
                    .map_err(|e| FetchError::Malformed(format!("traces of block {number}: {e}")))?;
                all.push(traces);
            }
            traces_by_block = Some(all);
        }

        let receipts_by_block = self.fetch_receipts(&blocks, &mut bytes_total).await?;

        let mut assembled = Vec::with_capacity(blocks.len());
        for (idx, (block, receipts)) in blocks.into_iter().zip(receipts_by_block).enumerate() {
            let txs = block.transactions.as_deref().unwrap_or(&[]);
            if receipts.len() != txs.len()
                || txs.iter().any(|tx| !receipts.contains_key(&tx.hash))
            {
                return Err(FetchError::ReceiptMismatch(block.number));
            }

            let traces = match &traces_by_block {
                Some(all) => {
                    let traces = &all[idx];
                    let hashes: HashSet<&str> =
                        traces.iter().map(|t| t.tx_hash.as_str()).collect();
                    if traces.len() != txs.len()
                        || hashes.len() != txs.len()
                        || txs.iter().any(|tx| !hashes.contains(tx.hash.as_str()))
                    {
                        return Err(FetchError::TraceMismatch(block.number));
                    }
                    Some(traces.clone())
                }
                None => None,
            };

            assembled.push(StoredBlock {
                block,
                receipts,
                traces,
            });
        }

        let mut sizing = self.sizing.lock().expect("sizing lock poisoned");
        sizing.last_utilization = bytes_total as f64 / RESPONSE_BYTES_CAP;

        Ok(assembled)
    }

    async fn fetch_receipts(
        &self,
        blocks: &[Block],
        bytes_total: &mut usize,
    ) -> Result<Vec<HashMap<String, Receipt>>, FetchError> {
        if self.block_receipts_support.load(Ordering::Relaxed) != 0 {
            match self.fetch_block_receipts(blocks, bytes_total).await {
                Ok(receipts) => {
                    self.block_receipts_support.store(1, Ordering::Relaxed);
                    return Ok(receipts);
                }
                Err(FetchError::Rpc(RpcClientError::Rpc { code, .. }))
                    if code == METHOD_NOT_FOUND
                        && self.block_receipts_support.load(Ordering::Relaxed) == -1 =>
                {
                    tracing::info!("eth_getBlockReceipts unsupported, falling back to per-tx receipts");
                    self.block_receipts_support.store(0, Ordering::Relaxed);
                }
                Err(err) => return Err(err),
            }
        }
        self.fetch_tx_receipts(blocks, bytes_total).await
    }

    /// One `eth_getBlockReceipts` per block: halves the receipt round-trips.
    async fn fetch_block_receipts(
        &self,
        blocks: &[Block],
        bytes_total: &mut usize,
    ) -> Result<Vec<HashMap<String, Receipt>>, FetchError> {
        let requests = blocks
            .iter()
            .map(|block| {
                RpcRequest::new(
                    "eth_getBlockReceipts",
                    json!([format!("{:#x}", block.number)]),
                )
            })
            .collect();
        let response = self.client.batch(requests).await?;
        *bytes_total += response.bytes_received;

        let mut by_block = Vec::with_capacity(blocks.len());
        for (block, result) in blocks.iter().zip(response.results) {
            let receipts: Vec<Receipt> = serde_json::from_value(result?).map_err(|e| {
                FetchError::Malformed(format!("receipts of block {}: {e}", block.number))
            })?;
            by_block.push(
                receipts
                    .into_iter()
                    .map(|r| (r.transaction_hash.clone(), r))
                    .collect(),
            );
        }
        Ok(by_block)
    }

    /// Fallback: one `eth_getTransactionReceipt` per tx, issued as a second
    /// batch once tx hashes are known.
    async fn fetch_tx_receipts(
        &self,
        blocks: &[Block],
        bytes_total: &mut usize,
    ) -> Result<Vec<HashMap<String, Receipt>>, FetchError> {
        let mut requests = Vec::new();
        for block in blocks {
            for tx in block.transactions.as_deref().unwrap_or(&[]) {
                requests.push(RpcRequest::new(
                    "eth_getTransactionReceipt",
                    json!([tx.hash]),
                ));
            }
        }

        let response = self.client.batch(requests).await?;
        *bytes_total += response.bytes_received;
        let mut results = response.results.into_iter();

        let mut by_block = Vec::with_capacity(blocks.len());
        for block in blocks {
            let mut receipts = HashMap::new();
            for tx in block.transactions.as_deref().unwrap_or(&[]) {
                let value = results
                    .next()
                    .ok_or_else(|| FetchError::Malformed("short batch response".into()))??;
                if value.is_null() {
                    return Err(FetchError::ReceiptMismatch(block.number));
                }
                let receipt: Receipt = serde_json::from_value(value).map_err(|e| {
                    FetchError::Malformed(format!("receipt of tx {}: {e}", tx.hash))
                })?;
                receipts.insert(receipt.transaction_hash.clone(), receipt);
            }
            by_block.push(receipts);
        }
        Ok(by_block)
    }

    fn current_batch_size(&self) -> u64 {
        self.sizing
            .lock()
            .expect("sizing lock poisoned")
            .current
            .clamp(self.min_batch_size, self.initial_batch_size)
    }

    fn halve_batch_size(&self) -> u64 {
        let mut sizing = self.sizing.lock().expect("sizing lock poisoned");
        sizing.current = (sizing.current / 2).max(self.min_batch_size);
        sizing.current
    }

    fn record_success(&self) {
        let mut sizing = self.sizing.lock().expect("sizing lock poisoned");
        if self.enable_growth
            && sizing.last_utilization < GROWTH_UTILIZATION_THRESHOLD
            && sizing.current < self.initial_batch_size
        {
            sizing.current = (sizing.current * 2).min(self.initial_batch_size);
        }
    }
}
