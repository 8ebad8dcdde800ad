use std::{collections::HashMap, time::Duration};

use serde_json::Map;
use tempfile::TempDir;

use crate::{
    settings::CompressionSettings,
    store::BlocksStore,
    types::{Block, CallFrame, CallType, Log, Receipt, StoredBlock, Transaction, TxTrace},
};

mod compression_maintenance;

/// keccak("Transfer(address,address,uint256)") — the ERC-20 Transfer event.
pub(crate) const TRANSFER_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

pub(crate) const TEST_CHAIN_ID: u64 = 43114;

/// Small batches so dictionary training is exercised without storing 100k
/// records per test.
pub(crate) fn test_compression() -> CompressionSettings {
    CompressionSettings {
        batch_size: 100,
        level: 1,
        dict_level: 19,
        max_dict_size: 4096,
        dict_sample_every: 1,
        dict_cache_ttl: Duration::from_secs(60),
    }
}

pub(crate) async fn open_store(dir: &TempDir, has_debug: bool) -> BlocksStore {
    BlocksStore::open(dir.path(), TEST_CHAIN_ID, has_debug, test_compression())
        .await
        .expect("store opens")
}

pub(crate) fn block_hash(number: u64) -> String {
    let seed = number.wrapping_mul(0xff51_afd7_ed55_8ccd) | 1;
    format!("0x{seed:016x}{number:048x}")
}

pub(crate) fn tx_hash(block: u64, index: u64) -> String {
    let seed = ((block << 16) | index).wrapping_mul(0x9e37_79b9_7f4a_7c15) | 1;
    format!("0x{seed:016x}{:048x}", (block << 16) | index)
}

pub(crate) fn call_frame(call_type: CallType) -> CallFrame {
    CallFrame {
        call_type,
        from: Some("0x0000000000000000000000000000000000000001".into()),
        to: Some("0x0000000000000000000000000000000000000002".into()),
        value: Some("0x0".into()),
        gas: Some("0x5208".into()),
        gas_used: Some("0x5208".into()),
        input: Some("0x".into()),
        calls: vec![],
        other: Map::new(),
    }
}

/// Shape of one test transaction inside [`stored_block`].
pub(crate) struct TxSpec {
    pub to: Option<String>,
    pub hash: Option<String>,
    pub logs: Vec<Log>,
    pub trace: Option<CallFrame>,
}

impl TxSpec {
    pub fn simple() -> Self {
        Self {
            to: Some("0x00000000000000000000000000000000000000aa".into()),
            hash: None,
            logs: vec![],
            trace: None,
        }
    }

    pub fn with_topic(topic: &str) -> Self {
        let mut spec = Self::simple();
        spec.logs.push(Log {
            address: "0x00000000000000000000000000000000000000bb".into(),
            topics: vec![topic.to_owned()],
            data: "0x".into(),
            other: Map::new(),
        });
        spec
    }

    pub fn creation() -> Self {
        let mut spec = Self::simple();
        spec.to = None;
        spec
    }

    pub fn with_hash(mut self, hash: &str) -> Self {
        self.hash = Some(hash.to_owned());
        self
    }

    pub fn with_trace(mut self, trace: CallFrame) -> Self {
        self.trace = Some(trace);
        self
    }
}

fn build(number: u64, specs: Vec<TxSpec>, traced: bool) -> StoredBlock {
    let mut txs = Vec::with_capacity(specs.len());
    let mut receipts = HashMap::new();
    let mut traces = traced.then(Vec::new);

    for (index, spec) in specs.into_iter().enumerate() {
        let hash = spec
            .hash
            .unwrap_or_else(|| tx_hash(number, index as u64));
        let tx = Transaction {
            hash: hash.clone(),
            from: "0x0000000000000000000000000000000000000001".into(),
            to: spec.to.clone(),
            value: "0x0".into(),
            gas: "0x5208".into(),
            input: "0x".into(),
            nonce: format!("{index:#x}"),
            other: Map::new(),
        };
        let receipt = Receipt {
            transaction_hash: hash.clone(),
            status: Some("0x1".into()),
            gas_used: "0x5208".into(),
            logs: spec.logs,
            effective_gas_price: Some("0x1".into()),
            contract_address: spec
                .to
                .is_none()
                .then(|| "0x00000000000000000000000000000000000000cc".into()),
            logs_bloom: Some("0x0".into()),
            other: Map::new(),
        };
        receipts.insert(hash.clone(), receipt);
        if let Some(traces) = traces.as_mut() {
            traces.push(TxTrace {
                tx_hash: hash,
                result: spec.trace.unwrap_or_else(|| call_frame(CallType::Call)),
            });
        }
        txs.push(tx);
    }

    let block = Block {
        number,
        hash: block_hash(number),
        parent_hash: if number == 0 {
            format!("0x{:064x}", 0)
        } else {
            block_hash(number - 1)
        },
        timestamp: 1_700_000_000 + number,
        gas_used: 21_000 * txs.len() as u64,
        gas_limit: 30_000_000,
        transactions: Some(txs),
        logs_bloom: Some("0x0".into()),
        other: Map::new(),
    };

    StoredBlock {
        block,
        receipts,
        traces,
    }
}

pub(crate) fn stored_block(number: u64, specs: Vec<TxSpec>) -> StoredBlock {
    build(number, specs, false)
}

pub(crate) fn stored_block_traced(number: u64, specs: Vec<TxSpec>) -> StoredBlock {
    build(number, specs, true)
}

/// Blocks 0..n where block i carries `tx_counts[i]` plain txs.
pub(crate) fn simple_chain(tx_counts: &[usize]) -> Vec<StoredBlock> {
    tx_counts
        .iter()
        .enumerate()
        .map(|(number, count)| {
            stored_block(
                number as u64,
                (0..*count).map(|_| TxSpec::simple()).collect(),
            )
        })
        .collect()
}
