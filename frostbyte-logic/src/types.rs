//! Wire and storage types for EVM blocks, transactions, receipts and traces.
//!
//! Fields the core actually inspects are typed; everything else the RPC
//! echoes is preserved through `#[serde(flatten)]` maps so that payloads
//! survive round-trips to the store unchanged.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub fn parse_hex_u64(s: &str) -> Result<u64, std::num::ParseIntError> {
    let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    u64::from_str_radix(digits, 16)
}

/// Serde adapter for `u64` quantities encoded as `0x`-prefixed hex strings.
pub mod hex_u64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{value:#x}"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::parse_hex_u64(&s).map_err(serde::de::Error::custom)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    #[serde(with = "hex_u64")]
    pub number: u64,
    pub hash: String,
    pub parent_hash: String,
    #[serde(with = "hex_u64")]
    pub timestamp: u64,
    #[serde(with = "hex_u64")]
    pub gas_used: u64,
    #[serde(with = "hex_u64")]
    pub gas_limit: u64,
    /// Full transaction objects, present when fetched with `fullTx = true`.
    /// Stripped before the block payload is persisted; repopulated by
    /// `slow_get_block_with_transactions`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transactions: Option<Vec<Transaction>>,
    /// Recomputable, never persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs_bloom: Option<String>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub hash: String,
    pub from: String,
    /// `None` for contract-creation transactions.
    #[serde(default)]
    pub to: Option<String>,
    pub value: String,
    pub gas: String,
    pub input: String,
    pub nonce: String,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub transaction_hash: String,
    #[serde(default)]
    pub status: Option<String>,
    pub gas_used: String,
    pub logs: Vec<Log>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_gas_price: Option<String>,
    #[serde(default)]
    pub contract_address: Option<String>,
    /// Recomputable, never persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs_bloom: Option<String>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Log {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CallType {
    Call,
    DelegateCall,
    StaticCall,
    CallCode,
    Create,
    Create2,
    Create3,
    SelfDestruct,
    Suicide,
    Reward,
}

impl CallType {
    pub fn is_create(&self) -> bool {
        matches!(self, CallType::Create | CallType::Create2 | CallType::Create3)
    }
}

/// One node of a `callTracer` call tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFrame {
    #[serde(rename = "type")]
    pub call_type: CallType,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_used: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub calls: Vec<CallFrame>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl CallFrame {
    /// Walks the call tree with an explicit stack; trees from tracers can be
    /// deep enough to overflow a recursive walk.
    pub fn contains_create(&self) -> bool {
        let mut stack = vec![self];
        while let Some(frame) = stack.pop() {
            if frame.call_type.is_create() {
                return true;
            }
            stack.extend(frame.calls.iter());
        }
        false
    }
}

/// `debug_traceBlockByNumber` result entry: one top-level trace per tx.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxTrace {
    pub tx_hash: String,
    pub result: CallFrame,
}

/// A fully assembled unit of ingestion: a block, all its receipts and,
/// when the endpoint supports the debug namespace, its call traces.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredBlock {
    pub block: Block,
    pub receipts: HashMap<String, Receipt>,
    pub traces: Option<Vec<TxTrace>>,
}

/// The streaming unit handed to indexers. `tx_num` is assigned by the store
/// and restored from the row key at decode time; the persisted payload is
/// just `{tx, receipt, blockTimestamp}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredTx {
    #[serde(skip, default)]
    pub tx_num: u64,
    pub tx: Transaction,
    pub receipt: Receipt,
    pub block_timestamp: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TxBatch {
    pub txs: Vec<StoredTx>,
    /// Aligned with `txs` when traces were requested and the store has them.
    pub traces: Option<Vec<Option<CallFrame>>>,
    /// Current total tx count; lets callers detect "no more data" cheaply.
    pub max_tx_num: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_u64_round_trip() {
        assert_eq!(parse_hex_u64("0x10").unwrap(), 16);
        assert_eq!(parse_hex_u64("0x0").unwrap(), 0);
        assert_eq!(parse_hex_u64("ff").unwrap(), 255);
        assert!(parse_hex_u64("0xzz").is_err());
    }

    #[test]
    fn block_preserves_unknown_fields() {
        let raw = serde_json::json!({
            "number": "0x2a",
            "hash": "0xaa",
            "parentHash": "0xbb",
            "timestamp": "0x5f5e100",
            "gasUsed": "0x5208",
            "gasLimit": "0x1c9c380",
            "stateRoot": "0xcc",
            "extraData": "0x",
        });
        let block: Block = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(block.number, 42);
        assert_eq!(block.other["stateRoot"], "0xcc");
        let back = serde_json::to_value(&block).unwrap();
        assert_eq!(back, raw);
    }

    #[test]
    fn call_frame_create_detection() {
        let raw = serde_json::json!({
            "type": "CALL",
            "from": "0x1",
            "to": "0x2",
            "calls": [
                {"type": "STATICCALL", "from": "0x2", "to": "0x3"},
                {"type": "CALL", "from": "0x2", "to": "0x4", "calls": [
                    {"type": "CREATE2", "from": "0x4"}
                ]}
            ]
        });
        let frame: CallFrame = serde_json::from_value(raw).unwrap();
        assert!(frame.contains_create());

        let flat = serde_json::json!({"type": "DELEGATECALL", "from": "0x1"});
        let frame: CallFrame = serde_json::from_value(flat).unwrap();
        assert!(!frame.contains_create());
    }
}
