//! A JSON-RPC endpoint on top of wiremock: parses batched requests and
//! answers each sub-request through a handler closure, like a real node
//! would.

use std::{sync::Arc, time::Duration};

use serde_json::{json, Value};
use wiremock::{matchers::method, Mock, MockServer, Request, Respond, ResponseTemplate};

use crate::{settings::RpcSettings, store::tests::TEST_CHAIN_ID, types::StoredBlock};

pub(crate) type RpcResult = Result<Value, (i64, String)>;

pub(crate) struct MockRpc {
    pub handler: Box<dyn Fn(&str, &Value) -> RpcResult + Send + Sync>,
    /// When set, POSTs carrying more sub-requests than this fail each of
    /// them with a "response too large" error, like size-capped endpoints.
    pub max_subrequests: Option<usize>,
}

impl Respond for MockRpc {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let requests: Vec<Value> =
            serde_json::from_slice(&request.body).expect("json-rpc request body");
        let oversized = self
            .max_subrequests
            .map(|max| requests.len() > max)
            .unwrap_or(false);

        let mut responses: Vec<Value> = requests
            .iter()
            .map(|req| {
                let id = req["id"].clone();
                if oversized {
                    return json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": {"code": -32000, "message": "response too large"},
                    });
                }
                let method = req["method"].as_str().unwrap_or_default();
                match (self.handler)(method, &req["params"]) {
                    Ok(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
                    Err((code, message)) => json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": {"code": code, "message": message},
                    }),
                }
            })
            .collect();
        // servers are free to reorder batch responses; always exercise the
        // id-matching path
        responses.reverse();
        ResponseTemplate::new(200).set_body_json(responses)
    }
}

pub(crate) async fn mock_rpc<F>(handler: F) -> MockServer
where
    F: Fn(&str, &Value) -> RpcResult + Send + Sync + 'static,
{
    mock_rpc_with_cap(handler, None).await
}

pub(crate) async fn mock_rpc_with_cap<F>(handler: F, max_subrequests: Option<usize>) -> MockServer
where
    F: Fn(&str, &Value) -> RpcResult + Send + Sync + 'static,
{
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(MockRpc {
            handler: Box::new(handler),
            max_subrequests,
        })
        .mount(&server)
        .await;
    server
}

pub(crate) fn rpc_settings(server: &MockServer) -> RpcSettings {
    RpcSettings {
        rpc_url: server.uri().parse().expect("mock server uri"),
        request_batch_size: 50,
        max_concurrent_requests: 4,
        rps: 10_000,
        rpc_supports_debug: false,
        blocks_per_batch: 10,
        enable_batch_size_growth: false,
        min_blocks_per_batch: 1,
        request_timeout: Duration::from_secs(5),
        max_retries: 2,
    }
}

/// Serves a fixed chain of [`StoredBlock`]s over the eth/debug namespaces.
pub(crate) fn chain_handler(
    chain: Arc<Vec<StoredBlock>>,
    block_receipts: bool,
) -> impl Fn(&str, &Value) -> RpcResult {
    move |method, params| match method {
        "eth_chainId" => Ok(json!(format!("{TEST_CHAIN_ID:#x}"))),
        "eth_blockNumber" => Ok(json!(format!("{:#x}", chain.len().saturating_sub(1)))),
        "eth_getBlockByNumber" => {
            let number = parse_block_number(params)?;
            Ok(chain
                .get(number)
                .map(|b| serde_json::to_value(&b.block).expect("block json"))
                .unwrap_or(Value::Null))
        }
        "eth_getBlockReceipts" => {
            if !block_receipts {
                return Err((
                    -32601,
                    "the method eth_getBlockReceipts does not exist".into(),
                ));
            }
            let number = parse_block_number(params)?;
            let Some(block) = chain.get(number) else {
                return Ok(Value::Null);
            };
            let receipts: Vec<Value> = block
                .block
                .transactions
                .as_deref()
                .unwrap_or(&[])
                .iter()
                .map(|tx| serde_json::to_value(&block.receipts[&tx.hash]).expect("receipt json"))
                .collect();
            Ok(json!(receipts))
        }
        "eth_getTransactionReceipt" => {
            let hash = params[0].as_str().unwrap_or_default();
            for block in chain.iter() {
                if let Some(receipt) = block.receipts.get(hash) {
                    return Ok(serde_json::to_value(receipt).expect("receipt json"));
                }
            }
            Ok(Value::Null)
        }
        "debug_traceBlockByNumber" => {
            let number = parse_block_number(params)?;
            let traces = chain
                .get(number)
                .and_then(|b| b.traces.clone())
                .unwrap_or_default();
            Ok(serde_json::to_value(traces).expect("traces json"))
        }
        "eth_call" => Err((-32000, "execution reverted".into())),
        _ => Err((-32601, format!("the method {method} does not exist"))),
    }
}

fn parse_block_number(params: &Value) -> Result<usize, (i64, String)> {
    let hex = params[0]
        .as_str()
        .ok_or((-32602, "invalid params".to_owned()))?;
    crate::types::parse_hex_u64(hex)
        .map(|n| n as usize)
        .map_err(|e| (-32602, e.to_string()))
}
