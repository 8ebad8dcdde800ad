//! Batched JSON-RPC transport with bounded concurrency and a steady-state
//! sub-request-per-second cap.
//!
//! Every HTTP POST carries an array of 1..=`request_batch_size` sub-requests.
//! Sub-requests get client-assigned integer ids and responses are matched
//! back by id, so server reordering is harmless. A whole-POST failure
//! (transport, non-2xx, malformed body, missing id) is retried with
//! exponential backoff; per-sub-request error objects are surfaced verbatim
//! and never retried here.

use std::{
    collections::HashMap,
    num::NonZeroU32,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::{sync::Semaphore, time::sleep};
use url::Url;

use crate::settings::RpcSettings;

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum RpcClientError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("http status {0}")]
    Http(StatusCode),
    #[error("malformed json-rpc response: {0}")]
    Malformed(String),
    #[error("missing response for request id {0}")]
    MissingId(u64),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
}

impl RpcClientError {
    /// Whole-POST failures are worth another attempt; server-side error
    /// objects are not.
    fn is_retryable(&self) -> bool {
        !matches!(self, RpcClientError::Rpc { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RpcClientError::Transport(e) if e.is_timeout())
    }
}

/// One logical sub-request.
#[derive(Debug, Clone)]
pub struct RpcRequest {
    pub method: String,
    pub params: Value,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug)]
pub struct RpcBatchResponse {
    /// Aligned with the input request order.
    pub results: Vec<Result<Value, RpcClientError>>,
    pub bytes_received: usize,
}

#[derive(Serialize)]
struct WireRequest {
    jsonrpc: &'static str,
    id: u64,
    method: String,
    params: Value,
}

#[derive(Deserialize)]
struct WireResponse {
    id: u64,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<WireError>,
}

#[derive(Deserialize)]
struct WireError {
    code: i64,
    message: String,
}

pub struct RpcClient {
    http: reqwest::Client,
    url: Url,
    request_batch_size: usize,
    max_retries: u32,
    rps: u32,
    limiter: DefaultDirectRateLimiter,
    in_flight: Semaphore,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(settings: &RpcSettings) -> Result<Self, RpcClientError> {
        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()?;
        let rps = NonZeroU32::new(settings.rps).unwrap_or(NonZeroU32::MIN);
        Ok(Self {
            http,
            url: settings.rpc_url.clone(),
            request_batch_size: settings.request_batch_size.max(1) as usize,
            max_retries: settings.max_retries,
            rps: rps.get(),
            limiter: RateLimiter::direct(Quota::per_second(rps)),
            in_flight: Semaphore::new(settings.max_concurrent_requests.max(1) as usize),
            next_id: AtomicU64::new(1),
        })
    }

    /// Single logical request.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, RpcClientError> {
        let mut response = self.batch(vec![RpcRequest::new(method, params)]).await?;
        response
            .results
            .pop()
            .ok_or_else(|| RpcClientError::Malformed("empty batch response".into()))?
    }

    /// Executes all sub-requests, splitting them into POSTs of at most
    /// `request_batch_size`, with at most `max_concurrent_requests` POSTs in
    /// flight.
    pub async fn batch(&self, requests: Vec<RpcRequest>) -> Result<RpcBatchResponse, RpcClientError> {
        if requests.is_empty() {
            return Ok(RpcBatchResponse {
                results: vec![],
                bytes_received: 0,
            });
        }

        let wired: Vec<WireRequest> = requests
            .into_iter()
            .map(|req| WireRequest {
                jsonrpc: "2.0",
                id: self.next_id.fetch_add(1, Ordering::Relaxed),
                method: req.method,
                params: req.params,
            })
            .collect();

        let posts = wired
            .chunks(self.request_batch_size)
            .map(|chunk| self.post_with_retries(chunk));
        let outcomes = futures::future::try_join_all(posts).await?;

        let mut results = Vec::with_capacity(wired.len());
        let mut bytes_received = 0;
        for (chunk_results, chunk_bytes) in outcomes {
            results.extend(chunk_results);
            bytes_received += chunk_bytes;
        }
        Ok(RpcBatchResponse {
            results,
            bytes_received,
        })
    }

    async fn post_with_retries(
        &self,
        chunk: &[WireRequest],
    ) -> Result<(Vec<Result<Value, RpcClientError>>, usize), RpcClientError> {
        let mut delay = INITIAL_BACKOFF;
        let mut attempt = 0;
        loop {
            match self.post_once(chunk).await {
                Ok(outcome) => return Ok(outcome),
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(error = %err, attempt, "rpc post failed, retrying");
                    sleep(delay).await;
                    delay = (delay * 2).min(MAX_BACKOFF);
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn post_once(
        &self,
        chunk: &[WireRequest],
    ) -> Result<(Vec<Result<Value, RpcClientError>>, usize), RpcClientError> {
        let _permit = self
            .in_flight
            .acquire()
            .await
            .expect("request semaphore is never closed");
        self.throttle(chunk.len() as u32).await;

        let response = self.http.post(self.url.clone()).json(&chunk).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RpcClientError::Http(status));
        }
        let body = response.bytes().await?;
        let bytes_received = body.len();

        let parsed: Vec<WireResponse> = serde_json::from_slice(&body)
            .map_err(|e| RpcClientError::Malformed(e.to_string()))?;
        let mut by_id: HashMap<u64, WireResponse> =
            parsed.into_iter().map(|resp| (resp.id, resp)).collect();

        for req in chunk {
            if !by_id.contains_key(&req.id) {
                return Err(RpcClientError::MissingId(req.id));
            }
        }

        let results = chunk
            .iter()
            .map(|req| {
                let resp = by_id
                    .remove(&req.id)
                    .expect("presence checked above");
                match resp.error {
                    Some(err) => Err(RpcClientError::Rpc {
                        code: err.code,
                        message: err.message,
                    }),
                    None => Ok(resp.result.unwrap_or(Value::Null)),
                }
            })
            .collect();
        Ok((results, bytes_received))
    }

    /// Spends `n` tokens against the rolling one-second window, in slices no
    /// larger than the burst capacity.
    async fn throttle(&self, mut remaining: u32) {
        while remaining > 0 {
            let take = remaining.min(self.rps);
            if let Some(n) = NonZeroU32::new(take) {
                let _ = self.limiter.until_n_ready(n).await;
            }
            remaining -= take;
        }
    }
}
