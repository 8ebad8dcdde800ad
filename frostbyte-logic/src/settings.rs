use std::{path::PathBuf, time};

use serde::Deserialize;
use serde_with::serde_as;
use url::Url;

/// Top-level settings for the ingestion process: one entry per chain plus
/// the knobs shared by every worker.
#[serde_as]
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct IndexerSettings {
    /// Filesystem root; each chain gets `data_dir/<blockchain_id>/`.
    pub data_dir: PathBuf,
    pub chains: Vec<ChainSettings>,
    #[serde(default = "default_poll_interval")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub poll_interval: time::Duration,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub compression: CompressionSettings,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ChainSettings {
    pub name: String,
    /// Opaque identifier used for the on-disk directory name.
    pub blockchain_id: String,
    pub evm_chain_id: u64,
    pub rpc: RpcSettings,
}

#[serde_as]
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RpcSettings {
    pub rpc_url: Url,
    /// Max sub-requests per HTTP POST.
    #[serde(default = "default_request_batch_size")]
    pub request_batch_size: u32,
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: u32,
    /// Sub-requests per rolling second.
    #[serde(default = "default_rps")]
    pub rps: u32,
    #[serde(default)]
    pub rpc_supports_debug: bool,
    /// Initial (and ceiling) blocks per fetch batch.
    #[serde(default = "default_blocks_per_batch")]
    pub blocks_per_batch: u64,
    #[serde(default)]
    pub enable_batch_size_growth: bool,
    #[serde(default = "default_min_blocks_per_batch")]
    pub min_blocks_per_batch: u64,
    #[serde(default = "default_request_timeout")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub request_timeout: time::Duration,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

#[serde_as]
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SchedulerSettings {
    /// Tx rows requested per `get_tx_batch` call.
    #[serde(default = "default_scheduler_batch_size")]
    pub batch_size: u64,
    #[serde(default = "default_poll_interval")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub poll_interval: time::Duration,
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
}

#[serde_as]
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CompressionSettings {
    /// Records per dictionary-training batch.
    #[serde(default = "default_compression_batch_size")]
    pub batch_size: u64,
    /// Online compression level for freshly stored payloads.
    #[serde(default = "default_level")]
    pub level: i32,
    /// Level used when a batch is re-compressed with a trained dictionary.
    #[serde(default = "default_dict_level")]
    pub dict_level: i32,
    #[serde(default = "default_max_dict_size")]
    pub max_dict_size: usize,
    /// Sample every Nth record as dictionary-training input.
    #[serde(default = "default_dict_sample_every")]
    pub dict_sample_every: u64,
    #[serde(default = "default_dict_cache_ttl")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub dict_cache_ttl: time::Duration,
}

fn default_poll_interval() -> time::Duration {
    time::Duration::from_secs(1)
}

fn default_request_batch_size() -> u32 {
    100
}

fn default_max_concurrent_requests() -> u32 {
    4
}

fn default_rps() -> u32 {
    50
}

fn default_blocks_per_batch() -> u64 {
    200
}

fn default_min_blocks_per_batch() -> u64 {
    1
}

fn default_request_timeout() -> time::Duration {
    time::Duration::from_secs(30)
}

fn default_max_retries() -> u32 {
    5
}

fn default_scheduler_batch_size() -> u64 {
    1000
}

fn default_max_consecutive_failures() -> u32 {
    5
}

fn default_compression_batch_size() -> u64 {
    100_000
}

fn default_level() -> i32 {
    1
}

fn default_dict_level() -> i32 {
    19
}

fn default_max_dict_size() -> usize {
    110 * 1024
}

fn default_dict_sample_every() -> u64 {
    1
}

fn default_dict_cache_ttl() -> time::Duration {
    time::Duration::from_secs(60)
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            batch_size: default_scheduler_batch_size(),
            poll_interval: default_poll_interval(),
            max_consecutive_failures: default_max_consecutive_failures(),
        }
    }
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            batch_size: default_compression_batch_size(),
            level: default_level(),
            dict_level: default_dict_level(),
            max_dict_size: default_max_dict_size(),
            dict_sample_every: default_dict_sample_every(),
            dict_cache_ttl: default_dict_cache_ttl(),
        }
    }
}
