//! Process-wide soft backpressure for indexer schedulers.
//!
//! A single sampler task probes host CPU and memory about once a second and
//! nudges a shared lookahead budget up when the host is healthy, down when
//! it is not. Schedulers read the value before issuing the next fetch and
//! idle while it is zero. Single writer, many readers; a relaxed atomic is
//! all the synchronization this needs.

use std::{
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};

use sysinfo::System;
use tokio_util::sync::CancellationToken;

pub const MAX_LOOKAHEAD: u32 = 10;

const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);
const CPU_HIGH_WATERMARK: f32 = 90.0;
const MEMORY_HIGH_WATERMARK: f64 = 0.90;

pub struct LookaheadManager {
    value: AtomicU32,
}

impl LookaheadManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            value: AtomicU32::new(MAX_LOOKAHEAD),
        })
    }

    pub fn current(&self) -> u32 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn set(&self, value: u32) {
        self.value.store(value.min(MAX_LOOKAHEAD), Ordering::Relaxed);
    }

    fn adjust(&self, healthy: bool) {
        let current = self.current();
        let next = if healthy {
            (current + 1).min(MAX_LOOKAHEAD)
        } else {
            current.saturating_sub(1)
        };
        self.value.store(next, Ordering::Relaxed);
    }

    pub fn spawn_sampler(self: &Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut sys = System::new();
            let mut ticker = tokio::time::interval(SAMPLE_INTERVAL);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                sys.refresh_cpu_usage();
                sys.refresh_memory();
                let cpu = sys.global_cpu_usage();
                let total = sys.total_memory();
                let memory = if total == 0 {
                    0.0
                } else {
                    sys.used_memory() as f64 / total as f64
                };
                manager.adjust(cpu < CPU_HIGH_WATERMARK && memory < MEMORY_HIGH_WATERMARK);
            }
        })
    }
}
