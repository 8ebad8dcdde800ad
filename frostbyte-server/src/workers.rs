//! Spawns one fetch loop per configured chain and waits for shutdown.
//!
//! Workers are tokio tasks sharing one cancellation token: the first worker
//! to fail cancels the rest, so the process exits non-zero and an external
//! supervisor can restart it. Indexer plugins are registered by embedders
//! through [`spawn_indexer`]; the bare server runs the ingestion side only.

use std::{path::PathBuf, sync::Arc};

use frostbyte_logic::{
    fetch_loop::FetchLoop,
    fetcher::BatchFetcher,
    rpc_client::RpcClient,
    scheduler::{IndexerPlugin, IndexerScheduler, LookaheadManager},
    settings::SchedulerSettings,
    store::BlocksStore,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::Settings;

pub async fn run(settings: Settings) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let lookahead = LookaheadManager::new();
    let sampler = lookahead.spawn_sampler(cancel.clone());

    let mut workers = Vec::new();
    for chain in &settings.indexer.chains {
        let chain_dir = settings.indexer.data_dir.join(&chain.blockchain_id);
        let store = Arc::new(
            BlocksStore::open(
                &chain_dir,
                chain.evm_chain_id,
                chain.rpc.rpc_supports_debug,
                settings.indexer.compression.clone(),
            )
            .await?,
        );
        let client = Arc::new(RpcClient::new(&chain.rpc)?);
        let fetcher = Arc::new(BatchFetcher::new(client, &chain.rpc));
        let fetch_loop = FetchLoop::new(
            store,
            fetcher,
            chain.name.clone(),
            chain.evm_chain_id,
            settings.indexer.poll_interval,
            cancel.clone(),
        );

        let cancel_on_exit = cancel.clone();
        workers.push(tokio::spawn(async move {
            let result = fetch_loop.run().await;
            if result.is_err() {
                cancel_on_exit.cancel();
            }
            result
        }));
    }

    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            cancel_on_signal.cancel();
        }
    });

    let mut outcome = Ok(());
    for worker in workers {
        match worker.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                if outcome.is_ok() {
                    outcome = Err(err);
                }
            }
            Err(err) => {
                if outcome.is_ok() {
                    outcome = Err(err.into());
                }
            }
        }
    }
    cancel.cancel();
    let _ = sampler.await;
    outcome
}

/// Spawns a scheduler driving `plugin` over `store`'s tx stream. The caller
/// owns the returned handle; a failed scheduler resolves it with the error
/// after its retry budget is exhausted.
pub fn spawn_indexer<P: IndexerPlugin>(
    plugin: P,
    store: Arc<BlocksStore>,
    chain_dir: PathBuf,
    lookahead: Arc<LookaheadManager>,
    settings: SchedulerSettings,
    cancel: CancellationToken,
) -> JoinHandle<anyhow::Result<()>> {
    tokio::spawn(async move {
        IndexerScheduler::new(plugin, store, chain_dir, lookahead, settings, cancel)
            .run()
            .await
    })
}
