use pretty_assertions::assert_eq;
use tempfile::TempDir;

use super::{open_store, simple_chain, stored_block, stored_block_traced, TxSpec, TRANSFER_TOPIC};
use crate::store::{
    repository::dictionaries::{self, TxDictKind},
    BlockId,
};

/// 25 blocks x 5 txs: one full tx batch (batch size 100 in tests) plus a
/// tail that must stay untouched.
fn chain_with_full_tx_batch() -> Vec<Vec<TxSpec>> {
    (0..25u64)
        .map(|block| {
            (0..5)
                .map(|tx| {
                    if (block + tx) % 3 == 0 {
                        TxSpec::with_topic(TRANSFER_TOPIC)
                    } else {
                        TxSpec::simple()
                    }
                })
                .collect()
        })
        .collect()
}

#[tokio::test]
async fn maintenance_skips_incomplete_batches() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, false).await;
    store.store_blocks(simple_chain(&[10, 10, 10])).await.unwrap();

    assert!(!store.perform_compression_maintenance().await.unwrap());
    assert!(dictionaries::get_tx_dict(store.db(), 0, TxDictKind::Data)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn tx_maintenance_preserves_decoded_values() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, false).await;

    let batch: Vec<_> = chain_with_full_tx_batch()
        .into_iter()
        .enumerate()
        .map(|(number, specs)| stored_block(number as u64, specs))
        .collect();
    store.store_blocks(batch).await.unwrap();
    assert_eq!(store.get_tx_count().await.unwrap(), 125);

    let before = store.get_tx_batch(-1, 1000, false, None).await.unwrap();
    let filtered_before = store
        .get_tx_batch(-1, 1000, false, Some(&[TRANSFER_TOPIC.to_owned()]))
        .await
        .unwrap();

    assert!(store.perform_compression_maintenance().await.unwrap());
    assert!(dictionaries::get_tx_dict(store.db(), 0, TxDictKind::Data)
        .await
        .unwrap()
        .is_some());
    // no traces in this store, so no traces dictionary
    assert!(dictionaries::get_tx_dict(store.db(), 0, TxDictKind::Traces)
        .await
        .unwrap()
        .is_none());

    let after = store.get_tx_batch(-1, 1000, false, None).await.unwrap();
    assert_eq!(before, after);
    let filtered_after = store
        .get_tx_batch(-1, 1000, false, Some(&[TRANSFER_TOPIC.to_owned()]))
        .await
        .unwrap();
    assert_eq!(filtered_before, filtered_after);

    // only one full batch exists; the next step has nothing to do
    assert!(!store.perform_compression_maintenance().await.unwrap());
}

#[tokio::test]
async fn tx_maintenance_trains_trace_dictionaries_on_debug_stores() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, true).await;

    let batch: Vec<_> = chain_with_full_tx_batch()
        .into_iter()
        .enumerate()
        .map(|(number, specs)| stored_block_traced(number as u64, specs))
        .collect();
    store.store_blocks(batch).await.unwrap();

    let before = store.get_tx_batch(-1, 1000, true, None).await.unwrap();
    assert!(before.traces.is_some());

    assert!(store.perform_compression_maintenance().await.unwrap());
    assert!(dictionaries::get_tx_dict(store.db(), 0, TxDictKind::Traces)
        .await
        .unwrap()
        .is_some());

    let after = store.get_tx_batch(-1, 1000, true, None).await.unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn block_maintenance_preserves_decoded_blocks() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, false).await;

    // exactly one full block batch (batch size 100 in tests)
    let counts = vec![1usize; 100];
    store.store_blocks(simple_chain(&counts)).await.unwrap();

    let before = store
        .slow_get_block_with_transactions(BlockId::Number(57))
        .await
        .unwrap();

    assert!(store.perform_block_compression_maintenance().await.unwrap());
    assert!(dictionaries::get_block_dict(store.db(), 0)
        .await
        .unwrap()
        .is_some());

    let after = store
        .slow_get_block_with_transactions(BlockId::Number(57))
        .await
        .unwrap();
    assert_eq!(before, after);

    // 100 blocks stored, next batch needs block 199
    assert!(!store.perform_block_compression_maintenance().await.unwrap());
}

#[tokio::test]
async fn maintenance_runs_batches_in_order() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, false).await;

    // two full tx batches
    let counts = vec![4usize; 50];
    store.store_blocks(simple_chain(&counts)).await.unwrap();
    assert_eq!(store.get_tx_count().await.unwrap(), 200);

    assert!(store.perform_compression_maintenance().await.unwrap());
    assert!(store.perform_compression_maintenance().await.unwrap());
    assert!(!store.perform_compression_maintenance().await.unwrap());

    assert!(dictionaries::get_tx_dict(store.db(), 1, TxDictKind::Data)
        .await
        .unwrap()
        .is_some());

    let all = store.get_tx_batch(-1, 1000, false, None).await.unwrap();
    assert_eq!(all.txs.len(), 200);
    for (idx, tx) in all.txs.iter().enumerate() {
        assert_eq!(tx.tx_num, idx as u64 + 1);
    }
}
