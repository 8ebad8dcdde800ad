pub mod block_dictionaries;
pub mod blocks;
pub mod catalog_blob;
pub mod catalog_int;
pub mod tx_dictionaries;
pub mod tx_topics;
pub mod txs;
