pub mod blocks;
pub mod catalog;
pub mod dictionaries;
pub mod topics;
pub mod txs;
