mod settings;
mod workers;

pub use settings::Settings;
pub use workers::{run, spawn_indexer};
