use blockscout_service_launcher::{
    launcher::ConfigSettings,
    tracing::{JaegerSettings, TracingSettings},
};
use frostbyte_logic::settings::IndexerSettings;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default)]
    pub tracing: TracingSettings,
    #[serde(default)]
    pub jaeger: JaegerSettings,

    pub indexer: IndexerSettings,
}

impl ConfigSettings for Settings {
    const SERVICE_NAME: &'static str = "FROSTBYTE";
}
