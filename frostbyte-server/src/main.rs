use blockscout_service_launcher::launcher::ConfigSettings;
use frostbyte_server::Settings;

const SERVICE_NAME: &str = "frostbyte";

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let settings = Settings::build().expect("failed to read config");

    blockscout_service_launcher::tracing::init_logs(
        SERVICE_NAME,
        &settings.tracing,
        &settings.jaeger,
    )?;

    frostbyte_server::run(settings).await
}
