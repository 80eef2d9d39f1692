use booking_service::{config::BookingConfig, services::init_metrics, startup::Application};
use service_core::observability::init_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = BookingConfig::load()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );
    init_metrics();

    let application = Application::build(config).await?;
    application.run_until_stopped().await?;

    Ok(())
}
