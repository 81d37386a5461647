use hxm_monitor::domain::settings::SettingsService;
use hxm_monitor::infrastructure::bluetooth::connection::RfcommConnector;
use hxm_monitor::infrastructure::bluetooth::scanner::SettingsRegistry;
use hxm_monitor::infrastructure::bluetooth::MonitorService;
use hxm_monitor::infrastructure::logging;
use hxm_monitor::presentation::console;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings_service = SettingsService::new()?;
    let settings = settings_service.get().clone();

    let _logging_guard = logging::init_logger(&settings.log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    info!(
        "Starting HxM Monitor (settings: {})",
        settings_service.path().display()
    );

    let registry = SettingsRegistry::new(settings.bonded_devices.clone());
    let (service, events) =
        MonitorService::from_settings(&settings, Arc::new(registry), Arc::new(RfcommConnector));

    console::run(service, events, &settings).await
}
