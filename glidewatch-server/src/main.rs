use anyhow::Context;
use glidewatch_core::logging::init_tracing;
use glidewatch_core::SystemClock;
use glidewatch_server::config::{config_path, AppConfig, ConfigSource};
use glidewatch_server::notifier::WsTransport;
use glidewatch_server::{api, hotreload, GuardRuntime};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = config_path();
    let (config, source) = AppConfig::load_or_default(&path)
        .with_context(|| format!("failed to load {}", path.display()))?;

    init_tracing(&config.logging);
    match source {
        ConfigSource::File => info!(path = %path.display(), "Configuration loaded"),
        ConfigSource::Defaults => {
            warn!(path = %path.display(), "Config file not found, running with defaults")
        }
    }

    let addr: SocketAddr = config
        .http
        .bind
        .parse()
        .with_context(|| format!("invalid bind address `{}`", config.http.bind))?;

    let runtime = GuardRuntime::start(config, &path, Arc::new(WsTransport), Arc::new(SystemClock));

    // Held for the lifetime of the process
    let _watcher = match hotreload::watch(runtime.reloader()) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            warn!("Hot-reload disabled: {}", e);
            None
        }
    };

    let served = api::serve(runtime.api_state(), addr, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown requested");
    })
    .await;

    runtime.shutdown().await;
    served.context("API server error")?;
    Ok(())
}
