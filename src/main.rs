use delaygate::config::{Config, DEFAULT_CONFIG_PATH};
use delaygate::dispatcher::Dispatcher;
use delaygate::server::{SiteServer, PKG_NAME, VERSION};
use delaygate::store;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("delaygate=debug".parse().expect("valid log directive")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let config = Config::load_or_default(&config_path).map_err(|e| {
        error!(path = %config_path, error = %e, "Failed to load configuration");
        e
    })?;
    info!(path = %config_path, "Configuration loaded");

    print_startup_banner(&config);

    let store = store::open(config.driver()?, &config.storage.data_source)
        .await
        .map_err(|e| {
            error!(driver = %config.storage.driver, error = %e, "Failed to open rule store");
            anyhow::anyhow!("Failed to open rule store: {}", e)
        })?;

    let dispatcher = Arc::new(Dispatcher::new(config.dispatcher_options(), store).await?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let server = SiteServer::bind(config.listen_addr()?, dispatcher, shutdown_rx)
        .await
        .map_err(|e| {
            error!(listen = %config.server.listen, error = %e, "Failed to start site server");
            e
        })?;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!(error = %e, "Site server error");
        }
    });

    wait_for_shutdown_signal().await;

    let _ = shutdown_tx.send(true);

    let _ = tokio::time::timeout(Duration::from_secs(5), server_handle).await;

    info!("Shutdown complete");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            error!(error = %e, "Failed to install SIGTERM handler, waiting for Ctrl+C only");
            let _ = tokio::signal::ctrl_c().await;
            info!("Received SIGINT (Ctrl+C), shutting down...");
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT (Ctrl+C), shutting down...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Received Ctrl+C, shutting down...");
}

fn print_startup_banner(config: &Config) {
    info!(name = PKG_NAME, version = VERSION, "Starting endpoint simulator");
    info!(
        listen = %config.server.listen,
        deployment_address = %config.server.deployment_address,
        single_site = config.mode().is_single_site(),
        admin_path_prefix = %config.server.admin_path_prefix,
        "Server configuration"
    );
    info!(
        driver = %config.storage.driver,
        min_name_length = config.sites.min_name_length,
        seed_builtin = config.sites.seed_builtin,
        "Site settings"
    );
}
