//! Config Reloader Controller
//!
//! Watches `ConfigReloader` resources and the ConfigMaps and Secrets they
//! declare. When a declared resource changes, the pods consuming it are
//! restarted, either by deleting them or by stamping their owning
//! controller's pod template so it performs a rolling update.

mod backoff;
mod clock;
mod config;
mod controller;
mod error;
mod reconciler;
mod router;
#[cfg(test)]
mod test_utils;
mod watcher;

use crate::config::ControllerConfig;
use crate::controller::Controller;
use crate::error::ControllerError;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    // kube's rustls-tls feature leaves the process-wide crypto provider unset
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| ControllerError::InvalidConfig("failed to install rustls crypto provider".to_string()))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    info!("Starting Config Reloader Controller");

    let config = ControllerConfig::from_env()?;

    info!("Configuration:");
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Debounce: {:?}", config.debounce);
    info!("  Concurrency: {}", config.concurrency);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
