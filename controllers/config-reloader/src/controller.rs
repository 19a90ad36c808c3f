//! Main controller implementation.
//!
//! Builds the Kubernetes client and reconciler, runs the ConfigReloader
//! watcher in a background task and waits for it (or a shutdown signal).

use crate::clock::SystemClock;
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crate::watcher;
use cluster_client::KubeClusterClient;
use kube::Client;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Main controller for ConfigReloader resources.
pub struct Controller {
    reloader_watcher: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance and starts its watcher.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing Config Reloader Controller");

        let kube_client = Client::try_default().await?;

        let reconciler = Arc::new(Reconciler::new(
            KubeClusterClient::new(kube_client.clone()),
            Arc::new(SystemClock),
        ));

        let reloader_watcher = tokio::spawn(async move {
            watcher::watch_config_reloaders(kube_client, reconciler, config).await
        });

        Ok(Self { reloader_watcher })
    }

    /// Runs the controller until shutdown.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Config Reloader Controller running");

        tokio::select! {
            result = &mut self.reloader_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("ConfigReloader watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("ConfigReloader watcher error: {}", e)))?;
                warn!("ConfigReloader watcher stopped");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received, stopping controller");
                self.reloader_watcher.abort();
            }
        }

        Ok(())
    }
}
