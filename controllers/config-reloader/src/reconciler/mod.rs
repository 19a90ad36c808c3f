//! Reconciliation logic for ConfigReloader resources.
//!
//! A pass runs as straight-line async code and is serialized per
//! ConfigReloader by the runtime:
//! - `tracker`: detects changed ConfigMaps and Secrets
//! - `matcher`: finds the pods that consume them
//! - `dispatcher`: restarts those pods
//! - `status`: maintains conditions, restart history and the watched snapshot

pub mod dispatcher;
pub mod matcher;
pub mod status;
pub mod tracker;


use crate::backoff::FibonacciBackoff;
use crate::clock::Clock;
use crate::error::ControllerError;
use cluster_client::{ConfigStore, ReloaderStore, WorkloadStore};
use crds::{ConfigReloader, ConfigReloaderStatus, CONFIG_RELOADER_FINALIZER};
use kube_runtime::controller::Action;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Requeue interval after a successful pass
pub const POLL_INTERVAL: Duration = Duration::from_secs(2 * 60);

/// Requeue interval after a failed change check or restart
pub const ERROR_REQUEUE: Duration = Duration::from_secs(5 * 60);

/// What the runtime should do after a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    /// Wait for the next watch event
    Done,
    /// Run again right away
    Immediately,
    /// Run again after a delay
    After(Duration),
}

impl From<Requeue> for Action {
    fn from(requeue: Requeue) -> Self {
        match requeue {
            Requeue::Done => Action::await_change(),
            Requeue::Immediately => Action::requeue(Duration::ZERO),
            Requeue::After(delay) => Action::requeue(delay),
        }
    }
}

/// Reconciles ConfigReloader resources.
pub struct Reconciler {
    pub(crate) configs: Box<dyn ConfigStore>,
    pub(crate) workloads: Box<dyn WorkloadStore>,
    pub(crate) reloaders: Box<dyn ReloaderStore>,
    pub(crate) clock: Arc<dyn Clock>,
    backoff_states: Arc<Mutex<HashMap<String, FibonacciBackoff>>>,
}

impl Reconciler {
    /// Creates a new reconciler backed by one client implementing every port.
    pub fn new<C>(client: C, clock: Arc<dyn Clock>) -> Self
    where
        C: ConfigStore + WorkloadStore + ReloaderStore + Clone + 'static,
    {
        Self {
            configs: Box::new(client.clone()),
            workloads: Box::new(client.clone()),
            reloaders: Box::new(client),
            clock,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Run one pass for the ConfigReloader `namespace/name`.
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<Requeue, ControllerError> {
        let Some(reloader) = self.reloaders.get_reloader(namespace, name).await? else {
            debug!("ConfigReloader {}/{} no longer exists", namespace, name);
            return Ok(Requeue::Done);
        };

        if reloader.metadata.deletion_timestamp.is_some() {
            return self.finalize(&reloader, namespace, name).await;
        }

        if !reloader.has_finalizer() {
            let mut finalizers = reloader.metadata.finalizers.clone().unwrap_or_default();
            finalizers.push(CONFIG_RELOADER_FINALIZER.to_string());
            self.reloaders
                .set_finalizers(namespace, name, reloader.metadata.resource_version.as_deref(), &finalizers)
                .await?;
            info!("Added finalizer to ConfigReloader {}/{}", namespace, name);
            return Ok(Requeue::Immediately);
        }

        self.reconcile_changes(&reloader, namespace, name).await
    }

    /// Remove the finalizer so deletion can proceed. Restarts already
    /// applied are left as they are.
    async fn finalize(
        &self,
        reloader: &ConfigReloader,
        namespace: &str,
        name: &str,
    ) -> Result<Requeue, ControllerError> {
        if reloader.has_finalizer() {
            let finalizers: Vec<String> = reloader
                .metadata
                .finalizers
                .iter()
                .flatten()
                .filter(|f| f.as_str() != CONFIG_RELOADER_FINALIZER)
                .cloned()
                .collect();
            self.reloaders
                .set_finalizers(namespace, name, reloader.metadata.resource_version.as_deref(), &finalizers)
                .await?;
            info!("Removed finalizer from ConfigReloader {}/{}", namespace, name);
        }
        Ok(Requeue::Done)
    }

    async fn reconcile_changes(
        &self,
        reloader: &ConfigReloader,
        namespace: &str,
        name: &str,
    ) -> Result<Requeue, ControllerError> {
        let now = self.clock.now();
        let mut next = status::current_status(reloader);

        let changed = match tracker::check_for_changes(self.configs.as_ref(), reloader).await {
            Ok(changed) => changed,
            Err(e) => {
                warn!("Change check failed for ConfigReloader {}/{}: {}", namespace, name, e);
                status::set_condition(
                    &mut next.conditions,
                    status::not_ready(status::REASON_CHECK_FAILED, e.to_string(), now),
                );
                self.persist(reloader, namespace, name, &next).await?;
                return Ok(Requeue::After(ERROR_REQUEUE));
            }
        };

        if changed {
            info!("Detected changes in watched resources of {}/{}, restarting pods", namespace, name);
            match dispatcher::restart(self.workloads.as_ref(), reloader, now).await {
                Ok(restarts) => {
                    info!("Restarted {} pod(s) for {}/{}", restarts.len(), namespace, name);
                    next.last_reload_time = Some(now);
                    status::append_restarts(&mut next.pods_restarted, restarts);
                }
                Err(e) => {
                    warn!("Restart failed for ConfigReloader {}/{}: {}", namespace, name, e);
                    status::set_condition(
                        &mut next.conditions,
                        status::not_ready(status::REASON_RESTART_FAILED, e.to_string(), now),
                    );
                    self.persist(reloader, namespace, name, &next).await?;
                    return Ok(Requeue::After(ERROR_REQUEUE));
                }
            }
        }

        next.watched_resources =
            status::refresh_watched_resources(self.configs.as_ref(), reloader, now).await;
        status::set_condition(&mut next.conditions, status::ready(now));
        self.persist(reloader, namespace, name, &next).await?;

        Ok(Requeue::After(POLL_INTERVAL))
    }

    /// Write `next` unless it equals the stored status. Every write is a
    /// watch event for this object, so idle passes must not write.
    async fn persist(
        &self,
        reloader: &ConfigReloader,
        namespace: &str,
        name: &str,
        next: &ConfigReloaderStatus,
    ) -> Result<(), ControllerError> {
        if *next == status::current_status(reloader) {
            debug!("Status of ConfigReloader {}/{} unchanged, skipping write", namespace, name);
            return Ok(());
        }
        self.reloaders.update_status(namespace, name, next).await?;
        Ok(())
    }

    /// Next backoff delay for a ConfigReloader whose pass returned an error
    pub fn next_backoff(&self, key: &str) -> Duration {
        match self.backoff_states.lock() {
            Ok(mut states) => states.entry(key.to_string()).or_default().next_backoff(),
            Err(e) => {
                warn!("Failed to lock backoff states: {}, using default backoff", e);
                Duration::from_secs(60)
            }
        }
    }

    /// Reset the backoff after a successful pass
    pub fn reset_backoff(&self, key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            if let Some(state) = states.get_mut(key) {
                state.reset();
            }
        }
    }
}
