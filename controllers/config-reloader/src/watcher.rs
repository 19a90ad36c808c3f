//! Kubernetes resource watchers.
//!
//! Runs a `kube_runtime::Controller` over ConfigReloaders, with ConfigMap and
//! Secret watches routed back to the ConfigReloaders that declare them.

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crate::router;
use crds::{ConfigReloader, ResourceKind};
use futures::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::{Api, Client, ResourceExt};
use kube_runtime::controller::{Action, Config as RuntimeConfig};
use kube_runtime::{watcher, Controller};
use std::sync::Arc;
use tracing::{debug, error, info, info_span, Instrument};

fn reloader_key(reloader: &ConfigReloader) -> String {
    format!("{}/{}", reloader.target_namespace(), reloader.name_any())
}

async fn reconcile(reloader: Arc<ConfigReloader>, ctx: Arc<Reconciler>) -> Result<Action, ControllerError> {
    let namespace = reloader.target_namespace().to_string();
    let name = reloader.name_any();
    let key = reloader_key(&reloader);

    async move {
        debug!("Reconciling ConfigReloader");
        let requeue = ctx.reconcile(&namespace, &name).await?;
        ctx.reset_backoff(&key);
        Ok(Action::from(requeue))
    }
    .instrument(info_span!("reconcile", reloader = %reloader_key(&reloader)))
    .await
}

// Requeue with Fibonacci backoff per ConfigReloader
fn error_policy(reloader: Arc<ConfigReloader>, error: &ControllerError, ctx: Arc<Reconciler>) -> Action {
    let key = reloader_key(&reloader);
    let delay = ctx.next_backoff(&key);
    error!("Reconciliation error for ConfigReloader {}: {} (retry in {:?})", key, error, delay);
    Action::requeue(delay)
}

/// Watch ConfigReloaders until the watch stream ends.
pub async fn watch_config_reloaders(
    client: Client,
    reconciler: Arc<Reconciler>,
    config: ControllerConfig,
) -> Result<(), ControllerError> {
    info!("Starting ConfigReloader watcher");

    let (reloaders, config_maps, secrets): (Api<ConfigReloader>, Api<ConfigMap>, Api<Secret>) =
        match config.namespace.as_deref() {
            Some(ns) => (
                Api::namespaced(client.clone(), ns),
                Api::namespaced(client.clone(), ns),
                Api::namespaced(client, ns),
            ),
            None => (Api::all(client.clone()), Api::all(client.clone()), Api::all(client)),
        };

    let runtime_config = RuntimeConfig::default()
        .debounce(config.debounce)
        .concurrency(config.concurrency);

    let controller = Controller::new(reloaders, watcher::Config::default()).with_config(runtime_config);
    let cache = controller.store();
    let secret_cache = cache.clone();

    controller
        .watches(config_maps, watcher::Config::default(), move |cm: ConfigMap| {
            router::route(&cache.state(), ResourceKind::ConfigMap, &cm.metadata)
        })
        .watches(secrets, watcher::Config::default(), move |secret: Secret| {
            router::route(&secret_cache.state(), ResourceKind::Secret, &secret.metadata)
        })
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!("Reconciled ConfigReloader {}", obj),
                Err(e) => error!("Controller error for ConfigReloader: {}", e),
            }
        })
        .await;

    Ok(())
}
