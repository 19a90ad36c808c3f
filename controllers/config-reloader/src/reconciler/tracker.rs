//! Resource-version tracking
//!
//! Compares the live `resourceVersion` of each declared ConfigMap and Secret
//! with the version recorded in the ConfigReloader's status.

use crate::error::ControllerError;
use cluster_client::ConfigStore;
use crds::{ConfigReloader, DeclaredReference};
use tracing::debug;

/// Whether a single declared reference changed since it was last recorded.
///
/// A reference with no recorded entry counts as changed. A reference that
/// does not exist is a `ResourceNotFound` error.
pub async fn has_changed(
    configs: &dyn ConfigStore,
    reloader: &ConfigReloader,
    reference: &DeclaredReference,
) -> Result<bool, ControllerError> {
    let current = configs
        .resource_version(reference.kind, &reference.namespace, &reference.name)
        .await?
        .ok_or_else(|| ControllerError::ResourceNotFound(reference.to_string()))?;

    let recorded = reloader.status.as_ref().and_then(|status| {
        status.watched_resources.iter().find(|w| {
            w.kind == reference.kind && w.name == reference.name && w.namespace == reference.namespace
        })
    });

    Ok(match recorded {
        None => true,
        Some(entry) => entry.resource_version.as_deref() != Some(current.as_str()),
    })
}

/// Evaluate every declared reference, ConfigMaps first then Secrets.
///
/// All references are checked even after a change is found; the first
/// error aborts the check.
pub async fn check_for_changes(
    configs: &dyn ConfigStore,
    reloader: &ConfigReloader,
) -> Result<bool, ControllerError> {
    let mut changed = false;
    for reference in reloader.declared_references() {
        if has_changed(configs, reloader, &reference).await? {
            debug!("{} changed", reference);
            changed = true;
        }
    }
    Ok(changed)
}
