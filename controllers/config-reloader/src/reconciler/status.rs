//! Status bookkeeping
//!
//! Pure helpers that maintain the ConfigReloader status: the watched-resource
//! snapshot, the bounded restart history and the condition set.

use chrono::{DateTime, Utc};
use cluster_client::ConfigStore;
use crds::{
    ConditionStatus, ConfigReloader, ConfigReloaderStatus, PodRestart, ReloaderCondition,
    WatchedResource, MAX_POD_RESTART_HISTORY,
};
use tracing::debug;

// Condition types
pub const CONDITION_READY: &str = "Ready";

// Condition reasons
pub const REASON_CHECK_FAILED: &str = "CheckFailed";
pub const REASON_RESTART_FAILED: &str = "RestartFailed";
pub const REASON_RECONCILE_SUCCESS: &str = "ReconcileSuccess";

pub const READY_MESSAGE: &str = "ConfigReloader is ready";

/// Build a condition stamped with `now`
pub fn build_condition(
    condition_type: &str,
    status: ConditionStatus,
    reason: &str,
    message: &str,
    now: DateTime<Utc>,
) -> ReloaderCondition {
    ReloaderCondition {
        type_: condition_type.to_string(),
        status,
        reason: reason.to_string(),
        message: message.to_string(),
        last_transition_time: now,
    }
}

/// Merge a condition into the list.
///
/// Absent types are appended. An existing condition is replaced only when its
/// status differs; with the same status it is left untouched, including its
/// reason and message.
pub fn set_condition(conditions: &mut Vec<ReloaderCondition>, condition: ReloaderCondition) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) if existing.status != condition.status => *existing = condition,
        Some(_) => {}
        None => conditions.push(condition),
    }
}

/// Append restart records, keeping only the most recent entries
pub fn append_restarts(history: &mut Vec<PodRestart>, restarts: Vec<PodRestart>) {
    history.extend(restarts);
    if history.len() > MAX_POD_RESTART_HISTORY {
        let excess = history.len() - MAX_POD_RESTART_HISTORY;
        history.drain(..excess);
    }
}

/// Rebuild the watched-resource snapshot from the declared references.
///
/// References that cannot be read are dropped; duplicate declarations
/// collapse into one entry. An entry whose version has not moved keeps its
/// previous `lastUpdateTime`, so an idle pass yields an identical snapshot.
pub async fn refresh_watched_resources(
    configs: &dyn ConfigStore,
    reloader: &ConfigReloader,
    now: DateTime<Utc>,
) -> Vec<WatchedResource> {
    let previous: &[WatchedResource] = reloader
        .status
        .as_ref()
        .map(|s| s.watched_resources.as_slice())
        .unwrap_or_default();
    let mut snapshot: Vec<WatchedResource> = Vec::new();
    for reference in reloader.declared_references() {
        if snapshot.iter().any(|w| {
            w.kind == reference.kind && w.name == reference.name && w.namespace == reference.namespace
        }) {
            continue;
        }
        match configs
            .resource_version(reference.kind, &reference.namespace, &reference.name)
            .await
        {
            Ok(Some(version)) => {
                let last_update_time = previous
                    .iter()
                    .find(|w| {
                        w.kind == reference.kind
                            && w.name == reference.name
                            && w.namespace == reference.namespace
                            && w.resource_version.as_deref() == Some(version.as_str())
                    })
                    .and_then(|w| w.last_update_time)
                    .unwrap_or(now);
                snapshot.push(WatchedResource {
                    kind: reference.kind,
                    name: reference.name,
                    namespace: reference.namespace,
                    resource_version: Some(version),
                    last_update_time: Some(last_update_time),
                });
            }
            Ok(None) => debug!("{} not found, dropped from snapshot", reference),
            Err(e) => debug!("Failed to read {}, dropped from snapshot: {}", reference, e),
        }
    }
    snapshot
}

/// Ready condition reflecting a failed pass
pub fn not_ready(reason: &str, message: String, now: DateTime<Utc>) -> ReloaderCondition {
    build_condition(CONDITION_READY, ConditionStatus::False, reason, &message, now)
}

/// Ready condition reflecting a successful pass
pub fn ready(now: DateTime<Utc>) -> ReloaderCondition {
    build_condition(
        CONDITION_READY,
        ConditionStatus::True,
        REASON_RECONCILE_SUCCESS,
        READY_MESSAGE,
        now,
    )
}

/// Current status of a ConfigReloader, or an empty one
pub fn current_status(reloader: &ConfigReloader) -> ConfigReloaderStatus {
    reloader.status.clone().unwrap_or_default()
}
