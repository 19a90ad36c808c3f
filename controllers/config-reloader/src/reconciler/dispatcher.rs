//! Restart dispatch
//!
//! Restarts the pods that consume a changed ConfigMap or Secret, either by
//! deleting them or by stamping their owning controller's pod template.

use super::matcher::{self, WatchedKeys};
use crate::error::ControllerError;
use chrono::{DateTime, SecondsFormat, Utc};
use cluster_client::{ClusterError, Workload, WorkloadKind, WorkloadStore};
use crds::{
    ConfigReloader, PodRestart, PodSelector, RestartPolicy, RELOAD_ANNOTATION,
    RESTART_ANNOTATION_PREFIX,
};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, OwnerReference};
use kube::core::Selector;
use tracing::{debug, error, info, warn};

pub const REASON_POD_DELETED: &str = "ConfigMap/Secret changed - pod deleted";
pub const REASON_CONTROLLER_UPDATED: &str = "ConfigMap/Secret changed - controller updated";
pub const REASON_STANDALONE_ANNOTATED: &str =
    "ConfigMap/Secret changed - annotation updated (pod not restarted)";

/// Annotation key and value shared by every stamp in one pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartStamp {
    /// `config.dev/restarted-at-<unix seconds>`
    pub key: String,
    /// RFC3339 timestamp
    pub value: String,
}

impl RestartStamp {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            key: format!("{}{}", RESTART_ANNOTATION_PREFIX, now.timestamp()),
            value: now.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

/// Outcome of walking a pod's owner references
#[derive(Debug)]
enum OwnerResolution {
    /// Restartable controller whose template gets stamped
    Stamp(Workload),
    /// No owner of a supported kind
    Unsupported,
}

/// Convert the ConfigReloader's pod selector into a label selector
pub fn to_selector(selector: &PodSelector) -> Result<Selector, ControllerError> {
    Selector::try_from(LabelSelector::from(selector))
        .map_err(|e| ControllerError::InvalidSelector(e.to_string()))
}

/// Restart every pod in the ConfigReloader's namespace that consumes a
/// watched resource.
///
/// Per-pod failures are logged and the pod is skipped. Only an invalid
/// selector or a failed pod list fails the whole call.
pub async fn restart(
    workloads: &dyn WorkloadStore,
    reloader: &ConfigReloader,
    now: DateTime<Utc>,
) -> Result<Vec<PodRestart>, ControllerError> {
    let namespace = reloader.target_namespace();
    let selector = reloader.spec.selector.as_ref().map(to_selector).transpose()?;

    // TODO: skip controller-owned pods once ignoreOwnerReferences is wired in
    debug!(
        "ignoreOwnerReferences={} (not applied)",
        reloader.spec.ignore_owner_references
    );

    let pods = workloads.list_pods(namespace, selector.as_ref()).await?;
    let watched = WatchedKeys::from_reloader(reloader);
    let stamp = RestartStamp::at(now);

    let mut restarted = Vec::new();
    for pod in pods.iter().filter(|pod| matcher::matches(pod, &watched)) {
        let pod_name = pod.metadata.name.as_deref().unwrap_or_default();
        let pod_namespace = pod.metadata.namespace.as_deref().unwrap_or(namespace);
        info!("Processing pod {}/{} for restart", pod_namespace, pod_name);

        let reason = match reloader.spec.restart_policy {
            RestartPolicy::Delete => delete_pod(workloads, pod_namespace, pod_name).await,
            RestartPolicy::Annotation => annotate(workloads, pod, pod_namespace, &stamp).await,
        };

        if let Some(reason) = reason {
            restarted.push(PodRestart {
                pod_name: pod_name.to_string(),
                namespace: pod_namespace.to_string(),
                restart_time: now,
                reason: reason.to_string(),
            });
        }
    }

    Ok(restarted)
}

async fn delete_pod(workloads: &dyn WorkloadStore, namespace: &str, name: &str) -> Option<&'static str> {
    info!("Deleting pod {}/{}", namespace, name);
    match workloads.delete_pod(namespace, name).await {
        Ok(()) => Some(REASON_POD_DELETED),
        Err(e) => {
            error!("Failed to delete pod {}/{}: {}", namespace, name, e);
            None
        }
    }
}

async fn annotate(
    workloads: &dyn WorkloadStore,
    pod: &Pod,
    namespace: &str,
    stamp: &RestartStamp,
) -> Option<&'static str> {
    let pod_name = pod.metadata.name.as_deref().unwrap_or_default();
    let owners = pod.metadata.owner_references.as_deref().unwrap_or_default();

    if owners.is_empty() {
        warn!(
            "Standalone pod {} will not be restarted by an annotation; use the delete restart policy for standalone pods",
            pod_name
        );
        return match annotate_standalone(workloads, pod, stamp).await {
            Ok(()) => Some(REASON_STANDALONE_ANNOTATED),
            Err(e) => {
                error!("Failed to update annotation on pod {}: {}", pod_name, e);
                None
            }
        };
    }

    match restart_owner(workloads, namespace, owners, stamp).await {
        Ok(true) => Some(REASON_CONTROLLER_UPDATED),
        Ok(false) => None,
        Err(e) => {
            error!("Failed to restart controller of pod {}: {}", pod_name, e);
            None
        }
    }
}

async fn annotate_standalone(
    workloads: &dyn WorkloadStore,
    pod: &Pod,
    stamp: &RestartStamp,
) -> Result<(), ClusterError> {
    let mut updated = pod.clone();
    updated
        .metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(RELOAD_ANNOTATION.to_string(), stamp.value.clone());
    workloads.update_pod(&updated).await
}

/// Stamp the pod's restartable controller. `Ok(false)` when no owner is supported.
async fn restart_owner(
    workloads: &dyn WorkloadStore,
    namespace: &str,
    owners: &[OwnerReference],
    stamp: &RestartStamp,
) -> Result<bool, ClusterError> {
    match resolve_owner(workloads, namespace, owners).await? {
        OwnerResolution::Stamp(mut workload) => {
            workload
                .template_annotations_mut()
                .insert(stamp.key.clone(), stamp.value.clone());
            workloads.update_workload(&workload).await?;
            info!("Triggered rolling update of {} {}/{}", workload.kind(), namespace, workload.name());
            Ok(true)
        }
        OwnerResolution::Unsupported => Ok(false),
    }
}

/// Walk owner references in order; the first supported kind wins.
///
/// A ReplicaSet owned by a Deployment resolves to the Deployment, so the walk
/// never goes deeper than two hops.
async fn resolve_owner(
    workloads: &dyn WorkloadStore,
    namespace: &str,
    owners: &[OwnerReference],
) -> Result<OwnerResolution, ClusterError> {
    for owner in owners {
        let Some(kind) = WorkloadKind::from_kind(&owner.kind) else {
            warn!("Unsupported owner kind {} for {}/{}", owner.kind, namespace, owner.name);
            continue;
        };

        let workload = workloads.get_workload(kind, namespace, &owner.name).await?;
        if kind != WorkloadKind::ReplicaSet {
            return Ok(OwnerResolution::Stamp(workload));
        }

        let deployment = workload
            .owner_references()
            .iter()
            .find(|o| o.kind == WorkloadKind::Deployment.as_str());
        return match deployment {
            Some(deployment) => {
                let deployment = workloads
                    .get_workload(WorkloadKind::Deployment, namespace, &deployment.name)
                    .await?;
                Ok(OwnerResolution::Stamp(deployment))
            }
            None => Ok(OwnerResolution::Stamp(workload)),
        };
    }
    Ok(OwnerResolution::Unsupported)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use chrono::TimeZone;
    use cluster_client::MockClusterClient;
    use crds::{PodSelectorRequirement, ResourceRef};
    use std::collections::BTreeMap;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).single().unwrap()
    }

    fn reloader(policy: RestartPolicy) -> ConfigReloader {
        let mut reloader = create_test_reloader("r", "apps", vec![ResourceRef::new("app-config")], vec![]);
        reloader.spec.restart_policy = policy;
        reloader
    }

    fn consuming_pod(name: &str) -> Pod {
        with_config_map_volume(create_test_pod(name, "apps"), "app-config")
    }

    #[test]
    fn test_restart_stamp_format() {
        let stamp = RestartStamp::at(now());
        assert_eq!(stamp.key, "config.dev/restarted-at-1700000000");
        assert_eq!(stamp.value, "2023-11-14T22:13:20Z");
    }

    #[test]
    fn test_invalid_selector_is_rejected() {
        let selector = PodSelector {
            match_labels: None,
            match_expressions: Some(vec![PodSelectorRequirement {
                key: "tier".to_string(),
                operator: "Sometimes".to_string(),
                values: None,
            }]),
        };
        assert!(matches!(to_selector(&selector), Err(ControllerError::InvalidSelector(_))));
    }

    #[tokio::test]
    async fn test_invalid_selector_aborts_restart() {
        let mock = MockClusterClient::new();
        mock.add_pod(consuming_pod("web"));
        let mut reloader = reloader(RestartPolicy::Delete);
        reloader.spec.selector = Some(PodSelector {
            match_labels: None,
            match_expressions: Some(vec![PodSelectorRequirement {
                key: "tier".to_string(),
                operator: "Sometimes".to_string(),
                values: None,
            }]),
        });

        let err = restart(&mock, &reloader, now()).await.unwrap_err();
        assert!(matches!(err, ControllerError::InvalidSelector(_)));
        assert!(mock.deleted_pods().is_empty());
    }

    #[tokio::test]
    async fn test_delete_policy_deletes_matching_pods_only() {
        let mock = MockClusterClient::new();
        mock.add_pod(consuming_pod("web"));
        mock.add_pod(create_test_pod("unrelated", "apps"));

        let restarts = restart(&mock, &reloader(RestartPolicy::Delete), now()).await.unwrap();

        assert_eq!(restarts.len(), 1);
        assert_eq!(restarts[0].pod_name, "web");
        assert_eq!(restarts[0].reason, REASON_POD_DELETED);
        assert_eq!(restarts[0].restart_time, now());
        assert_eq!(mock.deleted_pods(), vec![("apps".to_string(), "web".to_string())]);
    }

    #[tokio::test]
    async fn test_delete_failure_skips_pod_and_continues() {
        let mock = MockClusterClient::new();
        mock.add_pod(consuming_pod("a"));
        mock.add_pod(consuming_pod("b"));
        mock.fail_pod_delete("a");

        let restarts = restart(&mock, &reloader(RestartPolicy::Delete), now()).await.unwrap();

        assert_eq!(restarts.len(), 1);
        assert_eq!(restarts[0].pod_name, "b");
    }

    #[tokio::test]
    async fn test_selector_is_passed_to_pod_list() {
        let mock = MockClusterClient::new();
        mock.add_pod(with_labels(consuming_pod("selected"), &[("app", "web")]));
        mock.add_pod(with_labels(consuming_pod("other"), &[("app", "db")]));

        let mut reloader = reloader(RestartPolicy::Delete);
        let mut labels = BTreeMap::new();
        labels.insert("app".to_string(), "web".to_string());
        reloader.spec.selector = Some(PodSelector {
            match_labels: Some(labels),
            match_expressions: None,
        });

        let restarts = restart(&mock, &reloader, now()).await.unwrap();

        assert_eq!(restarts.len(), 1);
        assert_eq!(restarts[0].pod_name, "selected");
        assert_eq!(mock.list_selectors(), vec![Some("app=web".to_string())]);
    }

    #[tokio::test]
    async fn test_pod_list_failure_aborts() {
        let mock = MockClusterClient::new();
        mock.fail_list_pods();
        let err = restart(&mock, &reloader(RestartPolicy::Delete), now()).await.unwrap_err();
        assert!(matches!(err, ControllerError::Cluster(_)));
    }

    #[tokio::test]
    async fn test_standalone_pod_is_annotated_not_restarted() {
        let mock = MockClusterClient::new();
        mock.add_pod(consuming_pod("standalone"));
        mock.add_workload(create_test_deployment("web", "apps"));

        let restarts = restart(&mock, &reloader(RestartPolicy::Annotation), now()).await.unwrap();

        assert_eq!(restarts.len(), 1);
        assert_eq!(restarts[0].reason, REASON_STANDALONE_ANNOTATED);
        assert!(restarts[0].reason.contains("pod not restarted"));
        assert!(mock.deleted_pods().is_empty());
        assert!(mock.updated_workloads().is_empty());

        let updated = mock.updated_pods();
        assert_eq!(updated.len(), 1);
        let annotations = updated[0].metadata.annotations.as_ref().unwrap();
        assert_eq!(
            annotations.get(RELOAD_ANNOTATION).map(String::as_str),
            Some("2023-11-14T22:13:20Z")
        );
    }

    #[tokio::test]
    async fn test_standalone_update_failure_produces_no_record() {
        let mock = MockClusterClient::new();
        mock.add_pod(consuming_pod("standalone"));
        mock.fail_pod_update("standalone");

        let restarts = restart(&mock, &reloader(RestartPolicy::Annotation), now()).await.unwrap();
        assert!(restarts.is_empty());
    }

    #[tokio::test]
    async fn test_replicaset_owned_by_deployment_stamps_deployment() {
        let mock = MockClusterClient::new();
        mock.add_workload(create_test_deployment("web", "apps"));
        mock.add_workload(create_test_replicaset("web-7d9f", "apps", Some("web")));
        mock.add_pod(with_owner(consuming_pod("web-7d9f-abc"), "ReplicaSet", "web-7d9f"));

        let restarts = restart(&mock, &reloader(RestartPolicy::Annotation), now()).await.unwrap();

        assert_eq!(restarts.len(), 1);
        assert_eq!(restarts[0].reason, REASON_CONTROLLER_UPDATED);
        assert!(mock.deleted_pods().is_empty());

        let updated = mock.updated_workloads();
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].kind(), WorkloadKind::Deployment);
        assert_eq!(updated[0].name(), "web");

        let deployment = mock.workload(WorkloadKind::Deployment, "apps", "web").unwrap();
        let annotations = deployment.template_annotations().unwrap();
        assert_eq!(
            annotations.get("config.dev/restarted-at-1700000000").map(String::as_str),
            Some("2023-11-14T22:13:20Z")
        );
        let replicaset = mock.workload(WorkloadKind::ReplicaSet, "apps", "web-7d9f").unwrap();
        assert!(replicaset.template_annotations().is_none());
    }

    #[tokio::test]
    async fn test_ignore_owner_references_still_stamps_owner() {
        let mock = MockClusterClient::new();
        mock.add_workload(create_test_deployment("web", "apps"));
        mock.add_workload(create_test_replicaset("web-7d9f", "apps", Some("web")));
        mock.add_pod(with_owner(consuming_pod("web-7d9f-abc"), "ReplicaSet", "web-7d9f"));
        let mut reloader = reloader(RestartPolicy::Annotation);
        reloader.spec.ignore_owner_references = true;

        let restarts = restart(&mock, &reloader, now()).await.unwrap();

        assert_eq!(restarts.len(), 1);
        assert_eq!(restarts[0].reason, REASON_CONTROLLER_UPDATED);
        assert!(mock.deleted_pods().is_empty());
        let updated = mock.updated_workloads();
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].kind(), WorkloadKind::Deployment);
        assert_eq!(updated[0].name(), "web");
        assert!(mock.updated_pods().is_empty());
    }

    #[tokio::test]
    async fn test_owner_lookup_uses_resolved_namespace() {
        let mock = MockClusterClient::new();
        mock.add_workload(create_test_deployment("web", "apps"));
        mock.add_workload(create_test_replicaset("web-7d9f", "apps", Some("web")));
        let mut pod = with_owner(consuming_pod("web-7d9f-abc"), "ReplicaSet", "web-7d9f");
        pod.metadata.namespace = None;

        let reason = annotate(&mock, &pod, "apps", &RestartStamp::at(now())).await;

        assert_eq!(reason, Some(REASON_CONTROLLER_UPDATED));
        let deployment = mock.workload(WorkloadKind::Deployment, "apps", "web").unwrap();
        assert!(deployment
            .template_annotations()
            .unwrap()
            .contains_key("config.dev/restarted-at-1700000000"));
    }

    #[tokio::test]
    async fn test_bare_replicaset_is_stamped_itself() {
        let mock = MockClusterClient::new();
        mock.add_workload(create_test_replicaset("bare", "apps", None));
        mock.add_pod(with_owner(consuming_pod("bare-xyz"), "ReplicaSet", "bare"));

        let restarts = restart(&mock, &reloader(RestartPolicy::Annotation), now()).await.unwrap();

        assert_eq!(restarts.len(), 1);
        let updated = mock.updated_workloads();
        assert_eq!(updated[0].kind(), WorkloadKind::ReplicaSet);
        assert!(updated[0]
            .template_annotations()
            .unwrap()
            .contains_key("config.dev/restarted-at-1700000000"));
    }

    #[tokio::test]
    async fn test_statefulset_and_daemonset_are_stamped_directly() {
        let mock = MockClusterClient::new();
        mock.add_workload(create_test_statefulset("db", "apps"));
        mock.add_workload(create_test_daemonset("agent", "apps"));
        mock.add_pod(with_owner(consuming_pod("db-0"), "StatefulSet", "db"));
        mock.add_pod(with_owner(consuming_pod("agent-q2"), "DaemonSet", "agent"));

        let restarts = restart(&mock, &reloader(RestartPolicy::Annotation), now()).await.unwrap();

        assert_eq!(restarts.len(), 2);
        let kinds: Vec<_> = mock.updated_workloads().iter().map(Workload::kind).collect();
        assert_eq!(kinds, vec![WorkloadKind::StatefulSet, WorkloadKind::DaemonSet]);
    }

    #[tokio::test]
    async fn test_unsupported_owner_produces_no_record() {
        let mock = MockClusterClient::new();
        mock.add_pod(with_owner(consuming_pod("job-pod"), "Job", "nightly"));

        let restarts = restart(&mock, &reloader(RestartPolicy::Annotation), now()).await.unwrap();

        assert!(restarts.is_empty());
        assert!(mock.updated_workloads().is_empty());
        assert!(mock.updated_pods().is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_owner_is_skipped_for_next_supported_one() {
        let mock = MockClusterClient::new();
        mock.add_workload(create_test_statefulset("db", "apps"));
        let pod = with_owner(with_owner(consuming_pod("db-0"), "Job", "nightly"), "StatefulSet", "db");
        mock.add_pod(pod);

        let restarts = restart(&mock, &reloader(RestartPolicy::Annotation), now()).await.unwrap();
        assert_eq!(restarts.len(), 1);
        assert_eq!(mock.updated_workloads()[0].kind(), WorkloadKind::StatefulSet);
    }

    #[tokio::test]
    async fn test_missing_owner_or_update_failure_skips_pod() {
        let mock = MockClusterClient::new();
        mock.add_workload(create_test_deployment("web", "apps"));
        mock.fail_workload_update("web");
        mock.add_pod(with_owner(consuming_pod("web-1"), "Deployment", "web"));
        mock.add_pod(with_owner(consuming_pod("ghost-1"), "Deployment", "ghost"));
        mock.add_pod(consuming_pod("standalone"));

        let restarts = restart(&mock, &reloader(RestartPolicy::Annotation), now()).await.unwrap();

        assert_eq!(restarts.len(), 1);
        assert_eq!(restarts[0].pod_name, "standalone");
    }
}
