//! Test utilities for unit testing the reconciler
//!
//! Fixture builders for ConfigReloaders, pods and workloads, plus a
//! reconciler wired to a `MockClusterClient` and a fixed clock.

use crate::clock::FixedClock;
use crate::reconciler::Reconciler;
use chrono::{DateTime, TimeZone, Utc};
use cluster_client::{MockClusterClient, Workload};
use crds::{
    ConfigReloader, ConfigReloaderSpec, ConfigReloaderStatus, ResourceKind, ResourceRef,
    WatchedResource,
};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, EnvFromSource, Pod, PodSpec, SecretVolumeSource, Volume,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference, Time};
use std::sync::Arc;

/// Instant every test reconciler reports as "now"
pub fn test_now() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).single().unwrap()
}

/// Deletion timestamp for ConfigReloaders being deleted
pub fn deletion_time() -> Time {
    serde_json::from_value(serde_json::json!("2023-11-14T22:13:20Z")).unwrap()
}

/// Reconciler backed by `mock` with the clock fixed at `test_now()`
pub fn test_reconciler(mock: &MockClusterClient) -> Reconciler {
    test_reconciler_at(mock, test_now())
}

/// Reconciler backed by `mock` with the clock fixed at `now`
pub fn test_reconciler_at(mock: &MockClusterClient, now: DateTime<Utc>) -> Reconciler {
    Reconciler::new(mock.clone(), Arc::new(FixedClock(now)))
}

fn meta(name: &str, namespace: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}

/// Helper to create a test ConfigReloader with the annotation restart policy
pub fn create_test_reloader(
    name: &str,
    namespace: &str,
    config_maps: Vec<ResourceRef>,
    secrets: Vec<ResourceRef>,
) -> ConfigReloader {
    ConfigReloader {
        metadata: meta(name, namespace),
        spec: ConfigReloaderSpec {
            config_maps,
            secrets,
            ..Default::default()
        },
        status: None,
    }
}

/// Record resource versions in the ConfigReloader's watched snapshot
pub fn with_recorded_versions(
    mut reloader: ConfigReloader,
    versions: &[(ResourceKind, &str, &str, &str)],
) -> ConfigReloader {
    let status = reloader.status.get_or_insert_with(ConfigReloaderStatus::default);
    for (kind, namespace, name, version) in versions {
        status.watched_resources.push(WatchedResource {
            kind: *kind,
            name: (*name).to_string(),
            namespace: (*namespace).to_string(),
            resource_version: Some((*version).to_string()),
            last_update_time: None,
        });
    }
    reloader
}

/// Helper to create a test pod with a single container and no references
pub fn create_test_pod(name: &str, namespace: &str) -> Pod {
    Pod {
        metadata: meta(name, namespace),
        spec: Some(PodSpec {
            containers: vec![Container {
                name: "app".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        }),
        status: None,
    }
}

pub fn with_containers(mut pod: Pod, containers: Vec<Container>) -> Pod {
    pod.spec.get_or_insert_with(Default::default).containers = containers;
    pod
}

pub fn container_with_env_from(env_from: EnvFromSource) -> Container {
    Container {
        name: "app".to_string(),
        env_from: Some(vec![env_from]),
        ..Default::default()
    }
}

/// Mount a ConfigMap as a volume
pub fn with_config_map_volume(mut pod: Pod, config_map: &str) -> Pod {
    pod.spec
        .get_or_insert_with(Default::default)
        .volumes
        .get_or_insert_with(Vec::new)
        .push(Volume {
            name: format!("{}-volume", config_map),
            config_map: Some(ConfigMapVolumeSource {
                name: config_map.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        });
    pod
}

/// Mount a Secret as a volume
pub fn with_secret_volume(mut pod: Pod, secret: &str) -> Pod {
    pod.spec
        .get_or_insert_with(Default::default)
        .volumes
        .get_or_insert_with(Vec::new)
        .push(Volume {
            name: format!("{}-volume", secret),
            secret: Some(SecretVolumeSource {
                secret_name: Some(secret.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        });
    pod
}

pub fn with_labels(mut pod: Pod, labels: &[(&str, &str)]) -> Pod {
    let map = pod.metadata.labels.get_or_insert_with(Default::default);
    for (k, v) in labels {
        map.insert((*k).to_string(), (*v).to_string());
    }
    pod
}

fn owner_reference(kind: &str, name: &str) -> OwnerReference {
    OwnerReference {
        api_version: "apps/v1".to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
        uid: format!("{}-uid", name),
        controller: Some(true),
        ..Default::default()
    }
}

/// Append an owner reference
pub fn with_owner(mut pod: Pod, kind: &str, name: &str) -> Pod {
    pod.metadata
        .owner_references
        .get_or_insert_with(Vec::new)
        .push(owner_reference(kind, name));
    pod
}

pub fn create_test_deployment(name: &str, namespace: &str) -> Workload {
    Workload::Deployment(Deployment {
        metadata: meta(name, namespace),
        spec: Some(Default::default()),
        status: None,
    })
}

pub fn create_test_statefulset(name: &str, namespace: &str) -> Workload {
    Workload::StatefulSet(StatefulSet {
        metadata: meta(name, namespace),
        spec: Some(Default::default()),
        status: None,
    })
}

pub fn create_test_daemonset(name: &str, namespace: &str) -> Workload {
    Workload::DaemonSet(DaemonSet {
        metadata: meta(name, namespace),
        spec: Some(Default::default()),
        status: None,
    })
}

/// Helper to create a ReplicaSet, optionally owned by a Deployment
pub fn create_test_replicaset(name: &str, namespace: &str, deployment: Option<&str>) -> Workload {
    let mut metadata = meta(name, namespace);
    metadata.owner_references = deployment.map(|d| vec![owner_reference("Deployment", d)]);
    Workload::ReplicaSet(ReplicaSet {
        metadata,
        spec: None,
        status: None,
    })
}
