//! Kubernetes-backed implementation of the cluster ports

use crate::cluster_trait::{ConfigStore, ReloaderStore, WorkloadStore};
use crate::error::ClusterError;
use crate::models::{Workload, WorkloadKind};
use crds::{ConfigReloader, ConfigReloaderStatus, ResourceKind};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Secret};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::core::Selector;
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::fmt::Debug;
use tracing::debug;

/// Cluster client backed by a `kube::Client`
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl Debug for KubeClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClusterClient").finish_non_exhaustive()
    }
}

impl KubeClusterClient {
    /// Wrap an existing Kubernetes client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn get_opt<K>(&self, namespace: &str, name: &str) -> Result<Option<K>, ClusterError>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()> + Clone + DeserializeOwned + Debug,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn replace<K>(&self, obj: &K) -> Result<(), ClusterError>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Serialize
            + Debug,
    {
        let meta = obj.meta();
        let name = meta
            .name
            .as_deref()
            .ok_or_else(|| ClusterError::InvalidRequest(format!("{} missing metadata.name", K::kind(&()))))?;
        let namespace = meta
            .namespace
            .as_deref()
            .ok_or_else(|| ClusterError::InvalidRequest(format!("{} {} missing metadata.namespace", K::kind(&()), name)))?;

        debug!("Replacing {} {}/{}", K::kind(&()), namespace, name);
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        api.replace(name, &PostParams::default(), obj).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ConfigStore for KubeClusterClient {
    async fn resource_version(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<String>, ClusterError> {
        let metadata = match kind {
            ResourceKind::ConfigMap => self
                .get_opt::<ConfigMap>(namespace, name)
                .await?
                .map(|cm| cm.metadata),
            ResourceKind::Secret => self
                .get_opt::<Secret>(namespace, name)
                .await?
                .map(|secret| secret.metadata),
        };
        Ok(metadata.map(|m| m.resource_version.unwrap_or_default()))
    }
}

#[async_trait::async_trait]
impl WorkloadStore for KubeClusterClient {
    async fn list_pods(&self, namespace: &str, selector: Option<&Selector>) -> Result<Vec<Pod>, ClusterError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let mut params = ListParams::default();
        if let Some(selector) = selector {
            params = params.labels_from(selector);
        }
        let pods = api.list(&params).await?;
        debug!("Listed {} pods in namespace {}", pods.items.len(), namespace);
        Ok(pods.items)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn update_pod(&self, pod: &Pod) -> Result<(), ClusterError> {
        self.replace(pod).await
    }

    async fn get_workload(&self, kind: WorkloadKind, namespace: &str, name: &str) -> Result<Workload, ClusterError> {
        let workload = match kind {
            WorkloadKind::Deployment => self
                .get_opt::<Deployment>(namespace, name)
                .await?
                .map(Workload::Deployment),
            WorkloadKind::StatefulSet => self
                .get_opt::<StatefulSet>(namespace, name)
                .await?
                .map(Workload::StatefulSet),
            WorkloadKind::DaemonSet => self
                .get_opt::<DaemonSet>(namespace, name)
                .await?
                .map(Workload::DaemonSet),
            WorkloadKind::ReplicaSet => self
                .get_opt::<ReplicaSet>(namespace, name)
                .await?
                .map(Workload::ReplicaSet),
        };
        workload.ok_or_else(|| ClusterError::NotFound(format!("{} {}/{}", kind, namespace, name)))
    }

    async fn update_workload(&self, workload: &Workload) -> Result<(), ClusterError> {
        match workload {
            Workload::Deployment(w) => self.replace(w).await,
            Workload::StatefulSet(w) => self.replace(w).await,
            Workload::DaemonSet(w) => self.replace(w).await,
            Workload::ReplicaSet(w) => self.replace(w).await,
        }
    }
}

#[async_trait::async_trait]
impl ReloaderStore for KubeClusterClient {
    async fn get_reloader(&self, namespace: &str, name: &str) -> Result<Option<ConfigReloader>, ClusterError> {
        self.get_opt::<ConfigReloader>(namespace, name).await
    }

    async fn set_finalizers(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<&str>,
        finalizers: &[String],
    ) -> Result<(), ClusterError> {
        let api: Api<ConfigReloader> = Api::namespaced(self.client.clone(), namespace);
        // A resourceVersion in a merge patch makes the API server answer 409 on a stale read
        let patch = match resource_version {
            Some(version) => json!({
                "metadata": {
                    "resourceVersion": version,
                    "finalizers": finalizers
                }
            }),
            None => json!({
                "metadata": {
                    "finalizers": finalizers
                }
            }),
        };
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
        Ok(())
    }

    async fn update_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ConfigReloaderStatus,
    ) -> Result<(), ClusterError> {
        let api: Api<ConfigReloader> = Api::namespaced(self.client.clone(), namespace);
        let status_patch = json!({
            "status": status
        });
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&status_patch))
            .await?;
        Ok(())
    }
}
