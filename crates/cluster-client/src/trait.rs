//! Ports used by the reconciler
//!
//! These traits abstract the Kubernetes API so the reconciliation logic can be
//! exercised against an in-memory mock in unit tests.
//! All async methods must be `Send` to work with Tokio's work-stealing runtime.

use crate::error::ClusterError;
use crate::models::{Workload, WorkloadKind};
use crds::{ConfigReloader, ConfigReloaderStatus, ResourceKind};
use k8s_openapi::api::core::v1::Pod;
use kube::core::Selector;

/// Read access to configuration sources (ConfigMaps and Secrets)
#[async_trait::async_trait]
pub trait ConfigStore: Send + Sync {
    /// Current resourceVersion of a ConfigMap or Secret.
    ///
    /// Returns `Ok(None)` when the object does not exist.
    async fn resource_version(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<String>, ClusterError>;
}

/// Pod and workload operations needed to restart consumers
#[async_trait::async_trait]
pub trait WorkloadStore: Send + Sync {
    /// List pods in a namespace, optionally filtered by a label selector
    async fn list_pods(&self, namespace: &str, selector: Option<&Selector>) -> Result<Vec<Pod>, ClusterError>;

    /// Delete a pod
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;

    /// Replace a pod (used for annotation updates)
    async fn update_pod(&self, pod: &Pod) -> Result<(), ClusterError>;

    /// Fetch a workload; `ClusterError::NotFound` if it does not exist
    async fn get_workload(&self, kind: WorkloadKind, namespace: &str, name: &str) -> Result<Workload, ClusterError>;

    /// Replace a workload
    async fn update_workload(&self, workload: &Workload) -> Result<(), ClusterError>;
}

/// Persistence of the ConfigReloader objects themselves
#[async_trait::async_trait]
pub trait ReloaderStore: Send + Sync {
    /// Fetch a ConfigReloader; `Ok(None)` if it no longer exists
    async fn get_reloader(&self, namespace: &str, name: &str) -> Result<Option<ConfigReloader>, ClusterError>;

    /// Overwrite `metadata.finalizers`.
    ///
    /// With `resource_version` set the write is rejected if the object changed
    /// since it was read, so finalizers added concurrently are never dropped.
    async fn set_finalizers(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<&str>,
        finalizers: &[String],
    ) -> Result<(), ClusterError>;

    /// Write the status subresource
    async fn update_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ConfigReloaderStatus,
    ) -> Result<(), ClusterError>;
}
