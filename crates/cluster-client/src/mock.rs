//! Mock cluster client for unit testing
//!
//! Stores ConfigMap/Secret versions, pods, workloads and ConfigReloaders in
//! memory and records every mutation so tests can assert on what the
//! reconciler did. Individual operations can be configured to fail.

use crate::cluster_trait::{ConfigStore, ReloaderStore, WorkloadStore};
use crate::error::ClusterError;
use crate::models::{Workload, WorkloadKind};
use crds::{ConfigReloader, ConfigReloaderStatus, ResourceKind};
use k8s_openapi::api::core::v1::Pod;
use kube::core::{Selector, SelectorExt};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct MockState {
    config_versions: HashMap<(ResourceKind, String, String), String>,
    pods: Vec<Pod>,
    workloads: HashMap<(WorkloadKind, String, String), Workload>,
    reloaders: HashMap<(String, String), ConfigReloader>,

    // Recorded mutations
    deleted_pods: Vec<(String, String)>,
    updated_pods: Vec<Pod>,
    updated_workloads: Vec<Workload>,
    finalizer_updates: Vec<Vec<String>>,
    status_updates: Vec<ConfigReloaderStatus>,
    list_selectors: Vec<Option<String>>,

    // Failure injection
    fail_config_reads: bool,
    fail_list_pods: bool,
    fail_status_updates: bool,
    fail_pod_deletes: HashSet<String>,
    fail_pod_updates: HashSet<String>,
    fail_workload_updates: HashSet<String>,
}

/// Mock cluster client for testing
///
/// Cloning shares the underlying state, so a test can hand a clone to the
/// reconciler and inspect the original afterwards.
#[derive(Debug, Clone, Default)]
pub struct MockClusterClient {
    state: Arc<Mutex<MockState>>,
}

fn pod_key(pod: &Pod) -> (String, String) {
    (
        pod.metadata.namespace.clone().unwrap_or_default(),
        pod.metadata.name.clone().unwrap_or_default(),
    )
}

// Numeric versions advance on every write, like the API server's
fn bump_version(version: Option<&str>) -> Option<String> {
    version
        .and_then(|v| v.parse::<u64>().ok())
        .map(|v| (v + 1).to_string())
}

impl MockClusterClient {
    /// Create an empty mock cluster
    pub fn new() -> Self {
        Self::default()
    }

    /// Set (or bump) the resourceVersion of a ConfigMap or Secret
    pub fn set_config_version(&self, kind: ResourceKind, namespace: &str, name: &str, version: &str) {
        self.state.lock().unwrap().config_versions.insert(
            (kind, namespace.to_string(), name.to_string()),
            version.to_string(),
        );
    }

    /// Add a pod (list order follows insertion order)
    pub fn add_pod(&self, pod: Pod) {
        self.state.lock().unwrap().pods.push(pod);
    }

    /// Add a workload
    pub fn add_workload(&self, workload: Workload) {
        let key = (
            workload.kind(),
            workload.namespace().to_string(),
            workload.name().to_string(),
        );
        self.state.lock().unwrap().workloads.insert(key, workload);
    }

    /// Add or overwrite a ConfigReloader
    pub fn add_reloader(&self, reloader: ConfigReloader) {
        let key = (
            reloader.metadata.namespace.clone().unwrap_or_default(),
            reloader.metadata.name.clone().unwrap_or_default(),
        );
        self.state.lock().unwrap().reloaders.insert(key, reloader);
    }

    /// Current stored copy of a ConfigReloader
    pub fn reloader(&self, namespace: &str, name: &str) -> Option<ConfigReloader> {
        self.state
            .lock()
            .unwrap()
            .reloaders
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Current stored copy of a workload
    pub fn workload(&self, kind: WorkloadKind, namespace: &str, name: &str) -> Option<Workload> {
        self.state
            .lock()
            .unwrap()
            .workloads
            .get(&(kind, namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Pods deleted so far as `(namespace, name)`
    pub fn deleted_pods(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().deleted_pods.clone()
    }

    /// Pods replaced so far, in call order
    pub fn updated_pods(&self) -> Vec<Pod> {
        self.state.lock().unwrap().updated_pods.clone()
    }

    /// Workloads replaced so far, in call order
    pub fn updated_workloads(&self) -> Vec<Workload> {
        self.state.lock().unwrap().updated_workloads.clone()
    }

    /// Every finalizer list written, in call order
    pub fn finalizer_updates(&self) -> Vec<Vec<String>> {
        self.state.lock().unwrap().finalizer_updates.clone()
    }

    /// Every status written, in call order
    pub fn status_updates(&self) -> Vec<ConfigReloaderStatus> {
        self.state.lock().unwrap().status_updates.clone()
    }

    /// Label selectors passed to `list_pods`, rendered as strings
    pub fn list_selectors(&self) -> Vec<Option<String>> {
        self.state.lock().unwrap().list_selectors.clone()
    }

    /// Make every ConfigMap/Secret read fail
    pub fn fail_config_reads(&self) {
        self.state.lock().unwrap().fail_config_reads = true;
    }

    /// Make `list_pods` fail
    pub fn fail_list_pods(&self) {
        self.state.lock().unwrap().fail_list_pods = true;
    }

    /// Make status updates fail
    pub fn fail_status_updates(&self) {
        self.state.lock().unwrap().fail_status_updates = true;
    }

    /// Make deleting the named pod fail
    pub fn fail_pod_delete(&self, name: &str) {
        self.state.lock().unwrap().fail_pod_deletes.insert(name.to_string());
    }

    /// Make replacing the named pod fail
    pub fn fail_pod_update(&self, name: &str) {
        self.state.lock().unwrap().fail_pod_updates.insert(name.to_string());
    }

    /// Make replacing the named workload fail
    pub fn fail_workload_update(&self, name: &str) {
        self.state.lock().unwrap().fail_workload_updates.insert(name.to_string());
    }
}

#[async_trait::async_trait]
impl ConfigStore for MockClusterClient {
    async fn resource_version(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<String>, ClusterError> {
        let state = self.state.lock().unwrap();
        if state.fail_config_reads {
            return Err(ClusterError::Api(format!("injected read failure for {} {}/{}", kind, namespace, name)));
        }
        Ok(state
            .config_versions
            .get(&(kind, namespace.to_string(), name.to_string()))
            .cloned())
    }
}

#[async_trait::async_trait]
impl WorkloadStore for MockClusterClient {
    async fn list_pods(&self, namespace: &str, selector: Option<&Selector>) -> Result<Vec<Pod>, ClusterError> {
        let mut state = self.state.lock().unwrap();
        state.list_selectors.push(selector.map(ToString::to_string));
        if state.fail_list_pods {
            return Err(ClusterError::Api("injected list failure".to_string()));
        }
        let empty = Default::default();
        Ok(state
            .pods
            .iter()
            .filter(|pod| pod.metadata.namespace.as_deref() == Some(namespace))
            .filter(|pod| {
                selector.is_none_or(|s| s.matches(pod.metadata.labels.as_ref().unwrap_or(&empty)))
            })
            .cloned()
            .collect())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_pod_deletes.contains(name) {
            return Err(ClusterError::Api(format!("injected delete failure for pod {}", name)));
        }
        let key = (namespace.to_string(), name.to_string());
        let before = state.pods.len();
        state.pods.retain(|pod| pod_key(pod) != key);
        if state.pods.len() == before {
            return Err(ClusterError::NotFound(format!("Pod {}/{}", namespace, name)));
        }
        state.deleted_pods.push(key);
        Ok(())
    }

    async fn update_pod(&self, pod: &Pod) -> Result<(), ClusterError> {
        let mut state = self.state.lock().unwrap();
        let key = pod_key(pod);
        if state.fail_pod_updates.contains(&key.1) {
            return Err(ClusterError::Api(format!("injected update failure for pod {}", key.1)));
        }
        match state.pods.iter_mut().find(|p| pod_key(p) == key) {
            Some(existing) => *existing = pod.clone(),
            None => return Err(ClusterError::NotFound(format!("Pod {}/{}", key.0, key.1))),
        }
        state.updated_pods.push(pod.clone());
        Ok(())
    }

    async fn get_workload(&self, kind: WorkloadKind, namespace: &str, name: &str) -> Result<Workload, ClusterError> {
        self.state
            .lock()
            .unwrap()
            .workloads
            .get(&(kind, namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(format!("{} {}/{}", kind, namespace, name)))
    }

    async fn update_workload(&self, workload: &Workload) -> Result<(), ClusterError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_workload_updates.contains(workload.name()) {
            return Err(ClusterError::Api(format!(
                "injected update failure for {} {}",
                workload.kind(),
                workload.name()
            )));
        }
        let key = (
            workload.kind(),
            workload.namespace().to_string(),
            workload.name().to_string(),
        );
        if !state.workloads.contains_key(&key) {
            return Err(ClusterError::NotFound(format!("{} {}/{}", key.0, key.1, key.2)));
        }
        state.workloads.insert(key, workload.clone());
        state.updated_workloads.push(workload.clone());
        Ok(())
    }
}

#[async_trait::async_trait]
impl ReloaderStore for MockClusterClient {
    async fn get_reloader(&self, namespace: &str, name: &str) -> Result<Option<ConfigReloader>, ClusterError> {
        Ok(self.reloader(namespace, name))
    }

    async fn set_finalizers(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<&str>,
        finalizers: &[String],
    ) -> Result<(), ClusterError> {
        let mut state = self.state.lock().unwrap();
        let reloader = state
            .reloaders
            .get_mut(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| ClusterError::NotFound(format!("ConfigReloader {}/{}", namespace, name)))?;
        if resource_version.is_some() && resource_version != reloader.metadata.resource_version.as_deref() {
            return Err(ClusterError::Api(format!(
                "conflict: ConfigReloader {}/{} has been modified",
                namespace, name
            )));
        }
        reloader.metadata.finalizers = Some(finalizers.to_vec());
        reloader.metadata.resource_version = bump_version(reloader.metadata.resource_version.as_deref());
        state.finalizer_updates.push(finalizers.to_vec());
        Ok(())
    }

    async fn update_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ConfigReloaderStatus,
    ) -> Result<(), ClusterError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_status_updates {
            return Err(ClusterError::Api("injected status update failure".to_string()));
        }
        let reloader = state
            .reloaders
            .get_mut(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| ClusterError::NotFound(format!("ConfigReloader {}/{}", namespace, name)))?;
        reloader.status = Some(status.clone());
        state.status_updates.push(status.clone());
        Ok(())
    }
}
