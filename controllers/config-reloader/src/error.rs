//! Controller-specific error types.
//!
//! Errors returned from a reconcile pass are handed to the runtime's error
//! policy, which requeues the ConfigReloader with a Fibonacci backoff.

use cluster_client::ClusterError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the Config Reloader Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Cluster port error (ConfigMap/Secret reads, pod and workload updates, status writes)
    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    /// Kubernetes client construction or API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// A declared ConfigMap or Secret does not exist
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// The ConfigReloader's pod selector cannot be converted to a label selector
    #[error("Invalid label selector: {0}")]
    InvalidSelector(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}
