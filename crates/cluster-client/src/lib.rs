//! Cluster access for the config reloader controller
//!
//! Thin, mockable wrappers over the Kubernetes API covering exactly what the
//! reconciler needs: reading ConfigMap/Secret versions, listing and restarting
//! pods, stamping workload pod templates, and persisting ConfigReloader state.
//!
//! # Example
//!
//! ```no_run
//! use cluster_client::{ConfigStore, KubeClusterClient};
//! use crds::ResourceKind;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = KubeClusterClient::new(kube::Client::try_default().await?);
//! let version = client
//!     .resource_version(ResourceKind::ConfigMap, "default", "app-config")
//!     .await?;
//! println!("app-config is at {:?}", version);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod cluster_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::KubeClusterClient;
pub use cluster_trait::{ConfigStore, ReloaderStore, WorkloadStore};
pub use error::ClusterError;
pub use models::{Workload, WorkloadKind};
#[cfg(feature = "test-util")]
pub use mock::MockClusterClient;
