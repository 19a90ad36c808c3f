//! ConfigReloader CRD
//!
//! Declares which ConfigMaps and Secrets to watch and how the pods that
//! consume them are restarted when they change.

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Finalizer added to every ConfigReloader on first reconcile
pub const CONFIG_RELOADER_FINALIZER: &str = "config.dev/finalizer";

/// Annotation written directly onto standalone pods
pub const RELOAD_ANNOTATION: &str = "config.dev/last-reload";

/// Prefix of the pod-template annotation that triggers a rolling update.
/// The full key is suffixed with the unix seconds of the reconcile pass.
pub const RESTART_ANNOTATION_PREFIX: &str = "config.dev/restarted-at-";

/// Maximum number of entries kept in `status.podsRestarted`
pub const MAX_POD_RESTART_HISTORY: usize = 10;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "config.dev",
    version = "v1",
    kind = "ConfigReloader",
    namespaced,
    status = "ConfigReloaderStatus",
    shortname = "cr",
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Last Reload","type":"string","jsonPath":".status.lastReloadTime"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ConfigReloaderSpec {
    /// ConfigMaps to watch for changes
    #[serde(default)]
    pub config_maps: Vec<ResourceRef>,

    /// Secrets to watch for changes
    #[serde(default)]
    pub secrets: Vec<ResourceRef>,

    /// Selector for pods to restart when config changes (all pods in the namespace if absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<PodSelector>,

    /// How matching pods are restarted
    #[serde(default)]
    pub restart_policy: RestartPolicy,

    /// Ignore pods that are owned by controllers.
    /// Accepted by the schema but not yet consulted by the restart logic.
    #[serde(default)]
    pub ignore_owner_references: bool,
}

/// Reference to a ConfigMap or Secret
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    /// Name of the resource
    pub name: String,

    /// Namespace (defaults to same namespace as the ConfigReloader)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ResourceRef {
    /// Create a reference in the ConfigReloader's own namespace
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
        }
    }

    /// Create a reference with an explicit namespace
    pub fn with_namespace(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: Some(namespace.into()),
        }
    }

    /// Namespace of the reference, falling back to `default_namespace` when unset or empty
    pub fn resolved_namespace<'a>(&'a self, default_namespace: &'a str) -> &'a str {
        match self.namespace.as_deref() {
            Some(ns) if !ns.is_empty() => ns,
            _ => default_namespace,
        }
    }
}

/// Pod restart strategy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RestartPolicy {
    /// Stamp the owning controller's pod template to trigger a rolling update
    #[default]
    Annotation,

    /// Delete matching pods directly
    Delete,
}

/// Label selector in the Kubernetes `LabelSelector` shape
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PodSelector {
    /// Exact label matches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_labels: Option<BTreeMap<String, String>>,

    /// Set-based requirements
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_expressions: Option<Vec<PodSelectorRequirement>>,
}

/// Single set-based selector requirement
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PodSelectorRequirement {
    /// Label key
    pub key: String,

    /// One of `In`, `NotIn`, `Exists`, `DoesNotExist`
    pub operator: String,

    /// Values for `In` / `NotIn`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<String>>,
}

impl From<&PodSelector> for LabelSelector {
    fn from(selector: &PodSelector) -> Self {
        LabelSelector {
            match_labels: selector.match_labels.clone(),
            match_expressions: selector.match_expressions.as_ref().map(|exprs| {
                exprs
                    .iter()
                    .map(|req| LabelSelectorRequirement {
                        key: req.key.clone(),
                        operator: req.operator.clone(),
                        values: req.values.clone(),
                    })
                    .collect()
            }),
        }
    }
}

/// Kind of a watched configuration resource
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    /// core/v1 ConfigMap
    ConfigMap,

    /// core/v1 Secret
    Secret,
}

impl ResourceKind {
    /// Kubernetes kind string
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::ConfigMap => "ConfigMap",
            ResourceKind::Secret => "Secret",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A declared reference with its namespace already resolved
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeclaredReference {
    /// ConfigMap or Secret
    pub kind: ResourceKind,
    /// Resolved namespace
    pub namespace: String,
    /// Resource name
    pub name: String,
}

impl DeclaredReference {
    /// `namespace/name` lookup key
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

impl fmt::Display for DeclaredReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

impl ConfigReloader {
    /// Namespace of this ConfigReloader
    pub fn target_namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or("default")
    }

    /// All declared references, ConfigMaps first then Secrets, in declaration order
    pub fn declared_references(&self) -> Vec<DeclaredReference> {
        let namespace = self.target_namespace();
        let config_maps = self.spec.config_maps.iter().map(|r| DeclaredReference {
            kind: ResourceKind::ConfigMap,
            namespace: r.resolved_namespace(namespace).to_string(),
            name: r.name.clone(),
        });
        let secrets = self.spec.secrets.iter().map(|r| DeclaredReference {
            kind: ResourceKind::Secret,
            namespace: r.resolved_namespace(namespace).to_string(),
            name: r.name.clone(),
        });
        config_maps.chain(secrets).collect()
    }

    /// Whether this ConfigReloader declares the given resource
    pub fn watches(&self, kind: ResourceKind, namespace: &str, name: &str) -> bool {
        self.declared_references()
            .iter()
            .any(|r| r.kind == kind && r.namespace == namespace && r.name == name)
    }

    /// Whether the finalizer is present
    pub fn has_finalizer(&self) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| f.iter().any(|name| name == CONFIG_RELOADER_FINALIZER))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigReloaderStatus {
    /// Latest available observations
    #[serde(default)]
    pub conditions: Vec<ReloaderCondition>,

    /// When the last reload occurred
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reload_time: Option<DateTime<Utc>>,

    /// Currently watched ConfigMaps and Secrets
    #[serde(default)]
    pub watched_resources: Vec<WatchedResource>,

    /// Recently restarted pods (most recent last)
    #[serde(default)]
    pub pods_restarted: Vec<PodRestart>,
}

/// A resource being watched, with the last seen version
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WatchedResource {
    /// ConfigMap or Secret
    pub kind: ResourceKind,

    /// Name of the resource
    pub name: String,

    /// Namespace of the resource
    pub namespace: String,

    /// Last seen resourceVersion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,

    /// When this entry was last refreshed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<DateTime<Utc>>,
}

/// A pod restart event
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PodRestart {
    /// Pod that was restarted
    pub pod_name: String,

    /// Namespace of the pod
    pub namespace: String,

    /// When the restart occurred
    pub restart_time: DateTime<Utc>,

    /// Reason for the restart
    pub reason: String,
}

/// Status condition following Kubernetes API conventions
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReloaderCondition {
    /// Condition type (e.g. "Ready")
    #[serde(rename = "type")]
    pub type_: String,

    /// True, False or Unknown
    pub status: ConditionStatus,

    /// Machine-readable reason
    pub reason: String,

    /// Human-readable message
    #[serde(default)]
    pub message: String,

    /// Last time the status changed
    pub last_transition_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
/// Condition status
pub enum ConditionStatus {
    /// Condition holds
    True,
    /// Condition does not hold
    False,
    /// Not yet determined
    #[default]
    Unknown,
}
