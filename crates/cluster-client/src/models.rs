//! Workload models
//!
//! The four controller kinds a pod restart can be propagated through,
//! wrapped in a single tagged union so callers can stamp pod templates
//! without caring which concrete `apps/v1` type they hold.

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use std::collections::BTreeMap;
use std::fmt;

/// Supported owning controller kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkloadKind {
    /// apps/v1 Deployment
    Deployment,
    /// apps/v1 StatefulSet
    StatefulSet,
    /// apps/v1 DaemonSet
    DaemonSet,
    /// apps/v1 ReplicaSet
    ReplicaSet,
}

impl WorkloadKind {
    /// Parse an owner reference kind; `None` for anything unsupported
    pub fn from_kind(kind: &str) -> Option<Self> {
        match kind {
            "Deployment" => Some(WorkloadKind::Deployment),
            "StatefulSet" => Some(WorkloadKind::StatefulSet),
            "DaemonSet" => Some(WorkloadKind::DaemonSet),
            "ReplicaSet" => Some(WorkloadKind::ReplicaSet),
            _ => None,
        }
    }

    /// Kubernetes kind string
    pub fn as_str(self) -> &'static str {
        match self {
            WorkloadKind::Deployment => "Deployment",
            WorkloadKind::StatefulSet => "StatefulSet",
            WorkloadKind::DaemonSet => "DaemonSet",
            WorkloadKind::ReplicaSet => "ReplicaSet",
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fetched workload object
#[derive(Debug, Clone)]
pub enum Workload {
    /// Deployment
    Deployment(Deployment),
    /// StatefulSet
    StatefulSet(StatefulSet),
    /// DaemonSet
    DaemonSet(DaemonSet),
    /// ReplicaSet
    ReplicaSet(ReplicaSet),
}

impl Workload {
    /// Kind of this workload
    pub fn kind(&self) -> WorkloadKind {
        match self {
            Workload::Deployment(_) => WorkloadKind::Deployment,
            Workload::StatefulSet(_) => WorkloadKind::StatefulSet,
            Workload::DaemonSet(_) => WorkloadKind::DaemonSet,
            Workload::ReplicaSet(_) => WorkloadKind::ReplicaSet,
        }
    }

    /// Object metadata
    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Workload::Deployment(w) => &w.metadata,
            Workload::StatefulSet(w) => &w.metadata,
            Workload::DaemonSet(w) => &w.metadata,
            Workload::ReplicaSet(w) => &w.metadata,
        }
    }

    /// Object name (empty if unset)
    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    /// Object namespace (empty if unset)
    pub fn namespace(&self) -> &str {
        self.metadata().namespace.as_deref().unwrap_or_default()
    }

    /// Owner references of the workload itself
    pub fn owner_references(&self) -> &[OwnerReference] {
        self.metadata().owner_references.as_deref().unwrap_or_default()
    }

    /// Pod template annotations, if any
    pub fn template_annotations(&self) -> Option<&BTreeMap<String, String>> {
        let template = match self {
            Workload::Deployment(w) => w.spec.as_ref().map(|s| &s.template),
            Workload::StatefulSet(w) => w.spec.as_ref().map(|s| &s.template),
            Workload::DaemonSet(w) => w.spec.as_ref().map(|s| &s.template),
            Workload::ReplicaSet(w) => w.spec.as_ref().and_then(|s| s.template.as_ref()),
        };
        template
            .and_then(|t| t.metadata.as_ref())
            .and_then(|m| m.annotations.as_ref())
    }

    /// Pod template annotations, creating the template metadata and map if absent
    pub fn template_annotations_mut(&mut self) -> &mut BTreeMap<String, String> {
        self.template_mut()
            .metadata
            .get_or_insert_with(ObjectMeta::default)
            .annotations
            .get_or_insert_with(BTreeMap::new)
    }

    fn template_mut(&mut self) -> &mut PodTemplateSpec {
        match self {
            Workload::Deployment(w) => &mut w.spec.get_or_insert_with(Default::default).template,
            Workload::StatefulSet(w) => &mut w.spec.get_or_insert_with(Default::default).template,
            Workload::DaemonSet(w) => &mut w.spec.get_or_insert_with(Default::default).template,
            Workload::ReplicaSet(w) => w
                .spec
                .get_or_insert_with(Default::default)
                .template
                .get_or_insert_with(PodTemplateSpec::default),
        }
    }
}
