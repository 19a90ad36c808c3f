//! Event routing from ConfigMaps and Secrets to ConfigReloaders.
//!
//! When a configuration object changes, every cached ConfigReloader that
//! declares it is enqueued. This only shortens the delay before a restart;
//! the periodic requeue still catches anything the router misses.

use crds::{ConfigReloader, ResourceKind};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube_runtime::reflector::ObjectRef;
use std::sync::Arc;

/// ConfigReloaders among `reloaders` that declare the object described by `meta`
pub fn route(
    reloaders: &[Arc<ConfigReloader>],
    kind: ResourceKind,
    meta: &ObjectMeta,
) -> Vec<ObjectRef<ConfigReloader>> {
    let (Some(name), Some(namespace)) = (meta.name.as_deref(), meta.namespace.as_deref()) else {
        return Vec::new();
    };

    reloaders
        .iter()
        .filter(|reloader| reloader.watches(kind, namespace, name))
        .map(|reloader| ObjectRef::from_obj(reloader.as_ref()))
        .collect()
}
