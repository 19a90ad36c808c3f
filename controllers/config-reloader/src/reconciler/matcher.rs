//! Pod-usage matching
//!
//! Decides whether a pod consumes any watched ConfigMap or Secret through
//! its volumes or its containers' environment.

use crds::{ConfigReloader, ResourceKind};
use k8s_openapi::api::core::v1::{Container, Pod, Volume};
use std::collections::HashSet;

/// `namespace/name` keys of the declared ConfigMaps and Secrets
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchedKeys {
    config_maps: HashSet<String>,
    secrets: HashSet<String>,
}

impl WatchedKeys {
    /// Build the key sets from a ConfigReloader, resolving empty namespaces
    /// to the ConfigReloader's own namespace
    pub fn from_reloader(reloader: &ConfigReloader) -> Self {
        let mut keys = Self::default();
        for reference in reloader.declared_references() {
            match reference.kind {
                ResourceKind::ConfigMap => keys.config_maps.insert(reference.key()),
                ResourceKind::Secret => keys.secrets.insert(reference.key()),
            };
        }
        keys
    }

    fn config_map(&self, namespace: &str, name: &str) -> bool {
        self.config_maps.contains(&format!("{}/{}", namespace, name))
    }

    fn secret(&self, namespace: &str, name: &str) -> bool {
        self.secrets.contains(&format!("{}/{}", namespace, name))
    }
}

/// Whether `pod` references any watched resource.
///
/// Names are looked up in the pod's own namespace, so a pod never matches a
/// reference that lives in another namespace. Volumes are checked first,
/// then `envFrom`, then `env[].valueFrom`; init containers after regular
/// containers.
pub fn matches(pod: &Pod, watched: &WatchedKeys) -> bool {
    let Some(spec) = pod.spec.as_ref() else {
        return false;
    };
    let namespace = pod.metadata.namespace.as_deref().unwrap_or_default();

    if spec
        .volumes
        .iter()
        .flatten()
        .any(|volume| volume_matches(volume, namespace, watched))
    {
        return true;
    }

    spec.containers
        .iter()
        .chain(spec.init_containers.iter().flatten())
        .any(|container| container_matches(container, namespace, watched))
}

fn volume_matches(volume: &Volume, namespace: &str, watched: &WatchedKeys) -> bool {
    if let Some(cm) = &volume.config_map {
        if watched.config_map(namespace, &cm.name) {
            return true;
        }
    }

    if let Some(name) = volume.secret.as_ref().and_then(|s| s.secret_name.as_deref()) {
        if watched.secret(namespace, name) {
            return true;
        }
    }

    let projections = volume
        .projected
        .as_ref()
        .and_then(|p| p.sources.as_ref())
        .into_iter()
        .flatten();
    for projection in projections {
        if projection
            .config_map
            .as_ref()
            .is_some_and(|cm| watched.config_map(namespace, &cm.name))
        {
            return true;
        }
        if projection
            .secret
            .as_ref()
            .is_some_and(|s| watched.secret(namespace, &s.name))
        {
            return true;
        }
    }

    false
}

fn container_matches(container: &Container, namespace: &str, watched: &WatchedKeys) -> bool {
    for env_from in container.env_from.iter().flatten() {
        if env_from
            .config_map_ref
            .as_ref()
            .is_some_and(|cm| watched.config_map(namespace, &cm.name))
        {
            return true;
        }
        if env_from
            .secret_ref
            .as_ref()
            .is_some_and(|s| watched.secret(namespace, &s.name))
        {
            return true;
        }
    }

    for source in container.env.iter().flatten().filter_map(|env| env.value_from.as_ref()) {
        if source
            .config_map_key_ref
            .as_ref()
            .is_some_and(|cm| watched.config_map(namespace, &cm.name))
        {
            return true;
        }
        if source
            .secret_key_ref
            .as_ref()
            .is_some_and(|s| watched.secret(namespace, &s.name))
        {
            return true;
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use crds::ResourceRef;
    use k8s_openapi::api::core::v1::{
        ConfigMapKeySelector, ConfigMapProjection, EnvFromSource, EnvVar, EnvVarSource,
        ProjectedVolumeSource, SecretEnvSource, SecretKeySelector, VolumeProjection,
    };

    fn watched(namespace: &str, config_maps: &[&str], secrets: &[&str]) -> WatchedKeys {
        let reloader = create_test_reloader(
            "reloader",
            namespace,
            config_maps.iter().map(|n| ResourceRef::new(*n)).collect(),
            secrets.iter().map(|n| ResourceRef::new(*n)).collect(),
        );
        WatchedKeys::from_reloader(&reloader)
    }

    #[test]
    fn test_env_from_secret_matches_only_in_same_namespace() {
        let env_from = EnvFromSource {
            secret_ref: Some(SecretEnvSource {
                name: "db-creds".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        };
        let keys = watched("ns", &[], &["db-creds"]);

        let pod = with_containers(create_test_pod("api", "ns"), vec![container_with_env_from(env_from.clone())]);
        assert!(matches(&pod, &keys));

        let pod = with_containers(create_test_pod("api", "ns2"), vec![container_with_env_from(env_from)]);
        assert!(!matches(&pod, &keys));
    }

    #[test]
    fn test_config_map_volume_matches() {
        let keys = watched("ns", &["app-config"], &[]);
        let pod = with_config_map_volume(create_test_pod("web", "ns"), "app-config");
        assert!(matches(&pod, &keys));

        let pod = with_config_map_volume(create_test_pod("web", "ns"), "other-config");
        assert!(!matches(&pod, &keys));
    }

    #[test]
    fn test_kinds_are_not_interchangeable() {
        // A ConfigMap named like a watched Secret does not match
        let keys = watched("ns", &[], &["shared"]);
        let pod = with_config_map_volume(create_test_pod("web", "ns"), "shared");
        assert!(!matches(&pod, &keys));
    }

    #[test]
    fn test_secret_volume_matches() {
        let keys = watched("ns", &[], &["tls"]);
        let pod = with_secret_volume(create_test_pod("web", "ns"), "tls");
        assert!(matches(&pod, &keys));
    }

    #[test]
    fn test_projected_volume_sources_match() {
        let keys = watched("ns", &["bundle"], &[]);
        let mut pod = create_test_pod("web", "ns");
        pod.spec.get_or_insert_with(Default::default).volumes = Some(vec![Volume {
            name: "projected".to_string(),
            projected: Some(ProjectedVolumeSource {
                sources: Some(vec![VolumeProjection {
                    config_map: Some(ConfigMapProjection {
                        name: "bundle".to_string(),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }]);
        assert!(matches(&pod, &keys));
    }

    #[test]
    fn test_env_value_from_key_refs_match() {
        let keys = watched("ns", &["flags"], &["token"]);

        let cm_env = Container {
            name: "app".to_string(),
            env: Some(vec![EnvVar {
                name: "FLAG".to_string(),
                value_from: Some(EnvVarSource {
                    config_map_key_ref: Some(ConfigMapKeySelector {
                        name: "flags".to_string(),
                        key: "flag".to_string(),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ..Default::default()
        };
        let pod = with_containers(create_test_pod("web", "ns"), vec![cm_env]);
        assert!(matches(&pod, &keys));

        let secret_env = Container {
            name: "app".to_string(),
            env: Some(vec![EnvVar {
                name: "TOKEN".to_string(),
                value_from: Some(EnvVarSource {
                    secret_key_ref: Some(SecretKeySelector {
                        name: "token".to_string(),
                        key: "value".to_string(),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ..Default::default()
        };
        let pod = with_containers(create_test_pod("web", "ns"), vec![secret_env]);
        assert!(matches(&pod, &keys));
    }

    #[test]
    fn test_init_containers_are_checked() {
        let keys = watched("ns", &[], &["bootstrap"]);
        let mut pod = with_containers(create_test_pod("web", "ns"), vec![Container {
            name: "app".to_string(),
            ..Default::default()
        }]);
        pod.spec.get_or_insert_with(Default::default).init_containers =
            Some(vec![container_with_env_from(EnvFromSource {
                secret_ref: Some(SecretEnvSource {
                    name: "bootstrap".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            })]);
        assert!(matches(&pod, &keys));
    }

    #[test]
    fn test_pod_without_references_never_matches() {
        let keys = watched("ns", &["app-config"], &["db-creds"]);
        let pod = with_containers(create_test_pod("web", "ns"), vec![Container {
            name: "app".to_string(),
            ..Default::default()
        }]);
        assert!(!matches(&pod, &keys));

        let mut no_spec = create_test_pod("web", "ns");
        no_spec.spec = None;
        assert!(!matches(&no_spec, &keys));
    }

    #[test]
    fn test_explicit_reference_namespace_is_honoured() {
        let reloader = create_test_reloader(
            "reloader",
            "apps",
            vec![ResourceRef::with_namespace("shared-config", "shared")],
            vec![],
        );
        let keys = WatchedKeys::from_reloader(&reloader);

        let pod = with_config_map_volume(create_test_pod("web", "shared"), "shared-config");
        assert!(matches(&pod, &keys));

        let pod = with_config_map_volume(create_test_pod("web", "apps"), "shared-config");
        assert!(!matches(&pod, &keys));
    }
}
