//! Reads namespace/pod/configmap/FluentdConfig state from a live cluster.
//!
//! Mirrors the three historical discovery strategies as one
//! [`DiscoveryMode`]: a single annotation-named ConfigMap, a label-selected
//! set of ConfigMaps ("multimap"), or the `FluentdConfig` CRD -- with an
//! optional migration mode that reads both the CRD and the legacy ConfigMap
//! and concatenates them.

pub mod notify;

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use api::v1beta1::FluentdConfig;
use async_trait::async_trait;
use futures::TryStreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Pod};
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::runtime::watcher::{self, Event};
use tracing::{debug, info, warn};

use pipeline::{ContainerInfo, Mount};

use crate::kubernetes::notify::ChangeNotifier;
use crate::{Datasource, DatasourceError, NamespaceConfig, Result};

const ENTRY_NAME: &str = "fluent.conf";
const FIELD_MANAGER: &str = "kube-fluentd-operator";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryMode {
    /// Single ConfigMap named by an annotation, falling back to a default name.
    ConfigMap,
    /// All ConfigMaps in the namespace matching a cluster-wide label selector.
    Multimap,
    /// `FluentdConfig` custom resources only.
    Crd,
    /// Both the CRD and the annotation-named ConfigMap, concatenated.
    MigrationMode,
}

#[derive(Debug, Clone)]
pub struct KubernetesDatasourceConfig {
    pub mode: DiscoveryMode,
    pub annot_configmap_name: String,
    pub annot_status: Option<String>,
    pub default_configmap_name: Option<String>,
    pub label_selector: BTreeMap<String, String>,
    pub namespaces: Vec<String>,
}

struct NamespaceNotConfigured;

pub struct KubernetesDatasource {
    client: kube::Client,
    config: KubernetesDatasourceConfig,
    hashes: Mutex<HashMap<String, String>>,
}

impl KubernetesDatasource {
    pub fn new(client: kube::Client, config: KubernetesDatasourceConfig) -> Self {
        KubernetesDatasource {
            client,
            config,
            hashes: Mutex::new(HashMap::new()),
        }
    }

    /// Spawns background watchers for every resource kind this mode reads,
    /// notifying `notifier` (non-blocking, coalescing) on any change.
    pub fn watch_for_changes(&self, notifier: ChangeNotifier) {
        let client = self.client.clone();
        watch_kind::<Namespace>(client.clone(), notifier.clone());
        watch_kind::<Pod>(client.clone(), notifier.clone());
        match self.config.mode {
            DiscoveryMode::ConfigMap | DiscoveryMode::Multimap => {
                watch_kind::<ConfigMap>(client, notifier);
            }
            DiscoveryMode::Crd => {
                watch_kind::<FluentdConfig>(client, notifier);
            }
            DiscoveryMode::MigrationMode => {
                watch_kind::<ConfigMap>(client.clone(), notifier.clone());
                watch_kind::<FluentdConfig>(client, notifier);
            }
        }
    }

    fn discover_namespace_names(&self, all: &[Namespace]) -> Vec<String> {
        if !self.config.namespaces.is_empty() {
            let mut wanted = self.config.namespaces.clone();
            wanted.sort();
            return wanted;
        }
        let mut names: Vec<String> = all.iter().filter_map(|ns| ns.metadata.name.clone()).collect();
        names.sort();
        names
    }

    fn detect_configmap_name(&self, ns: &Namespace) -> std::result::Result<String, NamespaceNotConfigured> {
        let annotated = ns
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(&self.config.annot_configmap_name))
            .cloned();
        if let Some(name) = annotated.filter(|n| !n.is_empty()) {
            return Ok(name);
        }
        if let Some(default) = self.config.default_configmap_name.clone().filter(|n| !n.is_empty()) {
            debug!(name = default, "using default configmap name");
            return Ok(default);
        }
        Err(NamespaceNotConfigured)
    }

    async fn read_configmap_contents(&self, ns: &str, name: &str) -> Result<String> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), ns);
        let cm = match api.get_opt(name).await? {
            Some(cm) => cm,
            None => return Ok(String::new()),
        };
        Ok(cm.data.and_then(|d| d.get(ENTRY_NAME).cloned()).unwrap_or_default())
    }

    async fn read_multimap_contents(&self, ns: &str) -> Result<String> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), ns);
        let maps = api.list(&ListParams::default()).await?;

        let mut parts = Vec::new();
        for cm in maps.items {
            let matches = cm
                .metadata
                .labels
                .as_ref()
                .is_some_and(|labels| self.config.label_selector.iter().all(|(k, v)| labels.get(k) == Some(v)));
            if !matches {
                continue;
            }
            if let Some(data) = cm.data.as_ref().and_then(|d| d.get(ENTRY_NAME)) {
                parts.push(data.clone());
            } else {
                warn!(namespace = ns, configmap = cm.metadata.name, "missing fluent.conf entry");
            }
        }
        Ok(parts.join("\n"))
    }

    async fn read_crd_contents(&self, ns: &str) -> Result<String> {
        let api: Api<FluentdConfig> = Api::namespaced(self.client.clone(), ns);
        let list = api.list(&ListParams::default()).await?;
        Ok(list
            .items
            .into_iter()
            .map(|fc| fc.spec.fluentconf)
            .collect::<Vec<_>>()
            .join("\n"))
    }

    async fn fluentd_config_for(&self, ns: &Namespace, name: &str) -> Result<(String, bool)> {
        let (raw, known) = match self.config.mode {
            DiscoveryMode::ConfigMap => match self.detect_configmap_name(ns) {
                Ok(cm_name) => (self.read_configmap_contents(name, &cm_name).await?, true),
                Err(NamespaceNotConfigured) => {
                    debug!(namespace = name, "not annotated with a configmap name");
                    (String::new(), false)
                }
            },
            DiscoveryMode::Multimap => (self.read_multimap_contents(name).await?, true),
            DiscoveryMode::Crd => (self.read_crd_contents(name).await?, true),
            DiscoveryMode::MigrationMode => {
                let crd_part = self.read_crd_contents(name).await?;
                let cm_part = match self.detect_configmap_name(ns) {
                    Ok(cm_name) => self.read_configmap_contents(name, &cm_name).await?,
                    Err(NamespaceNotConfigured) => String::new(),
                };
                (format!("{cm_part}\n{crd_part}"), true)
            }
        };

        Ok((render_placeholders(&raw, name)?, known))
    }

    async fn containers_for(&self, ns: &str) -> Result<Vec<ContainerInfo>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), ns);
        let pods = api.list(&ListParams::default()).await?;
        Ok(pods_to_containers(pods.items))
    }
}

#[async_trait]
impl Datasource for KubernetesDatasource {
    async fn get_namespaces(&self) -> Result<Vec<NamespaceConfig>> {
        let ns_api: Api<Namespace> = Api::all(self.client.clone());
        let all_namespaces = ns_api.list(&ListParams::default()).await?.items;
        let wanted = self.discover_namespace_names(&all_namespaces);

        let mut result = Vec::with_capacity(wanted.len());
        for name in wanted {
            let ns = match all_namespaces.iter().find(|n| n.metadata.name.as_deref() == Some(name.as_str())) {
                Some(ns) => ns.clone(),
                None => match ns_api.get_opt(&name).await? {
                    Some(ns) => ns,
                    None => {
                        warn!(namespace = name, "namespace vanished between list and read");
                        continue;
                    }
                },
            };

            let (fluentd_config, is_known_from_before) = self.fluentd_config_for(&ns, &name).await?;
            let containers = self.containers_for(&name).await?;
            let namespace_labels = ns.metadata.labels.clone().unwrap_or_default().into_iter().collect();

            result.push(NamespaceConfig {
                name: name.clone(),
                fluentd_config,
                previous_config_hash: self.hashes.lock().unwrap().get(&name).cloned(),
                is_known_from_before,
                namespace_labels,
                containers,
            });
        }

        Ok(result)
    }

    fn write_current_config_hash(&self, namespace: &str, hash: &str) {
        self.hashes.lock().unwrap().insert(namespace.to_string(), hash.to_string());
    }

    async fn update_status(&self, namespace: &str, status: &str) -> Result<()> {
        let Some(annot_status) = self.config.annot_status.as_ref().filter(|s| !s.is_empty()) else {
            return Ok(());
        };

        let api: Api<Namespace> = Api::all(self.client.clone());
        let patch = if status.is_empty() {
            serde_json::json!({ "metadata": { "annotations": { annot_status: serde_json::Value::Null } } })
        } else {
            serde_json::json!({ "metadata": { "annotations": { annot_status: status } } })
        };

        api.patch(
            namespace,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await?;
        Ok(())
    }
}

fn watch_kind<K>(client: kube::Client, notifier: ChangeNotifier)
where
    K: kube::Resource<DynamicType = ()> + Clone + std::fmt::Debug + serde::de::DeserializeOwned + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let api: Api<K> = Api::all(client);
        let mut stream = std::pin::pin!(watcher::watcher(api, watcher::Config::default()));
        loop {
            match stream.try_next().await {
                Ok(Some(Event::Apply(_) | Event::Delete(_))) => notifier.notify(),
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(err) => {
                    warn!(%err, "watch stream error");
                }
            }
        }
    });
}

/// Renders `{{ namespace }}`-style placeholders in a tenant's raw fragment
/// text before parsing. The only lookup exposed is the tenant's own
/// namespace -- there is no general Kubernetes object access here.
fn render_placeholders(raw: &str, namespace: &str) -> Result<String> {
    if !raw.contains("{{") {
        return Ok(raw.to_string());
    }
    let mut ctx = tera::Context::new();
    ctx.insert("namespace", namespace);
    tera::Tera::one_off(raw, &ctx, false).map_err(|err| DatasourceError::new(err.to_string()))
}

/// Only emptyDir-backed volumes are retained, sorted by mount-path length,
/// descending, so the longest prefix match is always checked first.
fn pods_to_containers(pods: Vec<Pod>) -> Vec<ContainerInfo> {
    let mut result = Vec::new();

    for pod in pods {
        let Some(spec) = pod.spec.as_ref() else { continue };
        let pod_id = pod.metadata.uid.clone().unwrap_or_default();
        let pod_name = pod.metadata.name.clone().unwrap_or_default();
        let pod_labels: BTreeMap<String, String> = pod.metadata.labels.clone().unwrap_or_default().into_iter().collect();
        let host = spec.node_name.clone().unwrap_or_default();

        let empty_dir_volumes: std::collections::HashSet<String> = spec
            .volumes
            .iter()
            .flatten()
            .filter(|v| v.empty_dir.is_some())
            .map(|v| v.name.clone())
            .collect();

        let statuses: HashMap<String, String> = pod
            .status
            .as_ref()
            .and_then(|s| s.container_statuses.clone())
            .unwrap_or_default()
            .into_iter()
            .map(|cs| (cs.name, cs.container_id.unwrap_or_default()))
            .collect();

        for container in &spec.containers {
            let mut host_mounts: Vec<Mount> = container
                .volume_mounts
                .iter()
                .flatten()
                .filter(|vm| empty_dir_volumes.contains(&vm.name))
                .map(|vm| Mount {
                    path: vm.mount_path.clone(),
                    volume_name: vm.name.clone(),
                })
                .collect();
            if host_mounts.is_empty() {
                continue;
            }
            host_mounts.sort_by_key(|m| std::cmp::Reverse(m.path.len()));

            result.push(ContainerInfo {
                pod_id: pod_id.clone(),
                pod_name: pod_name.clone(),
                name: container.name.clone(),
                image: container.image.clone().unwrap_or_default(),
                container_id: statuses.get(&container.name).cloned().unwrap_or_default(),
                host: host.clone(),
                labels: pod_labels.clone(),
                host_mounts,
            });
        }
    }

    info!(count = result.len(), "collected container inventory");
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Container, EmptyDirVolumeSource, PodSpec, Volume, VolumeMount};

    #[test]
    fn keeps_only_empty_dir_mounts_sorted_descending() {
        let pod = Pod {
            metadata: kube::core::ObjectMeta {
                name: Some("web-0".into()),
                uid: Some("pod-uid".into()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                node_name: Some("node-1".into()),
                volumes: Some(vec![
                    Volume {
                        name: "scratch".into(),
                        empty_dir: Some(EmptyDirVolumeSource::default()),
                        ..Default::default()
                    },
                    Volume {
                        name: "secret".into(),
                        ..Default::default()
                    },
                ]),
                containers: vec![Container {
                    name: "app".into(),
                    image: Some("app:latest".into()),
                    volume_mounts: Some(vec![
                        VolumeMount {
                            name: "scratch".into(),
                            mount_path: "/var/log/app".into(),
                            ..Default::default()
                        },
                        VolumeMount {
                            name: "secret".into(),
                            mount_path: "/etc/secret".into(),
                            ..Default::default()
                        },
                    ]),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            status: None,
        };

        let containers = pods_to_containers(vec![pod]);
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].host_mounts.len(), 1);
        assert_eq!(containers[0].host_mounts[0].volume_name, "scratch");
    }

    #[test]
    fn renders_namespace_placeholder() {
        let out = render_placeholders("<match **>\n  tag {{ namespace }}\n</match>\n", "payments").unwrap();
        assert!(out.contains("tag payments"));
    }

    #[test]
    fn leaves_plain_text_untouched() {
        let out = render_placeholders("<match **>\n  @type null\n</match>\n", "payments").unwrap();
        assert_eq!(out, "<match **>\n  @type null\n</match>\n");
    }
}
