use std::collections::{BTreeMap, HashMap, HashSet};

use fluentd::Directive;

/// A host-path mount of a container, as reported by the datasource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub path: String,
    pub volume_name: String,
}

/// One container belonging to a tenant's pods, as needed by the
/// mounted-file source and the label-selector stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub pod_id: String,
    pub pod_name: String,
    pub name: String,
    pub image: String,
    pub container_id: String,
    pub host: String,
    pub labels: BTreeMap<String, String>,
    pub host_mounts: Vec<Mount>,
}

/// Per-tenant state threaded through every pipeline stage for one tenant.
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub namespace: String,
    pub namespace_labels: BTreeMap<String, String>,
    pub allow_file: bool,
    pub allow_tag_expansion: bool,
    pub deployment_id: String,
    pub kubelet_root: String,
    pub containers: Vec<ContainerInfo>,
}

impl TenantContext {
    pub fn new(namespace: impl Into<String>, deployment_id: impl Into<String>) -> Self {
        TenantContext {
            namespace: namespace.into(),
            namespace_labels: BTreeMap::new(),
            allow_file: false,
            allow_tag_expansion: false,
            deployment_id: deployment_id.into(),
            kubelet_root: "/var/lib/kubelet".to_string(),
            containers: Vec::new(),
        }
    }
}

/// State shared across every tenant within a single reconcile, letting
/// producer and consumer tenants coordinate (cross-tenant bridges, the
/// exception-splitting flag, admin-defined plugin aliases) without direct
/// coupling between their pipelines.
#[derive(Debug, Clone, Default)]
pub struct GenerationContext {
    /// Bridge label names (`@bridge-<producer>__<consumer>`) registered by
    /// a receiving tenant's `<label @from(X)>` during Prepare.
    pub referenced_bridges: HashSet<String>,
    /// True iff any tenant uses `detect_exceptions`; toggles duplicated-tag
    /// emission in later stages.
    pub needs_processing: bool,
    /// Admin-tenant-defined plugin aliases, keyed by alias name.
    pub plugin_aliases: HashMap<String, Directive>,
}

impl GenerationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// When any tenant uses `detect_exceptions`, every retagged tag grows a
    /// second, duplicated form (`<orig> _proc.<orig>`) so later directives
    /// can match against both the pre- and post-split stream.
    pub fn augment_tag(&self, tag: &str) -> String {
        if self.needs_processing {
            format!("{tag} _proc.{tag}")
        } else {
            tag.to_string()
        }
    }
}

pub const BRIDGE_PREFIX: &str = "@bridge-";

pub fn bridge_name(producer: &str, consumer: &str) -> String {
    format!("{BRIDGE_PREFIX}{producer}__{consumer}")
}
