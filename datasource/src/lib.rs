//! Reads tenant configuration and container inventory from one of several
//! backing stores, and reports back per-tenant validation status.

pub mod fake;
pub mod filesystem;
pub mod kubernetes;

use std::collections::BTreeMap;

use async_trait::async_trait;
use pipeline::ContainerInfo;

/// One tenant's raw input, as seen by a single reconcile cycle.
#[derive(Debug, Clone, Default)]
pub struct NamespaceConfig {
    pub name: String,
    pub fluentd_config: String,
    pub previous_config_hash: Option<String>,
    pub is_known_from_before: bool,
    pub namespace_labels: BTreeMap<String, String>,
    pub containers: Vec<ContainerInfo>,
}

#[derive(Debug, thiserror::Error)]
pub enum DatasourceError {
    #[error("kube error: {0}")]
    Kube(#[from] kube::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Message(String),
}

impl DatasourceError {
    pub fn new(msg: impl Into<String>) -> Self {
        DatasourceError::Message(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, DatasourceError>;

/// Source of tenant configuration and sink for per-tenant status reporting.
#[async_trait]
pub trait Datasource: Send + Sync {
    async fn get_namespaces(&self) -> Result<Vec<NamespaceConfig>>;

    /// Records the hash of the configuration last successfully written for
    /// `namespace`, so the next cycle can tell whether it actually changed.
    fn write_current_config_hash(&self, namespace: &str, hash: &str);

    /// Surfaces a human-readable validation error for `namespace`, or clears
    /// it when `status` is empty.
    async fn update_status(&self, namespace: &str, status: &str) -> Result<()>;
}
