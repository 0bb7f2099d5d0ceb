//! Reads `*.conf` files from a directory, one per namespace, useful for
//! testing configuration changes without a cluster.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::{Datasource, NamespaceConfig, Result};

pub struct FilesystemDatasource {
    root_dir: PathBuf,
    status_output_dir: PathBuf,
    hashes: Mutex<HashMap<String, String>>,
}

impl FilesystemDatasource {
    pub fn new(root_dir: impl Into<PathBuf>, status_output_dir: impl Into<PathBuf>) -> Self {
        FilesystemDatasource {
            root_dir: root_dir.into(),
            status_output_dir: status_output_dir.into(),
            hashes: Mutex::new(HashMap::new()),
        }
    }

    fn status_path(&self, namespace: &str) -> PathBuf {
        self.status_output_dir.join(format!("ns-{namespace}.status"))
    }
}

#[async_trait]
impl Datasource for FilesystemDatasource {
    async fn get_namespaces(&self) -> Result<Vec<NamespaceConfig>> {
        let mut res = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("conf") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            let contents = match tokio::fs::read_to_string(&path).await {
                Ok(c) => c,
                Err(err) => {
                    info!(?path, %err, "cannot read file");
                    continue;
                }
            };

            let previous_config_hash = self.hashes.lock().unwrap().get(stem).cloned();
            info!(namespace = stem, ?path, "loading namespace from file");
            res.push(NamespaceConfig {
                name: stem.to_string(),
                fluentd_config: contents,
                previous_config_hash,
                ..Default::default()
            });
        }

        Ok(res)
    }

    fn write_current_config_hash(&self, namespace: &str, hash: &str) {
        self.hashes
            .lock()
            .unwrap()
            .insert(namespace.to_string(), hash.to_string());
    }

    async fn update_status(&self, namespace: &str, status: &str) -> Result<()> {
        let path = self.status_path(namespace);
        if status.is_empty() {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        } else {
            if let Err(err) = tokio::fs::write(&path, status).await {
                warn!(?path, %err, "cannot write status file");
                return Err(err.into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loads_conf_files_as_namespaces() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("kube-system.conf"), "<match **>\n  @type null\n</match>\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let status_dir = tempfile::tempdir().unwrap();
        let ds = FilesystemDatasource::new(dir.path(), status_dir.path());
        let namespaces = ds.get_namespaces().await.unwrap();
        assert_eq!(namespaces.len(), 1);
        assert_eq!(namespaces[0].name, "kube-system");
    }

    #[tokio::test]
    async fn update_status_writes_and_clears_file() {
        let dir = tempfile::tempdir().unwrap();
        let status_dir = tempfile::tempdir().unwrap();
        let ds = FilesystemDatasource::new(dir.path(), status_dir.path());

        ds.update_status("ns1", "boom").await.unwrap();
        assert_eq!(std::fs::read_to_string(ds.status_path("ns1")).unwrap(), "boom");

        ds.update_status("ns1", "").await.unwrap();
        assert!(!ds.status_path("ns1").exists());
    }
}
