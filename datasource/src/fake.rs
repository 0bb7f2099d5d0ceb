//! A predefined, fixed set of namespaces, useful for local development
//! against a running forwarder without a real cluster.

use async_trait::async_trait;
use tracing::info;

use crate::{Datasource, NamespaceConfig, Result};

const TEMPLATE: &str = r#"
<match **>
  @type logzio_buffered
  endpoint_url https://listener.logz.io:8071?token=secret
  output_include_time true
  output_include_tags true
  buffer_type    file
  buffer_path    /var/log/logzio-$my_ns.buffer
  flush_interval 10s
  buffer_chunk_limit 1m
</match>
"#;

fn make_fake_config(namespace: &str) -> String {
    TEMPLATE.replace("$my_ns", namespace)
}

#[derive(Debug, Default)]
pub struct FakeDatasource;

impl FakeDatasource {
    pub fn new() -> Self {
        FakeDatasource
    }
}

#[async_trait]
impl Datasource for FakeDatasource {
    async fn get_namespaces(&self) -> Result<Vec<NamespaceConfig>> {
        let mut res: Vec<NamespaceConfig> = ["kube-system", "monitoring", "csp-main"]
            .into_iter()
            .map(|ns| NamespaceConfig {
                name: ns.to_string(),
                fluentd_config: make_fake_config(ns),
                ..Default::default()
            })
            .collect();

        res.push(NamespaceConfig {
            name: "not-configured".to_string(),
            fluentd_config: "<match **>\n  @type null\n</match>\n".to_string(),
            ..Default::default()
        });

        Ok(res)
    }

    fn write_current_config_hash(&self, _namespace: &str, _hash: &str) {}

    async fn update_status(&self, namespace: &str, status: &str) -> Result<()> {
        info!(namespace, status, "setting status");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_four_fixed_namespaces() {
        let ds = FakeDatasource::new();
        let namespaces = ds.get_namespaces().await.unwrap();
        assert_eq!(namespaces.len(), 4);
        assert!(namespaces.iter().any(|n| n.name == "not-configured"));
    }
}
