//! Controller ties the datasource, generator and reload client together
//! into one reconcile loop: fetch tenants, render, reload on change, clean
//! up orphans.

pub mod config;
pub mod crd;
pub mod metrics;
pub mod updater;

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use datasource::Datasource;
use generator::reload::ReloadClient;
use generator::Generator;
use tracing::{info, warn};

use updater::Updater;

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("datasource error: {0}")]
    Datasource(#[from] datasource::DatasourceError),
    #[error("generator error: {0}")]
    Generator(#[from] generator::GeneratorError),
}

pub struct Controller {
    datasource: Box<dyn Datasource>,
    generator: Generator,
    reload_client: Option<ReloadClient>,
    updater: Updater,
    output_dir: PathBuf,
    admin_namespace: String,
    previous_hashes: BTreeMap<String, String>,
    tracked_metrics: BTreeSet<String>,
}

impl Controller {
    pub fn new(
        datasource: Box<dyn Datasource>,
        generator: Generator,
        reload_client: Option<ReloadClient>,
        updater: Updater,
        output_dir: PathBuf,
        admin_namespace: String,
    ) -> Self {
        Controller {
            datasource,
            generator,
            reload_client,
            updater,
            output_dir,
            admin_namespace,
            previous_hashes: BTreeMap::new(),
            tracked_metrics: BTreeSet::new(),
        }
    }

    /// Runs one end-to-end cycle: discover, transform, validate, write,
    /// reload.
    pub async fn run_once(&mut self) -> Result<(), ControllerError> {
        let namespaces = self.datasource.get_namespaces().await?;
        let new_hashes = self.generator.render_to_disk(self.datasource.as_ref(), namespaces).await?;

        // A tenant's hash changing, appearing, or disappearing are all
        // covered by this one map comparison -- it subsumes both "some
        // tenant's hash differs" and "the combined hash differs" from
        // a naive transcription of the reload trigger.
        let needs_reload = new_hashes != self.previous_hashes;

        if needs_reload {
            info!("tenant configuration changed, requesting reload");
            if let Some(client) = &self.reload_client {
                client.reload().await;
            }
        }

        self.cleanup_orphaned_files(&new_hashes).await;
        self.record_metrics(&new_hashes).await;

        self.previous_hashes = new_hashes;
        Ok(())
    }

    async fn cleanup_orphaned_files(&self, current: &BTreeMap<String, String>) {
        let Ok(mut entries) = tokio::fs::read_dir(&self.output_dir).await else {
            return;
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
            let Some(namespace) = name.strip_prefix("ns-").and_then(|n| n.strip_suffix(".conf")) else {
                continue;
            };
            if !current.contains_key(namespace) {
                info!(namespace, "removing orphaned tenant file");
                let _ = tokio::fs::remove_file(&path).await;
            }
        }
    }

    async fn record_metrics(&mut self, hashes: &BTreeMap<String, String>) {
        let statuses: Vec<(String, bool)> = hashes
            .keys()
            .filter(|name| name.as_str() != self.admin_namespace)
            .map(|name| {
                let has_file = self.output_dir.join(format!("ns-{name}.conf")).exists();
                (name.clone(), !has_file)
            })
            .collect();

        let orphaned = metrics::record_namespace_status(&statuses, &mut self.tracked_metrics);
        for namespace in orphaned {
            warn!(namespace, "tenant removed; its status gauge is now stale");
        }
    }

    /// Runs reconciles forever, alternating with waiting on the updater.
    /// Exits once `shutdown` resolves, after completing any in-flight cycle.
    pub async fn run(&mut self, mut shutdown: tokio_util::sync::CancellationToken) {
        loop {
            if let Err(err) = self.run_once().await {
                warn!(%err, "reconcile failed");
            }

            tokio::select! {
                _ = self.updater.next_wakeup() => {}
                _ = shutdown.cancelled() => {
                    info!("shutdown requested, exiting after this cycle");
                    return;
                }
            }

            if shutdown.is_cancelled() {
                return;
            }
        }
    }
}
