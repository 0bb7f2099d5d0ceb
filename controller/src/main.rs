use std::path::PathBuf;
use std::process;

use is_terminal::IsTerminal;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{filter::EnvFilter, prelude::*};

use controller::config::{self, Config, DatasourceKind};
use controller::updater::Updater;
use controller::{crd, metrics, Controller};
use datasource::fake::FakeDatasource;
use datasource::filesystem::FilesystemDatasource;
use datasource::kubernetes::{notify, KubernetesDatasource, KubernetesDatasourceConfig};
use datasource::Datasource;
use generator::reload::ReloadClient;
use generator::{Generator, GeneratorConfig, Validator};

fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let registry = tracing_subscriber::Registry::default().with(env_filter);
    if std::io::stdout().is_terminal() {
        registry.with(tracing_subscriber::fmt::layer()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    }
}

async fn build_datasource(cfg: &Config) -> Result<(Box<dyn Datasource>, Option<notify::ChangeReceiver>), anyhow::Error> {
    match cfg.datasource {
        DatasourceKind::Fake => Ok((Box::new(FakeDatasource::new()), None)),
        DatasourceKind::Fs => {
            let dir = cfg.fs_dir.clone().expect("validated by Config::from_matches");
            Ok((Box::new(FilesystemDatasource::new(dir, cfg.output_dir.clone())), None))
        }
        DatasourceKind::Default | DatasourceKind::Multimap | DatasourceKind::Crd => {
            let client = make_kube_client(cfg).await?;
            let label_selector = cfg
                .label_selector
                .as_deref()
                .map(parse_label_selector)
                .unwrap_or_default();

            let ds = KubernetesDatasource::new(
                client,
                KubernetesDatasourceConfig {
                    mode: cfg.discovery_mode(),
                    annot_configmap_name: cfg.annotation.clone(),
                    annot_status: cfg.status_annotation.clone(),
                    default_configmap_name: Some(cfg.default_configmap.clone()),
                    label_selector,
                    namespaces: cfg.namespaces.clone(),
                },
            );

            let (notifier, receiver) = notify::channel();
            ds.watch_for_changes(notifier);
            Ok((Box::new(ds), Some(receiver)))
        }
    }
}

fn parse_label_selector(raw: &str) -> std::collections::BTreeMap<String, String> {
    raw.split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

async fn make_kube_client(cfg: &Config) -> Result<kube::Client, anyhow::Error> {
    if let Some(path) = &cfg.kubeconfig {
        // SAFETY: single-threaded at this point in startup, before any
        // other task reads the environment.
        unsafe { std::env::set_var("KUBECONFIG", path) };
    }
    let mut kube_config = kube::Config::infer().await?;
    if let Some(master) = &cfg.master {
        kube_config.cluster_url = master.parse()?;
    }
    Ok(kube::Client::try_from(kube_config)?)
}

async fn run(cfg: Config) -> Result<(), anyhow::Error> {
    let (datasource, receiver) = build_datasource(&cfg).await?;

    if matches!(cfg.discovery_mode(), datasource::kubernetes::DiscoveryMode::Crd | datasource::kubernetes::DiscoveryMode::MigrationMode) {
        let client = make_kube_client(&cfg).await?;
        if let Err(err) = crd::ensure_installed(client).await {
            error!(%err, "cannot install FluentdConfig CRD");
        }
    }

    if cfg.prometheus_enabled {
        metrics::install(([0, 0, 0, 0], cfg.metrics_port).into());
    }

    let validator = cfg.fluentd_binary.as_ref().map(|cmd| Validator::new(cmd, cfg.exec_timeout));

    let generator = Generator::new(
        GeneratorConfig {
            templates_dir: PathBuf::from(&cfg.templates_dir),
            output_dir: PathBuf::from(&cfg.output_dir),
            admin_namespace: cfg.admin_namespace.clone(),
            deployment_id: cfg.id.clone(),
            allow_file: cfg.allow_file,
            allow_tag_expansion: cfg.allow_tag_expansion,
            kubelet_root: cfg.kubelet_root.clone(),
            meta_key: cfg.meta_key.clone(),
            meta_values: cfg.meta_values.clone(),
        },
        validator,
    );

    let reload_client = matches!(cfg.datasource, DatasourceKind::Default | DatasourceKind::Multimap | DatasourceKind::Crd)
        .then(|| ReloadClient::new(cfg.fluentd_rpc_port));

    let updater = match receiver {
        Some(receiver) => Updater::OnDemand { receiver },
        None => Updater::Timed { interval: cfg.interval },
    };

    let mut controller = Controller::new(
        datasource,
        generator,
        reload_client,
        updater,
        PathBuf::from(&cfg.output_dir),
        cfg.admin_namespace.clone(),
    );

    // Gives the forwarder time to finish its own startup before the first
    // reload, avoiding a race against a not-yet-listening RPC endpoint.
    tokio::time::sleep(cfg.exec_timeout).await;

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = signal::ctrl_c().await {
            error!(%err, "error installing SIGTERM handler");
        }
        info!("signal received, shutting down after the current cycle");
        shutdown_signal.cancel();
    });

    controller.run(shutdown).await;
    Ok(())
}

fn main() {
    let matches = config::command().get_matches();
    let cfg = match Config::from_matches(&matches) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("invalid configuration: {err}");
            process::exit(1);
        }
    };

    init_tracing(&cfg.log_level);

    let rt = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("cannot start async runtime: {err}");
            process::exit(1);
        }
    };

    if let Err(err) = rt.block_on(run(cfg)) {
        error!(%err, "fatal error");
        process::exit(1);
    }
}
