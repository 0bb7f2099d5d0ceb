//! Command-line flags, their defaults, and the validation rules that turn
//! raw `clap` matches into a usable [`Config`].

use std::collections::BTreeMap;
use std::time::Duration;

use clap::{crate_authors, crate_description, crate_name, crate_version, Arg, ArgAction, Command};
use regex::Regex;

use datasource::kubernetes::DiscoveryMode;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("--meta-key requires a non-empty --meta-values")]
    MetaKeyWithoutValues,
    #[error("--datasource multimap requires --label-selector")]
    MultimapWithoutSelector,
    #[error("--datasource fs requires --fs-dir")]
    FsWithoutDir,
    #[error("--id {0:?} is not a valid hostname-like identifier")]
    InvalidId(String),
    #[error("malformed --meta-values entry {0:?}, expected k=v")]
    MalformedMetaValue(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasourceKind {
    Default,
    Fake,
    Fs,
    Multimap,
    Crd,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub master: Option<String>,
    pub kubeconfig: Option<String>,
    pub datasource: DatasourceKind,
    pub crd_migration_mode: bool,
    pub fs_dir: Option<String>,
    pub interval: Duration,
    pub allow_file: bool,
    pub id: String,
    pub fluentd_rpc_port: u16,
    pub log_level: String,
    pub fluentd_loglevel: String,
    pub buffer_mount_folder: Option<String>,
    pub annotation: String,
    pub default_configmap: String,
    pub status_annotation: Option<String>,
    pub prometheus_enabled: bool,
    pub metrics_port: u16,
    pub kubelet_root: String,
    pub namespaces: Vec<String>,
    pub templates_dir: String,
    pub output_dir: String,
    pub meta_key: String,
    pub meta_values: BTreeMap<String, String>,
    pub fluentd_binary: Option<String>,
    pub label_selector: Option<String>,
    pub allow_tag_expansion: bool,
    pub admin_namespace: String,
    pub exec_timeout: Duration,
    pub container_bytes_limit: u64,
}

pub fn command() -> Command {
    Command::new(crate_name!())
        .version(crate_version!())
        .author(crate_authors!())
        .about(crate_description!())
        .args([
            Arg::new("master").long("master"),
            Arg::new("kubeconfig").long("kubeconfig"),
            Arg::new("datasource")
                .long("datasource")
                .value_parser(["default", "fake", "fs", "multimap", "crd"])
                .default_value("default"),
            Arg::new("crd_migration_mode")
                .long("crd-migration-mode")
                .action(ArgAction::SetTrue),
            Arg::new("fs_dir").long("fs-dir"),
            Arg::new("interval").long("interval").default_value("60"),
            Arg::new("allow_file").long("allow-file").action(ArgAction::SetTrue),
            Arg::new("id").long("id").default_value("default"),
            Arg::new("fluentd_rpc_port").long("fluentd-rpc-port").default_value("24444"),
            Arg::new("log_level").long("log-level").default_value("info"),
            Arg::new("fluentd_loglevel")
                .long("fluentd-loglevel")
                .value_parser(["fatal", "error", "warn", "info", "debug", "trace"])
                .default_value("info"),
            Arg::new("buffer_mount_folder").long("buffer-mount-folder"),
            Arg::new("annotation").long("annotation").default_value("logging.csp.vmware.com/fluentd-configmap"),
            Arg::new("default_configmap").long("default-configmap").default_value("fluentd-config"),
            Arg::new("status_annotation").long("status-annotation"),
            Arg::new("prometheus_enabled").long("prometheus-enabled").action(ArgAction::SetTrue),
            Arg::new("metrics_port").long("metrics-port").default_value("9000"),
            Arg::new("kubelet_root").long("kubelet-root").default_value("/var/lib/kubelet/"),
            Arg::new("namespaces").long("namespaces").action(ArgAction::Append),
            Arg::new("templates_dir").long("templates-dir").default_value("/templates"),
            Arg::new("output_dir").long("output-dir").default_value("/fluentd/etc"),
            Arg::new("meta_key").long("meta-key").default_value(""),
            Arg::new("meta_values").long("meta-values").default_value(""),
            Arg::new("fluentd_binary").long("fluentd-binary"),
            Arg::new("label_selector").long("label-selector"),
            Arg::new("allow_tag_expansion").long("allow-tag-expansion").action(ArgAction::SetTrue),
            Arg::new("admin_namespace").long("admin-namespace").default_value("kube-system"),
            Arg::new("exec_timeout").long("exec-timeout").default_value("30"),
            Arg::new("container_bytes_limit").long("container-bytes-limit").default_value("51200"),
        ])
}

fn parse_meta_values(raw: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    let mut out = BTreeMap::new();
    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (k, v) = entry
            .split_once('=')
            .ok_or_else(|| ConfigError::MalformedMetaValue(entry.to_string()))?;
        out.insert(k.to_string(), v.to_string());
    }
    Ok(out)
}

fn normalize_seconds(raw: &str, default_secs: u64) -> Duration {
    match raw.parse::<i64>() {
        Ok(secs) if secs > 0 => Duration::from_secs(secs as u64),
        _ => Duration::from_secs(default_secs),
    }
}

fn is_hostname_like(id: &str) -> bool {
    let re = Regex::new(r"^[a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?$").expect("static pattern");
    re.is_match(id)
}

impl Config {
    pub fn from_matches(matches: &clap::ArgMatches) -> Result<Self, ConfigError> {
        let get = |name: &str| matches.get_one::<String>(name).cloned();
        let get_req = |name: &str| get(name).unwrap_or_default();

        let datasource = match get_req("datasource").as_str() {
            "fake" => DatasourceKind::Fake,
            "fs" => DatasourceKind::Fs,
            "multimap" => DatasourceKind::Multimap,
            "crd" => DatasourceKind::Crd,
            _ => DatasourceKind::Default,
        };

        let meta_key = get_req("meta_key");
        let meta_values = parse_meta_values(&get_req("meta_values"))?;
        if !meta_key.is_empty() && meta_values.is_empty() {
            return Err(ConfigError::MetaKeyWithoutValues);
        }

        let label_selector = get("label_selector").filter(|s| !s.is_empty());
        if datasource == DatasourceKind::Multimap && label_selector.is_none() {
            return Err(ConfigError::MultimapWithoutSelector);
        }

        let fs_dir = get("fs_dir").filter(|s| !s.is_empty());
        if datasource == DatasourceKind::Fs && fs_dir.is_none() {
            return Err(ConfigError::FsWithoutDir);
        }

        let id = get_req("id");
        if !is_hostname_like(&id) {
            return Err(ConfigError::InvalidId(id));
        }

        Ok(Config {
            master: get("master"),
            kubeconfig: get("kubeconfig"),
            datasource,
            crd_migration_mode: matches.get_flag("crd_migration_mode"),
            fs_dir,
            interval: normalize_seconds(&get_req("interval"), 60),
            allow_file: matches.get_flag("allow_file"),
            id,
            fluentd_rpc_port: get_req("fluentd_rpc_port").parse().unwrap_or(24444),
            log_level: get_req("log_level"),
            fluentd_loglevel: get_req("fluentd_loglevel"),
            buffer_mount_folder: get("buffer_mount_folder"),
            annotation: get_req("annotation"),
            default_configmap: get_req("default_configmap"),
            status_annotation: get("status_annotation").filter(|s| !s.is_empty()),
            prometheus_enabled: matches.get_flag("prometheus_enabled"),
            metrics_port: get_req("metrics_port").parse().unwrap_or(9000),
            kubelet_root: get_req("kubelet_root"),
            namespaces: matches
                .get_many::<String>("namespaces")
                .map(|v| v.cloned().collect())
                .unwrap_or_default(),
            templates_dir: get_req("templates_dir"),
            output_dir: get_req("output_dir"),
            meta_key,
            meta_values,
            fluentd_binary: get("fluentd_binary"),
            label_selector,
            allow_tag_expansion: matches.get_flag("allow_tag_expansion"),
            admin_namespace: get_req("admin_namespace"),
            exec_timeout: normalize_seconds(&get_req("exec_timeout"), 30),
            container_bytes_limit: get_req("container_bytes_limit").parse().unwrap_or(51200),
        })
    }

    pub fn discovery_mode(&self) -> DiscoveryMode {
        match (self.datasource, self.crd_migration_mode) {
            (DatasourceKind::Multimap, _) => DiscoveryMode::Multimap,
            (DatasourceKind::Crd, true) => DiscoveryMode::MigrationMode,
            (DatasourceKind::Crd, false) => DiscoveryMode::Crd,
            _ => DiscoveryMode::ConfigMap,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Config, ConfigError> {
        let matches = command().try_get_matches_from(args).unwrap();
        Config::from_matches(&matches)
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = parse(&["kfo"]).unwrap();
        assert_eq!(cfg.interval, Duration::from_secs(60));
        assert_eq!(cfg.admin_namespace, "kube-system");
    }

    #[test]
    fn negative_interval_normalises_to_default() {
        let cfg = parse(&["kfo", "--interval", "-5"]).unwrap();
        assert_eq!(cfg.interval, Duration::from_secs(60));
    }

    #[test]
    fn meta_key_without_values_is_rejected() {
        let err = parse(&["kfo", "--meta-key", "env"]).unwrap_err();
        assert!(matches!(err, ConfigError::MetaKeyWithoutValues));
    }

    #[test]
    fn multimap_without_selector_is_rejected() {
        let err = parse(&["kfo", "--datasource", "multimap"]).unwrap_err();
        assert!(matches!(err, ConfigError::MultimapWithoutSelector));
    }

    #[test]
    fn fs_without_dir_is_rejected() {
        let err = parse(&["kfo", "--datasource", "fs"]).unwrap_err();
        assert!(matches!(err, ConfigError::FsWithoutDir));
    }

    #[test]
    fn invalid_id_is_rejected() {
        let err = parse(&["kfo", "--id", "not valid!"]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidId(_)));
    }
}
