//! Turns a set of tenant fragments into a validated forwarder configuration
//! tree on disk: parse, run the pipeline, validate on change, write.

pub mod reload;
pub mod validator;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use datasource::{Datasource, NamespaceConfig};
use fluentd::{hash, make_fluentd_safe_name, parse_string, FragmentExt};
use pipeline::stages::plugin_alias::extract_aliases;
use pipeline::{default_stages, prepare_tenant, process_tenant, validation_trailer, GenerationContext, TenantContext};
use tera::{Context, Tera};
use tracing::{info, warn};

pub use validator::Validator;

const MAIN_CONFIG_FILE: &str = "fluent.conf";

#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("templating error: {0}")]
    Template(#[from] tera::Error),
    #[error("datasource error: {0}")]
    Datasource(#[from] datasource::DatasourceError),
}

pub struct GeneratorConfig {
    pub templates_dir: PathBuf,
    pub output_dir: PathBuf,
    pub admin_namespace: String,
    pub deployment_id: String,
    pub allow_file: bool,
    pub allow_tag_expansion: bool,
    pub kubelet_root: String,
    pub meta_key: String,
    pub meta_values: BTreeMap<String, String>,
}

pub struct Generator {
    config: GeneratorConfig,
    validator: Option<Validator>,
}

impl Generator {
    pub fn new(config: GeneratorConfig, validator: Option<Validator>) -> Self {
        Generator { config, validator }
    }

    fn tenant_context(&self, ns: &NamespaceConfig) -> TenantContext {
        let mut tenant = TenantContext::new(&ns.name, &self.config.deployment_id);
        tenant.namespace_labels = ns.namespace_labels.clone();
        tenant.allow_file = self.config.allow_file;
        tenant.allow_tag_expansion = self.config.allow_tag_expansion;
        tenant.kubelet_root = self.config.kubelet_root.clone();
        tenant.containers = ns.containers.clone();
        tenant
    }

    /// Runs one full render cycle: parses every tenant, runs the pipeline,
    /// validates what changed, writes the output tree, and returns each
    /// tenant's new content hash.
    pub async fn render_to_disk(
        &self,
        datasource: &dyn Datasource,
        namespaces: Vec<NamespaceConfig>,
    ) -> Result<BTreeMap<String, String>, GeneratorError> {
        tokio::fs::create_dir_all(&self.config.output_dir).await?;

        let mut hashes = BTreeMap::new();
        let mut gen = GenerationContext::new();

        let (admin, rest): (Vec<_>, Vec<_>) = namespaces
            .into_iter()
            .partition(|ns| ns.name == self.config.admin_namespace);

        if let Some(admin_ns) = admin.into_iter().next() {
            self.write_admin_tenant(&admin_ns, &mut gen, &mut hashes, datasource).await;
        }

        let mut stages = default_stages();

        // Pass 1: parse and Prepare every tenant. This must complete for
        // the whole tenant set before any tenant's Process runs, since a
        // consumer that sorts before its producer still needs to have
        // registered its cross-tenant bridge by the time the producer
        // looks for it.
        let mut prepared = Vec::with_capacity(rest.len());
        for ns in &rest {
            let tenant = self.tenant_context(ns);
            if ns.fluentd_config.trim().is_empty() {
                prepared.push((ns.clone(), tenant, None, Vec::new()));
                continue;
            }

            match parse_string(&ns.fluentd_config) {
                Ok(fragment) => match prepare_tenant(&mut stages, &fragment, &tenant, &mut gen) {
                    Ok(preamble) => prepared.push((ns.clone(), tenant, Some(fragment), preamble)),
                    Err(err) => {
                        warn!(namespace = %ns.name, error = %err, "tenant fragment failed to prepare");
                        prepared.push((ns.clone(), tenant, None, Vec::new()));
                    }
                },
                Err(err) => {
                    warn!(namespace = %ns.name, error = %err, "tenant fragment failed to parse");
                    prepared.push((ns.clone(), tenant, None, Vec::new()));
                }
            };
        }

        let mut valid_files = Vec::new();
        let mut all_preamble_directives = Vec::new();

        // Pass 2: Process every tenant now that the generation context
        // reflects every tenant's Prepare phase.
        for (ns, tenant, parsed, preamble) in prepared {
            let Some(fragment) = parsed else {
                let configuration_hash = hash("ERROR", "cannot parse or prepare tenant configuration");
                self.record_hash(datasource, &ns, &configuration_hash, &mut hashes, "cannot parse or prepare tenant configuration").await;
                continue;
            };

            all_preamble_directives.extend(preamble.clone());

            let outcome = process_tenant(&mut stages, fragment, &tenant, &mut gen);
            let process_output = match &outcome {
                Ok(processed) => processed.render(),
                Err(_) => String::new(),
            };

            let configuration_hash = match &outcome {
                Ok(_) => hash("", &format!("{process_output}{}", preamble.render())),
                Err(err) => hash("ERROR", &err.to_string()),
            };

            match outcome {
                Err(err) => {
                    info!(namespace = %ns.name, error = %err, "tenant cannot be processed");
                    self.record_hash(datasource, &ns, &configuration_hash, &mut hashes, &err.to_string()).await;
                }
                Ok(_) if process_output.trim().is_empty() => {
                    self.record_hash(datasource, &ns, &configuration_hash, &mut hashes, "").await;
                }
                Ok(_) => {
                    let changed = ns.previous_config_hash.as_deref() != Some(configuration_hash.as_str());
                    if changed {
                        if let Some(validator) = &self.validator {
                            let trailer = validation_trailer(&stages, &tenant, &gen);
                            let standalone = format!("{process_output}{}", trailer.render());
                            if let Err(err) = validator.validate_config(&standalone, &ns.name).await {
                                info!(namespace = %ns.name, error = %err, "tenant fails forwarder validation");
                                self.record_hash(datasource, &ns, &configuration_hash, &mut hashes, &err.to_string()).await;
                                continue;
                            }
                        }
                    }

                    let filename = format!("ns-{}.conf", ns.name);
                    self.write_file(&filename, &process_output).await?;
                    valid_files.push(filename);
                    hashes.insert(ns.name.clone(), configuration_hash.clone());
                    if changed {
                        datasource.write_current_config_hash(&ns.name, &configuration_hash);
                        let _ = datasource.update_status(&ns.name, "").await;
                    }
                }
            }
        }

        self.render_templates(&valid_files, &all_preamble_directives).await?;

        Ok(hashes)
    }

    async fn write_admin_tenant(
        &self,
        ns: &NamespaceConfig,
        gen: &mut GenerationContext,
        hashes: &mut BTreeMap<String, String>,
        datasource: &dyn Datasource,
    ) {
        let configuration_hash = hash("", &ns.fluentd_config);
        hashes.insert(ns.name.clone(), configuration_hash.clone());

        if let Ok(fragment) = parse_string(&ns.fluentd_config) {
            let rest = extract_aliases(gen, fragment);
            let _ = rest;
        }

        if let Err(err) = self.write_file(&format!("{}.conf", ns.name), &ns.fluentd_config).await {
            warn!(namespace = %ns.name, error = %err, "cannot store admin tenant config file");
        }

        if ns.previous_config_hash.as_deref() != Some(configuration_hash.as_str()) {
            datasource.write_current_config_hash(&ns.name, &configuration_hash);
            let _ = datasource.update_status(&ns.name, "").await;
        }
    }

    async fn record_hash(
        &self,
        datasource: &dyn Datasource,
        ns: &NamespaceConfig,
        configuration_hash: &str,
        hashes: &mut BTreeMap<String, String>,
        status: &str,
    ) {
        hashes.insert(ns.name.clone(), configuration_hash.to_string());
        self.remove_tenant_file(&ns.name).await;
        if ns.previous_config_hash.as_deref() != Some(configuration_hash) {
            datasource.write_current_config_hash(&ns.name, configuration_hash);
            let _ = datasource.update_status(&ns.name, status).await;
        }
    }

    async fn write_file(&self, name: &str, contents: &str) -> std::io::Result<()> {
        tokio::fs::write(self.config.output_dir.join(name), contents).await
    }

    async fn remove_tenant_file(&self, namespace: &str) {
        let path = self.config.output_dir.join(format!("ns-{namespace}.conf"));
        let _ = tokio::fs::remove_file(path).await;
    }

    async fn render_templates(&self, namespaces: &[String], preamble: &[fluentd::Directive]) -> Result<(), GeneratorError> {
        let pattern = self.config.templates_dir.join("*.conf");
        let mut paths: Vec<PathBuf> = glob_conf_files(&pattern)?;
        paths.sort();

        for path in paths {
            let Some(base) = path.file_name().and_then(|n| n.to_str()) else { continue };
            let dest = self.config.output_dir.join(base);

            if base == MAIN_CONFIG_FILE {
                self.render_main_file(&path, &dest, namespaces, preamble).await?;
            } else {
                self.render_includable_file(&path, &dest).await;
            }
        }
        Ok(())
    }

    async fn render_main_file(
        &self,
        template_path: &Path,
        dest: &Path,
        namespaces: &[String],
        preamble: &[fluentd::Directive],
    ) -> Result<(), GeneratorError> {
        let template_source = tokio::fs::read_to_string(template_path).await?;
        let mut tera = Tera::default();
        tera.add_raw_template(MAIN_CONFIG_FILE, &template_source)?;

        let mut ctx = Context::new();
        ctx.insert("namespaces", namespaces);
        ctx.insert("preamble", &preamble.to_vec().render());
        if !self.config.meta_key.is_empty() {
            ctx.insert("meta_key", &self.config.meta_key);
            ctx.insert("meta_value", &fluentd::to_map_literal(&self.config.meta_values));
        }

        let rendered = tera.render(MAIN_CONFIG_FILE, &ctx)?;
        tokio::fs::write(dest, rendered).await?;
        Ok(())
    }

    async fn render_includable_file(&self, template_path: &Path, dest: &Path) {
        let Ok(template_source) = tokio::fs::read_to_string(template_path).await else {
            warn!(path = %template_path.display(), "cannot read template file");
            return;
        };
        let Some(base) = template_path.file_name().and_then(|n| n.to_str()) else { return };

        let mut tera = Tera::default();
        if let Err(err) = tera.add_raw_template(base, &template_source) {
            warn!(path = %template_path.display(), error = %err, "cannot parse template file");
            return;
        }

        let mut ctx = Context::new();
        ctx.insert("id", &make_fluentd_safe_name(&self.config.deployment_id));

        match tera.render(base, &ctx) {
            Ok(rendered) => {
                if let Err(err) = tokio::fs::write(dest, rendered).await {
                    warn!(path = %dest.display(), error = %err, "cannot write rendered template");
                }
            }
            Err(err) => warn!(path = %template_path.display(), error = %err, "cannot render template file"),
        }
    }
}

fn glob_conf_files(pattern: &Path) -> std::io::Result<Vec<PathBuf>> {
    let dir = pattern.parent().unwrap_or_else(|| Path::new("."));
    let mut matches = Vec::new();
    if !dir.exists() {
        return Ok(matches);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("conf") {
            matches.push(path);
        }
    }
    Ok(matches)
}
