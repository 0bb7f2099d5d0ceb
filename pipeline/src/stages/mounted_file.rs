use std::collections::BTreeMap;

use fluentd::{Directive, Fragment};

use crate::{ContainerInfo, GenerationContext, Stage, StageError, TenantContext};

pub const MOUNTED_FILE_SOURCE_TYPE: &str = "mounted-file";

/// Longest host-mount prefix of `path` among `mounts`, if any.
fn longest_prefix_mount<'a>(mounts: &'a [crate::Mount], path: &str) -> Option<&'a crate::Mount> {
    mounts
        .iter()
        .filter(|m| path.starts_with(m.path.as_str()))
        .max_by_key(|m| m.path.len())
}

fn merged_labels(tenant: &TenantContext, container: &ContainerInfo) -> BTreeMap<String, String> {
    let mut merged = tenant.namespace_labels.clone();
    merged.extend(container.labels.clone());
    merged
}

fn container_info_hash(pod_id: &str, container_name: &str) -> String {
    fluentd::hash("container-info", &format!("{pod_id}:{container_name}"))
}

fn emit_for_container(
    tenant: &TenantContext,
    source: &Directive,
    path: &str,
    container: &ContainerInfo,
) -> Option<(Directive, Directive)> {
    let mount = longest_prefix_mount(&container.host_mounts, path)?;
    let remainder = &path[mount.path.len()..];
    let host_path = format!(
        "{}/pods/{}/volumes/kubernetes.io~empty-dir/{}{}",
        tenant.kubelet_root.trim_end_matches('/'),
        container.pod_id,
        mount.volume_name,
        remainder,
    );

    let tag = format!(
        "kube.{}.{}.{}-{}",
        tenant.namespace,
        container.pod_name,
        container.name,
        fluentd::hash(&container.pod_id, path),
    );

    let mut tail = Directive::new("source", "");
    tail.set_type("tail");
    tail.set_param("path", host_path);
    tail.set_param("tag", tag.clone());
    if let Some(parse) = source.nested.iter().find(|n| n.name == "parse") {
        tail.nested.push(parse.clone());
    }

    let mut filter = Directive::new("filter", tag);
    filter.set_type("record_modifier");
    let mut record = Directive::new("record", "");
    record.set_param("pod", container.pod_name.clone());
    record.set_param("container", container.name.clone());
    record.set_param("image", container.image.clone());
    record.set_param("container_id", container.container_id.clone());
    record.set_param("namespace", tenant.namespace.clone());
    record.set_param("host", container.host.clone());
    record.set_param("container_info", container_info_hash(&container.pod_id, &container.name));
    record.set_param("labels", fluentd::to_map_literal(&merged_labels(tenant, container)));
    record.set_param("namespace_labels", fluentd::to_map_literal(&tenant.namespace_labels));
    filter.nested.push(record);

    Some((tail, filter))
}

#[derive(Default)]
pub struct MountedFileStage;

impl Stage for MountedFileStage {
    fn name(&self) -> &'static str {
        "mounted_file"
    }

    fn prepare(
        &mut self,
        input: &Fragment,
        tenant: &TenantContext,
        _gen: &mut GenerationContext,
    ) -> Result<Fragment, StageError> {
        let mut extra = Vec::new();

        for d in input {
            if d.name != "source" || d.type_of() != MOUNTED_FILE_SOURCE_TYPE {
                continue;
            }
            let labels_macro = d.param("labels");
            if labels_macro.is_empty() {
                return Err(StageError::new("mounted-file source requires a labels param"));
            }
            let selector = fluentd::selector::parse_tag_to_labels(&labels_macro)
                .map_err(|e| StageError::new(e.to_string()))?;
            let path = d.param("path");
            if path.is_empty() {
                return Err(StageError::new("mounted-file source requires a path param"));
            }

            for container in &tenant.containers {
                if !fluentd::selector::match_labels(&selector, &container.labels, &container.name) {
                    continue;
                }
                if let Some((tail, filter)) = emit_for_container(tenant, d, &path, container) {
                    extra.push(tail);
                    extra.push(filter);
                }
            }
        }

        Ok(extra)
    }

    fn process(
        &mut self,
        input: Fragment,
        _tenant: &TenantContext,
        _gen: &mut GenerationContext,
    ) -> Result<Fragment, StageError> {
        Ok(input
            .into_iter()
            .filter(|d| !(d.name == "source" && d.type_of() == MOUNTED_FILE_SOURCE_TYPE))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Mount;

    fn tenant_with_container() -> TenantContext {
        let mut tenant = TenantContext::new("ns", "id");
        tenant.kubelet_root = "/var/lib/kubelet".to_string();
        tenant.containers.push(ContainerInfo {
            pod_id: "pod-1".to_string(),
            pod_name: "web-0".to_string(),
            name: "app".to_string(),
            image: "web:latest".to_string(),
            container_id: "docker://abc".to_string(),
            host: "node-1".to_string(),
            labels: BTreeMap::from([("app".to_string(), "web".to_string())]),
            host_mounts: vec![Mount {
                path: "/var/log/app".to_string(),
                volume_name: "logs".to_string(),
            }],
        });
        tenant
    }

    #[test]
    fn emits_tail_and_filter_for_matching_container() {
        let input = fluentd::parse_string(
            "<source>\n  @type mounted-file\n  labels $labels(app=web)\n  path /var/log/app/out.log\n</source>\n",
        )
        .unwrap();
        let tenant = tenant_with_container();
        let mut gen = GenerationContext::new();
        let mut stage = MountedFileStage;
        let extra = stage.prepare(&input, &tenant, &mut gen).unwrap();
        assert_eq!(extra.len(), 2);
        assert_eq!(extra[0].type_of(), "tail");
        assert!(extra[0].param("path").contains("/pods/pod-1/volumes/kubernetes.io~empty-dir/logs/out.log"));
        assert_eq!(extra[1].type_of(), "record_modifier");

        let processed = stage.process(input, &tenant, &mut gen).unwrap();
        assert!(processed.is_empty());
    }
}
