use std::collections::BTreeMap;
use std::sync::OnceLock;

use fluentd::{parse_string, selector::CONTAINER_LABEL, Fragment};
use regex::Regex;

use crate::walk::apply_recursively_in_place;
use crate::{GenerationContext, Stage, StageError, TenantContext};

const MACRO_LABELS: &str = "$labels";

fn unsafe_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[.-]|^$").expect("static regex"))
}

/// Replaces `.`/`-` and the empty string with `_`, since both have special
/// meaning inside a fluentd tag.
fn safe_label_value(s: &str) -> String {
    unsafe_chars().replace_all(s, "_").into_owned()
}

fn make_tag_from_filter(
    ns: &str,
    sorted_label_names: &[String],
    label_names: &BTreeMap<String, String>,
) -> String {
    let mut tag = match label_names.get(CONTAINER_LABEL) {
        Some(cont) => format!("kube.{ns}.*.{cont}._labels."),
        None => format!("kube.{ns}.*.*._labels."),
    };

    let positional: Vec<&String> = sorted_label_names.iter().filter(|l| l.as_str() != CONTAINER_LABEL).collect();
    let parts: Vec<String> = positional
        .iter()
        .map(|lb| match label_names.get(lb.as_str()) {
            Some(val) => safe_label_value(val),
            None => "*".to_string(),
        })
        .collect();
    tag.push_str(&parts.join("."));
    tag
}

fn retag_template(pattern: &str, labels: &[String]) -> String {
    let ruby_fields = labels
        .iter()
        .map(|name| format!("${{record.dig('kubernetes','labels','{name}')&.gsub(/[.-]/, '_') || '_'}}"))
        .collect::<Vec<_>>()
        .join(".");

    format!(
        r#"
<filter {pattern}>
  @type record_transformer
  enable_ruby true
  <record>
    kubernetes_pod_label_values {ruby_fields}
  </record>
</filter>

<match {pattern}>
  @type rewrite_tag_filter
  <rule>
    key      kubernetes_pod_label_values
    pattern  ^(.+)$
    tag     ${{tag}}._labels.$1
  </rule>
</match>

<filter {pattern}.**>
  @type record_transformer
  remove_keys kubernetes_pod_label_values
</filter>
"#
    )
}

#[derive(Default)]
pub struct LabelSelectorStage;

impl Stage for LabelSelectorStage {
    fn name(&self) -> &'static str {
        "label_selector"
    }

    fn process(
        &mut self,
        mut input: Fragment,
        tenant: &TenantContext,
        gen: &mut GenerationContext,
    ) -> Result<Fragment, StageError> {
        let mut all_referenced: BTreeMap<String, String> = BTreeMap::new();
        apply_recursively_in_place(&mut input, &mut |d| {
            if (d.name != "filter" && d.name != "match") || !d.tag.starts_with(MACRO_LABELS) {
                return Ok(());
            }
            let labels = fluentd::selector::parse_tag_to_labels(&d.tag)
                .map_err(|e| StageError::new(e.to_string()))?;
            for k in labels.keys() {
                all_referenced.insert(k.clone(), String::new());
            }
            Ok(())
        })?;

        if all_referenced.is_empty() {
            return Ok(input);
        }

        all_referenced.remove(CONTAINER_LABEL);
        let sorted_label_names: Vec<String> = all_referenced.keys().cloned().collect();

        let gen_ro = gen.clone();
        apply_recursively_in_place(&mut input, &mut |d| {
            if (d.name != "filter" && d.name != "match") || !d.tag.starts_with(MACRO_LABELS) {
                return Ok(());
            }
            let Ok(labels) = fluentd::selector::parse_tag_to_labels(&d.tag) else {
                return Ok(());
            };
            d.tag = make_tag_from_filter(&tenant.namespace, &sorted_label_names, &labels);
            d.tag = gen_ro.augment_tag(&d.tag);
            Ok(())
        })?;

        let pattern = format!("kube.{}.*.*", tenant.namespace);
        let extra = parse_string(&retag_template(&pattern, &sorted_label_names))
            .map_err(|e| StageError::new(e.to_string()))?;

        let mut out = extra;
        out.extend(input);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_label_selector_tag() {
        let input =
            fluentd::parse_string("<match $labels(app=web)>\n  @type null\n</match>\n").unwrap();
        let mut gen = GenerationContext::new();
        let tenant = TenantContext::new("ns", "id");
        let mut stage = LabelSelectorStage;
        let out = stage.process(input, &tenant, &mut gen).unwrap();
        let last = out.last().unwrap();
        assert_eq!(last.tag, "kube.ns.*.*._labels.web");
    }

    #[test]
    fn safe_label_value_normalizes() {
        assert_eq!(safe_label_value(""), "_");
        assert_eq!(safe_label_value("a.b-c"), "a_b_c");
    }
}
