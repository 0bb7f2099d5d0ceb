use fluentd::{parse_string, Directive, Fragment};

use crate::context::bridge_name;
use crate::walk::apply_recursively_in_place;
use crate::{GenerationContext, Stage, StageError, TenantContext};

const MACRO_FROM: &str = "$from";

/// Extracts `OTHER` out of a `@$from(OTHER)` label tag, or `None` if the
/// label doesn't use the macro.
fn extract_source_ns_from_macro(label_expr: &str) -> Option<&str> {
    let prefix = format!("@{MACRO_FROM}");
    if !label_expr.starts_with(&prefix) {
        return None;
    }
    let start = label_expr.rfind('(')?;
    let end = label_expr.rfind(')')?;
    if end <= start {
        return None;
    }
    Some(label_expr[start + 1..end].trim())
}

fn make_rewrite_tag_fragment(source_ns: &str, dest_ns: &str) -> Result<Fragment, StageError> {
    let text = format!(
        r#"
<match kube.{source_ns}.**>
  @type rewrite_tag_filter
  <rule>
    key _dummy_
    pattern /ZZ/
    invert true
    tag kube.{dest_ns}.${{tag_parts[2]}}.${{tag_parts[3]}}
  </rule>
</match>
"#
    );
    parse_string(&text).map_err(|e| StageError::new(e.to_string()))
}

#[derive(Default)]
pub struct ShareStage;

impl Stage for ShareStage {
    fn name(&self) -> &'static str {
        "share"
    }

    fn prepare(
        &mut self,
        input: &Fragment,
        tenant: &TenantContext,
        gen: &mut GenerationContext,
    ) -> Result<Fragment, StageError> {
        let mut input = input.clone();
        apply_recursively_in_place(&mut input, &mut |d| {
            if d.name != "label" {
                return Ok(());
            }
            if let Some(source_ns) = extract_source_ns_from_macro(&d.tag) {
                gen.referenced_bridges.insert(bridge_name(source_ns, &tenant.namespace));
            }
            Ok(())
        })?;
        Ok(Vec::new())
    }

    fn process(
        &mut self,
        mut input: Fragment,
        tenant: &TenantContext,
        gen: &mut GenerationContext,
    ) -> Result<Fragment, StageError> {
        apply_recursively_in_place(&mut input, &mut |d| {
            if d.name != "match" || d.type_of() != "copy" {
                return Ok(());
            }

            let mut new_content = Vec::with_capacity(d.nested.len());
            for nested in std::mem::take(&mut d.nested) {
                if nested.name != "store" || nested.type_of() != "share" {
                    new_content.push(nested);
                    continue;
                }

                let dest_ns = nested.param("with_namespace");
                if dest_ns.is_empty() {
                    return Err(StageError::new("@type share requires a with_namespace parameter"));
                }
                let bridge = bridge_name(&tenant.namespace, &dest_ns);

                if gen.referenced_bridges.contains(&bridge) {
                    let mut store = Directive::new("store", "");
                    store.set_type("relabel");
                    store.set_param("@label", bridge);
                    new_content.push(store);
                }
            }
            d.nested = new_content;
            Ok(())
        })?;

        apply_recursively_in_place(&mut input, &mut |d| {
            if d.name != "label" {
                return Ok(());
            }
            let Some(source_ns) = extract_source_ns_from_macro(&d.tag).map(str::to_string) else {
                return Ok(());
            };
            let bridge = bridge_name(&source_ns, &tenant.namespace);
            d.tag = bridge;

            let fragment = make_rewrite_tag_fragment(&source_ns, &tenant.namespace)?;
            let mut nested = fragment;
            nested.append(&mut d.nested);
            d.nested = nested;
            Ok(())
        })?;

        Ok(input)
    }

    fn validation_trailer(&self, tenant: &TenantContext, gen: &GenerationContext) -> Fragment {
        let producer_prefix = format!("{}{}__", crate::BRIDGE_PREFIX, tenant.namespace);
        gen.referenced_bridges
            .iter()
            .filter(|b| b.starts_with(&producer_prefix))
            .map(|bridge| {
                let mut label = Directive::new("label", bridge.clone());
                let mut sink = Directive::new("match", "**");
                sink.set_type("null");
                label.nested.push(sink);
                label
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fluentd::parse_string;

    #[test]
    fn registers_and_rewrites_bridge() {
        let consumer = parse_string(
            "<label @$from(producer)>\n  <match **>\n    @type null\n  </match>\n</label>\n",
        )
        .unwrap();
        let mut gen = GenerationContext::new();
        let consumer_tenant = TenantContext::new("consumer", "id");
        let mut stage = ShareStage;
        stage.prepare(&consumer, &consumer_tenant, &mut gen).unwrap();
        assert!(gen.referenced_bridges.contains("@bridge-producer__consumer"));

        let out = stage.process(consumer, &consumer_tenant, &mut gen).unwrap();
        assert_eq!(out[0].tag, "@bridge-producer__consumer");
        assert_eq!(out[0].nested[0].type_of(), "rewrite_tag_filter");

        let producer = parse_string(
            "<match **>\n  @type copy\n  <store>\n    @type share\n    with_namespace consumer\n  </store>\n</match>\n",
        )
        .unwrap();
        let producer_tenant = TenantContext::new("producer", "id");
        let out = stage.process(producer, &producer_tenant, &mut gen).unwrap();
        assert_eq!(out[0].nested[0].type_of(), "relabel");
        assert_eq!(out[0].nested[0].param("@label"), "@bridge-producer__consumer");
    }

    #[test]
    fn validation_trailer_terminates_bridges_as_producer() {
        let mut gen = GenerationContext::new();
        gen.referenced_bridges.insert("@bridge-producer__consumer".to_string());
        let tenant = TenantContext::new("producer", "id");
        let stage = ShareStage;
        let trailer = stage.validation_trailer(&tenant, &gen);
        assert_eq!(trailer.len(), 1);
        assert_eq!(trailer[0].tag, "@bridge-producer__consumer");
    }
}
