use fluentd::Fragment;

use crate::walk::apply_recursively_in_place;
use crate::{GenerationContext, Stage, StageError, TenantContext};

const MACRO_UNIQUE_TAG: &str = "$tag";

fn create_unique_tag(tag: &str, namespace: &str) -> String {
    format!("kube.{namespace}._retag.{tag}")
}

#[derive(Default)]
pub struct RetagStage;

impl Stage for RetagStage {
    fn name(&self) -> &'static str {
        "retag"
    }

    fn process(
        &mut self,
        mut input: Fragment,
        tenant: &TenantContext,
        gen: &mut GenerationContext,
    ) -> Result<Fragment, StageError> {
        apply_recursively_in_place(&mut input, &mut |d| {
            if d.name != "match" || d.type_of() != "retag" {
                return Ok(());
            }
            for rule in d.nested.iter_mut() {
                if rule.name != "rule" {
                    continue;
                }
                let tag_param = rule.param("tag");
                if tag_param.is_empty() {
                    return Err(StageError::new("retag plugin requires each rule to have a tag parameter"));
                }
                if tag_param.contains("${tag_parts[") || tag_param.contains("__TAG_PARTS[") {
                    return Err(StageError::new(
                        "retag plugin does not yet support the ${tag_parts[n]} and __TAG_PARTS[n]__ placeholders",
                    ));
                }
                let target_tag = create_unique_tag(&tag_param, &tenant.namespace);
                rule.set_param("tag", target_tag);
            }
            d.set_type("rewrite_tag_filter");
            Ok(())
        })?;

        let gen_ro = gen.clone();
        apply_recursively_in_place(&mut input, &mut |d| {
            if d.name != "match" && d.name != "filter" {
                return Ok(());
            }
            if !d.tag.starts_with(MACRO_UNIQUE_TAG) {
                return Ok(());
            }
            if !d.tag.ends_with(')') {
                return Err(StageError::new(
                    "malformed tag: to match output from the retag plugin the tag must be placed inside the $tag() macro",
                ));
            }
            let target_tag = &d.tag[MACRO_UNIQUE_TAG.len() + 1..d.tag.len() - 1];
            d.tag = create_unique_tag(target_tag, &tenant.namespace);
            d.tag = gen_ro.augment_tag(&d.tag);
            Ok(())
        })?;

        Ok(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fluentd::parse_string;

    #[test]
    fn rewrites_retag_plugin_and_consumer() {
        let input = parse_string(
            r#"
<match emit.me>
  @type retag
  <rule>
    tag new.tag
  </rule>
</match>

<match $tag(new.tag)>
  @type null
</match>
"#,
        )
        .unwrap();
        let tenant = TenantContext::new("ns", "id");
        let mut gen = GenerationContext::new();
        let mut stage = RetagStage;
        let out = stage.process(input, &tenant, &mut gen).unwrap();
        assert_eq!(out[0].type_of(), "rewrite_tag_filter");
        assert_eq!(out[0].nested[0].param("tag"), "kube.ns._retag.new.tag");
        assert_eq!(out[1].tag, "kube.ns._retag.new.tag");
    }
}
