use fluentd::Fragment;

use crate::walk::apply_recursively_in_place;
use crate::{GenerationContext, Stage, StageError, TenantContext};

const MACRO_THISNS: &str = "$thisns";
const MACRO_LABELS: &str = "$labels";
const MACRO_UNIQUE_TAG: &str = "$tag(";

#[derive(Default)]
pub struct ThisNsStage;

impl Stage for ThisNsStage {
    fn name(&self) -> &'static str {
        "thisns"
    }

    fn process(
        &mut self,
        mut input: Fragment,
        tenant: &TenantContext,
        gen: &mut GenerationContext,
    ) -> Result<Fragment, StageError> {
        let good_prefix = format!("kube.{}", tenant.namespace);
        let gen_ro = gen.clone();

        apply_recursively_in_place(&mut input, &mut |d| {
            if d.name != "match" && d.name != "filter" {
                return Ok(());
            }

            if d.tag == "**" || d.tag == MACRO_THISNS {
                d.tag = format!("{good_prefix}.**");
                d.tag = gen_ro.augment_tag(&d.tag);
                return Ok(());
            }

            if let Some(rest) = d.tag.strip_prefix(MACRO_THISNS) {
                d.tag = format!("{good_prefix}{rest}");
                d.tag = gen_ro.augment_tag(&d.tag);
                return Ok(());
            }

            if d.tag.starts_with(MACRO_LABELS) || d.tag.starts_with(MACRO_UNIQUE_TAG) {
                return Ok(());
            }

            let substituted = d.tag.replace(MACRO_THISNS, &good_prefix);
            if !substituted.starts_with(&format!("{good_prefix}.")) {
                return Err(StageError::new(format!(
                    "bad tag for <{}>: {}. Tag must start with **, $thisns or {}",
                    d.name, d.tag, tenant.namespace
                )));
            }
            d.tag = substituted;

            Ok(())
        })?;

        Ok(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fluentd::parse_string;

    fn tenant() -> TenantContext {
        TenantContext::new("myns", "id")
    }

    #[test]
    fn bare_wildcard_becomes_namespace_wildcard() {
        let input = parse_string("<match **>\n  @type null\n</match>\n").unwrap();
        let mut gen = GenerationContext::new();
        let mut stage = ThisNsStage;
        let out = stage.process(input, &tenant(), &mut gen).unwrap();
        assert_eq!(out[0].tag, "kube.myns.**");
    }

    #[test]
    fn bad_tag_is_rejected() {
        let input = parse_string("<match foo.bar>\n  @type null\n</match>\n").unwrap();
        let mut gen = GenerationContext::new();
        let mut stage = ThisNsStage;
        assert!(stage.process(input, &tenant(), &mut gen).is_err());
    }

    #[test]
    fn thisns_prefixed_tags_substitute() {
        let input = parse_string("<match $thisns.app.**>\n  @type null\n</match>\n").unwrap();
        let mut gen = GenerationContext::new();
        let mut stage = ThisNsStage;
        let out = stage.process(input, &tenant(), &mut gen).unwrap();
        assert_eq!(out[0].tag, "kube.myns.app.**");
    }
}
