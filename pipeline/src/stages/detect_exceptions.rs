use fluentd::{Directive, Fragment};

use crate::walk::{apply_recursively_expanding, apply_recursively_in_place};
use crate::{GenerationContext, Stage, StageError, TenantContext};

const KEY_DETEXC: &str = "detexc";
const PREFIX_PROCESSED: &str = "_proc";

const COPIED_PARAMS: &[&str] = &[
    "languages",
    "multiline_flush_interval",
    "max_lines",
    "max_bytes",
    "message",
];

fn make_tag_prefix(selector: &str) -> String {
    fluentd::hash(KEY_DETEXC, selector)
}

/// The labels stage may have already produced a tag in the form
/// `xxx _proc.xxx`; the auto-generated `<match>` directives need only the
/// first alternative.
fn extract_selector(tag: &str) -> &str {
    tag.split(' ').next().unwrap_or(tag)
}

#[derive(Default)]
pub struct DetectExceptionsStage;

impl Stage for DetectExceptionsStage {
    fn name(&self) -> &'static str {
        "detect_exceptions"
    }

    fn prepare(
        &mut self,
        input: &Fragment,
        _tenant: &TenantContext,
        gen: &mut GenerationContext,
    ) -> Result<Fragment, StageError> {
        let mut found = false;
        let mut input = input.clone();
        apply_recursively_in_place(&mut input, &mut |d| {
            if d.name == "filter" && d.type_of() == "detect_exceptions" {
                found = true;
            }
            Ok(())
        })?;
        if found {
            gen.needs_processing = true;
        }
        Ok(Vec::new())
    }

    fn process(
        &mut self,
        input: Fragment,
        _tenant: &TenantContext,
        _gen: &mut GenerationContext,
    ) -> Result<Fragment, StageError> {
        apply_recursively_expanding(input, &mut |d: Directive| {
            if d.name != "filter" || d.type_of() != "detect_exceptions" {
                return Ok(vec![d]);
            }

            let unprocessed_selector = extract_selector(&d.tag).to_string();
            let tag_prefix = make_tag_prefix(&unprocessed_selector);

            let mut rule = Directive::new("rule", "");
            rule.set_param("key", "_dummy");
            rule.set_param("pattern", "/ZZ/");
            rule.set_param("invert", "true");
            rule.set_param("tag", format!("{tag_prefix}.{PREFIX_PROCESSED}.${{tag}}"));

            let mut rewrite_tag = Directive::new("match", unprocessed_selector.clone());
            rewrite_tag.set_type("rewrite_tag_filter");
            rewrite_tag.nested.push(rule);

            let mut detect = Directive::new(
                "match",
                format!("{tag_prefix}.{PREFIX_PROCESSED}.{unprocessed_selector}"),
            );
            detect.set_type("detect_exceptions");
            detect.set_param("stream", "container_info");
            detect.set_param("remove_tag_prefix", tag_prefix);

            for key in COPIED_PARAMS {
                let v = d.param(key);
                if !v.is_empty() {
                    detect.set_param(*key, v);
                }
            }

            Ok(vec![rewrite_tag, detect])
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fluentd::parse_string;

    #[test]
    fn prepare_flags_generation_context() {
        let input = parse_string(
            "<filter kube.ns.**>\n  @type detect_exceptions\n  languages java\n</filter>\n",
        )
        .unwrap();
        let tenant = TenantContext::new("ns", "id");
        let mut gen = GenerationContext::new();
        let mut stage = DetectExceptionsStage;
        stage.prepare(&input, &tenant, &mut gen).unwrap();
        assert!(gen.needs_processing);
    }

    #[test]
    fn process_splits_into_retag_and_detector() {
        let input = parse_string(
            "<filter kube.ns.**>\n  @type detect_exceptions\n  languages java\n</filter>\n",
        )
        .unwrap();
        let tenant = TenantContext::new("ns", "id");
        let mut gen = GenerationContext::new();
        let mut stage = DetectExceptionsStage;
        let out = stage.process(input, &tenant, &mut gen).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].type_of(), "rewrite_tag_filter");
        assert_eq!(out[1].type_of(), "detect_exceptions");
        assert_eq!(out[1].param("languages"), "java");
    }
}
