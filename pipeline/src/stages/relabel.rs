use fluentd::Fragment;

use crate::walk::apply_recursively_in_place;
use crate::{GenerationContext, Stage, StageError, TenantContext};

const VALID_LABEL_DIRECTIVES: &[&str] = &["match", "store", "filter", "parse", "source"];
const VALID_LABEL_TYPES: &[&str] = &["relabel", "null", "forward", "stdout", "copy", "kafka", "elasticsearch"];

/// Labels starting with `@$` are the `$from` bridge macro, owned by the
/// share-bridge stage that runs after this one.
fn is_bridge_macro(label: &str) -> bool {
    label.starts_with("@$")
}

fn normalize_label_name(namespace: &str, label: &str) -> String {
    if is_bridge_macro(label) {
        return label.to_string();
    }
    format!(
        "@{}-{}",
        fluentd::make_fluentd_safe_name(label),
        fluentd::hash(namespace, label),
    )
}

#[derive(Default)]
pub struct RelabelStage;

impl Stage for RelabelStage {
    fn name(&self) -> &'static str {
        "relabel"
    }

    fn process(
        &mut self,
        mut input: Fragment,
        tenant: &TenantContext,
        _gen: &mut GenerationContext,
    ) -> Result<Fragment, StageError> {
        apply_recursively_in_place(&mut input, &mut |d| {
            if !VALID_LABEL_DIRECTIVES.contains(&d.name.as_str()) {
                return Ok(());
            }

            let timeout_label = d.param("timeout_label");
            if !timeout_label.is_empty() {
                if !timeout_label.starts_with('@') {
                    return Err(StageError::new(format!(
                        "bad label name {timeout_label} for timeout_label, must start with @"
                    )));
                }
                d.set_param("timeout_label", normalize_label_name(&tenant.namespace, &timeout_label));
            }

            if !VALID_LABEL_TYPES.contains(&d.type_of().as_str()) {
                return Ok(());
            }

            let label_name = d.param("@label");
            if !label_name.is_empty() {
                if !label_name.starts_with('@') {
                    return Err(StageError::new(format!(
                        "bad label name {label_name} for @label, must start with @"
                    )));
                }
                d.set_param("@label", normalize_label_name(&tenant.namespace, &label_name));
            }

            Ok(())
        })?;

        apply_recursively_in_place(&mut input, &mut |d| {
            if d.name != "label" {
                return Ok(());
            }
            if !d.tag.starts_with('@') {
                return Err(StageError::new(format!(
                    "bad label name {} for <label>, must start with @",
                    d.tag
                )));
            }
            d.tag = normalize_label_name(&tenant.namespace, &d.tag);
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
    fn normalizes_label_directive_tag() {
        let input = parse_string("<label @myLabel>\n  <match **>\n    @type null\n  </match>\n</label>\n").unwrap();
        let tenant = TenantContext::new("ns", "id");
        let mut gen = GenerationContext::new();
        let mut stage = RelabelStage;
        let out = stage.process(input, &tenant, &mut gen).unwrap();
        assert!(out[0].tag.starts_with("@myLabel-"));
    }

    #[test]
    fn leaves_bridge_macro_labels_alone() {
        let input = parse_string("<label @$from(other)>\n  <match **>\n    @type null\n  </match>\n</label>\n").unwrap();
        let tenant = TenantContext::new("ns", "id");
        let mut gen = GenerationContext::new();
        let mut stage = RelabelStage;
        let out = stage.process(input, &tenant, &mut gen).unwrap();
        assert_eq!(out[0].tag, "@$from(other)");
    }

    #[test]
    fn rejects_label_without_at_prefix() {
        let input = parse_string("<label bad>\n  <match **>\n    @type null\n  </match>\n</label>\n").unwrap();
        let tenant = TenantContext::new("ns", "id");
        let mut gen = GenerationContext::new();
        let mut stage = RelabelStage;
        assert!(stage.process(input, &tenant, &mut gen).is_err());
    }
}
