use std::collections::HashMap;

use fluentd::{Directive, Fragment};

use crate::walk::apply_recursively_in_place;
use crate::{GenerationContext, Stage, StageError, TenantContext};

const DIR_PLUGIN: &str = "plugin";

/// Pulls the admin tenant's top-level `<plugin NAME>` directives out of its
/// fragment and into the generation context, keyed by `NAME`. Call this on
/// the admin tenant's parsed fragment before running the pipeline on any
/// other tenant -- it is not itself a pipeline phase, since it only ever
/// runs once per reconcile rather than once per tenant.
pub fn extract_aliases(gen: &mut GenerationContext, input: Fragment) -> Fragment {
    let mut plugins = HashMap::new();
    let mut rest = Vec::with_capacity(input.len());
    for dir in input {
        if dir.name == DIR_PLUGIN {
            plugins.insert(dir.tag.clone(), dir);
        } else {
            rest.push(dir);
        }
    }
    gen.plugin_aliases = plugins;
    rest
}

#[derive(Default)]
pub struct PluginAliasStage;

impl Stage for PluginAliasStage {
    fn name(&self) -> &'static str {
        "plugin_alias"
    }

    fn process(
        &mut self,
        mut input: Fragment,
        _tenant: &TenantContext,
        gen: &mut GenerationContext,
    ) -> Result<Fragment, StageError> {
        if gen.plugin_aliases.is_empty() {
            return Ok(input);
        }

        let aliases = gen.plugin_aliases.clone();
        apply_recursively_in_place(&mut input, &mut |d: &mut Directive| {
            if d.name != "match" && d.name != "store" {
                return Ok(());
            }
            let Some(replacement) = aliases.get(&d.type_of()) else {
                return Ok(());
            };

            d.nested = replacement.nested.clone();
            for (k, v) in &replacement.params {
                if !d.params.contains_key(k) {
                    d.params.insert(k.clone(), v.clone());
                }
            }
            d.set_type(replacement.type_of());
            d.remove_param("type");

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
    fn substitutes_known_alias() {
        let admin = parse_string(
            r#"
<plugin my_s3>
  @type s3
  bucket b
</plugin>
"#,
        )
        .unwrap();
        let mut gen = GenerationContext::new();
        extract_aliases(&mut gen, admin);

        let tenant_tree = parse_string(
            r#"
<match kube.ns.**>
  @type my_s3
  path p
</match>
"#,
        )
        .unwrap();

        let mut stage = PluginAliasStage;
        let tenant = TenantContext::new("ns", "id");
        let out = stage.process(tenant_tree, &tenant, &mut gen).unwrap();
        assert_eq!(out[0].type_of(), "s3");
        assert_eq!(out[0].param("bucket"), "b");
        assert_eq!(out[0].param("path"), "p");
    }
}
