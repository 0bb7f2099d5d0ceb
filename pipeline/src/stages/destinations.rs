use fluentd::Fragment;

use crate::stages::mounted_file::MOUNTED_FILE_SOURCE_TYPE;
use crate::walk::apply_recursively_in_place;
use crate::{GenerationContext, Stage, StageError, TenantContext};

const PARAM_BUFFER_PATH: &str = "buffer_path";

fn make_safe_buffer_path(tenant: &TenantContext, orig: &str) -> String {
    format!(
        "/var/log/kfo-{}-{}-{}.buf",
        fluentd::make_fluentd_safe_name(&tenant.deployment_id),
        tenant.namespace,
        fluentd::hash("", orig),
    )
}

#[derive(Default)]
pub struct DestinationsStage;

impl Stage for DestinationsStage {
    fn name(&self) -> &'static str {
        "destinations"
    }

    fn process(
        &mut self,
        mut input: Fragment,
        tenant: &TenantContext,
        _gen: &mut GenerationContext,
    ) -> Result<Fragment, StageError> {
        apply_recursively_in_place(&mut input, &mut |d| {
            if d.name == "match" || d.name == "store" || d.name == "filter" {
                match d.type_of().as_str() {
                    "exec" | "exec_filter" | "stdout" | "rewrite_tag_filter" => {
                        return Err(StageError::new(format!(
                            "cannot use '@type {}' in <{}>",
                            d.type_of(),
                            d.name
                        )));
                    }
                    "detect_exceptions" if d.name == "match" => {
                        return Err(StageError::new(format!(
                            "cannot use '@type {}' in <{}>",
                            d.type_of(),
                            d.name
                        )));
                    }
                    "file" if !tenant.allow_file => {
                        return Err(StageError::new(format!(
                            "cannot use '@type file' in <{}>",
                            d.name
                        )));
                    }
                    "fields_parser" => {
                        if !d.param("remove_tag_prefix").is_empty() || !d.param("add_tag_prefix").is_empty() {
                            return Err(StageError::new("cannot modify tags using the plugin fields_parser"));
                        }
                    }
                    _ => {}
                }
            }
            Ok(())
        })?;

        apply_recursively_in_place(&mut input, &mut |d| {
            if d.name == "match" || d.name == "store" {
                let orig = d.param(PARAM_BUFFER_PATH);
                if !orig.is_empty() {
                    d.set_param(PARAM_BUFFER_PATH, make_safe_buffer_path(tenant, &orig));
                }
                return Ok(());
            }
            if d.name == "buffer" && d.type_of() == "file" {
                let path = d.param("path");
                if !path.is_empty() {
                    d.set_param("path", make_safe_buffer_path(tenant, &path));
                }
            }
            Ok(())
        })?;

        apply_recursively_in_place(&mut input, &mut |d| {
            if d.name == "source" && d.type_of() != MOUNTED_FILE_SOURCE_TYPE {
                return Err(StageError::new("cannot use <source> directive"));
            }
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
    fn forbids_exec_type() {
        let input = parse_string("<match a>\n  @type exec\n</match>\n").unwrap();
        let mut gen = GenerationContext::new();
        let tenant = TenantContext::new("ns", "id");
        let mut stage = DestinationsStage;
        assert!(stage.process(input, &tenant, &mut gen).is_err());
    }

    #[test]
    fn rewrites_buffer_path() {
        let input = parse_string("<match a>\n  @type file\n  buffer_path /tmp/x\n</match>\n").unwrap();
        let mut gen = GenerationContext::new();
        let mut tenant = TenantContext::new("ns", "id");
        tenant.allow_file = true;
        let mut stage = DestinationsStage;
        let out = stage.process(input, &tenant, &mut gen).unwrap();
        assert!(out[0].param("buffer_path").starts_with("/var/log/kfo-id-ns-"));
    }

    #[test]
    fn forbids_plain_source() {
        let input = parse_string("<source>\n  @type http\n</source>\n").unwrap();
        let mut gen = GenerationContext::new();
        let tenant = TenantContext::new("ns", "id");
        let mut stage = DestinationsStage;
        assert!(stage.process(input, &tenant, &mut gen).is_err());
    }
}
