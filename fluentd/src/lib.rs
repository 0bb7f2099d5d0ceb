//! Parsing, canonical rendering and small shared utilities for the
//! fluentd-flavoured configuration DSL: the common ground every pipeline
//! stage and the generator build on.

pub mod directive;
pub mod exec;
pub mod hash;
pub mod parser;
pub mod render;
pub mod safe_name;
pub mod selector;

pub use directive::{trim_trailing_comment, Directive, Fragment, Param, Params};
pub use hash::hash;
pub use parser::{parse, parse_string, ParseError};
pub use render::{render, FragmentExt};
pub use safe_name::{make_fluentd_safe_name, to_map_literal};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_errors_on_bad_inputs() {
        let bad_inputs = [
            "\n@type hello\n",
            "\n </match>",
            "\n</match>\n",
            "<source>",
            "<match>\n</filter>",
        ];
        for input in bad_inputs {
            assert!(parse_string(input).is_err(), "expected error for {input:?}");
        }
    }

    #[test]
    fn parse_tag_and_params() {
        let s1 = r#"
# hello
<match {abc,def}>
  ms    1
  one_space 2
  no_value
  trailing
  trailing_val val
  trailing_comment_val val #indeed
  trailing_comment #indeed
  # comment
  #inl_comment_val 123 # this is the comment
</match>
"#;
        let fragment = parse_string(s1).unwrap();
        let d = &fragment[0];
        assert_eq!(d.name, "match");
        assert_eq!(d.tag, "{abc,def}");
        assert_eq!(d.param("ms"), "1");
        assert_eq!(d.param("one_space"), "2");
        assert_eq!(d.param("no_value"), "");
        assert_eq!(d.param("trailing"), "");
        assert_eq!(d.param("trailing_val"), "val");
        assert_eq!(d.param_verbatim("trailing_comment_val"), "val #indeed");
        assert_eq!(d.param_verbatim("trailing_comment"), "#indeed");
        assert_eq!(d.param("trailing_comment_val"), "val");
        assert_eq!(d.param("trailing_comment"), "#indeed");
    }

    #[test]
    fn nested_render_matches_canonical_form() {
        let nested = r#"
<filter   myapp.access  >
  @type test # inline comment
  <record>
    host_param "#{Socket.gethostname}"
  </record>
</filter>
"#;
        let fragment = parse_string(nested).unwrap();
        let s = fragment.render();
        assert_eq!(
            s,
            "<filter myapp.access>\n  @type test\n\n  <record>\n    host_param \"#{Socket.gethostname}\"\n  </record>\n</filter>\n\n"
        );
    }

    #[test]
    fn get_type_reads_only_at_type() {
        let nested = r#"
<source>
  hello http
  port 9880
</source>
"#;
        let fragment = parse_string(nested).unwrap();
        assert_eq!(fragment[0].type_of(), "");
    }

    #[test]
    fn clean_param_removes_on_empty() {
        let mut dir = Directive::new("ok", "tag");
        dir.set_param_raw("a", "1");
        dir.set_param_raw("b", "2");
        assert_eq!(dir.params.len(), 2);

        dir.set_param("z", "");
        assert_eq!(dir.params.len(), 2);

        dir.set_param("a", "");
        assert_eq!(dir.params.len(), 1);

        dir.set_param("b", "");
        assert_eq!(dir.params.len(), 0);
    }

    #[test]
    fn parse_nested_three_directives() {
        let nested = r#"
<source>
  @type http
  port 9880
</source>

<filter myapp.access>
  type record_transformer
  <record>
    host_param "#{Socket.gethostname}"
  </record>
</filter>

<match myapp.access>
  @type file
  path /var/log/fluent/access
</match>
"#;
        let fragment = parse_string(nested).unwrap();
        assert_eq!(fragment.len(), 3);

        let src = &fragment[0];
        assert_eq!(src.name, "source");
        assert_eq!(src.param("port"), "9880");
        assert_eq!(src.param("no-such-param"), "");
        assert_eq!(src.type_of(), "http");

        let filter = &fragment[1];
        assert_eq!(filter.name, "filter");
        assert_eq!(filter.tag, "myapp.access");
        let record = &filter.nested[0];
        assert_eq!(record.name, "record");
        assert_eq!(record.param_verbatim("host_param"), "\"#{Socket.gethostname}\"");

        let m = &fragment[2];
        assert_eq!(m.name, "match");
        assert_eq!(m.type_of(), "file");
        assert_eq!(m.param("path"), "/var/log/fluent/access");
    }
}
