use std::sync::OnceLock;

use fluentd::Fragment;
use regex::Regex;

use crate::walk::{apply_recursively_expanding, apply_recursively_in_place};
use crate::{GenerationContext, Stage, StageError, TenantContext};

const TAG_REGEX: &str =
    r"(?:[^\s{}()]*(?:(?:(?:\{.*?\})|(?:\(.*?\)))[^\s{}()]*)+)|(?:[^\s{}()]+(?:(?:(?:\{.*?\})|(?:\(.*?\)))[^\s{}()]*)*)";

fn tag_matcher() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(TAG_REGEX).expect("static regex"))
}

/// Expands `prefix.{a,b}.suffix` into one tag per alternative, iterating to
/// a fixed point so multiple brace groups all resolve.
fn expand_first_curly_braces(tag: &str) -> Result<Vec<String>, StageError> {
    let Some(open) = tag.find('{') else {
        return Ok(vec![tag.to_string()]);
    };
    if open > 0 && &tag[open - 1..open] == "#" {
        return Err(StageError::new("pattern #{...} is not yet supported in tag definition"));
    }
    let Some(close_rel) = tag[open + 1..].find('}') else {
        return Err(StageError::new(format!("invalid {{...}} pattern in tag definition: {tag}")));
    };
    let close = open + 1 + close_rel;
    if close <= open + 1 {
        return Err(StageError::new(format!("invalid {{...}} pattern in tag definition: {tag}")));
    }
    let expansion_term = &tag[open + 1..close];
    let prefix = &tag[..open];
    let suffix = &tag[close + 1..];
    Ok(expansion_term
        .split(',')
        .map(|t| format!("{prefix}{}{suffix}", t.trim()))
        .collect())
}

fn fixed_point_expand(tag: &str) -> Result<Vec<String>, StageError> {
    let mut processing = vec![tag.to_string()];
    loop {
        let mut expanding = Vec::new();
        for t in &processing {
            expanding.extend(expand_first_curly_braces(t)?);
        }
        if expanding.len() == processing.len() {
            return Ok(expanding);
        }
        processing = expanding;
    }
}

#[derive(Default)]
pub struct TagExpansionStage;

impl Stage for TagExpansionStage {
    fn name(&self) -> &'static str {
        "tag_expansion"
    }

    fn process(
        &mut self,
        input: Fragment,
        tenant: &TenantContext,
        _gen: &mut GenerationContext,
    ) -> Result<Fragment, StageError> {
        if tenant.allow_tag_expansion {
            process_expanding(input)
        } else {
            process_not_expanding(input)
        }
    }
}

fn process_expanding(input: Fragment) -> Result<Fragment, StageError> {
    apply_recursively_expanding(input, &mut |d| {
        if d.name != "match" && d.name != "filter" {
            return Ok(vec![d]);
        }

        let matches: Vec<&str> = tag_matcher().find_iter(&d.tag).map(|m| m.as_str()).collect();
        let remainder: String = tag_matcher().split(&d.tag).collect();
        if !remainder.trim().is_empty() {
            return Err(StageError::new(format!("malformed tag {}: cannot parse it", d.tag)));
        }

        let mut expanded_tags = Vec::new();
        for t in &matches {
            expanded_tags.extend(fixed_point_expand(t)?);
        }

        if expanded_tags.len() == 1 {
            return Ok(vec![d]);
        }

        Ok(expanded_tags
            .into_iter()
            .map(|t| {
                let mut clone = d.clone_deep();
                clone.tag = t;
                clone
            })
            .collect())
    })
}

fn process_not_expanding(mut input: Fragment) -> Result<Fragment, StageError> {
    apply_recursively_in_place(&mut input, &mut |d| {
        if d.name != "match" && d.name != "filter" {
            return Ok(());
        }
        if d.tag.contains('{') {
            return Err(StageError::new("processing of {...} pattern in tags is disabled"));
        }
        Ok(())
    })?;
    Ok(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fluentd::parse_string;

    #[test]
    fn expands_single_brace_group() {
        let input = parse_string("<match prefix.{a,b}.suffix>\n  @type null\n</match>\n").unwrap();
        let mut gen = GenerationContext::new();
        let mut tenant = TenantContext::new("ns", "id");
        tenant.allow_tag_expansion = true;
        let mut stage = TagExpansionStage;
        let out = stage.process(input, &tenant, &mut gen).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].tag, "prefix.a.suffix");
        assert_eq!(out[1].tag, "prefix.b.suffix");
    }

    #[test]
    fn errors_when_disabled_and_brace_present() {
        let input = parse_string("<match prefix.{a,b}.suffix>\n  @type null\n</match>\n").unwrap();
        let mut gen = GenerationContext::new();
        let tenant = TenantContext::new("ns", "id");
        let mut stage = TagExpansionStage;
        assert!(stage.process(input, &tenant, &mut gen).is_err());
    }
}
