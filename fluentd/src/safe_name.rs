/// Replaces any rune that isn't a letter, digit, `-` or `_` with `-`, so the
/// result is always safe to embed in a fluentd tag or a filesystem path.
pub fn make_fluentd_safe_name(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect()
}

/// Renders a `{'k'=>'v',...}` Ruby hash literal with keys in sorted order,
/// for embedding inside generated `record_transformer` directives.
pub fn to_map_literal(labels: &std::collections::BTreeMap<String, String>) -> String {
    if labels.is_empty() {
        return "{}".to_string();
    }
    let body = labels
        .iter()
        .map(|(k, v)| format!("'{k}'=>'{v}'"))
        .collect::<Vec<_>>()
        .join(",");
    format!("{{{body}}}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_unsafe_chars() {
        assert_eq!(make_fluentd_safe_name("my.deploy/id"), "my-deploy-id");
        assert_eq!(make_fluentd_safe_name("safe-Name_1"), "safe-Name_1");
    }

    #[test]
    fn empty_map_literal() {
        assert_eq!(to_map_literal(&Default::default()), "{}");
    }

    #[test]
    fn sorted_map_literal() {
        let mut m = std::collections::BTreeMap::new();
        m.insert("b".to_string(), "2".to_string());
        m.insert("a".to_string(), "1".to_string());
        assert_eq!(to_map_literal(&m), "{'a'=>'1','b'=>'2'}");
    }
}
