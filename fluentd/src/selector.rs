use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

pub const MACRO_LABELS: &str = "$labels";
pub const CONTAINER_LABEL: &str = "_container";

static VALID_LABEL_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z0-9][-A-Za-z0-9/_.]*)?[A-Za-z0-9]$").expect("static regex"));
static VALID_LABEL_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9])?$").expect("static regex"));

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SelectorError {
    #[error("bad $labels macro use: {0}")]
    BadMacroUse(String),
    #[error("bad label definition: {0}")]
    BadDefinition(String),
    #[error("bad label name: {0}")]
    BadName(String),
    #[error("bad label value: {0}")]
    BadValue(String),
    #[error("value for {CONTAINER_LABEL} cannot be an empty string")]
    EmptyContainerValue,
    #[error("at least one label must be given")]
    Empty,
}

/// Parses a `$labels(k1=v1, k2=v2, _container=C)` macro tag into its label
/// set. `_container` is a reserved key matched against the container name
/// rather than a pod label, and may not have an empty value.
pub fn parse_tag_to_labels(tag: &str) -> Result<BTreeMap<String, String>, SelectorError> {
    let tag = tag.trim();
    if !tag.starts_with(&format!("{MACRO_LABELS}(")) || !tag.ends_with(')') {
        return Err(SelectorError::BadMacroUse(tag.to_string()));
    }

    let labels_only = &tag[MACRO_LABELS.len() + 1..tag.len() - 1];
    let mut result = BTreeMap::new();

    for rec in labels_only.split(',') {
        if rec.is_empty() {
            continue;
        }
        let kv: Vec<&str> = rec.splitn(2, '=').collect();
        if kv.len() != 2 {
            return Err(SelectorError::BadDefinition(rec.to_string()));
        }

        let k = kv[0].trim();
        if k != CONTAINER_LABEL && !VALID_LABEL_NAME.is_match(k) {
            return Err(SelectorError::BadName(k.to_string()));
        }

        let v = kv[1].trim();
        if !VALID_LABEL_VALUE.is_match(v) {
            return Err(SelectorError::BadValue(v.to_string()));
        }
        if k == CONTAINER_LABEL && v.is_empty() {
            return Err(SelectorError::EmptyContainerValue);
        }

        result.insert(k.to_string(), v.to_string());
    }

    if result.is_empty() {
        return Err(SelectorError::Empty);
    }

    Ok(result)
}

/// True iff every key in `labels` matches either `container_name` (for the
/// reserved `_container` key) or the corresponding entry of `container_labels`.
pub fn match_labels(
    labels: &BTreeMap<String, String>,
    container_labels: &BTreeMap<String, String>,
    container_name: &str,
) -> bool {
    labels.iter().all(|(k, v)| {
        let value = if k == CONTAINER_LABEL {
            container_name
        } else {
            container_labels.get(k).map(String::as_str).unwrap_or_default()
        };
        v == value
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_macro() {
        let labels = parse_tag_to_labels("$labels(app=web, _container=nginx)").unwrap();
        assert_eq!(labels.get("app"), Some(&"web".to_string()));
        assert_eq!(labels.get(CONTAINER_LABEL), Some(&"nginx".to_string()));
    }

    #[test]
    fn rejects_empty_container_value() {
        assert_eq!(
            parse_tag_to_labels("$labels(_container=)"),
            Err(SelectorError::EmptyContainerValue)
        );
    }

    #[test]
    fn rejects_no_labels() {
        assert_eq!(parse_tag_to_labels("$labels()"), Err(SelectorError::Empty));
    }

    #[test]
    fn match_labels_checks_container_name() {
        let mut want = BTreeMap::new();
        want.insert(CONTAINER_LABEL.to_string(), "nginx".to_string());
        assert!(match_labels(&want, &BTreeMap::new(), "nginx"));
        assert!(!match_labels(&want, &BTreeMap::new(), "other"));
    }
}
