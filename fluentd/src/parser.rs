use crate::directive::{Directive, Fragment};

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("unexpected closing tag </{0}>")]
    UnexpectedClose(String),
    #[error("mismatched closing tag: expected </{expected}>, found </{found}>")]
    MismatchedClose { expected: String, found: String },
    #[error("malformed opening tag: {0}")]
    MalformedOpen(String),
    #[error("param line outside of any directive: {0}")]
    OrphanParam(String),
    #[error("unterminated directive <{0}>")]
    Unterminated(String),
}

/// Parses a fluentd-style config fragment: `<name tag>` ... `</name>` blocks
/// nesting arbitrarily deep, plus `key value [# comment]` param lines and
/// `#`-prefixed full-line comments.
pub fn parse(input: &str) -> Result<Fragment, ParseError> {
    let mut stack: Vec<Directive> = Vec::new();
    let mut top: Fragment = Vec::new();

    for raw_line in input.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(rest) = line.strip_prefix("</") {
            let name = rest.trim_end_matches('>').trim().to_string();
            let finished = stack
                .pop()
                .ok_or_else(|| ParseError::UnexpectedClose(name.clone()))?;
            if finished.name != name {
                return Err(ParseError::MismatchedClose {
                    expected: finished.name,
                    found: name,
                });
            }
            match stack.last_mut() {
                Some(parent) => parent.nested.push(finished),
                None => top.push(finished),
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix('<') {
            let inner = rest
                .strip_suffix('>')
                .ok_or_else(|| ParseError::MalformedOpen(line.to_string()))?
                .trim();
            let mut parts = inner.splitn(2, char::is_whitespace);
            let name = parts.next().unwrap_or("").trim();
            if name.is_empty() {
                return Err(ParseError::MalformedOpen(line.to_string()));
            }
            let tag = parts.next().unwrap_or("").trim();
            stack.push(Directive::new(name, tag));
            continue;
        }

        // param line
        let directive = stack
            .last_mut()
            .ok_or_else(|| ParseError::OrphanParam(line.to_string()))?;
        let mut parts = line.splitn(2, char::is_whitespace);
        let key = parts.next().unwrap_or("").to_string();
        let value = parts.next().unwrap_or("").trim().to_string();
        directive.set_param_raw(key, value);
    }

    if let Some(unterminated) = stack.pop() {
        return Err(ParseError::Unterminated(unterminated.name));
    }

    Ok(top)
}

pub fn parse_string(input: &str) -> Result<Fragment, ParseError> {
    parse(input)
}
