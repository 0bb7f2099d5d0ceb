use crate::directive::{trim_trailing_comment, Directive, Fragment};

const TYPE_PARAM: &str = "@type";

fn render_lines(d: &Directive, depth: usize) -> Vec<String> {
    let indent = "  ".repeat(depth);
    let inner_indent = "  ".repeat(depth + 1);
    let mut lines = Vec::new();

    lines.push(if d.tag.is_empty() {
        format!("{indent}<{}>", d.name)
    } else {
        format!("{indent}<{} {}>", d.name, d.tag)
    });

    if let Some(p) = d.params.get(TYPE_PARAM) {
        lines.push(format!("{inner_indent}{TYPE_PARAM} {}", trim_trailing_comment(&p.value)));
    }

    let mut other: Vec<&String> = d
        .params
        .keys()
        .filter(|k| k.as_str() != TYPE_PARAM)
        .collect();
    other.sort();
    for key in other {
        let value = trim_trailing_comment(&d.params[key].value);
        if value.is_empty() {
            lines.push(format!("{inner_indent}{key}"));
        } else {
            lines.push(format!("{inner_indent}{key} {value}"));
        }
    }

    if !d.nested.is_empty() {
        lines.push(String::new());
        for (i, child) in d.nested.iter().enumerate() {
            if i > 0 {
                lines.push(String::new());
            }
            lines.extend(render_lines(child, depth + 1));
        }
    }

    lines.push(format!("{indent}</{}>", d.name));
    lines
}

/// Canonical string form of a fragment: 2-space indent per nesting level,
/// `@type` rendered first, remaining params alphabetized, a blank line
/// between sibling directives, and a trailing blank line. This is the sole
/// source of truth fed to hashing -- two trees that render identically are
/// considered identical.
pub fn render(fragment: &Fragment) -> String {
    let mut lines = Vec::new();
    for (i, d) in fragment.iter().enumerate() {
        if i > 0 {
            lines.push(String::new());
        }
        lines.extend(render_lines(d, 0));
    }
    if lines.is_empty() {
        return String::new();
    }
    format!("{}\n\n", lines.join("\n"))
}

pub trait FragmentExt {
    fn render(&self) -> String;
}

impl FragmentExt for Fragment {
    fn render(&self) -> String {
        render(self)
    }
}
