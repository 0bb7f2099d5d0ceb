use indexmap::IndexMap;

/// A single `key value # comment` line inside a directive body.
///
/// `value` is the raw text after the key, including any trailing comment.
/// Comment-stripping happens on read, not on store, so the original text
/// survives for callers that need it (see `param_verbatim`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Param {
    pub value: String,
}

impl Param {
    pub fn new(value: impl Into<String>) -> Self {
        Param { value: value.into() }
    }
}

pub type Params = IndexMap<String, Param>;

/// One node of a parsed fluentd config tree: `<name tag> ... </name>` or a
/// bare `key value` line promoted to a directive with no tag and no body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub name: String,
    pub tag: String,
    pub params: Params,
    pub nested: Fragment,
}

/// An ordered sequence of sibling directives; the unit both the parser and
/// every pipeline stage operate on.
pub type Fragment = Vec<Directive>;

impl Directive {
    pub fn new(name: impl Into<String>, tag: impl Into<String>) -> Self {
        Directive {
            name: name.into(),
            tag: tag.into(),
            params: Params::new(),
            nested: Vec::new(),
        }
    }

    /// Trailing-comment-stripped, whitespace-trimmed parameter value, or
    /// `""` if the parameter is absent.
    pub fn param(&self, name: &str) -> String {
        match self.params.get(name) {
            Some(p) => trim_trailing_comment(&p.value),
            None => String::new(),
        }
    }

    /// Raw parameter value including any trailing `# comment`.
    pub fn param_verbatim(&self, name: &str) -> String {
        self.params
            .get(name)
            .map(|p| p.value.clone())
            .unwrap_or_default()
    }

    pub fn has_param(&self, name: &str) -> bool {
        self.params.contains_key(name)
    }

    /// Sets a parameter, or removes it entirely when `value` is empty --
    /// mirrors the teacher's "clean" setter used by processors that
    /// unconditionally strip params they've consumed.
    pub fn set_param(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        if value.is_empty() {
            self.params.shift_remove(&name);
        } else {
            self.params.insert(name, Param::new(value));
        }
    }

    pub fn remove_param(&mut self, name: &str) {
        self.params.shift_remove(name);
    }

    /// Inserts a parameter unconditionally, even an empty one -- used by the
    /// parser, where `no_value` and `trailing` lines are legitimate params
    /// with an empty value rather than absent params.
    pub fn set_param_raw(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.params.insert(name.into(), Param::new(value));
    }

    /// The plugin type, read from the `@type` parameter only -- legacy
    /// bare `type` parameters are a distinct, unrelated key.
    pub fn type_of(&self) -> String {
        self.param("@type")
    }

    pub fn set_type(&mut self, type_name: impl Into<String>) {
        self.set_param("@type", type_name);
    }

    pub fn clone_deep(&self) -> Directive {
        self.clone()
    }
}

pub fn trim_trailing_comment(line: &str) -> String {
    match line.find('#') {
        Some(i) if i > 0 => line[..i].trim().to_string(),
        _ => line.trim().to_string(),
    }
}

/// Builds a `Params` map from alternating key/value pairs, mirroring the
/// teacher's `ParamsFromKV`. An odd trailing key without a value is dropped.
pub fn params_from_kv(pairs: &[&str]) -> Params {
    let mut params = Params::new();
    let mut iter = pairs.chunks_exact(2);
    for chunk in &mut iter {
        params.insert(chunk[0].to_string(), Param::new(chunk[1]));
    }
    params
}
