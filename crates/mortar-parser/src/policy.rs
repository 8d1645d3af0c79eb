//! Sandbox policy.
//!
//! A policy is queried, never mutated, while a template compiles. Its presence
//! in the parser options is what turns the sandbox on.

use serde::Deserialize;

/// Capability predicates gating tags, filters and functions.
pub trait Policy: Send + Sync {
    fn is_tag_allowed(&self, name: &str) -> bool;
    fn is_filter_allowed(&self, name: &str) -> bool;
    fn is_function_allowed(&self, name: &str) -> bool;
}

/// Policy backed by allow-lists. `"*"` allows every name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StaticPolicy {
    pub tags: Vec<String>,
    pub filters: Vec<String>,
    pub functions: Vec<String>,
}

impl StaticPolicy {
    /// Policy allowing nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tags and filters that cannot reach host code on their own.
    pub fn safe() -> Self {
        Self::new()
            .allow_tags(&[
                "=", "if", "ifset", "foreach", "for", "while", "switch", "continueIf",
                "breakIf", "skipIf", "first", "last", "sep", "try", "rollback", "block",
                "define", "include", "var", "default", "capture", "contentType", "l", "r",
                "else", "elseif", "elseifset", "case",
            ])
            .allow_filters(&[
                "upper", "lower", "capitalize", "firstUpper", "trim", "truncate", "length",
                "escape", "stripHtml", "date", "number", "replace", "implode", "join",
                "breakLines", "spaceless", "indent", "repeat", "padLeft", "padRight",
                "first", "last", "sort", "reverse", "batch", "round", "floor", "ceil",
            ])
    }

    pub fn allow_tags(mut self, names: &[&str]) -> Self {
        self.tags.extend(names.iter().map(|s| s.to_string()));
        self
    }

    pub fn allow_filters(mut self, names: &[&str]) -> Self {
        self.filters.extend(names.iter().map(|s| s.to_string()));
        self
    }

    pub fn allow_functions(mut self, names: &[&str]) -> Self {
        self.functions.extend(names.iter().map(|s| s.to_string()));
        self
    }
}

fn allows(list: &[String], name: &str) -> bool {
    list.iter().any(|n| n == "*" || n.eq_ignore_ascii_case(name))
}

impl Policy for StaticPolicy {
    fn is_tag_allowed(&self, name: &str) -> bool {
        allows(&self.tags, name)
    }

    fn is_filter_allowed(&self, name: &str) -> bool {
        allows(&self.filters, name)
    }

    fn is_function_allowed(&self, name: &str) -> bool {
        allows(&self.functions, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_policy_denies() {
        let p = StaticPolicy::new();
        assert!(!p.is_tag_allowed("if"));
        assert!(!p.is_filter_allowed("upper"));
        assert!(!p.is_function_allowed("strlen"));
    }

    #[test]
    fn test_wildcard_and_case() {
        let p = StaticPolicy::new().allow_functions(&["*"]).allow_filters(&["Upper"]);
        assert!(p.is_function_allowed("anything"));
        assert!(p.is_filter_allowed("upper"));
        assert!(!p.is_filter_allowed("noescape"));
    }

    #[test]
    fn test_safe_policy() {
        let p = StaticPolicy::safe();
        assert!(p.is_tag_allowed("foreach"));
        assert!(!p.is_tag_allowed("do"));
        assert!(!p.is_filter_allowed("noescape"));
        assert!(!p.is_function_allowed("system"));
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let p: StaticPolicy = serde_json::from_str(r#"{"tags": ["if"]}"#).unwrap();
        assert_eq!(p.tags, vec!["if".to_string()]);
        assert!(p.filters.is_empty());
    }
}
