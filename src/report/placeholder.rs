//! `[[ name ]]` substitution over plain text.
//!
//! Works on unescaped text, never on markup, so `<` and `{` in a document
//! or a value cannot break anything.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

pub type Context = HashMap<String, String>;

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[\s*(\w+)\s*\]\]").unwrap());

/// Cheap pre-check: only text with a raw `[[` can hold a placeholder.
pub fn may_contain_placeholder(text: &str) -> bool {
    text.contains("[[")
}

/// Names of the placeholders in `text`, in order of appearance.
pub fn placeholder_names(text: &str) -> impl Iterator<Item = &str> {
    PLACEHOLDER_RE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|name| name.as_str())
}

/// Replaces every placeholder with its context value; unknown names become "".
pub fn substitute(text: &str, context: &Context) -> String {
    PLACEHOLDER_RE
        .replace_all(text, |caps: &Captures<'_>| {
            context
                .get(&caps[1])
                .map(String::as_str)
                .unwrap_or_default()
                .to_string()
        })
        .into_owned()
}
