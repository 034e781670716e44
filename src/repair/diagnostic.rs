//! Recognise the failure signatures the auto-patcher knows how to repair.
//!
//! Matching is done on the text of a diagnostic only, so any backend that
//! reports Python-style tracebacks classifies the same way.

use regex::Regex;
use std::sync::LazyLock;

/// Names a wildcard `typing` import is expected to bring into scope.
pub const TYPING_NAMES: &[&str] = &[
    "List", "Tuple", "Dict", "Set", "Optional", "Any", "Union", "Callable", "Iterable",
    "Iterator", "Sequence", "FrozenSet", "Type",
];

static UNDEFINED_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"NameError: name '(\w+)' is not defined").expect("undefined-name pattern is valid")
});

static UNBOUND_LOCAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)UnboundLocalError:.*local variable '(\w+)'")
        .expect("unbound-local pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signature {
    /// `NameError` for one of [`TYPING_NAMES`].
    MissingTypingName(String),
    /// `UnboundLocalError` naming the offending local.
    UnboundLocal(String),
    Unrecognised,
}

pub fn classify(diagnostic: &str) -> Signature {
    if let Some(name) = missing_typing_name(diagnostic) {
        return Signature::MissingTypingName(name);
    }
    if let Some(name) = unbound_local_name(diagnostic) {
        return Signature::UnboundLocal(name);
    }
    Signature::Unrecognised
}

/// A recognised typing name reported as undefined anywhere in the diagnostic.
pub fn missing_typing_name(diagnostic: &str) -> Option<String> {
    UNDEFINED_NAME
        .captures_iter(diagnostic)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .find(|name| TYPING_NAMES.contains(name))
        .map(str::to_string)
}

pub fn unbound_local_name(diagnostic: &str) -> Option<String> {
    UNBOUND_LOCAL
        .captures(diagnostic)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
