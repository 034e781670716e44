//! Pull a candidate function out of raw generated text.

use regex::Regex;
use std::sync::LazyLock;

/// First fenced block. A language tag is skipped when it is a Python tag or
/// sits alone on the opening line.
static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)```(?:(?:python3?|py)\b|[\w+.-]*[ \t]*\r?\n)?\s*([\s\S]*?)\s*```")
        .expect("fenced block pattern is valid")
});

/// Extract the candidate for `entry_point` from `raw`.
///
/// Returns an empty string when nothing usable is found; running an empty
/// candidate simply fails its tests.
pub fn extract(raw: &str, entry_point: &str) -> String {
    let fenced = first_fenced_block(raw);
    if !fenced.is_empty() {
        return fenced;
    }
    extract_def_by_name(raw, entry_point)
}

/// Trimmed contents of the first fenced block, or an empty string.
pub fn first_fenced_block(text: &str) -> String {
    FENCED_BLOCK
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default()
}

/// The definition of `name` from its header up to (not including) the next
/// line that starts at column zero. Blank lines do not end the span.
pub fn extract_def_by_name(text: &str, name: &str) -> String {
    let name = name.trim();
    if name.is_empty() {
        return String::new();
    }

    let pattern = format!(
        r"(?:async\s+)?def\s+{}\s*\([^)]*\)\s*(?:->[^:\n]*)?:",
        regex::escape(name)
    );
    let Ok(header) = Regex::new(&pattern) else {
        return String::new();
    };
    let Some(found) = header.find(text) else {
        return String::new();
    };

    let rest = &text[found.end()..];
    if rest.is_empty() {
        return String::new();
    }

    // The body claims at least one character past the colon before a
    // dedented line may end it.
    let mut end = text.len();
    for (offset, _) in rest.match_indices('\n').filter(|(offset, _)| *offset > 0) {
        let starts_dedented = rest[offset + 1..]
            .chars()
            .next()
            .is_some_and(|c| !c.is_whitespace());
        if starts_dedented {
            end = found.end() + offset;
            break;
        }
    }

    text[found.start()..end].trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_python_block_is_returned_trimmed() {
        let raw = "Here is the fix:\n```python\ndef add(a, b):\n    return a + b\n```\nDone.";
        assert_eq!(extract(raw, "add"), "def add(a, b):\n    return a + b");
    }

    #[test]
    fn fence_tag_is_case_insensitive() {
        let raw = "```Python\ndef f():\n    return 1\n```";
        assert_eq!(extract(raw, "f"), "def f():\n    return 1");
        let raw = "```PY\nx = 1\n```";
        assert_eq!(first_fenced_block(raw), "x = 1");
    }

    #[test]
    fn untagged_and_other_tagged_fences() {
        assert_eq!(first_fenced_block("```\nprint(1)\n```"), "print(1)");
        assert_eq!(first_fenced_block("```py3k\nprint(2)\n```"), "print(2)");
    }

    #[test]
    fn inline_fence_keeps_content() {
        assert_eq!(first_fenced_block("```x = 1```"), "x = 1");
        assert_eq!(first_fenced_block("```python x = 1```"), "x = 1");
    }

    #[test]
    fn only_first_fence_is_used() {
        let raw = "```python\nfirst()\n```\ntext\n```python\nsecond()\n```";
        assert_eq!(extract(raw, "first"), "first()");
    }

    #[test]
    fn single_span_round_trips_verbatim() {
        let body = "def has_close(xs, t):\n    for i, a in enumerate(xs):\n\n        for b in xs[i + 1:]:\n            if abs(a - b) < t:\n                return True\n    return False";
        let raw = format!("Sure!\n\n```python\n{}\n```\n", body);
        assert_eq!(extract(&raw, "has_close"), body);
    }

    #[test]
    fn fallback_finds_definition_until_dedent() {
        let raw = "The fix is below.\ndef add(a, b):\n    total = a + b\n\n    return total\nprint(add(1, 2))\n";
        assert_eq!(
            extract(raw, "add"),
            "def add(a, b):\n    total = a + b\n\n    return total"
        );
    }

    #[test]
    fn fallback_runs_to_end_of_text() {
        let raw = "def add(a, b):\n    return a + b";
        assert_eq!(extract(raw, "add"), raw);
    }

    #[test]
    fn fallback_accepts_return_annotation() {
        let raw = "def add(a: int, b: int) -> int:\n    return a + b\nnext_line";
        assert_eq!(
            extract(raw, "add"),
            "def add(a: int, b: int) -> int:\n    return a + b"
        );
    }

    #[test]
    fn fallback_requires_exact_name() {
        let raw = "def add_one(x):\n    return x + 1\n";
        assert_eq!(extract(raw, "add"), "");
        assert_eq!(extract(raw, "add_one"), "def add_one(x):\n    return x + 1");
    }

    #[test]
    fn nothing_found_yields_empty() {
        assert_eq!(extract("I cannot help with that.", "add"), "");
        assert_eq!(extract("", "add"), "");
        assert_eq!(extract("def add(a, b):", "add"), "");
    }

    #[test]
    fn empty_fence_falls_back_to_definition() {
        let raw = "``````\ndef f():\n    return 2\n";
        assert_eq!(extract(raw, "f"), "def f():\n    return 2");
    }
}
