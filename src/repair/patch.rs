//! Deterministic last-chance patches for a failing candidate.
//!
//! Both patches are speculative: a patched candidate is re-executed and only
//! adopted when that run passes. A rejected patch leaves nothing behind.

use super::diagnostic::{missing_typing_name, unbound_local_name};
use crate::sandbox::Executor;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const TYPING_IMPORT_LINE: &str = "from typing import *";

const INDENT_STEP: &str = "    ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchKind {
    TypingImport,
    UnboundLocal,
}

impl PatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatchKind::TypingImport => "typing_import",
            PatchKind::UnboundLocal => "unbound_local",
        }
    }
}

/// A patch whose re-run passed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedPatch {
    pub kind: PatchKind,
    pub code: String,
}

/// Prepend the wildcard typing import.
pub fn apply_typing_import(code: &str) -> String {
    format!("{}\n{}", TYPING_IMPORT_LINE, code)
}

/// Insert `<var> = 0` one level below the first function header.
///
/// Returns `None` when the code has no function definition line.
pub fn apply_unbound_local(code: &str, var: &str) -> Option<String> {
    let mut lines: Vec<&str> = code.lines().collect();
    let header_idx = lines.iter().position(|line| is_def_line(line))?;

    let header = lines[header_idx];
    let indent = &header[..header.len() - header.trim_start().len()];
    let init_line = format!("{}{}{} = 0", indent, INDENT_STEP, var);

    lines.insert(header_idx + 1, &init_line);
    Some(lines.join("\n"))
}

fn is_def_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("def ") || trimmed.starts_with("async def ")
}

/// Try the typing patch, then the unbound-local patch, each against the
/// original `diagnostic`. The first one whose re-run passes is returned.
pub fn try_autopatch<E: Executor + ?Sized>(
    executor: &E,
    code: &str,
    tests: &str,
    imports: &str,
    diagnostic: &str,
) -> Option<AcceptedPatch> {
    if let Some(name) = missing_typing_name(diagnostic) {
        let patched = apply_typing_import(code);
        let result = executor.execute(&patched, tests, imports);
        if result.is_passed() {
            debug!(missing = %name, "Typing import patch accepted");
            return Some(AcceptedPatch {
                kind: PatchKind::TypingImport,
                code: patched,
            });
        }
        debug!(missing = %name, verdict = result.verdict.as_str(), "Typing import patch rejected");
    }

    if let Some(var) = unbound_local_name(diagnostic) {
        let patched = apply_unbound_local(code, &var)?;
        let result = executor.execute(&patched, tests, imports);
        if result.is_passed() {
            debug!(variable = %var, "Unbound local patch accepted");
            return Some(AcceptedPatch {
                kind: PatchKind::UnboundLocal,
                code: patched,
            });
        }
        debug!(variable = %var, verdict = result.verdict.as_str(), "Unbound local patch rejected");
    }

    None
}
