use crate::repair::patch::PatchKind;
use crate::sandbox::Verdict;
use serde::{Deserialize, Serialize};

/// The function under repair and the hidden tests that judge it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairTask {
    #[serde(default)]
    pub imports: String,
    #[serde(default)]
    pub buggy_body: String,
    pub entry_point: String,
    #[serde(default)]
    pub declaration: String,
    pub tests: String,
}

/// Which generation step ran most recently.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    #[default]
    None,
    Solve,
    Reflect,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::None => "none",
            Step::Solve => "solve",
            Step::Reflect => "reflect",
        }
    }
}

/// Snapshot of one repair session. Each step consumes a snapshot and hands
/// back the next one; nothing else holds onto it.
#[derive(Debug, Clone)]
pub struct RepairSession<'a> {
    pub task: &'a RepairTask,
    pub retries_left: i64,
    pub last_step: Step,
    pub raw: String,
    pub code: String,
    pub passed: bool,
    pub error: String,
}

impl<'a> RepairSession<'a> {
    pub fn new(task: &'a RepairTask, max_retries: u32) -> Self {
        Self {
            task,
            retries_left: i64::from(max_retries),
            last_step: Step::None,
            raw: String::new(),
            code: String::new(),
            passed: false,
            error: String::new(),
        }
    }

    /// Record a generation: new raw text and candidate, one retry spent.
    pub fn generated(self, step: Step, raw: String, code: String) -> Self {
        Self {
            retries_left: self.retries_left - 1,
            last_step: step,
            raw,
            code,
            ..self
        }
    }

    /// Record a test outcome, possibly with a patched candidate.
    pub fn tested(self, code: String, passed: bool, error: String) -> Self {
        Self {
            code,
            passed,
            error,
            ..self
        }
    }
}

/// What one generate-then-test cycle produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub step: Step,
    pub retries_left: i64,
    pub verdict: Verdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<PatchKind>,
    pub code: String,
    pub diagnostic: String,
}

/// Final result of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairOutcome {
    pub program: String,
    pub passed: bool,
    pub error: String,
    pub raw: String,
    pub retries_left: i64,
    pub attempts: Vec<AttemptRecord>,
}

impl RepairOutcome {
    pub(crate) fn from_session(session: RepairSession<'_>, attempts: Vec<AttemptRecord>) -> Self {
        Self {
            program: session.code,
            passed: session.passed,
            error: session.error,
            raw: session.raw,
            retries_left: session.retries_left,
            attempts,
        }
    }
}
