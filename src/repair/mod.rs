//! The repair loop: generate a fix, test it, feed the failure back, repeat.
//!
//! An explicit four-state machine. `solve` and `reflect` each spend one retry
//! and always hand over to `test`; after every test [`route`] picks the next
//! state. Generation strategies alternate on every failed attempt.

pub mod diagnostic;
pub mod extract;
pub mod patch;
pub mod prompts;
pub mod session;

pub use patch::{AcceptedPatch, PatchKind};
pub use session::{AttemptRecord, RepairOutcome, RepairSession, RepairTask, Step};

use crate::llm::Generator;
use crate::sandbox::{ExecutionResult, Executor};
use anyhow::{Context, Result};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Solve,
    Reflect,
    Test,
    End,
}

/// Where to go after a test.
pub fn route(session: &RepairSession<'_>) -> State {
    if session.passed || session.retries_left <= 0 {
        State::End
    } else if session.last_step == Step::Solve {
        State::Reflect
    } else {
        State::Solve
    }
}

/// Drives repair sessions with a generator and an executor.
///
/// Holds no per-session state, so one instance can serve many sessions at
/// once from different threads.
pub struct RepairLoop<'a, G: ?Sized, E: ?Sized> {
    generator: &'a G,
    executor: &'a E,
}

impl<'a, G, E> RepairLoop<'a, G, E>
where
    G: Generator + ?Sized,
    E: Executor + ?Sized,
{
    pub fn new(generator: &'a G, executor: &'a E) -> Self {
        Self {
            generator,
            executor,
        }
    }

    /// Run one session to completion.
    ///
    /// The first generation always happens, even with `max_retries == 0`.
    /// Only a generator error escapes as `Err`; every execution failure ends
    /// up in the outcome instead.
    pub fn run(&self, task: &RepairTask, max_retries: u32) -> Result<RepairOutcome> {
        let mut session = RepairSession::new(task, max_retries);
        let mut attempts = Vec::new();
        let mut state = State::Solve;

        loop {
            match state {
                State::Solve => {
                    session = self.solve(session)?;
                    state = State::Test;
                }
                State::Reflect => {
                    session = self.reflect(session)?;
                    state = State::Test;
                }
                State::Test => {
                    let (next, attempt) = self.test(session);
                    info!(
                        entry_point = %task.entry_point,
                        step = attempt.step.as_str(),
                        retries_left = attempt.retries_left,
                        verdict = attempt.verdict.as_str(),
                        patch = attempt.patch.map(|p| p.as_str()).unwrap_or("none"),
                        "Attempt finished"
                    );
                    attempts.push(attempt);
                    session = next;
                    state = route(&session);
                }
                State::End => break,
            }
        }

        Ok(RepairOutcome::from_session(session, attempts))
    }

    fn solve<'s>(&self, session: RepairSession<'s>) -> Result<RepairSession<'s>> {
        let task = session.task;
        let prompt = prompts::solve_prompt(
            &task.imports,
            &task.buggy_body,
            &task.entry_point,
            &task.declaration,
        );
        self.generate_step(session, Step::Solve, &prompt)
    }

    fn reflect<'s>(&self, session: RepairSession<'s>) -> Result<RepairSession<'s>> {
        let prompt = prompts::reflect_prompt(&session.error, &session.code);
        self.generate_step(session, Step::Reflect, &prompt)
    }

    fn generate_step<'s>(
        &self,
        session: RepairSession<'s>,
        step: Step,
        prompt: &str,
    ) -> Result<RepairSession<'s>> {
        let raw = self.generator.generate(prompt).with_context(|| {
            format!(
                "Generation failed during {} step for '{}'",
                step.as_str(),
                session.task.entry_point
            )
        })?;
        let code = extract::extract(&raw, &session.task.entry_point);
        if code.is_empty() {
            warn!(
                entry_point = %session.task.entry_point,
                step = step.as_str(),
                "No candidate found in generated text"
            );
        }
        Ok(session.generated(step, raw, code))
    }

    fn test<'s>(&self, session: RepairSession<'s>) -> (RepairSession<'s>, AttemptRecord) {
        let task = session.task;
        let result = self
            .executor
            .execute(&session.code, &task.tests, &task.imports);

        let (code, result, patch) = if result.is_passed() {
            (session.code.clone(), result, None)
        } else {
            match patch::try_autopatch(
                self.executor,
                &session.code,
                &task.tests,
                &task.imports,
                &result.diagnostic,
            ) {
                Some(accepted) => (accepted.code, ExecutionResult::passed(), Some(accepted.kind)),
                None => {
                    debug!(
                        signature = ?diagnostic::classify(&result.diagnostic),
                        "Candidate failed and no patch applied"
                    );
                    (session.code.clone(), result, None)
                }
            }
        };

        let attempt = AttemptRecord {
            step: session.last_step,
            retries_left: session.retries_left,
            verdict: result.verdict,
            patch,
            code: code.clone(),
            diagnostic: result.diagnostic.clone(),
        };
        let passed = result.is_passed();
        (session.tested(code, passed, result.diagnostic), attempt)
    }
}
