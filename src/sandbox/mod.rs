//! Sandboxed execution of a candidate function against its test suite.
//!
//! Each run composes a fresh program, writes it to a uniquely named temp file
//! and executes it in a child process that leads its own process group, sees
//! an empty environment and runs the interpreter in isolated mode. Isolation
//! stops there: no containers, no seccomp, no language-level sandbox.

pub mod limits;

pub use limits::{Limiter, ResourceLimits};

use crate::util::{resolve_program, run_command_with_timeout, CommandRunResult};
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Statement placed between the candidate and the tests so test code can
/// look the entry point up by name.
pub const BINDING_MARKER: &str = "ns = globals()";

pub const TIMEOUT_DIAGNOSTIC: &str = "TimeoutExpired: execution exceeded time limit";

const DEFAULT_INTERPRETER: &str = "python3";
const DEFAULT_WALL_TIMEOUT_SECS: u64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Passed,
    Failed,
    TimedOut,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Passed => "passed",
            Verdict::Failed => "failed",
            Verdict::TimedOut => "timed_out",
        }
    }
}

/// Outcome of one sandboxed run. `diagnostic` is empty iff the run passed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub verdict: Verdict,
    pub diagnostic: String,
}

impl ExecutionResult {
    pub fn passed() -> Self {
        Self {
            verdict: Verdict::Passed,
            diagnostic: String::new(),
        }
    }

    pub fn failed(diagnostic: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Failed,
            diagnostic: non_empty_diagnostic(diagnostic.into(), "execution failed"),
        }
    }

    pub fn timed_out(diagnostic: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::TimedOut,
            diagnostic: non_empty_diagnostic(diagnostic.into(), TIMEOUT_DIAGNOSTIC),
        }
    }

    pub fn is_passed(&self) -> bool {
        self.verdict == Verdict::Passed
    }
}

fn non_empty_diagnostic(diagnostic: String, fallback: &str) -> String {
    if diagnostic.is_empty() {
        fallback.to_string()
    } else {
        diagnostic
    }
}

/// Anything that can run a candidate function against a test suite.
pub trait Executor {
    fn execute(&self, function_source: &str, test_source: &str, imports_source: &str)
        -> ExecutionResult;
}

/// Build the single program text handed to the interpreter.
pub fn compose_program(imports_source: &str, function_source: &str, test_source: &str) -> String {
    let mut parts = Vec::with_capacity(4);
    let imports = imports_source.trim();
    if !imports.is_empty() {
        parts.push(imports);
    }
    parts.push(function_source.trim());
    parts.push(BINDING_MARKER);
    parts.push(test_source.trim());
    parts.join("\n\n")
}

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to write program file: {0}")]
    WriteProgram(#[from] std::io::Error),
    #[error("failed to launch {interpreter}: {message}")]
    Launch { interpreter: String, message: String },
}

/// Serializable sandbox settings, as stored in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSettings {
    pub interpreter: String,
    pub wall_timeout_secs: u64,
    pub cpu_secs: u64,
    pub memory_mib: u64,
    pub data_mib: u64,
    pub enforce_limits: bool,
    /// Where program files are written; the system temp dir when unset.
    pub scratch_dir: Option<PathBuf>,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            interpreter: DEFAULT_INTERPRETER.to_string(),
            wall_timeout_secs: DEFAULT_WALL_TIMEOUT_SECS,
            cpu_secs: 2,
            memory_mib: 512,
            data_mib: 64,
            enforce_limits: true,
            scratch_dir: None,
        }
    }
}

impl SandboxSettings {
    pub fn limiter(&self) -> Limiter {
        if self.enforce_limits {
            Limiter::Rlimit(ResourceLimits::from_mib(
                self.cpu_secs,
                self.memory_mib,
                self.data_mib,
            ))
        } else {
            Limiter::Unlimited
        }
    }
}

/// Process-isolated executor for Python candidates.
#[derive(Debug, Clone)]
pub struct Sandbox {
    interpreter: PathBuf,
    interpreter_args: Vec<String>,
    wall_timeout: Duration,
    limiter: Limiter,
    scratch_dir: Option<PathBuf>,
}

impl Sandbox {
    /// Resolve the interpreter on `PATH` now: the child gets no `PATH` of its own.
    pub fn new(settings: &SandboxSettings) -> Result<Self> {
        let interpreter = resolve_program(&settings.interpreter).ok_or_else(|| {
            anyhow!(
                "Interpreter '{}' was not found on PATH. Set sandbox.interpreter in the config or FIXLOOP_INTERPRETER.",
                settings.interpreter
            )
        })?;
        if !settings.limiter().is_enforced() {
            warn!("Sandbox resource ceilings are disabled; only the wall-clock timeout bounds the child");
        }
        Ok(Self {
            interpreter,
            interpreter_args: vec!["-I".to_string()],
            wall_timeout: Duration::from_secs(settings.wall_timeout_secs.max(1)),
            limiter: settings.limiter(),
            scratch_dir: settings.scratch_dir.clone(),
        })
    }

    pub fn with_wall_timeout(mut self, timeout: Duration) -> Self {
        self.wall_timeout = timeout;
        self
    }

    pub fn with_limiter(mut self, limiter: Limiter) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn wall_timeout(&self) -> Duration {
        self.wall_timeout
    }

    /// Run an already composed program.
    pub fn run_program(&self, program: &str) -> ExecutionResult {
        match self.try_run_program(program) {
            Ok(output) => self.interpret(output),
            Err(err) => {
                warn!(error = %err, "Sandbox setup failed");
                ExecutionResult::failed(format!("SandboxError: {}", err))
            }
        }
    }

    fn try_run_program(&self, program: &str) -> Result<CommandRunResult, SandboxError> {
        // Dropping the handle unlinks the file on every path out of here.
        let mut builder = tempfile::Builder::new();
        builder.prefix("prog_").suffix(".py");
        let mut file = match &self.scratch_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        file.write_all(program.as_bytes())?;
        file.flush()?;

        let mut command = Command::new(&self.interpreter);
        command.args(&self.interpreter_args).arg(file.path()).env_clear();
        if let Some(dir) = file.path().parent() {
            command.current_dir(dir);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        self.limiter.install(&mut command);

        debug!(
            path = %file.path().display(),
            bytes = program.len(),
            "Launching sandboxed program"
        );
        run_command_with_timeout(&mut command, self.wall_timeout).map_err(|message| {
            SandboxError::Launch {
                interpreter: self.interpreter.display().to_string(),
                message,
            }
        })
    }

    fn interpret(&self, output: CommandRunResult) -> ExecutionResult {
        if output.timed_out {
            debug!(elapsed_ms = output.duration.as_millis() as u64, "Sandboxed program timed out");
            return ExecutionResult::timed_out(format!(
                "{} of {}s",
                TIMEOUT_DIAGNOSTIC,
                self.wall_timeout.as_secs_f64()
            ));
        }
        if output.success() {
            return ExecutionResult::passed();
        }

        let diagnostic = if !output.stderr.is_empty() {
            output.stderr
        } else if !output.stdout.is_empty() {
            output.stdout
        } else {
            // Killed by a signal (e.g. CPU ceiling) without printing anything.
            match output.status {
                Some(status) => format!("process exited with {}", status),
                None => "process exited with unknown status".to_string(),
            }
        };
        ExecutionResult::failed(diagnostic)
    }
}

impl Executor for Sandbox {
    fn execute(
        &self,
        function_source: &str,
        test_source: &str,
        imports_source: &str,
    ) -> ExecutionResult {
        let program = compose_program(imports_source, function_source, test_source);
        self.run_program(&program)
    }
}
