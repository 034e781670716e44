use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(25);
/// Time left for the pipes to close once the group is gone, even past the deadline.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

pub fn truncate(s: &str, max: usize) -> String {
    if max == 0 {
        return String::new();
    }

    let char_count = s.chars().count();
    if char_count <= max {
        return s.to_string();
    }

    if max <= 3 {
        return s.chars().take(max).collect();
    }

    let truncated: String = s.chars().take(max - 3).collect();
    format!("{}...", truncated)
}

#[derive(Debug)]
pub struct CommandRunResult {
    pub status: Option<ExitStatus>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub duration: Duration,
}

impl CommandRunResult {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.map(|s| s.success()).unwrap_or(false)
    }
}

/// Spawn `command`, drain both pipes on background threads and wait at most
/// `timeout`.
///
/// On expiry the child's whole process group is killed (falling back to the
/// child alone when it does not lead a group). The group is also swept after a
/// normal exit so a forked descendant cannot keep the pipes open. Output still
/// missing at the deadline (a descendant that left the group) counts as a
/// timeout.
pub fn run_command_with_timeout(
    command: &mut Command,
    timeout: Duration,
) -> Result<CommandRunResult, String> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| format!("Failed to start command: {}", e))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| "Failed to capture stdout".to_string())?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| "Failed to capture stderr".to_string())?;

    let stdout_rx = spawn_pipe_reader(stdout);
    let stderr_rx = spawn_pipe_reader(stderr);

    let start = Instant::now();
    let deadline = start + timeout;
    let mut timed_out = false;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                sweep_process_group(&child);
                break Some(status);
            }
            Ok(None) => {
                if Instant::now() >= deadline {
                    timed_out = true;
                    kill_process_group(&mut child);
                    match child.wait() {
                        Ok(status) => break Some(status),
                        Err(_) => break None,
                    }
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                kill_process_group(&mut child);
                let _ = child.wait();
                return Err(format!("Failed to wait for command: {}", e));
            }
        }
    };

    let drain_until = deadline.max(Instant::now() + DRAIN_GRACE);
    let stdout_bytes = collect_pipe(&stdout_rx, drain_until);
    let stderr_bytes = collect_pipe(&stderr_rx, drain_until);
    if stdout_bytes.is_none() || stderr_bytes.is_none() {
        timed_out = true;
    }
    let duration = start.elapsed();

    Ok(CommandRunResult {
        status,
        stdout: String::from_utf8_lossy(&stdout_bytes.unwrap_or_default()).to_string(),
        stderr: String::from_utf8_lossy(&stderr_bytes.unwrap_or_default()).to_string(),
        timed_out,
        duration,
    })
}

fn spawn_pipe_reader<R: Read + Send + 'static>(pipe: R) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        let mut reader = BufReader::new(pipe);
        let _ = reader.read_to_end(&mut buf);
        let _ = tx.send(buf);
    });
    rx
}

/// `None` when the pipe is still held open at `until`; the reader thread is
/// left to finish on its own.
fn collect_pipe(rx: &Receiver<Vec<u8>>, until: Instant) -> Option<Vec<u8>> {
    let wait = until.saturating_duration_since(Instant::now());
    rx.recv_timeout(wait).ok()
}

#[cfg(unix)]
fn sweep_process_group(child: &Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::{getpgid, Pid};

    let Ok(pid) = i32::try_from(child.id()) else {
        return;
    };
    let pid = Pid::from_raw(pid);
    // Only a group the child led; never our own.
    if getpgid(None).is_ok_and(|own| own == pid) {
        return;
    }
    let _ = killpg(pid, Signal::SIGKILL);
}

#[cfg(not(unix))]
fn sweep_process_group(_child: &Child) {}

#[cfg(unix)]
fn kill_process_group(child: &mut Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(pid) = i32::try_from(child.id()) else {
        let _ = child.kill();
        return;
    };
    if killpg(Pid::from_raw(pid), Signal::SIGKILL).is_err() {
        let _ = child.kill();
    }
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut Child) {
    let _ = child.kill();
}

/// Resolve `program` to an absolute executable path using the current `PATH`.
///
/// Paths containing a separator are checked as given.
pub fn resolve_program(program: &str) -> Option<PathBuf> {
    let program = program.trim();
    if program.is_empty() {
        return None;
    }

    let as_path = Path::new(program);
    if as_path.components().count() > 1 {
        return is_executable(as_path).then(|| as_path.to_path_buf());
    }

    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(candidate: &Path) -> bool {
    if !candidate.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::metadata(candidate)
            .map(|meta| meta.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_unicode_safe() {
        let input = "ééééé";
        assert_eq!(truncate(input, 4), "é...");
    }

    #[test]
    fn test_truncate_small_max() {
        let input = "こんにちは";
        assert_eq!(truncate(input, 3), "こんに");
        assert_eq!(truncate(input, 0), "");
    }

    #[test]
    fn test_resolve_program_rejects_blank_and_missing() {
        assert!(resolve_program("").is_none());
        assert!(resolve_program("   ").is_none());
        assert!(resolve_program("definitely-not-a-real-binary-7f3a").is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_program_finds_sh() {
        let resolved = resolve_program("sh").expect("sh should be on PATH");
        assert!(resolved.is_absolute());
        assert_eq!(resolve_program("/bin/sh").is_some(), Path::new("/bin/sh").is_file());
    }

    #[cfg(unix)]
    #[test]
    fn test_run_command_captures_streams_and_status() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo out; echo err >&2; exit 3"]);
        let result = run_command_with_timeout(&mut cmd, Duration::from_secs(5)).unwrap();
        assert!(!result.timed_out);
        assert!(!result.success());
        assert_eq!(result.status.and_then(|s| s.code()), Some(3));
        assert_eq!(result.stdout.trim(), "out");
        assert_eq!(result.stderr.trim(), "err");
    }

    #[cfg(unix)]
    #[test]
    fn test_run_command_kills_whole_group_on_timeout() {
        use std::os::unix::process::CommandExt;

        let mut cmd = Command::new("sh");
        cmd.args(["-c", "sleep 30 & sleep 30"]).process_group(0);
        let start = Instant::now();
        let result = run_command_with_timeout(&mut cmd, Duration::from_millis(300)).unwrap();
        assert!(result.timed_out);
        assert!(!result.success());
        // Reader threads only finish once every holder of the pipes is gone,
        // including the backgrounded grandchild.
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[test]
    fn test_run_command_sweeps_forked_descendant_after_exit() {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;
        use std::os::unix::process::CommandExt;

        let mut cmd = Command::new("sh");
        cmd.args(["-c", "sleep 30 & echo $!"]).process_group(0);
        let start = Instant::now();
        let result = run_command_with_timeout(&mut cmd, Duration::from_secs(5)).unwrap();
        assert!(start.elapsed() < Duration::from_secs(3));
        assert!(result.success());
        assert!(!result.timed_out);

        let pid: i32 = result.stdout.trim().parse().unwrap();
        // A killed orphan may linger as a zombie until init reaps it.
        let is_gone = || {
            kill(Pid::from_raw(pid), None).is_err()
                || std::fs::read_to_string(format!("/proc/{}/stat", pid))
                    .is_ok_and(|stat| stat.contains(") Z "))
        };
        let gone = (0..40).any(|_| {
            if is_gone() {
                return true;
            }
            thread::sleep(Duration::from_millis(50));
            false
        });
        assert!(gone, "backgrounded sleep {} survived the sweep", pid);
    }
}
