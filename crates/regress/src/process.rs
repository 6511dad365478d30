//! Blocking subprocess execution with a wall-clock deadline.
//!
//! Both standard streams are drained on background threads while the child
//! runs, so a chatty child never blocks on a full pipe. On deadline the child
//! is killed and reaped before the streams are collected.

use crate::result::{RegressError, RegressResult};
use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Captured outcome of one subprocess invocation
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutput {
    /// Exit code; `None` when killed or terminated by a signal
    pub returncode: Option<i32>,
    /// Whether the deadline was hit and the child killed
    pub timed_out: bool,
    /// Captured standard output (lossy UTF-8)
    pub stdout: String,
    /// Captured standard error (lossy UTF-8)
    pub stderr: String,
    /// Wall-clock time from spawn to reap
    pub elapsed: Duration,
}

impl ProcessOutput {
    /// Exit code 0 and no timeout
    #[must_use]
    pub const fn success(&self) -> bool {
        !self.timed_out && matches!(self.returncode, Some(0))
    }
}

/// Extension trait to add `wait_timeout` to `Child`.
pub trait ChildExt {
    /// Poll until the child exits or `timeout` elapses. `Ok(None)` means timed out.
    fn wait_timeout(&mut self, timeout: Duration) -> std::io::Result<Option<ExitStatus>>;
}

impl ChildExt for Child {
    fn wait_timeout(&mut self, timeout: Duration) -> std::io::Result<Option<ExitStatus>> {
        let start = Instant::now();
        loop {
            match self.try_wait()? {
                Some(status) => return Ok(Some(status)),
                None => {
                    if start.elapsed() >= timeout {
                        return Ok(None);
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
            }
        }
    }
}

/// Kill the child together with everything it spawned into its process group
fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;
        if let Ok(pid) = i32::try_from(child.id()) {
            let _ = killpg(Pid::from_raw(pid), Signal::SIGKILL);
        }
    }
    let _ = child.kill();
}

fn drain<R: Read + Send + 'static>(stream: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    stream.map(|mut s| {
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = s.read_to_end(&mut buf);
            buf
        })
    })
}

fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

/// Render a command as a single shell-like line for transcripts and reports
#[must_use]
pub fn command_line(command: &Command) -> String {
    std::iter::once(command.get_program())
        .chain(command.get_args())
        .map(|arg| {
            let arg = arg.to_string_lossy();
            if arg.contains(char::is_whitespace) {
                format!("\"{arg}\"")
            } else {
                arg.into_owned()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Spawn `command`, capture both streams and enforce `timeout`.
///
/// # Errors
///
/// Returns [`RegressError::ToolNotFound`] when the program does not exist and
/// [`RegressError::Io`] for any other spawn or wait failure. Timeouts and
/// non-zero exits are reported through [`ProcessOutput`], not as errors.
pub fn run_with_timeout(command: &mut Command, timeout: Duration) -> RegressResult<ProcessOutput> {
    let program = command.get_program().to_string_lossy().into_owned();
    tracing::debug!(
        command = %command_line(command),
        timeout_s = timeout.as_secs_f64(),
        "spawning"
    );

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let start = Instant::now();
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RegressError::tool_not_found(program.clone())
            } else {
                RegressError::Io(e)
            }
        })?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let (returncode, timed_out) = match child.wait_timeout(timeout) {
        Ok(Some(status)) => (status.code(), false),
        Ok(None) => {
            tracing::warn!(program = %program, "deadline reached, killing child");
            kill_tree(&mut child);
            let _ = child.wait();
            (None, true)
        }
        Err(e) => {
            kill_tree(&mut child);
            let _ = child.wait();
            return Err(RegressError::Io(e));
        }
    };
    let elapsed = start.elapsed();

    Ok(ProcessOutput {
        returncode,
        timed_out,
        stdout: collect(stdout),
        stderr: collect(stderr),
        elapsed,
    })
}

#[cfg(all(test, unix))]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_captures_streams_and_code() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo out; echo err 1>&2; exit 3"]);
        let out = run_with_timeout(&mut cmd, Duration::from_secs(10)).unwrap();
        assert_eq!(out.returncode, Some(3));
        assert!(!out.timed_out);
        assert_eq!(out.stdout.trim(), "out");
        assert_eq!(out.stderr.trim(), "err");
        assert!(!out.success());
    }

    #[test]
    fn test_timeout_kills_child() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo started; sleep 30"]);
        let out = run_with_timeout(&mut cmd, Duration::from_millis(300)).unwrap();
        assert!(out.timed_out);
        assert_eq!(out.returncode, None);
        assert!(out.elapsed < Duration::from_secs(10));
    }

    fn alive(pid: i32) -> bool {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;
        // signal 0 only checks that the process exists
        if kill(Pid::from_raw(pid), None).is_err() {
            return false;
        }
        // a zombie is already dead and only waits for its reaper
        std::fs::read_to_string(format!("/proc/{pid}/stat")).map_or(true, |stat| {
            !stat
                .rsplit(')')
                .next()
                .is_some_and(|state| state.trim_start().starts_with('Z'))
        })
    }

    #[test]
    fn test_timeout_kills_grandchildren() {
        let tmp = tempfile::TempDir::new().unwrap();
        let pidfile = tmp.path().join("grandchild.pid");
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(r#"sleep 300 & echo $! > "$1"; wait"#)
            .arg("sh")
            .arg(&pidfile);

        let out = run_with_timeout(&mut cmd, Duration::from_millis(500)).unwrap();
        assert!(out.timed_out);

        let pid: i32 = std::fs::read_to_string(&pidfile)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        // the killed grandchild is reparented to init, give it a moment to be reaped
        let deadline = Instant::now() + Duration::from_secs(5);
        while alive(pid) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(!alive(pid), "grandchild {pid} survived the timeout");
    }

    #[test]
    fn test_missing_program() {
        let mut cmd = Command::new("/definitely/not/here/app");
        let err = run_with_timeout(&mut cmd, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, RegressError::ToolNotFound { .. }));
    }

    #[test]
    fn test_command_line_quotes_spaces() {
        let mut cmd = Command::new("app");
        cmd.args(["-w", "my file.inv"]);
        assert_eq!(command_line(&cmd), "app -w \"my file.inv\"");
    }
}
