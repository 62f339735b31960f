use std::io::{self, Read, Write};
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Exit status and captured output of a finished child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Error)]
pub enum SubprocessError {
    #[error("failed to spawn: {0}")]
    Spawn(#[source] io::Error),

    #[error("timed out")]
    Timeout,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Runs `command` to completion, feeding `input` on stdin.
///
/// Output is drained on background threads so a chatty child never blocks
/// on a full pipe. The child is killed once `timeout` elapses.
pub fn run_captured(
    command: &mut Command,
    input: Option<&[u8]>,
    timeout: Duration,
) -> Result<CapturedOutput, SubprocessError> {
    command
        .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command.spawn().map_err(SubprocessError::Spawn)?;
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    if let (Some(bytes), Some(mut stdin)) = (input, child.stdin.take()) {
        stdin.write_all(bytes)?;
    }

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(SubprocessError::Timeout);
        }
        thread::sleep(POLL_INTERVAL);
    };

    Ok(CapturedOutput {
        success: status.success(),
        stdout: collect(stdout),
        stderr: collect(stderr),
    })
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        let _ = reader.read_to_end(&mut buffer);
        String::from_utf8_lossy(&buffer).into_owned()
    })
}

fn collect(handle: Option<JoinHandle<String>>) -> String {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_captures_stdin_roundtrip() {
        let mut command = Command::new("cat");
        let output = run_captured(&mut command, Some(b"hello"), Duration::from_secs(5)).unwrap();
        assert!(output.success);
        assert_eq!(output.stdout, "hello");
    }

    #[test]
    fn test_failure_status_and_stderr() {
        let mut command = Command::new("sh");
        command.args(["-c", "echo bad >&2; exit 3"]);
        let output = run_captured(&mut command, None, Duration::from_secs(5)).unwrap();
        assert!(!output.success);
        assert_eq!(output.stderr.trim(), "bad");
    }

    #[test]
    fn test_timeout_kills_child() {
        let mut command = Command::new("sleep");
        command.arg("5");
        let started = Instant::now();
        let result = run_captured(&mut command, None, Duration::from_millis(200));
        assert!(matches!(result, Err(SubprocessError::Timeout)));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_missing_program() {
        let mut command = Command::new("definitely-not-a-real-program-xyz");
        assert!(matches!(
            run_captured(&mut command, None, Duration::from_secs(1)),
            Err(SubprocessError::Spawn(_))
        ));
    }
}
