//! Bounded subprocess execution.
//!
//! Every helper here enforces a deadline: a child that outlives it is killed
//! and the caller receives `ResolverError::Timeout`.

use crate::error::ResolverError;
use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// Windows `CREATE_NO_WINDOW` creation flag.
#[cfg(windows)]
pub const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Captured result of a short-lived subprocess.
#[derive(Debug, Clone)]
pub struct CapturedOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CapturedOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Base command for an interpreter or tool: no stdin, no console window,
/// killed when its handle is dropped.
pub fn base_command(program: &Path) -> Command {
    let mut cmd = Command::new(program);
    cmd.stdin(Stdio::null()).kill_on_drop(true);
    #[cfg(windows)]
    cmd.creation_flags(CREATE_NO_WINDOW);
    cmd
}

/// Render a command line for logging, quoting arguments that contain spaces.
pub fn command_line<I, S>(program: &Path, args: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut parts = vec![quote(&program.to_string_lossy())];
    parts.extend(args.into_iter().map(|a| quote(&a.as_ref().to_string_lossy())));
    parts.join(" ")
}

fn quote(arg: &str) -> String {
    if arg.is_empty() || arg.contains(char::is_whitespace) {
        format!("\"{}\"", arg)
    } else {
        arg.to_string()
    }
}

/// Decode one raw output line. Tools on Windows often write in the console
/// code page, so invalid UTF-8 is replaced rather than rejected.
pub fn decode_line(segment: &[u8]) -> String {
    String::from_utf8_lossy(segment)
        .trim_end_matches('\r')
        .to_string()
}

/// Run `cmd` to completion and capture its output.
pub async fn run_captured(
    mut cmd: Command,
    timeout: Duration,
    label: &str,
) -> Result<CapturedOutput, ResolverError> {
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    let child = cmd
        .spawn()
        .map_err(|e| ResolverError::ProcessLaunch(format!("{}: {}", label, e)))?;

    // Dropping the future on timeout drops the child, which kills it.
    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(CapturedOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }),
        Ok(Err(e)) => Err(ResolverError::IoError(e)),
        Err(_) => Err(ResolverError::Timeout {
            operation: label.to_string(),
            timeout,
        }),
    }
}

/// Run `cmd`, handing every stdout/stderr line to `on_line` as it arrives.
///
/// Returns the exit code (`None` when killed by a signal).
pub async fn run_streaming<F>(
    mut cmd: Command,
    timeout: Duration,
    label: &str,
    mut on_line: F,
) -> Result<Option<i32>, ResolverError>
where
    F: FnMut(String),
{
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    let mut child = cmd
        .spawn()
        .map_err(|e| ResolverError::ProcessLaunch(format!("{}: {}", label, e)))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ResolverError::ProcessLaunch("Failed to capture stdout".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| ResolverError::ProcessLaunch("Failed to capture stderr".to_string()))?;

    let mut stdout_lines = BufReader::new(stdout).split(b'\n');
    let mut stderr_lines = BufReader::new(stderr).split(b'\n');
    let mut stdout_closed = false;
    let mut stderr_closed = false;

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    while !(stdout_closed && stderr_closed) {
        tokio::select! {
            seg = stdout_lines.next_segment(), if !stdout_closed => match seg {
                Ok(Some(seg)) => on_line(decode_line(&seg)),
                _ => stdout_closed = true,
            },
            seg = stderr_lines.next_segment(), if !stderr_closed => match seg {
                Ok(Some(seg)) => on_line(decode_line(&seg)),
                _ => stderr_closed = true,
            },
            _ = &mut deadline => {
                let _ = child.kill().await;
                return Err(ResolverError::Timeout {
                    operation: label.to_string(),
                    timeout,
                });
            }
        }
    }

    tokio::select! {
        status = child.wait() => Ok(status?.code()),
        _ = &mut deadline => {
            let _ = child.kill().await;
            Err(ResolverError::Timeout {
                operation: label.to_string(),
                timeout,
            })
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = base_command(Path::new("/bin/sh"));
        cmd.arg("-c").arg(script);
        cmd
    }

    #[tokio::test]
    async fn test_run_captured_success() {
        let out = run_captured(sh("echo hello; echo oops >&2"), Duration::from_secs(5), "echo")
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn test_run_captured_nonzero() {
        let out = run_captured(sh("exit 3"), Duration::from_secs(5), "exit")
            .await
            .unwrap();
        assert_eq!(out.code, Some(3));
        assert!(!out.success());
    }

    #[tokio::test]
    async fn test_run_captured_timeout() {
        let result = run_captured(sh("sleep 5"), Duration::from_millis(200), "sleep").await;
        assert!(matches!(result, Err(ResolverError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_run_streaming_collects_both_streams() {
        let mut lines = Vec::new();
        let code = run_streaming(
            sh("echo one; echo two >&2; echo three"),
            Duration::from_secs(5),
            "stream",
            |l| lines.push(l),
        )
        .await
        .unwrap();
        assert_eq!(code, Some(0));
        assert_eq!(lines.len(), 3);
        assert!(lines.contains(&"two".to_string()));
    }

    #[tokio::test]
    async fn test_run_streaming_timeout_kills() {
        let mut lines = Vec::new();
        let result = run_streaming(
            sh("echo started; sleep 5; echo never"),
            Duration::from_millis(300),
            "slow",
            |l| lines.push(l),
        )
        .await;
        assert!(matches!(result, Err(ResolverError::Timeout { .. })));
        assert_eq!(lines, vec!["started".to_string()]);
    }

    #[tokio::test]
    async fn test_run_streaming_survives_invalid_utf8() {
        // Enough output after the bad line to fill the pipe if it stopped being drained.
        let script = "printf 'Collecting caf\\351\\r\\n'; \
                      i=0; while [ $i -lt 20000 ]; do echo Downloading-xxx; i=$((i+1)); done; \
                      echo Successfully installed foo";
        let mut lines = Vec::new();
        let code = run_streaming(sh(script), Duration::from_secs(20), "pip install", |l| {
            lines.push(l)
        })
        .await
        .unwrap();

        assert_eq!(code, Some(0));
        assert_eq!(lines.len(), 20002);
        assert_eq!(lines[0], "Collecting caf\u{FFFD}");
        assert_eq!(lines.last().map(String::as_str), Some("Successfully installed foo"));
    }

    #[test]
    fn test_decode_line_replaces_invalid_bytes() {
        assert_eq!(decode_line(b"ok\r"), "ok");
        assert_eq!(decode_line(b"caf\xe9"), "caf\u{FFFD}");
    }

    #[test]
    fn test_command_line_quotes_spaces() {
        let line = command_line(Path::new("/usr/bin/python3"), ["-m", "PyInstaller", "my app.py"]);
        assert_eq!(line, "/usr/bin/python3 -m PyInstaller \"my app.py\"");
    }
}
