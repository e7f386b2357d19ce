//! Backend process supervision: spawning, output streaming, cancellation.
//!
//! The child runs in its own process group on Unix (no console window on
//! Windows) so that `terminate()` can take down the whole tree, including the
//! C compiler and linker processes the backend forks.

use crate::error::BuildError;
use crate::plan::BuildPlan;
use crate::system::process::{base_command, decode_line};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const LINE_BUFFER: usize = 1024;
/// How long `terminate()` waits for the killed child to be reaped.
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle of one supervised process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Running,
    /// Exited on its own with this code
    Completed(i32),
    /// Killed by `terminate()`
    Terminated,
    Failed(String),
}

impl Default for SupervisorState {
    fn default() -> Self {
        SupervisorState::Idle
    }
}

/// What `next_event` hands back to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    Line(String),
    Exited(SupervisorState),
}

/// A recognisable backend progress step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildMilestone {
    pub label: &'static str,
    pub percent: u32,
}

const MILESTONES: &[(&str, &str, u32)] = &[
    // PyInstaller
    ("INFO: PyInstaller:", "Starting PyInstaller", 5),
    ("INFO: Initializing module dependency graph", "Analyzing imports", 15),
    ("INFO: Analyzing ", "Analyzing imports", 20),
    ("INFO: Building PYZ", "Building PYZ archive", 60),
    ("INFO: Building PKG", "Building package", 75),
    ("INFO: Building EXE from", "Building executable", 85),
    ("INFO: Appending PKG archive to EXE", "Finalizing executable", 95),
    ("Build complete!", "Build complete", 100),
    // Nuitka
    ("Nuitka-Options:", "Reading Nuitka options", 5),
    ("Nuitka: Starting Python compilation", "Compiling Python code", 15),
    ("Nuitka: Completed Python level compilation", "Python compilation finished", 40),
    ("Nuitka: Generating source code for C backend", "Generating C sources", 50),
    ("Nuitka: Running C compilation", "Compiling C sources", 60),
    ("Nuitka-Scons: Backend C linking", "Linking", 75),
    ("Nuitka-Onefile: Creating single file", "Creating onefile payload", 85),
    ("Nuitka: Successfully created", "Build complete", 100),
];

/// Match a backend output line against known progress steps.
pub fn parse_build_milestone(line: &str) -> Option<BuildMilestone> {
    MILESTONES
        .iter()
        .find(|(needle, _, _)| line.contains(needle))
        .map(|&(_, label, percent)| BuildMilestone { label, percent })
}

/// Owns at most one running backend process.
#[derive(Debug, Default)]
pub struct ProcessSupervisor {
    state: SupervisorState,
    /// Present only while the process is believed running
    child: Option<Child>,
    lines_rx: Option<mpsc::Receiver<String>>,
    reader: Option<JoinHandle<()>>,
    /// Monotonic for the lifetime of one job
    cancelled: bool,
    output_dir: PathBuf,
    intermediates: Vec<String>,
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &SupervisorState {
        &self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == SupervisorState::Running
    }

    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Launch the plan's command and begin streaming its output.
    pub fn start(&mut self, plan: &BuildPlan) -> Result<(), BuildError> {
        if self.is_running() {
            return Err(BuildError::AlreadyRunning);
        }

        let mut cmd = base_command(&plan.program);
        cmd.args(&plan.args)
            .current_dir(&plan.working_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        plan.env.apply(&mut cmd);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let reason = format!("{}: {}", plan.program.display(), e);
                self.state = SupervisorState::Failed(reason.clone());
                return Err(BuildError::ProcessLaunch(reason));
            }
        };

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BuildError::ProcessLaunch("Failed to capture stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| BuildError::ProcessLaunch("Failed to capture stderr".to_string()))?;

        let (tx, rx) = mpsc::channel(LINE_BUFFER);
        let reader = tokio::spawn(pump_lines(stdout, stderr, tx));

        log::info!(
            "[Build] {} started (pid {})",
            plan.backend,
            child.id().map(|p| p.to_string()).unwrap_or_else(|| "?".to_string())
        );

        self.child = Some(child);
        self.lines_rx = Some(rx);
        self.reader = Some(reader);
        self.cancelled = false;
        self.output_dir = plan.output_dir.clone();
        self.intermediates = plan.intermediates.clone();
        self.state = SupervisorState::Running;
        Ok(())
    }

    /// Next output line, or the exit once both streams have closed.
    ///
    /// Returns `None` when nothing is running. Cancel safe.
    pub async fn next_event(&mut self) -> Option<SupervisorEvent> {
        if !self.is_running() {
            return None;
        }

        if let Some(rx) = self.lines_rx.as_mut() {
            if let Some(line) = rx.recv().await {
                return Some(SupervisorEvent::Line(line));
            }
            self.lines_rx = None;
        }

        let status = self.child.as_mut()?.wait().await;
        self.child = None;
        self.reader = None;

        self.state = if self.cancelled {
            SupervisorState::Terminated
        } else {
            match status {
                Ok(status) => match status.code() {
                    Some(0) => SupervisorState::Completed(0),
                    Some(code) => {
                        SupervisorState::Failed(format!("Build failed with exit code {}", code))
                    }
                    None => SupervisorState::Failed("Build terminated by signal".to_string()),
                },
                Err(e) => SupervisorState::Failed(format!("Failed to wait for process: {}", e)),
            }
        };
        Some(SupervisorEvent::Exited(self.state.clone()))
    }

    /// Kill the process tree and remove partial artifacts.
    ///
    /// Returns `false` (and does nothing) when no process is running. No line
    /// is delivered after this returns.
    pub async fn terminate(&mut self) -> bool {
        if !self.is_running() {
            return false;
        }
        let Some(mut child) = self.child.take() else {
            return false;
        };

        self.cancelled = true;
        self.lines_rx = None;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }

        log::warn!("[Build] Terminating build process tree");
        kill_tree(&mut child);
        match tokio::time::timeout(REAP_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => log::debug!("[Build] Killed process reaped: {}", status),
            Ok(Err(e)) => log::warn!("[Build] Failed to reap killed process: {}", e),
            Err(_) => log::warn!("[Build] Killed process not reaped after {}s", REAP_TIMEOUT.as_secs()),
        }
        self.state = SupervisorState::Terminated;

        let removed = purge_intermediates(&self.output_dir, &self.intermediates);
        if !removed.is_empty() {
            log::info!("[Build] Removed {} partial artifact(s)", removed.len());
        }
        true
    }
}

/// Merge stdout and stderr into one ordered line stream.
async fn pump_lines<O, E>(stdout: O, stderr: E, tx: mpsc::Sender<String>)
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let mut stdout_lines = BufReader::new(stdout).split(b'\n');
    let mut stderr_lines = BufReader::new(stderr).split(b'\n');
    let mut stdout_closed = false;
    let mut stderr_closed = false;

    while !(stdout_closed && stderr_closed) {
        let segment = tokio::select! {
            seg = stdout_lines.next_segment(), if !stdout_closed => match seg {
                Ok(Some(seg)) => seg,
                _ => {
                    stdout_closed = true;
                    continue;
                }
            },
            seg = stderr_lines.next_segment(), if !stderr_closed => match seg {
                Ok(Some(seg)) => seg,
                _ => {
                    stderr_closed = true;
                    continue;
                }
            },
        };

        if tx.send(decode_line(&segment)).await.is_err() {
            break;
        }
    }
}

#[cfg(unix)]
fn kill_tree(child: &mut Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            log::debug!("[Build] killpg({}) failed: {}", pid, e);
        }
    }
    if let Err(e) = child.start_kill() {
        log::debug!("[Build] kill failed: {}", e);
    }
}

#[cfg(windows)]
fn kill_tree(child: &mut Child) {
    use std::os::windows::process::CommandExt;

    if let Some(pid) = child.id() {
        let result = std::process::Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/T", "/F"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .creation_flags(crate::system::process::CREATE_NO_WINDOW)
            .status();
        if let Err(e) = result {
            log::debug!("[Build] taskkill failed: {}", e);
        }
    }
    if let Err(e) = child.start_kill() {
        log::debug!("[Build] kill failed: {}", e);
    }
}

#[cfg(not(any(unix, windows)))]
fn kill_tree(child: &mut Child) {
    let _ = child.start_kill();
}

/// Delete everything under `output_dir` matching the given glob patterns.
pub fn purge_intermediates(output_dir: &Path, patterns: &[String]) -> Vec<PathBuf> {
    let base = glob::Pattern::escape(&output_dir.to_string_lossy());
    let mut removed = Vec::new();

    for pattern in patterns {
        let full = format!("{}/{}", base, pattern);
        let paths = match glob::glob(&full) {
            Ok(paths) => paths,
            Err(e) => {
                log::warn!("[Build] Bad intermediate pattern {}: {}", pattern, e);
                continue;
            }
        };
        for path in paths.filter_map(Result::ok) {
            let result = if path.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            match result {
                Ok(()) => {
                    log::debug!("[Build] Removed {}", path.display());
                    removed.push(path);
                }
                Err(e) => log::warn!("[Build] Could not remove {}: {}", path.display(), e),
            }
        }
    }
    removed
}
