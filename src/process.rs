//! External process execution with a wall-clock budget.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, warn};

/// Configuration for running one external command.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub program: OsString,
    pub args: Vec<OsString>,
    pub env: Vec<(OsString, OsString)>,
    pub cwd: Option<PathBuf>,
    pub timeout: Duration,
}

impl RunConfig {
    pub fn new(program: impl AsRef<OsStr>, timeout: Duration) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.env
            .push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }

    pub fn cwd(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }
}

/// Output of a command that ran to completion.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub elapsed: Duration,
}

impl RunResult {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed(RunResult),
    /// The child was killed after exhausting its budget.
    TimedOut,
}

/// Run a command, capturing stdout/stderr. Spawn and wait failures are
/// returned as errors; a non-zero exit is a normal `Completed` outcome.
pub async fn run(config: &RunConfig) -> std::io::Result<RunOutcome> {
    debug!(program = ?config.program, args = ?config.args, cwd = ?config.cwd, "Running command");

    let mut cmd = Command::new(&config.program);
    cmd.args(&config.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in &config.env {
        cmd.env(key, value);
    }
    if let Some(cwd) = &config.cwd {
        cmd.current_dir(cwd);
    }
    // Own process group so a timeout can take down grandchildren too.
    #[cfg(target_os = "linux")]
    cmd.process_group(0);

    let start = Instant::now();
    let child = cmd.spawn()?;
    let pid = child.id();

    match tokio::time::timeout(config.timeout, child.wait_with_output()).await {
        Ok(output) => {
            let output = output?;
            let elapsed = start.elapsed();
            debug!(exit = ?output.status.code(), elapsed_ms = elapsed.as_millis() as u64, "Command finished");
            Ok(RunOutcome::Completed(RunResult {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                exit_code: output.status.code(),
                elapsed,
            }))
        }
        Err(_) => {
            warn!(program = ?config.program, timeout_secs = config.timeout.as_secs_f64(), "Command timed out, killing");
            kill_process_group(pid);
            Ok(RunOutcome::TimedOut)
        }
    }
}

#[cfg(target_os = "linux")]
fn kill_process_group(pid: Option<u32>) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = pid {
        // ESRCH just means everything already exited.
        let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
    }
}

// Elsewhere the dropped child is killed through kill_on_drop.
#[cfg(not(target_os = "linux"))]
fn kill_process_group(_pid: Option<u32>) {}
