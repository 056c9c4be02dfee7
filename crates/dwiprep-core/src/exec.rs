//! External tool execution with timeout and guaranteed child reaping.
//!
//! Every numerical step of the pipeline is a blocking subprocess. The
//! [`ToolRunner`] trait is the seam between orchestration and those
//! binaries; [`ProcessRunner`] is the real implementation.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;

use crate::shutdown::is_shutdown_requested;

/// Lines of tool output included in a failure message
const LOG_TAIL_LINES: usize = 20;

/// Upper bound on bytes read back from a tool log
const LOG_TAIL_BYTES: u64 = 16 * 1024;

/// One external command: a label for logs, the program and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub label: String,
    pub program: String,
    pub args: Vec<String>,
}

impl ToolInvocation {
    pub fn new(label: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append a path argument.
    pub fn path(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy().into_owned())
    }

    /// Append `{flag}={path}` (FSL long-option style).
    pub fn flag_path(self, flag: &str, path: &Path) -> Self {
        self.arg(format!("{flag}={}", path.display()))
    }

    /// Command line for logs.
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for a in &self.args {
            line.push(' ');
            line.push_str(a);
        }
        line
    }
}

impl fmt::Display for ToolInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.label, self.command_line())
    }
}

/// Failure of a single external command.
#[derive(Debug)]
pub enum ToolError {
    /// Program could not be started (not on PATH, not executable).
    Spawn { program: String, source: io::Error },
    /// Program exited unsuccessfully. `code` is `None` when killed by a signal.
    Failed {
        program: String,
        code: Option<i32>,
        log_tail: String,
    },
    /// Program exceeded its time budget and was killed.
    TimedOut { program: String, limit: Duration },
    /// Shutdown was requested while the program was running; it was killed.
    Interrupted { program: String },
    /// I/O around the child (log file, wait).
    Io { context: String, source: io::Error },
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spawn { program, source } => {
                write!(f, "failed to start `{program}`: {source} (is it on PATH?)")
            }
            Self::Failed {
                program,
                code: Some(c),
                log_tail,
            } => write_failure(f, program, &format!("exit status {c}"), log_tail),
            Self::Failed {
                program,
                code: None,
                log_tail,
            } => write_failure(f, program, "terminated by signal", log_tail),
            Self::TimedOut { program, limit } => {
                write!(f, "`{program}` killed after {limit:?} timeout")
            }
            Self::Interrupted { program } => write!(f, "`{program}` interrupted by shutdown"),
            Self::Io { context, source } => write!(f, "{context}: {source}"),
        }
    }
}

fn write_failure(f: &mut fmt::Formatter<'_>, program: &str, why: &str, tail: &str) -> fmt::Result {
    write!(f, "`{program}` failed with {why}")?;
    if !tail.is_empty() {
        write!(f, "\n--- last output ---\n{tail}")?;
    }
    Ok(())
}

impl std::error::Error for ToolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Spawn { source, .. } | Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl ToolError {
    fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Runs external commands to completion.
///
/// `log_path` receives the combined stdout/stderr of the command.
pub trait ToolRunner: Send + Sync {
    fn run(&self, invocation: &ToolInvocation, log_path: &Path) -> Result<(), ToolError>;
}

/// Spawns real child processes.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    env: Vec<(String, String)>,
    timeout: Option<Duration>,
    poll_interval: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self {
            env: Vec::new(),
            timeout: None,
            poll_interval: Duration::from_millis(200),
        }
    }
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runner with the FSL environment of the installation at `fsl_dir`.
    ///
    /// Pins `FSLDIR`, puts `{fsl_dir}/bin` first on `PATH` and forces
    /// gzipped NIfTI output, which the artifact naming relies on.
    pub fn fsl(fsl_dir: &Path) -> Self {
        let path = match std::env::var("PATH") {
            Ok(p) if !p.is_empty() => format!("{}/bin:{p}", fsl_dir.display()),
            _ => format!("{}/bin", fsl_dir.display()),
        };
        Self::new()
            .with_env("FSLDIR", fsl_dir.display().to_string())
            .with_env("PATH", path)
            .with_env("FSLOUTPUTTYPE", "NIFTI_GZ")
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Kill commands running longer than `timeout`. `None` waits forever.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn wait(&self, guard: &mut ChildGuard, program: &str) -> Result<ExitStatus, ToolError> {
        let start = Instant::now();
        loop {
            match guard.child.try_wait() {
                Ok(Some(status)) => {
                    guard.reaped = true;
                    return Ok(status);
                }
                Ok(None) => {}
                Err(e) => return Err(ToolError::io(format!("waiting on `{program}`"), e)),
            }
            if is_shutdown_requested() {
                guard.kill();
                return Err(ToolError::Interrupted {
                    program: program.to_string(),
                });
            }
            if let Some(limit) = self.timeout {
                if start.elapsed() >= limit {
                    guard.kill();
                    return Err(ToolError::TimedOut {
                        program: program.to_string(),
                        limit,
                    });
                }
            }
            std::thread::sleep(self.poll_interval);
        }
    }
}

impl ToolRunner for ProcessRunner {
    fn run(&self, invocation: &ToolInvocation, log_path: &Path) -> Result<(), ToolError> {
        let program = invocation.program.as_str();
        if let Some(parent) = log_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| ToolError::io(format!("creating {}", parent.display()), e))?;
        }
        let stdout = File::create(log_path)
            .map_err(|e| ToolError::io(format!("creating {}", log_path.display()), e))?;
        let stderr = stdout
            .try_clone()
            .map_err(|e| ToolError::io(format!("cloning {}", log_path.display()), e))?;

        let mut cmd = Command::new(program);
        cmd.args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            // own group, so a kill reaches wrappers' children too (bet runs bet2)
            .process_group(0);
        for (k, v) in &self.env {
            cmd.env(k, v);
        }

        log::debug!("running {invocation}");
        let child = cmd.spawn().map_err(|source| ToolError::Spawn {
            program: program.to_string(),
            source,
        })?;
        let mut guard = ChildGuard {
            child,
            reaped: false,
        };

        let status = self.wait(&mut guard, program)?;
        if status.success() {
            Ok(())
        } else {
            Err(ToolError::Failed {
                program: program.to_string(),
                code: status.code(),
                log_tail: log_tail(log_path, LOG_TAIL_LINES),
            })
        }
    }
}

/// Owns a spawned child; kills its process group and reaps it unless it
/// was already waited on.
struct ChildGuard {
    child: Child,
    reaped: bool,
}

impl ChildGuard {
    fn kill(&mut self) {
        let pgid = Pid::from_raw(self.child.id() as i32);
        if let Err(e) = killpg(pgid, Signal::SIGKILL) {
            log::debug!("killpg {pgid} failed ({e}), killing leader only");
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
        self.reaped = true;
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if !self.reaped {
            self.kill();
        }
    }
}

/// Last `lines` lines of a log file, best effort.
pub fn log_tail(path: &Path, lines: usize) -> String {
    let Ok(mut file) = File::open(path) else {
        return String::new();
    };
    let len = file.metadata().map(|m| m.len()).unwrap_or(0);
    if len > LOG_TAIL_BYTES && file.seek(SeekFrom::Start(len - LOG_TAIL_BYTES)).is_err() {
        return String::new();
    }
    let mut buf = Vec::new();
    if file.read_to_end(&mut buf).is_err() {
        return String::new();
    }
    let text = String::from_utf8_lossy(&buf);
    let all: Vec<&str> = text.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}
