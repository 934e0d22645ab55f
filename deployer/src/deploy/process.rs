//! External command execution with hard timeouts and output capture

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::errors::DeployError;

/// How long reader tasks may keep draining after the process is gone
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Lines of stderr quoted in a failed command's error message
const STDERR_TAIL_LINES: usize = 10;

/// One external command invocation
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
    pub stream_to_log: bool,
}

impl CommandSpec {
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            cwd: None,
            env: Vec::new(),
            timeout: Duration::from_secs(60),
            stream_to_log: false,
        }
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn stream_to_log(mut self, stream: bool) -> Self {
        self.stream_to_log = stream;
        self
    }

    /// Command line as a single string, for logs and error messages
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// True when the command is `program` and its arguments start with `prefix`
    pub fn matches(&self, program: &str, prefix: &[&str]) -> bool {
        self.program == program
            && self.args.len() >= prefix.len()
            && self.args.iter().zip(prefix).all(|(a, p)| a == p)
    }
}

/// Outcome of a command that exited successfully
#[derive(Debug, Clone, Default)]
pub struct ProcessResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Both streams interleaved in arrival order
    pub logs: Vec<String>,
    pub duration: Duration,
}

impl ProcessResult {
    /// Stdout and stderr joined, for scanning tool output
    pub fn combined_output(&self) -> String {
        self.logs.join("\n")
    }
}

/// Runs external commands
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion.
    ///
    /// Fails with a `Timeout` error when the limit elapses and with a
    /// `System` error on spawn failure or non-zero exit. Errors carry every
    /// captured line in their logs.
    async fn run(&self, spec: &CommandSpec) -> Result<ProcessResult, DeployError>;
}

#[derive(Debug, Clone, Copy)]
enum StreamKind {
    Stdout,
    Stderr,
}

/// Runs commands as real child processes
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor;

impl ProcessExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ProcessExecutor {
    async fn run(&self, spec: &CommandSpec) -> Result<ProcessResult, DeployError> {
        let cmdline = spec.display();
        debug!("Executing: {}", cmdline);

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        // Own process group so a timeout can take down the whole tree
        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        let start = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|e| DeployError::system(format!("Failed to spawn `{}`: {}", cmdline, e)))?;
        let mut group = GroupGuard::new(child.id());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(
                stdout,
                StreamKind::Stdout,
                tx.clone(),
                spec.stream_to_log.then(|| spec.program.clone()),
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(
                stderr,
                StreamKind::Stderr,
                tx.clone(),
                spec.stream_to_log.then(|| spec.program.clone()),
            ));
        }
        drop(tx);

        let waited = tokio::time::timeout(spec.timeout, child.wait()).await;
        let status = match waited {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                terminate(&mut child).await;
                drain_readers(readers).await;
                group.disarm();
                return Err(DeployError::system(format!(
                    "Failed waiting for `{}`: {}",
                    cmdline, e
                )));
            }
            Err(_) => {
                warn!("Command timed out after {:?}: {}", spec.timeout, cmdline);
                terminate(&mut child).await;
                None
            }
        };

        drain_readers(readers).await;
        group.disarm();
        let duration = start.elapsed();

        let mut logs = Vec::new();
        let mut stdout_lines = Vec::new();
        let mut stderr_lines = Vec::new();
        while let Ok((kind, line)) = rx.try_recv() {
            match kind {
                StreamKind::Stdout => stdout_lines.push(line.clone()),
                StreamKind::Stderr => stderr_lines.push(line.clone()),
            }
            logs.push(line);
        }

        let Some(status) = status else {
            return Err(DeployError::timeout(format!(
                "Command `{}` timed out after {}s",
                cmdline,
                spec.timeout.as_secs_f64()
            ))
            .with_details(serde_json::json!({
                "command": cmdline,
                "timeout_ms": spec.timeout.as_millis() as u64,
            }))
            .with_logs(logs));
        };

        let exit_code = status.code().unwrap_or(-1);
        if !status.success() {
            let tail_start = stderr_lines.len().saturating_sub(STDERR_TAIL_LINES);
            return Err(DeployError::system(format!(
                "Command `{}` failed with exit code {}: {}",
                cmdline,
                exit_code,
                stderr_lines[tail_start..].join("\n")
            ))
            .with_details(serde_json::json!({
                "command": cmdline,
                "exit_code": exit_code,
            }))
            .with_logs(logs));
        }

        debug!("Command finished in {:?}: {}", duration, cmdline);
        Ok(ProcessResult {
            exit_code,
            stdout: stdout_lines.join("\n"),
            stderr: stderr_lines.join("\n"),
            logs,
            duration,
        })
    }
}

fn spawn_reader<R>(
    stream: R,
    kind: StreamKind,
    tx: mpsc::UnboundedSender<(StreamKind, String)>,
    log_label: Option<String>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf)
                        .trim_end_matches(['\n', '\r'])
                        .to_string();
                    if let Some(label) = &log_label {
                        debug!("[{}] {}", label, line);
                    }
                    if tx.send((kind, line)).is_err() {
                        break;
                    }
                }
            }
        }
    })
}

/// Wait for reader tasks, giving up on any that outlive the grace period
/// (a detached grandchild may still hold the pipe open).
async fn drain_readers(readers: Vec<JoinHandle<()>>) {
    for mut reader in readers {
        if tokio::time::timeout(OUTPUT_DRAIN_GRACE, &mut reader)
            .await
            .is_err()
        {
            warn!("Output reader did not finish, abandoning it");
            reader.abort();
        }
    }
}

/// Kills the child's process group if dropped while still armed
struct GroupGuard {
    pgid: Option<u32>,
}

impl GroupGuard {
    fn new(pgid: Option<u32>) -> Self {
        Self { pgid }
    }

    /// The child was reaped and its output drained
    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        let Some(pgid) = self.pgid.take() else {
            return;
        };
        #[cfg(unix)]
        {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            warn!("Command abandoned, killing process group {}", pgid);
            if let Err(e) = killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL) {
                debug!("killpg({}) failed: {}", pgid, e);
            }
        }
        #[cfg(not(unix))]
        debug!("Command abandoned, process {} left to kill_on_drop", pgid);
    }
}

/// Kill the child's whole process group, then the child itself, and reap it
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                debug!("killpg({}) failed: {}", pid, e);
            }
        }
    }
    if let Err(e) = child.kill().await {
        debug!("Failed to kill child process: {}", e);
    }
}
