//! Child process spawning and incremental output streaming.
//!
//! A spawned child gets two reader tasks, one per stream, that drain the
//! OS pipes into an unbounded channel. A slow consumer of the channel can
//! therefore never stall the child through pipe backpressure.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc::{self, UnboundedSender};

use super::kill;
use super::lines::LineBuffer;

/// Which stream a line arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSource {
    Stdout,
    Stderr,
}

/// One line of child output.
#[derive(Debug, Clone)]
pub struct OutputLine {
    pub source: StreamSource,
    pub text: String,
}

/// What to launch: a program plus an explicit argument list.
///
/// Arguments are always passed as a list, never concatenated into a shell
/// string, so tool arguments cannot be reinterpreted by quoting.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl LaunchSpec {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            cwd: None,
            env: Vec::new(),
        }
    }
}

/// Identifier for a live child, used for process-tree termination.
///
/// Owned by the active stage invocation; registered with the cancellation
/// controller for the child's lifetime and cleared on exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessHandle {
    pid: u32,
}

impl ProcessHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Graceful stop of the child's whole process tree.
    pub fn terminate_tree(&self) {
        kill::terminate_tree(self.pid);
    }

    /// Forced kill of the child's whole process tree.
    pub fn kill_tree(&self) {
        kill::kill_tree(self.pid);
    }

    pub fn is_alive(&self) -> bool {
        kill::is_alive(self.pid)
    }
}

/// A spawned child together with its line stream.
pub struct RunningProcess {
    child: Child,
    pub handle: ProcessHandle,
    /// Lines from stdout and stderr, in arrival order. Closes when both
    /// streams reach end of file.
    pub lines: mpsc::UnboundedReceiver<OutputLine>,
}

impl RunningProcess {
    /// Wait for the child to exit.
    ///
    /// Returns the exit code; a child killed by a signal reports the
    /// negated signal number.
    pub async fn wait(mut self) -> std::io::Result<i32> {
        let status = self.child.wait().await?;
        Ok(exit_code_of(status))
    }
}

/// Spawn an external process with piped stdio.
///
/// Fails with the raw `io::Error` when the executable cannot be started;
/// the caller decides how to classify that. The child is spawned into its
/// own process group (Unix) so tree termination cannot touch the parent,
/// and `kill_on_drop` backstops handle release if the invocation is
/// abandoned mid-run.
pub fn spawn(spec: &LaunchSpec) -> std::io::Result<RunningProcess> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &spec.cwd {
        cmd.current_dir(dir);
    }
    for (key, value) in &spec.env {
        cmd.env(key, value);
    }
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn()?;
    let pid = child.id().unwrap_or(0);

    let (tx, rx) = mpsc::unbounded_channel();
    if let Some(stdout) = child.stdout.take() {
        spawn_reader(stdout, StreamSource::Stdout, tx.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        spawn_reader(stderr, StreamSource::Stderr, tx);
    }

    Ok(RunningProcess {
        child,
        handle: ProcessHandle { pid },
        lines: rx,
    })
}

fn spawn_reader<R>(mut reader: R, source: StreamSource, tx: UnboundedSender<OutputLine>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 4096];
        let mut buffer = LineBuffer::new();
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    for text in buffer.push(&chunk[..n]) {
                        if tx.send(OutputLine { source, text }).is_err() {
                            return;
                        }
                    }
                }
            }
        }
        if let Some(text) = buffer.finish() {
            let _ = tx.send(OutputLine { source, text });
        }
    });
}

fn exit_code_of(status: ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status
            .code()
            .or_else(|| status.signal().map(|s| -s))
            .unwrap_or(-1)
    }
    #[cfg(not(unix))]
    {
        status.code().unwrap_or(-1)
    }
}
