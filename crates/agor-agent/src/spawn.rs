//! The process-spawner seam.
//!
//! Abstracts the agent subprocess: the production spawner runs
//! `tokio::process` children under the session owner's Unix identity;
//! tests feed scripted frames through the same interface.

use crate::error::{AgentError, AgentResult};
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt as _, AsyncWriteExt as _, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tracing::debug;

/// Lines of stderr kept in the ring buffer.
pub const STDERR_RING_CAPACITY: usize = 256;

/// Everything needed to spawn an agent subprocess.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    /// Executable.
    pub command: String,
    /// Arguments.
    pub args: Vec<String>,
    /// Full environment (the child does not inherit the daemon's).
    pub env: BTreeMap<String, String>,
    /// Working directory (the worktree path).
    pub cwd: PathBuf,
    /// Run as this uid.
    pub uid: Option<u32>,
    /// Run as this gid.
    pub gid: Option<u32>,
    /// Supplementary groups (worktree group, agor group).
    pub supplementary_groups: Vec<u32>,
}

/// Signals the driver sends at cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermSignal {
    /// SIGTERM.
    Term,
    /// SIGINT.
    Int,
    /// SIGKILL.
    Kill,
}

/// Spawns agent subprocesses.
#[async_trait]
pub trait ProcessSpawner: Send + Sync {
    /// Spawn a process per the spec.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::SpawnFailed`] when the process cannot
    /// start.
    async fn spawn(&self, spec: SpawnSpec) -> AgentResult<Box<dyn AgentProcess>>;
}

/// One running agent subprocess.
#[async_trait]
pub trait AgentProcess: Send {
    /// Write one frame (a line) to the agent's stdin.
    ///
    /// # Errors
    ///
    /// Returns an error when the pipe is closed.
    async fn send(&mut self, line: &str) -> AgentResult<()>;

    /// Read the next stdout frame. `Ok(None)` is end-of-stream.
    ///
    /// # Errors
    ///
    /// Returns an error on pipe failure.
    async fn next_frame(&mut self) -> AgentResult<Option<String>>;

    /// Deliver a signal.
    ///
    /// # Errors
    ///
    /// Returns an error when the process is gone and could not be
    /// signalled.
    async fn signal(&mut self, sig: TermSignal) -> AgentResult<()>;

    /// Wait for exit; returns the exit code when reapable.
    ///
    /// # Errors
    ///
    /// Returns an error on wait failure.
    async fn wait(&mut self) -> AgentResult<Option<i32>>;

    /// Snapshot of the stderr ring buffer.
    fn stderr(&self) -> Vec<String>;
}

/// Shared stderr ring buffer, filled by a background reader task.
#[derive(Debug, Clone, Default)]
pub(crate) struct StderrRing {
    lines: Arc<Mutex<VecDeque<String>>>,
}

impl StderrRing {
    pub(crate) fn push(&self, line: String) {
        let mut lines = self.lines.lock().expect("stderr ring lock");
        if lines.len() >= STDERR_RING_CAPACITY {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    pub(crate) fn snapshot(&self) -> Vec<String> {
        self.lines
            .lock()
            .expect("stderr ring lock")
            .iter()
            .cloned()
            .collect()
    }
}

/// The production spawner.
#[derive(Debug, Clone, Default)]
pub struct TokioSpawner;

impl TokioSpawner {
    /// Create a spawner.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessSpawner for TokioSpawner {
    async fn spawn(&self, spec: SpawnSpec) -> AgentResult<Box<dyn AgentProcess>> {
        let mut cmd = tokio::process::Command::new(&spec.command);
        cmd.args(&spec.args)
            .env_clear()
            .envs(&spec.env)
            .current_dir(&spec.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        apply_identity(&mut cmd, &spec);

        let mut child = cmd.spawn().map_err(|e| AgentError::SpawnFailed {
            stderr: format!("{}: {e}", spec.command),
        })?;

        let stdin = child.stdin.take().ok_or_else(|| AgentError::SpawnFailed {
            stderr: "stdin pipe missing".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| AgentError::SpawnFailed {
            stderr: "stdout pipe missing".to_string(),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| AgentError::SpawnFailed {
            stderr: "stderr pipe missing".to_string(),
        })?;

        let ring = StderrRing::default();
        let reader_ring = ring.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if !line.is_empty() {
                    debug!(target: "agor::agent::stderr", "{line}");
                    reader_ring.push(line);
                }
            }
        });

        Ok(Box::new(TokioProcess {
            child,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout).lines(),
            ring,
        }))
    }
}

/// Apply uid/gid/supplementary groups to the command.
///
/// `setgroups` has no safe wrapper in the standard library, so this is
/// the one place the workspace drops to `pre_exec`. Order matters:
/// groups, then gid, then uid — after `setuid` the process can no
/// longer change its groups.
#[allow(unsafe_code)]
fn apply_identity(cmd: &mut tokio::process::Command, spec: &SpawnSpec) {
    use nix::unistd::{Gid, Uid, setgid, setgroups, setuid};

    let uid = spec.uid;
    let gid = spec.gid;
    let groups: Vec<Gid> = spec
        .supplementary_groups
        .iter()
        .map(|g| Gid::from_raw(*g))
        .collect();

    if uid.is_none() && gid.is_none() && groups.is_empty() {
        return;
    }

    // SAFETY: the closure runs in the forked child before exec and only
    // calls async-signal-safe syscall wrappers.
    unsafe {
        cmd.pre_exec(move || {
            if !groups.is_empty() {
                setgroups(&groups)
                    .map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
            }
            if let Some(gid) = gid {
                setgid(Gid::from_raw(gid))
                    .map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
            }
            if let Some(uid) = uid {
                setuid(Uid::from_raw(uid))
                    .map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
            }
            Ok(())
        });
    }
}

struct TokioProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Lines<BufReader<ChildStdout>>,
    ring: StderrRing,
}

#[async_trait]
impl AgentProcess for TokioProcess {
    async fn send(&mut self, line: &str) -> AgentResult<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| AgentError::Protocol("stdin already closed".to_string()))?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn next_frame(&mut self) -> AgentResult<Option<String>> {
        Ok(self.stdout.next_line().await?)
    }

    async fn signal(&mut self, sig: TermSignal) -> AgentResult<()> {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        let Some(pid) = self.child.id() else {
            // Already reaped.
            return Ok(());
        };
        let signal = match sig {
            TermSignal::Term => Signal::SIGTERM,
            TermSignal::Int => Signal::SIGINT,
            TermSignal::Kill => Signal::SIGKILL,
        };
        #[allow(clippy::cast_possible_wrap)]
        kill(Pid::from_raw(pid as i32), signal)
            .map_err(|e| AgentError::Protocol(format!("signal failed: {e}")))?;
        Ok(())
    }

    async fn wait(&mut self) -> AgentResult<Option<i32>> {
        let status = self.child.wait().await?;
        Ok(status.code())
    }

    fn stderr(&self) -> Vec<String> {
        self.ring.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stderr_ring_caps_and_drops_oldest() {
        let ring = StderrRing::default();
        for i in 0..(STDERR_RING_CAPACITY + 10) {
            ring.push(format!("line {i}"));
        }
        let snapshot = ring.snapshot();
        assert_eq!(snapshot.len(), STDERR_RING_CAPACITY);
        assert_eq!(snapshot[0], "line 10");
    }

    #[tokio::test]
    async fn tokio_spawner_runs_a_real_process() {
        let spawner = TokioSpawner::new();
        let mut proc = spawner
            .spawn(SpawnSpec {
                command: "sh".into(),
                args: vec!["-c".into(), "echo '{\"type\":\"x\"}'".into()],
                env: BTreeMap::new(),
                cwd: std::env::temp_dir(),
                uid: None,
                gid: None,
                supplementary_groups: vec![],
            })
            .await
            .unwrap();

        let frame = proc.next_frame().await.unwrap();
        assert_eq!(frame.as_deref(), Some("{\"type\":\"x\"}"));
        assert_eq!(proc.next_frame().await.unwrap(), None);
        assert_eq!(proc.wait().await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn spawn_failure_is_reported() {
        let spawner = TokioSpawner::new();
        let result = spawner
            .spawn(SpawnSpec {
                command: "/nonexistent/agor-agent-binary".into(),
                args: vec![],
                env: BTreeMap::new(),
                cwd: std::env::temp_dir(),
                uid: None,
                gid: None,
                supplementary_groups: vec![],
            })
            .await;
        assert!(matches!(result, Err(AgentError::SpawnFailed { .. })));
    }
}
