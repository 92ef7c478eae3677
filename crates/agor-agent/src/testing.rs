//! Scripted spawner: canned agent subprocesses for tests.
//!
//! Feeds pre-written stream-json frames through the [`ProcessSpawner`]
//! seam, records everything written to "stdin", and can pause until the
//! harness responds — enough to script permission round-trips.

use crate::error::{AgentError, AgentResult};
use crate::spawn::{AgentProcess, ProcessSpawner, SpawnSpec, TermSignal};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// One step of a scripted process's stdout.
#[derive(Debug, Clone)]
pub enum ScriptedFrame {
    /// Emit this line.
    Frame(String),
    /// Sleep before the next step.
    Delay(Duration),
    /// Block until the harness writes another stdin frame.
    AwaitSend,
    /// Produce nothing until killed.
    Hang,
}

/// A spawner that hands out scripted processes, one script per spawn.
#[derive(Debug, Default)]
pub struct ScriptedSpawner {
    scripts: Mutex<VecDeque<Vec<ScriptedFrame>>>,
    specs: Mutex<Vec<SpawnSpec>>,
    sent: Arc<Mutex<Vec<String>>>,
    stderr: Vec<String>,
    exit_code: i32,
}

impl ScriptedSpawner {
    /// A spawner with one queued script.
    #[must_use]
    pub fn with_script(frames: Vec<ScriptedFrame>) -> Self {
        let spawner = Self::default();
        spawner.queue_script(frames);
        spawner
    }

    /// Queue a script for the next spawn.
    ///
    /// # Panics
    ///
    /// Panics if the script lock is poisoned (test-only type).
    pub fn queue_script(&self, frames: Vec<ScriptedFrame>) {
        self.scripts.lock().expect("script lock").push_back(frames);
    }

    /// Configure stderr lines every process reports.
    #[must_use]
    pub fn with_stderr(mut self, lines: &[&str]) -> Self {
        self.stderr = lines.iter().map(ToString::to_string).collect();
        self
    }

    /// Configure the exit code processes report.
    #[must_use]
    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }

    /// Everything written to any scripted process's stdin.
    ///
    /// # Panics
    ///
    /// Panics if the sent lock is poisoned (test-only type).
    #[must_use]
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().expect("sent lock").clone()
    }

    /// Specs of every spawn so far.
    ///
    /// # Panics
    ///
    /// Panics if the specs lock is poisoned (test-only type).
    #[must_use]
    pub fn specs(&self) -> Vec<SpawnSpec> {
        self.specs.lock().expect("specs lock").clone()
    }

    /// Number of spawns so far.
    #[must_use]
    pub fn spawn_count(&self) -> usize {
        self.specs().len()
    }
}

#[async_trait]
impl ProcessSpawner for ScriptedSpawner {
    async fn spawn(&self, spec: SpawnSpec) -> AgentResult<Box<dyn AgentProcess>> {
        self.specs.lock().expect("specs lock").push(spec);
        let frames = self
            .scripts
            .lock()
            .expect("script lock")
            .pop_front()
            .ok_or_else(|| AgentError::SpawnFailed {
                stderr: "no script queued for this spawn".to_string(),
            })?;
        Ok(Box::new(ScriptedProcess {
            frames: VecDeque::from(frames),
            sent_all: Arc::clone(&self.sent),
            sent_local: Arc::new(Mutex::new(Vec::new())),
            baseline: None,
            awaits_done: 0,
            wake: Arc::new(Notify::new()),
            killed: Arc::new(AtomicBool::new(false)),
            stderr: self.stderr.clone(),
            exit_code: self.exit_code,
        }))
    }
}

struct ScriptedProcess {
    frames: VecDeque<ScriptedFrame>,
    /// Spawner-wide send log, for test assertions.
    sent_all: Arc<Mutex<Vec<String>>>,
    /// This process's own stdin, for `AwaitSend` gating.
    sent_local: Arc<Mutex<Vec<String>>>,
    /// Stdin writes present before the script started consuming (the
    /// initial prompt frame). Captured on the first read so `AwaitSend`
    /// only counts writes the script is actually waiting for — even
    /// ones that arrive before it reaches the await.
    baseline: Option<usize>,
    awaits_done: usize,
    wake: Arc<Notify>,
    killed: Arc<AtomicBool>,
    stderr: Vec<String>,
    exit_code: i32,
}

impl ScriptedProcess {
    fn local_len(&self) -> usize {
        self.sent_local.lock().expect("sent lock").len()
    }

    async fn wait_until<F: Fn() -> bool>(&self, ready: F) {
        loop {
            let notified = self.wake.notified();
            if ready() || self.killed.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl AgentProcess for ScriptedProcess {
    async fn send(&mut self, line: &str) -> AgentResult<()> {
        self.sent_all
            .lock()
            .expect("sent lock")
            .push(line.to_string());
        self.sent_local
            .lock()
            .expect("sent lock")
            .push(line.to_string());
        self.wake.notify_waiters();
        Ok(())
    }

    async fn next_frame(&mut self) -> AgentResult<Option<String>> {
        if self.baseline.is_none() {
            self.baseline = Some(self.local_len());
        }
        loop {
            if self.killed.load(Ordering::SeqCst) {
                return Ok(None);
            }
            match self.frames.pop_front() {
                None => return Ok(None),
                Some(ScriptedFrame::Frame(line)) => return Ok(Some(line)),
                Some(ScriptedFrame::Delay(duration)) => {
                    tokio::time::sleep(duration).await;
                },
                Some(ScriptedFrame::AwaitSend) => {
                    // The k-th await completes once k writes beyond the
                    // baseline have arrived, whenever they arrived.
                    self.awaits_done = self.awaits_done.saturating_add(1);
                    let target = self
                        .baseline
                        .unwrap_or(0)
                        .saturating_add(self.awaits_done);
                    let sent = Arc::clone(&self.sent_local);
                    self.wait_until(move || {
                        sent.lock().expect("sent lock").len() >= target
                    })
                    .await;
                },
                Some(ScriptedFrame::Hang) => {
                    self.wait_until(|| false).await;
                    return Ok(None);
                },
            }
        }
    }

    async fn signal(&mut self, _sig: TermSignal) -> AgentResult<()> {
        self.killed.store(true, Ordering::SeqCst);
        self.wake.notify_waiters();
        Ok(())
    }

    async fn wait(&mut self) -> AgentResult<Option<i32>> {
        Ok(Some(if self.killed.load(Ordering::SeqCst) {
            137
        } else {
            self.exit_code
        }))
    }

    fn stderr(&self) -> Vec<String> {
        self.stderr.clone()
    }
}

/// Ready-made stream-json frames for scripts.
pub mod frames {
    use serde_json::json;

    /// The `system/init` message.
    #[must_use]
    pub fn system_init(session_id: &str) -> String {
        json!({
            "type": "system",
            "subtype": "init",
            "session_id": session_id,
            "model": "claude-sonnet-4-5",
            "tools": ["Bash", "Read"],
        })
        .to_string()
    }

    /// A `message_start` stream event.
    #[must_use]
    pub fn stream_message_start(session_id: &str) -> String {
        json!({
            "type": "stream_event",
            "session_id": session_id,
            "event": { "type": "message_start" },
        })
        .to_string()
    }

    /// A text delta at block `index`.
    #[must_use]
    pub fn stream_text_delta(session_id: &str, index: u64, text: &str) -> String {
        json!({
            "type": "stream_event",
            "session_id": session_id,
            "event": {
                "type": "content_block_delta",
                "index": index,
                "delta": { "type": "text_delta", "text": text },
            },
        })
        .to_string()
    }

    /// A tool-use block opening at `index`.
    #[must_use]
    pub fn stream_tool_start(session_id: &str, index: u64, name: &str, id: &str) -> String {
        json!({
            "type": "stream_event",
            "session_id": session_id,
            "event": {
                "type": "content_block_start",
                "index": index,
                "content_block": { "type": "tool_use", "id": id, "name": name, "input": {} },
            },
        })
        .to_string()
    }

    /// A block closing at `index`.
    #[must_use]
    pub fn stream_block_stop(session_id: &str, index: u64) -> String {
        json!({
            "type": "stream_event",
            "session_id": session_id,
            "event": { "type": "content_block_stop", "index": index },
        })
        .to_string()
    }

    /// A `message_stop` stream event.
    #[must_use]
    pub fn stream_message_stop(session_id: &str) -> String {
        json!({
            "type": "stream_event",
            "session_id": session_id,
            "event": { "type": "message_stop" },
        })
        .to_string()
    }

    /// A complete assistant turn of plain text.
    #[must_use]
    pub fn assistant_text(session_id: &str, text: &str) -> String {
        json!({
            "type": "assistant",
            "session_id": session_id,
            "message": {
                "id": "msg_1",
                "role": "assistant",
                "model": "claude-sonnet-4-5",
                "content": [{ "type": "text", "text": text }],
            },
        })
        .to_string()
    }

    /// A complete assistant turn invoking a tool.
    #[must_use]
    pub fn assistant_tool_use(session_id: &str, name: &str, id: &str) -> String {
        json!({
            "type": "assistant",
            "session_id": session_id,
            "message": {
                "id": "msg_2",
                "role": "assistant",
                "model": "claude-sonnet-4-5",
                "content": [
                    { "type": "tool_use", "id": id, "name": name, "input": {"command": "ls"} }
                ],
            },
        })
        .to_string()
    }

    /// A tool result relayed as a user message.
    #[must_use]
    pub fn user_tool_result(session_id: &str, tool_use_id: &str, content: &str) -> String {
        json!({
            "type": "user",
            "session_id": session_id,
            "message": {
                "role": "user",
                "content": [{
                    "type": "tool_result",
                    "tool_use_id": tool_use_id,
                    "content": content,
                }],
            },
        })
        .to_string()
    }

    /// A replayed user message (discarded by the driver).
    #[must_use]
    pub fn user_replay(session_id: &str, text: &str) -> String {
        json!({
            "type": "user",
            "session_id": session_id,
            "is_replay": true,
            "message": {
                "role": "user",
                "content": [{ "type": "text", "text": text }],
            },
        })
        .to_string()
    }

    /// The terminal success result.
    #[must_use]
    pub fn result_success(session_id: &str) -> String {
        json!({
            "type": "result",
            "subtype": "success",
            "session_id": session_id,
            "duration_ms": 1200,
            "total_cost_usd": 0.0123,
            "is_error": false,
            "result": "done",
            "usage": { "input_tokens": 10, "output_tokens": 20 },
        })
        .to_string()
    }

    /// A terminal error result.
    #[must_use]
    pub fn result_error(session_id: &str, subtype: &str) -> String {
        json!({
            "type": "result",
            "subtype": subtype,
            "session_id": session_id,
            "duration_ms": 900,
            "is_error": true,
        })
        .to_string()
    }
}
