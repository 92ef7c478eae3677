//! The agent driver: one supervisor task per prompt.
//!
//! Owns the subprocess for exactly one prompt: spawn, feed the prompt,
//! classify frames into [`AgentEvent`]s, enforce the idle timeout, and
//! tear everything down on every exit path.

use crate::error::AgentResult;
use crate::event::{AgentEvent, CompletedBlock, CompletedRole, EndReason, ResultSummary};
use crate::invocation::validate_cwd;
use crate::spawn::{AgentProcess, ProcessSpawner, SpawnSpec, TermSignal};
use crate::wire::{ContentBlock, SdkMessage, StreamDelta, StreamEventPayload, SystemPayload};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Driver configuration.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// End the stream after this much inactivity (armed after
    /// [`Self::idle_arm_after`] messages).
    pub idle_timeout: Duration,
    /// Number of messages after which the idle timeout arms.
    pub idle_arm_after: u64,
    /// How long to wait between the graceful signal and SIGKILL.
    pub grace_period: Duration,
    /// Signal sent first at cancellation.
    pub term_signal: TermSignal,
    /// Emit [`AgentEvent::Partial`] for text deltas.
    pub stream_partials: bool,
    /// Event channel capacity (backpressures the supervisor).
    pub event_buffer: usize,
    /// How old a stored agent handle may be and still be resumed.
    pub resume_staleness: chrono::Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30),
            idle_arm_after: 5,
            grace_period: Duration::from_secs(5),
            term_signal: TermSignal::Term,
            stream_partials: true,
            event_buffer: 256,
            resume_staleness: chrono::Duration::hours(24),
        }
    }
}

/// Drives agent subprocesses.
pub struct AgentDriver {
    spawner: Arc<dyn ProcessSpawner>,
    config: DriverConfig,
}

/// A live prompt: the event stream plus the stdin path back to the
/// agent (permission responses travel through it).
pub struct PromptHandle {
    events: mpsc::Receiver<AgentEvent>,
    frames_tx: mpsc::Sender<String>,
    stderr: Arc<Mutex<Vec<String>>>,
}

impl PromptHandle {
    /// The next event, or `None` when the stream is over and drained.
    pub async fn next_event(&mut self) -> Option<AgentEvent> {
        self.events.recv().await
    }

    /// Write a frame to the agent's stdin. Returns `false` once the
    /// supervisor is gone.
    pub async fn send_frame(&self, frame: String) -> bool {
        self.frames_tx.send(frame).await.is_ok()
    }

    /// Snapshot of the subprocess's stderr ring buffer.
    ///
    /// # Panics
    ///
    /// Panics if the mirror lock is poisoned.
    #[must_use]
    pub fn stderr(&self) -> Vec<String> {
        self.stderr.lock().expect("stderr mirror lock").clone()
    }
}

impl std::fmt::Debug for PromptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptHandle").finish_non_exhaustive()
    }
}

impl AgentDriver {
    /// Create a driver.
    #[must_use]
    pub fn new(spawner: Arc<dyn ProcessSpawner>, config: DriverConfig) -> Self {
        Self { spawner, config }
    }

    /// The driver's configuration.
    #[must_use]
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Spawn the agent and start the supervisor for one prompt.
    ///
    /// `known_handle` is the stored `sdk_session_id`, used to decide
    /// whether an observed handle is new.
    ///
    /// # Errors
    ///
    /// Fails when the working directory is unusable or the process
    /// cannot spawn. Everything after a successful spawn is reported
    /// through the event stream.
    pub async fn run(
        &self,
        spec: SpawnSpec,
        prompt_frame: Option<String>,
        known_handle: Option<String>,
        cancel: CancellationToken,
    ) -> AgentResult<PromptHandle> {
        validate_cwd(&spec.cwd)?;

        let mut process = self.spawner.spawn(spec).await?;
        if let Some(frame) = prompt_frame {
            process.send(&frame).await?;
        }

        let (events_tx, events_rx) = mpsc::channel(self.config.event_buffer);
        let (frames_tx, frames_rx) = mpsc::channel(16);
        let stderr_mirror = Arc::new(Mutex::new(Vec::new()));

        let supervisor = Supervisor {
            config: self.config.clone(),
            events: events_tx,
            frames: frames_rx,
            stderr_mirror: Arc::clone(&stderr_mirror),
            state: StreamState {
                known_handle,
                open_tools: BTreeMap::new(),
                message_count: 0,
            },
        };
        tokio::spawn(supervisor.run(process, cancel));

        Ok(PromptHandle {
            events: events_rx,
            frames_tx,
            stderr: stderr_mirror,
        })
    }
}

impl std::fmt::Debug for AgentDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentDriver")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

struct StreamState {
    known_handle: Option<String>,
    /// Open tool-use blocks by stream index.
    open_tools: BTreeMap<u64, Option<String>>,
    message_count: u64,
}

struct Supervisor {
    config: DriverConfig,
    events: mpsc::Sender<AgentEvent>,
    frames: mpsc::Receiver<String>,
    stderr_mirror: Arc<Mutex<Vec<String>>>,
    state: StreamState,
}

impl Supervisor {
    async fn run(mut self, mut process: Box<dyn AgentProcess>, cancel: CancellationToken) {
        loop {
            let idle_armed = self.state.message_count >= self.config.idle_arm_after;

            let step = tokio::select! {
                biased;
                () = cancel.cancelled() => Step::Cancelled,
                Some(frame) = self.frames.recv() => Step::Outbound(frame),
                frame = process.next_frame() => Step::Inbound(frame),
                () = tokio::time::sleep(self.config.idle_timeout), if idle_armed => Step::IdleTimeout,
            };

            match step {
                Step::Cancelled => {
                    self.shutdown(&mut *process).await;
                    self.mirror_stderr(&*process);
                    self.emit(AgentEvent::End {
                        reason: EndReason::StopRequested,
                    })
                    .await;
                    return;
                },
                Step::IdleTimeout => {
                    let _ = process.signal(TermSignal::Kill).await;
                    let _ = process.wait().await;
                    self.mirror_stderr(&*process);
                    self.emit(AgentEvent::End {
                        reason: EndReason::Timeout,
                    })
                    .await;
                    return;
                },
                Step::Outbound(frame) => {
                    if let Err(e) = process.send(&frame).await {
                        warn!(error = %e, "failed to write frame to agent stdin");
                    }
                },
                Step::Inbound(Err(e)) => {
                    self.mirror_stderr(&*process);
                    self.emit(AgentEvent::End {
                        reason: EndReason::AgentExit {
                            exitcode: -1,
                            stderr: e.to_string(),
                        },
                    })
                    .await;
                    return;
                },
                Step::Inbound(Ok(None)) => {
                    let exitcode = process.wait().await.ok().flatten().unwrap_or(-1);
                    self.mirror_stderr(&*process);
                    let stderr = process.stderr().join("\n");
                    self.emit(AgentEvent::End {
                        reason: EndReason::AgentExit { exitcode, stderr },
                    })
                    .await;
                    return;
                },
                Step::Inbound(Ok(Some(line))) => {
                    self.state.message_count = self.state.message_count.saturating_add(1);
                    if self.ingest(&line).await {
                        // Result observed; reap and end.
                        let _ = process.wait().await;
                        self.mirror_stderr(&*process);
                        self.emit(AgentEvent::End {
                            reason: EndReason::Result,
                        })
                        .await;
                        return;
                    }
                },
            }
        }
    }

    /// Parse and classify one frame. Returns `true` when the terminal
    /// result was observed.
    async fn ingest(&mut self, line: &str) -> bool {
        let message: SdkMessage = match serde_json::from_str(line) {
            Ok(message) => message,
            Err(e) => {
                // Tolerate unparseable frames; the protocol evolves.
                warn!(error = %e, frame = %truncate(line, 200), "unparseable agent frame");
                return false;
            },
        };

        if let Some(handle) = message.session_id()
            && self.state.known_handle.as_deref() != Some(handle)
        {
            self.state.known_handle = Some(handle.to_string());
            self.emit(AgentEvent::SessionIdCaptured {
                handle: handle.to_string(),
            })
            .await;
        }

        match message {
            SdkMessage::System(system) => {
                if let SystemPayload::CompactBoundary { .. } = system.payload {
                    debug!("agent compacted its context");
                }
                false
            },
            SdkMessage::Assistant(assistant) => {
                let blocks: Vec<CompletedBlock> = assistant
                    .message
                    .content
                    .iter()
                    .filter_map(CompletedBlock::from_assistant)
                    .collect();
                self.emit(AgentEvent::Complete {
                    role: CompletedRole::Assistant,
                    blocks,
                })
                .await;
                false
            },
            SdkMessage::User(user) => {
                if user.is_replay == Some(true) {
                    // Replays carry no new information.
                    return false;
                }
                let blocks: Vec<CompletedBlock> = user
                    .message
                    .content
                    .iter()
                    .filter_map(CompletedBlock::from_user)
                    .collect();
                if !blocks.is_empty() {
                    self.emit(AgentEvent::Complete {
                        role: CompletedRole::User,
                        blocks,
                    })
                    .await;
                }
                false
            },
            SdkMessage::Result(result) => {
                self.emit(AgentEvent::Result(ResultSummary {
                    subtype: result.subtype,
                    duration_ms: result.duration_ms,
                    cost_usd: result.total_cost_usd,
                    usage: result.usage,
                    is_error: result.is_error.unwrap_or(false),
                }))
                .await;
                true
            },
            SdkMessage::StreamEvent(stream) => {
                self.ingest_stream_event(stream.event).await;
                false
            },
            SdkMessage::Unknown => false,
        }
    }

    async fn ingest_stream_event(&mut self, event: StreamEventPayload) {
        match event {
            StreamEventPayload::MessageStart {} => {
                self.emit(AgentEvent::MessageStart).await;
            },
            StreamEventPayload::ContentBlockStart {
                index,
                content_block,
            } => {
                if let ContentBlock::ToolUse { id, name, input } = content_block {
                    self.state.open_tools.insert(index, Some(id.clone()));
                    self.emit(AgentEvent::ToolStart {
                        name,
                        tool_use_id: Some(id),
                        input,
                    })
                    .await;
                }
            },
            StreamEventPayload::ContentBlockDelta { delta, .. } => {
                if self.config.stream_partials
                    && let StreamDelta::TextDelta { text } = delta
                {
                    self.emit(AgentEvent::Partial { text }).await;
                }
            },
            StreamEventPayload::ContentBlockStop { index } => {
                if let Some(tool_use_id) = self.state.open_tools.remove(&index) {
                    self.emit(AgentEvent::ToolComplete { tool_use_id }).await;
                }
            },
            StreamEventPayload::MessageStop {} => {
                self.state.open_tools.clear();
                self.emit(AgentEvent::MessageComplete).await;
            },
            StreamEventPayload::MessageDelta {} | StreamEventPayload::Unknown => {},
        }
    }

    async fn shutdown(&self, process: &mut dyn AgentProcess) {
        let _ = process.signal(self.config.term_signal).await;
        let reaped = tokio::time::timeout(self.config.grace_period, process.wait()).await;
        if reaped.is_err() {
            let _ = process.signal(TermSignal::Kill).await;
            let _ = process.wait().await;
        }
    }

    fn mirror_stderr(&self, process: &dyn AgentProcess) {
        let mut mirror = self.stderr_mirror.lock().expect("stderr mirror lock");
        *mirror = process.stderr();
    }

    async fn emit(&self, event: AgentEvent) {
        if self.events.send(event).await.is_err() {
            debug!("event receiver dropped; supervisor continues to drain the process");
        }
    }
}

enum Step {
    Cancelled,
    IdleTimeout,
    Outbound(String),
    Inbound(AgentResult<Option<String>>),
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
