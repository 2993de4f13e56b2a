//! Live session manager
//!
//! One driver task per session owns the link, the microphone and the
//! playback scheduler. Capture frames, playback completions and link events
//! all arrive on channels consumed by a single `select!` loop, so only the
//! driver ever mutates session state. A [`CancellationToken`] is the closing
//! flag: once it fires, no further sends, transitions or reconnects happen.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::Local;
use secrecy::SecretString;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::prompt::{PromptContext, system_instruction};
use super::protocol::{
    ClientMessage, MediaChunk, RealtimeInput, ServerMessage, SessionSetup, ToolResponse,
};
use super::reachability::Reachability;
use super::retry::{RetryPolicy, classify};
use super::state::{Effect, Input, Rejection, SessionMachine, SessionStatus};
use super::transport::{Connector, LinkEvent, LiveLink};
use crate::config::{CredentialProvider, DEFAULT_LANGUAGE, DEFAULT_MODEL, DEFAULT_VOICE};
use crate::tools::{ToolDispatcher, function_declarations};
use crate::voice::codec::decode_to_buffer;
use crate::voice::{AudioDevices, InputStream, PlaybackScheduler, SegmentId};
use crate::{Error, Result};

/// Capture frames buffered between the device thread and the driver
const FRAME_QUEUE: usize = 8;

const EVENT_CAPACITY: usize = 128;

/// Session parameters that don't come from collaborators
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub model: String,
    pub voice: String,
    pub language: String,
    pub retry: RetryPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            language: DEFAULT_LANGUAGE.to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

/// External services the session depends on
#[derive(Clone)]
pub struct Collaborators {
    pub credentials: Arc<dyn CredentialProvider>,
    pub connector: Arc<dyn Connector>,
    pub devices: Arc<dyn AudioDevices>,
    pub reachability: Arc<dyn Reachability>,
}

/// Published to frontends
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Status(SessionStatus),
    /// Running transcript of the current model turn; empty when a turn completes
    Transcript(String),
    /// A tool invocation changed the task store
    TasksChanged,
}

struct Shared {
    config: SessionConfig,
    collaborators: Collaborators,
    dispatcher: ToolDispatcher,
    machine: Mutex<SessionMachine>,
    status_tx: watch::Sender<SessionStatus>,
    events_tx: broadcast::Sender<SessionEvent>,
}

impl Shared {
    fn machine(&self) -> std::sync::MutexGuard<'_, SessionMachine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `input` and publish the status if it changed
    fn transition(&self, input: Input) -> Effect {
        self.transition_unless(None, input).unwrap_or(Effect::None)
    }

    /// Like [`Self::transition`], but a no-op once `cancel` has fired
    fn transition_unless(&self, cancel: Option<&CancellationToken>, input: Input) -> Option<Effect> {
        let (effect, status) = {
            let mut machine = self.machine();
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                return None;
            }
            let before = machine.status();
            let effect = machine.apply(input);
            let after = machine.status();
            (effect, (after != before).then_some(after))
        };

        if let Some(status) = status {
            self.status_tx.send_replace(status.clone());
            let _ = self.events_tx.send(SessionEvent::Status(status));
        }
        Some(effect)
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events_tx.send(event);
    }
}

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the lifecycle of the live voice session
///
/// `start()` spawns a driver task; `stop()` cancels it, waits for its
/// teardown and resets to `Offline`. Both are safe to call from any state.
pub struct SessionManager {
    shared: Arc<Shared>,
    worker: tokio::sync::Mutex<Option<Worker>>,
}

impl SessionManager {
    #[must_use]
    pub fn new(
        config: SessionConfig,
        dispatcher: ToolDispatcher,
        collaborators: Collaborators,
    ) -> Self {
        let machine = SessionMachine::new(
            config.retry,
            collaborators.credentials.display_name(),
        );
        let (status_tx, _) = watch::channel(machine.status());
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            shared: Arc::new(Shared {
                config,
                collaborators,
                dispatcher,
                machine: Mutex::new(machine),
                status_tx,
                events_tx,
            }),
            worker: tokio::sync::Mutex::new(None),
        }
    }

    /// Start a fresh session
    ///
    /// Rejected with an immediate `Error` state, and without connecting, if no
    /// credential is configured or the network is unreachable. Calling it
    /// while a session is already running does nothing.
    ///
    /// # Errors
    ///
    /// Returns error if the start was rejected
    pub async fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock().await;

        if let Some(w) = worker.as_ref() {
            // A driver that reached Error is already on its way out
            if !w.handle.is_finished() && !self.shared.machine().state().is_terminal() {
                tracing::debug!("session already running");
                return Ok(());
            }
        }
        // Reap a driver that ended on its own
        if let Some(w) = worker.take() {
            join_driver(w.handle).await;
        }

        let shared = &self.shared;
        shared
            .machine()
            .set_display_name(shared.collaborators.credentials.display_name());

        let Some(credential) = shared.collaborators.credentials.credential() else {
            tracing::warn!("session start rejected: no API key configured");
            shared.transition(Input::Reject(Rejection::MissingCredential));
            return Err(Error::Auth("no API key configured".to_string()));
        };

        if !shared.collaborators.reachability.is_reachable().await {
            tracing::warn!("session start rejected: network unreachable");
            shared.transition(Input::Reject(Rejection::Unreachable));
            return Err(Error::Network("network unreachable".to_string()));
        }

        shared.transition(Input::Start);
        tracing::info!(model = %shared.config.model, "session starting");

        let cancel = CancellationToken::new();
        let driver = Driver {
            shared: Arc::clone(shared),
            credential,
            cancel: cancel.clone(),
            transcript: String::new(),
        };
        let handle = tokio::spawn(driver.run());

        *worker = Some(Worker { cancel, handle });
        Ok(())
    }

    /// Stop the session and release every resource
    ///
    /// Cancels any pending reconnect, waits for teardown to finish, then
    /// resets to `Offline` with a zero retry count. Idempotent.
    pub async fn stop(&self) {
        let mut worker = self.worker.lock().await;

        if let Some(w) = worker.take() {
            w.cancel.cancel();
            join_driver(w.handle).await;
        }

        self.shared.transition(Input::Stop);
        self.shared.emit(SessionEvent::Transcript(String::new()));
        tracing::info!("session stopped");
    }

    /// Current status
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.shared.status_tx.borrow().clone()
    }

    /// Watch the current status
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.shared.status_tx.subscribe()
    }

    /// Subscribe to status, transcript and task events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events_tx.subscribe()
    }

    #[must_use]
    pub fn dispatcher(&self) -> &ToolDispatcher {
        &self.shared.dispatcher
    }

    /// Whether a driver task is alive (connecting, connected or backing off)
    pub async fn is_running(&self) -> bool {
        self.worker
            .lock()
            .await
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Ok(worker) = self.worker.try_lock() {
            if let Some(w) = worker.as_ref() {
                w.cancel.cancel();
            }
        }
    }
}

async fn join_driver(handle: JoinHandle<()>) {
    if let Err(e) = handle.await {
        if e.is_panic() {
            tracing::error!("session driver panicked");
        }
    }
}

/// How one connection attempt ended
enum Attempt {
    Cancelled,
    Failed(Error),
}

/// Resources held for one connection
struct Connection {
    input: Box<dyn InputStream>,
    frames: mpsc::Receiver<Vec<f32>>,
    scheduler: PlaybackScheduler,
    ended: mpsc::UnboundedReceiver<SegmentId>,
    link: LiveLink,
}

impl Connection {
    fn release(mut self) {
        self.input.close();
        self.scheduler.shutdown();
        drop(self.link);
        tracing::debug!("session resources released");
    }
}

struct Driver {
    shared: Arc<Shared>,
    credential: SecretString,
    cancel: CancellationToken,
    transcript: String,
}

impl Driver {
    async fn run(mut self) {
        loop {
            let Attempt::Failed(err) = self.attempt().await else {
                return;
            };

            let kind = classify(&err);
            let Some(effect) = self.apply(Input::Failed(kind)) else {
                tracing::debug!(error = %err, "error after stop discarded");
                return;
            };
            tracing::warn!(error = %err, kind = %kind, "live session error");

            match effect {
                Effect::Reconnect { attempt, delay } => {
                    tracing::info!(
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "reconnect scheduled"
                    );
                    tokio::select! {
                        () = self.cancel.cancelled() => return,
                        () = tokio::time::sleep(delay) => {}
                    }
                    if self.apply(Input::ReconnectDue).is_none() {
                        return;
                    }
                }
                Effect::Terminate | Effect::None => {
                    tracing::error!(kind = %kind, "session ended");
                    return;
                }
            }
        }
    }

    fn apply(&self, input: Input) -> Option<Effect> {
        self.shared.transition_unless(Some(&self.cancel), input)
    }

    /// Open devices, connect and serve until the link fails or stop is requested
    ///
    /// Every resource is released before this returns.
    async fn attempt(&mut self) -> Attempt {
        let mut conn = match self.open().await {
            Ok(Some(conn)) => conn,
            Ok(None) => return Attempt::Cancelled,
            Err(e) => return Attempt::Failed(e),
        };

        // Frames captured while connecting are stale
        while conn.frames.try_recv().is_ok() {}
        self.transcript.clear();

        if self.apply(Input::HandshakeComplete).is_none() {
            conn.release();
            return Attempt::Cancelled;
        }

        let outcome = self.serve(&mut conn).await;
        conn.release();
        outcome
    }

    async fn open(&self) -> Result<Option<Connection>> {
        let devices = Arc::clone(&self.shared.collaborators.devices);
        let (frames_tx, frames) = mpsc::channel(FRAME_QUEUE);
        let (ended_tx, ended) = mpsc::unbounded_channel();

        // Device threads block until the stream is ready
        let (mut input, output) = tokio::task::spawn_blocking(move || {
            let mut input = devices.open_input(frames_tx)?;
            match devices.open_output(ended_tx) {
                Ok(output) => Ok((input, output)),
                Err(e) => {
                    input.close();
                    Err(e)
                }
            }
        })
        .await
        .map_err(|e| Error::Session(format!("device open task failed: {e}")))??;

        let scheduler = PlaybackScheduler::new(output);
        let setup = self.setup();

        let connected = tokio::select! {
            () = self.cancel.cancelled() => None,
            result = self.shared.collaborators.connector.connect(setup, &self.credential) => Some(result),
        };

        match connected {
            Some(Ok(link)) => Ok(Some(Connection {
                input,
                frames,
                scheduler,
                ended,
                link,
            })),
            other => {
                input.close();
                drop(scheduler);
                match other {
                    Some(Err(e)) => Err(e),
                    _ => Ok(None),
                }
            }
        }
    }

    fn setup(&self) -> SessionSetup {
        let config = &self.shared.config;
        let display_name = self.shared.collaborators.credentials.display_name();
        let instruction = system_instruction(&PromptContext {
            today: Local::now().date_naive(),
            display_name: display_name.as_deref(),
            language: &config.language,
        });
        SessionSetup::new(
            config.model.clone(),
            config.voice.clone(),
            instruction,
            function_declarations(),
        )
    }

    async fn serve(&mut self, conn: &mut Connection) -> Attempt {
        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => return Attempt::Cancelled,

                event = conn.link.inbound.recv() => {
                    let result = match event {
                        Some(LinkEvent::Message(msg)) => self.handle_message(&msg, conn).await,
                        Some(LinkEvent::Error(e)) => Err(e),
                        Some(LinkEvent::Closed { code, reason }) => {
                            tracing::debug!(code, %reason, "live link closed");
                            Err(Error::Network(format!("connection closed ({code}): {reason}")))
                        }
                        None => Err(Error::Network("live link dropped".to_string())),
                    };
                    if let Err(e) = result {
                        return Attempt::Failed(e);
                    }
                }

                Some(id) = conn.ended.recv() => {
                    if conn.scheduler.complete(id) {
                        self.apply(Input::PlaybackDrained);
                    }
                }

                Some(frame) = conn.frames.recv() => self.forward_frame(&frame, &conn.link),
            }
        }
    }

    /// Send one capture frame, dropping it if the link can't take it now
    fn forward_frame(&self, frame: &[f32], link: &LiveLink) {
        if self.cancel.is_cancelled() {
            return;
        }
        let message = ClientMessage::RealtimeInput(RealtimeInput::audio(MediaChunk::from_samples(frame)));
        if let Err(e) = link.outbound.try_send(message) {
            tracing::trace!(error = %e, "capture frame dropped");
        }
    }

    async fn handle_message(&mut self, msg: &ServerMessage, conn: &mut Connection) -> Result<()> {
        if let Some(text) = msg.transcript_text() {
            self.transcript.push_str(text);
            self.shared
                .emit(SessionEvent::Transcript(self.transcript.clone()));
        }
        if msg.turn_complete() && !self.transcript.is_empty() {
            self.transcript.clear();
            self.shared.emit(SessionEvent::Transcript(String::new()));
        }

        if msg.interrupted() {
            tracing::debug!(live = conn.scheduler.live_count(), "playback interrupted");
            conn.scheduler.halt_all();
            self.apply(Input::Interrupted);
        }

        for payload in msg.audio_payloads() {
            let buffer = decode_to_buffer(payload, conn.scheduler.output_rate())?;
            if conn.scheduler.schedule(buffer)?.is_some() {
                self.apply(Input::AudioScheduled);
            }
        }

        let calls = msg.function_calls();
        if !calls.is_empty() {
            tracing::debug!(count = calls.len(), "tool batch received");
            self.apply(Input::ToolBatchStarted);

            for call in calls {
                if self.cancel.is_cancelled() {
                    return Ok(());
                }
                let outcome = self.shared.dispatcher.dispatch(call);
                if outcome.mutated {
                    self.shared.emit(SessionEvent::TasksChanged);
                }
                let response = ClientMessage::ToolResponse(ToolResponse {
                    function_responses: vec![outcome.response],
                });
                // Cancellation wins over a full outbound queue
                tokio::select! {
                    () = self.cancel.cancelled() => return Ok(()),
                    sent = conn.link.outbound.send(response) => {
                        sent.map_err(|_| {
                            Error::Network("live link closed while sending tool response".to_string())
                        })?;
                    }
                }
            }

            self.apply(Input::ToolBatchFinished {
                playing: !conn.scheduler.is_idle(),
            });
        }

        Ok(())
    }
}
