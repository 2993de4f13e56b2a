//! Shared test utilities: in-process fakes for every session collaborator

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::Value;
use tokio::sync::mpsc;

use focusup::live::protocol::{ClientMessage, ServerMessage, SessionSetup};
use focusup::live::{
    AssumeOnline, Collaborators, Connector, LinkEvent, LiveLink, Reachability, RetryPolicy,
    SessionConfig, SessionManager, SessionStatus,
};
use focusup::voice::{AudioDevices, InputStream, OutputStream, PcmBuffer, SegmentId};
use focusup::{CredentialProvider, Error, Result, TaskStore, ToolDispatcher};

/// Fast backoff so reconnect tests finish in milliseconds
#[must_use]
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        unit: Duration::from_millis(5),
    }
}

// -- credentials ---

pub struct StaticCredentials {
    pub key: Option<String>,
    pub name: Option<String>,
}

impl StaticCredentials {
    #[must_use]
    pub fn with_key() -> Self {
        Self {
            key: Some("test-key".to_string()),
            name: Some("Ada".to_string()),
        }
    }

    #[must_use]
    pub const fn without_key() -> Self {
        Self {
            key: None,
            name: None,
        }
    }
}

impl CredentialProvider for StaticCredentials {
    fn credential(&self) -> Option<SecretString> {
        self.key.clone().map(SecretString::from)
    }

    fn display_name(&self) -> Option<String> {
        self.name.clone()
    }
}

pub struct Offline;

#[async_trait]
impl Reachability for Offline {
    async fn is_reachable(&self) -> bool {
        false
    }
}

// -- connector ---

/// What the next `connect()` call does
pub enum Script {
    Accept,
    Fail(Error),
}

/// The remote end of an accepted link, handed to the test
pub struct FakeRemote {
    pub to_session: mpsc::Sender<LinkEvent>,
    pub from_session: mpsc::Receiver<ClientMessage>,
}

impl FakeRemote {
    /// Deliver a server frame given as JSON
    pub async fn send_json(&self, json: &str) {
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        self.to_session
            .send(LinkEvent::Message(Box::new(msg)))
            .await
            .unwrap();
    }

    /// Next non-audio frame sent by the session, serialized
    pub async fn next_non_audio(&mut self) -> Value {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(2), self.from_session.recv())
                .await
                .expect("timed out waiting for client frame")
                .expect("link closed");
            if !matches!(msg, ClientMessage::RealtimeInput(_)) {
                return serde_json::to_value(&msg).unwrap();
            }
        }
    }

    /// Close the link the way a dropped connection would
    pub async fn close(&self, code: u16, reason: &str) {
        let _ = self
            .to_session
            .send(LinkEvent::Closed {
                code,
                reason: reason.to_string(),
            })
            .await;
    }
}

/// Connector that follows a script; unscripted calls fail with a network error
pub struct FakeConnector {
    script: Mutex<VecDeque<Script>>,
    remotes: mpsc::UnboundedSender<FakeRemote>,
    pub setups: Mutex<Vec<SessionSetup>>,
    pub calls: Mutex<usize>,
}

impl FakeConnector {
    #[must_use]
    pub fn new(script: Vec<Script>) -> (Arc<Self>, mpsc::UnboundedReceiver<FakeRemote>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            script: Mutex::new(script.into()),
            remotes: tx,
            setups: Mutex::new(Vec::new()),
            calls: Mutex::new(0),
        });
        (connector, rx)
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, setup: SessionSetup, _credential: &SecretString) -> Result<LiveLink> {
        *self.calls.lock().unwrap() += 1;
        self.setups.lock().unwrap().push(setup);

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Script::Accept) => {
                let (out_tx, out_rx) = mpsc::channel(64);
                let (in_tx, in_rx) = mpsc::channel(64);
                let _ = self.remotes.send(FakeRemote {
                    to_session: in_tx,
                    from_session: out_rx,
                });
                Ok(LiveLink::new(out_tx, in_rx))
            }
            Some(Script::Fail(e)) => Err(e),
            None => Err(Error::Network("connection refused".to_string())),
        }
    }
}

// -- devices ---

#[derive(Default)]
pub struct DeviceLog {
    pub inputs_opened: usize,
    pub inputs_closed: usize,
    pub outputs_opened: usize,
    pub outputs_closed: usize,
    pub started: Vec<(SegmentId, f64, f64)>,
    pub halted: Vec<SegmentId>,
    pub now: f64,
    pub frames: Option<mpsc::Sender<Vec<f32>>>,
    pub ended: Option<mpsc::UnboundedSender<SegmentId>>,
}

/// Devices that record what the session does with them
#[derive(Default)]
pub struct FakeDevices {
    pub log: Arc<Mutex<DeviceLog>>,
    pub deny_microphone: bool,
}

impl FakeDevices {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[must_use]
    pub fn denying_microphone() -> Arc<Self> {
        Arc::new(Self {
            deny_microphone: true,
            ..Self::default()
        })
    }

    /// Whether every opened stream has been closed
    #[must_use]
    pub fn all_released(&self) -> bool {
        let log = self.log.lock().unwrap();
        log.inputs_opened == log.inputs_closed && log.outputs_opened == log.outputs_closed
    }

    #[must_use]
    pub fn started(&self) -> Vec<(SegmentId, f64, f64)> {
        self.log.lock().unwrap().started.clone()
    }

    /// Report that a segment finished playing
    pub fn finish(&self, id: SegmentId) {
        let ended = self.log.lock().unwrap().ended.clone();
        if let Some(tx) = ended {
            let _ = tx.send(id);
        }
    }

    /// Push a capture frame as the microphone would
    pub fn capture(&self, frame: Vec<f32>) {
        let frames = self.log.lock().unwrap().frames.clone();
        if let Some(tx) = frames {
            let _ = tx.try_send(frame);
        }
    }
}

struct FakeInput(Arc<Mutex<DeviceLog>>, bool);

impl InputStream for FakeInput {
    fn close(&mut self) {
        if !self.1 {
            self.1 = true;
            let mut log = self.0.lock().unwrap();
            log.inputs_closed += 1;
            log.frames = None;
        }
    }
}

struct FakeOutput(Arc<Mutex<DeviceLog>>, bool);

impl OutputStream for FakeOutput {
    fn sample_rate(&self) -> u32 {
        24_000
    }

    fn current_time(&self) -> f64 {
        self.0.lock().unwrap().now
    }

    fn start_segment(&mut self, id: SegmentId, buffer: PcmBuffer, start_time: f64) -> Result<()> {
        self.0
            .lock()
            .unwrap()
            .started
            .push((id, start_time, buffer.duration()));
        Ok(())
    }

    fn halt(&mut self, id: SegmentId) -> Result<()> {
        self.0.lock().unwrap().halted.push(id);
        Ok(())
    }

    fn close(&mut self) {
        if !self.1 {
            self.1 = true;
            let mut log = self.0.lock().unwrap();
            log.outputs_closed += 1;
            log.ended = None;
        }
    }
}

impl AudioDevices for FakeDevices {
    fn open_input(&self, frames: mpsc::Sender<Vec<f32>>) -> Result<Box<dyn InputStream>> {
        if self.deny_microphone {
            return Err(Error::DeviceAccess("microphone permission denied".to_string()));
        }
        let mut log = self.log.lock().unwrap();
        log.inputs_opened += 1;
        log.frames = Some(frames);
        Ok(Box::new(FakeInput(Arc::clone(&self.log), false)))
    }

    fn open_output(
        &self,
        ended: mpsc::UnboundedSender<SegmentId>,
    ) -> Result<Box<dyn OutputStream>> {
        let mut log = self.log.lock().unwrap();
        log.outputs_opened += 1;
        log.ended = Some(ended);
        Ok(Box::new(FakeOutput(Arc::clone(&self.log), false)))
    }
}

// -- harness ---

pub struct Harness {
    pub manager: SessionManager,
    pub connector: Arc<FakeConnector>,
    pub remotes: mpsc::UnboundedReceiver<FakeRemote>,
    pub devices: Arc<FakeDevices>,
    pub store: TaskStore,
}

impl Harness {
    #[must_use]
    pub fn new(script: Vec<Script>) -> Self {
        Self::build(
            script,
            StaticCredentials::with_key(),
            FakeDevices::new(),
            Arc::new(AssumeOnline),
            fast_retry(),
        )
    }

    #[must_use]
    pub fn build(
        script: Vec<Script>,
        credentials: StaticCredentials,
        devices: Arc<FakeDevices>,
        reachability: Arc<dyn Reachability>,
        retry: RetryPolicy,
    ) -> Self {
        let (connector, remotes) = FakeConnector::new(script);
        let store = TaskStore::in_memory();
        let config = SessionConfig {
            retry,
            ..SessionConfig::default()
        };
        let manager = SessionManager::new(
            config,
            ToolDispatcher::new(store.clone()),
            Collaborators {
                credentials: Arc::new(credentials),
                connector: Arc::clone(&connector) as Arc<dyn Connector>,
                devices: Arc::clone(&devices) as Arc<dyn AudioDevices>,
                reachability,
            },
        );
        Self {
            manager,
            connector,
            remotes,
            devices,
            store,
        }
    }

    /// Next accepted link
    pub async fn remote(&mut self) -> FakeRemote {
        tokio::time::timeout(Duration::from_secs(2), self.remotes.recv())
            .await
            .expect("timed out waiting for connect")
            .expect("connector dropped")
    }

    /// Wait until the status satisfies `pred`
    pub async fn wait_for(&self, pred: impl Fn(&SessionStatus) -> bool) -> SessionStatus {
        let mut rx = self.manager.watch_status();
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let status = rx.borrow_and_update().clone();
                if pred(&status) {
                    return status;
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .expect("timed out waiting for status")
    }
}

/// A server frame carrying `samples` of 24 kHz audio as base64 PCM
#[must_use]
pub fn audio_frame(samples: usize) -> String {
    use focusup::voice::codec::encode_frame;
    let data = encode_frame(&vec![0.1; samples]);
    format!(
        r#"{{"serverContent":{{"modelTurn":{{"parts":[{{"inlineData":{{"mimeType":"audio/pcm;rate=24000","data":"{data}"}}}}]}}}}}}"#
    )
}
