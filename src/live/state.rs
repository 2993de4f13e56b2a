//! Connection lifecycle state machine
//!
//! Pure and synchronous: the session driver feeds it [`Input`]s and carries
//! out the returned [`Effect`]. Nothing here touches devices, sockets or timers.

use std::time::Duration;

use serde::Serialize;

use super::retry::{ErrorKind, RetryPolicy};

/// Connection state of the live session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    #[default]
    Offline,
    Connecting,
    Reconnecting,
    Listening,
    Speaking,
    Thinking,
    Error,
}

impl SessionState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Offline => "OFFLINE",
            Self::Connecting => "CONNECTING",
            Self::Reconnecting => "RECONNECTING",
            Self::Listening => "LISTENING",
            Self::Speaking => "SPEAKING",
            Self::Thinking => "THINKING",
            Self::Error => "ERROR",
        }
    }

    /// Whether the handshake has completed and audio flows
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Listening | Self::Speaking | Self::Thinking)
    }

    /// Whether the session has ended and holds no resources
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Offline | Self::Error)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why `start()` refused to connect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rejection {
    MissingCredential,
    Unreachable,
}

impl Rejection {
    #[must_use]
    pub const fn kind(self) -> ErrorKind {
        match self {
            Self::MissingCredential => ErrorKind::Auth,
            Self::Unreachable => ErrorKind::Transient,
        }
    }
}

/// Everything that can move the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    /// Fresh start from a terminal state
    Start,
    /// Start refused before any connection was attempted
    Reject(Rejection),
    /// Backoff elapsed; connect again
    ReconnectDue,
    /// Server acknowledged the setup frame
    HandshakeComplete,
    /// A remote audio segment was scheduled
    AudioScheduled,
    /// Every live playback segment has finished
    PlaybackDrained,
    /// The user barged in and playback was halted
    Interrupted,
    /// A tool batch started dispatching
    ToolBatchStarted,
    /// A tool batch finished; `playing` tells whether audio is still live
    ToolBatchFinished { playing: bool },
    /// Any error surfaced to the session boundary
    Failed(ErrorKind),
    /// Explicit stop by the caller
    Stop,
}

/// What the driver must do after an input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    None,
    /// Tear down, wait `delay`, then feed [`Input::ReconnectDue`]
    Reconnect { attempt: u32, delay: Duration },
    /// Tear down; the session is over
    Terminate,
}

/// Human-readable snapshot of the session for the frontend
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub headline: String,
    pub detail: String,
    pub retry_count: u32,
    pub last_error: Option<ErrorKind>,
}

impl Default for SessionStatus {
    fn default() -> Self {
        SessionMachine::new(RetryPolicy::default(), None).status()
    }
}

/// Session state, retry counter and last error
#[derive(Debug, Clone)]
pub struct SessionMachine {
    state: SessionState,
    retry_count: u32,
    last_error: Option<ErrorKind>,
    rejection: Option<Rejection>,
    policy: RetryPolicy,
    display_name: Option<String>,
}

impl SessionMachine {
    #[must_use]
    pub const fn new(policy: RetryPolicy, display_name: Option<String>) -> Self {
        Self {
            state: SessionState::Offline,
            retry_count: 0,
            last_error: None,
            rejection: None,
            policy,
            display_name,
        }
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub const fn retry_count(&self) -> u32 {
        self.retry_count
    }

    #[must_use]
    pub const fn last_error(&self) -> Option<ErrorKind> {
        self.last_error
    }

    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Name used in the listening greeting
    pub fn set_display_name(&mut self, name: Option<String>) {
        self.display_name = name;
    }

    /// Apply one input
    pub fn apply(&mut self, input: Input) -> Effect {
        use SessionState as S;

        let from = self.state;
        let effect = match (input, from) {
            (Input::Stop, _) => {
                self.state = S::Offline;
                self.retry_count = 0;
                self.last_error = None;
                self.rejection = None;
                Effect::Terminate
            }
            (Input::Start, _) => {
                self.state = S::Connecting;
                self.retry_count = 0;
                self.last_error = None;
                self.rejection = None;
                Effect::None
            }
            (Input::Reject(reason), _) => {
                self.state = S::Error;
                self.last_error = Some(reason.kind());
                self.rejection = Some(reason);
                Effect::Terminate
            }

            // Errors after the session ended are stale
            (Input::Failed(_), S::Offline | S::Error) => Effect::None,
            (Input::Failed(kind), _) => self.fail(kind),

            (Input::ReconnectDue, S::Reconnecting) => {
                self.state = S::Connecting;
                Effect::None
            }
            (Input::HandshakeComplete, S::Connecting) => {
                // Only consecutive failures count against the budget
                self.state = S::Listening;
                self.retry_count = 0;
                Effect::None
            }
            (Input::AudioScheduled, S::Listening | S::Speaking | S::Thinking) => {
                self.state = S::Speaking;
                Effect::None
            }
            (Input::PlaybackDrained | Input::Interrupted, S::Speaking) => {
                self.state = S::Listening;
                Effect::None
            }
            (Input::ToolBatchStarted, S::Listening | S::Speaking | S::Thinking) => {
                self.state = S::Thinking;
                Effect::None
            }
            (Input::ToolBatchFinished { playing }, S::Thinking) => {
                self.state = if playing { S::Speaking } else { S::Listening };
                Effect::None
            }
            _ => Effect::None,
        };

        if self.state != from {
            tracing::debug!(
                from = %from,
                to = %self.state,
                retry_count = self.retry_count,
                "session state changed"
            );
        }

        effect
    }

    fn fail(&mut self, kind: ErrorKind) -> Effect {
        self.last_error = Some(kind);
        self.rejection = None;

        if kind == ErrorKind::Transient && self.policy.can_retry(self.retry_count) {
            self.retry_count += 1;
            self.state = SessionState::Reconnecting;
            Effect::Reconnect {
                attempt: self.retry_count,
                delay: self.policy.delay_for_attempt(self.retry_count),
            }
        } else {
            self.state = SessionState::Error;
            Effect::Terminate
        }
    }

    /// Current status with display text
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        let (headline, detail) = self.texts();
        SessionStatus {
            state: self.state,
            headline,
            detail,
            retry_count: self.retry_count,
            last_error: self.last_error,
        }
    }

    fn texts(&self) -> (String, String) {
        match self.state {
            SessionState::Offline => (
                "Offline".to_string(),
                "Start a session to talk to FocusUp".to_string(),
            ),
            SessionState::Connecting => (
                "Synchronizing...".to_string(),
                "Connecting to the assistant".to_string(),
            ),
            SessionState::Reconnecting => (
                "Reconnecting...".to_string(),
                format!(
                    "Connection lost, attempt {} of {}",
                    self.retry_count, self.policy.max_retries
                ),
            ),
            SessionState::Listening => (
                "Listening...".to_string(),
                format!(
                    "Hi {}, go ahead and speak",
                    self.display_name.as_deref().unwrap_or("there")
                ),
            ),
            SessionState::Speaking => ("FocusUp Assistant".to_string(), String::new()),
            SessionState::Thinking => (
                "Analyzing...".to_string(),
                "Updating your tasks".to_string(),
            ),
            SessionState::Error => self.error_texts(),
        }
    }

    fn error_texts(&self) -> (String, String) {
        let (headline, detail) = match (self.rejection, self.last_error) {
            (Some(Rejection::MissingCredential), _) => (
                "API Key Required",
                "No API key is configured. Run `focusup setup` to add one.",
            ),
            (Some(Rejection::Unreachable), _) => (
                "No Connection",
                "The network is unreachable. Check your connection and try again.",
            ),
            (None, Some(ErrorKind::Auth)) => (
                "API Key Error",
                "The API key was rejected. Check your configuration.",
            ),
            (None, Some(ErrorKind::Transient)) => (
                "Connection Failed",
                "Persistent network problem. Start again to retry.",
            ),
            (None, Some(ErrorKind::DeviceAccess)) => (
                "Startup Error",
                "Could not access the microphone or speaker.",
            ),
            (None, Some(ErrorKind::Unclassified) | None) => {
                ("Connection Failed", "A system error occurred.")
            }
        };
        (headline.to_string(), detail.to_string())
    }
}
