//! Real-time voice session with the Live API
//!
//! - `protocol`: wire frames
//! - `state`: connection lifecycle state machine
//! - `retry`: backoff policy and error classification
//! - `transport`: WebSocket link
//! - `session`: the driver tying devices, link and tools together

pub mod protocol;
mod prompt;
mod reachability;
mod retry;
mod session;
mod state;
mod transport;

pub use prompt::{PromptContext, system_instruction};
pub use reachability::{AssumeOnline, DEFAULT_PROBE_HOST, HostProbe, Reachability};
pub use retry::{ErrorKind, RetryPolicy, classify, classify_message};
pub use session::{Collaborators, SessionConfig, SessionEvent, SessionManager};
pub use state::{Effect, Input, Rejection, SessionMachine, SessionState, SessionStatus};
pub use transport::{Connector, DEFAULT_ENDPOINT, LinkEvent, LiveLink, WebSocketConnector};
