//! Reconnection backoff and error classification

use std::time::Duration;

use serde::Serialize;
use tokio_tungstenite::tungstenite;

use crate::Error;

/// Reconnection policy for the live session
///
/// Pure exponential backoff without jitter: the delay before reconnect
/// attempt `n` (1-based) is `unit * 2^n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of consecutive reconnect attempts
    pub max_retries: u32,
    /// Backoff unit (one second in production)
    pub unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            unit: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before reconnect attempt `attempt`
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.unit.saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Whether another reconnect is allowed after `retry_count` attempts
    #[must_use]
    pub const fn can_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }
}

/// How the session reacts to an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Invalid or missing credential; terminal until the user fixes it
    Auth,
    /// Network-layer failure; retried with backoff
    Transient,
    /// Anything else; terminal, no retry
    Unclassified,
    /// Microphone or speaker unavailable; terminal
    DeviceAccess,
}

impl ErrorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Transient => "transient",
            Self::Unclassified => "unclassified",
            Self::DeviceAccess => "device_access",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const AUTH_KEYWORDS: &[&str] = &["api key", "unauthorized", "permission denied"];

const TRANSIENT_KEYWORDS: &[&str] = &[
    "network",
    "fetch",
    "aborted",
    "connection reset",
    "timed out",
    "broken pipe",
    "dns",
];

/// Classify an error by variant, falling back to its message text
#[must_use]
pub fn classify(err: &Error) -> ErrorKind {
    match err {
        Error::Auth(_) => return ErrorKind::Auth,
        Error::DeviceAccess(_) => return ErrorKind::DeviceAccess,
        Error::Network(msg) => {
            // A close reason may name a rejected key
            return if matches_any(msg, AUTH_KEYWORDS) {
                ErrorKind::Auth
            } else {
                ErrorKind::Transient
            };
        }
        Error::Io(e) if is_transient_io(e.kind()) => return ErrorKind::Transient,
        Error::WebSocket(e) => {
            if let Some(kind) = classify_websocket(e) {
                return kind;
            }
        }
        _ => {}
    }

    classify_message(&err.to_string())
}

/// Classify free-form error text
#[must_use]
pub fn classify_message(message: &str) -> ErrorKind {
    if matches_any(message, AUTH_KEYWORDS) {
        ErrorKind::Auth
    } else if matches_any(message, TRANSIENT_KEYWORDS) {
        ErrorKind::Transient
    } else {
        ErrorKind::Unclassified
    }
}

fn classify_websocket(err: &tungstenite::Error) -> Option<ErrorKind> {
    match err {
        tungstenite::Error::Http(response) => {
            let status = response.status().as_u16();
            if status == 401 || status == 403 {
                Some(ErrorKind::Auth)
            } else if status == 429 || (500..600).contains(&status) {
                Some(ErrorKind::Transient)
            } else {
                None
            }
        }
        tungstenite::Error::ConnectionClosed
        | tungstenite::Error::AlreadyClosed
        | tungstenite::Error::Tls(_) => Some(ErrorKind::Transient),
        tungstenite::Error::Io(e) if is_transient_io(e.kind()) => Some(ErrorKind::Transient),
        _ => None,
    }
}

const fn is_transient_io(kind: std::io::ErrorKind) -> bool {
    use std::io::ErrorKind as K;
    matches!(
        kind,
        K::ConnectionRefused
            | K::ConnectionReset
            | K::ConnectionAborted
            | K::NotConnected
            | K::BrokenPipe
            | K::TimedOut
            | K::UnexpectedEof
            | K::HostUnreachable
            | K::NetworkUnreachable
            | K::NetworkDown
    )
}

fn matches_any(message: &str, keywords: &[&str]) -> bool {
    let lower = message.to_lowercase();
    keywords.iter().any(|k| lower.contains(k))
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- RetryPolicy ----------------------------------------------------------

    #[test]
    fn backoff_doubles_in_whole_seconds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(8));
    }

    #[test]
    fn retries_stop_at_max() {
        let policy = RetryPolicy::default();
        assert!(policy.can_retry(0));
        assert!(policy.can_retry(2));
        assert!(!policy.can_retry(3));
    }

    #[test]
    fn huge_attempt_saturates() {
        let policy = RetryPolicy::default();
        assert!(policy.delay_for_attempt(200) >= Duration::from_secs(1 << 31));
    }

    // -- classify -------------------------------------------------------------

    #[test]
    fn variants_classify_directly() {
        assert_eq!(classify(&Error::Auth("bad".into())), ErrorKind::Auth);
        assert_eq!(
            classify(&Error::DeviceAccess("no mic".into())),
            ErrorKind::DeviceAccess
        );
        assert_eq!(
            classify(&Error::Network("socket closed".into())),
            ErrorKind::Transient
        );
    }

    #[test]
    fn close_mentioning_key_is_auth() {
        assert_eq!(
            classify(&Error::Network("closed (1008): API key not valid".into())),
            ErrorKind::Auth
        );
    }

    #[test]
    fn io_reset_is_transient() {
        let err = Error::Io(std::io::Error::from(std::io::ErrorKind::ConnectionReset));
        assert_eq!(classify(&err), ErrorKind::Transient);
    }

    #[test]
    fn message_fallback() {
        assert_eq!(
            classify(&Error::Session("Unauthorized request".into())),
            ErrorKind::Auth
        );
        assert_eq!(
            classify(&Error::Protocol("fetch failed".into())),
            ErrorKind::Transient
        );
        assert_eq!(
            classify(&Error::Protocol("unexpected frame".into())),
            ErrorKind::Unclassified
        );
    }
}
