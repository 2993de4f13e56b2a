//! Network reachability signal

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;

/// Default host probed before starting a session
pub const DEFAULT_PROBE_HOST: &str = "generativelanguage.googleapis.com:443";

/// Answers whether the remote endpoint is worth trying
#[async_trait]
pub trait Reachability: Send + Sync {
    async fn is_reachable(&self) -> bool;
}

/// Probes reachability with a TCP connect
#[derive(Debug, Clone)]
pub struct HostProbe {
    addr: String,
    timeout: Duration,
}

impl HostProbe {
    #[must_use]
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            timeout: Duration::from_secs(3),
        }
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for HostProbe {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_HOST)
    }
}

#[async_trait]
impl Reachability for HostProbe {
    async fn is_reachable(&self) -> bool {
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                tracing::debug!(addr = %self.addr, error = %e, "reachability probe failed");
                false
            }
            Err(_) => {
                tracing::debug!(addr = %self.addr, "reachability probe timed out");
                false
            }
        }
    }
}

/// Always reports the network as reachable
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeOnline;

#[async_trait]
impl Reachability for AssumeOnline {
    async fn is_reachable(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn probe_reaches_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        assert!(HostProbe::new(addr.to_string()).is_reachable().await);
    }

    #[tokio::test]
    async fn probe_fails_on_closed_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let probe = HostProbe::new(addr.to_string()).with_timeout(Duration::from_millis(500));
        assert!(!probe.is_reachable().await);
    }
}
