//! Listener addresses and session timing for the viewer server.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Listener addresses and session timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// WebSocket listener.
    pub ws_addr: SocketAddr,

    /// MJPEG HTTP listener.
    pub http_addr: SocketAddr,

    /// Longest single wait of a session loop before it re-checks liveness.
    pub session_poll_ms: u64,

    /// How long `start_stream` waits for a stopped stream to come back.
    pub start_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ws_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            http_addr: SocketAddr::from(([0, 0, 0, 0], 8001)),
            session_poll_ms: 100,
            start_timeout_ms: 5000,
        }
    }
}

impl ServerConfig {
    pub fn session_poll(&self) -> Duration {
        Duration::from_millis(self.session_poll_ms.max(1))
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }
}
