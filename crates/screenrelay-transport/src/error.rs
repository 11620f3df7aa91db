//! Error types for the transport module.

use thiserror::Error;

/// Errors that can occur in the viewer transports.
#[derive(Debug, Error)]
pub enum TransportError {
    /// A listener could not be bound.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Server already started.
    #[error("Server already started")]
    AlreadyStarted,

    /// The stream did not become available in time.
    #[error("Stream is not running")]
    StreamUnavailable,

    /// The engine command channel is closed or full.
    #[error("Engine unavailable: {0}")]
    EngineUnavailable(String),

    /// WebSocket protocol error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Hub rejected the session.
    #[error(transparent)]
    Hub(#[from] screenrelay_hub::HubError),

    /// Input injection failed.
    #[error(transparent)]
    Input(#[from] screenrelay_input::InputError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
