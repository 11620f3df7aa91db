//! Viewer transports.
//!
//! Two listeners share one tokio runtime:
//! - a WebSocket endpoint speaking JSON commands, which streams base64
//!   frames and relays input to the injector;
//! - an HTTP endpoint serving `GET /stream` as `multipart/x-mixed-replace`
//!   (MJPEG).
//!
//! Viewer identity is the peer IP address; each identity may hold one
//! session per track.

mod config;
mod error;
mod mjpeg;
mod server;
mod sink;
mod ws;

pub use config::ServerConfig;
pub use error::TransportError;
pub use mjpeg::{multipart_part, MJPEG_BOUNDARY};
pub use server::ViewerServer;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Outgoing WebSocket messages buffered per connection.
pub const OUTBOUND_CHANNEL_CAPACITY: usize = 32;
