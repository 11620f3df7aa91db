//! MJPEG over HTTP: `GET /stream` as `multipart/x-mixed-replace`.
//!
//! Routing, request parsing and error statuses are left to axum. Each
//! accepted viewer gets a hub session on its own thread, which feeds
//! multipart parts into a channel that backs the streaming response body.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

use screenrelay_capture::{Frame, FrameFormat};
use screenrelay_hub::{FrameSink, HubError, SinkError};

use crate::server::Shared;

/// Multipart boundary token.
pub const MJPEG_BOUNDARY: &str = "frame";

const MJPEG_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Encoded parts buffered between a session thread and its response body.
const PART_CHANNEL_CAPACITY: usize = 2;

const SHUTDOWN_POLL: Duration = Duration::from_millis(200);

/// One multipart part carrying a JPEG image.
pub fn multipart_part(data: &[u8]) -> Vec<u8> {
    let header = format!(
        "--{MJPEG_BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        data.len()
    );
    let mut part = Vec::with_capacity(header.len() + data.len() + 2);
    part.extend_from_slice(header.as_bytes());
    part.extend_from_slice(data);
    part.extend_from_slice(b"\r\n");
    part
}

fn router(shared: Arc<Shared>) -> Router {
    Router::new()
        .route("/stream", get(stream_mjpeg))
        .with_state(shared)
}

/// Serves HTTP viewers until `should_stop` is raised.
pub(crate) async fn run_http_server(
    listener: TcpListener,
    shared: Arc<Shared>,
    should_stop: Arc<AtomicBool>,
) {
    let app = router(shared).into_make_service_with_connect_info::<SocketAddr>();
    let shutdown = async move {
        while !should_stop.load(Ordering::Relaxed) {
            tokio::time::sleep(SHUTDOWN_POLL).await;
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        error!("HTTP server error: {e}");
    }

    info!("HTTP server stopped");
}

/// Handles `GET /stream`.
async fn stream_mjpeg(
    State(shared): State<Arc<Shared>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Response {
    let identity = peer.ip().to_string();

    if let Some(format) = live_video_format(&shared) {
        if format != FrameFormat::Jpeg {
            debug!(%identity, ?format, "Refusing MJPEG viewer for a non-JPEG stream");
            return (StatusCode::UNSUPPORTED_MEDIA_TYPE, "Stream is not MJPEG").into_response();
        }
    }

    let session = match shared.hubs.video.register(identity.clone()) {
        Ok(session) => session,
        Err(HubError::DuplicateSession(_)) => {
            warn!(%identity, "Rejecting second MJPEG stream");
            return (StatusCode::TOO_MANY_REQUESTS, "Multiple streams not allowed").into_response();
        }
        Err(HubError::NotRunning(_)) => {
            return (StatusCode::SERVICE_UNAVAILABLE, "Stream is not running").into_response();
        }
    };

    let (tx, rx) = mpsc::channel(PART_CHANNEL_CAPACITY);
    let mut sink = PartSink { tx };
    let poll = shared.session_poll;

    info!(%identity, "MJPEG viewer connected");
    thread::spawn(move || {
        let end = session.run(&mut sink, poll);
        info!(%identity, ?end, "MJPEG viewer finished");
    });

    let body = Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, io::Error>));
    (
        [
            (header::CONTENT_TYPE, MJPEG_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache, no-store"),
            (header::PRAGMA, "no-cache"),
        ],
        body,
    )
        .into_response()
}

/// Video format of the running stream, falling back to the cached frame.
fn live_video_format(shared: &Shared) -> Option<FrameFormat> {
    if let Some(config) = shared.state.read().live_config() {
        return Some(config.video_format());
    }
    shared.hubs.video.last_frame().map(|frame| frame.format)
}

/// Hands multipart parts to a response body.
struct PartSink {
    tx: mpsc::Sender<Bytes>,
}

impl FrameSink for PartSink {
    fn deliver(&mut self, frame: &Frame) -> Result<(), SinkError> {
        if frame.format != FrameFormat::Jpeg {
            return Err(SinkError(format!("{:?} frame on an MJPEG stream", frame.format)));
        }
        self.tx
            .blocking_send(Bytes::from(multipart_part(&frame.data)))
            .map_err(|_| SinkError("HTTP viewer disconnected".to_string()))
    }

    fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}
