//! Session sink that feeds a WebSocket connection.

use base64::Engine;
use tokio::sync::mpsc;

use screenrelay_capture::{Frame, FrameFormat, FrameKind};
use screenrelay_hub::{FrameSink, SinkError};
use screenrelay_ipc::ServerMessage;

/// JSON text of a media message carrying `frame` as base64.
///
/// Video frames that are not JPEG carry an explicit `format` so viewers do
/// not try to decode raw pixels as an image.
pub(crate) fn frame_message(frame: &Frame) -> serde_json::Result<String> {
    let data = base64::engine::general_purpose::STANDARD.encode(&frame.data);
    let message = match frame.kind {
        FrameKind::Video => ServerMessage::Video {
            data,
            format: (frame.format != FrameFormat::Jpeg).then_some(frame.format),
        },
        FrameKind::Audio => ServerMessage::Audio { data },
    };
    serde_json::to_string(&message)
}

/// Hands encoded frames to the connection's writer task.
///
/// Runs on a session thread: `deliver` blocks while the writer's buffer is
/// full, which only holds back this one viewer.
pub(crate) struct WsFrameSink {
    tx: mpsc::Sender<String>,
}

impl WsFrameSink {
    pub(crate) fn new(tx: mpsc::Sender<String>) -> Self {
        Self { tx }
    }
}

impl FrameSink for WsFrameSink {
    fn deliver(&mut self, frame: &Frame) -> Result<(), SinkError> {
        let text = frame_message(frame).map_err(|e| SinkError(e.to_string()))?;
        self.tx
            .blocking_send(text)
            .map_err(|_| SinkError("WebSocket connection closed".to_string()))
    }

    fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use bytes::Bytes;
    use screenrelay_capture::CaptureTimestamp;

    use super::*;

    fn frame(kind: FrameKind, data: &'static [u8]) -> Frame {
        Frame::new(Bytes::from_static(data), kind, 0, CaptureTimestamp::now(Instant::now()))
    }

    #[test]
    fn test_frame_message_shape() {
        let text = frame_message(&frame(FrameKind::Video, &[0xFF, 0xD8, 0xFF, 0xD9])).unwrap();
        assert_eq!(text, r#"{"type":"video","data":"/9j/2Q=="}"#);

        let text = frame_message(&frame(FrameKind::Audio, b"abc")).unwrap();
        assert_eq!(text, r#"{"type":"audio","data":"YWJj"}"#);
    }

    #[test]
    fn test_raw_video_is_marked() {
        let raw = frame(FrameKind::Video, &[0, 1, 2]).with_format(FrameFormat::Rgb24);
        let text = frame_message(&raw).unwrap();
        assert_eq!(text, r#"{"type":"video","data":"AAEC","format":"rgb24"}"#);
    }

    #[test]
    fn test_closed_channel_fails_delivery() {
        let (tx, rx) = mpsc::channel(1);
        let mut sink = WsFrameSink::new(tx);
        assert!(sink.is_connected());

        drop(rx);
        assert!(!sink.is_connected());
        assert!(sink.deliver(&frame(FrameKind::Video, b"x")).is_err());
    }
}
