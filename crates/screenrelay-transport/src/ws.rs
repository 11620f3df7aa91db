//! WebSocket endpoint: accept loop and per-connection handling.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{accept_async, tungstenite::Message as WsMessage};
use tracing::{debug, error, info, warn};

use screenrelay_capture::FrameKind;
use screenrelay_hub::{BroadcastHub, SessionEnd, SessionTicket};
use screenrelay_input::InputResult;
use screenrelay_ipc::{ClientMessage, EngineCommand, Reply, ServerMessage};

use crate::error::TransportError;
use crate::server::Shared;
use crate::sink::WsFrameSink;
use crate::{TransportResult, OUTBOUND_CHANNEL_CAPACITY};

/// Accept timeout, so the stop flag is checked regularly.
const ACCEPT_POLL: Duration = Duration::from_millis(200);

/// Poll interval while waiting for a restarted stream.
const START_POLL: Duration = Duration::from_millis(50);

/// Longest wait for a released session thread to finish.
const SESSION_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Runs the WebSocket accept loop until `should_stop` is raised.
pub(crate) async fn run_ws_server(
    listener: TcpListener,
    shared: Arc<Shared>,
    should_stop: Arc<AtomicBool>,
) {
    while !should_stop.load(Ordering::Relaxed) {
        match timeout(ACCEPT_POLL, listener.accept()).await {
            Ok(Ok((stream, peer))) => {
                debug!(%peer, "WebSocket connection accepted");
                let shared = Arc::clone(&shared);
                tokio::spawn(async move {
                    match run_connection(stream, peer, shared).await {
                        Ok(()) => info!(%peer, "WebSocket connection closed"),
                        Err(e) => warn!(%peer, "WebSocket connection closed with error: {e}"),
                    }
                });
            }
            Ok(Err(e)) => error!("WebSocket accept error: {e}"),
            Err(_) => {}
        }
    }

    info!("WebSocket accept loop stopped");
}

async fn run_connection(
    stream: TcpStream,
    peer: SocketAddr,
    shared: Arc<Shared>,
) -> TransportResult<()> {
    let ws_stream = accept_async(stream).await?;
    info!(%peer, "WebSocket connection opened");

    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let (out_tx, mut out_rx) = mpsc::channel::<String>(OUTBOUND_CHANNEL_CAPACITY);

    let writer = tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            if ws_tx.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let mut connection = Connection::new(peer.ip().to_string(), shared, out_tx);

    while let Some(message) = ws_rx.next().await {
        match message {
            Ok(WsMessage::Text(text)) => connection.handle_text(&text).await,
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(%peer, "WebSocket read error: {e}");
                break;
            }
        }
    }

    writer.abort();
    connection.unsubscribe().await;
    Ok(())
}

/// One track subscription of a connection.
struct Subscription {
    hub: Arc<BroadcastHub>,
    ticket: SessionTicket,
    thread: JoinHandle<SessionEnd>,
}

/// Per-connection command handling.
struct Connection {
    identity: String,
    shared: Arc<Shared>,
    out_tx: mpsc::Sender<String>,
    subscriptions: Vec<Subscription>,
}

impl Connection {
    fn new(identity: String, shared: Arc<Shared>, out_tx: mpsc::Sender<String>) -> Self {
        Self {
            identity,
            shared,
            out_tx,
            subscriptions: Vec::new(),
        }
    }

    /// Unparseable text and known commands with bad fields get an error
    /// reply; anything else without a known `command` is ignored.
    async fn handle_text(&mut self, text: &str) {
        let value = match serde_json::from_str::<serde_json::Value>(text) {
            Ok(value) => value,
            Err(_) => {
                error!(identity = %self.identity, "Invalid JSON received");
                self.reply(Reply::error("Invalid JSON")).await;
                return;
            }
        };

        let command = value.get("command").and_then(serde_json::Value::as_str).map(str::to_owned);
        if !command.as_deref().is_some_and(ClientMessage::is_known_command) {
            debug!(identity = %self.identity, ?command, "Ignoring unsupported command");
            return;
        }

        let message = match serde_json::from_value::<ClientMessage>(value) {
            Ok(message) => message,
            Err(e) => {
                debug!(identity = %self.identity, ?command, "Malformed command: {e}");
                self.reply(Reply::error(e)).await;
                return;
            }
        };

        match message {
            ClientMessage::StartStream => {
                let reply = match self.start_stream().await {
                    Ok(()) => Reply::Ok,
                    Err(e) => {
                        warn!(identity = %self.identity, "start_stream failed: {e}");
                        Reply::error(e)
                    }
                };
                self.reply(reply).await;
            }
            ClientMessage::StopStream => {
                self.unsubscribe().await;
                self.reply(Reply::Ok).await;
            }
            ClientMessage::Chat { message } => {
                info!(identity = %self.identity, "Chat message received: {message}");
                self.send(&ServerMessage::Chat {
                    message: "ok".to_string(),
                })
                .await;
            }
            input => {
                let reply = match self.inject(input).await {
                    Ok(()) => Reply::Ok,
                    Err(e) => {
                        debug!(identity = %self.identity, "Input rejected: {e}");
                        Reply::error(e)
                    }
                };
                self.reply(reply).await;
            }
        }
    }

    /// Subscribe to video, and audio when it is running.
    async fn start_stream(&mut self) -> TransportResult<()> {
        if self.is_subscribed() {
            return Ok(());
        }
        self.unsubscribe().await;

        let state = self.shared.state.read().clone();
        if !state.is_live() {
            // Never restarted behind the caller's back: ask explicitly.
            if !state.is_starting() {
                self.shared
                    .commands
                    .try_send(EngineCommand::Restart)
                    .map_err(|e| TransportError::EngineUnavailable(e.to_string()))?;
            }
            self.wait_for_live().await?;
        }

        let video = Arc::clone(&self.shared.hubs.video);
        self.subscribe(video)?;

        let audio = Arc::clone(&self.shared.hubs.audio);
        if audio.is_running() {
            if let Err(e) = self.subscribe(audio) {
                self.unsubscribe().await;
                return Err(e);
            }
        }

        Ok(())
    }

    async fn wait_for_live(&self) -> TransportResult<()> {
        let deadline = Instant::now() + self.shared.start_timeout;
        while !self.shared.state.read().is_live() {
            if Instant::now() >= deadline {
                return Err(TransportError::StreamUnavailable);
            }
            tokio::time::sleep(START_POLL).await;
        }
        Ok(())
    }

    fn subscribe(&mut self, hub: Arc<BroadcastHub>) -> TransportResult<()> {
        let session = hub.register(self.identity.clone())?;
        let ticket = session.ticket();
        let out_tx = self.out_tx.clone();
        let mut sink = WsFrameSink::new(out_tx.clone());
        let poll = self.shared.session_poll;
        let kind = hub.kind();

        let thread = thread::spawn(move || {
            let end = session.run(&mut sink, poll);
            if end == SessionEnd::HubStopped && kind == FrameKind::Video {
                notify_stream_stopped(&out_tx);
            }
            end
        });

        info!(identity = %self.identity, track = %hub.kind(), "Viewer subscribed");
        self.subscriptions.push(Subscription {
            hub,
            ticket,
            thread,
        });
        Ok(())
    }

    fn is_subscribed(&self) -> bool {
        !self.subscriptions.is_empty()
            && self
                .subscriptions
                .iter()
                .all(|s| s.hub.is_active(&s.ticket))
    }

    /// Release every subscription and wait for its session thread.
    async fn unsubscribe(&mut self) {
        for subscription in self.subscriptions.drain(..) {
            subscription.hub.release(&subscription.ticket);
            let track = subscription.hub.kind();
            let join = tokio::task::spawn_blocking(move || subscription.thread.join());
            match timeout(SESSION_JOIN_TIMEOUT, join).await {
                Ok(Ok(Ok(end))) => {
                    debug!(identity = %self.identity, %track, ?end, "Session thread finished")
                }
                Ok(_) => warn!(identity = %self.identity, %track, "Session thread panicked"),
                Err(_) => warn!(
                    identity = %self.identity,
                    %track,
                    "Session thread still running, detaching"
                ),
            }
        }
    }

    /// Run an input command on the injector.
    ///
    /// Refused unless this connection holds a live video session.
    async fn inject(&self, message: ClientMessage) -> TransportResult<()> {
        let active = self
            .subscriptions
            .iter()
            .any(|s| s.hub.is_active(&s.ticket));
        if !active {
            return Err(TransportError::StreamUnavailable);
        }

        let shared = Arc::clone(&self.shared);
        let result = tokio::task::spawn_blocking(move || -> InputResult<()> {
            let mut input = shared.input.lock();
            match message {
                ClientMessage::Move { x, y } => input.move_to(x, y).map(|_| ()),
                ClientMessage::Click { x, y, button } => input.click(x, y, button),
                ClientMessage::DoubleClick { x, y, button } => input.double_click(x, y, button),
                ClientMessage::Type { text } => input.type_text(&text),
                ClientMessage::Key { key } => input.key(&key),
                ClientMessage::StartStream
                | ClientMessage::StopStream
                | ClientMessage::Chat { .. } => Ok(()),
            }
        })
        .await
        .map_err(|e| TransportError::Io(std::io::Error::other(e)))?;

        result.map_err(TransportError::from)
    }

    async fn reply(&self, reply: Reply) {
        self.send(&reply).await;
    }

    async fn send<T: serde::Serialize>(&self, message: &T) {
        match serde_json::to_string(message) {
            Ok(text) => {
                if self.out_tx.send(text).await.is_err() {
                    debug!(identity = %self.identity, "Writer gone, dropping reply");
                }
            }
            Err(e) => error!("Failed to encode message: {e}"),
        }
    }
}

/// Tell a viewer its video ended because the stream stopped.
fn notify_stream_stopped(out_tx: &mpsc::Sender<String>) {
    match serde_json::to_string(&Reply::error("Stream stopped")) {
        Ok(text) => {
            if out_tx.blocking_send(text).is_err() {
                debug!("Writer gone, dropping stream stopped notice");
            }
        }
        Err(e) => error!("Failed to encode message: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant as StdInstant;

    use screenrelay_capture::FrameFormat;
    use screenrelay_input::InputAction;
    use screenrelay_ipc::CaptureMode;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    use super::*;
    use crate::test_support::{fixture, go_live, live, video_frame};

    async fn next_json<S>(ws: &mut S) -> serde_json::Value
    where
        S: StreamExt<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            let message = timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("timed out")
                .expect("stream ended")
                .expect("read failed");
            if let WsMessage::Text(text) = message {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    /// Send `start_stream` and read until its reply, skipping media.
    async fn start_stream(ws: &mut Client) -> serde_json::Value {
        ws.send(WsMessage::Text(r#"{"command":"start_stream"}"#.into()))
            .await
            .unwrap();
        loop {
            let message = next_json(ws).await;
            if message.get("status").is_some() {
                return message;
            }
        }
    }

    fn client<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(future)
    }

    #[test]
    fn test_invalid_json_and_chat() {
        let fixture = fixture();
        let url = format!("ws://{}", fixture.server.ws_addr().unwrap());

        client(async move {
            let (mut ws, _) = connect_async(url).await.unwrap();

            ws.send(WsMessage::Text("{not json".into())).await.unwrap();
            let reply = next_json(&mut ws).await;
            assert_eq!(reply, serde_json::json!({"status": "error", "message": "Invalid JSON"}));

            // Unknown commands get no reply; the chat ack is the next message.
            ws.send(WsMessage::Text(r#"{"command":"dance"}"#.into()))
                .await
                .unwrap();
            ws.send(WsMessage::Text(r#"{"command":"chat","message":"hi"}"#.into()))
                .await
                .unwrap();
            let reply = next_json(&mut ws).await;
            assert_eq!(reply, serde_json::json!({"type": "chat", "message": "ok"}));
        });
    }

    #[test]
    fn test_known_command_with_bad_fields_gets_error() {
        let fixture = fixture();
        let url = format!("ws://{}", fixture.server.ws_addr().unwrap());

        client(async move {
            let (mut ws, _) = connect_async(url).await.unwrap();
            ws.send(WsMessage::Text(r#"{"command":"move","x":"10"}"#.into()))
                .await
                .unwrap();
            let reply = next_json(&mut ws).await;
            assert_eq!(reply["status"], "error");
            assert_ne!(reply["message"], "Invalid JSON");

            ws.send(WsMessage::Text(r#"{"command":"key"}"#.into()))
                .await
                .unwrap();
            let reply = next_json(&mut ws).await;
            assert_eq!(reply["status"], "error");
        });

        assert!(fixture.recorder.actions().is_empty());
    }

    #[test]
    fn test_input_requires_stream() {
        let fixture = fixture();
        let url = format!("ws://{}", fixture.server.ws_addr().unwrap());

        client(async move {
            let (mut ws, _) = connect_async(url).await.unwrap();
            ws.send(WsMessage::Text(r#"{"command":"move","x":5,"y":5}"#.into()))
                .await
                .unwrap();
            let reply = next_json(&mut ws).await;
            assert_eq!(reply["status"], "error");
        });

        assert!(fixture.recorder.actions().is_empty());
    }

    #[test]
    fn test_start_stream_requests_restart_when_stopped() {
        let fixture = fixture();
        let url = format!("ws://{}", fixture.server.ws_addr().unwrap());

        client(async move {
            let (mut ws, _) = connect_async(url).await.unwrap();
            ws.send(WsMessage::Text(r#"{"command":"start_stream"}"#.into()))
                .await
                .unwrap();
            let reply = next_json(&mut ws).await;
            assert_eq!(reply["status"], "error");
        });

        assert!(matches!(fixture.commands.try_recv(), Ok(EngineCommand::Restart)));
    }

    #[test]
    fn test_start_stream_waits_for_live_state() {
        let fixture = fixture();
        // Open hubs alone do not make the stream live.
        fixture.hubs.video.open(4);
        let url = format!("ws://{}", fixture.server.ws_addr().unwrap());

        let state = Arc::clone(&fixture.state);
        let engine = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            *state.write() = live(CaptureMode::Mjpeg);
        });

        client(async move {
            let (mut ws, _) = connect_async(url).await.unwrap();
            let reply = start_stream(&mut ws).await;
            assert_eq!(reply["status"], "ok");
        });
        engine.join().unwrap();

        assert!(matches!(fixture.commands.try_recv(), Ok(EngineCommand::Restart)));
        assert_eq!(fixture.hubs.video.session_count(), 1);
    }

    #[test]
    fn test_hub_stop_notifies_viewer() {
        let fixture = fixture();
        fixture.hubs.video.open(4);
        go_live(&fixture, CaptureMode::Mjpeg);
        let url = format!("ws://{}", fixture.server.ws_addr().unwrap());
        let video = Arc::clone(&fixture.hubs.video);

        client(async move {
            let (mut ws, _) = connect_async(url).await.unwrap();
            assert_eq!(start_stream(&mut ws).await["status"], "ok");

            video.stop();
            loop {
                let message = next_json(&mut ws).await;
                if message.get("status").is_some() {
                    assert_eq!(
                        message,
                        serde_json::json!({"status": "error", "message": "Stream stopped"})
                    );
                    break;
                }
            }
        });

        assert!(fixture.commands.try_recv().is_err());
    }

    #[test]
    fn test_raw_frames_are_marked() {
        let fixture = fixture();
        fixture.hubs.video.open(4);
        go_live(&fixture, CaptureMode::Raw);
        fixture
            .hubs
            .video
            .publish(video_frame(0).with_format(FrameFormat::Rgb24));
        let url = format!("ws://{}", fixture.server.ws_addr().unwrap());

        client(async move {
            let (mut ws, _) = connect_async(url).await.unwrap();
            ws.send(WsMessage::Text(r#"{"command":"start_stream"}"#.into()))
                .await
                .unwrap();
            loop {
                let message = next_json(&mut ws).await;
                if message["type"] == "video" {
                    assert_eq!(message["format"], "rgb24");
                    break;
                }
            }
        });
    }

    #[test]
    fn test_stream_frames_and_input() {
        let fixture = fixture();
        fixture.hubs.video.open(4);
        go_live(&fixture, CaptureMode::Mjpeg);
        fixture.hubs.video.publish(video_frame(0));
        let url = format!("ws://{}", fixture.server.ws_addr().unwrap());
        let video = Arc::clone(&fixture.hubs.video);

        client(async move {
            let (mut ws, _) = connect_async(url).await.unwrap();
            ws.send(WsMessage::Text(r#"{"command":"start_stream"}"#.into()))
                .await
                .unwrap();

            let mut saw_ok = false;
            let mut saw_frame = false;
            while !(saw_ok && saw_frame) {
                let message = next_json(&mut ws).await;
                if message["status"] == "ok" {
                    saw_ok = true;
                } else if message["type"] == "video" {
                    assert_eq!(message["data"], "/9j/2Q==");
                    assert!(message.get("format").is_none());
                    saw_frame = true;
                }
            }

            ws.send(WsMessage::Text(r#"{"command":"click","x":10,"y":20}"#.into()))
                .await
                .unwrap();
            loop {
                let message = next_json(&mut ws).await;
                if message.get("status").is_some() {
                    assert_eq!(message["status"], "ok");
                    break;
                }
            }

            ws.close(None).await.unwrap();
            let deadline = StdInstant::now() + Duration::from_secs(5);
            while video.session_count() > 0 {
                assert!(StdInstant::now() < deadline, "session not released");
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });

        assert_eq!(
            fixture.recorder.actions(),
            vec![InputAction::Move { x: 10, y: 20 }, InputAction::Click { button: 1 }]
        );
    }
}
