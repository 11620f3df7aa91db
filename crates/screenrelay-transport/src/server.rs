//! Viewer server: owns the runtime and both listeners.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Sender;
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpListener;
use tokio::runtime::Runtime;
use tracing::{info, instrument};

use screenrelay_engine::StreamHubs;
use screenrelay_input::{InputEventThrottler, InputInjector};
use screenrelay_ipc::{EngineCommand, StreamState};

use crate::config::ServerConfig;
use crate::error::TransportError;
use crate::{mjpeg, ws, TransportResult};

/// State shared by every connection.
pub(crate) struct Shared {
    pub hubs: StreamHubs,
    pub state: Arc<RwLock<StreamState>>,
    pub commands: Sender<EngineCommand>,
    pub input: Mutex<InputEventThrottler<Box<dyn InputInjector>>>,
    pub session_poll: Duration,
    pub start_timeout: Duration,
}

/// WebSocket and MJPEG listeners on a dedicated tokio runtime.
pub struct ViewerServer {
    config: ServerConfig,
    shared: Arc<Shared>,
    runtime: Option<Runtime>,
    should_stop: Arc<AtomicBool>,
    ws_addr: Option<SocketAddr>,
    http_addr: Option<SocketAddr>,
}

impl ViewerServer {
    /// Create a server; nothing is bound until [`ViewerServer::start`].
    ///
    /// `state` is the engine's state handle, read to decide whether a
    /// viewer's `start_stream` must ask for a restart.
    pub fn new(
        config: ServerConfig,
        hubs: StreamHubs,
        state: Arc<RwLock<StreamState>>,
        commands: Sender<EngineCommand>,
        input: InputEventThrottler<Box<dyn InputInjector>>,
    ) -> Self {
        let shared = Arc::new(Shared {
            hubs,
            state,
            commands,
            input: Mutex::new(input),
            session_poll: config.session_poll(),
            start_timeout: config.start_timeout(),
        });

        Self {
            config,
            shared,
            runtime: None,
            should_stop: Arc::new(AtomicBool::new(false)),
            ws_addr: None,
            http_addr: None,
        }
    }

    /// Bind both listeners and start accepting connections.
    #[instrument(name = "viewer_server_start", skip(self))]
    pub fn start(&mut self) -> TransportResult<()> {
        if self.runtime.is_some() {
            return Err(TransportError::AlreadyStarted);
        }

        let runtime = Runtime::new()?;

        let (ws_listener, http_listener) = runtime.block_on(async {
            let ws = bind(self.config.ws_addr).await?;
            let http = bind(self.config.http_addr).await?;
            Ok::<_, TransportError>((ws, http))
        })?;

        self.ws_addr = Some(ws_listener.local_addr()?);
        self.http_addr = Some(http_listener.local_addr()?);

        self.should_stop.store(false, Ordering::SeqCst);

        runtime.spawn(ws::run_ws_server(
            ws_listener,
            Arc::clone(&self.shared),
            Arc::clone(&self.should_stop),
        ));
        runtime.spawn(mjpeg::run_http_server(
            http_listener,
            Arc::clone(&self.shared),
            Arc::clone(&self.should_stop),
        ));

        info!(ws = ?self.ws_addr, http = ?self.http_addr, "Viewer server started");
        self.runtime = Some(runtime);
        Ok(())
    }

    /// Stop accepting connections and shut the runtime down.
    #[instrument(name = "viewer_server_stop", skip(self))]
    pub fn stop(&mut self) {
        self.should_stop.store(true, Ordering::SeqCst);

        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(Duration::from_secs(5));
            info!("Viewer server stopped");
        }
    }

    /// Bound WebSocket address, once started.
    pub fn ws_addr(&self) -> Option<SocketAddr> {
        self.ws_addr
    }

    /// Bound HTTP address, once started.
    pub fn http_addr(&self) -> Option<SocketAddr> {
        self.http_addr
    }

    pub fn is_running(&self) -> bool {
        self.runtime.is_some()
    }
}

impl Drop for ViewerServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn bind(addr: SocketAddr) -> TransportResult<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| TransportError::Bind { addr, source })
}
