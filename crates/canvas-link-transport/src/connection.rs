//! Connection manager: owns one self-healing WebSocket to the backend.
//!
//! A supervisor task dials the socket, runs the read/write loop while it is
//! open, and after every close sleeps for a backoff delay before dialing
//! again. It never gives up; only [`ConnectionManager::cleanup`] (or drop)
//! stops it.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use canvas_link_core::config::{Config, DEFAULT_PAGE_ORIGIN};
use canvas_link_core::error::Result;
use canvas_link_core::protocol::ClientMessage;

use crate::backoff::Backoff;
use crate::endpoint::resolve_ws_url;
use crate::router::RouterHandle;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Open,
}

/// Where to connect and how to back off.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub backend_url: Option<String>,
    pub page_origin: String,
    pub reconnect_base: Duration,
    pub reconnect_cap: Duration,
    pub jitter_ratio: f64,
}

impl ConnectionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            backend_url: config.backend_url().map(str::to_string),
            page_origin: config.page_origin().to_string(),
            reconnect_base: config.reconnect_base(),
            reconnect_cap: config.reconnect_cap(),
            jitter_ratio: config.jitter_ratio(),
        }
    }

    /// Default backoff, connecting straight to `origin`.
    pub fn for_origin(origin: impl Into<String>) -> Self {
        Self {
            backend_url: Some(origin.into()),
            ..Self::default()
        }
    }

    fn backoff(&self) -> Backoff {
        Backoff::new(self.reconnect_base, self.reconnect_cap, self.jitter_ratio)
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            backend_url: None,
            page_origin: DEFAULT_PAGE_ORIGIN.to_string(),
            reconnect_base: Duration::from_millis(3_000),
            reconnect_cap: Duration::from_millis(60_000),
            jitter_ratio: 0.2,
        }
    }
}

/// State shared between the manager and its supervisor task.
struct Shared {
    status: watch::Sender<ConnectionStatus>,
    /// Writer queue of the open socket; `None` unless open.
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    attempt: AtomicU32,
    pending_delay: Mutex<Option<Duration>>,
}

impl Shared {
    fn set_status(&self, status: ConnectionStatus) {
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    fn set_outbound(&self, tx: Option<mpsc::UnboundedSender<Message>>) {
        if let Ok(mut outbound) = self.outbound.lock() {
            *outbound = tx;
        }
    }

    fn set_pending_delay(&self, delay: Option<Duration>) {
        if let Ok(mut pending) = self.pending_delay.lock() {
            *pending = delay;
        }
    }

    /// Mark the socket closed. The writer queue is dropped first so `send`
    /// cannot succeed against a dead socket.
    fn mark_closed(&self) {
        self.set_outbound(None);
        self.set_status(ConnectionStatus::Disconnected);
    }
}

struct Supervisor {
    url: Url,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct ConnectionManager {
    settings: ConnectionSettings,
    shared: Arc<Shared>,
    supervisor: Option<Supervisor>,
}

impl ConnectionManager {
    pub fn new(settings: ConnectionSettings) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            settings,
            shared: Arc::new(Shared {
                status,
                outbound: Mutex::new(None),
                attempt: AtomicU32::new(0),
                pending_delay: Mutex::new(None),
            }),
            supervisor: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(ConnectionSettings::from_config(config))
    }

    /// Start the supervised connection, delivering inbound text frames to
    /// `router`. Any previous connection is torn down first.
    pub async fn connect(&mut self, router: RouterHandle) -> Result<Url> {
        let url = resolve_ws_url(
            self.settings.backend_url.as_deref(),
            &self.settings.page_origin,
        )?;
        self.cleanup().await;

        self.shared.attempt.store(0, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(supervise(
            url.clone(),
            router,
            self.shared.clone(),
            self.settings.backoff(),
            cancel.clone(),
        ));
        info!(url = %url, "Connection supervisor started");
        self.supervisor = Some(Supervisor {
            url: url.clone(),
            cancel,
            task,
        });
        Ok(url)
    }

    /// Hand `message` to the socket writer. Returns false, with no I/O, if
    /// the socket is not open. Not an acknowledgement.
    pub fn send(&self, message: &ClientMessage) -> bool {
        if !self.is_connected() {
            debug!(?message, "Not connected, dropping outbound message");
            return false;
        }
        let Ok(outbound) = self.shared.outbound.lock() else {
            return false;
        };
        let Some(tx) = outbound.as_ref() else {
            return false;
        };
        match serde_json::to_string(message) {
            Ok(json) => tx.send(Message::Text(json.into())).is_ok(),
            Err(e) => {
                warn!(error = %e, "Failed to serialize outbound message");
                false
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Open
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.shared.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status.subscribe()
    }

    /// Consecutive closes since the last successful open.
    pub fn attempt(&self) -> u32 {
        self.shared.attempt.load(Ordering::Relaxed)
    }

    /// Delay of the currently scheduled reconnect, if one is pending.
    pub fn pending_reconnect_delay(&self) -> Option<Duration> {
        self.shared.pending_delay.lock().ok().and_then(|d| *d)
    }

    /// Socket URL of the active supervisor.
    pub fn url(&self) -> Option<&Url> {
        self.supervisor.as_ref().map(|s| &s.url)
    }

    /// Cancel any pending reconnect, close the socket, and wait for the
    /// supervisor to exit.
    pub async fn cleanup(&mut self) {
        let Some(supervisor) = self.supervisor.take() else {
            return;
        };
        supervisor.cancel.cancel();
        if let Err(e) = supervisor.task.await {
            warn!(error = %e, "Connection supervisor ended abnormally");
        }
        self.shared.mark_closed();
        self.shared.set_pending_delay(None);
        info!(url = %supervisor.url, "Connection closed");
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(supervisor) = &self.supervisor {
            supervisor.cancel.cancel();
        }
    }
}

/// Dial, run, and redial until cancelled.
async fn supervise(
    url: Url,
    router: RouterHandle,
    shared: Arc<Shared>,
    mut backoff: Backoff,
    cancel: CancellationToken,
) {
    loop {
        shared.set_status(ConnectionStatus::Connecting);
        debug!(url = %url, attempt = backoff.attempt(), "Connecting");

        let dialed = tokio::select! {
            _ = cancel.cancelled() => break,
            result = connect_async(url.as_str()) => result,
        };
        match dialed {
            Ok((socket, _)) => {
                backoff.reset();
                shared.attempt.store(0, Ordering::Relaxed);
                info!(url = %url, "Connected");
                run_session(socket, &router, &shared, &cancel).await;
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Connection failed");
            }
        }
        shared.mark_closed();

        if cancel.is_cancelled() {
            break;
        }

        let delay = backoff.next_delay();
        shared.attempt.store(backoff.attempt(), Ordering::Relaxed);
        shared.set_pending_delay(Some(delay));
        info!(
            attempt = backoff.attempt(),
            delay_ms = delay.as_millis() as u64,
            "Reconnect scheduled"
        );

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
        shared.set_pending_delay(None);
    }

    shared.mark_closed();
    shared.set_pending_delay(None);
    debug!(url = %url, "Connection supervisor stopped");
}

/// Pump one open socket until it closes or `cancel` fires.
async fn run_session(
    socket: Socket,
    router: &RouterHandle,
    shared: &Shared,
    cancel: &CancellationToken,
) {
    let (mut write, mut read) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    // Status refresh goes out ahead of anything callers send.
    match serde_json::to_string(&ClientMessage::GetDatabaseStats) {
        Ok(json) => {
            let _ = tx.send(Message::Text(json.into()));
        }
        Err(e) => warn!(error = %e, "Failed to serialize status refresh"),
    }
    shared.set_outbound(Some(tx));
    shared.set_status(ConnectionStatus::Open);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return;
            }
            Some(message) = rx.recv() => {
                if let Err(e) = write.send(message).await {
                    warn!(error = %e, "Socket write failed");
                    return;
                }
            }
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if !router.deliver(text.as_str().to_owned()) {
                        warn!("Router stopped, dropping inbound frame");
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    info!(?frame, "Socket closed by server");
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "Socket error");
                    return;
                }
                None => {
                    info!("Socket stream ended");
                    return;
                }
            },
        }
    }
}
