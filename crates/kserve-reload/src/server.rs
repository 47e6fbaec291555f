//! Reload server: accept loop, connection bookkeeping and debounced broadcast.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::connection::{self, ConnectionEvent};
use crate::debounce::{DEFAULT_COOLDOWN, DebounceScheduler};
use crate::frame::ReloadFrame;
use crate::registry::{ConnectionId, ConnectionRegistry};
use crate::watch::{
    CHANGE_QUEUE_CAPACITY, ChangeNotifier, FileWatchBridge, WatchError, WatchEvent, WatchTargets,
};

/// Default bind host.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default bind port.
pub const DEFAULT_PORT: u16 = 1234;

/// Pause after a failed `accept` so a persistent error (e.g. out of file
/// descriptors) does not spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Reload server configuration.
#[derive(Clone, Debug)]
pub struct ReloadServerConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on (0 picks a free port).
    pub port: u16,
    /// Quiet period before a reload is broadcast.
    pub cooldown: Duration,
    /// Files whose changes trigger a reload.
    pub watch: WatchTargets,
}

impl Default for ReloadServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            cooldown: DEFAULT_COOLDOWN,
            watch: WatchTargets::default(),
        }
    }
}

/// Reload server error.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listening socket could not be set up.
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
    /// File watching could not be set up.
    #[error(transparent)]
    Watch(#[from] WatchError),
}

/// Running reload server.
///
/// Created by [`ReloadServer::start`], which only returns once the socket is
/// listening. Dropping the server without calling [`stop`](Self::stop) also
/// shuts the event loop down, but without waiting for it.
pub struct ReloadServer {
    local_addr: SocketAddr,
    notifier: ChangeNotifier,
    bridge: Option<FileWatchBridge>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ReloadServer {
    /// Bind the listening socket, subscribe to the watch targets and start
    /// serving.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound and
    /// [`ServerError::Watch`] if the file watcher cannot be set up.
    pub async fn start(config: ReloadServerConfig) -> Result<Self, ServerError> {
        let address = format!("{}:{}", config.host, config.port);
        let bind_error = |source| ServerError::Bind {
            address: address.clone(),
            source,
        };

        let listener = TcpListener::bind((config.host.as_str(), config.port))
            .await
            .map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        let (change_tx, change_rx) = mpsc::channel(CHANGE_QUEUE_CAPACITY);
        let notifier = ChangeNotifier::new(change_tx);
        let bridge = FileWatchBridge::start(&config.watch, notifier.clone())?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let event_loop = EventLoop::new(listener, change_rx, shutdown_rx, config.cooldown);
        let task = tokio::spawn(event_loop.run());

        tracing::info!(
            address = %local_addr,
            watched = bridge.watched().len(),
            cooldown_ms = config.cooldown.as_millis(),
            "Reload server listening"
        );

        Ok(Self {
            local_addr,
            notifier,
            bridge: Some(bridge),
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }

    /// Address the server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Handle for reporting file changes without a filesystem event.
    pub fn notifier(&self) -> ChangeNotifier {
        self.notifier.clone()
    }

    pub fn is_running(&self) -> bool {
        self.shutdown.is_some()
    }

    /// Stop the server.
    ///
    /// Releases file subscriptions, cancels any pending reload, closes every
    /// open connection and stops accepting. Calling it again is a no-op.
    pub async fn stop(&mut self) {
        let Some(shutdown) = self.shutdown.take() else {
            return;
        };

        if let Some(bridge) = self.bridge.take() {
            bridge.stop();
        }
        let _ = shutdown.send(());

        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            tracing::warn!(error = %e, "Reload server task ended abnormally");
        }

        tracing::info!(address = %self.local_addr, "Reload server stopped");
    }
}

/// State owned by the server task.
///
/// The registry and the debounce timer are only touched from here, so they
/// need no locking.
struct EventLoop {
    listener: TcpListener,
    registry: ConnectionRegistry,
    debounce: DebounceScheduler,
    frame: ReloadFrame,
    changes: mpsc::Receiver<WatchEvent>,
    shutdown: oneshot::Receiver<()>,
    events_tx: mpsc::UnboundedSender<ConnectionEvent>,
    events_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
    closing: watch::Sender<bool>,
    next_id: u64,
}

impl EventLoop {
    fn new(
        listener: TcpListener,
        changes: mpsc::Receiver<WatchEvent>,
        shutdown: oneshot::Receiver<()>,
        cooldown: Duration,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (closing, _) = watch::channel(false);
        Self {
            listener,
            registry: ConnectionRegistry::new(),
            debounce: DebounceScheduler::new(cooldown),
            frame: ReloadFrame::new(),
            changes,
            shutdown,
            events_tx,
            events_rx,
            closing,
            next_id: 0,
        }
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;

                // Also resolves when the ReloadServer is dropped.
                _ = &mut self.shutdown => break,
                Some(event) = self.events_rx.recv() => self.handle_connection_event(event),
                Some(WatchEvent::Changed) = self.changes.recv() => {
                    self.debounce.notify_change();
                    tracing::debug!("File change recorded, reload scheduled");
                }
                () = self.debounce.fired() => self.broadcast(),
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_connection(stream, peer),
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }

        self.close();
    }

    fn spawn_connection(&mut self, stream: TcpStream, peer: SocketAddr) {
        self.next_id += 1;
        let id = ConnectionId::new(self.next_id);
        tracing::debug!(%peer, %id, "Accepted connection");

        tokio::spawn(connection::run(
            stream,
            peer,
            id,
            self.events_tx.clone(),
            self.closing.subscribe(),
        ));
    }

    fn handle_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Opened(connection) => {
                tracing::info!(peer = %connection.peer(), id = %connection.id(), "Client connected");
                self.registry.add(connection);
            }
            ConnectionEvent::Closed(id) => {
                if let Some(connection) = self.registry.remove(id) {
                    tracing::info!(peer = %connection.peer(), %id, "Client disconnected");
                }
            }
        }
    }

    /// Queue the reload frame on every open connection.
    fn broadcast(&mut self) {
        let mut gone = Vec::new();
        self.registry.for_each(|connection| {
            if !connection.send(&self.frame) {
                gone.push(connection.id());
            }
        });
        for id in gone {
            self.registry.remove(id);
        }

        tracing::info!(clients = self.registry.len(), "Reload broadcast");
    }

    fn close(&mut self) {
        self.debounce.cancel();
        let open = self.registry.len();
        self.registry.close_all();
        self.closing.send_replace(true);
        tracing::debug!(closed = open, "Closed client connections");
    }
}
