//! Live reload server for kserve.
//!
//! Watches files on disk and tells connected browsers to reload when they
//! change. The browser side is a plain `WebSocket` that reloads the page when it
//! receives the text message `RELOAD`.
//!
//! The WebSocket layer is a hand-written subset of RFC 6455: the opening
//! handshake and unmasked server-to-client text frames. Nothing else is
//! negotiated or decoded.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::path::Path;
//! use kserve_reload::{ReloadServer, ReloadServerConfig, WatchTargets};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ReloadServerConfig {
//!         watch: WatchTargets::new(["index.html", "app.wasm"], Path::new("/project")),
//!         ..ReloadServerConfig::default()
//!     };
//!
//!     let mut server = ReloadServer::start(config).await.unwrap();
//!     tokio::signal::ctrl_c().await.unwrap();
//!     server.stop().await;
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! notify ──► FileWatchBridge ──WatchEvent──┐
//!                                          ▼
//! TcpListener ──accept──► server loop (owns ConnectionRegistry, DebounceScheduler)
//!                  │             ▲                    │
//!                  ▼             │ Opened / Closed    │ RELOAD frame
//!           connection task ─────┘                    ▼
//!           (handshake, relay) ◄────────────── Connection handle
//! ```

mod connection;
mod debounce;
mod frame;
mod handshake;
mod registry;
mod server;
mod watch;

pub use debounce::{DEFAULT_COOLDOWN, DebounceScheduler};
pub use frame::{RELOAD_MESSAGE, ReloadFrame, encode_text_frame};
pub use handshake::{HandshakeError, MAX_REQUEST_BYTES, compute_accept_signature, try_handshake};
pub use registry::{Connection, ConnectionId, ConnectionRegistry};
pub use server::{DEFAULT_HOST, DEFAULT_PORT, ReloadServer, ReloadServerConfig, ServerError};
pub use watch::{ChangeNotifier, FileWatchBridge, WatchError, WatchEvent, WatchTargets};
