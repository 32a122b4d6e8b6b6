//! # framelink - Fixed-Length Frames over Blocking TCP
//!
//! framelink is a minimal duplex TCP messaging layer: a client that connects
//! to one server, and a server that serves a bounded number of clients, each
//! on its own receive thread. Every message is a fixed-length byte frame.
//!
//! ## Features
//!
//! - **Thread per connection**: blocking sockets, no event loop
//! - **Admission control**: the server stops accepting while it is full
//! - **Slot reuse**: freed connection slots are reclaimed in place
//! - **Blocking queue**: received data reaches consumers through a
//!   shutdown-aware FIFO with blocking, timed and non-blocking pops
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────┐          ┌──────────────────────────────────┐
//! │       ClientConnection       │          │              Server              │
//! │                              │  frames  │                                  │
//! │  send() ─────────────────────┼────────> │  Accept Loop ──> ConnectionPool  │
//! │                              │          │                     │            │
//! │  Receive Thread <────────────┼───────── │           ConnectionHandler ×N   │
//! │       │                      │          │             (receive thread)     │
//! │       ▼                      │          │                     │            │
//! │  BlockingQueue<ClientEvent>  │          │               FrameHandler       │
//! └──────────────────────────────┘          └──────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use framelink::{ClientConnection, Server};
//!
//! let server = Server::new("127.0.0.1", "5090", 3, 1024)?;
//! server.run()?;
//!
//! let client = ClientConnection::connect("127.0.0.1", "5090", 1024)?;
//! client.run()?;
//! client.send("hello")?;
//!
//! if let Some(event) = client.message_queue().pop() {
//!     println!("{event}");
//! }
//!
//! client.stop();
//! server.shutdown();
//! ```
//!
//! ## Module Overview
//!
//! - [`protocol`]: frame length rules and zero padding
//! - [`queue`]: the thread-safe blocking queue
//! - [`client`]: the client connection and its queue items
//! - [`server`]: listener, pool, per-connection handlers, frame dispatch
//! - [`config`]: client and server settings
//! - [`error`]: the error taxonomy

pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod queue;
pub mod server;

// Re-export commonly used types for convenience
pub use client::{ClientConnection, ClientEvent};
pub use config::{ClientConfig, ServerConfig};
pub use error::{Error, InitStage, Result};
pub use protocol::{DEFAULT_BUFFER_LEN, MAX_BUFFER_LEN};
pub use queue::{BlockingQueue, PopTimeoutError, TryPopError};
pub use server::{
    Connection, ConnectionState, ConnectionStats, EchoHandler, FrameHandler, Server,
};

/// The default port framelink listens on
pub const DEFAULT_PORT: &str = config::DEFAULT_PORT;

/// The default host framelink binds to
pub const DEFAULT_HOST: &str = config::DEFAULT_HOST;

/// Version of framelink
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
