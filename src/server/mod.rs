//! Server Module
//!
//! The server side of framelink: a listener with bounded capacity and one
//! receive thread per accepted client.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Server                              │
//! │                                                             │
//! │  ┌──────────────┐     place()     ┌──────────────────────┐  │
//! │  │ Accept Loop  │ ──────────────> │   ConnectionPool     │  │
//! │  │ (1 thread)   │                 │  [slot0][slot1]...   │  │
//! │  └──────▲───────┘                 └──────────┬───────────┘  │
//! │         │ notify()                            │ owns         │
//! │  ┌──────┴───────────┐             ┌──────────▼───────────┐  │
//! │  │ DisconnectSignal │ <────────── │  ConnectionHandler   │  │
//! │  └──────────────────┘  on exit    │  (1 thread each)     │  │
//! │                                   │   └─> FrameHandler   │  │
//! │                                   └──────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use framelink::server::Server;
//!
//! let server = Server::new("0.0.0.0", "5090", 3, 1024)?;
//! server.run()?;
//! // ...
//! server.shutdown();
//! ```

pub mod dispatch;
pub mod handler;
pub mod listener;
pub mod pool;
pub mod signal;
pub mod stats;

// Re-export commonly used types
pub use dispatch::{EchoHandler, FrameHandler};
pub use handler::{Connection, ConnectionHandler, ConnectionState};
pub use listener::Server;
pub use pool::ConnectionPool;
pub use signal::DisconnectSignal;
pub use stats::ConnectionStats;
