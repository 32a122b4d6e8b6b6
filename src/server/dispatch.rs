//! Frame Dispatch
//!
//! What a server does with the bytes it reads is pluggable. Each receive
//! loop calls [`FrameHandler::on_frame`] with the exact bytes of every
//! successful read, before anything else happens to them.
//!
//! ```text
//!  read() ──> on_frame(conn, bytes) ──> (handler decides: reply, store, forward...)
//!  exit   ──> on_disconnect(conn)
//! ```
//!
//! [`EchoHandler`] is the default and folds every payload back to its sender.
//! Plain closures `Fn(&Connection, &[u8])` are handlers too.

use crate::server::handler::Connection;
use tracing::{debug, warn};

/// Application logic for a server's connections.
///
/// One handler value is shared by every connection of a server, so it is
/// called concurrently from several receive threads.
pub trait FrameHandler: Send + Sync + 'static {
    /// Called on the connection's receive thread for every read that
    /// returned data.
    fn on_frame(&self, connection: &Connection, frame: &[u8]);

    /// Called once, on the receive thread, after the connection has
    /// transitioned to Disconnected.
    fn on_disconnect(&self, _connection: &Connection) {}
}

impl<F> FrameHandler for F
where
    F: Fn(&Connection, &[u8]) + Send + Sync + 'static,
{
    fn on_frame(&self, connection: &Connection, frame: &[u8]) {
        (self)(connection, frame)
    }
}

/// Sends every received payload straight back to its sender.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler;

impl FrameHandler for EchoHandler {
    fn on_frame(&self, connection: &Connection, frame: &[u8]) {
        if let Err(e) = connection.send(frame) {
            warn!(peer = %connection.peer_addr(), error = %e, "Echo failed");
        }
    }

    fn on_disconnect(&self, connection: &Connection) {
        debug!(peer = %connection.peer_addr(), "Echo session ended");
    }
}
