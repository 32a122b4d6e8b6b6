//! Server-Side Connection Handler
//!
//! Each accepted socket gets a [`ConnectionHandler`] that owns it and runs a
//! dedicated receive thread. The handler's shareable half, [`Connection`],
//! carries the state flag and the send path so the pool, the frame handler
//! and the application all observe the same lifecycle.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. accept()                    (accept loop)
//!        │
//!        ▼
//! 2. ConnectionHandler::new      state = Connected, receive thread started
//!        │
//!        ▼
//! 3. ┌──────────────────────────────┐
//!    │      Receive Loop            │
//!    │                              │
//!    │  read(buffer_len)            │
//!    │     n > 0  -> on_frame()     │
//!    │     n == 0 -> exit           │
//!    │     error  -> exit           │
//!    └──────────────────────────────┘
//!        │
//!        ▼
//! 4. state = Disconnected, socket shut down, on_disconnect(),
//!    DisconnectSignal::notify()  (exactly once)
//!        │
//!        ▼
//! 5. Pool reclaims the slot, or shutdown() joins the thread
//! ```
//!
//! The state moves Connected -> Disconnected only. Every socket operation
//! is gated on it, and the descriptor itself lives until the handler drops,
//! so no thread ever touches a closed descriptor.

use crate::error::{panic_message, Error, InitStage, Result};
use crate::protocol::{encode, validate_buffer_len};
use crate::server::dispatch::{EchoHandler, FrameHandler};
use crate::server::signal::DisconnectSignal;
use crate::server::stats::ConnectionStats;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, trace, warn};

/// Lifecycle of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Frames can be sent and received
    Connected,
    /// The receive loop has stopped or is stopping; sends are ignored
    Disconnected,
}

/// The shareable half of a server-side connection.
pub struct Connection {
    /// Socket used for writes and for forcing the reader out of `read`
    stream: TcpStream,
    /// Client's address (for logging)
    peer_addr: SocketAddr,
    /// Frame length
    buffer_len: usize,
    /// true while Connected
    connected: AtomicBool,
    /// Placeholder identity, filled in by application protocols
    username: RwLock<String>,
    /// Serializes writers so frames never interleave on the wire
    send_lock: Mutex<()>,
    /// Connection statistics (shared)
    stats: Arc<ConnectionStats>,
}

impl Connection {
    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        if self.connected.load(Ordering::SeqCst) {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// The client's address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Frame length in bytes.
    pub fn buffer_len(&self) -> usize {
        self.buffer_len
    }

    /// The username attached to this connection; empty until set.
    pub fn username(&self) -> String {
        self.username
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_username(&self, username: impl Into<String>) {
        *self
            .username
            .write()
            .unwrap_or_else(PoisonError::into_inner) = username.into();
    }

    /// Sends one zero-padded frame to the client.
    ///
    /// Does nothing once the connection is Disconnected, including when the
    /// disconnect races with this call.
    ///
    /// # Errors
    ///
    /// [`Error::Oversize`] if `payload` exceeds `buffer_len`, [`Error::Send`]
    /// if the write fails while still Connected.
    pub fn send(&self, payload: impl AsRef<[u8]>) -> Result<()> {
        if !self.is_connected() {
            return Ok(());
        }

        let frame = encode(payload.as_ref(), self.buffer_len)?;

        let _guard = self.send_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut writer = &self.stream;
        match writer.write_all(&frame) {
            Ok(()) => {
                self.stats.bytes_written(frame.len());
                trace!(peer = %self.peer_addr, bytes = frame.len(), "Sent frame");
                Ok(())
            }
            Err(_) if !self.is_connected() => Ok(()),
            Err(e) => {
                warn!(peer = %self.peer_addr, error = %e, "Send failed");
                Err(Error::Send(e))
            }
        }
    }

    /// Moves to Disconnected and shuts the socket down, unblocking the
    /// receive thread. Returns true if this call made the transition.
    pub fn close(&self) -> bool {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return false;
        }
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            if e.kind() != io::ErrorKind::NotConnected {
                debug!(peer = %self.peer_addr, error = %e, "Socket shutdown failed");
            }
        }
        true
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer_addr", &self.peer_addr)
            .field("buffer_len", &self.buffer_len)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Owns one accepted socket and its receive thread.
pub struct ConnectionHandler {
    connection: Arc<Connection>,
    recv_thread: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionHandler {
    /// Takes over an accepted socket with the default [`EchoHandler`].
    ///
    /// # Arguments
    ///
    /// * `stream` - The accepted TCP stream
    /// * `buffer_len` - Frame length, `1..=10240`
    /// * `signal` - Fired once when the receive loop exits
    pub fn new(
        stream: TcpStream,
        buffer_len: usize,
        signal: Arc<DisconnectSignal>,
    ) -> Result<Self> {
        Self::with_handler(
            stream,
            buffer_len,
            signal,
            Arc::new(EchoHandler),
            Arc::new(ConnectionStats::new()),
        )
    }

    /// Takes over an accepted socket, dispatching frames to `frame_handler`.
    ///
    /// The handler is Connected and its receive thread running on return.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] for a bad `buffer_len` or an unusable socket,
    /// [`Error::Initialization`] if the receive thread cannot start.
    pub fn with_handler(
        stream: TcpStream,
        buffer_len: usize,
        signal: Arc<DisconnectSignal>,
        frame_handler: Arc<dyn FrameHandler>,
        stats: Arc<ConnectionStats>,
    ) -> Result<Self> {
        validate_buffer_len(buffer_len)?;
        let peer_addr = stream
            .peer_addr()
            .map_err(|e| Error::Configuration(format!("invalid socket: {e}")))?;
        let reader = stream
            .try_clone()
            .map_err(|e| Error::init(InitStage::Spawn, e))?;

        let connection = Arc::new(Connection {
            stream,
            peer_addr,
            buffer_len,
            connected: AtomicBool::new(true),
            username: RwLock::new(String::new()),
            send_lock: Mutex::new(()),
            stats: Arc::clone(&stats),
        });
        stats.connection_opened();

        let conn = Arc::clone(&connection);
        let spawned = thread::Builder::new()
            .name(format!("framelink-conn-{peer_addr}"))
            .spawn(move || receive_loop(reader, conn, frame_handler, signal));

        match spawned {
            Ok(handle) => {
                info!(peer = %peer_addr, "Client connected");
                Ok(Self {
                    connection,
                    recv_thread: Mutex::new(Some(handle)),
                })
            }
            Err(e) => {
                connection.close();
                stats.connection_closed();
                error!(peer = %peer_addr, error = %e, "Failed to start receive thread");
                Err(Error::init(InitStage::Spawn, e))
            }
        }
    }

    /// The shareable connection view.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// See [`Connection::send`].
    pub fn send(&self, payload: impl AsRef<[u8]>) -> Result<()> {
        self.connection.send(payload)
    }

    /// Disconnects and joins the receive thread. Idempotent.
    ///
    /// If the loop already ended on its own this only reaps the thread.
    pub fn shutdown(&self) {
        if self.connection.close() {
            debug!(peer = %self.connection.peer_addr, "Shutting down connection");
        }

        let handle = self
            .recv_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!(peer = %self.connection.peer_addr, "Receive thread panicked");
            }
        }
    }
}

impl Drop for ConnectionHandler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ConnectionHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandler")
            .field("connection", &self.connection)
            .finish_non_exhaustive()
    }
}

/// Body of the receive thread.
fn receive_loop(
    mut reader: TcpStream,
    conn: Arc<Connection>,
    frame_handler: Arc<dyn FrameHandler>,
    signal: Arc<DisconnectSignal>,
) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        serve_frames(&mut reader, &conn, frame_handler.as_ref())
    }));
    if let Err(payload) = outcome {
        let reason = panic_message(payload.as_ref());
        error!(peer = %conn.peer_addr, reason = %reason, "Receive loop panicked");
    }

    conn.close();
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| {
        frame_handler.on_disconnect(&conn)
    })) {
        let reason = panic_message(payload.as_ref());
        error!(peer = %conn.peer_addr, reason = %reason, "on_disconnect panicked");
    }

    conn.stats.connection_closed();
    info!(peer = %conn.peer_addr, "Client disconnected");
    signal.notify();
}

fn serve_frames(reader: &mut TcpStream, conn: &Connection, frame_handler: &dyn FrameHandler) {
    let mut buffer = vec![0u8; conn.buffer_len];

    while conn.is_connected() {
        match reader.read(&mut buffer) {
            Ok(0) => {
                debug!(peer = %conn.peer_addr, "Peer closed connection");
                break;
            }
            Ok(n) => {
                conn.stats.frame_received(n);
                trace!(peer = %conn.peer_addr, bytes = n, "Read data");
                frame_handler.on_frame(conn, &buffer[..n]);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                if !conn.is_connected() {
                    break;
                }
                match e.kind() {
                    io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
                        debug!(peer = %conn.peer_addr, "Connection reset by client")
                    }
                    _ => warn!(peer = %conn.peer_addr, error = %e, "Receive failed"),
                }
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(2);

    fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server_side, _) = listener.accept().unwrap();
        (client, server_side)
    }

    #[test]
    fn test_echo_round_trip() {
        let (mut client, server_side) = socket_pair();
        let signal = Arc::new(DisconnectSignal::new());
        let handler = ConnectionHandler::new(server_side, 8, signal).unwrap();
        assert_eq!(handler.state(), ConnectionState::Connected);

        client.write_all(b"hi\0\0\0\0\0\0").unwrap();

        let mut echoed = [0xffu8; 8];
        client.set_read_timeout(Some(WAIT)).unwrap();
        client.read_exact(&mut echoed).unwrap();
        assert_eq!(&echoed[..2], b"hi");
        assert!(echoed[2..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_peer_close_disconnects_and_signals_once() {
        let (client, server_side) = socket_pair();
        let signal = Arc::new(DisconnectSignal::new());
        let stats = Arc::new(ConnectionStats::new());
        let handler = ConnectionHandler::with_handler(
            server_side,
            8,
            Arc::clone(&signal),
            Arc::new(EchoHandler),
            Arc::clone(&stats),
        )
        .unwrap();
        assert_eq!(stats.active(), 1);

        drop(client);

        assert!(signal.wait_until_timeout(WAIT, || {
            handler.state() == ConnectionState::Disconnected
        }));
        assert!(signal.wait_until_timeout(WAIT, || stats.active() == 0));

        handler.shutdown();
        handler.shutdown();
        assert_eq!(signal.generation(), 1);
    }

    #[test]
    fn test_shutdown_unblocks_receive_and_is_idempotent() {
        let (mut client, server_side) = socket_pair();
        let signal = Arc::new(DisconnectSignal::new());
        let handler = ConnectionHandler::new(server_side, 8, Arc::clone(&signal)).unwrap();

        handler.shutdown();
        assert_eq!(handler.state(), ConnectionState::Disconnected);
        assert_eq!(signal.generation(), 1);

        handler.shutdown();
        assert_eq!(signal.generation(), 1);

        // The client sees the server side go away.
        client.set_read_timeout(Some(WAIT)).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(client.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_send_after_disconnect_is_silent() {
        let (_client, server_side) = socket_pair();
        let handler =
            ConnectionHandler::new(server_side, 8, Arc::new(DisconnectSignal::new())).unwrap();
        handler.shutdown();

        assert!(handler.send("late").is_ok());
        assert!(handler.send("way too long for eight").is_ok());
    }

    #[test]
    fn test_oversize_send_rejected_while_connected() {
        let (_client, server_side) = socket_pair();
        let handler =
            ConnectionHandler::new(server_side, 4, Arc::new(DisconnectSignal::new())).unwrap();

        let err = handler.send("too long").unwrap_err();
        assert!(err.is_send_error());
    }

    #[test]
    fn test_invalid_buffer_len() {
        let (_client, server_side) = socket_pair();
        let err = ConnectionHandler::new(server_side, 20000, Arc::new(DisconnectSignal::new()))
            .unwrap_err();
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_custom_frame_handler_and_username() {
        let (mut client, server_side) = socket_pair();
        let frame_handler = |conn: &Connection, frame: &[u8]| {
            conn.set_username(String::from_utf8_lossy(crate::protocol::trim_padding(frame)));
        };
        let handler = ConnectionHandler::with_handler(
            server_side,
            8,
            Arc::new(DisconnectSignal::new()),
            Arc::new(frame_handler),
            Arc::new(ConnectionStats::new()),
        )
        .unwrap();
        assert_eq!(handler.connection().username(), "");

        client.write_all(b"alice\0\0\0").unwrap();

        let deadline = std::time::Instant::now() + WAIT;
        while handler.connection().username().is_empty() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(handler.connection().username(), "alice");
    }
}
