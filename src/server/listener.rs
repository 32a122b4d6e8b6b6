//! Server: Listener and Accept Loop
//!
//! Owns the listening socket and a [`ConnectionPool`]. One accept thread
//! admits clients while the pool has room and blocks while it is full:
//!
//! ```text
//!           ┌──────────────────────────────────────────────┐
//!           │                Accept Loop                    │
//!           │                                               │
//!           │  wait until stop || pool.has_capacity()  <────┼──── DisconnectSignal
//!           │        │                                      │     (fired by handlers)
//!           │        ▼                                      │
//!           │  accept()  ── idle ───> wait ACCEPT_POLL      │
//!           │            ── error ──> log, back off, retry  │
//!           │        │                                      │
//!           │        ▼                                      │
//!           │  ConnectionHandler::with_handler              │
//!           │        │                                      │
//!           │        ▼                                      │
//!           │  pool.place()  (reclaim or append)            │
//!           └──────────────────────────────────────────────┘
//! ```
//!
//! While full the server stops calling `accept()`, so extra clients wait in
//! the kernel backlog instead of being served. The listener is non-blocking
//! and idle waits sleep on the same signal, so `shutdown()` wakes the accept
//! thread directly.

use crate::config::{resolve, ServerConfig};
use crate::error::{Error, InitStage, Result};
use crate::server::dispatch::{EchoHandler, FrameHandler};
use crate::server::handler::{Connection, ConnectionHandler};
use crate::server::pool::ConnectionPool;
use crate::server::signal::DisconnectSignal;
use crate::server::stats::ConnectionStats;
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Upper bound on how long an idle accept loop sleeps before polling again.
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// State shared with the accept thread.
struct Shared {
    pool: ConnectionPool,
    signal: Arc<DisconnectSignal>,
    stop: AtomicBool,
    stats: Arc<ConnectionStats>,
    frame_handler: Arc<dyn FrameHandler>,
    buffer_len: usize,
}

/// A fixed-capacity framelink server.
pub struct Server {
    /// Address the listener is bound to
    local_addr: SocketAddr,

    /// The listener, until `run()` moves it to the accept thread
    listener: Mutex<Option<TcpListener>>,

    /// State shared with the accept thread
    shared: Arc<Shared>,

    /// Accept thread handle, taken when joined
    accept_thread: Mutex<Option<JoinHandle<()>>>,

    run_called: AtomicBool,
    shutdown_called: AtomicBool,
}

impl Server {
    /// Binds a listener on `host:port` that echoes every frame.
    ///
    /// # Arguments
    ///
    /// * `host` - Address to bind (e.g. "0.0.0.0")
    /// * `port` - Port as text ("0" picks a free port)
    /// * `max_connections` - Maximum concurrently served clients
    /// * `buffer_len` - Frame length for every connection, `1..=10240`
    pub fn new(host: &str, port: &str, max_connections: usize, buffer_len: usize) -> Result<Self> {
        Self::from_config(
            &ServerConfig::new(host, port)
                .with_max_connections(max_connections)
                .with_buffer_len(buffer_len),
        )
    }

    /// Binds a listener using a [`ServerConfig`] with the default [`EchoHandler`].
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        Self::with_handler(config, EchoHandler)
    }

    /// Binds a listener whose connections dispatch frames to `frame_handler`.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] for invalid settings, [`Error::Initialization`]
    /// if resolution or binding fails. Nothing stays bound on failure.
    pub fn with_handler<H: FrameHandler>(config: &ServerConfig, frame_handler: H) -> Result<Self> {
        config.validate()?;

        let addrs = resolve(&config.host, &config.port)?;
        let listener = TcpListener::bind(&addrs[..]).map_err(|e| {
            error!(address = %config.address(), error = %e, "Failed to bind listener");
            Error::init(InitStage::Bind, e)
        })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| Error::init(InitStage::Bind, e))?;

        info!(
            address = %local_addr,
            max_connections = config.max_connections,
            buffer_len = config.buffer_len,
            "Server listening"
        );

        Ok(Self {
            local_addr,
            listener: Mutex::new(Some(listener)),
            shared: Arc::new(Shared {
                pool: ConnectionPool::new(config.max_connections),
                signal: Arc::new(DisconnectSignal::new()),
                stop: AtomicBool::new(false),
                stats: Arc::new(ConnectionStats::new()),
                frame_handler: Arc::new(frame_handler),
                buffer_len: config.buffer_len,
            }),
            accept_thread: Mutex::new(None),
            run_called: AtomicBool::new(false),
            shutdown_called: AtomicBool::new(false),
        })
    }

    /// Starts the accept thread.
    ///
    /// Only the first call has an effect; calls after `shutdown()` do nothing.
    pub fn run(&self) -> Result<()> {
        if self.shutdown_called.load(Ordering::SeqCst) {
            debug!("run() after shutdown(), ignoring");
            return Ok(());
        }
        if self.run_called.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let Some(listener) = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return Ok(());
        };
        listener
            .set_nonblocking(true)
            .map_err(|e| Error::init(InitStage::Bind, e))?;

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("framelink-accept".to_string())
            .spawn(move || accept_loop(listener, shared))
            .map_err(|e| Error::init(InitStage::Spawn, e))?;

        *self
            .accept_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        info!(address = %self.local_addr, "Accepting connections");
        Ok(())
    }

    /// Stops accepting, disconnects every client and joins all threads.
    /// Safe to call multiple times.
    pub fn shutdown(&self) {
        if self.shutdown_called.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(address = %self.local_addr, "Shutting down server");

        self.shared.stop.store(true, Ordering::SeqCst);
        self.shared.signal.notify();

        // A listener run() never took is closed here; otherwise the accept
        // thread drops it once it sees the stop flag.
        let idle_listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(idle_listener);

        let handle = self
            .accept_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("Accept thread panicked");
            }
        }

        let handlers = self.shared.pool.drain();
        for handler in &handlers {
            handler.shutdown();
        }
        drop(handlers);

        info!(address = %self.local_addr, "Server shutdown complete");
    }

    /// Read-only view of the connection in slot `index`.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfRange`] if `index` is not a slot.
    pub fn get_connection(&self, index: usize) -> Result<Arc<Connection>> {
        self.shared.pool.get(index)
    }

    /// Alias of [`get_connection`](Self::get_connection).
    pub fn get_server_sock(&self, index: usize) -> Result<Arc<Connection>> {
        self.get_connection(index)
    }

    /// Number of slots in the pool (live or reclaimable).
    pub fn connection_count(&self) -> usize {
        self.shared.pool.len()
    }

    /// Number of slots whose client is still Connected.
    pub fn live_connections(&self) -> usize {
        self.shared.pool.live_count()
    }

    pub fn max_connections(&self) -> usize {
        self.shared.pool.max_connections()
    }

    pub fn buffer_len(&self) -> usize {
        self.shared.buffer_len
    }

    /// The bound address (useful when binding port "0").
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Connection statistics for this server.
    pub fn stats(&self) -> &ConnectionStats {
        &self.shared.stats
    }

    /// Returns true between `run()` and `shutdown()`.
    pub fn is_running(&self) -> bool {
        self.run_called.load(Ordering::SeqCst) && !self.shutdown_called.load(Ordering::SeqCst)
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr)
            .field("max_connections", &self.max_connections())
            .field("buffer_len", &self.shared.buffer_len)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// Main loop that accepts incoming connections
fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    loop {
        // Admission control: block while every slot is live.
        if !shared.pool.has_capacity() {
            debug!(max = shared.pool.max_connections(), "Pool full, waiting for a disconnect");
        }
        shared
            .signal
            .wait_until(|| shared.stop.load(Ordering::SeqCst) || shared.pool.has_capacity());

        if shared.stop.load(Ordering::SeqCst) {
            break;
        }

        let (stream, addr) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                idle(&shared);
                continue;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                if shared.stop.load(Ordering::SeqCst) {
                    break;
                }
                shared.stats.accept_failed();
                error!(error = %e, "Failed to accept connection");
                idle(&shared);
                continue;
            }
        };

        if shared.stop.load(Ordering::SeqCst) {
            drop(stream);
            break;
        }
        // Accepted sockets may inherit the listener's non-blocking mode.
        if let Err(e) = stream.set_nonblocking(false) {
            warn!(peer = %addr, error = %e, "Failed to set up connection");
            continue;
        }

        match ConnectionHandler::with_handler(
            stream,
            shared.buffer_len,
            Arc::clone(&shared.signal),
            Arc::clone(&shared.frame_handler),
            Arc::clone(&shared.stats),
        ) {
            Ok(handler) => {
                let slot = shared.pool.place(handler);
                debug!(peer = %addr, slot = slot, "Connection placed");
            }
            Err(e) => warn!(peer = %addr, error = %e, "Failed to set up connection"),
        }
    }
    debug!("Accept loop exited");
}

/// Sleeps until shutdown or for at most [`ACCEPT_POLL`].
fn idle(shared: &Shared) {
    shared
        .signal
        .wait_until_timeout(ACCEPT_POLL, || shared.stop.load(Ordering::SeqCst));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientConnection, ClientEvent};
    use crate::server::handler::ConnectionState;
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::time::Instant;

    const WAIT: Duration = Duration::from_secs(3);

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + WAIT;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        condition()
    }

    fn start(max_connections: usize, buffer_len: usize) -> Server {
        let server = Server::new("127.0.0.1", "0", max_connections, buffer_len).unwrap();
        server.run().unwrap();
        server
    }

    fn echo_roundtrip(stream: &mut TcpStream, buffer_len: usize, payload: &[u8]) -> Vec<u8> {
        let mut frame = payload.to_vec();
        frame.resize(buffer_len, 0);
        stream.write_all(&frame).unwrap();

        let mut echoed = vec![0u8; buffer_len];
        stream.read_exact(&mut echoed).unwrap();
        echoed
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = Server::new("127.0.0.1", "0", 3, 20000).unwrap_err();
        assert!(err.is_configuration_error());

        let err = Server::new("127.0.0.1", "0", 0, 16).unwrap_err();
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_bind_conflict_is_initialization_error() {
        let first = Server::new("127.0.0.1", "0", 1, 16).unwrap();
        let port = first.local_addr().port().to_string();

        let err = Server::new("127.0.0.1", &port, 1, 16).unwrap_err();
        assert!(err.is_initialization_error());
    }

    #[test]
    fn test_echo_with_client_connection() {
        let server = start(3, 16);
        let port = server.local_addr().port().to_string();

        let client = ClientConnection::connect("127.0.0.1", &port, 16).unwrap();
        client.run().unwrap();
        client.send("hello").unwrap();

        let queue = client.message_queue();
        let mut received = Vec::new();
        while received.len() < 16 {
            match queue.pop_timeout(WAIT) {
                Ok(ClientEvent::Received(data)) => received.extend_from_slice(&data),
                other => panic!("unexpected queue item: {other:?}"),
            }
        }
        assert_eq!(&received[..5], b"hello");
        assert!(received[5..].iter().all(|&b| b == 0));

        client.stop();
        server.shutdown();
    }

    #[test]
    fn test_admission_control_and_slot_reuse() {
        let server = start(2, 8);
        let addr = server.local_addr();

        let mut c1 = TcpStream::connect(addr).unwrap();
        let mut c2 = TcpStream::connect(addr).unwrap();
        c1.set_read_timeout(Some(WAIT)).unwrap();
        c2.set_read_timeout(Some(WAIT)).unwrap();
        assert!(wait_for(|| server.live_connections() == 2));
        assert_eq!(&echo_roundtrip(&mut c1, 8, b"one")[..3], b"one");
        assert_eq!(&echo_roundtrip(&mut c2, 8, b"two")[..3], b"two");

        // The third client sits in the backlog and gets no service.
        let mut c3 = TcpStream::connect(addr).unwrap();
        c3.write_all(b"three\0\0\0").unwrap();
        c3.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
        let mut buf = [0u8; 8];
        assert!(c3.read(&mut buf).is_err());
        assert_eq!(server.stats().accepted(), 2);
        assert_eq!(server.connection_count(), 2);

        // Freeing one slot admits the waiting client into that slot.
        drop(c1);
        assert!(wait_for(|| server.stats().accepted() == 3));
        assert!(wait_for(|| server.live_connections() == 2));
        assert_eq!(server.connection_count(), 2);
        assert_eq!(
            server.get_connection(0).unwrap().peer_addr(),
            c3.local_addr().unwrap()
        );

        c3.set_read_timeout(Some(WAIT)).unwrap();
        let mut echoed = [0u8; 8];
        c3.read_exact(&mut echoed).unwrap();
        assert_eq!(&echoed[..5], b"three");

        server.shutdown();
    }

    #[test]
    fn test_admission_resumes_after_repeated_disconnects() {
        let server = start(1, 8);
        let addr = server.local_addr();
        let mut current = TcpStream::connect(addr).unwrap();
        assert!(wait_for(|| server.live_connections() == 1));

        for round in 2..=20u64 {
            // The next client waits in the backlog while the only slot is live.
            let next = TcpStream::connect(addr).unwrap();
            drop(current);
            assert!(
                wait_for(|| server.stats().accepted() == round),
                "admission stalled in round {round}"
            );
            current = next;
        }

        assert!(wait_for(|| server.live_connections() == 1));
        assert_eq!(server.connection_count(), 1);
        drop(current);
        server.shutdown();
    }

    #[test]
    fn test_shutdown_of_idle_acceptor_is_prompt() {
        for host in ["127.0.0.1", "0.0.0.0"] {
            let server = Server::new(host, "0", 4, 8).unwrap();
            server.run().unwrap();
            thread::sleep(Duration::from_millis(100));

            let started = Instant::now();
            server.shutdown();
            assert!(started.elapsed() < Duration::from_millis(500), "slow shutdown on {host}");
            assert!(!server.is_running());
        }
    }

    #[test]
    fn test_get_connection() {
        let server = start(3, 8);
        let _client = TcpStream::connect(server.local_addr()).unwrap();
        assert!(wait_for(|| server.connection_count() == 1));

        let conn = server.get_connection(0).unwrap();
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert_eq!(conn.username(), "");
        assert_eq!(conn.buffer_len(), 8);

        assert!(server.get_server_sock(1).unwrap_err().is_range_error());
        server.shutdown();
    }

    #[test]
    fn test_shutdown_is_idempotent_and_disconnects_clients() {
        let server = start(3, 8);
        let mut client = TcpStream::connect(server.local_addr()).unwrap();
        assert!(wait_for(|| server.live_connections() == 1));
        let conn = server.get_connection(0).unwrap();

        server.shutdown();
        server.shutdown();

        assert!(!server.is_running());
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(server.connection_count(), 0);
        assert!(server.get_connection(0).unwrap_err().is_range_error());

        client.set_read_timeout(Some(WAIT)).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(client.read(&mut buf).unwrap(), 0);

        // The listener is gone.
        assert!(TcpStream::connect(server.local_addr()).is_err());
    }

    #[test]
    fn test_shutdown_while_pool_full() {
        let server = start(1, 8);
        let _c1 = TcpStream::connect(server.local_addr()).unwrap();
        assert!(wait_for(|| server.live_connections() == 1));

        let started = Instant::now();
        server.shutdown();
        assert!(started.elapsed() < WAIT);
    }

    #[test]
    fn test_shutdown_without_run_and_run_after_shutdown() {
        let server = Server::new("127.0.0.1", "0", 2, 8).unwrap();
        server.shutdown();
        server.run().unwrap();
        assert!(!server.is_running());
        assert!(TcpStream::connect(server.local_addr()).is_err());
    }

    #[test]
    fn test_custom_frame_handler() {
        let config = ServerConfig::new("127.0.0.1", "0").with_buffer_len(8);
        let server = Server::with_handler(&config, |conn: &Connection, frame: &[u8]| {
            let reply: Vec<u8> = frame.iter().map(|b| b.to_ascii_uppercase()).collect();
            let _ = conn.send(reply);
        })
        .unwrap();
        server.run().unwrap();

        let mut client = TcpStream::connect(server.local_addr()).unwrap();
        client.set_read_timeout(Some(WAIT)).unwrap();
        assert_eq!(&echo_roundtrip(&mut client, 8, b"shout")[..5], b"SHOUT");
    }
}
