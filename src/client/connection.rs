//! Client Connection
//!
//! Owns one outbound TCP socket. Sends happen synchronously on the caller's
//! thread; a single background thread reads frames and pushes them into a
//! [`BlockingQueue`] that the application drains at its own pace.
//!
//! ## Lifecycle
//!
//! ```text
//! 1. connect()        resolve + connect, fail fast on bad config
//!        │
//!        ▼
//! 2. run()            start the receive thread
//!        │
//!        ▼
//! 3. ┌──────────────────────────────────────┐
//!    │  Receive Loop                        │
//!    │                                      │
//!    │  read(buffer_len) ──> n > 0  push Received, run after-receive callbacks
//!    │                   ──> n == 0 push Closed, exit
//!    │                   ──> error  push Fault (unless stopping), exit
//!    └──────────────────────────────────────┘
//!        │
//!        ▼
//! 4. stop() / drop    set stop flag, shut the socket down, close the
//!                     queue, join the receive thread
//! ```

use crate::client::event::ClientEvent;
use crate::config::{resolve, ClientConfig};
use crate::error::{panic_message, Error, InitStage, Result};
use crate::protocol::encode;
use crate::queue::BlockingQueue;
use bytes::Bytes;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, trace, warn};

type AfterSend = Arc<dyn Fn() + Send + Sync>;
type AfterReceive = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Copies the registry so callbacks run without its lock held.
fn snapshot<C: Clone>(registry: &RwLock<Vec<C>>) -> Vec<C> {
    registry
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// State shared with the receive thread.
struct Shared {
    /// Inbound items for the application
    queue: Arc<BlockingQueue<ClientEvent>>,
    /// Set once by `stop()`
    stop: AtomicBool,
    /// Invoked after every successful read, in registration order
    after_receive: RwLock<Vec<AfterReceive>>,
}

/// A connection to one framelink server.
pub struct ClientConnection {
    /// Socket used for writes and for forcing the reader out of `read`
    stream: TcpStream,

    /// Server address actually connected to
    peer_addr: SocketAddr,

    /// Frame length for send and receive
    buffer_len: usize,

    /// State shared with the receive thread
    shared: Arc<Shared>,

    /// Invoked after every successful send, in registration order
    after_send: RwLock<Vec<AfterSend>>,

    /// Serializes writers so frames never interleave on the wire
    send_lock: Mutex<()>,

    /// Set by the first `run()`
    started: AtomicBool,

    /// Receive thread handle, taken when joined
    recv_thread: Mutex<Option<JoinHandle<()>>>,
}

impl ClientConnection {
    /// Connects to `host:port` using frames of `buffer_len` bytes.
    ///
    /// # Arguments
    ///
    /// * `host` - Server IP address or hostname
    /// * `port` - Server port as text
    /// * `buffer_len` - Frame length, `1..=10240`
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] for an out-of-range `buffer_len` (checked
    /// before any socket work), [`Error::Initialization`] if resolution or
    /// connect fails.
    pub fn connect(host: &str, port: &str, buffer_len: usize) -> Result<Self> {
        Self::from_config(&ClientConfig::new(host, port).with_buffer_len(buffer_len))
    }

    /// Connects using a [`ClientConfig`].
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        config.validate()?;

        let addrs = resolve(&config.host, &config.port)?;
        let mut last_err = None;
        let mut connected = None;
        for addr in addrs {
            match TcpStream::connect(addr) {
                Ok(stream) => {
                    connected = Some((stream, addr));
                    break;
                }
                Err(e) => {
                    debug!(server = %addr, error = %e, "Connect attempt failed");
                    last_err = Some(e);
                }
            }
        }

        let (stream, peer_addr) = match connected {
            Some(c) => c,
            None => {
                let err = last_err
                    .unwrap_or_else(|| io::Error::from(io::ErrorKind::AddrNotAvailable));
                error!(server = %config.address(), error = %err, "Failed to connect");
                return Err(Error::init(InitStage::Connect, err));
            }
        };

        info!(server = %peer_addr, buffer_len = config.buffer_len, "Connected to server");

        Ok(Self {
            stream,
            peer_addr,
            buffer_len: config.buffer_len,
            shared: Arc::new(Shared {
                queue: Arc::new(BlockingQueue::new()),
                stop: AtomicBool::new(false),
                after_receive: RwLock::new(Vec::new()),
            }),
            after_send: RwLock::new(Vec::new()),
            send_lock: Mutex::new(()),
            started: AtomicBool::new(false),
            recv_thread: Mutex::new(None),
        })
    }

    /// Starts the background receive thread.
    ///
    /// Only the first call starts a thread; later calls are ignored.
    pub fn run(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!(server = %self.peer_addr, "run() called more than once, ignoring");
            return Ok(());
        }
        if self.is_stopped() {
            debug!(server = %self.peer_addr, "run() after stop(), not starting receiver");
            return Ok(());
        }

        let reader = self
            .stream
            .try_clone()
            .map_err(|e| Error::init(InitStage::Spawn, e))?;
        let shared = Arc::clone(&self.shared);
        let buffer_len = self.buffer_len;
        let peer = self.peer_addr;

        let handle = thread::Builder::new()
            .name(format!("framelink-recv-{peer}"))
            .spawn(move || receive_loop(reader, shared, buffer_len, peer))
            .map_err(|e| Error::init(InitStage::Spawn, e))?;

        *self
            .recv_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    /// Stops the connection. Idempotent.
    ///
    /// Sets the stop flag, shuts the socket down (which unblocks a pending
    /// read), closes the message queue and joins the receive thread.
    /// Items already queued remain poppable.
    pub fn stop(&self) {
        if !self.shared.stop.swap(true, Ordering::SeqCst) {
            if let Err(e) = self.stream.shutdown(Shutdown::Both) {
                if e.kind() != io::ErrorKind::NotConnected {
                    debug!(server = %self.peer_addr, error = %e, "Socket shutdown failed");
                }
            }
            self.shared.queue.shutdown();
            info!(server = %self.peer_addr, "Client connection stopped");
        }

        let handle = self
            .recv_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            // A callback calling stop() runs on the receive thread itself.
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!(server = %self.peer_addr, "Receive thread panicked");
            }
        }
    }

    /// Sends one frame: `payload` zero-padded to `buffer_len` bytes.
    ///
    /// After the write completes every after-send callback runs on this
    /// thread, in registration order.
    ///
    /// # Errors
    ///
    /// [`Error::Oversize`] if `payload` is longer than `buffer_len` (nothing
    /// is written), [`Error::Send`] if the connection is stopped or the
    /// write fails.
    pub fn send(&self, payload: impl AsRef<[u8]>) -> Result<()> {
        let payload = payload.as_ref();
        let frame = encode(payload, self.buffer_len).inspect_err(|e| {
            warn!(server = %self.peer_addr, error = %e, "Rejected outgoing message");
        })?;

        if self.is_stopped() {
            return Err(Error::Send(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection is stopped",
            )));
        }

        {
            let _guard = self.send_lock.lock().unwrap_or_else(PoisonError::into_inner);
            let mut writer = &self.stream;
            writer.write_all(&frame).map_err(|e| {
                warn!(server = %self.peer_addr, error = %e, "Send failed");
                Error::Send(e)
            })?;
        }
        trace!(
            server = %self.peer_addr,
            payload = payload.len(),
            bytes = frame.len(),
            "Sent frame"
        );

        for callback in snapshot(&self.after_send) {
            callback();
        }
        Ok(())
    }

    /// Registers a callback run after each successful send.
    ///
    /// Callbacks may register further callbacks; those run from the next send.
    pub fn register_after_send<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.after_send
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(callback));
    }

    /// Registers a callback run on the receive thread after each read,
    /// with the bytes that were read.
    pub fn register_after_receive<F>(&self, callback: F)
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.shared
            .after_receive
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(callback));
    }

    /// The inbound message queue.
    pub fn message_queue(&self) -> Arc<BlockingQueue<ClientEvent>> {
        Arc::clone(&self.shared.queue)
    }

    /// Frame length in bytes.
    pub fn buffer_len(&self) -> usize {
        self.buffer_len
    }

    /// Address of the connected server.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Local address of the socket.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.stream.local_addr()
    }

    /// Returns true once `stop()` has been called.
    pub fn is_stopped(&self) -> bool {
        self.shared.stop.load(Ordering::SeqCst)
    }

    /// Returns true while the receive thread is alive.
    pub fn is_running(&self) -> bool {
        self.recv_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for ClientConnection {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("peer_addr", &self.peer_addr)
            .field("buffer_len", &self.buffer_len)
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}

/// Body of the receive thread. Never lets a panic escape.
fn receive_loop(mut reader: TcpStream, shared: Arc<Shared>, buffer_len: usize, peer: SocketAddr) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        read_frames(&mut reader, &shared, buffer_len, peer)
    }));

    if let Err(payload) = outcome {
        let reason = panic_message(payload.as_ref());
        error!(server = %peer, reason = %reason, "Receive loop panicked");
        shared
            .queue
            .push(ClientEvent::Fault(format!("receive loop panicked: {reason}")));
    }
    debug!(server = %peer, "Receive thread exiting");
}

fn read_frames(reader: &mut TcpStream, shared: &Shared, buffer_len: usize, peer: SocketAddr) {
    let mut buffer = vec![0u8; buffer_len];

    while !shared.stop.load(Ordering::SeqCst) {
        match reader.read(&mut buffer) {
            Ok(0) => {
                if shared.stop.load(Ordering::SeqCst) {
                    break;
                }
                info!(server = %peer, "Connection closed by server");
                shared.queue.push(ClientEvent::Closed);
                break;
            }
            Ok(n) => {
                let data = Bytes::copy_from_slice(&buffer[..n]);
                trace!(server = %peer, bytes = n, "Received data");
                shared.queue.push(ClientEvent::Received(data.clone()));

                for callback in snapshot(&shared.after_receive) {
                    callback(&data);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                if shared.stop.load(Ordering::SeqCst) {
                    break;
                }
                warn!(server = %peer, error = %e, "Receive failed");
                shared
                    .queue
                    .push(ClientEvent::Fault(format!("recv failed: {e}")));
                break;
            }
        }
    }
}
