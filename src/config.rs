//! Connection Configuration
//!
//! Plain configuration structs for both sides of a connection. They carry
//! defaults, builder-style setters and a `validate()` check that runs before
//! any socket is touched.
//!
//! ## Example
//!
//! ```
//! use framelink::config::{ClientConfig, ServerConfig};
//!
//! let client = ClientConfig::new("127.0.0.1", "5090").with_buffer_len(512);
//! assert!(client.validate().is_ok());
//!
//! let server = ServerConfig::default().with_max_connections(0);
//! assert!(server.validate().is_err());
//! ```

use crate::error::{Error, InitStage, Result};
use crate::protocol::{validate_buffer_len, DEFAULT_BUFFER_LEN};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};

/// The default host for both client and server
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// The default port/service
pub const DEFAULT_PORT: &str = "5090";

/// The default number of concurrently served clients
pub const DEFAULT_MAX_CONNECTIONS: usize = 3;

/// Settings for [`ClientConnection`](crate::client::ClientConnection).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Server address (textual IP or hostname)
    pub host: String,
    /// Server port as text
    pub port: String,
    /// Frame length for both send and receive
    pub buffer_len: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT.to_string(),
            buffer_len: DEFAULT_BUFFER_LEN,
        }
    }
}

impl ClientConfig {
    /// Creates a config targeting `host:port` with the default frame length.
    pub fn new(host: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: port.into(),
            ..Self::default()
        }
    }

    /// Set the frame length
    pub fn with_buffer_len(mut self, buffer_len: usize) -> Self {
        self.buffer_len = buffer_len;
        self
    }

    /// Returns `host:port` for display and logging.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Checks the settings without touching the network.
    pub fn validate(&self) -> Result<()> {
        validate_buffer_len(self.buffer_len)?;
        validate_endpoint(&self.host, &self.port)
    }
}

/// Settings for [`Server`](crate::server::Server).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to bind (e.g. "0.0.0.0")
    pub host: String,
    /// Port to listen on, as text
    pub port: String,
    /// Maximum simultaneously served clients
    pub max_connections: usize,
    /// Frame length for every accepted connection
    pub buffer_len: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT.to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            buffer_len: DEFAULT_BUFFER_LEN,
        }
    }
}

impl ServerConfig {
    /// Creates a config binding `host:port` with default capacity and frame length.
    pub fn new(host: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: port.into(),
            ..Self::default()
        }
    }

    /// Set the connection cap
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Set the frame length
    pub fn with_buffer_len(mut self, buffer_len: usize) -> Self {
        self.buffer_len = buffer_len;
        self
    }

    /// Returns `host:port` for display and logging.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Checks the settings without touching the network.
    pub fn validate(&self) -> Result<()> {
        validate_buffer_len(self.buffer_len)?;
        if self.max_connections == 0 {
            return Err(Error::Configuration(
                "max_connections must be at least 1".to_string(),
            ));
        }
        validate_endpoint(&self.host, &self.port)
    }
}

fn validate_endpoint(host: &str, port: &str) -> Result<()> {
    if host.trim().is_empty() {
        return Err(Error::Configuration("host must not be empty".to_string()));
    }
    if port.trim().is_empty() {
        return Err(Error::Configuration("port must not be empty".to_string()));
    }
    Ok(())
}

/// Resolves a textual host and port into candidate socket addresses.
pub(crate) fn resolve(host: &str, port: &str) -> Result<Vec<SocketAddr>> {
    let port: u16 = port.trim().parse().map_err(|_| {
        Error::init(
            InitStage::Resolve,
            io::Error::new(io::ErrorKind::InvalidInput, format!("invalid port {port:?}")),
        )
    })?;

    let addrs: Vec<SocketAddr> = (host.trim(), port)
        .to_socket_addrs()
        .map_err(|e| Error::init(InitStage::Resolve, e))?
        .collect();

    if addrs.is_empty() {
        return Err(Error::init(
            InitStage::Resolve,
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no addresses found for {host}:{port}"),
            ),
        ));
    }
    Ok(addrs)
}
