//! Error Types
//!
//! Every synchronous failure in framelink is reported through [`Error`].
//! Failures that happen on a background receive thread are never returned
//! from here; they surface as queue items (client side) or as a state
//! transition plus signal (server side).
//!
//! ## Taxonomy
//!
//! | Kind           | Variants                      | Raised by                      |
//! |----------------|-------------------------------|--------------------------------|
//! | Configuration  | `Configuration`               | constructors, `validate()`     |
//! | Initialization | `Initialization`              | constructors, `run()`          |
//! | Send           | `Oversize`, `Send`            | `send()`                       |
//! | Range          | `OutOfRange`                  | index-based accessors          |

use std::any::Any;
use std::fmt;
use std::io;
use thiserror::Error;

/// Result type for framelink operations
pub type Result<T> = std::result::Result<T, Error>;

/// The setup step that failed while acquiring a platform resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStage {
    /// Address/service resolution
    Resolve,
    /// Outbound connect
    Connect,
    /// Listener bind + listen
    Bind,
    /// Socket duplication or background thread start
    Spawn,
}

impl fmt::Display for InitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            InitStage::Resolve => "resolve address",
            InitStage::Connect => "connect",
            InitStage::Bind => "bind listener",
            InitStage::Spawn => "start receive thread",
        };
        f.write_str(stage)
    }
}

/// Errors returned by framelink operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid constructor arguments (buffer length out of range, etc.)
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A socket or thread could not be set up
    #[error("initialization failed: could not {stage}: {source}")]
    Initialization {
        stage: InitStage,
        #[source]
        source: io::Error,
    },

    /// The payload does not fit in one frame
    #[error("message too large: {len} bytes exceeds frame length {buffer_len}")]
    Oversize { len: usize, buffer_len: usize },

    /// The socket write failed
    #[error("send failed: {0}")]
    Send(#[source] io::Error),

    /// Index-based accessor out of bounds
    #[error("connection index {index} out of range (len {len})")]
    OutOfRange { index: usize, len: usize },
}

impl Error {
    pub(crate) fn init(stage: InitStage, source: io::Error) -> Self {
        Error::Initialization { stage, source }
    }

    /// Check if the error came from invalid configuration
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, Error::Configuration(_))
    }

    /// Check if the error came from socket or thread setup
    pub fn is_initialization_error(&self) -> bool {
        matches!(self, Error::Initialization { .. })
    }

    /// Check if the error was raised by a send (oversize or write failure)
    pub fn is_send_error(&self) -> bool {
        matches!(self, Error::Oversize { .. } | Error::Send(_))
    }

    /// Check if the error is an out-of-range access
    pub fn is_range_error(&self) -> bool {
        matches!(self, Error::OutOfRange { .. })
    }
}

/// Extracts a readable message from a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(Error::Configuration("x".into()).is_configuration_error());
        assert!(Error::Oversize { len: 5, buffer_len: 4 }.is_send_error());
        assert!(Error::Send(io::Error::from(io::ErrorKind::BrokenPipe)).is_send_error());
        assert!(Error::OutOfRange { index: 3, len: 1 }.is_range_error());
        assert!(
            Error::init(InitStage::Bind, io::Error::from(io::ErrorKind::AddrInUse))
                .is_initialization_error()
        );
        assert!(!Error::OutOfRange { index: 0, len: 0 }.is_send_error());
    }

    #[test]
    fn test_error_display() {
        let err = Error::Oversize {
            len: 2048,
            buffer_len: 1024,
        };
        assert_eq!(
            err.to_string(),
            "message too large: 2048 bytes exceeds frame length 1024"
        );

        let err = Error::OutOfRange { index: 4, len: 2 };
        assert_eq!(err.to_string(), "connection index 4 out of range (len 2)");

        let err = Error::init(
            InitStage::Connect,
            io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        );
        assert_eq!(
            err.to_string(),
            "initialization failed: could not connect: refused"
        );
    }
}
