//! Items delivered through a client's message queue.

use crate::protocol::trim_padding;
use bytes::Bytes;
use std::borrow::Cow;
use std::fmt;

/// One item popped from [`ClientConnection::message_queue`](super::ClientConnection::message_queue).
///
/// `Closed` and `Fault` are terminal: the receive loop has exited after
/// pushing either of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// The exact bytes returned by one read (not padded, 0 < len <= buffer_len)
    Received(Bytes),
    /// The server closed the connection
    Closed,
    /// A receive failure that was not caused by `stop()`
    Fault(String),
}

impl ClientEvent {
    /// Returns true for `Closed` and `Fault`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ClientEvent::Received(_))
    }

    /// Returns the received bytes, if this is a data item.
    pub fn payload(&self) -> Option<&Bytes> {
        match self {
            ClientEvent::Received(data) => Some(data),
            _ => None,
        }
    }

    /// Human-readable form: payload text without zero padding, or the notice.
    pub fn text(&self) -> Cow<'_, str> {
        match self {
            ClientEvent::Received(data) => String::from_utf8_lossy(trim_padding(data)),
            other => Cow::Owned(other.to_string()),
        }
    }
}

impl fmt::Display for ClientEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientEvent::Received(data) => {
                f.write_str(&String::from_utf8_lossy(trim_padding(data)))
            }
            ClientEvent::Closed => f.write_str("[Info] Connection closed by server"),
            ClientEvent::Fault(reason) => write!(f, "[Error] {reason}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_trims_padding() {
        let event = ClientEvent::Received(Bytes::from_static(b"hello\0\0\0"));
        assert_eq!(event.text(), "hello");
        assert_eq!(event.payload().unwrap().len(), 8);
        assert!(!event.is_terminal());
    }

    #[test]
    fn test_notices() {
        assert_eq!(
            ClientEvent::Closed.to_string(),
            "[Info] Connection closed by server"
        );
        let fault = ClientEvent::Fault("recv failed: reset".into());
        assert_eq!(fault.text(), "[Error] recv failed: reset");
        assert!(fault.is_terminal());
    }
}
