//! Fixed-Length Frames
//!
//! Every logical send writes exactly `buffer_len` bytes. There is no header,
//! no length field and no delimiter:
//!
//! ```text
//!  buffer_len = 8, payload = "hi"
//!
//!  ┌────┬────┬────┬────┬────┬────┬────┬────┐
//!  │ h  │ i  │ 00 │ 00 │ 00 │ 00 │ 00 │ 00 │
//!  └────┴────┴────┴────┴────┴────┴────┴────┘
//!   payload   └──────── zero padding ──────┘
//! ```
//!
//! Both peers must agree on `buffer_len` out-of-band. A mismatch shows up as
//! truncated payloads or trailing garbage, never as a protocol error.

use crate::error::{Error, Result};
use bytes::{BufMut, BytesMut};

/// Hard upper bound for a frame length.
pub const MAX_BUFFER_LEN: usize = 10240;

/// Frame length used when none is configured.
pub const DEFAULT_BUFFER_LEN: usize = 1024;

/// Checks that `buffer_len` lies in `1..=MAX_BUFFER_LEN`.
pub fn validate_buffer_len(buffer_len: usize) -> Result<usize> {
    if buffer_len == 0 {
        return Err(Error::Configuration(
            "message buffer length must be at least 1".to_string(),
        ));
    }
    if buffer_len > MAX_BUFFER_LEN {
        return Err(Error::Configuration(format!(
            "message buffer length must be <= {MAX_BUFFER_LEN}, got {buffer_len}"
        )));
    }
    Ok(buffer_len)
}

/// Builds one frame: the payload followed by zero padding up to `buffer_len`.
///
/// # Errors
///
/// Returns [`Error::Oversize`] if the payload is longer than `buffer_len`.
pub fn encode(payload: &[u8], buffer_len: usize) -> Result<BytesMut> {
    if payload.len() > buffer_len {
        return Err(Error::Oversize {
            len: payload.len(),
            buffer_len,
        });
    }

    let mut frame = BytesMut::with_capacity(buffer_len);
    frame.put_slice(payload);
    frame.put_bytes(0, buffer_len - payload.len());
    Ok(frame)
}

/// Returns `data` without its trailing zero padding.
pub fn trim_padding(data: &[u8]) -> &[u8] {
    let end = data
        .iter()
        .rposition(|&b| b != 0)
        .map(|i| i + 1)
        .unwrap_or(0);
    &data[..end]
}
