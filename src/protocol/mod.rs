//! Wire Protocol Module
//!
//! framelink speaks the simplest possible protocol: raw fixed-length frames.
//! See [`frame`] for the layout.

pub mod frame;

pub use frame::{encode, trim_padding, validate_buffer_len, DEFAULT_BUFFER_LEN, MAX_BUFFER_LEN};
