//! Queue Module
//!
//! Hand-off between a background receive thread and whichever thread the
//! owner uses to consume messages.
//!
//! ```text
//!  ┌──────────────┐  push   ┌───────────────┐  pop / pop_timeout / try_pop
//!  │ receive loop │───────> │ BlockingQueue │ ─────────────────────────────> consumer
//!  └──────────────┘         └───────────────┘
//! ```

pub mod blocking;

pub use blocking::{BlockingQueue, PopTimeoutError, TryPopError};
