//! Client Module
//!
//! The client side of framelink: one outbound connection, one receive
//! thread, and a queue of [`ClientEvent`]s for the application.
//!
//! ## Example
//!
//! ```ignore
//! use framelink::client::{ClientConnection, ClientEvent};
//!
//! let client = ClientConnection::connect("127.0.0.1", "5090", 1024)?;
//! client.register_after_receive(|data| println!("got {} bytes", data.len()));
//! client.run()?;
//!
//! client.send("hello")?;
//!
//! let queue = client.message_queue();
//! while let Some(event) = queue.pop() {
//!     println!("{event}");
//!     if event.is_terminal() {
//!         break;
//!     }
//! }
//! client.stop();
//! ```

pub mod connection;
pub mod event;

pub use connection::ClientConnection;
pub use event::ClientEvent;
