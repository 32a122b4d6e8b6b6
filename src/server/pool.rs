//! Connection Pool
//!
//! A bounded collection of connection slots. Slots are addressed by index,
//! reused in place once their occupant is Disconnected, and never removed
//! while the server runs, so the collection only grows to the high-water
//! mark of concurrently live connections.
//!
//! ```text
//!  max_connections = 3
//!
//!  [ C ][ C ][ C ]   full: accept loop waits
//!  [ C ][ D ][ C ]   slot 1 freed: admission resumes
//!  [ C ][ C ][ C ]   new connection reclaims slot 1
//! ```

use crate::error::{Error, Result};
use crate::server::handler::{Connection, ConnectionHandler, ConnectionState};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Pool-owned slots, each holding one connection handler.
#[derive(Debug)]
pub struct ConnectionPool {
    slots: Mutex<Vec<ConnectionHandler>>,
    max_connections: usize,
}

impl ConnectionPool {
    pub fn new(max_connections: usize) -> Self {
        Self {
            slots: Mutex::new(Vec::with_capacity(max_connections)),
            max_connections,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ConnectionHandler>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Number of slots, live or reclaimable.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Number of slots whose occupant is still Connected.
    pub fn live_count(&self) -> usize {
        self.lock()
            .iter()
            .filter(|h| h.state() == ConnectionState::Connected)
            .count()
    }

    /// Admission predicate: a free slot exists or one can be added.
    pub fn has_capacity(&self) -> bool {
        let slots = self.lock();
        slots.len() < self.max_connections
            || slots
                .iter()
                .any(|h| h.state() == ConnectionState::Disconnected)
    }

    /// Stores `handler` in the first Disconnected slot, or appends a new
    /// slot. Returns the slot index.
    ///
    /// The replaced handler is shut down after the pool lock is released.
    pub fn place(&self, handler: ConnectionHandler) -> usize {
        let mut slots = self.lock();
        let free = slots
            .iter()
            .position(|h| h.state() == ConnectionState::Disconnected);

        match free {
            Some(index) => {
                let previous = std::mem::replace(&mut slots[index], handler);
                drop(slots);
                previous.shutdown();
                index
            }
            None => {
                slots.push(handler);
                slots.len() - 1
            }
        }
    }

    /// Read-only access to the connection in slot `index`.
    pub fn get(&self, index: usize) -> Result<Arc<Connection>> {
        let slots = self.lock();
        slots
            .get(index)
            .map(|h| Arc::clone(h.connection()))
            .ok_or(Error::OutOfRange {
                index,
                len: slots.len(),
            })
    }

    /// Removes every slot and hands the handlers to the caller.
    pub fn drain(&self) -> Vec<ConnectionHandler> {
        std::mem::take(&mut *self.lock())
    }
}
