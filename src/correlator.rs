//! Matching responses to in-flight requests.
//!
//! Every outgoing request registers its id in a shared table and gets back a
//! [`PendingReply`]. The read loop hands incoming responses to
//! [`RequestCorrelator::on_packet_received`], which removes the entry and
//! completes the waiting caller.
//!
//! An entry leaves the table exactly once, through one of:
//! - a matching response (resolved)
//! - the caller's deadline passing while it waits (`Timeout`)
//! - [`PendingReply::cancel`] or dropping the reply (`Cancelled`)
//! - [`RequestCorrelator::close`] on teardown (`Disconnected`)
//!
//! Whichever path removes the entry decides the outcome. A response that
//! arrives after its entry is gone is dropped and logged.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{Result, RoutewireError};
use crate::protocol::RawPacket;

type Outcome = Result<RawPacket>;

struct PendingEntry {
    /// Distinguishes this registration from a later one reusing the id.
    serial: u64,
    tx: oneshot::Sender<Outcome>,
}

struct Table {
    pending: HashMap<u32, PendingEntry>,
    next_serial: u64,
    closed: bool,
}

struct Shared {
    table: Mutex<Table>,
    max_pending: usize,
}

impl Shared {
    /// Remove the entry for `id` only if it still belongs to `serial`.
    fn take(&self, id: u32, serial: u64) -> Option<PendingEntry> {
        let mut table = self.table.lock();
        match table.pending.get(&id) {
            Some(entry) if entry.serial == serial => table.pending.remove(&id),
            _ => None,
        }
    }
}

/// Table of requests waiting for a response on one connection.
#[derive(Clone)]
pub struct RequestCorrelator {
    shared: Arc<Shared>,
}

impl RequestCorrelator {
    /// Create a correlator that allows at most `max_pending` requests in flight.
    pub fn new(max_pending: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                table: Mutex::new(Table {
                    pending: HashMap::new(),
                    next_serial: 0,
                    closed: false,
                }),
                max_pending: max_pending.max(1),
            }),
        }
    }

    /// Register a request id before its packet is sent.
    ///
    /// # Errors
    ///
    /// - `Disconnected` once [`close`](Self::close) has run
    /// - `DuplicateId` if a request with this id is still pending
    /// - `PendingTableFull` when `max_pending` requests are in flight
    pub fn register(&self, id: u32) -> Result<PendingReply> {
        let mut table = self.shared.table.lock();

        if table.closed {
            return Err(RoutewireError::Disconnected);
        }
        if table.pending.contains_key(&id) {
            return Err(RoutewireError::DuplicateId(id));
        }
        if table.pending.len() >= self.shared.max_pending {
            tracing::warn!(
                pending = table.pending.len(),
                "pending request table is full"
            );
            return Err(RoutewireError::PendingTableFull(self.shared.max_pending));
        }

        let serial = table.next_serial;
        table.next_serial = table.next_serial.wrapping_add(1);

        let (tx, rx) = oneshot::channel();
        table.pending.insert(id, PendingEntry { serial, tx });

        Ok(PendingReply {
            id,
            serial,
            rx: Some(rx),
            shared: self.shared.clone(),
        })
    }

    /// Route a response to the request waiting for it.
    ///
    /// Returns `true` if a pending request was resolved. Non-response
    /// packets and responses with no matching entry return `false`.
    pub fn on_packet_received(&self, packet: RawPacket) -> bool {
        if !packet.header.is_response() {
            return false;
        }

        let id = packet.id();
        let entry = self.shared.table.lock().pending.remove(&id);
        match entry {
            Some(entry) => {
                // The receiver may have been dropped in the meantime.
                let _ = entry.tx.send(Ok(packet));
                true
            }
            None => {
                tracing::debug!(id, "dropping response with no pending request");
                false
            }
        }
    }

    /// Fail every pending request with `Disconnected` and refuse new ones.
    ///
    /// Returns the number of requests that were drained.
    pub fn close(&self) -> usize {
        let drained: Vec<PendingEntry> = {
            let mut table = self.shared.table.lock();
            table.closed = true;
            table.pending.drain().map(|(_, entry)| entry).collect()
        };

        let count = drained.len();
        for entry in drained {
            let _ = entry.tx.send(Err(RoutewireError::Disconnected));
        }
        if count > 0 {
            tracing::debug!(count, "drained pending requests on close");
        }
        count
    }

    /// True once [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.shared.table.lock().closed
    }

    /// Number of requests currently waiting.
    pub fn pending_count(&self) -> usize {
        self.shared.table.lock().pending.len()
    }

    /// True if a request with this id is waiting.
    pub fn is_pending(&self, id: u32) -> bool {
        self.shared.table.lock().pending.contains_key(&id)
    }
}

/// Handle to one registered request.
///
/// Dropping it before it resolves cancels the request.
pub struct PendingReply {
    id: u32,
    serial: u64,
    /// `None` once an outcome has been taken.
    rx: Option<oneshot::Receiver<Outcome>>,
    shared: Arc<Shared>,
}

impl PendingReply {
    /// Correlation id this reply is waiting on.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Wait for the response, failing with `Timeout` after `timeout`.
    ///
    /// A timed-out entry is removed from the table, so a response arriving
    /// later is dropped without touching any other request.
    pub async fn wait(mut self, timeout: Duration) -> Result<RawPacket> {
        let rx = match self.rx.as_mut() {
            Some(rx) => rx,
            None => return Err(RoutewireError::Cancelled),
        };

        let outcome = match tokio::time::timeout(timeout, &mut *rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(RoutewireError::Disconnected),
            Err(_) => {
                if self.shared.take(self.id, self.serial).is_some() {
                    tracing::debug!(id = self.id, "request timed out");
                    Err(RoutewireError::Timeout)
                } else {
                    // Another path removed the entry and is about to send on
                    // (or drop) the sender; the wait is bounded.
                    match rx.await {
                        Ok(outcome) => outcome,
                        Err(_) => Err(RoutewireError::Disconnected),
                    }
                }
            }
        };

        self.rx = None;
        outcome
    }

    /// Cancel the request if it is still pending.
    ///
    /// A later [`wait`](Self::wait) returns `Cancelled`. Returns `false` if
    /// the request had already been resolved.
    pub fn cancel(&self) -> bool {
        match self.shared.take(self.id, self.serial) {
            Some(entry) => {
                let _ = entry.tx.send(Err(RoutewireError::Cancelled));
                true
            }
            None => false,
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        if self.rx.is_some() {
            self.shared.take(self.id, self.serial);
        }
    }
}

impl std::fmt::Debug for PendingReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingReply")
            .field("id", &self.id)
            .field("resolved", &self.rx.is_none())
            .finish()
    }
}
