//! Process-wide connection roster and broadcast fan-out.
//!
//! The original design cross-wired every pair of connections; the hub
//! replaces that with a shared bus: joining is one roster insert, leaving is
//! one remove, and a broadcast is one pass over the roster. Fan-out is
//! exhaustive and unconditional — every peer other than the origin gets the
//! envelope queued, and each recipient applies its own subscription/monitor
//! filter when it drains its inbox.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, trace};

use chanrelay_frame::Envelope;

use crate::state::ConnState;

/// Opaque identity of a registered connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Delivery queue handed to a connection at registration.
pub type Inbox = mpsc::UnboundedReceiver<Envelope>;

struct Registrant {
    state: Arc<ConnState>,
    tx: mpsc::UnboundedSender<Envelope>,
}

/// The connection manager: roster of live connections plus the broadcast
/// router. Created once at startup and shared behind an [`Arc`].
#[derive(Default)]
pub struct Hub {
    roster: Mutex<HashMap<u64, Registrant>>,
    next_id: AtomicU64,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and wire it into the mesh.
    ///
    /// The returned [`Registration`] unregisters on drop, so teardown is
    /// tied to the connection task's lifetime no matter how it exits. The
    /// connection is reachable by broadcasts from the moment this returns.
    pub fn register(self: &Arc<Self>, state: Arc<ConnState>) -> (Registration, Inbox) {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut roster = self.roster.lock().expect("hub roster poisoned");
            roster.insert(id.0, Registrant { state, tx });
            debug!(%id, connections = roster.len(), "connection joined");
        }
        (
            Registration {
                id,
                hub: Arc::clone(self),
            },
            rx,
        )
    }

    /// Fan an envelope out to every connection other than the origin.
    ///
    /// Delivery to each recipient is a non-blocking enqueue; a recipient
    /// torn down mid-broadcast simply drops the message. The roster lock is
    /// held for the whole pass so a fan-out sees a consistent snapshot, and
    /// a single sender's successive broadcasts stay FIFO per recipient.
    pub fn broadcast(&self, origin: ConnectionId, envelope: &Envelope) {
        let roster = self.roster.lock().expect("hub roster poisoned");
        trace!(
            %origin,
            channel = %envelope.channel,
            cmd = %envelope.cmd,
            peers = roster.len().saturating_sub(1),
            "broadcast"
        );
        for (&id, registrant) in roster.iter() {
            if id == origin.0 {
                continue;
            }
            // Send failure means the receiver is mid-teardown; dropped, not
            // an error, and it must not abort delivery to the rest.
            let _ = registrant.tx.send(envelope.clone());
        }
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.roster.lock().expect("hub roster poisoned").len()
    }

    fn unregister(&self, id: ConnectionId) {
        let mut roster = self.roster.lock().expect("hub roster poisoned");
        roster.remove(&id.0);
        debug!(%id, connections = roster.len(), "connection left");
    }
}

/// Membership guard for a registered connection.
///
/// The narrow "unregister me" back-reference: connections hold this, never
/// the hub's roster, so ownership stays acyclic.
pub struct Registration {
    id: ConnectionId,
    hub: Arc<Hub>,
}

impl Registration {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.hub.unregister(self.id);
    }
}
