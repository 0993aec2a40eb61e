//! Opt-in process-wide live-socket enumeration (`feature = "registry"`),
//! for administrative tooling that wants to enumerate live sockets.
//!
//! Grounded on the corpus' use of `dashmap` elsewhere for shared maps that
//! sit outside the socket lock hierarchy entirely — this registry is
//! intentionally not part of that hierarchy; it only ever holds a weak
//! handle used for best-effort enumeration (a dead entry is simply skipped).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;

use crate::socket::Socket;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide table of every live [`Socket`], keyed by a monotonically
/// assigned id.
pub struct Registry {
    sockets: DashMap<u64, Weak<Socket>>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Registry {
            sockets: DashMap::new(),
        }
    }

    /// Registers `socket`, returning the id it was assigned. The caller is
    /// responsible for calling [`unregister`](Self::unregister) when the
    /// socket closes; a dropped `Arc` with no matching unregister call is
    /// simply skipped the next time [`list`](Self::list) walks the table.
    pub fn register(&self, socket: &Arc<Socket>) -> u64 {
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        self.sockets.insert(id, Arc::downgrade(socket));
        id
    }

    pub fn unregister(&self, id: u64) {
        self.sockets.remove(&id);
    }

    /// Returns every still-live socket, pruning dead entries as it goes.
    pub fn list(&self) -> Vec<(u64, Arc<Socket>)> {
        let mut live = Vec::new();
        let mut dead = Vec::new();
        for entry in self.sockets.iter() {
            match entry.value().upgrade() {
                Some(s) => live.push((*entry.key(), s)),
                None => dead.push(*entry.key()),
            }
        }
        for id in dead {
            self.sockets.remove(&id);
        }
        live
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sockets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sockets.is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
