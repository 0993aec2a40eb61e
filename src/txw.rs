//! Transmit window (TXW): fixed-capacity ring of outgoing skbs plus the
//! retransmit FIFO and proactive-parity scheduling.
//!
//! Grounded on the ring-plus-FIFO-eviction shape of a writer-side history
//! cache: a `Mutex`-protected ring with capacity-bounded storage and a
//! dedicated dedup FIFO of pending retransmit work, rather than replaying
//! the whole history on every NAK.

use std::collections::{HashSet, VecDeque};

use parking_lot::Mutex;

use crate::seq::Sqn;
use crate::skb::SkbRef;

/// One pending retransmit request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RetransmitReq {
    pub sqn: Sqn,
    pub is_parity: bool,
}

struct Inner {
    capacity: usize,
    /// Contiguous storage indexed by `sqn as usize % capacity`.
    slots: Vec<Option<SkbRef>>,
    trail: Sqn,
    lead: Sqn,
    /// True until at least one skb has been added.
    defined: bool,
    retransmit_queue: VecDeque<RetransmitReq>,
    retransmit_set: HashSet<RetransmitReq>,
}

/// Fixed-capacity sequence-numbered ring of outgoing skbs. Mutating
/// operations require the source mutex to already be held by the caller
/// this type itself only adds the short internal lock needed
/// for the rare case where the rate-limited RDATA emitter and the send path
/// touch it from different call stacks within that same mutex-protected
/// region.
pub struct Txw {
    inner: Mutex<Inner>,
}

impl Txw {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Txw {
            inner: Mutex::new(Inner {
                capacity,
                slots: vec![None; capacity],
                trail: Sqn::new(0),
                lead: Sqn::new(0),
                defined: false,
                retransmit_queue: VecDeque::new(),
                retransmit_set: HashSet::new(),
            }),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    #[must_use]
    pub fn trail(&self) -> Sqn {
        self.inner.lock().trail
    }

    #[must_use]
    pub fn lead(&self) -> Sqn {
        self.inner.lock().lead
    }

    /// Stamps and stores `skb` at the next sequence number, advancing
    /// `lead`. If the ring is full, the oldest skb is silently dropped —
    /// the source is never blocked by its own retransmit buffer.
    pub fn add(&self, mut skb: SkbRef) -> Sqn {
        let mut inner = self.inner.lock();
        let sqn = if inner.defined {
            inner.lead.wrapping_add(1)
        } else {
            Sqn::new(0)
        };
        if let Some(s) = SkbRef::get_mut(&mut skb) {
            s.sequence = sqn;
        }
        let idx = (sqn.0 as usize) % inner.capacity;
        inner.slots[idx] = Some(skb);
        inner.lead = sqn;
        if !inner.defined {
            inner.trail = sqn;
            inner.defined = true;
        } else {
            // Ring full: advance trail past whatever we just overwrote.
            let len = sqn.diff(inner.trail) as u32 + 1;
            if len as usize > inner.capacity {
                inner.trail = inner.trail.wrapping_add(1);
            }
        }
        sqn
    }

    /// Looks up the skb stored for `sqn`, if it is still within
    /// `[trail, lead]` and the slot actually holds that sequence.
    #[must_use]
    pub fn get(&self, sqn: Sqn) -> Option<SkbRef> {
        let inner = self.inner.lock();
        if !inner.defined || sqn.lt_circular(inner.trail) || sqn.gt_circular(inner.lead) {
            return None;
        }
        let idx = (sqn.0 as usize) % inner.capacity;
        inner.slots[idx].as_ref().filter(|s| s.sequence == sqn).cloned()
    }

    /// Queues `sqn` for retransmission, coalescing duplicate requests.
    pub fn retransmit_push(&self, sqn: Sqn, is_parity: bool) {
        let mut inner = self.inner.lock();
        let req = RetransmitReq { sqn, is_parity };
        if inner.retransmit_set.insert(req) {
            inner.retransmit_queue.push_back(req);
        }
    }

    /// Peeks the next retransmit request without consuming it.
    #[must_use]
    pub fn retransmit_peek(&self) -> Option<RetransmitReq> {
        self.inner.lock().retransmit_queue.front().copied()
    }

    /// Pops and returns the next retransmit request.
    pub fn retransmit_pop(&self) -> Option<RetransmitReq> {
        let mut inner = self.inner.lock();
        let req = inner.retransmit_queue.pop_front()?;
        inner.retransmit_set.remove(&req);
        Some(req)
    }

    #[must_use]
    pub fn retransmit_pending(&self) -> usize {
        self.inner.lock().retransmit_queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skb::Skb;
    use std::sync::Arc;

    fn mkskb(payload: &[u8]) -> SkbRef {
        let mut skb = Skb::with_capacity(64);
        skb.put(payload);
        Arc::new(skb)
    }

    #[test]
    fn add_stamps_monotonic_sequence_numbers() {
        let txw = Txw::new(4);
        let s0 = txw.add(mkskb(b"a"));
        let s1 = txw.add(mkskb(b"b"));
        assert_eq!(s0.0, 0);
        assert_eq!(s1.0, 1);
        assert_eq!(txw.lead(), s1);
    }

    #[test]
    fn ring_drops_oldest_when_full() {
        let txw = Txw::new(2);
        let s0 = txw.add(mkskb(b"a"));
        let _s1 = txw.add(mkskb(b"b"));
        let _s2 = txw.add(mkskb(b"c"));
        assert!(txw.get(s0).is_none(), "oldest entry should have been evicted");
        assert_eq!(txw.trail().0, 1);
    }

    #[test]
    fn retransmit_queue_dedups() {
        let txw = Txw::new(8);
        txw.retransmit_push(Sqn::new(3), false);
        txw.retransmit_push(Sqn::new(3), false);
        assert_eq!(txw.retransmit_pending(), 1);
        let r = txw.retransmit_pop().unwrap();
        assert_eq!(r.sqn.0, 3);
        assert!(txw.retransmit_pop().is_none());
    }
}
