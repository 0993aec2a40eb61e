//! Transport Session Identifier and the per-source peer table.
//!
//! Grounded on a per-peer registry keyed by a fixed-size session id with
//! dispatch methods for inbound protocol messages, adapted from an internal
//! shard-locked map to a single `RwLock` to match the literal "peers rwlock
//! (readers during lookup; writers when adding/removing peers)" contract.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::config::{self, DEFAULT_PEER_EXPIRY};
use crate::packet::header::Nla;
use crate::rxw::Rxw;
use crate::seq::Sqn;

/// Per-socket NAK timing/retry knobs a [`PeerTable`] hands to every [`Rxw`]
/// it creates, mirroring the values validated on `SocketOptions`.
#[derive(Debug, Clone, Copy)]
pub struct NakTiming {
    pub bo_ivl: Duration,
    pub rpt_ivl: Duration,
    pub rdata_ivl: Duration,
    pub ncf_retries: u8,
    pub data_retries: u8,
}

impl Default for NakTiming {
    fn default() -> Self {
        NakTiming {
            bo_ivl: config::DEFAULT_NAK_BO_IVL,
            rpt_ivl: config::DEFAULT_NAK_RPT_IVL,
            rdata_ivl: config::DEFAULT_NAK_RDATA_IVL,
            ncf_retries: config::DEFAULT_NAK_NCF_RETRIES,
            data_retries: config::DEFAULT_NAK_DATA_RETRIES,
        }
    }
}

/// Transport Session Identifier: six-byte Global Source Identifier plus the
/// source's 16-bit port. Equal-by-value; the peer table key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tsi {
    pub gsi: [u8; 6],
    pub source_port: u16,
}

impl Tsi {
    #[must_use]
    pub fn new(gsi: [u8; 6], source_port: u16) -> Self {
        Tsi { gsi, source_port }
    }
}

/// One-shot back-off state for an SPM-Request this socket may have sent (as
/// a receiver wanting a fresher SPM) or may be suppressing (if another
/// receiver on the group already requested one).
#[derive(Debug, Clone, Copy, Default)]
pub struct SpmrState {
    pub pending: bool,
    pub expiry: Option<Instant>,
}

/// Per-source state: created on the first valid SPM/DATA from a TSI not yet
/// seen by this socket.
pub struct Peer {
    pub tsi: Tsi,
    pub source_nla: Option<Nla>,
    pub group_nla: Option<Nla>,
    pub last_spm_sqn: Option<u32>,
    pub rxw: Rxw,
    pub spmr: SpmrState,
    pub last_heard: Instant,
    pub fin_received: bool,
}

impl Peer {
    #[must_use]
    pub fn new(tsi: Tsi, rxw_capacity: u32, nak_timing: NakTiming, now: Instant) -> Self {
        Peer {
            tsi,
            source_nla: None,
            group_nla: None,
            last_spm_sqn: None,
            rxw: Rxw::new(rxw_capacity).with_nak_timing(
                nak_timing.bo_ivl,
                nak_timing.rpt_ivl,
                nak_timing.rdata_ivl,
                nak_timing.ncf_retries,
                nak_timing.data_retries,
            ),
            spmr: SpmrState::default(),
            last_heard: now,
            fin_received: false,
        }
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_heard = now;
    }

    #[must_use]
    pub fn is_expired(&self, now: Instant, expiry: std::time::Duration) -> bool {
        now.duration_since(self.last_heard) >= expiry
    }

    /// Records a newly observed SPM sequence, returning whether it was
    /// actually newer (duplicate/old SPMs are otherwise ignored).
    #[must_use]
    pub fn note_spm_sqn(&mut self, sqn: u32) -> bool {
        match self.last_spm_sqn {
            Some(prev) if !Sqn::new(sqn).gt_circular(Sqn::new(prev)) => false,
            _ => {
                self.last_spm_sqn = Some(sqn);
                true
            }
        }
    }
}

/// The socket-wide mapping from TSI to peer state.
pub struct PeerTable {
    peers: RwLock<HashMap<Tsi, Peer>>,
    rxw_capacity: u32,
    peer_expiry: std::time::Duration,
    nak_timing: NakTiming,
}

impl PeerTable {
    #[must_use]
    pub fn new(rxw_capacity: u32) -> Self {
        PeerTable {
            peers: RwLock::new(HashMap::new()),
            rxw_capacity,
            peer_expiry: DEFAULT_PEER_EXPIRY,
            nak_timing: NakTiming::default(),
        }
    }

    /// Overrides the NAK timing every peer created from here on gets,
    /// mirroring the owning socket's configured options.
    #[must_use]
    pub fn with_nak_timing(mut self, nak_timing: NakTiming) -> Self {
        self.nak_timing = nak_timing;
        self
    }

    /// Runs `f` against the peer for `tsi`, creating it first if this is the
    /// first time this TSI has been seen.
    pub fn with_peer_or_create<R>(&self, tsi: Tsi, now: Instant, f: impl FnOnce(&mut Peer) -> R) -> R {
        {
            let mut peers = self.peers.write();
            peers
                .entry(tsi)
                .or_insert_with(|| Peer::new(tsi, self.rxw_capacity, self.nak_timing, now));
        }
        let mut peers = self.peers.write();
        let peer = peers.get_mut(&tsi).expect("just inserted");
        f(peer)
    }

    /// Runs `f` against the peer for `tsi` if one already exists.
    pub fn with_peer<R>(&self, tsi: &Tsi, f: impl FnOnce(&mut Peer) -> R) -> Option<R> {
        let mut peers = self.peers.write();
        peers.get_mut(tsi).map(f)
    }

    #[must_use]
    pub fn contains(&self, tsi: &Tsi) -> bool {
        self.peers.read().contains_key(tsi)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }

    /// Snapshot of every currently-known TSI, for callers that need to walk
    /// all peers (e.g. polling each one's NAK timers) without holding the
    /// table lock for the whole walk.
    #[must_use]
    pub fn tsis(&self) -> Vec<Tsi> {
        self.peers.read().keys().copied().collect()
    }

    /// Reclaims peers that haven't been heard from in `peer_expiry`.
    pub fn reap_expired(&self, now: Instant) -> Vec<Tsi> {
        let mut peers = self.peers.write();
        let expired: Vec<Tsi> = peers
            .iter()
            .filter(|(_, p)| p.is_expired(now, self.peer_expiry))
            .map(|(tsi, _)| *tsi)
            .collect();
        for tsi in &expired {
            peers.remove(tsi);
        }
        expired
    }

    pub fn remove(&self, tsi: &Tsi) {
        self.peers.write().remove(tsi);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn first_lookup_creates_peer() {
        let table = PeerTable::new(16);
        let tsi = Tsi::new([1, 2, 3, 4, 5, 6], 9000);
        assert!(!table.contains(&tsi));
        table.with_peer_or_create(tsi, Instant::now(), |p| {
            assert_eq!(p.tsi, tsi);
        });
        assert!(table.contains(&tsi));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn spm_sqn_only_advances_forward() {
        let mut peer = Peer::new(Tsi::new([0; 6], 1), 16, NakTiming::default(), Instant::now());
        assert!(peer.note_spm_sqn(5));
        assert!(!peer.note_spm_sqn(5));
        assert!(!peer.note_spm_sqn(3));
        assert!(peer.note_spm_sqn(10));
    }

    #[test]
    fn expired_peers_are_reaped() {
        let table = PeerTable::new(16);
        let tsi = Tsi::new([9; 6], 1);
        let t0 = Instant::now();
        table.with_peer_or_create(tsi, t0, |_| {});
        let later = t0 + Duration::from_secs(60);
        let expired = table.reap_expired(later);
        assert_eq!(expired, vec![tsi]);
        assert!(!table.contains(&tsi));
    }
}
