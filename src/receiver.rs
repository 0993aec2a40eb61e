//! Receiver engine: per-TSI packet dispatch, peer lifecycle, and the
//! application-facing `recvmsg` drain.
//!
//! Grounded on a per-writer dispatch loop that classifies each inbound
//! submessage and routes it to the matching proxy's reader state, adapted
//! from RTPS's single-writer-per-proxy model (a reader only ever hears from
//! the one writer it matched) to PGM's any-peer-is-a-source model (a
//! receiver socket accepts data from any TSI that announces itself via SPM
//! or ODATA, creating peer state on demand).

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::notify::{Event, NotifyHub};
use crate::packet::header::{DataFields, Nla, NakFields, SpmFields};
use crate::packet::options::OptionChain;
use crate::packet::Body;
use crate::peer::{NakTiming, PeerTable, Tsi};
use crate::rs::RsEngine;
use crate::rxw::{AddResult, FecParams};
use crate::seq::Sqn;
use crate::skb::Skb;

pub struct Receiver {
    pub peers: PeerTable,
    /// Local ceiling on transmission-group size this socket is willing to
    /// decode FEC for; combined with a peer's advertised `OPT_PARITY_PRM`
    /// group size to build that peer's [`FecParams`].
    parity_n: Option<u8>,
}

impl Receiver {
    #[must_use]
    pub fn new(rxw_capacity: u32, parity_n: Option<u8>) -> Self {
        Receiver {
            peers: PeerTable::new(rxw_capacity),
            parity_n,
        }
    }

    /// Overrides the NAK timing every peer this receiver creates gets, per
    /// the owning socket's configured options.
    #[must_use]
    pub fn with_nak_timing(mut self, nak_timing: NakTiming) -> Self {
        self.peers = self.peers.with_nak_timing(nak_timing);
        self
    }

    /// Dispatches one parsed, already-checksum-verified packet that carries
    /// no TSDU of its own (SPM, NCF, SPMR). ODATA/RDATA go through
    /// [`on_data`](Self::on_data) directly instead, since those carry a
    /// borrowed TSDU slice the socket façade passes alongside.
    pub fn dispatch(&mut self, tsi: Tsi, src_nla: Nla, body: &Body, options: &OptionChain, now: Instant, notify: &NotifyHub) {
        match body {
            Body::Spm(f) => self.on_spm(tsi, src_nla, f, options, now, notify),
            Body::Ncf(f) => self.on_ncf(tsi, f, options, now),
            Body::Spmr => {
                self.peers.with_peer(&tsi, |peer| {
                    peer.touch(now);
                });
            }
            // NAK/NNAK/ACK/POLL/POLR/ODATA/RDATA are handled elsewhere.
            _ => {}
        }
    }

    /// Entry point for ODATA/RDATA, carrying the TSDU alongside its fixed
    /// header fields and the `OPT_FRAGMENT` hint parsed from its option
    /// chain, if any, so multi-fragment APDUs reassemble correctly.
    pub fn on_data(&mut self, tsi: Tsi, df: &DataFields, is_parity: bool, tsdu: &[u8], frag: Option<(u32, u32, u32)>, now: Instant, notify: &NotifyHub) {
        self.peers.with_peer_or_create(tsi, now, |peer| {
            peer.touch(now);
            let mut skb = Skb::from_vec(tsdu.to_vec());
            skb.sequence = Sqn::new(df.data_sqn);
            skb.control.is_parity = is_parity;
            skb.control.frag = frag;
            let bo_ivl = peer.rxw.nak_bo_ivl();
            let result = peer.rxw.add(Arc::new(skb), is_parity, now, bo_ivl);
            match result {
                AddResult::Appended | AddResult::Inserted | AddResult::Missing => {
                    notify.signal(Event::RecvSock);
                }
                AddResult::Malformed | AddResult::Bounds | AddResult::Duplicate => {}
            }
        });
    }

    fn on_spm(&mut self, tsi: Tsi, src_nla: Nla, f: &SpmFields, options: &OptionChain, now: Instant, notify: &NotifyHub) {
        self.peers.with_peer_or_create(tsi, now, |peer| {
            peer.touch(now);
            if !peer.note_spm_sqn(f.spm_sqn) {
                return;
            }
            peer.source_nla = Some(src_nla);
            peer.group_nla = Some(f.nla);

            if let Some((_, _, tgsize)) = options.parity_prm() {
                if let Some(n) = self.parity_n {
                    if tgsize > 0 && tgsize <= 255 && (tgsize as u32).is_power_of_two() {
                        peer.rxw.fec = Some(FecParams { n, k: tgsize as u8 });
                    }
                }
            }

            let bo_ivl = peer.rxw.nak_bo_ivl();
            let added = peer.rxw.update(Sqn::new(f.trail), Sqn::new(f.lead), now, bo_ivl);
            if added > 0 {
                notify.signal(Event::PendingSock);
            }
            if options.has_fin() {
                peer.fin_received = true;
            }
        });
    }

    fn on_ncf(&mut self, tsi: Tsi, f: &NakFields, options: &OptionChain, now: Instant) {
        self.peers.with_peer(&tsi, |peer| {
            peer.touch(now);
            let rdata_ivl = peer.rxw.nak_rdata_ivl();
            let bo_ivl = peer.rxw.nak_bo_ivl();
            peer.rxw.confirm(Sqn::new(f.requested_sqn), now, rdata_ivl, bo_ivl);
            if let Some(list) = options.nak_list() {
                for &sqn in list {
                    peer.rxw.confirm(Sqn::new(sqn), now, rdata_ivl, bo_ivl);
                }
            }
        });
    }

    /// Drains one peer's reassembled APDUs via `deliver`. Returns
    /// `(count, had_loss)`, or `(0, false)` if `tsi` is unknown.
    pub fn recvmsg(&mut self, tsi: &Tsi, rs: Option<&RsEngine>, deliver: impl FnMut(&[crate::skb::SkbRef])) -> (u32, bool) {
        self.peers
            .with_peer(tsi, |p| p.rxw.readv(rs, deliver))
            .unwrap_or((0, false))
    }

    /// Walks every peer's NAK timers, returning the (tsi, due-sqns) pairs
    /// the socket façade should turn into outbound NAKs.
    pub fn poll_all_timers(&mut self, now: Instant) -> Vec<(Tsi, Vec<Sqn>)> {
        let mut out = Vec::new();
        for tsi in self.peers.tsis() {
            if let Some(due) = self.peers.with_peer(&tsi, |p| p.rxw.poll_timers(now)) {
                if !due.is_empty() {
                    out.push((tsi, due));
                }
            }
        }
        out
    }

    /// Reclaims peers not heard from in `peer_expiry`.
    pub fn reap_expired(&mut self, now: Instant) -> Vec<Tsi> {
        self.peers.reap_expired(now)
    }
}
