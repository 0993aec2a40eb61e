//! Source engine: fragmentation, ODATA/RDATA/SPM/NCF emission, proactive
//! FEC parity generation, and the PGMCC/rate-limiter send gate.
//!
//! Grounded on a writer-side retransmit handler that distinguishes a
//! cache-hit retransmit from a cache-miss path, generalized to add PGM's
//! NCF-before-RDATA step (the corpus' reliability layer has no NCF
//! equivalent — a NAK there goes straight to resend).
//!
//! This module only ever produces serialized wire bytes; it knows nothing
//! about sockets. [`crate::socket`] drives it and does the actual I/O.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::checksum;
use crate::config::*;
use crate::congestion::Pgmcc;
use crate::error::{Error, Result};
use crate::packet::header::{DataFields, Nla, NakFields};
use crate::packet::options::Opt;
use crate::packet::{Builder, BuilderBody};
use crate::rate::RateController;
use crate::rs::RsEngine;
use crate::seq::{SeqNumGenerator, Sqn};
use crate::skb::Skb;
use crate::timer::SpmTimer;
use crate::txw::Txw;

/// Optional proactive forward error correction: after every `k` originals in
/// a transmission group this source computes `n - k` parity packets and
/// transmits them unprompted, ahead of any NAK.
pub struct ProactiveFec {
    pub rs: RsEngine,
    tg_buffer: Vec<Vec<u8>>,
}

impl ProactiveFec {
    #[must_use]
    pub fn new(rs: RsEngine) -> Self {
        ProactiveFec {
            rs,
            tg_buffer: Vec::new(),
        }
    }
}

/// In-flight multi-fragment send, kept across `send` calls that returned
/// `RateLimited`/`Congestion` partway through so the caller can retry
/// without re-fragmenting from scratch.
struct PendingSend {
    data: Vec<u8>,
    next_offset: usize,
    apdu_first_sqn: Option<u32>,
}

pub struct Source {
    gsi: [u8; 6],
    src_port: u16,
    dst_port: u16,
    group_nla: Nla,
    spm_seq: SeqNumGenerator,
    pub txw: Txw,
    rate: RateController,
    pgmcc: Option<Pgmcc>,
    spm_timer: SpmTimer,
    max_tsdu: usize,
    fec: Option<ProactiveFec>,
    pending: Option<PendingSend>,
}

impl Source {
    #[must_use]
    pub fn new(
        gsi: [u8; 6],
        src_port: u16,
        dst_port: u16,
        group_nla: Nla,
        txw_capacity: usize,
        max_rate_bps: u32,
        rate_capacity_bytes: u32,
        ambient_spm_ivl: Duration,
        now: Instant,
    ) -> Self {
        Source {
            gsi,
            src_port,
            dst_port,
            group_nla,
            spm_seq: SeqNumGenerator::new(),
            txw: Txw::new(txw_capacity),
            rate: RateController::new(max_rate_bps, rate_capacity_bytes, now),
            pgmcc: None,
            spm_timer: SpmTimer::new(
                vec![IHB_MIN, IHB_MIN * 2, IHB_MIN * 4, IHB_MIN * 8],
                ambient_spm_ivl,
                now,
            ),
            max_tsdu: DEFAULT_MAX_TSDU,
            fec: None,
            pending: None,
        }
    }

    pub fn enable_pgmcc(&mut self, initial_cwnd: i64, ssthresh: i64) {
        self.pgmcc = Some(Pgmcc::new(initial_cwnd, ssthresh));
    }

    pub fn enable_proactive_fec(&mut self, rs: RsEngine) {
        self.fec = Some(ProactiveFec::new(rs));
    }

    #[must_use]
    pub fn next_spm_due(&self) -> Instant {
        self.spm_timer.next_due()
    }

    /// Fragments and transmits `data`, returning each serialized packet in
    /// wire order (originals, then any parity this send completed). Blocks
    /// on nothing; a `RateLimited`/`Congestion` error leaves already-queued
    /// fragments sent and the remainder cached for the next call.
    pub fn send(&mut self, data: &[u8], now: Instant) -> Result<Vec<Vec<u8>>> {
        if self.pending.is_none() {
            if data.is_empty() || data.len() > MAX_APDU {
                return Err(Error::InvalidOption("send length"));
            }
            self.pending = Some(PendingSend {
                data: data.to_vec(),
                next_offset: 0,
                apdu_first_sqn: None,
            });
        }
        self.drain_pending(now)
    }

    fn drain_pending(&mut self, now: Instant) -> Result<Vec<Vec<u8>>> {
        let mut out = Vec::new();
        loop {
            let (chunk, total_len, frag_off, is_multi) = {
                let Some(p) = &self.pending else { break };
                let total = p.data.len();
                if p.next_offset >= total {
                    break;
                }
                let end = (p.next_offset + self.max_tsdu).min(total);
                (
                    p.data[p.next_offset..end].to_vec(),
                    total as u32,
                    p.next_offset as u32,
                    total > self.max_tsdu,
                )
            };

            if let Some(pgmcc) = &self.pgmcc {
                if !pgmcc.can_send() {
                    return Err(Error::Congestion(chunk.len()));
                }
            }
            if let Err(deficit) = self.rate.try_send(chunk.len(), false, now) {
                return Err(Error::RateLimited(deficit));
            }

            let sqn = self.push_original(&chunk);
            let apdu_first_sqn = {
                let p = self.pending.as_mut().unwrap();
                if p.apdu_first_sqn.is_none() {
                    p.apdu_first_sqn = Some(sqn.0);
                }
                p.apdu_first_sqn.unwrap()
            };
            let opts = if is_multi {
                vec![Opt::Fragment {
                    apdu_first_sqn,
                    apdu_frag_off: frag_off,
                    apdu_len: total_len,
                }]
            } else {
                vec![]
            };
            let wire = self.build_odata(sqn, &opts, false);
            out.push(wire);

            if let Some(pgmcc) = &mut self.pgmcc {
                pgmcc.on_transmit();
            }
            self.spm_timer.on_data_sent(now);

            let parity = self.maybe_emit_parity(&chunk, now)?;
            out.extend(parity);

            let p = self.pending.as_mut().unwrap();
            p.next_offset += chunk.len();
        }
        self.pending = None;
        Ok(out)
    }

    fn push_original(&mut self, chunk: &[u8]) -> Sqn {
        let unfolded = checksum::unfolded_sum(chunk, 0);
        let mut skb = Skb::with_capacity(chunk.len());
        skb.put(chunk);
        skb.control.unfolded_checksum = Some(unfolded);
        skb.control.data_len = chunk.len();
        self.txw.add(Arc::new(skb))
    }

    fn build_odata(&self, sqn: Sqn, opts: &[Opt], is_parity: bool) -> Vec<u8> {
        let skb = self.txw.get(sqn).expect("just added");
        let builder = Builder {
            src_port: self.src_port,
            dst_port: self.dst_port,
            gsi: self.gsi,
            body: BuilderBody::Odata(
                DataFields {
                    data_sqn: sqn.0,
                    data_trail: self.txw.trail().0,
                },
                skb.payload(),
            ),
            opts: opts.to_vec(),
            is_parity,
            is_var_pktlen: false,
            cached_tsdu_unfolded: skb.control.unfolded_checksum,
        };
        let mut wire = Vec::new();
        builder.write(&mut wire);
        wire
    }

    /// Buffers `chunk` for the current transmission group; once `k` originals
    /// have accumulated, computes and transmits `n - k` parity packets.
    fn maybe_emit_parity(&mut self, chunk: &[u8], now: Instant) -> Result<Vec<Vec<u8>>> {
        let Some(fec) = &mut self.fec else { return Ok(Vec::new()) };
        fec.tg_buffer.push(chunk.to_vec());
        let k = fec.rs.k() as usize;
        if fec.tg_buffer.len() < k {
            return Ok(Vec::new());
        }
        let refs: Vec<&[u8]> = fec.tg_buffer.iter().map(|v| v.as_slice()).collect();
        let parity = fec.rs.encode(&refs);
        fec.tg_buffer.clear();

        let mut out = Vec::new();
        for p in parity {
            if let Some(pgmcc) = &self.pgmcc {
                if !pgmcc.can_send() {
                    return Err(Error::Congestion(p.len()));
                }
            }
            if let Err(deficit) = self.rate.try_send(p.len(), true, now) {
                return Err(Error::RateLimited(deficit));
            }
            let unfolded = checksum::unfolded_sum(&p, 0);
            let mut skb = Skb::with_capacity(p.len());
            skb.put(&p);
            skb.control.unfolded_checksum = Some(unfolded);
            skb.control.is_parity = true;
            let sqn = self.txw.add(Arc::new(skb));
            out.push(self.build_odata(sqn, &[], true));
            if let Some(pgmcc) = &mut self.pgmcc {
                pgmcc.on_transmit();
            }
        }
        self.spm_timer.on_data_sent(now);
        Ok(out)
    }

    /// Builds an ambient/heartbeat SPM advertising the current window.
    pub fn send_spm(&mut self, now: Instant) -> Vec<u8> {
        let sqn = self.spm_seq.next();
        let builder = Builder {
            src_port: self.src_port,
            dst_port: self.dst_port,
            gsi: self.gsi,
            body: BuilderBody::Spm(crate::packet::header::SpmFields {
                spm_sqn: sqn.0,
                trail: self.txw.trail().0,
                lead: self.txw.lead().0,
                nla: self.group_nla,
            }),
            opts: vec![],
            is_parity: false,
            is_var_pktlen: false,
            cached_tsdu_unfolded: None,
        };
        let mut wire = Vec::new();
        builder.write(&mut wire);
        self.spm_timer.on_spm_sent(now);
        wire
    }

    /// Handles an inbound NAK: enqueues the retransmit and immediately
    /// returns the confirming NCF immediately, ahead of the RDATA itself.
    pub fn on_nak(&mut self, requested_sqn: Sqn, is_parity: bool, source_nla: Nla, group_nla: Nla) -> Vec<u8> {
        self.txw.retransmit_push(requested_sqn, is_parity);
        let builder = Builder {
            src_port: self.src_port,
            dst_port: self.dst_port,
            gsi: self.gsi,
            body: BuilderBody::Ncf(NakFields {
                requested_sqn: requested_sqn.0,
                source_nla,
                group_nla,
            }),
            opts: vec![],
            is_parity: false,
            is_var_pktlen: false,
            cached_tsdu_unfolded: None,
        };
        let mut wire = Vec::new();
        builder.write(&mut wire);
        wire
    }

    /// Feeds an inbound ACK to the PGMCC controller, if enabled. Returns
    /// `true` if there was a controller to feed (the caller uses this to
    /// decide whether an `Ack` readiness event is worth signaling).
    pub fn on_ack(&mut self, ack_rx_max: Sqn, ack_bitmap: u32) -> bool {
        let Some(pgmcc) = &mut self.pgmcc else { return false };
        pgmcc.on_ack(ack_rx_max, ack_bitmap);
        true
    }

    /// Pops one pending retransmit and, rate permitting, serializes it as
    /// RDATA using the cached unfolded checksum. Returns `Ok(None)` if
    /// nothing is queued, `Err(RateLimited)` if the head of queue is blocked
    /// (left in place for the next call).
    pub fn on_deferred_nak(&mut self, now: Instant) -> Result<Option<Vec<u8>>> {
        let Some(req) = self.txw.retransmit_peek() else { return Ok(None) };
        let Some(skb) = self.txw.get(req.sqn) else {
            self.txw.retransmit_pop();
            return Ok(None);
        };
        if let Err(deficit) = self.rate.try_send(skb.len(), req.is_parity, now) {
            return Err(Error::RateLimited(deficit));
        }
        self.txw.retransmit_pop();
        let builder = Builder {
            src_port: self.src_port,
            dst_port: self.dst_port,
            gsi: self.gsi,
            body: BuilderBody::Rdata(
                DataFields {
                    data_sqn: req.sqn.0,
                    data_trail: self.txw.trail().0,
                },
                skb.payload(),
            ),
            opts: vec![],
            is_parity: req.is_parity,
            is_var_pktlen: false,
            cached_tsdu_unfolded: skb.control.unfolded_checksum,
        };
        let mut wire = Vec::new();
        builder.write(&mut wire);
        self.spm_timer.on_data_sent(now);
        Ok(Some(wire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_source() -> Source {
        Source::new(
            [1, 2, 3, 4, 5, 6],
            1000,
            2000,
            Nla::V4([239, 1, 1, 1]),
            64,
            10_000_000,
            1_000_000,
            DEFAULT_AMBIENT_SPM,
            Instant::now(),
        )
    }

    #[test]
    fn single_fragment_send_produces_one_odata_packet() {
        let mut src = new_source();
        let now = Instant::now();
        let packets = src.send(b"hello, pgm!", now).unwrap();
        assert_eq!(packets.len(), 1);
        let parsed = crate::packet::parse_udp_encap(&packets[0]).unwrap();
        assert_eq!(parsed.tsdu, b"hello, pgm!");
    }

    #[test]
    fn large_send_fragments_across_multiple_packets() {
        let mut src = new_source();
        src.max_tsdu = 16;
        let now = Instant::now();
        let data = vec![0xABu8; 40];
        let packets = src.send(&data, now).unwrap();
        assert_eq!(packets.len(), 3);
        for p in &packets {
            let parsed = crate::packet::parse_udp_encap(p).unwrap();
            assert!(parsed.options.fragment().is_some());
        }
    }

    #[test]
    fn nak_enqueues_retransmit_and_emits_ncf() {
        let mut src = new_source();
        let now = Instant::now();
        let packets = src.send(b"x", now).unwrap();
        let parsed = crate::packet::parse_udp_encap(&packets[0]).unwrap();
        let sqn = match parsed.body {
            crate::packet::Body::Odata(f) => Sqn::new(f.data_sqn),
            _ => panic!("expected odata"),
        };
        let nla = Nla::V4([0, 0, 0, 0]);
        let ncf = src.on_nak(sqn, false, nla, nla);
        let parsed_ncf = crate::packet::parse_udp_encap(&ncf).unwrap();
        assert!(matches!(parsed_ncf.body, crate::packet::Body::Ncf(_)));
        assert_eq!(src.txw.retransmit_pending(), 1);

        let rdata = src.on_deferred_nak(now).unwrap().unwrap();
        let parsed_rdata = crate::packet::parse_udp_encap(&rdata).unwrap();
        assert_eq!(parsed_rdata.tsdu, b"x");
        assert_eq!(src.txw.retransmit_pending(), 0);
    }

    #[test]
    fn pgmcc_withholds_tokens_until_acked() {
        let mut src = new_source();
        src.enable_pgmcc(1, 8);
        let now = Instant::now();
        src.send(b"a", now).unwrap();
        let err = src.send(b"b", now).unwrap_err();
        assert!(matches!(err, Error::Congestion(_)));
    }

    #[test]
    fn ack_replenishes_tokens_once_pgmcc_enabled() {
        let mut src = new_source();
        src.enable_pgmcc(1, 8);
        let now = Instant::now();
        src.send(b"a", now).unwrap();
        assert!(matches!(src.send(b"b", now), Err(Error::Congestion(_))));
        assert!(src.on_ack(Sqn::new(0), 0xffff_ffff));
        src.send(b"b", now).unwrap();
    }

    #[test]
    fn proactive_fec_emits_parity_after_k_originals() {
        let mut src = new_source();
        src.enable_proactive_fec(RsEngine::new(4, 2));
        let now = Instant::now();
        let p1 = src.send(b"aaaaaaaa", now).unwrap();
        assert_eq!(p1.len(), 1);
        let p2 = src.send(b"bbbbbbbb", now).unwrap();
        // Second original completes the k=2 group: one original + two parity.
        assert_eq!(p2.len(), 3);
    }
}
