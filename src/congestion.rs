//! PGMCC congestion control. Off by default.
//!
//! Grounded on a cwnd halve-on-congestion / additive-increase controller
//! shape and an RTT-based peer scoring pattern, generalized to PGMCC's
//! `rtt^2 * loss_rate` ACKer-selection score and its token/cwnd/ssthresh
//! fixed-point state machine.

use crate::packet::header::Nla;
use crate::seq::Sqn;

/// 8-bit fixed-point value (`value / 256.0`), used for `tokens`, `cwnd`, and
/// `ssthresh` the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Fp8(pub i64);

impl Fp8 {
    #[must_use]
    pub fn from_int(v: i64) -> Self {
        Fp8(v << 8)
    }

    #[must_use]
    pub fn to_int(self) -> i64 {
        self.0 >> 8
    }

    #[must_use]
    pub fn half(self) -> Self {
        Fp8(self.0 / 2)
    }

    #[must_use]
    pub fn add(self, other: Fp8) -> Self {
        Fp8(self.0 + other.0)
    }

    #[must_use]
    pub fn sub(self, other: Fp8) -> Self {
        Fp8((self.0 - other.0).max(0))
    }

    #[must_use]
    pub fn min(self, other: Fp8) -> Self {
        Fp8(self.0.min(other.0))
    }

    #[must_use]
    pub fn is_below_one(self) -> bool {
        self.0 < 256
    }
}

/// Per-peer congestion feedback used to select the current ACKer: the peer
/// reporting the highest `rtt^2 * loss_rate` score unseats the incumbent.
#[derive(Debug, Clone, Copy)]
pub struct PeerScore {
    pub nla: Nla,
    pub rtt_ms: u32,
    pub loss_rate_milli: u32, // loss rate scaled by 1000
}

impl PeerScore {
    #[must_use]
    pub fn score(&self) -> u64 {
        (self.rtt_ms as u64).saturating_mul(self.rtt_ms as u64).saturating_mul(self.loss_rate_milli as u64)
    }
}

/// PGMCC's source-side congestion state.
pub struct Pgmcc {
    pub tokens: Fp8,
    pub cwnd: Fp8,
    pub ssthresh: Fp8,
    pub ack_bitmap: u32,
    pub ack_rx_max: Sqn,
    pub acker_nla: Option<Nla>,
    pub acker_score: u64,
    pub suspended_sqn: Option<Sqn>,
    pub is_congested: bool,
    consecutive_full_acks: u8,
}

impl Pgmcc {
    #[must_use]
    pub fn new(initial_cwnd: i64, ssthresh: i64) -> Self {
        Pgmcc {
            tokens: Fp8::from_int(initial_cwnd),
            cwnd: Fp8::from_int(initial_cwnd),
            ssthresh: Fp8::from_int(ssthresh),
            ack_bitmap: 0,
            ack_rx_max: Sqn::new(0),
            acker_nla: None,
            acker_score: 0,
            suspended_sqn: None,
            is_congested: false,
            consecutive_full_acks: 0,
        }
    }

    /// Whether a send is currently permitted (`tokens >= 1`).
    #[must_use]
    pub fn can_send(&self) -> bool {
        !self.tokens.is_below_one()
    }

    /// Called after every successful ODATA/RDATA transmission.
    pub fn on_transmit(&mut self) {
        self.tokens = self.tokens.sub(Fp8(256));
    }

    /// Considers feedback from `score` as a candidate new ACKer; replaces
    /// the incumbent if its loss score is strictly higher.
    pub fn consider_acker(&mut self, candidate: PeerScore) {
        let s = candidate.score();
        if self.acker_nla.is_none() || s > self.acker_score {
            self.acker_nla = Some(candidate.nla);
            self.acker_score = s;
        }
    }

    /// Processes an ACK from the current ACKer: `ack_rx_max`/`ack_bitmap` as
    /// carried on the wire.
    pub fn on_ack(&mut self, new_ack_rx_max: Sqn, new_bitmap: u32) {
        let delta = new_ack_rx_max.diff(self.ack_rx_max);
        let shifted = if delta > 0 && delta < 32 {
            self.ack_bitmap << delta
        } else if delta >= 32 {
            0
        } else {
            self.ack_bitmap
        };
        let combined = shifted | new_bitmap;
        let new_acks = (combined.count_ones() as i64 - (self.ack_bitmap.count_ones() as i64)).max(0);
        self.ack_bitmap = combined;
        self.ack_rx_max = new_ack_rx_max;

        if combined == 0xffff_ffff {
            self.consecutive_full_acks = self.consecutive_full_acks.saturating_add(1);
        } else {
            self.consecutive_full_acks = 0;
        }

        if self.is_congested {
            if let Some(susp) = self.suspended_sqn {
                if self.ack_rx_max.gt_circular(susp) {
                    self.is_congested = false;
                    self.suspended_sqn = None;
                }
            }
            if self.is_congested {
                let cwnd_int = self.cwnd.to_int().max(1);
                let increment = Fp8((new_acks * 256 + new_acks * 256 / cwnd_int).max(0));
                self.tokens = self.tokens.add(increment).min(self.cwnd);
            }
            return;
        }

        if self.consecutive_full_acks == 0 && new_acks == 0 {
            // no unacked-bit-starvation tracked here directly; congestion
            // detection (3-ack rule) happens in `maybe_detect_congestion`.
        }

        if self.cwnd.0 < self.ssthresh.0 {
            // Slow start: double cwnd.
            self.cwnd = self.cwnd.add(self.cwnd).min(Fp8::from_int(1 << 20));
        } else {
            let cwnd_int = self.cwnd.to_int().max(1);
            self.cwnd = self.cwnd.add(Fp8((new_acks * 256 / cwnd_int).max(0)));
        }
        self.tokens = self.tokens.add(Fp8(new_acks * 256)).min(self.cwnd);
    }

    /// Call after 3 consecutive ACKs with no new unacked bits covered while
    /// loss was already observed: enters congestion state.
    pub fn detect_congestion(&mut self) {
        self.cwnd = self.cwnd.half();
        self.tokens = self.tokens.sub(self.cwnd);
        self.suspended_sqn = Some(self.ack_rx_max);
        self.is_congested = true;
        self.ack_bitmap = 0xffff_ffff;
    }
}
