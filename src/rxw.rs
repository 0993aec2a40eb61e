//! Receive window (RXW): per-peer sequence ring with the NAK back-off/
//! repair/data state machine, APDU reassembly, and FEC-assisted recovery.
//!
//! Grounded on the NAK-coalescing IDLE→PENDING→RETRY state machine (back-off
//! window, exponential retry with a retry cap falling through to "declare
//! lost") and the contiguous/forward-jump/out-of-order gap classification on
//! packet arrival, both generalized to PGM's richer entry-state set: PGM
//! additionally distinguishes "NAK sent, unconfirmed" from "confirmed,
//! awaiting retransmit" (there is no NCF equivalent upstream) and recovers
//! data via Reed–Solomon parity rather than treating a gap as permanent loss.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::config::{MAX_APDU, MAX_WINDOW_LEN, PGM_MAX_FRAGMENTS};
use crate::rs::RsEngine;
use crate::seq::Sqn;
use crate::skb::SkbRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    BackOff,
    WaitNcf,
    WaitData,
    HaveData,
    HaveParity,
    CommitData,
    LostData,
}

struct Entry {
    state: EntryState,
    skb: Option<SkbRef>,
    timer_expiry: Instant,
    nak_transmit_count: u32,
    ncf_retry_count: u8,
    data_retry_count: u8,
}

impl Entry {
    fn placeholder(now: Instant, expiry: Instant) -> Self {
        Entry {
            state: EntryState::BackOff,
            skb: None,
            timer_expiry: expiry,
            nak_transmit_count: 0,
            ncf_retry_count: 0,
            data_retry_count: 0,
        }
        .touched(now)
    }

    fn touched(self, _now: Instant) -> Self {
        self
    }
}

/// Result of [`Rxw::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddResult {
    Inserted,
    Appended,
    Missing,
    Duplicate,
    Malformed,
    Bounds,
}

/// Result of [`Rxw::confirm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmResult {
    Updated,
    Duplicate,
    Appended,
    Bounds,
}

/// Forward-error-correction parameters currently in effect for this window,
/// updated on receipt of `OPT_PARITY_PRM` from a peer's SPM.
#[derive(Debug, Clone, Copy)]
pub struct FecParams {
    pub n: u8,
    pub k: u8,
}

pub struct Rxw {
    capacity: u32,
    slots: Vec<Option<Entry>>,

    defined: bool,
    trail: Sqn,
    commit_lead: Sqn,
    lead: Sqn,

    /// Trail value advertised by the source's TXW, tracked independently of
    /// our own `trail` until it first advances past `rxw_trail_init`.
    rxw_trail: Sqn,
    rxw_trail_init: Sqn,
    constrained: bool,

    back_off_q: VecDeque<Sqn>,
    wait_ncf_q: VecDeque<Sqn>,
    wait_data_q: VecDeque<Sqn>,

    /// MSB = `lead`; a zero bit means that sequence is known lost.
    loss_bitmap: u32,
    /// Fixed-point [0, 1] EMA of data loss (scaled to 16 bits: 65535 == 1.0).
    data_loss_ema: u16,
    ack_c_p_milli: u32, // alpha scaled by 1000 for integer arithmetic

    pub fec: Option<FecParams>,
    pub cumulative_losses: u64,
    /// Set whenever [`Self::drop_trail`] force-evicts a not-yet-committed
    /// entry (the slow-consumer path); consumed by the next [`Self::readv`]
    /// call so the application sees a loss notification even though no
    /// individual entry ever passed through `LostData`.
    loss_pending: bool,

    nak_bo_ivl: Duration,
    nak_rpt_ivl: Duration,
    nak_rdata_ivl: Duration,
    nak_ncf_retries: u8,
    nak_data_retries: u8,
}

impl Rxw {
    #[must_use]
    pub fn new(capacity: u32) -> Self {
        assert!(capacity >= 1 && capacity <= MAX_WINDOW_LEN);
        Rxw {
            capacity,
            slots: (0..capacity).map(|_| None).collect(),
            defined: false,
            trail: Sqn::new(0),
            commit_lead: Sqn::new(0),
            lead: Sqn::new(0),
            rxw_trail: Sqn::new(0),
            rxw_trail_init: Sqn::new(0),
            constrained: true,
            back_off_q: VecDeque::new(),
            wait_ncf_q: VecDeque::new(),
            wait_data_q: VecDeque::new(),
            loss_bitmap: 0xffff_ffff,
            data_loss_ema: 0,
            ack_c_p_milli: 500,
            fec: None,
            cumulative_losses: 0,
            loss_pending: false,
            nak_bo_ivl: crate::config::DEFAULT_NAK_BO_IVL,
            nak_rpt_ivl: crate::config::DEFAULT_NAK_RPT_IVL,
            nak_rdata_ivl: crate::config::DEFAULT_NAK_RDATA_IVL,
            nak_ncf_retries: crate::config::DEFAULT_NAK_NCF_RETRIES,
            nak_data_retries: crate::config::DEFAULT_NAK_DATA_RETRIES,
        }
    }

    /// Overrides the NAK back-off/repeat/retransmit timing and retry caps
    /// this window uses in place of the crate-wide defaults `new` starts
    /// with, per a socket's configured options.
    #[must_use]
    pub fn with_nak_timing(mut self, bo_ivl: Duration, rpt_ivl: Duration, rdata_ivl: Duration, ncf_retries: u8, data_retries: u8) -> Self {
        self.nak_bo_ivl = bo_ivl;
        self.nak_rpt_ivl = rpt_ivl;
        self.nak_rdata_ivl = rdata_ivl;
        self.nak_ncf_retries = ncf_retries;
        self.nak_data_retries = data_retries;
        self
    }

    #[must_use]
    pub fn trail(&self) -> Sqn {
        self.trail
    }
    #[must_use]
    pub fn commit_lead(&self) -> Sqn {
        self.commit_lead
    }
    #[must_use]
    pub fn lead(&self) -> Sqn {
        self.lead
    }
    #[must_use]
    pub fn is_defined(&self) -> bool {
        self.defined
    }
    #[must_use]
    pub fn nak_bo_ivl(&self) -> Duration {
        self.nak_bo_ivl
    }
    #[must_use]
    pub fn nak_rdata_ivl(&self) -> Duration {
        self.nak_rdata_ivl
    }

    fn idx(&self, sqn: Sqn) -> usize {
        (sqn.0 % self.capacity) as usize
    }

    fn window_len(&self) -> u32 {
        if !self.defined {
            0
        } else {
            (self.lead.diff(self.trail) as u32).saturating_add(1)
        }
    }

    /// Drops the trail entry to make room, as a slow-consumer fallback.
    fn drop_trail(&mut self) {
        let idx = self.idx(self.trail);
        self.slots[idx] = None;
        self.trail = self.trail.wrapping_add(1);
        if self.commit_lead.lt_circular(self.trail) {
            self.commit_lead = self.trail;
        }
        self.cumulative_losses += 1;
        self.loss_pending = true;
    }

    fn commit_region_empty(&self) -> bool {
        self.trail == self.commit_lead
    }

    /// Inserts `skb` carrying PGM sequence `skb.sequence` (already stamped
    /// by the caller from the parsed packet) as either an original or parity
    /// member. `is_parity` mirrors `OPT_PARITY` on the wire.
    pub fn add(&mut self, skb: SkbRef, is_parity: bool, now: Instant, nak_rb_expiry: Duration) -> AddResult {
        let sqn = skb.sequence;

        if !self.defined {
            self.lead = sqn.wrapping_sub(1);
            self.trail = sqn;
            self.commit_lead = sqn;
            self.rxw_trail = sqn;
            self.rxw_trail_init = sqn;
            self.constrained = true;
            self.defined = true;
        }

        if sqn.diff(self.trail) as u32 >= MAX_WINDOW_LEN {
            return AddResult::Bounds;
        }

        if sqn == self.lead.wrapping_add(1) {
            // Append path.
            if self.window_len() >= self.capacity {
                if self.commit_region_empty() {
                    self.drop_trail();
                } else {
                    return AddResult::Bounds;
                }
            }
            let idx = self.idx(sqn);
            self.slots[idx] = Some(Entry {
                state: if is_parity { EntryState::HaveParity } else { EntryState::HaveData },
                skb: Some(skb),
                timer_expiry: now,
                nak_transmit_count: 0,
                ncf_retry_count: 0,
                data_retry_count: 0,
            });
            self.lead = sqn;
            self.mark_bit_received();
            return AddResult::Appended;
        }

        if sqn.le_circular(self.lead) && sqn.ge_circular(self.commit_lead) {
            let idx = self.idx(sqn);
            let occupied_with_data = matches!(
                self.slots[idx].as_ref().map(|e| e.state),
                Some(EntryState::HaveData) | Some(EntryState::HaveParity) | Some(EntryState::CommitData)
            );
            if occupied_with_data {
                return AddResult::Duplicate;
            }
            self.slots[idx] = Some(Entry {
                state: if is_parity { EntryState::HaveParity } else { EntryState::HaveData },
                skb: Some(skb),
                timer_expiry: now,
                nak_transmit_count: 0,
                ncf_retry_count: 0,
                data_retry_count: 0,
            });
            return AddResult::Inserted;
        }

        if sqn.gt_circular(self.lead.wrapping_add(1)) {
            // Gap path: fill [lead+1, sqn-1] with back-off placeholders.
            let mut s = self.lead.wrapping_add(1);
            while s.lt_circular(sqn) {
                if self.window_len() >= self.capacity {
                    if self.commit_region_empty() {
                        self.drop_trail();
                    } else {
                        return AddResult::Bounds;
                    }
                }
                let idx = self.idx(s);
                self.slots[idx] = Some(Entry::placeholder(now, now + nak_rb_expiry));
                self.back_off_q.push_back(s);
                self.lead = s;
                s = s.wrapping_add(1);
            }
            if self.window_len() >= self.capacity {
                if self.commit_region_empty() {
                    self.drop_trail();
                } else {
                    return AddResult::Bounds;
                }
            }
            let idx = self.idx(sqn);
            self.slots[idx] = Some(Entry {
                state: if is_parity { EntryState::HaveParity } else { EntryState::HaveData },
                skb: Some(skb),
                timer_expiry: now,
                nak_transmit_count: 0,
                ncf_retry_count: 0,
                data_retry_count: 0,
            });
            self.lead = sqn;
            self.mark_bit_received();
            return AddResult::Missing;
        }

        AddResult::Bounds
    }

    fn mark_bit_received(&mut self) {
        self.loss_bitmap |= 1;
        self.update_ema(false, 1);
    }

    fn update_ema(&mut self, lost: bool, jump: u32) {
        let alpha = self.ack_c_p_milli as i64; // out of 1000
        let s = self.data_loss_ema as i64;
        let new_s = if jump > 1 {
            // s <- s * (1-alpha)^d, done iteratively in fixed point.
            let mut v = s;
            for _ in 0..jump {
                v = v * (1000 - alpha) / 1000;
            }
            v
        } else if lost {
            alpha * 65535 / 1000 + (1000 - alpha) * s / 1000
        } else {
            (1000 - alpha) * s / 1000
        };
        self.data_loss_ema = new_s.clamp(0, 65535) as u16;
    }

    #[must_use]
    pub fn data_loss_ema(&self) -> f32 {
        self.data_loss_ema as f32 / 65535.0
    }

    /// Called on each SPM: advances the advertised trail, lifts the
    /// constrained flag once it passes `rxw_trail_init`, force-declares lost
    /// any not-yet-resolved entry the trail has passed, and extends
    /// placeholders up to `txw_lead`.
    pub fn update(&mut self, txw_trail: Sqn, txw_lead: Sqn, now: Instant, nak_rb_expiry: Duration) -> u32 {
        if !self.defined {
            return 0;
        }
        if txw_trail.gt_circular(self.rxw_trail) {
            self.rxw_trail = txw_trail;
            if self.constrained && self.rxw_trail.gt_circular(self.rxw_trail_init) {
                self.constrained = false;
            }
            let mut s = self.trail;
            while s.lt_circular(self.rxw_trail) && s.le_circular(self.lead) {
                let idx = self.idx(s);
                if let Some(e) = &mut self.slots[idx] {
                    if matches!(e.state, EntryState::BackOff | EntryState::WaitNcf | EntryState::WaitData) {
                        e.state = EntryState::LostData;
                        self.cumulative_losses += 1;
                    }
                }
                s = s.wrapping_add(1);
            }
        }

        let mut added = 0u32;
        let mut s = self.lead.wrapping_add(1);
        while s.le_circular(txw_lead) {
            if self.window_len() >= self.capacity {
                if self.commit_region_empty() {
                    self.drop_trail();
                } else {
                    break;
                }
            }
            let idx = self.idx(s);
            self.slots[idx] = Some(Entry::placeholder(now, now + nak_rb_expiry));
            self.back_off_q.push_back(s);
            self.lead = s;
            added += 1;
            s = s.wrapping_add(1);
        }
        added
    }

    /// NCF path: transitions `sqn` (and any intermediate placeholders) to
    /// `WaitData`.
    pub fn confirm(&mut self, sqn: Sqn, now: Instant, nak_rdata_expiry: Duration, nak_rb_expiry: Duration) -> ConfirmResult {
        if !self.defined {
            return ConfirmResult::Bounds;
        }
        if sqn.gt_circular(self.lead) {
            let mut s = self.lead.wrapping_add(1);
            while s.lt_circular(sqn) {
                if self.window_len() >= self.capacity {
                    return ConfirmResult::Bounds;
                }
                let idx = self.idx(s);
                self.slots[idx] = Some(Entry::placeholder(now, now + nak_rb_expiry));
                self.back_off_q.push_back(s);
                self.lead = s;
                s = s.wrapping_add(1);
            }
            if self.window_len() >= self.capacity {
                return ConfirmResult::Bounds;
            }
            let idx = self.idx(sqn);
            self.slots[idx] = Some(Entry {
                state: EntryState::WaitData,
                skb: None,
                timer_expiry: now + nak_rdata_expiry,
                nak_transmit_count: 1,
                ncf_retry_count: 0,
                data_retry_count: 0,
            });
            self.lead = sqn;
            return ConfirmResult::Appended;
        }

        if sqn.lt_circular(self.trail) {
            return ConfirmResult::Bounds;
        }
        let idx = self.idx(sqn);
        match self.slots[idx].as_mut() {
            Some(e) if matches!(e.state, EntryState::BackOff | EntryState::WaitNcf) => {
                e.state = EntryState::WaitData;
                e.timer_expiry = now + nak_rdata_expiry;
                ConfirmResult::Updated
            }
            Some(e) if matches!(e.state, EntryState::HaveData | EntryState::HaveParity | EntryState::CommitData) => {
                ConfirmResult::Duplicate
            }
            _ => ConfirmResult::Bounds,
        }
    }

    /// Force-transitions an existing entry to `LostData`.
    pub fn lost(&mut self, sqn: Sqn) {
        if !self.defined {
            return;
        }
        let idx = self.idx(sqn);
        if let Some(e) = &mut self.slots[idx] {
            if !matches!(e.state, EntryState::CommitData) {
                e.state = EntryState::LostData;
                self.cumulative_losses += 1;
            }
        }
    }

    fn entry_state(&self, sqn: Sqn) -> Option<EntryState> {
        if sqn.lt_circular(self.trail) || sqn.gt_circular(self.lead) {
            return None;
        }
        self.slots[self.idx(sqn)].as_ref().map(|e| e.state)
    }

    /// Walks the NAK back-off/repair/data retry queues, emitting
    /// `(sqn, kind)` pairs the caller should act on: `kind` distinguishes a
    /// freshly-due NAK from a give-up-to-lost transition.
    pub fn poll_timers(&mut self, now: Instant) -> Vec<Sqn> {
        let mut due = Vec::new();
        let bo_len = self.back_off_q.len();
        for _ in 0..bo_len {
            let Some(sqn) = self.back_off_q.pop_front() else { break };
            let idx = self.idx(sqn);
            let Some(e) = self.slots[idx].as_mut() else { continue };
            if e.state != EntryState::BackOff {
                continue;
            }
            if now < e.timer_expiry {
                self.back_off_q.push_back(sqn);
                continue;
            }
            e.state = EntryState::WaitNcf;
            e.timer_expiry = now + self.nak_rpt_ivl;
            e.nak_transmit_count += 1;
            due.push(sqn);
            self.wait_ncf_q.push_back(sqn);
        }

        let ncf_len = self.wait_ncf_q.len();
        for _ in 0..ncf_len {
            let Some(sqn) = self.wait_ncf_q.pop_front() else { break };
            let idx = self.idx(sqn);
            let Some(e) = self.slots[idx].as_mut() else { continue };
            if e.state != EntryState::WaitNcf {
                continue;
            }
            if now < e.timer_expiry {
                self.wait_ncf_q.push_back(sqn);
                continue;
            }
            if e.ncf_retry_count < self.nak_ncf_retries {
                e.ncf_retry_count += 1;
                e.state = EntryState::BackOff;
                e.timer_expiry = now + self.nak_bo_ivl;
                self.back_off_q.push_back(sqn);
            } else {
                e.state = EntryState::LostData;
                self.cumulative_losses += 1;
            }
        }

        let data_len = self.wait_data_q.len();
        for _ in 0..data_len {
            let Some(sqn) = self.wait_data_q.pop_front() else { break };
            let idx = self.idx(sqn);
            let Some(e) = self.slots[idx].as_mut() else { continue };
            if e.state != EntryState::WaitData {
                continue;
            }
            if now < e.timer_expiry {
                self.wait_data_q.push_back(sqn);
                continue;
            }
            if e.data_retry_count < self.nak_data_retries {
                e.data_retry_count += 1;
                e.state = EntryState::BackOff;
                e.timer_expiry = now + self.nak_bo_ivl;
                self.back_off_q.push_back(sqn);
            } else {
                e.state = EntryState::LostData;
                self.cumulative_losses += 1;
            }
        }

        due
    }

    /// Tests whether the APDU starting at `s0` is complete (every
    /// constituent entry `HAVE_DATA`), attempting FEC recovery via `rs` for
    /// any transmission group with a missing member that has reached the
    /// `k`-of-`n` threshold. Returns the ordered skb list on success.
    pub fn try_complete_apdu(&mut self, s0: Sqn, rs: Option<&RsEngine>) -> Option<Vec<SkbRef>> {
        if !self.ensure_have_data(s0, rs) {
            return None;
        }
        let skb0 = self.slots[self.idx(s0)].as_ref()?.skb.clone()?;
        let (apdu_first, apdu_len) = if let Some((f, _off, l)) = parse_fragment_hint(&skb0) {
            (f, l as usize)
        } else {
            (s0.0, skb0.len())
        };
        if apdu_first != s0.0 || apdu_len > MAX_APDU {
            return None;
        }

        let mut members = Vec::new();
        let mut s = s0;
        let mut consumed = 0usize;
        let mut count = 0usize;
        while consumed < apdu_len {
            if count >= PGM_MAX_FRAGMENTS {
                return None;
            }
            count += 1;
            if !self.ensure_have_data(s, rs) {
                return None;
            }
            let idx = self.idx(s);
            let skb = self.slots[idx].as_ref().unwrap().skb.clone().unwrap();
            consumed += skb.len();
            members.push(skb);
            s = s.wrapping_add(1);
        }
        Some(members)
    }

    /// Returns whether `s`'s entry is (now) `HAVE_DATA`, attempting one
    /// Reed–Solomon recovery pass over its transmission group via `rs` if
    /// it currently isn't.
    fn ensure_have_data(&mut self, s: Sqn, rs: Option<&RsEngine>) -> bool {
        if self.entry_state(s) == Some(EntryState::HaveData) {
            return true;
        }
        if self.entry_state(s) == Some(EntryState::LostData) {
            return false;
        }
        let Some(rs) = rs else { return false };
        if !self.try_recover_group(s, rs) {
            return false;
        }
        self.entry_state(s) == Some(EntryState::HaveData)
    }

    /// Attempts Reed–Solomon recovery of the transmission group containing
    /// `sqn`, replacing any missing members' slots with reconstructed
    /// `HAVE_DATA` entries. Returns `true` if recovery succeeded (or the
    /// slot in question is now present for another reason).
    fn try_recover_group(&mut self, sqn: Sqn, rs: &RsEngine) -> bool {
        let k = rs.k() as u32;
        let n = rs.n() as u32;
        let tg_start = sqn.tg_sqn(k);

        let mut present: Vec<(u8, Vec<u8>)> = Vec::new();
        let mut missing: Vec<u8> = Vec::new();
        for pos in 0..n {
            let s = tg_start.wrapping_add(pos);
            match self.entry_state(s) {
                Some(EntryState::HaveData) | Some(EntryState::HaveParity) | Some(EntryState::CommitData) => {
                    let idx = self.idx(s);
                    let skb = self.slots[idx].as_ref().unwrap().skb.as_ref().unwrap();
                    present.push((pos as u8, skb.payload().to_vec()));
                }
                Some(EntryState::LostData) => return false,
                _ => {
                    if pos < k {
                        missing.push(pos as u8);
                    }
                }
            }
        }
        if missing.is_empty() {
            // Target slot turned out to already be present (e.g. concurrent
            // insert); nothing to reconstruct.
            return true;
        }
        if present.len() < k as usize {
            return false;
        }

        let refs: Vec<(u8, &[u8])> = present.iter().map(|(p, d)| (*p, d.as_slice())).collect();
        let decoded = rs.decode(&refs);

        for pos in missing {
            let s = tg_start.wrapping_add(pos as u32);
            let idx = self.idx(s);
            let mut skb = crate::skb::Skb::with_capacity(decoded[pos as usize].len());
            skb.put(&decoded[pos as usize]);
            skb.sequence = s;
            self.slots[idx] = Some(Entry {
                state: EntryState::HaveData,
                skb: Some(std::sync::Arc::new(skb)),
                timer_expiry: Instant::now(),
                nak_transmit_count: 0,
                ncf_retry_count: 0,
                data_retry_count: 0,
            });
        }
        true
    }

    /// Delivers contiguous completed APDUs starting at `commit_lead`,
    /// calling `deliver` once per APDU with its ordered skb list. Returns
    /// the number of APDUs delivered. A `LostData` boundary with an empty
    /// commit region purges it and returns with `had_loss = true` signalled
    /// via the return tuple so the caller can surface `Error::Reset` once.
    pub fn readv(&mut self, rs: Option<&RsEngine>, mut deliver: impl FnMut(&[SkbRef])) -> (u32, bool) {
        let mut count = 0;
        let mut had_loss = std::mem::take(&mut self.loss_pending);
        loop {
            if self.commit_lead.gt_circular(self.lead) {
                break;
            }
            match self.entry_state(self.commit_lead) {
                Some(EntryState::LostData) => {
                    if self.commit_region_empty() {
                        let idx = self.idx(self.commit_lead);
                        self.slots[idx] = None;
                        self.commit_lead = self.commit_lead.wrapping_add(1);
                        if self.trail.lt_circular(self.commit_lead) {
                            self.trail = self.commit_lead;
                        }
                        had_loss = true;
                        continue;
                    }
                    had_loss = true;
                    break;
                }
                Some(EntryState::HaveParity) => {
                    // A parity member's own k-aligned block generally isn't
                    // the group it provides parity for (its sqn continues
                    // the stream past the k originals rather than starting a
                    // fresh one), so it must never be handed to
                    // `try_complete_apdu` as an APDU start. It carries no
                    // application payload; commit and skip past it.
                    let idx = self.idx(self.commit_lead);
                    if let Some(e) = &mut self.slots[idx] {
                        e.state = EntryState::CommitData;
                    }
                    self.commit_lead = self.commit_lead.wrapping_add(1);
                    continue;
                }
                _ => {}
            }
            let Some(members) = self.try_complete_apdu(self.commit_lead, rs) else {
                break;
            };
            let n = members.len() as u32;
            deliver(&members);
            let mut s = self.commit_lead;
            for _ in 0..n {
                let idx = self.idx(s);
                if let Some(e) = &mut self.slots[idx] {
                    e.state = EntryState::CommitData;
                }
                s = s.wrapping_add(1);
            }
            self.commit_lead = s;
            count += 1;
        }
        (count, had_loss)
    }

    /// Releases a committed entry once the application has consumed it,
    /// advancing `trail` if this was the trail entry.
    pub fn remove_commit(&mut self, sqn: Sqn) {
        let idx = self.idx(sqn);
        if let Some(e) = &self.slots[idx] {
            if e.state == EntryState::CommitData {
                self.slots[idx] = None;
                if sqn == self.trail {
                    self.trail = self.trail.wrapping_add(1);
                }
            }
        }
    }
}

/// Extracts `(apdu_first_sqn, apdu_frag_off, apdu_len)` from a skb's cached
/// `OPT_FRAGMENT`, stamped into its control block at insertion time by
/// whoever called [`Rxw::add`]. Absent a cached hint, the skb is treated as
/// its own single-fragment APDU.
fn parse_fragment_hint(skb: &SkbRef) -> Option<(u32, u32, u32)> {
    skb.control.frag
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skb::Skb;
    use std::sync::Arc;
    use std::time::Duration;

    fn mkskb(sqn: u32, payload: &[u8]) -> SkbRef {
        let mut skb = Skb::with_capacity(64);
        skb.put(payload);
        skb.sequence = Sqn::new(sqn);
        Arc::new(skb)
    }

    #[test]
    fn first_add_defines_window() {
        let mut rxw = Rxw::new(16);
        let now = Instant::now();
        let r = rxw.add(mkskb(5, b"x"), false, now, Duration::from_millis(50));
        assert_eq!(r, AddResult::Appended);
        assert_eq!(rxw.trail().0, 5);
        assert_eq!(rxw.commit_lead().0, 5);
        assert_eq!(rxw.lead().0, 5);
    }

    #[test]
    fn gap_then_fill_delivers_in_order() {
        let mut rxw = Rxw::new(16);
        let now = Instant::now();
        rxw.add(mkskb(0, b"a"), false, now, Duration::from_millis(50));
        let r = rxw.add(mkskb(2, b"c"), false, now, Duration::from_millis(50));
        assert_eq!(r, AddResult::Missing);
        assert_eq!(rxw.entry_state(Sqn::new(1)), Some(EntryState::BackOff));

        rxw.add(mkskb(1, b"b"), false, now, Duration::from_millis(50));
        let mut delivered = Vec::new();
        let (count, had_loss) = rxw.readv(None, |members| {
            for m in members {
                delivered.push(m.payload().to_vec());
            }
        });
        assert_eq!(count, 3);
        assert!(!had_loss);
        assert_eq!(delivered, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn full_window_empty_commit_drops_trail() {
        let mut rxw = Rxw::new(2);
        let now = Instant::now();
        rxw.add(mkskb(0, b"a"), false, now, Duration::from_millis(50));
        rxw.add(mkskb(1, b"b"), false, now, Duration::from_millis(50));
        let r = rxw.add(mkskb(2, b"c"), false, now, Duration::from_millis(50));
        assert_eq!(r, AddResult::Appended);
        assert_eq!(rxw.trail().0, 1);
    }

    #[test]
    fn slow_consumer_drop_is_reported_once_on_next_readv() {
        let mut rxw = Rxw::new(4);
        let now = Instant::now();
        for i in 0..6u32 {
            rxw.add(mkskb(i, &[i as u8]), false, now, Duration::from_millis(50));
        }
        assert_eq!(rxw.cumulative_losses, 2);

        let mut delivered = Vec::new();
        let (count, had_loss) = rxw.readv(None, |members| {
            for m in members {
                delivered.push(m.payload().to_vec());
            }
        });
        assert_eq!(count, 4);
        assert!(had_loss);
        assert_eq!(delivered, vec![vec![2u8], vec![3], vec![4], vec![5]]);

        // Loss is reported exactly once; a second call sees none further.
        let (count2, had_loss2) = rxw.readv(None, |_| {});
        assert_eq!(count2, 0);
        assert!(!had_loss2);
    }

    #[test]
    fn nak_state_machine_advances_through_backoff() {
        let mut rxw = Rxw::new(16);
        let now = Instant::now();
        rxw.add(mkskb(0, b"a"), false, now, Duration::from_millis(10));
        rxw.add(mkskb(2, b"c"), false, now, Duration::from_millis(10));
        assert_eq!(rxw.entry_state(Sqn::new(1)), Some(EntryState::BackOff));

        let later = now + Duration::from_millis(20);
        let due = rxw.poll_timers(later);
        assert_eq!(due, vec![Sqn::new(1)]);
        assert_eq!(rxw.entry_state(Sqn::new(1)), Some(EntryState::WaitNcf));
    }

    #[test]
    fn confirm_with_sqn_at_lead_plus_one_adds_and_transitions() {
        let mut rxw = Rxw::new(16);
        let now = Instant::now();
        rxw.add(mkskb(0, b"a"), false, now, Duration::from_millis(50));
        let r = rxw.confirm(Sqn::new(1), now, Duration::from_millis(50), Duration::from_millis(50));
        assert_eq!(r, ConfirmResult::Appended);
        assert_eq!(rxw.entry_state(Sqn::new(1)), Some(EntryState::WaitData));
    }

    #[test]
    fn parity_recovery_reconstructs_missing_originals() {
        let rs = RsEngine::new(8, 4);
        let originals: Vec<Vec<u8>> = (0..4u8).map(|i| vec![i; 8]).collect();
        let refs: Vec<&[u8]> = originals.iter().map(|v| v.as_slice()).collect();
        let parity = rs.encode(&refs);

        let mut rxw = Rxw::new(16);
        let now = Instant::now();
        rxw.add(mkskb(0, &originals[0]), false, now, Duration::from_millis(50));
        // sequences 1,2 dropped
        rxw.add(mkskb(3, &originals[3]), false, now, Duration::from_millis(50));
        rxw.add(mkskb(4, &parity[0]), true, now, Duration::from_millis(50));
        rxw.add(mkskb(5, &parity[1]), true, now, Duration::from_millis(50));

        let mut delivered = Vec::new();
        let (count, had_loss) = rxw.readv(Some(&rs), |members| {
            for m in members {
                delivered.push(m.payload().to_vec());
            }
        });
        assert!(!had_loss);
        assert_eq!(count, 4);
        assert_eq!(delivered, originals);
    }

    #[test]
    fn commit_walk_skips_parity_members_and_resumes_on_next_group() {
        let rs = RsEngine::new(8, 4);
        let originals: Vec<Vec<u8>> = (0..4u8).map(|i| vec![i; 8]).collect();
        let refs: Vec<&[u8]> = originals.iter().map(|v| v.as_slice()).collect();
        let parity = rs.encode(&refs);

        let mut rxw = Rxw::new(16);
        let now = Instant::now();
        for (i, o) in originals.iter().enumerate() {
            rxw.add(mkskb(i as u32, o), false, now, Duration::from_millis(50));
        }
        for (i, p) in parity.iter().enumerate() {
            rxw.add(mkskb(4 + i as u32, p), true, now, Duration::from_millis(50));
        }
        // Next group's originals continue right after the parity block.
        rxw.add(mkskb(8, b"next-group"), false, now, Duration::from_millis(50));

        let mut delivered = Vec::new();
        let (count, had_loss) = rxw.readv(Some(&rs), |members| {
            for m in members {
                delivered.push(m.payload().to_vec());
            }
        });
        assert!(!had_loss);
        // 4 originals + 1 APDU from the next group; the 4 parity slots are
        // committed silently and never handed to `deliver`.
        assert_eq!(count, 5);
        assert_eq!(delivered.last().unwrap(), b"next-group");
        assert_eq!(rxw.commit_lead().0, 9);
    }
}
