//! Unified timer engine: computes the next wake-up deadline across every
//! timed component a socket owns, rather than registering callbacks with an
//! event loop (no event loop is in scope here; callers poll `next_wait` and
//! block their I/O wait for at most that long).
//!
//! Grounded on a writer heartbeat timer and a reader NAK-retry scheduler
//! that both expose a "when do you next need attention" query instead of
//! owning their own thread, generalized to fold ambient SPM, heartbeat SPM,
//! ACK expiry, and peer/SPMR expiry into one minimum-of-all computation.

use std::time::{Duration, Instant};

/// Bookkeeping for the two SPM cadences a source maintains: the heartbeat
/// vector (fast, early; then slows to the ambient interval) and the hard
/// ambient ceiling that always re-arms after any send.
pub struct SpmTimer {
    heartbeat_ivl: Vec<Duration>,
    heartbeat_pos: usize,
    ambient_ivl: Duration,
    next_due: Instant,
}

impl SpmTimer {
    #[must_use]
    pub fn new(heartbeat_ivl: Vec<Duration>, ambient_ivl: Duration, now: Instant) -> Self {
        let first = heartbeat_ivl.first().copied().unwrap_or(ambient_ivl);
        SpmTimer {
            heartbeat_ivl,
            heartbeat_pos: 0,
            ambient_ivl,
            next_due: now + first,
        }
    }

    #[must_use]
    pub fn next_due(&self) -> Instant {
        self.next_due
    }

    /// Call after every successful SPM send: advances through the heartbeat
    /// vector, then holds at the ambient interval once exhausted.
    pub fn on_spm_sent(&mut self, now: Instant) {
        let ivl = if self.heartbeat_pos < self.heartbeat_ivl.len() {
            let v = self.heartbeat_ivl[self.heartbeat_pos];
            self.heartbeat_pos += 1;
            v
        } else {
            self.ambient_ivl
        };
        self.next_due = now + ivl;
    }

    /// Call after any non-SPM data send: resets the heartbeat vector back to
    /// its first (fastest) interval.
    pub fn on_data_sent(&mut self, now: Instant) {
        self.heartbeat_pos = 0;
        let first = self.heartbeat_ivl.first().copied().unwrap_or(self.ambient_ivl);
        self.next_due = now + first;
    }
}

/// Minimum-of-all deadline computation a socket consults before blocking on
/// its I/O poll.
#[must_use]
pub fn next_wait(deadlines: &[Option<Instant>], now: Instant, max_wait: Duration) -> Duration {
    let min = deadlines
        .iter()
        .filter_map(|d| *d)
        .min();
    match min {
        Some(t) if t > now => (t - now).min(max_wait),
        Some(_) => Duration::ZERO,
        None => max_wait,
    }
}
