//! Packet buffer (`skb`): an owned byte region with head/data/tail cursors.
//!
//! The reference design holds raw pointers into the buffer for the parsed
//! header and options. Those become byte offsets here so the buffer can be
//! reallocated or moved without invalidating anything; every accessor
//! re-derives its `&[u8]` view from the stored offsets on demand.

use std::sync::Arc;
use std::time::Instant;

use crate::seq::Sqn;

/// Per-skb control block reused by both the source and receiver state
/// machines. Not every field applies to every role; e.g. `nak_transmit_count`
/// only matters for a receive-side placeholder.
#[derive(Debug, Default, Clone)]
pub struct SkbControl {
    /// Offset of the parsed `pgm_header` within the buffer.
    pub header_offset: usize,
    /// Offset of the PGM data payload (TSDU) within the buffer.
    pub data_offset: usize,
    /// Length of the TSDU.
    pub data_len: usize,
    /// `(apdu_first_sqn, apdu_frag_off, apdu_len)` decoded from this skb's
    /// `OPT_FRAGMENT`, if it carried one. `None` means this skb is its own
    /// complete, single-fragment APDU.
    pub frag: Option<(u32, u32, u32)>,
    /// Cached unfolded (pre-fold, pre-complement) checksum of the TSDU only,
    /// so a retransmit need only recompute the mutated header prefix.
    pub unfolded_checksum: Option<u32>,
    /// True once this entry is known to carry forward-error-correction
    /// parity rather than an original.
    pub is_parity: bool,
    /// Retry/back-off bookkeeping used while this skb is a receive-side
    /// placeholder (irrelevant once `HAVE_DATA`).
    pub nak_transmit_count: u32,
    pub ncf_retry_count: u8,
    pub data_retry_count: u8,
}

/// An owned packet buffer with three cursors delimiting the live region.
///
/// `head` marks the allocation start, `data` the current payload start
/// (headers are prepended by decrementing `data` toward `head`), `tail` the
/// payload end. `buf[head..tail]` is always the allocated capacity window;
/// `buf[data..tail]` is the logically valid datagram.
#[derive(Debug)]
pub struct Skb {
    buf: Vec<u8>,
    pub head: usize,
    pub data: usize,
    pub tail: usize,
    /// Sequence number, populated once the packet has been parsed or
    /// assigned (source side).
    pub sequence: Sqn,
    /// Local receive timestamp (receive side only).
    pub recv_ts: Option<Instant>,
    pub control: SkbControl,
}

impl Skb {
    /// Allocates a new skb with `capacity` bytes of backing storage, cursors
    /// all at zero (empty payload).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Skb {
            buf: vec![0u8; capacity],
            head: 0,
            data: 0,
            tail: 0,
            sequence: Sqn::new(0),
            recv_ts: None,
            control: SkbControl::default(),
        }
    }

    /// Wraps an already-filled buffer (e.g. a received datagram) as a skb
    /// whose payload spans the whole buffer.
    #[must_use]
    pub fn from_vec(buf: Vec<u8>) -> Self {
        let tail = buf.len();
        Skb {
            buf,
            head: 0,
            data: 0,
            tail,
            sequence: Sqn::new(0),
            recv_ts: None,
            control: SkbControl::default(),
        }
    }

    /// The current payload view: `buf[data..tail]`.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.buf[self.data..self.tail]
    }

    #[must_use]
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.data..self.tail]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tail - self.data
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tail == self.data
    }

    /// Prepends `n` bytes of header room by moving `data` backward. Panics
    /// if there isn't `n` bytes of room between `head` and `data` — callers
    /// size the buffer up front (as the source engine does) specifically to
    /// avoid this ever tripping.
    pub fn push_header(&mut self, n: usize) -> &mut [u8] {
        assert!(self.data >= self.head + n, "insufficient headroom");
        self.data -= n;
        &mut self.buf[self.data..self.data + n]
    }

    /// Appends `data` to the tail, growing the backing buffer if needed.
    pub fn put(&mut self, data: &[u8]) {
        if self.tail + data.len() > self.buf.len() {
            self.buf.resize(self.tail + data.len(), 0);
        }
        self.buf[self.tail..self.tail + data.len()].copy_from_slice(data);
        self.tail += data.len();
    }

    /// Returns a byte slice at an absolute buffer offset, bounds-checked.
    #[must_use]
    pub fn slice_at(&self, offset: usize, len: usize) -> Option<&[u8]> {
        self.buf.get(offset..offset + len)
    }

    #[must_use]
    pub fn whole_buffer(&self) -> &[u8] {
        &self.buf
    }
}

/// Reference-counted handle shared between the transmit window and the send
/// path until transmission completes, and between the receive window and
/// the reassembly path until the application releases it.
pub type SkbRef = Arc<Skb>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_header_then_put_builds_expected_layout() {
        let mut skb = Skb::with_capacity(32);
        skb.head = 0;
        skb.data = 16;
        skb.tail = 16;
        skb.put(b"hello");
        assert_eq!(skb.payload(), b"hello");
        let hdr = skb.push_header(4);
        hdr.copy_from_slice(&[1, 2, 3, 4]);
        assert_eq!(skb.len(), 9);
        assert_eq!(&skb.payload()[0..4], &[1, 2, 3, 4]);
        assert_eq!(&skb.payload()[4..], b"hello");
    }
}
