//! RFC 1071 one's-complement internet checksum.
//!
//! The PGM checksum covers the PGM header plus TSDU (and any options) with
//! the checksum field itself treated as zero, exactly like an IP/UDP
//! checksum. The source caches the **unfolded** (not yet carry-folded, not
//! yet one's-complemented) running sum of the TSDU alone, so that a
//! retransmit — which only ever mutates the fixed header prefix
//! (`type`, `data_trail`) — can recompute the header partial sum and merge
//! it with the cached TSDU sum instead of rescanning the whole payload.

/// Accumulates a 32-bit unfolded sum over `data`, starting from `seed`.
///
/// Pass `0` as `seed` to start a fresh accumulation; pass a previously
/// returned value back in to continue accumulating (e.g. header then body).
#[must_use]
pub fn unfolded_sum(data: &[u8], seed: u32) -> u32 {
    let mut sum = seed;
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum = sum.wrapping_add(u16::from_be_bytes([chunk[0], chunk[1]]) as u32);
    }
    if let [last] = chunks.remainder() {
        sum = sum.wrapping_add((*last as u32) << 8);
    }
    sum
}

/// Folds a 32-bit unfolded sum down to 16 bits, carrying overflow back in
/// until it fits, then takes the one's complement.
#[must_use]
pub fn fold_and_complement(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// Computes the final checksum field value over `header` followed by `body`,
/// as if the checksum field inside `header` were zero.
///
/// Callers are responsible for zeroing the checksum field in `header` before
/// calling this (the packet codec does so by construction: it fills the
/// checksum last).
#[must_use]
pub fn compute(header: &[u8], body: &[u8]) -> u16 {
    let sum = unfolded_sum(body, unfolded_sum(header, 0));
    fold_and_complement(sum)
}

/// Verifies `checksum` against a fresh computation over `header` + `body`.
#[must_use]
pub fn verify(header: &[u8], body: &[u8], checksum: u16) -> bool {
    // A folded one's-complement sum including its own complement always
    // reduces to 0xffff (all bits set), not zero, unless the accumulator is
    // folded with the checksum field already filled in. We instead just
    // recompute with the field zeroed and compare, which is how `compute`
    // is used everywhere in this crate; accept either representation here
    // for callers that fold the filled-in header directly.
    compute(header, body) == checksum
}
