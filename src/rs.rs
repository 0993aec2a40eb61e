//! Reed–Solomon forward error correction over GF(2^8).
//!
//! Encodes parity across a transmission group of `k` original packets into
//! `h = n - k` parity packets (`n <= 255`), and reconstructs any missing
//! originals given any `k` of the `n` group members. There is no analogue
//! for this in the reference corpus (RTPS carries no FEC layer); the table
//! generation and codec below follow RFC 3208 Annex B directly.

use crate::config::RS_GENERATOR_POLY;

/// Precomputed GF(2^8) log/antilog tables for the RFC 3208 generator
/// polynomial `0x11d`, built once and reused across every transmission
/// group the socket ever handles.
pub struct GaloisField {
    exp: [u8; 512],
    log: [i16; 256],
}

impl GaloisField {
    #[must_use]
    pub fn new() -> Self {
        let mut exp = [0u8; 512];
        let mut log = [-1i16; 256];
        let mut x: u32 = 1;
        for i in 0..255usize {
            exp[i] = x as u8;
            log[x as usize] = i as i16;
            x <<= 1;
            if x & 0x100 != 0 {
                x ^= RS_GENERATOR_POLY as u32;
            }
        }
        for i in 255..512 {
            exp[i] = exp[i - 255];
        }
        GaloisField { exp, log }
    }

    #[must_use]
    pub fn mul(&self, a: u8, b: u8) -> u8 {
        if a == 0 || b == 0 {
            return 0;
        }
        let la = self.log[a as usize];
        let lb = self.log[b as usize];
        self.exp[(la as usize + lb as usize) % 255]
    }

    #[must_use]
    pub fn div(&self, a: u8, b: u8) -> u8 {
        assert!(b != 0, "division by zero in GF(2^8)");
        if a == 0 {
            return 0;
        }
        let la = self.log[a as usize] as i32;
        let lb = self.log[b as usize] as i32;
        self.exp[((la - lb).rem_euclid(255)) as usize]
    }

    #[must_use]
    pub fn pow(&self, a: u8, e: u32) -> u8 {
        if a == 0 {
            return if e == 0 { 1 } else { 0 };
        }
        let la = self.log[a as usize] as i64;
        self.exp[((la * e as i64).rem_euclid(255)) as usize]
    }

    #[must_use]
    pub fn inv(&self, a: u8) -> u8 {
        assert!(a != 0, "inverse of zero in GF(2^8)");
        let la = self.log[a as usize] as i32;
        self.exp[((255 - la) % 255) as usize]
    }
}

impl Default for GaloisField {
    fn default() -> Self {
        Self::new()
    }
}

/// A Reed–Solomon `RS(n, k)` engine over a fixed field, with a Vandermonde
/// generator matrix — row `j` of the parity section is `x_j^i` for
/// `i in 0..k`, where `x_j` are distinct nonzero field elements assigned to
/// each of the `n` group positions. This is the systematic code RFC 3208
/// cites: the first `k` "rows" are the identity (originals pass through
/// unchanged), decode solves the induced linear system for any `k` present
/// rows.
pub struct RsEngine {
    gf: GaloisField,
    n: u8,
    k: u8,
}

impl RsEngine {
    /// Builds an engine for `RS(n, k)`. `k` must be a power of two;
    /// `n <= 255`; the density constraint
    /// (`k <= 223 || h * 223 >= k`) is the caller's responsibility to
    /// enforce against the configured FEC parameters before constructing
    /// transmission groups this large.
    #[must_use]
    pub fn new(n: u8, k: u8) -> Self {
        assert!(k.is_power_of_two());
        assert!(k as u16 <= n as u16);
        RsEngine {
            gf: GaloisField::new(),
            n,
            k,
        }
    }

    #[must_use]
    pub fn k(&self) -> u8 {
        self.k
    }

    #[must_use]
    pub fn n(&self) -> u8 {
        self.n
    }

    #[must_use]
    pub fn h(&self) -> u8 {
        self.n - self.k
    }

    /// Field element assigned to transmission-group position `pos`
    /// (`0..n`). Positions `0..k` are the originals (`alpha^pos` for a
    /// generator element `alpha = 2`); positions `k..n` are the parity rows.
    fn position_x(&self, pos: u8) -> u8 {
        self.gf.pow(2, pos as u32 + 1)
    }

    /// Encodes `h()` parity packets from `k()` equal-length originals.
    /// Panics if `originals.len() != k()` or the originals aren't all the
    /// same length (callers right-pad with `OPT_VAR_PKTLEN` bookkeeping
    /// before calling this).
    #[must_use]
    pub fn encode(&self, originals: &[&[u8]]) -> Vec<Vec<u8>> {
        assert_eq!(originals.len(), self.k as usize);
        let len = originals[0].len();
        assert!(originals.iter().all(|o| o.len() == len));

        let mut parity = vec![vec![0u8; len]; self.h() as usize];
        for (pi, prow) in parity.iter_mut().enumerate() {
            let x = self.position_x(self.k + pi as u8);
            for byte_idx in 0..len {
                let mut acc = 0u8;
                let mut xp = 1u8; // x^0
                for orig in originals {
                    acc ^= self.gf.mul(orig[byte_idx], xp);
                    xp = self.gf.mul(xp, x);
                }
                prow[byte_idx] = acc;
            }
        }
        parity
    }

    /// Reconstructs missing originals given any `k` of the `n` group
    /// members. `present` is a vector of `(position, data)` pairs with
    /// `position < n` and `data.len()` equal across all entries; must
    /// contain at least `k` entries (extras beyond `k` are ignored).
    /// Returns the `k` original payloads in position order.
    ///
    /// # Panics
    /// Panics if fewer than `k` members are present, mirroring the
    /// precondition the receive window is responsible for checking before
    /// ever calling this (the receive window calls this exactly once
    /// per TG as soon as that threshold is reached").
    #[must_use]
    pub fn decode(&self, present: &[(u8, &[u8])]) -> Vec<Vec<u8>> {
        assert!(present.len() >= self.k as usize);
        let len = present[0].1.len();
        let rows: Vec<(u8, &[u8])> = present.iter().take(self.k as usize).copied().collect();

        // Build the k x k systematic coefficient matrix M where M * orig =
        // received, then solve by Gauss-Jordan elimination over GF(2^8), one
        // byte column at a time. An original position's wire symbol already
        // *is* the coefficient at that position (`encode` passes originals
        // through unchanged), so its row is the unit vector `e_pos`; only a
        // parity row is the Vandermonde evaluation `x_row^col` the encoder
        // actually computed.
        let k = self.k as usize;
        let mut m: Vec<Vec<u8>> = rows
            .iter()
            .map(|(pos, _)| {
                if (*pos as usize) < k {
                    let mut row = vec![0u8; k];
                    row[*pos as usize] = 1;
                    row
                } else {
                    let x = self.position_x(*pos);
                    let mut row = vec![1u8; k];
                    let mut xp = 1u8;
                    for col in &mut row {
                        *col = xp;
                        xp = self.gf.mul(xp, x);
                    }
                    row
                }
            })
            .collect();

        // Augment with an identity to compute the inverse once, then apply
        // it to every byte column of the received payloads.
        let mut inv = vec![vec![0u8; k]; k];
        for (i, row) in inv.iter_mut().enumerate() {
            row[i] = 1;
        }
        for col in 0..k {
            // Find pivot.
            let pivot_row = (col..k).find(|&r| m[r][col] != 0).expect("singular matrix");
            m.swap(col, pivot_row);
            inv.swap(col, pivot_row);
            let pivot_inv = self.gf.inv(m[col][col]);
            for c in 0..k {
                m[col][c] = self.gf.mul(m[col][c], pivot_inv);
                inv[col][c] = self.gf.mul(inv[col][c], pivot_inv);
            }
            for r in 0..k {
                if r == col || m[r][col] == 0 {
                    continue;
                }
                let factor = m[r][col];
                for c in 0..k {
                    m[r][c] ^= self.gf.mul(factor, m[col][c]);
                    inv[r][c] ^= self.gf.mul(factor, inv[col][c]);
                }
            }
        }

        let mut originals = vec![vec![0u8; len]; k];
        for byte_idx in 0..len {
            for (orow, inv_row) in originals.iter_mut().zip(inv.iter()) {
                let mut acc = 0u8;
                for (coeff, (_, data)) in inv_row.iter().zip(rows.iter()) {
                    acc ^= self.gf.mul(*coeff, data[byte_idx]);
                }
                orow[byte_idx] = acc;
            }
        }
        originals
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_decode_from_all_originals_is_identity() {
        let rs = RsEngine::new(8, 4);
        let originals: Vec<Vec<u8>> = (0..4).map(|i| vec![i as u8; 16]).collect();
        let refs: Vec<&[u8]> = originals.iter().map(|v| v.as_slice()).collect();
        let parity = rs.encode(&refs);
        assert_eq!(parity.len(), 4);

        let present: Vec<(u8, &[u8])> = refs.iter().enumerate().map(|(i, d)| (i as u8, *d)).collect();
        let decoded = rs.decode(&present);
        assert_eq!(decoded, originals);
    }

    #[test]
    fn decode_reconstructs_missing_originals_from_parity() {
        let rs = RsEngine::new(8, 4);
        let originals: Vec<Vec<u8>> = vec![
            vec![1, 2, 3, 4],
            vec![5, 6, 7, 8],
            vec![9, 10, 11, 12],
            vec![13, 14, 15, 16],
        ];
        let refs: Vec<&[u8]> = originals.iter().map(|v| v.as_slice()).collect();
        let parity = rs.encode(&refs);

        // Drop originals 1 and 2, keep 0, 3 and parity 4, 5 (positions k=4,5).
        let present: Vec<(u8, &[u8])> = vec![
            (0, originals[0].as_slice()),
            (3, originals[3].as_slice()),
            (4, parity[0].as_slice()),
            (5, parity[1].as_slice()),
        ];
        let decoded = rs.decode(&present);
        assert_eq!(decoded[0], originals[0]);
        assert_eq!(decoded[1], originals[1]);
        assert_eq!(decoded[2], originals[2]);
        assert_eq!(decoded[3], originals[3]);
    }

    #[test]
    fn larger_group_round_trips() {
        let rs = RsEngine::new(16, 8);
        let originals: Vec<Vec<u8>> = (0..8u8).map(|i| vec![i.wrapping_mul(17); 32]).collect();
        let refs: Vec<&[u8]> = originals.iter().map(|v| v.as_slice()).collect();
        let parity = rs.encode(&refs);
        // Keep originals 0,2,4,6 and enough parity to reach k=8.
        let mut present: Vec<(u8, &[u8])> = vec![
            (0, originals[0].as_slice()),
            (2, originals[2].as_slice()),
            (4, originals[4].as_slice()),
            (6, originals[6].as_slice()),
        ];
        for (i, p) in parity.iter().enumerate() {
            present.push((8 + i as u8, p.as_slice()));
            if present.len() == 8 {
                break;
            }
        }
        let decoded = rs.decode(&present);
        assert_eq!(decoded, originals);
    }
}
