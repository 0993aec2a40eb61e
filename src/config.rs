//! Wire-format sizes and protocol-default constants.
//!
//! Single source of truth for the byte layout RFC 3208 requires and for the
//! default interval/retry values a socket starts with before the
//! application overrides them via the option surface (§6).

use std::time::Duration;

// === Header sizes (bytes) ===

/// PGM common header: src port, dst port, type, options, checksum, GSI,
/// TSDU length.
pub const PGM_HEADER_LEN: usize = 16;
/// `OPT_LENGTH` pseudo-option that opens every option chain.
pub const OPT_LENGTH_LEN: usize = 4;
/// Fixed part of every subsequent `OPT_HEADER`: type + length.
pub const OPT_HEADER_LEN: usize = 2;

/// SPM fixed fields following the common header: spm_sqn, trail, lead, NLA
/// AFI+reserved, NLA (4 bytes for IPv4).
pub const SPM_FIXED_LEN_V4: usize = 4 + 4 + 4 + 4 + 4;
/// PGM data header (ODATA/RDATA): data_sqn, data_trail.
pub const DATA_FIXED_LEN: usize = 4 + 4;
/// NAK/NNAK/NCF fixed fields: requested sqn, source AFI+reserved+NLA, group
/// AFI+reserved+NLA (IPv4 sizes).
pub const NAK_FIXED_LEN_V4: usize = 4 + (4 + 4) + (4 + 4);
/// ACK fixed fields: ack_rx_max, ack_bitmap.
pub const ACK_FIXED_LEN: usize = 4 + 4;

/// Maximum option entries walked per packet before giving up as malformed.
pub const MAX_OPTIONS: usize = 16;
/// Maximum secondary SQNs carried in one `OPT_NAK_LIST` on send (conservative
/// side, left unspecified by RFC 3208 itself).
pub const MAX_NAK_LIST_SEND: usize = 62;
/// Maximum secondary SQNs tolerated in one `OPT_NAK_LIST` on receive.
pub const MAX_NAK_LIST_RECV: usize = 62;

/// Maximum legal window length: one less than half the sequence space.
pub const MAX_WINDOW_LEN: u32 = (1u32 << 31) - 2;

/// Maximum number of fragment entries making up one APDU.
pub const PGM_MAX_FRAGMENTS: usize = 4096;

// === PGM type codes (common header `type` field) ===

pub const TYPE_SPM: u8 = 0x00;
pub const TYPE_POLL: u8 = 0x01;
pub const TYPE_POLR: u8 = 0x02;
pub const TYPE_ODATA: u8 = 0x04;
pub const TYPE_RDATA: u8 = 0x05;
pub const TYPE_NAK: u8 = 0x08;
pub const TYPE_NNAK: u8 = 0x09;
pub const TYPE_NCF: u8 = 0x0a;
pub const TYPE_SPMR: u8 = 0x0c;
pub const TYPE_ACK: u8 = 0x0d;

// === Common header `options` byte bits ===

pub const OPT_BIT_PRESENT: u8 = 0x01;
pub const OPT_BIT_NETWORK: u8 = 0x02;
pub const OPT_BIT_VAR_PKTLEN: u8 = 0x40;
pub const OPT_BIT_PARITY: u8 = 0x80;

// === Option type codes (RFC 3208 §9.4) ===

pub const OPT_LENGTH: u8 = 0x00;
pub const OPT_END_MASK: u8 = 0x80;
pub const OPT_TYPE_MASK: u8 = 0x7f;

pub const OPT_FRAGMENT: u8 = 0x01;
pub const OPT_NAK_LIST: u8 = 0x02;
pub const OPT_JOIN: u8 = 0x03;
pub const OPT_REDIRECT: u8 = 0x07;
pub const OPT_PARITY_PRM: u8 = 0x08;
pub const OPT_PARITY_GRP: u8 = 0x09;
pub const OPT_CURR_TGSIZE: u8 = 0x0a;
pub const OPT_NBR_UNREACH: u8 = 0x0b;
pub const OPT_PATH_NLA: u8 = 0x0c;
pub const OPT_SYN: u8 = 0x0d;
pub const OPT_FIN: u8 = 0x0e;
pub const OPT_RST: u8 = 0x0f;
pub const OPT_CR: u8 = 0x10;
pub const OPT_CRQST: u8 = 0x11;
pub const OPT_PGMCC_DATA: u8 = 0x12;
pub const OPT_PGMCC_FEEDBACK: u8 = 0x13;
pub const OPT_VAR_PKTLEN: u8 = 0x14;

// === NLA AFI codes ===

pub const AFI_IP: u16 = 1;
pub const AFI_IP6: u16 = 2;

// === OPT_PARITY_PRM flags ===

pub const PARITY_PRM_PRO: u8 = 0x02;
pub const PARITY_PRM_OND: u8 = 0x01;

// === Reed-Solomon defaults ===

/// Generator polynomial for GF(2^8) arithmetic (RFC 3208 Annex B).
pub const RS_GENERATOR_POLY: u16 = 0x11d;
/// Reference `RS(n, k)` pairing used when an application doesn't configure
/// its own.
pub const RS_DEFAULT_N: u8 = 255;
pub const RS_DEFAULT_K: u8 = 223;

// === Timing defaults ===

/// Minimum interval between two ambient SPMs fired for the same peer
/// (`IHB_MIN`).
pub const IHB_MIN: Duration = Duration::from_millis(10);
/// Default ambient SPM interval.
pub const DEFAULT_AMBIENT_SPM: Duration = Duration::from_secs(30);
/// Default NAK back-off interval.
pub const DEFAULT_NAK_BO_IVL: Duration = Duration::from_millis(50);
/// Default NAK repeat interval (how long `WAIT_NCF` waits for an NCF).
pub const DEFAULT_NAK_RPT_IVL: Duration = Duration::from_millis(200);
/// Default NAK-to-RDATA interval (how long `WAIT_DATA` waits for RDATA).
pub const DEFAULT_NAK_RDATA_IVL: Duration = Duration::from_millis(200);
/// Default retry counts.
pub const DEFAULT_NAK_DATA_RETRIES: u8 = 5;
pub const DEFAULT_NAK_NCF_RETRIES: u8 = 5;
/// Default peer expiry: no SPM/data heard from a peer for this long and its
/// entry is reclaimed.
pub const DEFAULT_PEER_EXPIRY: Duration = Duration::from_secs(30);
/// Default SPMR one-shot back-off.
pub const DEFAULT_SPMR_EXPIRY: Duration = Duration::from_secs(1);

/// Largest legal TSDU for a single (unfragmented) send, derived from a
/// 1500-byte Ethernet MTU minus IPv4(20)+PGM header(16).
pub const DEFAULT_MAX_TSDU: usize = 1500 - 20 - PGM_HEADER_LEN;
/// Hard ceiling on APDU size regardless of MTU.
pub const MAX_APDU: usize = 16 * 1024 * 1024;
