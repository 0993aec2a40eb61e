//! A pure Rust implementation of PGM (RFC 3208), a NAK-based reliable
//! multicast transport, with optional Reed–Solomon forward error correction
//! and optional PGMCC congestion control.
//!
//! # Layout
//!
//! - [`error`] — the public [`error::Error`]/[`error::Result`] types.
//! - [`config`] — wire-format sizes and protocol-default constants.
//! - [`seq`] — 32-bit circular sequence arithmetic and transmission-group
//!   positioning.
//! - [`checksum`] — RFC 1071 one's-complement checksum with unfolded-sum
//!   caching for cheap retransmit recomputation.
//! - [`skb`] — the packet buffer type shared by the transmit and receive
//!   windows.
//! - [`packet`] — header/option parsing and serialization.
//! - [`rs`] — Reed–Solomon coding over GF(2^8).
//! - [`txw`] / [`rxw`] — the transmit and receive windows.
//! - [`peer`] — per-source session tracking (`Tsi`, `Peer`, `PeerTable`).
//! - [`rate`] — token-bucket rate control.
//! - [`congestion`] — PGMCC, off by default.
//! - [`timer`] — the ambient/heartbeat SPM timer and deadline arithmetic.
//! - [`notify`] — readiness channels for non-blocking I/O integration.
//! - [`source`] / [`receiver`] — the engines [`socket::Socket`] drives.
//! - [`socket`] — the public socket façade.
//! - [`stats`] — per-socket counters.
//! - [`registry`] — opt-in process-wide live-socket enumeration, gated
//!   behind `feature = "registry"`.

pub mod checksum;
pub mod config;
pub mod congestion;
pub mod error;
pub mod notify;
pub mod packet;
pub mod peer;
pub mod rate;
pub mod receiver;
#[cfg(feature = "registry")]
pub mod registry;
pub mod rs;
pub mod rxw;
pub mod seq;
pub mod skb;
pub mod socket;
pub mod source;
pub mod stats;
pub mod timer;
pub mod txw;

pub use error::{Error, Result};
pub use peer::Tsi;
pub use socket::{RecvStatus, Socket, SocketOptions};
pub use stats::StatsSnapshot;
