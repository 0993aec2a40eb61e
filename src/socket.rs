//! Socket façade: the option surface, bind/join/close, OS socket
//! construction, and the lock hierarchy tying
//! together the source, receiver, peer table, rate controller, timers, and
//! notification channels.
//!
//! Grounded on a transport constructor that builds its sockets via
//! `socket2` (raw socket creation, `SO_REUSEADDR`, multicast group join)
//! ahead of handing them to an event loop, adapted here from a single UDP
//! socket to PGM's three-socket convention (RFC 3208 §8.1): one raw socket
//! for receiving (so this crate can read the IP header itself and reject
//! fragmented datagrams), one for sending data, and one
//! with `IP_ROUTER_ALERT` set for sending control packets a PGM-aware
//! router should inspect.
//!
//! Lock order, outermost first: `options` (`RwLock`) → `receiver`
//! (`Mutex`) → `source` (`Mutex`) → `Txw`'s internal `Mutex` → `timer`
//! (`Mutex`) → `PeerTable`'s internal `RwLock`. No code path in this crate
//! acquires them out of this order.

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};
use socket2::{Domain, Protocol, Socket as Socket2, Type};

use crate::config::*;
use crate::error::{Error, Result};
use crate::notify::NotifyHub;
use crate::packet::header::Nla;
use crate::packet::{self, Body};
use crate::peer::Tsi;
use crate::receiver::Receiver;
use crate::rs::RsEngine;
use crate::source::Source;
use crate::stats::Stats;
use crate::timer::next_wait;

/// `IPPROTO_PGM`, RFC 3208 §8.1.
const IPPROTO_PGM: i32 = 113;

/// Every tunable a socket exposes before/after bind, validated on set.
#[derive(Debug, Clone)]
pub struct SocketOptions {
    pub max_tsdu: usize,
    pub txw_sqns: usize,
    pub rxw_sqns: u32,
    pub max_rte_bps: u32,
    pub ambient_spm_ivl: Duration,
    pub peer_expiry: Duration,
    pub spmr_expiry: Duration,
    pub nak_bo_ivl: Duration,
    pub nak_rpt_ivl: Duration,
    pub nak_rdata_ivl: Duration,
    pub nak_data_retries: u8,
    pub nak_ncf_retries: u8,
    pub fec: Option<(u8, u8)>,
    pub use_pgmcc: bool,
    pub abort_on_reset: bool,
}

impl Default for SocketOptions {
    fn default() -> Self {
        SocketOptions {
            max_tsdu: DEFAULT_MAX_TSDU,
            txw_sqns: 8192,
            rxw_sqns: 8192,
            max_rte_bps: 10_000_000,
            ambient_spm_ivl: DEFAULT_AMBIENT_SPM,
            peer_expiry: DEFAULT_PEER_EXPIRY,
            spmr_expiry: DEFAULT_SPMR_EXPIRY,
            nak_bo_ivl: DEFAULT_NAK_BO_IVL,
            nak_rpt_ivl: DEFAULT_NAK_RPT_IVL,
            nak_rdata_ivl: DEFAULT_NAK_RDATA_IVL,
            nak_data_retries: DEFAULT_NAK_DATA_RETRIES,
            nak_ncf_retries: DEFAULT_NAK_NCF_RETRIES,
            fec: None,
            use_pgmcc: false,
            abort_on_reset: false,
        }
    }
}

impl SocketOptions {
    fn validate(&self) -> Result<()> {
        if self.max_tsdu == 0 || self.max_tsdu > DEFAULT_MAX_TSDU * 16 {
            return Err(Error::InvalidOption("max_tsdu"));
        }
        if self.rxw_sqns == 0 || self.rxw_sqns > MAX_WINDOW_LEN {
            return Err(Error::InvalidOption("rxw_sqns"));
        }
        if let Some((n, k)) = self.fec {
            if !(k as u32).is_power_of_two() || k > n || n == 0 {
                return Err(Error::InvalidOption("fec"));
            }
        }
        Ok(())
    }
}

struct Sockets {
    recv: Socket2,
    send: Socket2,
    send_router_alert: Socket2,
}

fn new_raw_socket() -> std::io::Result<Socket2> {
    Socket2::new(Domain::IPV4, Type::RAW, Some(Protocol::from(IPPROTO_PGM)))
}

/// Builds the three RFC 3208 §8.1 sockets. Raw-socket creation requires
/// elevated privileges; callers running unprivileged get `Error::Io` back
/// from [`Socket::bind`] exactly as any other `socket()` failure would.
fn build_sockets() -> Result<Sockets> {
    let recv = new_raw_socket()?;
    recv.set_reuse_address(true)?;
    let send = new_raw_socket()?;
    send.set_multicast_loop_v4(true)?;
    let send_router_alert = new_raw_socket()?;
    set_ip_hdrincl(&send)?;
    set_ip_hdrincl(&send_router_alert)?;
    set_router_alert(&send_router_alert)?;
    Ok(Sockets {
        recv,
        send,
        send_router_alert,
    })
}

#[cfg(unix)]
fn set_ip_hdrincl(sock: &Socket2) -> Result<()> {
    use std::os::fd::AsRawFd;
    let fd = sock.as_raw_fd();
    let one: libc::c_int = 1;
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::IPPROTO_IP,
            libc::IP_HDRINCL,
            std::ptr::addr_of!(one).cast(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }
    Ok(())
}

#[cfg(not(unix))]
fn set_ip_hdrincl(_sock: &Socket2) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn set_router_alert(sock: &Socket2) -> Result<()> {
    use std::os::fd::AsRawFd;
    // RFC 2113 router alert option, value 0x94040000 as a 4-byte IP option;
    // exposed via IP_OPTIONS rather than a named sockopt on Linux.
    const ROUTER_ALERT_OPTION: [u8; 4] = [0x94, 0x04, 0x00, 0x00];
    let fd = sock.as_raw_fd();
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::IPPROTO_IP,
            libc::IP_OPTIONS,
            ROUTER_ALERT_OPTION.as_ptr().cast(),
            ROUTER_ALERT_OPTION.len() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }
    Ok(())
}

#[cfg(not(unix))]
fn set_router_alert(_sock: &Socket2) -> Result<()> {
    Ok(())
}

/// Outcome of a blocking-capable `recvmsg` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvStatus {
    Normal,
    WouldBlock,
    Timeout,
    Reset,
    Eof,
}

pub struct Socket {
    options: RwLock<SocketOptions>,
    receiver: Mutex<Receiver>,
    source: Mutex<Option<Source>>,
    notify: NotifyHub,
    stats: Stats,
    sockets: Mutex<Option<Sockets>>,
    gsi: [u8; 6],
    /// Group address this socket is bound to. Written once at `bind()`,
    /// read on every inbound datagram — an atomic swap avoids taking a
    /// lock on that hot path.
    group_nla: ArcSwap<Option<Nla>>,
    bound: std::sync::atomic::AtomicBool,
    destroyed: std::sync::atomic::AtomicBool,
}

impl Socket {
    #[must_use]
    pub fn new(options: SocketOptions, gsi: [u8; 6]) -> Self {
        let rxw_sqns = options.rxw_sqns;
        let fec_n = options.fec.map(|(n, _)| n);
        let nak_timing = crate::peer::NakTiming {
            bo_ivl: options.nak_bo_ivl,
            rpt_ivl: options.nak_rpt_ivl,
            rdata_ivl: options.nak_rdata_ivl,
            ncf_retries: options.nak_ncf_retries,
            data_retries: options.nak_data_retries,
        };
        Socket {
            options: RwLock::new(options),
            receiver: Mutex::new(Receiver::new(rxw_sqns, fec_n).with_nak_timing(nak_timing)),
            source: Mutex::new(None),
            notify: NotifyHub::new(),
            stats: Stats::new(),
            sockets: Mutex::new(None),
            gsi,
            group_nla: ArcSwap::new(std::sync::Arc::new(None)),
            bound: std::sync::atomic::AtomicBool::new(false),
            destroyed: std::sync::atomic::AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn stats(&self) -> crate::stats::StatsSnapshot {
        self.stats.snapshot()
    }

    #[must_use]
    pub fn notify(&self) -> &NotifyHub {
        &self.notify
    }

    #[must_use]
    pub fn group_nla(&self) -> Option<Nla> {
        *self.group_nla.load_full()
    }

    pub fn set_option(&self, f: impl FnOnce(&mut SocketOptions)) -> Result<()> {
        if self.bound.load(std::sync::atomic::Ordering::Acquire) {
            return Err(Error::InvalidOption("socket already bound"));
        }
        let mut opts = self.options.write();
        let mut candidate = opts.clone();
        f(&mut candidate);
        candidate.validate()?;
        *opts = candidate;
        Ok(())
    }

    #[must_use]
    pub fn options(&self) -> SocketOptions {
        self.options.read().clone()
    }

    /// Binds the socket to `group`/`dst_port` on `src_port`, constructing
    /// the three underlying raw sockets and creating a [`Source`] ready to
    /// transmit.
    pub fn bind(&self, group: Ipv4Addr, dst_port: u16, src_port: u16) -> Result<()> {
        if self.destroyed.load(std::sync::atomic::Ordering::Acquire) {
            return Err(Error::Destroyed);
        }
        let opts = self.options();
        opts.validate()?;

        let built = build_sockets().inspect_err(|e| {
            log::warn!("pgm socket bind failed for group {group}: {e}");
        })?;
        {
            let mut sockets = self.sockets.lock();
            *sockets = Some(built);
        }
        self.group_nla.store(std::sync::Arc::new(Some(Nla::V4(group.octets()))));
        log::debug!("pgm socket bound to {group}:{dst_port} (src port {src_port})");

        let mut source = self.source.lock();
        let mut src = Source::new(
            self.gsi,
            src_port,
            dst_port,
            Nla::V4(group.octets()),
            opts.txw_sqns,
            opts.max_rte_bps,
            opts.max_rte_bps,
            opts.ambient_spm_ivl,
            Instant::now(),
        );
        if opts.use_pgmcc {
            src.enable_pgmcc(opts.txw_sqns as i64, (opts.txw_sqns / 2).max(1) as i64);
        }
        if let Some((n, k)) = opts.fec {
            src.enable_proactive_fec(RsEngine::new(n, k));
        }
        *source = Some(src);

        self.bound.store(true, std::sync::atomic::Ordering::Release);
        Ok(())
    }

    /// Joins an additional multicast group on the already-bound receive
    /// socket.
    pub fn join(&self, group: Ipv4Addr, iface: Ipv4Addr) -> Result<()> {
        let sockets = self.sockets.lock();
        let Some(s) = sockets.as_ref() else {
            return Err(Error::InvalidOption("socket not bound"));
        };
        s.recv
            .join_multicast_v4(&group, &iface)
            .map_err(|e| Error::JoinFailed(e.to_string()))
    }

    pub fn leave(&self, group: Ipv4Addr, iface: Ipv4Addr) -> Result<()> {
        let sockets = self.sockets.lock();
        let Some(s) = sockets.as_ref() else {
            return Err(Error::InvalidOption("socket not bound"));
        };
        s.recv
            .leave_multicast_v4(&group, &iface)
            .map_err(|e| Error::JoinFailed(e.to_string()))
    }

    /// Destroys the socket: further operations return `Error::Destroyed`.
    pub fn close(&self) {
        self.destroyed.store(true, std::sync::atomic::Ordering::Release);
        *self.sockets.lock() = None;
    }

    /// Sends `data` as one APDU, fragmenting as needed. Returns the number
    /// of payload bytes accepted. `send` is all-or-nothing: a
    /// `RateLimited`/`Congestion` error means none of it went out and the
    /// same buffer must be retried unmodified.
    pub fn send(&self, data: &[u8], now: Instant) -> Result<usize> {
        if self.destroyed.load(std::sync::atomic::Ordering::Acquire) {
            return Err(Error::Destroyed);
        }
        let mut source = self.source.lock();
        let Some(src) = source.as_mut() else {
            return Err(Error::InvalidOption("socket has no source role"));
        };
        let packets = src.send(data, now)?;
        let sockets = self.sockets.lock();
        if let Some(s) = sockets.as_ref() {
            for p in &packets {
                let _ = s.send.send(p);
                Stats::incr(&self.stats.data_packets_sent, 1);
                Stats::incr(&self.stats.data_bytes_sent, p.len() as u64);
            }
        }
        Ok(data.len())
    }

    /// Emits one ambient/heartbeat SPM if due.
    pub fn maybe_send_spm(&self, now: Instant) {
        let mut source = self.source.lock();
        let Some(src) = source.as_mut() else { return };
        if now < src.next_spm_due() {
            return;
        }
        let wire = src.send_spm(now);
        let sockets = self.sockets.lock();
        if let Some(s) = sockets.as_ref() {
            let _ = s.send_router_alert.send(&wire);
            Stats::incr(&self.stats.spm_packets_sent, 1);
        }
    }

    /// Drains one pending retransmit via the source's deferred-NAK path.
    pub fn pump_retransmit(&self, now: Instant) -> Result<()> {
        let mut source = self.source.lock();
        let Some(src) = source.as_mut() else { return Ok(()) };
        if let Some(wire) = src.on_deferred_nak(now)? {
            let sockets = self.sockets.lock();
            if let Some(s) = sockets.as_ref() {
                let _ = s.send.send(&wire);
                Stats::incr(&self.stats.rdata_packets_sent, 1);
            }
        }
        Ok(())
    }

    /// Processes one raw inbound datagram (IP header included, per the raw
    /// `recv` socket this façade binds).
    pub fn handle_datagram(&self, buf: &[u8], now: Instant) {
        let Ok((parsed, _dst_nla)) = packet::parse_raw(buf) else {
            Stats::incr(&self.stats.malformed_packets, 1);
            log::trace!("dropped malformed datagram ({} bytes)", buf.len());
            return;
        };
        let tsi = Tsi::new(parsed.header.gsi, parsed.header.src_port);
        let src_nla = Nla::V4([0, 0, 0, 0]); // populated by the caller from the UDP/IP source address in a full network stack.
        let is_parity = parsed.header.is_parity();

        match &parsed.body {
            Body::Odata(f) | Body::Rdata(f) => {
                let mut receiver = self.receiver.lock();
                receiver.on_data(tsi, f, is_parity, parsed.tsdu, parsed.options.fragment(), now, &self.notify);
                Stats::incr(&self.stats.data_packets_received, 1);
                Stats::incr(&self.stats.data_bytes_received, parsed.tsdu.len() as u64);
                if is_parity {
                    Stats::incr(&self.stats.parity_packets_received, 1);
                }
            }
            Body::Nak(f) => {
                Stats::incr(&self.stats.nak_packets_received, 1);
                let mut source = self.source.lock();
                if let Some(src) = source.as_mut() {
                    let wire = src.on_nak(crate::seq::Sqn::new(f.requested_sqn), is_parity, f.source_nla, f.group_nla);
                    let sockets = self.sockets.lock();
                    if let Some(s) = sockets.as_ref() {
                        let _ = s.send.send(&wire);
                        Stats::incr(&self.stats.ncf_packets_sent, 1);
                    }
                }
            }
            Body::Spm(_) | Body::Ncf(_) | Body::Spmr => {
                let mut receiver = self.receiver.lock();
                receiver.dispatch(tsi, src_nla, &parsed.body, &parsed.options, now, &self.notify);
            }
            Body::Ack(f) => {
                let mut source = self.source.lock();
                if let Some(src) = source.as_mut() {
                    if src.on_ack(crate::seq::Sqn::new(f.ack_rx_max), f.ack_bitmap) {
                        self.notify.signal(crate::notify::Event::Ack);
                    }
                }
            }
            // NNAK/POLL/POLR: parsed but out of this core's scope to act on.
            _ => {}
        }
    }

    /// Drains one peer's reassembled APDUs.
    pub fn recvmsg(&self, tsi: &Tsi, deliver: impl FnMut(&[crate::skb::SkbRef])) -> RecvStatus {
        if self.destroyed.load(std::sync::atomic::Ordering::Acquire) {
            return RecvStatus::Eof;
        }
        let opts = self.options();
        let rs = opts.fec.map(|(n, k)| RsEngine::new(n, k));
        let mut receiver = self.receiver.lock();
        let (count, had_loss) = receiver.recvmsg(tsi, rs.as_ref(), deliver);
        if had_loss && opts.abort_on_reset {
            self.destroyed.store(true, std::sync::atomic::Ordering::Release);
            return RecvStatus::Reset;
        }
        if had_loss {
            return RecvStatus::Reset;
        }
        if count == 0 {
            return RecvStatus::WouldBlock;
        }
        RecvStatus::Normal
    }

    /// Walks every peer's NAK timers, sending due NAKs is the caller's
    /// responsibility (this core has no transmit path configured for a
    /// receive-only socket — NAKs go out over the router-alert socket when
    /// one is bound). Returns the due `(tsi, sqns)` pairs.
    pub fn poll_receiver_timers(&self, now: Instant) -> Vec<(Tsi, Vec<crate::seq::Sqn>)> {
        self.receiver.lock().poll_all_timers(now)
    }

    pub fn reap_expired_peers(&self, now: Instant) -> Vec<Tsi> {
        self.receiver.lock().reap_expired(now)
    }

    /// The minimum wait before this socket next needs attention, bounding
    /// how long a caller should block in its I/O poll.
    #[must_use]
    pub fn next_wait(&self, now: Instant, max_wait: Duration) -> Duration {
        let source = self.source.lock();
        let deadline = source.as_ref().map(|s| s.next_spm_due());
        next_wait(&[deadline], now, max_wait)
    }

    /// Registers the bound receive socket's readable event with `poll`,
    /// so an embedding application can drive [`handle_datagram`](Self::handle_datagram)
    /// from its own `mio` event loop rather than blocking directly on this
    /// socket.
    #[cfg(unix)]
    pub fn register_recv(&self, poll: &mio::Poll, token: mio::Token) -> Result<()> {
        use std::os::fd::AsRawFd;
        let sockets = self.sockets.lock();
        let Some(s) = sockets.as_ref() else {
            return Err(Error::InvalidOption("socket not bound"));
        };
        let fd = s.recv.as_raw_fd();
        let mut source = mio::unix::SourceFd(&fd);
        poll.registry()
            .register(&mut source, token, mio::Interest::READABLE)
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbound_socket_rejects_send() {
        let sock = Socket::new(SocketOptions::default(), [1; 6]);
        let err = sock.send(b"x", Instant::now()).unwrap_err();
        assert!(matches!(err, Error::InvalidOption(_)));
    }

    #[test]
    fn set_option_rejects_bad_fec_k() {
        let sock = Socket::new(SocketOptions::default(), [1; 6]);
        let err = sock.set_option(|o| o.fec = Some((8, 3))).unwrap_err();
        assert!(matches!(err, Error::InvalidOption(_)));
    }

    #[test]
    fn closed_socket_returns_eof_on_recv() {
        let sock = Socket::new(SocketOptions::default(), [1; 6]);
        sock.close();
        let tsi = Tsi::new([0; 6], 0);
        let status = sock.recvmsg(&tsi, |_| {});
        assert_eq!(status, RecvStatus::Eof);
    }
}
