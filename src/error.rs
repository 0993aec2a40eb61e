//! Caller-visible error type.
//!
//! Packet-parsing failures (`Bounds`, `Cksum`, `Proto`, `Malformed`,
//! `AfNoSupport`) never reach a caller directly: they are counted in
//! per-socket statistics (see [`crate::stats::Stats`]) and the offending
//! datagram is dropped. Only the variants below cross the public API.

use std::fmt;
use std::io;

/// Result alias used throughout the crate's public API.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by public socket operations.
#[derive(Debug)]
pub enum Error {
    // === Flow-control exits ===
    /// Non-blocking operation has no data/capacity available right now.
    WouldBlock,
    /// Rate-limiter rejected the operation; caller should budget `blocklen`
    /// bytes before retrying.
    RateLimited(usize),
    /// A blocking operation's deadline elapsed.
    Timeout,
    /// PGMCC has withheld all tokens; caller should wait on the ACK
    /// notification channel. Carries the same `blocklen` semantics as
    /// `RateLimited`.
    Congestion(usize),

    // === Data-loss exits ===
    /// Unrecoverable window loss occurred. The socket remains usable unless
    /// `abort_on_reset` was set, in which case it is also `Destroyed`.
    Reset,
    /// A peer's `OPT_FIN` has been processed and its receive window fully
    /// drained; no further data will arrive from it.
    Eof,

    // === Configuration errors ===
    /// A socket option was set with an out-of-range or unsupported value.
    InvalidOption(&'static str),

    // === Setup errors ===
    /// `bind()` failed; carries a human-readable reason.
    BindFailed(String),
    /// Joining or leaving a multicast group failed.
    JoinFailed(String),

    // === Terminal state ===
    /// The socket has been destroyed via `close()`; no further operations
    /// are permitted.
    Destroyed,

    // === Other ===
    /// Underlying OS error not covered by a more specific variant.
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::WouldBlock => write!(f, "operation would block"),
            Error::RateLimited(n) => write!(f, "rate limited, retry after {n} bytes"),
            Error::Timeout => write!(f, "operation timed out"),
            Error::Congestion(n) => write!(f, "congestion controlled, retry after {n} bytes"),
            Error::Reset => write!(f, "unrecoverable data loss"),
            Error::Eof => write!(f, "peer session ended"),
            Error::InvalidOption(name) => write!(f, "invalid value for option {name}"),
            Error::BindFailed(reason) => write!(f, "bind failed: {reason}"),
            Error::JoinFailed(reason) => write!(f, "multicast group join/leave failed: {reason}"),
            Error::Destroyed => write!(f, "socket is destroyed"),
            Error::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::WouldBlock => Error::WouldBlock,
            io::ErrorKind::TimedOut => Error::Timeout,
            _ => Error::Io(e),
        }
    }
}

/// Internal parse-error tags (§4.7). Never surfaced per-packet; the caller
/// only ever sees aggregate counters. Kept separate from [`Error`] so the
/// packet codec's signature can't be mistaken for something a socket
/// operation returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// Sequence or length field outside the legal range for the window.
    Bounds,
    /// Checksum verification failed.
    Cksum,
    /// A required field/invariant of the packet type was violated.
    Proto,
    /// Option chain or header was malformed (truncated, looped, oversized).
    Malformed,
    /// Address family not supported by this entry point (e.g. IPv6 via
    /// `parse_raw`).
    AfNoSupport,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ParseError::Bounds => "bounds",
            ParseError::Cksum => "checksum mismatch",
            ParseError::Proto => "protocol violation",
            ParseError::Malformed => "malformed packet",
            ParseError::AfNoSupport => "address family not supported",
        };
        write!(f, "{s}")
    }
}
