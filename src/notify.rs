//! Readiness notification channels: one bounded, single-consumer channel per
//! event kind a caller can block on (`recvmsg`'s blocking path selects over
//! all of them).
//!
//! Grounded on a publish/subscribe hub broadcasting readiness events over
//! `crossbeam`-style channels, narrowed here from an N-subscriber broadcast
//! to exactly one consumer per channel kind — a PGM socket has exactly one
//! application-facing reader.

use crossbeam::channel::{bounded, Receiver, Sender, TryRecvError};

/// The distinct readiness signals a socket can wait on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// New data available via `recvmsg`.
    RecvSock,
    /// A repair (RDATA/parity-reconstructed) completion is ready.
    RepairSock,
    /// An APDU is pending reassembly but not yet complete.
    PendingSock,
    /// An ACK is due to be sent or was just received.
    Ack,
}

/// One coalescing readiness channel per [`Event`] kind: a `push` when the
/// channel is already non-empty is a harmless no-op, matching level-
/// triggered (not edge-triggered) readiness.
pub struct NotifyChannel {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl NotifyChannel {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = bounded(1);
        NotifyChannel { tx, rx }
    }

    /// Marks this channel ready; idempotent while already-pending.
    pub fn signal(&self) {
        let _ = self.tx.try_send(());
    }

    /// Clears readiness without blocking.
    pub fn try_recv(&self) -> bool {
        match self.rx.try_recv() {
            Ok(()) => true,
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => false,
        }
    }

    #[must_use]
    pub fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }
}

impl Default for NotifyChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// The full set of channels a socket exposes.
pub struct NotifyHub {
    pub recv_sock: NotifyChannel,
    pub repair_sock: NotifyChannel,
    pub pending_sock: NotifyChannel,
    pub ack: NotifyChannel,
}

impl NotifyHub {
    #[must_use]
    pub fn new() -> Self {
        NotifyHub {
            recv_sock: NotifyChannel::new(),
            repair_sock: NotifyChannel::new(),
            pending_sock: NotifyChannel::new(),
            ack: NotifyChannel::new(),
        }
    }

    pub fn signal(&self, event: Event) {
        match event {
            Event::RecvSock => self.recv_sock.signal(),
            Event::RepairSock => self.repair_sock.signal(),
            Event::PendingSock => self.pending_sock.signal(),
            Event::Ack => self.ack.signal(),
        }
    }
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_then_recv_drains_exactly_once() {
        let chan = NotifyChannel::new();
        assert!(!chan.try_recv());
        chan.signal();
        assert!(chan.try_recv());
        assert!(!chan.try_recv());
    }

    #[test]
    fn repeated_signal_before_recv_is_idempotent() {
        let chan = NotifyChannel::new();
        chan.signal();
        chan.signal();
        chan.signal();
        assert!(chan.try_recv());
        assert!(!chan.try_recv());
    }

    #[test]
    fn hub_dispatches_to_the_right_channel() {
        let hub = NotifyHub::new();
        hub.signal(Event::Ack);
        assert!(hub.ack.try_recv());
        assert!(!hub.recv_sock.try_recv());
    }
}
