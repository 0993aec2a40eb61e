//! End-to-end scenarios driving the source and receiver engines directly,
//! feeding one's serialized wire bytes to the other through the real parser
//! rather than standing up actual sockets.

use std::time::{Duration, Instant};

use pgm::notify::NotifyHub;
use pgm::packet::header::Nla;
use pgm::packet::{self, Body};
use pgm::receiver::Receiver;
use pgm::rs::RsEngine;
use pgm::seq::Sqn;
use pgm::source::Source;
use pgm::Tsi;

const GSI: [u8; 6] = [1, 2, 3, 4, 5, 6];
const SRC_PORT: u16 = 7500;
const DST_PORT: u16 = 7500;

fn group_nla() -> Nla {
    Nla::V4([239, 1, 1, 1])
}

fn peer_nla() -> Nla {
    Nla::V4([10, 0, 0, 5])
}

fn new_source(now: Instant) -> Source {
    Source::new(
        GSI,
        SRC_PORT,
        DST_PORT,
        group_nla(),
        100,
        10_000_000,
        1_000_000,
        pgm::config::DEFAULT_AMBIENT_SPM,
        now,
    )
}

fn tsi() -> Tsi {
    Tsi::new(GSI, SRC_PORT)
}

/// Mirrors `Socket::handle_datagram`'s dispatch for the submessage kinds
/// these scenarios exercise (ODATA/RDATA/SPM/NCF), minus the I/O and stats
/// bookkeeping a real socket would also do.
fn deliver(recv: &mut Receiver, wire: &[u8], now: Instant, hub: &NotifyHub) {
    let parsed = packet::parse_udp_encap(wire).expect("well-formed wire packet");
    let is_parity = parsed.header.is_parity();
    match &parsed.body {
        Body::Odata(f) | Body::Rdata(f) => {
            recv.on_data(tsi(), f, is_parity, parsed.tsdu, parsed.options.fragment(), now, hub);
        }
        Body::Spm(_) | Body::Ncf(_) | Body::Spmr => {
            recv.dispatch(tsi(), peer_nla(), &parsed.body, &parsed.options, now, hub);
        }
        _ => panic!("unexpected body in this scenario: {:?}", parsed.body),
    }
}

#[test]
fn unfragmented_odata_happy_path() {
    let t0 = Instant::now();
    let mut src = new_source(t0);
    let mut recv = Receiver::new(100, None);
    let hub = NotifyHub::new();

    let packets = src.send(b"hello pgm world!", t0).unwrap();
    assert_eq!(packets.len(), 1);

    for p in &packets {
        deliver(&mut recv, p, t0, &hub);
    }

    let mut delivered = Vec::new();
    let (count, had_loss) = recv.recvmsg(&tsi(), None, |members| {
        for m in members {
            delivered.push(m.payload().to_vec());
        }
    });
    assert_eq!(count, 1);
    assert!(!had_loss);
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].len(), 17);
    assert_eq!(delivered[0], b"hello pgm world!");
    assert_eq!(recv.peers.with_peer(&tsi(), |p| p.rxw.cumulative_losses).unwrap(), 0);
}

#[test]
fn fragmented_apdu_reassembles_into_one_delivery() {
    let t0 = Instant::now();
    let mut src = new_source(t0);
    let mut recv = Receiver::new(100, None);
    let hub = NotifyHub::new();

    let payload = vec![0x5au8; 3000];
    let packets = src.send(&payload, t0).unwrap();
    // Default max_tsdu (1500-byte MTU minus IPv4/PGM headers) fragments a
    // 3000-byte APDU into three pieces.
    assert_eq!(packets.len(), 3);
    for p in &packets {
        let parsed = packet::parse_udp_encap(p).unwrap();
        assert!(parsed.options.fragment().is_some());
    }

    for p in &packets {
        deliver(&mut recv, p, t0, &hub);
    }

    let mut delivered = Vec::new();
    let (count, had_loss) = recv.recvmsg(&tsi(), None, |members| {
        let mut whole = Vec::new();
        for m in members {
            whole.extend_from_slice(m.payload());
        }
        delivered.push(whole);
    });
    assert_eq!(count, 1);
    assert!(!had_loss);
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0], payload);
}

#[test]
fn single_drop_recovers_via_selective_nak() {
    let t0 = Instant::now();
    let mut src = new_source(t0);
    let mut recv = Receiver::new(100, None);
    let hub = NotifyHub::new();

    let mut wire = Vec::new();
    for i in 0u8..10 {
        let packets = src.send(&[i], t0).unwrap();
        assert_eq!(packets.len(), 1);
        wire.push(packets.into_iter().next().unwrap());
    }

    // Deliver everything except sequence 5.
    for (i, p) in wire.iter().enumerate() {
        if i == 5 {
            continue;
        }
        deliver(&mut recv, p, t0, &hub);
    }
    // Back-off timer fires; the socket would turn this into an outbound NAK.
    let t1 = t0 + Duration::from_millis(60);
    let due = recv.poll_all_timers(t1);
    assert_eq!(due.len(), 1);
    let (due_tsi, due_sqns) = &due[0];
    assert_eq!(*due_tsi, tsi());
    assert_eq!(due_sqns, &vec![Sqn::new(5)]);

    // The source answers with an immediate NCF, then a deferred RDATA.
    let ncf = src.on_nak(Sqn::new(5), false, peer_nla(), group_nla());
    deliver(&mut recv, &ncf, t1, &hub);

    let rdata = src.on_deferred_nak(t1).unwrap().expect("retransmit queued");
    deliver(&mut recv, &rdata, t1, &hub);

    let mut delivered = Vec::new();
    let (count, had_loss) = recv.recvmsg(&tsi(), None, |members| {
        for m in members {
            delivered.push(m.payload().to_vec());
        }
    });
    assert_eq!(count, 10);
    assert!(!had_loss);
    for (i, d) in delivered.iter().enumerate() {
        assert_eq!(d, &vec![i as u8]);
    }
    assert_eq!(recv.peers.with_peer(&tsi(), |p| p.rxw.cumulative_losses).unwrap(), 0);
}

#[test]
fn parity_recovers_a_dropped_pair_in_a_transmission_group() {
    let t0 = Instant::now();
    let mut src = new_source(t0);
    src.enable_proactive_fec(RsEngine::new(8, 4));
    let decode_rs = RsEngine::new(8, 4);
    let mut recv = Receiver::new(100, None);
    let hub = NotifyHub::new();

    let mut per_send = Vec::new();
    for i in 0u8..4 {
        per_send.push(src.send(&[i; 4], t0).unwrap());
    }
    assert_eq!(per_send[0].len(), 1);
    assert_eq!(per_send[1].len(), 1);
    assert_eq!(per_send[2].len(), 1);
    // The 4th original completes the k=4 group: 1 original + 4 parity.
    assert_eq!(per_send[3].len(), 5);

    // Deliver originals 0 and 3, drop 1 and 2; deliver only two of the four
    // parity packets (positions 4 and 5) -- enough to reach the k=4
    // threshold alongside the two surviving originals.
    deliver(&mut recv, &per_send[0][0], t0, &hub);
    deliver(&mut recv, &per_send[3][0], t0, &hub); // original 3
    deliver(&mut recv, &per_send[3][1], t0, &hub); // parity at position 4
    deliver(&mut recv, &per_send[3][2], t0, &hub); // parity at position 5

    let mut delivered = Vec::new();
    let (count, had_loss) = recv.recvmsg(&tsi(), Some(&decode_rs), |members| {
        for m in members {
            delivered.push(m.payload().to_vec());
        }
    });
    assert_eq!(count, 4);
    assert!(!had_loss);
    assert_eq!(delivered, vec![vec![0u8; 4], vec![1u8; 4], vec![2u8; 4], vec![3u8; 4]]);
}

#[test]
fn slow_receiver_reports_reset_once_then_drains() {
    let t0 = Instant::now();
    // RXW_SQNS=4: a window this small forces the two oldest undelivered
    // packets out before the application ever calls recvmsg.
    let mut recv = Receiver::new(4, None);
    let hub = NotifyHub::new();
    let mut src = new_source(t0);

    let mut wire = Vec::new();
    for i in 0u8..6 {
        let packets = src.send(&[i], t0).unwrap();
        wire.push(packets.into_iter().next().unwrap());
    }
    for p in &wire {
        deliver(&mut recv, p, t0, &hub);
    }
    assert_eq!(recv.peers.with_peer(&tsi(), |p| p.rxw.cumulative_losses).unwrap(), 2);

    let mut delivered = Vec::new();
    let (count, had_loss) = recv.recvmsg(&tsi(), None, |members| {
        for m in members {
            delivered.push(m.payload().to_vec());
        }
    });
    assert_eq!(count, 4);
    assert!(had_loss, "the two forced-out packets must surface as a reset");
    assert_eq!(delivered, vec![vec![2u8], vec![3], vec![4], vec![5]]);

    let (count2, had_loss2) = recv.recvmsg(&tsi(), None, |_| {});
    assert_eq!(count2, 0);
    assert!(!had_loss2, "loss is reported exactly once");
}

#[test]
fn pgmcc_stalls_the_source_until_an_ack_arrives() {
    let t0 = Instant::now();
    let mut src = new_source(t0);
    src.enable_pgmcc(10, 20);

    for i in 0u8..10 {
        src.send(&[i], t0).expect("within initial token budget");
    }
    let err = src.send(&[99], t0).unwrap_err();
    let pgm::Error::Congestion(blocklen) = err else {
        panic!("expected Congestion, got {err:?}");
    };
    assert_eq!(blocklen, 1);

    assert!(src.on_ack(Sqn::new(9), 0xffff_ffff));
    src.send(&[99], t0).expect("tokens replenished by the ack");
}
