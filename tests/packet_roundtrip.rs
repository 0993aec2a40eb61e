//! Serializes every submessage kind through `Builder` and checks that
//! `parse_udp_encap` recovers the same fields byte-for-byte.

use pgm::packet::header::{AckFields, CommonHeader, Nla, NakFields, SpmFields};
use pgm::packet::options::Opt;
use pgm::packet::{self, Body, Builder, BuilderBody};

const GSI: [u8; 6] = [9, 8, 7, 6, 5, 4];

fn builder<'a>(body: BuilderBody<'a>) -> Builder<'a> {
    Builder {
        src_port: 3000,
        dst_port: 4000,
        gsi: GSI,
        body,
        opts: vec![],
        is_parity: false,
        is_var_pktlen: false,
        cached_tsdu_unfolded: None,
    }
}

#[test]
fn spm_round_trips() {
    let b = builder(BuilderBody::Spm(SpmFields {
        spm_sqn: 12,
        trail: 3,
        lead: 12,
        nla: Nla::V4([239, 0, 0, 1]),
    }));
    let mut wire = Vec::new();
    b.write(&mut wire);
    let parsed = packet::parse_udp_encap(&wire).unwrap();
    assert_eq!(parsed.header.gsi, GSI);
    match parsed.body {
        Body::Spm(f) => {
            assert_eq!(f.spm_sqn, 12);
            assert_eq!(f.trail, 3);
            assert_eq!(f.lead, 12);
            assert_eq!(f.nla, Nla::V4([239, 0, 0, 1]));
        }
        other => panic!("expected Spm, got {other:?}"),
    }
}

#[test]
fn nak_round_trips_with_both_nlas() {
    let b = builder(BuilderBody::Nak(NakFields {
        requested_sqn: 55,
        source_nla: Nla::V4([10, 0, 0, 1]),
        group_nla: Nla::V4([239, 1, 1, 1]),
    }));
    let mut wire = Vec::new();
    b.write(&mut wire);
    let parsed = packet::parse_udp_encap(&wire).unwrap();
    match parsed.body {
        Body::Nak(f) => {
            assert_eq!(f.requested_sqn, 55);
            assert_eq!(f.source_nla, Nla::V4([10, 0, 0, 1]));
            assert_eq!(f.group_nla, Nla::V4([239, 1, 1, 1]));
        }
        other => panic!("expected Nak, got {other:?}"),
    }
}

#[test]
fn ncf_round_trips_and_parity_bit_survives() {
    let mut b = builder(BuilderBody::Ncf(NakFields {
        requested_sqn: 7,
        source_nla: Nla::V4([10, 0, 0, 2]),
        group_nla: Nla::V4([239, 2, 2, 2]),
    }));
    b.is_parity = true;
    let mut wire = Vec::new();
    b.write(&mut wire);
    let parsed = packet::parse_udp_encap(&wire).unwrap();
    assert!(parsed.header.is_parity());
    assert!(matches!(parsed.body, Body::Ncf(_)));
}

#[test]
fn ack_round_trips() {
    let b = builder(BuilderBody::Ack(AckFields {
        ack_rx_max: 1000,
        ack_bitmap: 0xaaaa_aaaa,
    }));
    let mut wire = Vec::new();
    b.write(&mut wire);
    let parsed = packet::parse_udp_encap(&wire).unwrap();
    match parsed.body {
        Body::Ack(f) => {
            assert_eq!(f.ack_rx_max, 1000);
            assert_eq!(f.ack_bitmap, 0xaaaa_aaaa);
        }
        other => panic!("expected Ack, got {other:?}"),
    }
}

#[test]
fn odata_with_nak_list_option_round_trips() {
    let tsdu = b"payload bytes";
    let mut b = builder(BuilderBody::Odata(
        pgm::packet::header::DataFields {
            data_sqn: 20,
            data_trail: 0,
        },
        tsdu,
    ));
    b.opts.push(Opt::NakList {
        sqns: vec![21, 22, 23],
    });
    let mut wire = Vec::new();
    b.write(&mut wire);
    let parsed = packet::parse_udp_encap(&wire).unwrap();
    assert_eq!(parsed.tsdu, tsdu);
    assert_eq!(parsed.options.nak_list(), Some(&[21u32, 22, 23][..]));
}

#[test]
fn spmr_and_poll_carry_no_fixed_fields() {
    for body in [BuilderBody::Spmr, BuilderBody::Poll, BuilderBody::Polr] {
        let b = builder(body);
        let mut wire = Vec::new();
        b.write(&mut wire);
        let parsed = packet::parse_udp_encap(&wire).unwrap();
        assert_eq!(parsed.tsdu.len(), 0);
    }
}

#[test]
fn truncated_buffer_is_rejected() {
    let hdr = CommonHeader {
        src_port: 1,
        dst_port: 2,
        ty: 0,
        options: 0,
        checksum: 0,
        gsi: GSI,
        tsdu_length: 0,
    };
    let mut wire = Vec::new();
    hdr.write_to(&mut wire);
    wire.truncate(wire.len() - 4);
    assert!(packet::parse_udp_encap(&wire).is_err());
}
