//! Packet parsing, verification, and serialization.

pub mod header;
pub mod options;

use crate::checksum;
use crate::config::*;
use crate::error::ParseError;
use header::{AckFields, CommonHeader, DataFields, NakFields, Nla, PacketType, SpmFields};
use options::{Opt, OptionChain};

/// A fully parsed PGM packet: common header, type-specific fields, and
/// decoded option chain, plus a borrowed view of the TSDU payload (for
/// ODATA/RDATA) relative to the original buffer.
#[derive(Debug, Clone)]
pub struct Parsed<'a> {
    pub header: CommonHeader,
    pub body: Body,
    pub options: OptionChain,
    pub tsdu: &'a [u8],
}

#[derive(Debug, Clone)]
pub enum Body {
    Spm(SpmFields),
    Poll,
    Polr,
    Odata(DataFields),
    Rdata(DataFields),
    Nak(NakFields),
    NNak(NakFields),
    Ncf(NakFields),
    Spmr,
    Ack(AckFields),
}

impl Body {
    #[must_use]
    pub fn packet_type(&self) -> PacketType {
        match self {
            Body::Spm(_) => PacketType::Spm,
            Body::Poll => PacketType::Poll,
            Body::Polr => PacketType::Polr,
            Body::Odata(_) => PacketType::Odata,
            Body::Rdata(_) => PacketType::Rdata,
            Body::Nak(_) => PacketType::Nak,
            Body::NNak(_) => PacketType::NNak,
            Body::Ncf(_) => PacketType::Ncf,
            Body::Spmr => PacketType::Spmr,
            Body::Ack(_) => PacketType::Ack,
        }
    }
}

/// Strips an IPv4 header and parses the PGM packet beginning after it.
///
/// Rejects: non-IPv4 versions, IP header length/total-length inconsistent
/// with at least a PGM header's worth of payload, fragmented IP datagrams
/// (more-fragments set, or non-zero fragment offset) — PGM always expects a
/// single IP datagram per TPDU. IPv6 is not handled by this entry point; use
/// [`parse_udp_encap`] variants appropriately or a separate IPv6 strip ahead
/// of [`parse_pgm`].
pub fn parse_raw(buf: &[u8]) -> Result<(Parsed<'_>, Nla), ParseError> {
    if buf.len() < 20 {
        return Err(ParseError::Bounds);
    }
    let ver = buf[0] >> 4;
    if ver != 4 {
        return Err(ParseError::AfNoSupport);
    }
    let ihl = ((buf[0] & 0x0f) as usize) * 4;
    if ihl < 20 || buf.len() < ihl {
        return Err(ParseError::Malformed);
    }
    let total_length = u16::from_be_bytes([buf[2], buf[3]]) as usize;
    if total_length < ihl + PGM_HEADER_LEN || total_length > buf.len() {
        return Err(ParseError::Bounds);
    }
    let flags_frag = u16::from_be_bytes([buf[6], buf[7]]);
    let more_fragments = flags_frag & 0x2000 != 0;
    let frag_offset = flags_frag & 0x1fff;
    if more_fragments || frag_offset != 0 {
        return Err(ParseError::Proto);
    }
    let dst_nla = Nla::V4(buf[16..20].try_into().unwrap());
    let pgm_buf = &buf[ihl..total_length];
    let parsed = parse_pgm(pgm_buf)?;
    Ok((parsed, dst_nla))
}

/// Parses a PGM packet with no IP header stripped (UDP-encapsulated mode).
pub fn parse_udp_encap(buf: &[u8]) -> Result<Parsed<'_>, ParseError> {
    if buf.len() < PGM_HEADER_LEN {
        return Err(ParseError::Bounds);
    }
    parse_pgm(buf)
}

fn parse_pgm(buf: &[u8]) -> Result<Parsed<'_>, ParseError> {
    let header = CommonHeader::parse(buf)?;
    let packet_type = PacketType::from_byte(header.ty).ok_or(ParseError::Proto)?;
    let mut off = PGM_HEADER_LEN;

    let (body, fixed_body_len) = match packet_type {
        PacketType::Spm => {
            let (f, n) = SpmFields::parse(&buf[off..])?;
            (Body::Spm(f), n)
        }
        PacketType::Poll => (Body::Poll, 0),
        PacketType::Polr => (Body::Polr, 0),
        PacketType::Odata => {
            let f = DataFields::parse(&buf[off..])?;
            (Body::Odata(f), DATA_FIXED_LEN)
        }
        PacketType::Rdata => {
            let f = DataFields::parse(&buf[off..])?;
            (Body::Rdata(f), DATA_FIXED_LEN)
        }
        PacketType::Nak => {
            let (f, n) = NakFields::parse(&buf[off..])?;
            (Body::Nak(f), n)
        }
        PacketType::NNak => {
            let (f, n) = NakFields::parse(&buf[off..])?;
            (Body::NNak(f), n)
        }
        PacketType::Ncf => {
            let (f, n) = NakFields::parse(&buf[off..])?;
            (Body::Ncf(f), n)
        }
        PacketType::Spmr => (Body::Spmr, 0),
        PacketType::Ack => {
            let f = AckFields::parse(&buf[off..])?;
            (Body::Ack(f), ACK_FIXED_LEN)
        }
    };
    off += fixed_body_len;

    let options = if header.options_present() {
        if off > buf.len() {
            return Err(ParseError::Bounds);
        }
        options::parse_chain(&buf[off..])?
    } else {
        OptionChain::default()
    };

    // The TSDU for ODATA/RDATA runs from the end of the fixed data header
    // to tsdu_length bytes later (options, if present, were already
    // accounted for by the source ahead of the TSDU on the wire per
    // TSDU precedes the option chain in
    // payload order for these types is not the case; rather, the TSDU
    // occupies the tail of the packet and option chain sits directly after
    // the fixed header). tsdu_length is the authoritative length.
    let tsdu_start = off + options_span(&buf[off..], header.options_present());
    if tsdu_start > buf.len() || buf.len() - tsdu_start < header.tsdu_length as usize {
        return Err(ParseError::Bounds);
    }
    let tsdu = &buf[tsdu_start..tsdu_start + header.tsdu_length as usize];

    verify_checksum(&header, packet_type, buf, off)?;
    verify_type_specific(&body, &options)?;

    Ok(Parsed {
        header,
        body,
        options,
        tsdu,
    })
}

/// Returns how many bytes the option chain occupies starting at `buf[0]`
/// (0 if `present` is false). Reuses [`options::parse_chain`]'s own length
/// field rather than re-walking, since the chain was already validated by
/// the caller immediately afterward.
fn options_span(buf: &[u8], present: bool) -> usize {
    if !present || buf.len() < OPT_LENGTH_LEN {
        return 0;
    }
    u16::from_be_bytes([buf[2], buf[3]]) as usize
}

fn verify_checksum(
    header: &CommonHeader,
    packet_type: PacketType,
    buf: &[u8],
    _body_end: usize,
) -> Result<(), ParseError> {
    if header.checksum == 0 {
        return if packet_type.requires_checksum() {
            Err(ParseError::Proto)
        } else {
            Ok(())
        };
    }
    // Recompute over the whole PGM region with the checksum field zeroed.
    let mut scratch = buf.to_vec();
    scratch[6] = 0;
    scratch[7] = 0;
    let computed = checksum::compute(&scratch, &[]);
    if computed != header.checksum {
        return Err(ParseError::Cksum);
    }
    Ok(())
}

fn verify_type_specific(body: &Body, options: &OptionChain) -> Result<(), ParseError> {
    match body {
        Body::Nak(f) | Body::NNak(f) | Body::Ncf(f) => {
            if f.source_nla.afi() != f.group_nla.afi() {
                return Err(ParseError::Proto);
            }
            if let Some(list) = options.nak_list() {
                if list.len() > MAX_NAK_LIST_RECV + 1 {
                    return Err(ParseError::Malformed);
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Builder for serializing an outbound PGM packet. Fields are filled in the
/// "reverse" order (payload, then fragment/PGMCC
/// options, then `OPT_LENGTH`, then the fixed header, checksum last); the
/// public API here just takes all the pieces up front and performs that
/// ordering internally so call sites don't need to replicate it.
pub struct Builder<'a> {
    pub src_port: u16,
    pub dst_port: u16,
    pub gsi: [u8; 6],
    pub body: BuilderBody<'a>,
    pub opts: Vec<Opt>,
    pub is_parity: bool,
    pub is_var_pktlen: bool,
    /// Pre-computed unfolded checksum of `tsdu` alone, if the caller has one
    /// cached (retransmit path); recomputed from scratch otherwise.
    pub cached_tsdu_unfolded: Option<u32>,
}

pub enum BuilderBody<'a> {
    Spm(SpmFields),
    Odata(DataFields, &'a [u8]),
    Rdata(DataFields, &'a [u8]),
    Nak(NakFields),
    NNak(NakFields),
    Ncf(NakFields),
    Spmr,
    Poll,
    Polr,
    Ack(AckFields),
}

impl<'a> Builder<'a> {
    /// Serializes into `out`, returning the unfolded TSDU checksum actually
    /// used (so the caller can cache it for a future retransmit).
    pub fn write(&self, out: &mut Vec<u8>) -> Option<u32> {
        let start = out.len();
        // Reserve common header space; filled last.
        out.resize(start + PGM_HEADER_LEN, 0);

        let ty = match &self.body {
            BuilderBody::Spm(f) => {
                f.write_to(out);
                TYPE_SPM
            }
            BuilderBody::Odata(f, _) => {
                f.write_to(out);
                TYPE_ODATA
            }
            BuilderBody::Rdata(f, _) => {
                f.write_to(out);
                TYPE_RDATA
            }
            BuilderBody::Nak(f) => {
                f.write_to(out);
                TYPE_NAK
            }
            BuilderBody::NNak(f) => {
                f.write_to(out);
                TYPE_NNAK
            }
            BuilderBody::Ncf(f) => {
                f.write_to(out);
                TYPE_NCF
            }
            BuilderBody::Spmr => TYPE_SPMR,
            BuilderBody::Poll => TYPE_POLL,
            BuilderBody::Polr => TYPE_POLR,
            BuilderBody::Ack(f) => {
                f.write_to(out);
                TYPE_ACK
            }
        };

        let mut options_byte = 0u8;
        if !self.opts.is_empty() {
            options::write_chain(&self.opts, out);
            options_byte |= OPT_BIT_PRESENT;
        }
        if self.is_parity {
            options_byte |= OPT_BIT_PARITY;
        }
        if self.is_var_pktlen {
            options_byte |= OPT_BIT_VAR_PKTLEN;
        }

        let (tsdu, unfolded): (&[u8], Option<u32>) = match &self.body {
            BuilderBody::Odata(_, tsdu) | BuilderBody::Rdata(_, tsdu) => {
                let u = self
                    .cached_tsdu_unfolded
                    .unwrap_or_else(|| checksum::unfolded_sum(tsdu, 0));
                (*tsdu, Some(u))
            }
            _ => (&[], None),
        };
        out.extend_from_slice(tsdu);

        // Fill common header now that ty/tsdu are known.
        let hdr = CommonHeader {
            src_port: self.src_port,
            dst_port: self.dst_port,
            ty,
            options: options_byte,
            checksum: 0,
            gsi: self.gsi,
            tsdu_length: tsdu.len() as u16,
        };
        let mut hdr_bytes = Vec::with_capacity(PGM_HEADER_LEN);
        hdr.write_to(&mut hdr_bytes);
        out[start..start + PGM_HEADER_LEN].copy_from_slice(&hdr_bytes);

        // Checksum is computed last, over the whole PGM region with the
        // checksum field zeroed (it already is, since we just wrote it as 0).
        let cksum = checksum::compute(&out[start..], &[]);
        out[start + 6..start + 8].copy_from_slice(&cksum.to_be_bytes());

        unfolded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn odata_builder<'a>(tsdu: &'a [u8], sqn: u32) -> Builder<'a> {
        Builder {
            src_port: 1000,
            dst_port: 2000,
            gsi: [1, 2, 3, 4, 5, 6],
            body: BuilderBody::Odata(
                DataFields {
                    data_sqn: sqn,
                    data_trail: 0,
                },
                tsdu,
            ),
            opts: vec![],
            is_parity: false,
            is_var_pktlen: false,
            cached_tsdu_unfolded: None,
        }
    }

    #[test]
    fn odata_round_trips_through_udp_encap() {
        let tsdu = b"hello, pgm!";
        let b = odata_builder(tsdu, 42);
        let mut wire = Vec::new();
        b.write(&mut wire);

        let parsed = parse_udp_encap(&wire).unwrap();
        assert_eq!(parsed.tsdu, tsdu);
        match parsed.body {
            Body::Odata(f) => assert_eq!(f.data_sqn, 42),
            _ => panic!("wrong type"),
        }
    }

    #[test]
    fn checksum_mismatch_is_rejected() {
        let tsdu = b"abc";
        let b = odata_builder(tsdu, 1);
        let mut wire = Vec::new();
        b.write(&mut wire);
        // Corrupt a payload byte without fixing the checksum.
        let n = wire.len();
        wire[n - 1] ^= 0xff;
        assert_eq!(parse_udp_encap(&wire), Err(ParseError::Cksum));
    }

    #[test]
    fn fragmented_odata_round_trips_with_option() {
        let tsdu = &[0u8; 100][..];
        let mut b = odata_builder(tsdu, 7);
        b.opts.push(Opt::Fragment {
            apdu_first_sqn: 7,
            apdu_frag_off: 0,
            apdu_len: 300,
        });
        let mut wire = Vec::new();
        b.write(&mut wire);
        let parsed = parse_udp_encap(&wire).unwrap();
        assert_eq!(parsed.options.fragment(), Some((7, 0, 300)));
        assert_eq!(parsed.tsdu.len(), 100);
    }

    #[test]
    fn zero_checksum_odata_is_rejected() {
        let mut wire = vec![0u8; PGM_HEADER_LEN];
        wire[4] = TYPE_ODATA;
        // checksum (bytes 6,7) left zero; data fields absent -> Bounds first
        // is also acceptable, but with valid fields and zero checksum it
        // must be Proto. Build a minimal valid ODATA manually.
        let mut full = Vec::new();
        let hdr = CommonHeader {
            src_port: 1,
            dst_port: 2,
            ty: TYPE_ODATA,
            options: 0,
            checksum: 0,
            gsi: [0; 6],
            tsdu_length: 0,
        };
        hdr.write_to(&mut full);
        full.extend_from_slice(&0u32.to_be_bytes());
        full.extend_from_slice(&0u32.to_be_bytes());
        assert_eq!(parse_udp_encap(&full), Err(ParseError::Proto));
        let _ = wire;
    }
}
