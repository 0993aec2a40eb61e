//! `OPT_LENGTH` option chain: parsing and serialization of the recognized
//! PGM options.

use crate::config::*;
use crate::error::ParseError;
use crate::packet::header::Nla;

/// One fully decoded option from the chain.
#[derive(Debug, Clone, PartialEq)]
pub enum Opt {
    Fragment {
        apdu_first_sqn: u32,
        apdu_frag_off: u32,
        apdu_len: u32,
    },
    NakList {
        sqns: Vec<u32>,
    },
    ParityPrm {
        proactive: bool,
        ondemand: bool,
        parity_tgsize: u32,
    },
    PgmccData {
        tsp: u32,
        acker_nla: Nla,
    },
    PgmccFeedback {
        tsp: u32,
        loss_rate: u16,
        acker_nla: Nla,
    },
    Fin,
    Syn,
    Rst,
    Crqst {
        rxp: bool,
    },
    VarPktlen {
        len: u16,
    },
}

/// The decoded option chain for one packet plus a flag for whether the wire
/// form set `OPT_NETWORK` (propagated across a forwarding boundary — parsed
/// but not acted on by this core).
#[derive(Debug, Clone, Default)]
pub struct OptionChain {
    pub opts: Vec<Opt>,
}

impl OptionChain {
    #[must_use]
    pub fn fragment(&self) -> Option<(u32, u32, u32)> {
        self.opts.iter().find_map(|o| match o {
            Opt::Fragment {
                apdu_first_sqn,
                apdu_frag_off,
                apdu_len,
            } => Some((*apdu_first_sqn, *apdu_frag_off, *apdu_len)),
            _ => None,
        })
    }

    #[must_use]
    pub fn nak_list(&self) -> Option<&[u32]> {
        self.opts.iter().find_map(|o| match o {
            Opt::NakList { sqns } => Some(sqns.as_slice()),
            _ => None,
        })
    }

    #[must_use]
    pub fn parity_prm(&self) -> Option<(bool, bool, u32)> {
        self.opts.iter().find_map(|o| match o {
            Opt::ParityPrm {
                proactive,
                ondemand,
                parity_tgsize,
            } => Some((*proactive, *ondemand, *parity_tgsize)),
            _ => None,
        })
    }

    #[must_use]
    pub fn has_fin(&self) -> bool {
        self.opts.iter().any(|o| matches!(o, Opt::Fin))
    }

    #[must_use]
    pub fn has_syn(&self) -> bool {
        self.opts.iter().any(|o| matches!(o, Opt::Syn))
    }

    #[must_use]
    pub fn crqst(&self) -> Option<bool> {
        self.opts.iter().find_map(|o| match o {
            Opt::Crqst { rxp } => Some(*rxp),
            _ => None,
        })
    }

    #[must_use]
    pub fn var_pktlen(&self) -> Option<u16> {
        self.opts.iter().find_map(|o| match o {
            Opt::VarPktlen { len } => Some(*len),
            _ => None,
        })
    }
}

/// Walks `OPT_LENGTH` then repeated `OPT_HEADER`s out of `buf`, which must
/// start at the `OPT_LENGTH` pseudo-option itself. Stops on the `OPT_END`
/// flag bit, option-space exhaustion, or [`MAX_OPTIONS`] entries, whichever
/// comes first. Each option is individually length-bounded against the
/// remaining declared option space; overrunning that is `Malformed`.
pub fn parse_chain(buf: &[u8]) -> Result<OptionChain, ParseError> {
    if buf.len() < OPT_LENGTH_LEN || buf[0] != OPT_LENGTH {
        return Err(ParseError::Malformed);
    }
    let total_len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
    if total_len < OPT_LENGTH_LEN || total_len > buf.len() {
        return Err(ParseError::Malformed);
    }
    let mut chain = OptionChain::default();
    let mut off = OPT_LENGTH_LEN;
    let mut count = 0usize;
    loop {
        if off >= total_len {
            break;
        }
        if count >= MAX_OPTIONS {
            return Err(ParseError::Malformed);
        }
        count += 1;
        if off + OPT_HEADER_LEN > total_len {
            return Err(ParseError::Malformed);
        }
        let raw_type = buf[off];
        let opt_len = buf[off + 1] as usize;
        let is_end = raw_type & OPT_END_MASK != 0;
        let ty = raw_type & OPT_TYPE_MASK;
        if opt_len < OPT_HEADER_LEN || off + opt_len > total_len {
            return Err(ParseError::Malformed);
        }
        let body = &buf[off + OPT_HEADER_LEN..off + opt_len];
        if let Some(opt) = parse_one(ty, body)? {
            chain.opts.push(opt);
        }
        off += opt_len;
        if is_end {
            break;
        }
    }
    Ok(chain)
}

fn parse_one(ty: u8, body: &[u8]) -> Result<Option<Opt>, ParseError> {
    Ok(Some(match ty {
        OPT_FRAGMENT => {
            if body.len() < 13 {
                return Err(ParseError::Malformed);
            }
            // body[0] is a reserved/opt-fragment-flags byte.
            Opt::Fragment {
                apdu_first_sqn: u32::from_be_bytes(body[1..5].try_into().unwrap()),
                apdu_frag_off: u32::from_be_bytes(body[5..9].try_into().unwrap()),
                apdu_len: u32::from_be_bytes(body[9..13].try_into().unwrap()),
            }
        }
        OPT_NAK_LIST => {
            if body.is_empty() {
                return Err(ParseError::Malformed);
            }
            // body[0] reserved; remaining bytes are 4-byte SQNs.
            let rest = &body[1..];
            if rest.len() % 4 != 0 {
                return Err(ParseError::Malformed);
            }
            let n = rest.len() / 4;
            if n > MAX_NAK_LIST_RECV {
                return Err(ParseError::Malformed);
            }
            let sqns = rest
                .chunks_exact(4)
                .map(|c| u32::from_be_bytes(c.try_into().unwrap()))
                .collect();
            Opt::NakList { sqns }
        }
        OPT_PARITY_PRM => {
            if body.len() < 4 {
                return Err(ParseError::Malformed);
            }
            let flags = body[0];
            Opt::ParityPrm {
                proactive: flags & PARITY_PRM_PRO != 0,
                ondemand: flags & PARITY_PRM_OND != 0,
                parity_tgsize: u32::from_be_bytes(body[0..4].try_into().unwrap()) & 0x00ff_ffff,
            }
        }
        OPT_PGMCC_DATA => {
            if body.len() < 8 {
                return Err(ParseError::Malformed);
            }
            let tsp = u32::from_be_bytes(body[0..4].try_into().unwrap());
            let afi = u16::from_be_bytes(body[4..6].try_into().unwrap());
            let (acker_nla, _) = Nla::parse(afi, &body[8..])?;
            Opt::PgmccData { tsp, acker_nla }
        }
        OPT_PGMCC_FEEDBACK => {
            if body.len() < 10 {
                return Err(ParseError::Malformed);
            }
            let tsp = u32::from_be_bytes(body[0..4].try_into().unwrap());
            let loss_rate = u16::from_be_bytes(body[4..6].try_into().unwrap());
            let afi = u16::from_be_bytes(body[6..8].try_into().unwrap());
            let (acker_nla, _) = Nla::parse(afi, &body[8..])?;
            Opt::PgmccFeedback {
                tsp,
                loss_rate,
                acker_nla,
            }
        }
        OPT_FIN => Opt::Fin,
        OPT_SYN => Opt::Syn,
        OPT_RST => Opt::Rst,
        OPT_CRQST => {
            let rxp = body.first().is_some_and(|b| b & 0x01 != 0);
            Opt::Crqst { rxp }
        }
        OPT_VAR_PKTLEN => {
            if body.len() < 2 {
                return Err(ParseError::Malformed);
            }
            Opt::VarPktlen {
                len: u16::from_be_bytes(body[0..2].try_into().unwrap()),
            }
        }
        // Unknown/unhandled option types are skipped rather than rejected;
        // only a length overrun is fatal to the whole packet.
        _ => return Ok(None),
    }))
}

/// Serializes `opts` into a fresh `OPT_LENGTH`-prefixed chain, setting
/// `OPT_END` on the final entry.
pub fn write_chain(opts: &[Opt], out: &mut Vec<u8>) {
    let start = out.len();
    out.push(OPT_LENGTH);
    out.push(OPT_LENGTH_LEN as u8);
    out.extend_from_slice(&[0, 0]); // total length patched below

    for (i, opt) in opts.iter().enumerate() {
        let is_last = i + 1 == opts.len();
        write_one(opt, is_last, out);
    }

    let total_len = (out.len() - start) as u16;
    out[start + 2..start + 4].copy_from_slice(&total_len.to_be_bytes());
}

fn write_one(opt: &Opt, is_last: bool, out: &mut Vec<u8>) {
    let hdr_pos = out.len();
    let raw_type_pos = hdr_pos;
    let len_pos = hdr_pos + 1;
    out.push(0); // type placeholder
    out.push(0); // length placeholder

    let ty = match opt {
        Opt::Fragment {
            apdu_first_sqn,
            apdu_frag_off,
            apdu_len,
        } => {
            out.push(0);
            out.extend_from_slice(&apdu_first_sqn.to_be_bytes());
            out.extend_from_slice(&apdu_frag_off.to_be_bytes());
            out.extend_from_slice(&apdu_len.to_be_bytes());
            OPT_FRAGMENT
        }
        Opt::NakList { sqns } => {
            out.push(0);
            for s in sqns.iter().take(MAX_NAK_LIST_SEND) {
                out.extend_from_slice(&s.to_be_bytes());
            }
            OPT_NAK_LIST
        }
        Opt::ParityPrm {
            proactive,
            ondemand,
            parity_tgsize,
        } => {
            let mut flags_and_size = *parity_tgsize & 0x00ff_ffff;
            if *proactive {
                flags_and_size |= (PARITY_PRM_PRO as u32) << 24;
            }
            if *ondemand {
                flags_and_size |= (PARITY_PRM_OND as u32) << 24;
            }
            out.extend_from_slice(&flags_and_size.to_be_bytes());
            OPT_PARITY_PRM
        }
        Opt::PgmccData { tsp, acker_nla } => {
            out.extend_from_slice(&tsp.to_be_bytes());
            out.extend_from_slice(&acker_nla.afi().to_be_bytes());
            out.extend_from_slice(&[0, 0]);
            acker_nla.write_to(out);
            OPT_PGMCC_DATA
        }
        Opt::PgmccFeedback {
            tsp,
            loss_rate,
            acker_nla,
        } => {
            out.extend_from_slice(&tsp.to_be_bytes());
            out.extend_from_slice(&loss_rate.to_be_bytes());
            out.extend_from_slice(&acker_nla.afi().to_be_bytes());
            out.extend_from_slice(&[0, 0]);
            acker_nla.write_to(out);
            OPT_PGMCC_FEEDBACK
        }
        Opt::Fin => OPT_FIN,
        Opt::Syn => OPT_SYN,
        Opt::Rst => OPT_RST,
        Opt::Crqst { rxp } => {
            out.push(if *rxp { 0x01 } else { 0x00 });
            OPT_CRQST
        }
        Opt::VarPktlen { len } => {
            out.extend_from_slice(&len.to_be_bytes());
            OPT_VAR_PKTLEN
        }
    };

    let raw_type = if is_last { ty | OPT_END_MASK } else { ty };
    let opt_len = (out.len() - hdr_pos) as u8;
    out[raw_type_pos] = raw_type;
    out[len_pos] = opt_len;
}
