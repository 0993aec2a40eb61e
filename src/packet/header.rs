//! PGM common header and type-specific fixed headers.

use crate::config::*;
use crate::error::ParseError;

/// Network-layer address carried in SPM/NAK/NCF/PGMCC options — either an
/// IPv4 or IPv6 address, tagged by AFI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nla {
    V4([u8; 4]),
    V6([u8; 16]),
}

impl Nla {
    #[must_use]
    pub fn afi(&self) -> u16 {
        match self {
            Nla::V4(_) => AFI_IP,
            Nla::V6(_) => AFI_IP6,
        }
    }

    #[must_use]
    pub fn wire_len(&self) -> usize {
        match self {
            Nla::V4(_) => 4,
            Nla::V6(_) => 16,
        }
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        match self {
            Nla::V4(a) => out.extend_from_slice(a),
            Nla::V6(a) => out.extend_from_slice(a),
        }
    }

    pub fn parse(afi: u16, buf: &[u8]) -> Result<(Nla, usize), ParseError> {
        match afi {
            AFI_IP => {
                let a: [u8; 4] = buf.get(0..4).ok_or(ParseError::Bounds)?.try_into().unwrap();
                Ok((Nla::V4(a), 4))
            }
            AFI_IP6 => {
                let a: [u8; 16] = buf.get(0..16).ok_or(ParseError::Bounds)?.try_into().unwrap();
                Ok((Nla::V6(a), 16))
            }
            _ => Err(ParseError::AfNoSupport),
        }
    }
}

/// PGM packet type, decoded from the common header's `type` byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Spm,
    Poll,
    Polr,
    Odata,
    Rdata,
    Nak,
    NNak,
    Ncf,
    Spmr,
    Ack,
}

impl PacketType {
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            TYPE_SPM => PacketType::Spm,
            TYPE_POLL => PacketType::Poll,
            TYPE_POLR => PacketType::Polr,
            TYPE_ODATA => PacketType::Odata,
            TYPE_RDATA => PacketType::Rdata,
            TYPE_NAK => PacketType::Nak,
            TYPE_NNAK => PacketType::NNak,
            TYPE_NCF => PacketType::Ncf,
            TYPE_SPMR => PacketType::Spmr,
            TYPE_ACK => PacketType::Ack,
            _ => return None,
        })
    }

    #[must_use]
    pub fn to_byte(self) -> u8 {
        match self {
            PacketType::Spm => TYPE_SPM,
            PacketType::Poll => TYPE_POLL,
            PacketType::Polr => TYPE_POLR,
            PacketType::Odata => TYPE_ODATA,
            PacketType::Rdata => TYPE_RDATA,
            PacketType::Nak => TYPE_NAK,
            PacketType::NNak => TYPE_NNAK,
            PacketType::Ncf => TYPE_NCF,
            PacketType::Spmr => TYPE_SPMR,
            PacketType::Ack => TYPE_ACK,
        }
    }

    /// ODATA and RDATA are the only types that carry a mandatory checksum
    /// (a zero checksum is accepted only for non-ODATA/RDATA
    /// types").
    #[must_use]
    pub fn requires_checksum(self) -> bool {
        matches!(self, PacketType::Odata | PacketType::Rdata)
    }
}

/// PGM common header: the first 16 bytes of every PGM packet.
#[derive(Debug, Clone, Copy)]
pub struct CommonHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub ty: u8,
    pub options: u8,
    pub checksum: u16,
    pub gsi: [u8; 6],
    pub tsdu_length: u16,
}

impl CommonHeader {
    #[must_use]
    pub fn options_present(&self) -> bool {
        self.options & OPT_BIT_PRESENT != 0
    }

    #[must_use]
    pub fn is_parity(&self) -> bool {
        self.options & OPT_BIT_PARITY != 0
    }

    #[must_use]
    pub fn is_var_pktlen(&self) -> bool {
        self.options & OPT_BIT_VAR_PKTLEN != 0
    }

    pub fn parse(buf: &[u8]) -> Result<Self, ParseError> {
        if buf.len() < PGM_HEADER_LEN {
            return Err(ParseError::Bounds);
        }
        Ok(CommonHeader {
            src_port: u16::from_be_bytes([buf[0], buf[1]]),
            dst_port: u16::from_be_bytes([buf[2], buf[3]]),
            ty: buf[4],
            options: buf[5],
            checksum: u16::from_be_bytes([buf[6], buf[7]]),
            gsi: buf[8..14].try_into().unwrap(),
            tsdu_length: u16::from_be_bytes([buf[14], buf[15]]),
        })
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.src_port.to_be_bytes());
        out.extend_from_slice(&self.dst_port.to_be_bytes());
        out.push(self.ty);
        out.push(self.options);
        out.extend_from_slice(&self.checksum.to_be_bytes());
        out.extend_from_slice(&self.gsi);
        out.extend_from_slice(&self.tsdu_length.to_be_bytes());
    }
}

/// Fixed fields following the common header for an SPM.
#[derive(Debug, Clone, Copy)]
pub struct SpmFields {
    pub spm_sqn: u32,
    pub trail: u32,
    pub lead: u32,
    pub nla: Nla,
}

impl SpmFields {
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), ParseError> {
        if buf.len() < 16 {
            return Err(ParseError::Bounds);
        }
        let spm_sqn = u32::from_be_bytes(buf[0..4].try_into().unwrap());
        let trail = u32::from_be_bytes(buf[4..8].try_into().unwrap());
        let lead = u32::from_be_bytes(buf[8..12].try_into().unwrap());
        let afi = u16::from_be_bytes(buf[12..14].try_into().unwrap());
        let (nla, nla_len) = Nla::parse(afi, &buf[16..])?;
        Ok((
            SpmFields {
                spm_sqn,
                trail,
                lead,
                nla,
            },
            16 + nla_len,
        ))
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.spm_sqn.to_be_bytes());
        out.extend_from_slice(&self.trail.to_be_bytes());
        out.extend_from_slice(&self.lead.to_be_bytes());
        out.extend_from_slice(&self.nla.afi().to_be_bytes());
        out.extend_from_slice(&[0, 0]); // reserved
        self.nla.write_to(out);
    }
}

/// Fixed fields following the common header for ODATA/RDATA.
#[derive(Debug, Clone, Copy)]
pub struct DataFields {
    pub data_sqn: u32,
    pub data_trail: u32,
}

impl DataFields {
    pub fn parse(buf: &[u8]) -> Result<Self, ParseError> {
        if buf.len() < DATA_FIXED_LEN {
            return Err(ParseError::Bounds);
        }
        Ok(DataFields {
            data_sqn: u32::from_be_bytes(buf[0..4].try_into().unwrap()),
            data_trail: u32::from_be_bytes(buf[4..8].try_into().unwrap()),
        })
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.data_sqn.to_be_bytes());
        out.extend_from_slice(&self.data_trail.to_be_bytes());
    }
}

/// Fixed fields following the common header for NAK/NNAK/NCF.
#[derive(Debug, Clone)]
pub struct NakFields {
    pub requested_sqn: u32,
    pub source_nla: Nla,
    pub group_nla: Nla,
}

impl NakFields {
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), ParseError> {
        if buf.len() < 8 {
            return Err(ParseError::Bounds);
        }
        let requested_sqn = u32::from_be_bytes(buf[0..4].try_into().unwrap());
        let src_afi = u16::from_be_bytes(buf[4..6].try_into().unwrap());
        let mut off = 8;
        let (source_nla, n1) = Nla::parse(src_afi, &buf[off..])?;
        off += n1;
        if buf.len() < off + 4 {
            return Err(ParseError::Bounds);
        }
        let grp_afi = u16::from_be_bytes(buf[off..off + 2].try_into().unwrap());
        off += 4;
        let (group_nla, n2) = Nla::parse(grp_afi, &buf[off..])?;
        off += n2;
        Ok((
            NakFields {
                requested_sqn,
                source_nla,
                group_nla,
            },
            off,
        ))
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.requested_sqn.to_be_bytes());
        out.extend_from_slice(&self.source_nla.afi().to_be_bytes());
        out.extend_from_slice(&[0, 0]);
        self.source_nla.write_to(out);
        out.extend_from_slice(&self.group_nla.afi().to_be_bytes());
        out.extend_from_slice(&[0, 0]);
        self.group_nla.write_to(out);
    }
}

/// Fixed fields following the common header for ACK (PGMCC).
#[derive(Debug, Clone, Copy)]
pub struct AckFields {
    pub ack_rx_max: u32,
    pub ack_bitmap: u32,
}

impl AckFields {
    pub fn parse(buf: &[u8]) -> Result<Self, ParseError> {
        if buf.len() < ACK_FIXED_LEN {
            return Err(ParseError::Bounds);
        }
        Ok(AckFields {
            ack_rx_max: u32::from_be_bytes(buf[0..4].try_into().unwrap()),
            ack_bitmap: u32::from_be_bytes(buf[4..8].try_into().unwrap()),
        })
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.ack_rx_max.to_be_bytes());
        out.extend_from_slice(&self.ack_bitmap.to_be_bytes());
    }
}
