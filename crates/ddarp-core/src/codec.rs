//! Packet assembly and parsing: fixed header + TLV region.
//!
//! Decoding tolerates trailing bytes beyond the declared packet length so
//! that an authentication tag can ride after the packet (see [`crate::auth`]).
//! Every error is recoverable at the packet boundary.

use bytes::BufMut;
use zerocopy::{AsBytes, FromBytes};

use crate::tlv::{encode_tlvs, parse_tlvs, TlvValue};
use crate::wire::{PacketHeader, WireError, FLAG_ERROR, FLAG_REQUEST, FLAG_RESPONSE, HEADER_SIZE, MAX_DATAGRAM};

/// A DDARP packet in its decoded form.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub flags: u8,
    pub tunnel_id: u32,
    pub sequence: u32,
    /// Unix seconds, sender-filled. Logging/debug only.
    pub timestamp: u32,
    pub tlvs: Vec<TlvValue>,
}

impl Packet {
    pub fn new(flags: u8, tunnel_id: u32, sequence: u32, timestamp: u32, tlvs: Vec<TlvValue>) -> Self {
        Self {
            flags,
            tunnel_id,
            sequence,
            timestamp,
            tlvs,
        }
    }

    pub fn request(tunnel_id: u32, sequence: u32, timestamp: u32, tlvs: Vec<TlvValue>) -> Self {
        Self::new(FLAG_REQUEST, tunnel_id, sequence, timestamp, tlvs)
    }

    pub fn response(tunnel_id: u32, sequence: u32, timestamp: u32, tlvs: Vec<TlvValue>) -> Self {
        Self::new(FLAG_RESPONSE, tunnel_id, sequence, timestamp, tlvs)
    }

    pub fn error(tunnel_id: u32, sequence: u32, timestamp: u32, message: String) -> Self {
        Self::new(
            FLAG_ERROR,
            tunnel_id,
            sequence,
            timestamp,
            vec![TlvValue::ErrorInfo(message)],
        )
    }

    /// Encode to wire bytes: header followed by the TLV region.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let region = encode_tlvs(&self.tlvs)?;
        let header = PacketHeader::new(
            self.flags,
            self.tunnel_id,
            self.sequence,
            self.timestamp,
            region.len() as u32,
        );
        header.validate()?;

        let mut out = Vec::with_capacity(HEADER_SIZE + region.len());
        out.put_slice(header.as_bytes());
        out.put_slice(&region);
        Ok(out)
    }
}

/// Result of decoding a datagram.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub packet: Packet,
    /// Unknown TLVs skipped under the skip-unknown rule.
    pub skipped_unknown: usize,
    /// Bytes consumed: header plus declared TLV region. Anything after
    /// this offset was not part of the packet.
    pub consumed: usize,
}

/// Decode a packet from `buf`.
///
/// `buf` must hold at least `header_length + tlv_length` bytes; trailing
/// bytes are left untouched and reported through [`Decoded::consumed`].
/// With `strict` set, unknown TLV types fail the parse instead of being
/// skipped.
pub fn decode(buf: &[u8], strict: bool) -> Result<Decoded, WireError> {
    if buf.len() > MAX_DATAGRAM {
        return Err(WireError::PacketTooLarge(buf.len()));
    }
    let header = PacketHeader::read_from_prefix(buf)
        .ok_or(WireError::MalformedHeader("buffer shorter than fixed header"))?;
    header.validate()?;

    let tlv_length = header.tlv_length.get() as usize;
    let consumed = HEADER_SIZE + tlv_length;
    if buf.len() < consumed {
        return Err(WireError::MalformedHeader("tlv_length points past the end of input"));
    }

    let parsed = parse_tlvs(&buf[HEADER_SIZE..consumed], strict)?;

    Ok(Decoded {
        packet: Packet {
            flags: header.flags,
            tunnel_id: header.tunnel_id.get(),
            sequence: header.sequence.get(),
            timestamp: header.timestamp.get(),
            tlvs: parsed.values,
        },
        skipped_unknown: parsed.skipped_unknown,
        consumed,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
