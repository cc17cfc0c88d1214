//! DDARP wire format — the on-wire packet header and protocol constants.
//!
//! These types ARE the protocol. Every field, every size, every reserved bit
//! is part of the wire format; changing anything here is a breaking change.
//!
//! All multi-byte fields are network byte order. The header is
//! #[repr(C, packed)] with zerocopy big-endian field types for safe,
//! allocation-free serialization. There is no unsafe code in this module.

use static_assertions::assert_eq_size;
use zerocopy::byteorder::{BigEndian, U16, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ── Packet Header ─────────────────────────────────────────────────────────────

/// The fixed 20-byte header that precedes every TLV payload.
///
/// A receiver can fully validate the header and locate the TLV region
/// before interpreting a single payload byte.
///
/// Wire size: 20 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct PacketHeader {
    /// Protocol version. Currently 0x01; anything else is rejected.
    pub version: u8,

    /// Bit flags:
    ///   bit 0: REQUEST
    ///   bit 1: RESPONSE
    ///   bit 2: ERROR
    ///   bit 3: COMPRESSED
    ///   bit 4: ENCRYPTED
    ///   bits 5-7: reserved, must be zero
    pub flags: u8,

    /// Length of this header in bytes. Always 20 in version 1.
    pub header_length: U16<BigEndian>,

    /// Opaque per-session identifier. Not interpreted by the codec.
    pub tunnel_id: U32<BigEndian>,

    /// Per-tunnel packet counter. Wraps at 2^32.
    pub sequence: U32<BigEndian>,

    /// Unix seconds, filled by the sender. Logging/debug only.
    pub timestamp: U32<BigEndian>,

    /// Length of the TLV region that follows, in bytes.
    pub tlv_length: U32<BigEndian>,
}

// Compile-time size guard. If this fails, the wire format has silently changed.
assert_eq_size!(PacketHeader, [u8; 20]);

impl PacketHeader {
    pub fn new(flags: u8, tunnel_id: u32, sequence: u32, timestamp: u32, tlv_length: u32) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            flags,
            header_length: U16::new(HEADER_SIZE as u16),
            tunnel_id: U32::new(tunnel_id),
            sequence: U32::new(sequence),
            timestamp: U32::new(timestamp),
            tlv_length: U32::new(tlv_length),
        }
    }

    /// Validate the version, header length, and reserved flag bits.
    pub fn validate(&self) -> Result<(), WireError> {
        if self.version != PROTOCOL_VERSION {
            return Err(WireError::UnsupportedVersion(self.version));
        }
        if self.header_length.get() != HEADER_SIZE as u16 {
            return Err(WireError::MalformedHeader("header_length is not 20"));
        }
        if self.flags & !FLAG_MASK != 0 {
            return Err(WireError::ReservedFlagSet(self.flags));
        }
        Ok(())
    }

    pub fn is_flag_set(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }
}

// ── Flags ─────────────────────────────────────────────────────────────────────

pub const FLAG_REQUEST: u8 = 0x01;
pub const FLAG_RESPONSE: u8 = 0x02;
pub const FLAG_ERROR: u8 = 0x04;
pub const FLAG_COMPRESSED: u8 = 0x08;
pub const FLAG_ENCRYPTED: u8 = 0x10;

/// Every defined flag bit. Bits outside this mask are reserved.
pub const FLAG_MASK: u8 =
    FLAG_REQUEST | FLAG_RESPONSE | FLAG_ERROR | FLAG_COMPRESSED | FLAG_ENCRYPTED;

// ── Constants ─────────────────────────────────────────────────────────────────

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Fixed header size in bytes.
pub const HEADER_SIZE: usize = 20;

/// Largest datagram the daemon will accept, header and tag included.
pub const MAX_DATAGRAM: usize = 8192;

/// Default UDP port shared by probes and control messages.
pub const DEFAULT_PORT: u16 = 8080;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
///
/// All of these are recoverable at the packet boundary: one bad packet
/// never poisons the next.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WireError {
    #[error("unsupported protocol version 0x{0:02x}")]
    UnsupportedVersion(u8),

    #[error("malformed header: {0}")]
    MalformedHeader(&'static str),

    #[error("reserved flag bits set: 0x{0:02x}")]
    ReservedFlagSet(u8),

    #[error("truncated TLV at offset {offset}: declared {declared} bytes, {remaining} remain")]
    TruncatedTlv {
        offset: usize,
        declared: usize,
        remaining: usize,
    },

    #[error("TLV 0x{tlv_type:04x} value has invalid length {len}")]
    BadTlvLength { tlv_type: u16, len: usize },

    #[error("invalid UTF-8 in TLV 0x{tlv_type:04x}")]
    BadUtf8 { tlv_type: u16 },

    #[error("invalid JSON in TLV 0x{tlv_type:04x}: {reason}")]
    BadJson { tlv_type: u16, reason: String },

    #[error("unknown TLV type 0x{0:04x}")]
    UnknownTlv(u16),

    #[error("datagram of {0} bytes exceeds the {MAX_DATAGRAM} byte limit")]
    PacketTooLarge(usize),
}

impl WireError {
    /// Stable short name, used as the `kind` label on the decode-error counter.
    pub fn kind(&self) -> &'static str {
        match self {
            WireError::UnsupportedVersion(_) => "unsupported_version",
            WireError::MalformedHeader(_) => "malformed_header",
            WireError::ReservedFlagSet(_) => "reserved_flag_set",
            WireError::TruncatedTlv { .. } => "truncated_tlv",
            WireError::BadTlvLength { .. } => "bad_tlv_length",
            WireError::BadUtf8 { .. } => "bad_utf8",
            WireError::BadJson { .. } => "bad_json",
            WireError::UnknownTlv(_) => "unknown_tlv",
            WireError::PacketTooLarge(_) => "packet_too_large",
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
