//! TLV (type/length/value) payload encoding.
//!
//! Each TLV is a 2-byte type code, a 2-byte value length, and the value
//! bytes, tightly packed. The set of registered types is closed over
//! [`TlvValue`]; unknown codes are skipped on decode (and counted) unless
//! the caller opts into strict parsing. Malformed lengths are always errors.
//!
//! Type codes 0xF000-0xFFFF are reserved for experiments and are never
//! registered here.

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use crate::wire::WireError;

/// TLV header size: 2-byte type + 2-byte length.
pub const TLV_HEADER_SIZE: usize = 4;

/// First type code of the experimental range.
pub const TLV_EXPERIMENTAL_MIN: u16 = 0xF000;

// ── Type registry ─────────────────────────────────────────────────────────────

/// Registered TLV type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum TlvType {
    /// Ternary computation results, UTF-8 JSON object.
    T3Ternary = 0x0001,
    /// Packed one-way-latency metrics: latency_ns u64, jitter_ns u64, timestamp u32.
    OwlMetrics = 0x0002,
    /// Packed routing entry: dest and next_hop length-prefixed UTF-8, metric u32.
    RoutingInfo = 0x0003,
    /// Packed probe body: src and dst length-prefixed UTF-8, seq u32,
    /// send_ts_mono_ns u64, send_ts_wall_ns u64.
    OwlProbe = 0x0004,
    /// UTF-8 JSON array of node ids.
    NeighborList = 0x0010,
    /// UTF-8 JSON topology gossip.
    TopologyUpdate = 0x0011,
    /// Empty value.
    Keepalive = 0x0030,
    /// UTF-8 error string.
    ErrorInfo = 0x0031,
    /// UTF-8 JSON capability description.
    Capabilities = 0x0032,
}

impl TlvType {
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0x0001 => Some(TlvType::T3Ternary),
            0x0002 => Some(TlvType::OwlMetrics),
            0x0003 => Some(TlvType::RoutingInfo),
            0x0004 => Some(TlvType::OwlProbe),
            0x0010 => Some(TlvType::NeighborList),
            0x0011 => Some(TlvType::TopologyUpdate),
            0x0030 => Some(TlvType::Keepalive),
            0x0031 => Some(TlvType::ErrorInfo),
            0x0032 => Some(TlvType::Capabilities),
            _ => None,
        }
    }

    pub fn code(self) -> u16 {
        self as u16
    }
}

// ── Values ────────────────────────────────────────────────────────────────────

/// Probe body carried in an [`TlvValue::OwlProbe`] TLV.
///
/// `send_ts_mono_ns` is the sender's monotonic clock, used only to
/// correlate on the sender side; `send_ts_wall_ns` is the wall clock the
/// receiver subtracts from its own to derive one-way latency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeBody {
    pub src: String,
    pub dst: String,
    pub seq: u32,
    pub send_ts_mono_ns: u64,
    pub send_ts_wall_ns: u64,
}

/// A decoded TLV. One variant per registered type.
#[derive(Debug, Clone, PartialEq)]
pub enum TlvValue {
    Ternary(serde_json::Value),
    OwlMetrics {
        latency_ns: u64,
        jitter_ns: u64,
        timestamp: u32,
    },
    RoutingInfo {
        destination: String,
        next_hop: String,
        metric: u32,
    },
    OwlProbe(ProbeBody),
    NeighborList(Vec<String>),
    TopologyUpdate(serde_json::Value),
    Keepalive,
    ErrorInfo(String),
    Capabilities(serde_json::Value),
}

impl TlvValue {
    pub fn tlv_type(&self) -> TlvType {
        match self {
            TlvValue::Ternary(_) => TlvType::T3Ternary,
            TlvValue::OwlMetrics { .. } => TlvType::OwlMetrics,
            TlvValue::RoutingInfo { .. } => TlvType::RoutingInfo,
            TlvValue::OwlProbe(_) => TlvType::OwlProbe,
            TlvValue::NeighborList(_) => TlvType::NeighborList,
            TlvValue::TopologyUpdate(_) => TlvType::TopologyUpdate,
            TlvValue::Keepalive => TlvType::Keepalive,
            TlvValue::ErrorInfo(_) => TlvType::ErrorInfo,
            TlvValue::Capabilities(_) => TlvType::Capabilities,
        }
    }

    /// Encode just the value bytes (no TLV header).
    fn encode_value(&self) -> Result<Vec<u8>, WireError> {
        let code = self.tlv_type().code();
        match self {
            TlvValue::Ternary(v) | TlvValue::TopologyUpdate(v) | TlvValue::Capabilities(v) => {
                serde_json::to_vec(v).map_err(|e| WireError::BadJson {
                    tlv_type: code,
                    reason: e.to_string(),
                })
            }
            TlvValue::OwlMetrics {
                latency_ns,
                jitter_ns,
                timestamp,
            } => {
                let mut out = Vec::with_capacity(20);
                out.put_u64(*latency_ns);
                out.put_u64(*jitter_ns);
                out.put_u32(*timestamp);
                Ok(out)
            }
            TlvValue::RoutingInfo {
                destination,
                next_hop,
                metric,
            } => {
                let mut out =
                    Vec::with_capacity(4 + destination.len() + next_hop.len() + 4);
                out.put_u16(destination.len() as u16);
                out.put_u16(next_hop.len() as u16);
                out.put_slice(destination.as_bytes());
                out.put_slice(next_hop.as_bytes());
                out.put_u32(*metric);
                Ok(out)
            }
            TlvValue::OwlProbe(body) => {
                let mut out = Vec::with_capacity(4 + body.src.len() + body.dst.len() + 20);
                out.put_u16(body.src.len() as u16);
                out.put_u16(body.dst.len() as u16);
                out.put_slice(body.src.as_bytes());
                out.put_slice(body.dst.as_bytes());
                out.put_u32(body.seq);
                out.put_u64(body.send_ts_mono_ns);
                out.put_u64(body.send_ts_wall_ns);
                Ok(out)
            }
            TlvValue::NeighborList(ids) => {
                serde_json::to_vec(ids).map_err(|e| WireError::BadJson {
                    tlv_type: code,
                    reason: e.to_string(),
                })
            }
            TlvValue::Keepalive => Ok(Vec::new()),
            TlvValue::ErrorInfo(message) => Ok(message.as_bytes().to_vec()),
        }
    }

    /// Decode value bytes for a known type code.
    fn decode_value(tlv_type: TlvType, value: &[u8]) -> Result<TlvValue, WireError> {
        let code = tlv_type.code();
        match tlv_type {
            TlvType::T3Ternary => Ok(TlvValue::Ternary(decode_json(code, value)?)),
            TlvType::TopologyUpdate => Ok(TlvValue::TopologyUpdate(decode_json(code, value)?)),
            TlvType::Capabilities => Ok(TlvValue::Capabilities(decode_json(code, value)?)),
            TlvType::OwlMetrics => {
                if value.len() != 20 {
                    return Err(WireError::BadTlvLength {
                        tlv_type: code,
                        len: value.len(),
                    });
                }
                let mut buf = value;
                Ok(TlvValue::OwlMetrics {
                    latency_ns: buf.get_u64(),
                    jitter_ns: buf.get_u64(),
                    timestamp: buf.get_u32(),
                })
            }
            TlvType::RoutingInfo => {
                let mut buf = value;
                if buf.remaining() < 4 {
                    return Err(WireError::BadTlvLength {
                        tlv_type: code,
                        len: value.len(),
                    });
                }
                let dest_len = buf.get_u16() as usize;
                let hop_len = buf.get_u16() as usize;
                if buf.remaining() < dest_len + hop_len + 4 {
                    return Err(WireError::BadTlvLength {
                        tlv_type: code,
                        len: value.len(),
                    });
                }
                let destination = take_utf8(code, &mut buf, dest_len)?;
                let next_hop = take_utf8(code, &mut buf, hop_len)?;
                Ok(TlvValue::RoutingInfo {
                    destination,
                    next_hop,
                    metric: buf.get_u32(),
                })
            }
            TlvType::OwlProbe => {
                let mut buf = value;
                if buf.remaining() < 4 {
                    return Err(WireError::BadTlvLength {
                        tlv_type: code,
                        len: value.len(),
                    });
                }
                let src_len = buf.get_u16() as usize;
                let dst_len = buf.get_u16() as usize;
                if buf.remaining() < src_len + dst_len + 20 {
                    return Err(WireError::BadTlvLength {
                        tlv_type: code,
                        len: value.len(),
                    });
                }
                let src = take_utf8(code, &mut buf, src_len)?;
                let dst = take_utf8(code, &mut buf, dst_len)?;
                Ok(TlvValue::OwlProbe(ProbeBody {
                    src,
                    dst,
                    seq: buf.get_u32(),
                    send_ts_mono_ns: buf.get_u64(),
                    send_ts_wall_ns: buf.get_u64(),
                }))
            }
            TlvType::NeighborList => {
                let ids: Vec<String> =
                    serde_json::from_slice(value).map_err(|e| WireError::BadJson {
                        tlv_type: code,
                        reason: e.to_string(),
                    })?;
                Ok(TlvValue::NeighborList(ids))
            }
            TlvType::Keepalive => {
                if !value.is_empty() {
                    return Err(WireError::BadTlvLength {
                        tlv_type: code,
                        len: value.len(),
                    });
                }
                Ok(TlvValue::Keepalive)
            }
            TlvType::ErrorInfo => {
                let message = std::str::from_utf8(value)
                    .map_err(|_| WireError::BadUtf8 { tlv_type: code })?;
                Ok(TlvValue::ErrorInfo(message.to_string()))
            }
        }
    }
}

fn decode_json(tlv_type: u16, value: &[u8]) -> Result<serde_json::Value, WireError> {
    let text = std::str::from_utf8(value).map_err(|_| WireError::BadUtf8 { tlv_type })?;
    serde_json::from_str(text).map_err(|e| WireError::BadJson {
        tlv_type,
        reason: e.to_string(),
    })
}

fn take_utf8(tlv_type: u16, buf: &mut &[u8], len: usize) -> Result<String, WireError> {
    let raw = &buf[..len];
    let text = std::str::from_utf8(raw)
        .map_err(|_| WireError::BadUtf8 { tlv_type })?
        .to_string();
    buf.advance(len);
    Ok(text)
}

// ── Region encode/decode ──────────────────────────────────────────────────────

/// Result of parsing a TLV region.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTlvs {
    pub values: Vec<TlvValue>,
    /// Unknown type codes skipped under the skip-unknown rule.
    pub skipped_unknown: usize,
}

/// Encode a list of TLVs into a tightly packed region.
pub fn encode_tlvs(values: &[TlvValue]) -> Result<Vec<u8>, WireError> {
    let mut out = Vec::new();
    for value in values {
        let encoded = value.encode_value()?;
        out.put_u16(value.tlv_type().code());
        out.put_u16(encoded.len() as u16);
        out.put_slice(&encoded);
    }
    Ok(out)
}

/// Parse a TLV region that ends exactly at `region.len()`.
///
/// Unknown type codes are skipped and counted unless `strict` is set, in
/// which case they fail the parse. A declared length that runs past the
/// region is always an error.
pub fn parse_tlvs(region: &[u8], strict: bool) -> Result<ParsedTlvs, WireError> {
    let mut values = Vec::new();
    let mut skipped_unknown = 0usize;
    let mut buf = region;

    while buf.has_remaining() {
        let offset = region.len() - buf.remaining();
        if buf.remaining() < TLV_HEADER_SIZE {
            return Err(WireError::TruncatedTlv {
                offset,
                declared: TLV_HEADER_SIZE,
                remaining: buf.remaining(),
            });
        }
        let code = buf.get_u16();
        let len = buf.get_u16() as usize;
        if buf.remaining() < len {
            return Err(WireError::TruncatedTlv {
                offset,
                declared: len,
                remaining: buf.remaining(),
            });
        }
        let value = &buf[..len];
        match TlvType::from_code(code) {
            Some(tlv_type) => values.push(TlvValue::decode_value(tlv_type, value)?),
            None if strict => return Err(WireError::UnknownTlv(code)),
            None => skipped_unknown += 1,
        }
        buf.advance(len);
    }

    Ok(ParsedTlvs {
        values,
        skipped_unknown,
    })
}

// ── Serde views ───────────────────────────────────────────────────────────────

/// The JSON body carried in a TOPOLOGY_UPDATE TLV.
///
/// Each node gossips the edges it has measured locally; receivers accept
/// only edges whose destination equals the claimed origin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyGossip {
    pub origin: String,
    pub edges: Vec<GossipEdge>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipEdge {
    pub src: String,
    pub dst: String,
    pub latency_ms: f64,
    pub jitter_ms: f64,
    pub loss_ratio: f64,
    /// Milliseconds since the edge was last refreshed at the origin.
    pub age_ms: u64,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
