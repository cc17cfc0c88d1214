//! Probe authentication: HMAC-SHA256 over the packet bytes.
//!
//! An authenticated datagram is `packet || tag`, where the 32-byte tag is
//! computed over everything before it, keyed by the shared secret of the
//! peer named in the packet. Verification runs in constant time and MUST
//! happen before any further processing of the packet content.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Authentication tag size in bytes.
pub const TAG_SIZE: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("authentication tag mismatch")]
    HmacMismatch,

    #[error("datagram of {0} bytes cannot hold a {TAG_SIZE} byte tag")]
    MissingTag(usize),
}

fn mac(secret: &[u8]) -> HmacSha256 {
    // HMAC accepts keys of any length
    HmacSha256::new_from_slice(secret).expect("HMAC key of any length")
}

/// Compute the tag over `packet` and return `packet || tag`.
pub fn seal(packet: &[u8], secret: &[u8]) -> Vec<u8> {
    let mut m = mac(secret);
    m.update(packet);
    let tag = m.finalize().into_bytes();

    let mut out = Vec::with_capacity(packet.len() + TAG_SIZE);
    out.extend_from_slice(packet);
    out.extend_from_slice(&tag);
    out
}

/// Verify the tag at `datagram[packet_len..]` against the bytes before it.
///
/// `packet_len` is the decoded packet extent (header plus TLV region);
/// the tag must start exactly there.
pub fn verify(datagram: &[u8], packet_len: usize, secret: &[u8]) -> Result<(), AuthError> {
    if datagram.len() < packet_len + TAG_SIZE {
        return Err(AuthError::MissingTag(datagram.len()));
    }
    let (packet, tag) = datagram.split_at(packet_len);

    let mut m = mac(secret);
    m.update(packet);
    m.verify_slice(&tag[..TAG_SIZE])
        .map_err(|_| AuthError::HmacMismatch)
}
