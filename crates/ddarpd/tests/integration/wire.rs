//! Wire-format scenarios: exact byte layout and the skip-unknown rule.

use ddarp_core::codec::{decode, Packet};
use ddarp_core::tlv::encode_tlvs;
use ddarp_core::wire::FLAG_REQUEST;
use ddarp_core::TlvValue;

#[test]
fn owl_metrics_packet_layout_is_exact() {
    let packet = Packet::new(
        FLAG_REQUEST,
        0x0000_03e9,
        1,
        0x6500_0000,
        vec![TlvValue::OwlMetrics {
            latency_ns: 1_500_000,
            jitter_ns: 50_000,
            timestamp: 0x6500_0000,
        }],
    );

    let bytes = packet.encode().unwrap();
    // 20-byte header + 4-byte TLV header + 20-byte value
    assert_eq!(bytes.len(), 44);

    // header, field by field, network byte order
    assert_eq!(bytes[0], 0x01); // version
    assert_eq!(bytes[1], 0x01); // REQUEST
    assert_eq!(&bytes[2..4], &[0x00, 0x14]); // header_length = 20
    assert_eq!(&bytes[4..8], &[0x00, 0x00, 0x03, 0xe9]); // tunnel_id
    assert_eq!(&bytes[8..12], &[0x00, 0x00, 0x00, 0x01]); // sequence
    assert_eq!(&bytes[12..16], &[0x65, 0x00, 0x00, 0x00]); // timestamp
    assert_eq!(&bytes[16..20], &[0x00, 0x00, 0x00, 0x18]); // tlv_length = 24

    // TLV header
    assert_eq!(&bytes[20..22], &[0x00, 0x02]); // OWL_METRICS
    assert_eq!(&bytes[22..24], &[0x00, 0x14]); // length = 20

    // packed value
    assert_eq!(&bytes[24..32], &1_500_000u64.to_be_bytes());
    assert_eq!(&bytes[32..40], &50_000u64.to_be_bytes());
    assert_eq!(&bytes[40..44], &0x6500_0000u32.to_be_bytes());

    // and it round-trips
    let decoded = decode(&bytes, false).unwrap();
    assert_eq!(decoded.packet, packet);
    assert_eq!(decoded.packet.encode().unwrap(), bytes);
}

/// Handcraft a v1 header in front of an arbitrary TLV region.
fn raw_packet(region: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(20 + region.len());
    bytes.push(0x01); // version
    bytes.push(0x00); // flags
    bytes.extend_from_slice(&20u16.to_be_bytes());
    bytes.extend_from_slice(&0u32.to_be_bytes()); // tunnel_id
    bytes.extend_from_slice(&0u32.to_be_bytes()); // sequence
    bytes.extend_from_slice(&0u32.to_be_bytes()); // timestamp
    bytes.extend_from_slice(&(region.len() as u32).to_be_bytes());
    bytes.extend_from_slice(region);
    bytes
}

#[test]
fn unknown_tlv_between_known_ones_is_skipped_once() {
    let json_a = TlvValue::Ternary(serde_json::json!({"k": "a"}));

    let mut region = encode_tlvs(std::slice::from_ref(&json_a)).unwrap();
    // unknown type 0xABCD carrying "xx"
    region.extend_from_slice(&[0xab, 0xcd, 0x00, 0x02, b'x', b'x']);
    region.extend_from_slice(&encode_tlvs(&[TlvValue::Keepalive]).unwrap());

    let bytes = raw_packet(&region);
    let decoded = decode(&bytes, false).unwrap();
    assert_eq!(decoded.skipped_unknown, 1);
    assert_eq!(
        decoded.packet.tlvs,
        vec![json_a.clone(), TlvValue::Keepalive]
    );

    // re-encoding carries only the known TLVs
    let reencoded = decoded.packet.encode().unwrap();
    let again = decode(&reencoded, false).unwrap();
    assert_eq!(again.skipped_unknown, 0);
    assert_eq!(again.packet.tlvs, vec![json_a, TlvValue::Keepalive]);
}

#[test]
fn truncated_region_fails_even_with_unknown_types() {
    // declared length 16 with only 4 bytes present
    let mut region = Vec::new();
    region.extend_from_slice(&[0xab, 0xcd, 0x00, 0x10]);
    region.extend_from_slice(&[1, 2, 3, 4]);
    let bytes = raw_packet(&region);
    assert!(decode(&bytes, false).is_err());
}
