//! Packet builders shared by tests across the workspace.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::keys::{armor_checksum, KeyRecord, Packet, TAG_PUBLIC_KEY, TAG_USER_ID};

/// A v4 RSA public-key packet whose material is derived from `seed`.
pub fn public_key_packet(seed: u8) -> Packet {
    let mut body = vec![4];
    body.extend_from_slice(&(1_600_000_000u32 + u32::from(seed)).to_be_bytes());
    body.push(1);
    // modulus MPI: 64 bits
    body.extend_from_slice(&[0x00, 0x40]);
    body.extend_from_slice(&[0x80 | seed, seed, 1, 2, 3, 4, 5, seed]);
    // exponent MPI: 65537
    body.extend_from_slice(&[0x00, 0x11, 0x01, 0x00, 0x01]);
    Packet::new(TAG_PUBLIC_KEY, body)
}

/// A v6 Ed25519 public-key packet whose material is derived from `seed`.
pub fn public_key_packet_v6(seed: u8) -> Packet {
    let material = [seed; 32];
    let mut body = vec![6];
    body.extend_from_slice(&(1_700_000_000u32 + u32::from(seed)).to_be_bytes());
    body.push(27);
    body.extend_from_slice(&(material.len() as u32).to_be_bytes());
    body.extend_from_slice(&material);
    Packet::new(TAG_PUBLIC_KEY, body)
}

pub fn user_id_packet(user_id: &str) -> Packet {
    Packet::new(TAG_USER_ID, user_id.as_bytes().to_vec())
}

/// Binary v4 key with one user id.
pub fn v4_key(seed: u8, user_id: &str) -> Vec<u8> {
    serialize(&[public_key_packet(seed), user_id_packet(user_id)])
}

/// Binary v6 key with one user id.
pub fn v6_key(seed: u8, user_id: &str) -> Vec<u8> {
    serialize(&[public_key_packet_v6(seed), user_id_packet(user_id)])
}

/// Decoded v4 record, for feeding stores directly.
pub fn v4_record(seed: u8, user_id: &str) -> KeyRecord {
    KeyRecord::from_packets(vec![public_key_packet(seed), user_id_packet(user_id)])
        .expect("test key is well formed")
}

pub fn serialize(packets: &[Packet]) -> Vec<u8> {
    let mut out = Vec::new();
    for packet in packets {
        packet.write_to(&mut out);
    }
    out
}

/// ASCII-armor `payload` as a public key block with a checksum line.
pub fn armor(payload: &[u8]) -> String {
    let encoded = STANDARD.encode(payload);
    let mut text = String::from("-----BEGIN PGP PUBLIC KEY BLOCK-----\nComment: keyseed test\n\n");
    for chunk in encoded.as_bytes().chunks(64) {
        text.push_str(std::str::from_utf8(chunk).expect("base64 is ascii"));
        text.push('\n');
    }
    text.push_str(&armor_checksum(payload));
    text.push_str("\n-----END PGP PUBLIC KEY BLOCK-----\n");
    text
}
