//! OpenPGP key records and the lazy decoder that reads them off a byte stream.

use std::io::{self, Read};

use chrono::{DateTime, Utc};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use thiserror::Error;

mod armor;
mod packet;
mod source;

pub use armor::{armor_checksum, ArmorReader};
pub use packet::{Packet, MAX_PACKET_LEN, TAG_PUBLIC_KEY, TAG_USER_ID};
pub use source::{decode_stream, open_key_file, sniff, InputFormat};

use packet::{Frame, PacketReader};

/// Why a record (or the rest of a stream) could not be decoded.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("read failed: {0}")]
    Io(#[from] io::Error),
    #[error("invalid packet header byte {0:#04x}")]
    InvalidHeader(u8),
    #[error("truncated packet (tag {tag})")]
    Truncated { tag: u8 },
    #[error("packet with tag {tag} is {len} bytes, limit is {limit}", limit = MAX_PACKET_LEN)]
    Oversized { tag: u8, len: u64 },
    #[error("{count} packet(s) found before any public key (first tag {tag})")]
    Orphaned { tag: u8, count: usize },
    #[error("unsupported public key version {0}")]
    UnsupportedVersion(u8),
    #[error("malformed public key packet: {0}")]
    MalformedKey(String),
}

impl DecodeError {
    /// Stream-level errors leave the reader at an unknown offset; decoding stops after them.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DecodeError::Io(_) | DecodeError::InvalidHeader(_) | DecodeError::Truncated { .. }
        )
    }
}

/// One item of a decoded stream.
pub type DecodeOutcome = Result<KeyRecord, DecodeError>;

/// A primary public key with every packet that followed it up to the next primary key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRecord {
    version: u8,
    algorithm: u8,
    created_at: DateTime<Utc>,
    fingerprint: Vec<u8>,
    user_ids: Vec<String>,
    packets: Vec<Packet>,
}

impl KeyRecord {
    /// Build a record from its packets; the first one must be the primary key.
    pub fn from_packets(packets: Vec<Packet>) -> Result<Self, DecodeError> {
        let primary = packets
            .first()
            .filter(|packet| packet.tag == TAG_PUBLIC_KEY)
            .ok_or_else(|| DecodeError::MalformedKey("record has no primary key".to_string()))?;
        let (version, created, algorithm, fingerprint) = parse_primary(&primary.body)?;
        let created_at = DateTime::<Utc>::from_timestamp(i64::from(created), 0)
            .ok_or_else(|| DecodeError::MalformedKey(format!("bad creation time {created}")))?;
        let user_ids = packets
            .iter()
            .filter(|packet| packet.tag == TAG_USER_ID)
            .map(|packet| String::from_utf8_lossy(&packet.body).into_owned())
            .collect();

        Ok(Self {
            version,
            algorithm,
            created_at,
            fingerprint,
            user_ids,
            packets,
        })
    }

    /// Upper-case hex fingerprint.
    pub fn fingerprint(&self) -> String {
        hex::encode_upper(&self.fingerprint)
    }

    /// 64-bit key id: low-order bytes for v4, high-order bytes for v6.
    pub fn key_id(&self) -> String {
        let id = if self.version == 4 {
            &self.fingerprint[self.fingerprint.len() - 8..]
        } else {
            &self.fingerprint[..8]
        };
        hex::encode_upper(id)
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn algorithm(&self) -> u8 {
        self.algorithm
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn user_ids(&self) -> &[String] {
        &self.user_ids
    }

    /// Canonical serialization: every packet re-framed with a new-format header.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for packet in &self.packets {
            packet.write_to(&mut out);
        }
        out
    }

    /// Hex SHA-256 of [`KeyRecord::to_bytes`]; equal digests mean identical material.
    pub fn digest(&self) -> String {
        hex::encode(Sha256::digest(self.to_bytes()))
    }
}

fn parse_primary(body: &[u8]) -> Result<(u8, u32, u8, Vec<u8>), DecodeError> {
    let version = *body
        .first()
        .ok_or_else(|| DecodeError::MalformedKey("empty body".to_string()))?;
    match version {
        4 => {
            if body.len() < 7 {
                return Err(DecodeError::MalformedKey(format!(
                    "v4 body is {} bytes",
                    body.len()
                )));
            }
            let len = u16::try_from(body.len()).map_err(|_| {
                DecodeError::MalformedKey(format!("v4 body is {} bytes", body.len()))
            })?;
            let fingerprint = Sha1::new()
                .chain_update([0x99])
                .chain_update(len.to_be_bytes())
                .chain_update(body)
                .finalize()
                .to_vec();
            Ok((version, be_u32(&body[1..5]), body[5], fingerprint))
        }
        6 => {
            if body.len() < 10 {
                return Err(DecodeError::MalformedKey(format!(
                    "v6 body is {} bytes",
                    body.len()
                )));
            }
            let material = be_u32(&body[6..10]) as usize;
            if body.len() - 10 != material {
                return Err(DecodeError::MalformedKey(format!(
                    "v6 key material announces {material} bytes, found {}",
                    body.len() - 10
                )));
            }
            let fingerprint = Sha256::new()
                .chain_update([0x9B])
                .chain_update((body.len() as u32).to_be_bytes())
                .chain_update(body)
                .finalize()
                .to_vec();
            Ok((version, be_u32(&body[1..5]), body[5], fingerprint))
        }
        other => Err(DecodeError::UnsupportedVersion(other)),
    }
}

fn be_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Lazy, single-pass iterator of [`DecodeOutcome`]s.
///
/// Record-level failures are yielded and decoding carries on with the next
/// primary key. After a stream-level failure (see [`DecodeError::is_fatal`])
/// the iterator is exhausted.
pub struct KeyReader<R> {
    packets: PacketReader<R>,
    pending: Option<Frame>,
    deferred: Option<DecodeError>,
    done: bool,
}

/// Decode key records from a raw binary packet stream.
pub fn read_keys<R: Read>(reader: R) -> KeyReader<R> {
    KeyReader {
        packets: PacketReader::new(reader),
        pending: None,
        deferred: None,
        done: false,
    }
}

impl<R: Read> KeyReader<R> {
    fn pull(&mut self) -> Option<Result<Frame, DecodeError>> {
        if let Some(frame) = self.pending.take() {
            return Some(Ok(frame));
        }
        match self.packets.next_frame() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }

    /// Consume frames up to the next primary key, leaving it pending.
    fn take_until_primary(&mut self, mut each: impl FnMut(Frame)) -> Result<(), DecodeError> {
        while let Some(next) = self.pull() {
            let frame = next?;
            if frame.is_primary() {
                self.pending = Some(frame);
                break;
            }
            each(frame);
        }
        Ok(())
    }

    fn next_record(&mut self, first: Frame) -> DecodeOutcome {
        if !first.is_primary() {
            let tag = first.tag();
            let mut count = 1;
            self.take_until_primary(|_| count += 1)?;
            return Err(DecodeError::Orphaned { tag, count });
        }

        let mut failure = None;
        let mut packets = Vec::new();
        let mut keep = |frame: Frame| match frame {
            Frame::Packet(packet) => packets.push(packet),
            Frame::Oversized { tag, len } => {
                failure.get_or_insert(DecodeError::Oversized { tag, len });
            }
        };
        keep(first);
        let stream_err = self.take_until_primary(&mut keep).err();

        let record = match failure {
            Some(err) => Err(err),
            None => KeyRecord::from_packets(packets),
        };
        match (record, stream_err) {
            (record, None) => record,
            // The packets read before the break still form a key; report the break next.
            (Ok(record), Some(err)) => {
                self.deferred = Some(err);
                Ok(record)
            }
            (Err(_), Some(err)) => Err(err),
        }
    }
}

impl<R: Read> Iterator for KeyReader<R> {
    type Item = DecodeOutcome;

    fn next(&mut self) -> Option<DecodeOutcome> {
        if let Some(err) = self.deferred.take() {
            return Some(Err(err));
        }
        if self.done && self.pending.is_none() {
            return None;
        }
        let first = match self.pull()? {
            Ok(frame) => frame,
            Err(err) => return Some(Err(err)),
        };
        Some(self.next_record(first))
    }
}
