use std::io::{self, Read};

use super::DecodeError;

/// Public-key packet tag; every key record starts with one.
pub const TAG_PUBLIC_KEY: u8 = 6;
/// User ID packet tag.
pub const TAG_USER_ID: u8 = 13;
/// Packets above this size are skipped and fail their record.
pub const MAX_PACKET_LEN: usize = 8 << 20;

/// One OpenPGP packet: its tag and raw body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub tag: u8,
    pub body: Vec<u8>,
}

impl Packet {
    pub fn new(tag: u8, body: Vec<u8>) -> Self {
        Self { tag, body }
    }

    /// Append this packet with a new-format header.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.push(0xC0 | (self.tag & 0x3F));
        let len = self.body.len();
        if len < 192 {
            out.push(len as u8);
        } else if len < 8384 {
            let rest = len - 192;
            out.push((rest >> 8) as u8 + 192);
            out.push(rest as u8);
        } else {
            out.push(0xFF);
            out.extend_from_slice(&(len as u32).to_be_bytes());
        }
        out.extend_from_slice(&self.body);
    }
}

/// A framed unit read off the stream. Oversized bodies are consumed but not kept.
#[derive(Debug)]
pub(crate) enum Frame {
    Packet(Packet),
    Oversized { tag: u8, len: u64 },
}

impl Frame {
    pub(crate) fn tag(&self) -> u8 {
        match self {
            Frame::Packet(packet) => packet.tag,
            Frame::Oversized { tag, .. } => *tag,
        }
    }

    pub(crate) fn is_primary(&self) -> bool {
        self.tag() == TAG_PUBLIC_KEY
    }
}

enum BodyLen {
    Full(u64),
    Partial(u64),
}

/// Splits a byte stream into packet frames (RFC 4880 §4.2, old and new format).
pub(crate) struct PacketReader<R> {
    inner: R,
}

impl<R: Read> PacketReader<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self { inner }
    }

    pub(crate) fn next_frame(&mut self) -> Result<Option<Frame>, DecodeError> {
        let mut first = [0u8; 1];
        loop {
            match self.inner.read(&mut first) {
                Ok(0) => return Ok(None),
                Ok(_) => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(DecodeError::Io(err)),
            }
        }
        let header = first[0];
        if header & 0x80 == 0 {
            return Err(DecodeError::InvalidHeader(header));
        }

        if header & 0x40 != 0 {
            return self.read_new_format(header & 0x3F).map(Some);
        }

        let tag = (header >> 2) & 0x0F;
        let len = match header & 0x03 {
            0 => Some(self.read_be(1, tag)?),
            1 => Some(self.read_be(2, tag)?),
            2 => Some(self.read_be(4, tag)?),
            _ => None,
        };
        match len {
            Some(len) => self.read_body(tag, len).map(Some),
            None => self.read_indeterminate(tag).map(Some),
        }
    }

    fn read_new_format(&mut self, tag: u8) -> Result<Frame, DecodeError> {
        let mut body = Vec::new();
        let mut total = 0u64;
        let mut oversized = false;
        loop {
            let (len, last) = match self.read_new_len(tag)? {
                BodyLen::Full(len) => (len, true),
                BodyLen::Partial(len) => (len, false),
            };
            total += len;
            if !oversized && total > MAX_PACKET_LEN as u64 {
                oversized = true;
                body = Vec::new();
            }
            if oversized {
                self.skip(len, tag)?;
            } else {
                self.append(&mut body, len, tag)?;
            }
            if last {
                break;
            }
        }
        if oversized {
            Ok(Frame::Oversized { tag, len: total })
        } else {
            Ok(Frame::Packet(Packet::new(tag, body)))
        }
    }

    fn read_new_len(&mut self, tag: u8) -> Result<BodyLen, DecodeError> {
        let o1 = self.read_be(1, tag)?;
        Ok(match o1 {
            0..=191 => BodyLen::Full(o1),
            192..=223 => {
                let o2 = self.read_be(1, tag)?;
                BodyLen::Full(((o1 - 192) << 8) + o2 + 192)
            }
            255 => BodyLen::Full(self.read_be(4, tag)?),
            _ => BodyLen::Partial(1u64 << (o1 & 0x1F)),
        })
    }

    fn read_body(&mut self, tag: u8, len: u64) -> Result<Frame, DecodeError> {
        if len > MAX_PACKET_LEN as u64 {
            self.skip(len, tag)?;
            return Ok(Frame::Oversized { tag, len });
        }
        let mut body = Vec::with_capacity(len as usize);
        self.append(&mut body, len, tag)?;
        Ok(Frame::Packet(Packet::new(tag, body)))
    }

    fn read_indeterminate(&mut self, tag: u8) -> Result<Frame, DecodeError> {
        let mut body = Vec::new();
        let limit = MAX_PACKET_LEN as u64 + 1;
        let read = (&mut self.inner).take(limit).read_to_end(&mut body)? as u64;
        if read < limit {
            return Ok(Frame::Packet(Packet::new(tag, body)));
        }
        let rest = io::copy(&mut self.inner, &mut io::sink())?;
        Ok(Frame::Oversized {
            tag,
            len: read + rest,
        })
    }

    fn read_be(&mut self, width: usize, tag: u8) -> Result<u64, DecodeError> {
        let mut buf = [0u8; 4];
        self.inner
            .read_exact(&mut buf[..width])
            .map_err(|err| truncated_or_io(err, tag))?;
        Ok(buf[..width]
            .iter()
            .fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
    }

    fn append(&mut self, body: &mut Vec<u8>, len: u64, tag: u8) -> Result<(), DecodeError> {
        let read = (&mut self.inner).take(len).read_to_end(body)? as u64;
        if read < len {
            return Err(DecodeError::Truncated { tag });
        }
        Ok(())
    }

    fn skip(&mut self, len: u64, tag: u8) -> Result<(), DecodeError> {
        let skipped = io::copy(&mut (&mut self.inner).take(len), &mut io::sink())?;
        if skipped < len {
            return Err(DecodeError::Truncated { tag });
        }
        Ok(())
    }
}

fn truncated_or_io(err: io::Error, tag: u8) -> DecodeError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        DecodeError::Truncated { tag }
    } else {
        DecodeError::Io(err)
    }
}
