use std::io::{self, BufRead, Read};

use base64::{engine::general_purpose::STANDARD, Engine as _};

const CRC24_INIT: u32 = 0x00B7_04CE;
const CRC24_POLY: u32 = 0x0186_4CFB;

fn crc24(mut crc: u32, data: &[u8]) -> u32 {
    for byte in data {
        crc ^= u32::from(*byte) << 16;
        for _ in 0..8 {
            crc <<= 1;
            if crc & 0x0100_0000 != 0 {
                crc ^= CRC24_POLY;
            }
        }
    }
    crc & 0x00FF_FFFF
}

pub(crate) fn crc24_of(data: &[u8]) -> u32 {
    crc24(CRC24_INIT, data)
}

/// The `=XXXX` checksum line that closes an armored body.
pub fn armor_checksum(data: &[u8]) -> String {
    let crc = crc24_of(data);
    format!(
        "={}",
        STANDARD.encode([(crc >> 16) as u8, (crc >> 8) as u8, crc as u8])
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Seeking,
    Headers,
    Body,
}

/// Streams the binary payload of one or more ASCII-armored blocks (RFC 4880 §6).
///
/// Text outside `-----BEGIN PGP` / `-----END PGP` lines is ignored. A checksum
/// line, when present, is verified when the block ends.
pub struct ArmorReader<R> {
    inner: R,
    state: State,
    carry: String,
    crc: u32,
    expected_crc: Option<u32>,
    out: Vec<u8>,
    pos: usize,
}

impl<R: BufRead> ArmorReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            state: State::Seeking,
            carry: String::new(),
            crc: CRC24_INIT,
            expected_crc: None,
            out: Vec::new(),
            pos: 0,
        }
    }

    /// Refill `out` with the next decoded chunk; `false` once input is exhausted.
    fn fill(&mut self) -> io::Result<bool> {
        self.out.clear();
        self.pos = 0;
        let mut line = String::new();
        loop {
            line.clear();
            if self.inner.read_line(&mut line)? == 0 {
                return match self.state {
                    State::Seeking => Ok(false),
                    _ => Err(invalid("armor block is missing its END line")),
                };
            }
            let line = line.trim();
            match self.state {
                State::Seeking => {
                    if line.starts_with("-----BEGIN PGP") {
                        self.state = State::Headers;
                        self.crc = CRC24_INIT;
                        self.expected_crc = None;
                    }
                }
                State::Headers => {
                    if line.is_empty() {
                        self.state = State::Body;
                    } else if !line.contains(':') {
                        // No header block: the body starts right away.
                        self.state = State::Body;
                        self.decode_line(line)?;
                    }
                }
                State::Body => {
                    if line.starts_with("-----END PGP") {
                        self.finish_block()?;
                        self.state = State::Seeking;
                    } else if let Some(checksum) = line.strip_prefix('=') {
                        self.expected_crc = Some(parse_checksum(checksum)?);
                    } else if !line.is_empty() {
                        self.decode_line(line)?;
                    }
                }
            }
            if !self.out.is_empty() {
                return Ok(true);
            }
        }
    }

    fn decode_line(&mut self, line: &str) -> io::Result<()> {
        if !line.is_ascii() {
            return Err(invalid("non-ASCII armor body"));
        }
        self.carry.push_str(line);
        let usable = self.carry.len() / 4 * 4;
        if usable == 0 {
            return Ok(());
        }
        let decoded = STANDARD
            .decode(&self.carry[..usable])
            .map_err(|err| invalid(format!("bad armor body: {err}")))?;
        self.carry.drain(..usable);
        self.crc = crc24(self.crc, &decoded);
        self.out.extend_from_slice(&decoded);
        Ok(())
    }

    fn finish_block(&mut self) -> io::Result<()> {
        if !self.carry.is_empty() {
            return Err(invalid("armor body ends mid base64 group"));
        }
        if let Some(expected) = self.expected_crc.take() {
            if expected != self.crc {
                return Err(invalid(format!(
                    "armor checksum mismatch: expected {expected:06X}, computed {:06X}",
                    self.crc
                )));
            }
        }
        Ok(())
    }
}

impl<R: BufRead> Read for ArmorReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos >= self.out.len() {
            if !self.fill()? {
                return Ok(0);
            }
        }
        let n = buf.len().min(self.out.len() - self.pos);
        buf[..n].copy_from_slice(&self.out[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

fn parse_checksum(encoded: &str) -> io::Result<u32> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|err| invalid(format!("bad armor checksum: {err}")))?;
    if bytes.len() != 3 {
        return Err(invalid("armor checksum must be 3 bytes"));
    }
    Ok(u32::from(bytes[0]) << 16 | u32::from(bytes[1]) << 8 | u32::from(bytes[2]))
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}
