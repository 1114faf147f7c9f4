use std::{
    fs::File,
    io::{self, BufRead, BufReader, Read},
    path::Path,
};

use flate2::bufread::MultiGzDecoder;
use tracing::debug;

use super::{read_keys, ArmorReader, KeyReader};

const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];
const ARMOR_MARKER: &[u8] = b"-----BEGIN PGP";

/// Encoding of a key dump, detected from its first bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Binary,
    Armored,
    Gzip,
}

/// Classify a stream by its leading bytes.
pub fn sniff(prefix: &[u8]) -> InputFormat {
    if prefix.starts_with(&GZIP_MAGIC) {
        InputFormat::Gzip
    } else if prefix.trim_ascii_start().starts_with(ARMOR_MARKER) {
        InputFormat::Armored
    } else {
        InputFormat::Binary
    }
}

type BoxedRead = Box<dyn Read + Send>;

/// Open a key dump and return the lazy record decoder over it.
///
/// Any error here is a file-level failure: nothing has been decoded yet.
pub fn open_key_file(path: &Path) -> io::Result<KeyReader<BoxedRead>> {
    let file = File::open(path)?;
    decode_stream(file)
}

/// Wrap an arbitrary byte stream, unwrapping gzip and ASCII armor as needed.
pub fn decode_stream<R: Read + Send + 'static>(reader: R) -> io::Result<KeyReader<BoxedRead>> {
    let mut buffered = BufReader::new(reader);
    let format = sniff(buffered.fill_buf()?);
    debug!(?format, "detected key stream format");
    let inner: BoxedRead = match format {
        InputFormat::Binary => Box::new(buffered),
        InputFormat::Armored => Box::new(ArmorReader::new(buffered)),
        InputFormat::Gzip => {
            let mut inflated = BufReader::new(MultiGzDecoder::new(buffered));
            match sniff(inflated.fill_buf()?) {
                InputFormat::Armored => Box::new(ArmorReader::new(inflated)),
                _ => Box::new(inflated),
            }
        }
    };
    Ok(read_keys(inner))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::{write::GzEncoder, Compression};

    use super::*;
    use crate::testing::{armor, v4_key};

    fn gzip(bytes: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytes).expect("compress");
        encoder.finish().expect("finish gzip")
    }

    fn count_ok(reader: KeyReader<BoxedRead>) -> usize {
        reader.filter(|outcome| outcome.is_ok()).count()
    }

    #[test]
    fn sniffs_formats() {
        assert_eq!(sniff(&[0x1F, 0x8B, 0x08]), InputFormat::Gzip);
        assert_eq!(
            sniff(b"\n  -----BEGIN PGP PUBLIC KEY BLOCK-----"),
            InputFormat::Armored
        );
        assert_eq!(sniff(&[0x99, 0x01]), InputFormat::Binary);
        assert_eq!(sniff(&[]), InputFormat::Binary);
    }

    #[test]
    fn decodes_each_format() {
        let mut binary = v4_key(1, "a@example.org");
        binary.extend(v4_key(2, "b@example.org"));

        let plain = decode_stream(io::Cursor::new(binary.clone())).expect("binary");
        assert_eq!(count_ok(plain), 2);

        let armored = decode_stream(io::Cursor::new(armor(&binary).into_bytes())).expect("armor");
        assert_eq!(count_ok(armored), 2);

        let compressed = decode_stream(io::Cursor::new(gzip(&binary))).expect("gzip");
        assert_eq!(count_ok(compressed), 2);

        let compressed_armor =
            decode_stream(io::Cursor::new(gzip(armor(&binary).as_bytes()))).expect("gzip armor");
        assert_eq!(count_ok(compressed_armor), 2);
    }

    #[test]
    fn open_reports_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = open_key_file(&dir.path().join("absent.pgp"))
            .err()
            .expect("missing file");
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn open_reads_file_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("dump.pgp");
        std::fs::write(&path, v4_key(7, "disk@example.org")).expect("write dump");
        let reader = open_key_file(&path).expect("open");
        assert_eq!(count_ok(reader), 1);
    }
}
