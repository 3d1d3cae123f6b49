use std::fs::File;
use std::io::{Cursor, ErrorKind, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use log::debug;
use xz2::read::XzDecoder;

use crate::error::Result;

const XZ_MAGIC: [u8; 6] = [0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00];
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

/// Sniffs the stream's first six bytes for a compression magic and wraps the
/// stream in the matching decoder; anything unrecognized passes through as
/// plain text.
///
/// The peeked bytes are chained back in front of the remainder, so sources
/// without mark/reset support work unchanged.
pub(crate) fn decode_stream<'a, R: Read + 'a>(mut reader: R) -> Result<Box<dyn Read + 'a>> {
    let mut head = [0u8; 6];
    let mut filled = 0;

    while filled < head.len() {
        match reader.read(&mut head[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }

    let magic = &head[..filled];
    let source = Cursor::new(magic.to_vec()).chain(reader);

    let decoded: Box<dyn Read + 'a> = if magic.starts_with(&XZ_MAGIC) {
        debug!("detected xz stream");
        Box::new(XzDecoder::new(source))
    } else if magic.starts_with(&GZIP_MAGIC) {
        debug!("detected gzip stream");
        Box::new(GzDecoder::new(source))
    } else if magic.starts_with(&ZSTD_MAGIC) {
        debug!("detected zstd stream");
        Box::new(zstd::stream::read::Decoder::new(source)?)
    } else {
        Box::new(source)
    };

    Ok(decoded)
}

/// Drops a UTF-8 byte-order mark from the front of an already-decoded
/// stream, so it cannot leak into the first column name.
pub(crate) fn strip_bom<'a>(mut reader: Box<dyn Read + 'a>) -> Result<Box<dyn Read + 'a>> {
    let mut head = [0u8; 3];
    let mut filled = 0;

    while filled < head.len() {
        match reader.read(&mut head[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }

    if head[..filled] == *b"\xef\xbb\xbf" {
        return Ok(reader);
    }

    Ok(Box::new(Cursor::new(head[..filled].to_vec()).chain(reader)))
}

/// Opens a file and transparently decodes it if compressed.
pub(crate) fn open_path(path: &Path) -> Result<Box<dyn Read>> {
    let file = File::open(path)?;
    decode_stream(file)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::write::GzEncoder;
    use flate2::Compression;
    use xz2::write::XzEncoder;

    use super::*;

    const SAMPLE: &[u8] = b"a,b\n1,2\n3,4\n";

    fn read_all(reader: impl Read) -> Vec<u8> {
        let mut out = Vec::new();
        decode_stream(reader).unwrap().read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_plain_passthrough() {
        assert_eq!(read_all(Cursor::new(SAMPLE.to_vec())), SAMPLE);
    }

    #[test]
    fn test_shorter_than_peek() {
        assert_eq!(read_all(Cursor::new(b"ab".to_vec())), b"ab");
        assert_eq!(read_all(Cursor::new(Vec::new())), b"");
    }

    #[test]
    fn test_gzip() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(SAMPLE).unwrap();
        let compressed = encoder.finish().unwrap();

        assert_eq!(read_all(Cursor::new(compressed)), SAMPLE);
    }

    #[test]
    fn test_xz() {
        let mut encoder = XzEncoder::new(Vec::new(), 6);
        encoder.write_all(SAMPLE).unwrap();
        let compressed = encoder.finish().unwrap();

        assert_eq!(read_all(Cursor::new(compressed)), SAMPLE);
    }

    #[test]
    fn test_zstd() {
        let compressed = zstd::stream::encode_all(Cursor::new(SAMPLE.to_vec()), 3).unwrap();
        assert_eq!(read_all(Cursor::new(compressed)), SAMPLE);
    }

    #[test]
    fn test_strip_bom() {
        let reader = decode_stream(Cursor::new(b"\xef\xbb\xbfa,b\n".to_vec())).unwrap();
        let mut out = Vec::new();
        strip_bom(reader).unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, b"a,b\n");

        // no mark: the peeked bytes come back untouched
        let reader = decode_stream(Cursor::new(b"a,b\n".to_vec())).unwrap();
        let mut out = Vec::new();
        strip_bom(reader).unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, b"a,b\n");
    }

    #[test]
    fn test_open_path_decodes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.csv.gz");

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(SAMPLE).unwrap();
        std::fs::write(&path, encoder.finish().unwrap()).unwrap();

        let mut out = Vec::new();
        open_path(&path).unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, SAMPLE);
    }
}
