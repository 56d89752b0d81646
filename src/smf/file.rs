//! Loading SMF data from disk

use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Gzip stream magic
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Read a MIDI file, decompressing it if it is gzipped
pub fn read_smf_file(path: &Path) -> io::Result<Vec<u8>> {
    let mut file = File::open(path)?;

    let is_gzip = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("gz") || ext.eq_ignore_ascii_case("mgz"))
        .unwrap_or(false);

    if is_gzip {
        let mut decoder = GzDecoder::new(file);
        let mut data = Vec::new();
        decoder.read_to_end(&mut data)?;
        return Ok(data);
    }

    let mut data = Vec::new();
    file.read_to_end(&mut data)?;
    decompress_if_gzip(data)
}

/// Decompress `data` if it starts with the gzip magic, else return it as is
pub fn decompress_if_gzip(data: Vec<u8>) -> io::Result<Vec<u8>> {
    if !data.starts_with(&GZIP_MAGIC) {
        return Ok(data);
    }
    let mut decoder = GzDecoder::new(io::Cursor::new(data));
    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed)?;
    Ok(decompressed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn test_plain_data_passes_through() {
        let data = b"MThd\0\0\0\x06".to_vec();
        assert_eq!(decompress_if_gzip(data.clone()).unwrap(), data);
    }

    #[test]
    fn test_gzip_magic_detected() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"MThd").unwrap();
        let compressed = encoder.finish().unwrap();
        assert_eq!(decompress_if_gzip(compressed).unwrap(), b"MThd");
    }
}
