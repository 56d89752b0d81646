//! Big-endian integer and variable-length quantity decoding

use crate::error::{Error, Result};

/// Maximum number of 7-bit groups in a variable-length quantity
pub const MAX_VLQ_GROUPS: usize = 5;

/// Decode an `N`-byte big-endian unsigned integer from the start of `data`
pub fn decode_integer<const N: usize>(data: &[u8]) -> Result<u32> {
    if data.len() < N {
        return Err(Error::TruncatedInput {
            needed: N,
            available: data.len(),
        });
    }
    Ok(data[..N]
        .iter()
        .fold(0u32, |value, &b| (value << 8) | b as u32))
}

/// Decode a MIDI variable-length quantity from the start of `data`
///
/// Returns the decoded value and the number of bytes consumed.
pub fn decode_vlq(data: &[u8]) -> Result<(u32, usize)> {
    if data.is_empty() {
        return Err(Error::MalformedVlq);
    }

    let mut value = 0u32;
    for (i, &byte) in data.iter().take(MAX_VLQ_GROUPS).enumerate() {
        let fragment = (byte & 0x7F) as u32;
        let cont = byte & 0x80 != 0;
        if i == MAX_VLQ_GROUPS - 1 && (cont || fragment > 0x0F) {
            return Err(Error::MalformedVlq);
        }
        value = (value << 7) | fragment;
        if !cont {
            return Ok((value, i + 1));
        }
    }

    // Ran out of input with the continuation bit still set
    Err(Error::MalformedVlq)
}

/// Encode a value as a MIDI variable-length quantity
///
/// Values are truncated to 28 bits (4 encoded bytes).
pub fn encode_vlq(value: u32) -> Vec<u8> {
    let value = value & 0x0FFF_FFFF;
    let mut groups = vec![(value & 0x7F) as u8];
    let mut rest = value >> 7;
    while rest != 0 {
        groups.push(((rest & 0x7F) as u8) | 0x80);
        rest >>= 7;
    }
    groups.reverse();
    groups
}

/// Cursor over big-endian SMF data
pub struct SmfReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SmfReader<'a> {
    /// Create a new reader over raw data
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Check if we've reached the end of data
    pub fn is_eof(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Get current position
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos.min(self.data.len())..]
    }

    /// Read a single byte
    pub fn read_u8(&mut self) -> Result<u8> {
        let value = decode_integer::<1>(self.remaining())?;
        self.pos += 1;
        Ok(value as u8)
    }

    /// Read a 16-bit big-endian value
    pub fn read_u16(&mut self) -> Result<u16> {
        let value = decode_integer::<2>(self.remaining())?;
        self.pos += 2;
        Ok(value as u16)
    }

    /// Read a 32-bit big-endian value
    pub fn read_u32(&mut self) -> Result<u32> {
        let value = decode_integer::<4>(self.remaining())?;
        self.pos += 4;
        Ok(value)
    }

    /// Read a variable-length quantity
    pub fn read_vlq(&mut self) -> Result<u32> {
        let (value, len) = decode_vlq(self.remaining())?;
        self.pos += len;
        Ok(value)
    }

    /// Borrow the next `len` bytes
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let rest = self.remaining();
        if rest.len() < len {
            return Err(Error::TruncatedInput {
                needed: len,
                available: rest.len(),
            });
        }
        self.pos += len;
        Ok(&rest[..len])
    }
}
