//! Row integrity checks and pixel unpacking.

use crate::configuration;
use crate::error::Error;
use crate::port::Port;
use crate::reader::WordReader;

pub const CRC_POLYNOMIAL: u16 = 0xa001;

/// Upper half of a checksum trailer word.
pub const CRC_TAG: u32 = 0xcccc_0000;

/// Upper half of a row index trailer word.
pub const ROW_TAG: u32 = 0xaaaa_0000;

/// CRC-16 with the reflected 0x8005 polynomial, zero initial value.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Crc16(u16);

impl Crc16 {
    pub fn new() -> Self {
        Self(0)
    }

    pub fn update_byte(&mut self, byte: u8) {
        self.0 ^= byte as u16;
        for _ in 0..8 {
            if self.0 & 1 == 1 {
                self.0 = (self.0 >> 1) ^ CRC_POLYNOMIAL;
            } else {
                self.0 >>= 1;
            }
        }
    }

    /// Bytes are consumed least significant first.
    pub fn update_word(&mut self, word: u32) {
        for byte in word.to_le_bytes() {
            self.update_byte(byte);
        }
    }

    pub fn value(&self) -> u16 {
        self.0
    }

    pub fn checksum(bytes: &[u8]) -> u16 {
        let mut crc = Self::new();
        for byte in bytes {
            crc.update_byte(*byte);
        }
        crc.value()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RowStatus {
    Ok,
    CrcMismatch { expected: u32, read: u32 },
    RowMismatch { expected: u32, read: u32 },
}

impl RowStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, RowStatus::Ok)
    }
}

impl std::fmt::Display for RowStatus {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => formatter.write_str("OK"),
            Self::CrcMismatch { expected, read } => write!(
                formatter,
                "CRC mismatch (calculated {expected:#010x}, read {read:#010x})"
            ),
            Self::RowMismatch { expected, read } => write!(
                formatter,
                "row index mismatch (expected {expected:#010x}, read {read:#010x})"
            ),
        }
    }
}

/// Words needed to carry `pixels` 16-bit samples, an odd count is padded.
pub fn words_for_pixels(pixels: usize) -> usize {
    (pixels * 2).div_ceil(4)
}

/// Drains `words.len()` payload words then the trailer, and compares the
/// trailer with the checksum computed on the way.
///
/// A mismatch is reported in the status, the payload is kept.
pub fn read_raw_line<P: Port + ?Sized>(
    reader: &mut WordReader,
    port: &mut P,
    words: &mut [u32],
    row: u32,
    trailer: configuration::Trailer,
) -> Result<RowStatus, Error> {
    let mut crc = Crc16::new();
    for slot in words.iter_mut() {
        let word = reader.read_word(port)?;
        crc.update_word(word);
        *slot = word;
    }
    let expected_crc = CRC_TAG | crc.value() as u32;
    let read_crc = reader.read_word(port)?;
    let row_word = match trailer {
        configuration::Trailer::Crc => None,
        configuration::Trailer::CrcAndRow => Some(reader.read_word(port)?),
    };
    if read_crc != expected_crc {
        return Ok(RowStatus::CrcMismatch {
            expected: expected_crc,
            read: read_crc,
        });
    }
    if let Some(read_row) = row_word {
        let expected_row = ROW_TAG | (row & 0xffff);
        if read_row != expected_row {
            return Ok(RowStatus::RowMismatch {
                expected: expected_row,
                read: read_row,
            });
        }
    }
    Ok(RowStatus::Ok)
}

/// Splits words into samples, low half first.
pub fn unpack(words: &[u32], pixels: &mut [u16]) {
    for (pair, word) in pixels.chunks_mut(2).zip(words) {
        pair[0] = (*word & 0xffff) as u16;
        if let Some(high) = pair.get_mut(1) {
            *high = (*word >> 16) as u16;
        }
    }
}
