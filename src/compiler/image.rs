//! The bootable memory image: static data followed by code.

use crate::error::Error;

/// A flat word array, loaded at address 0 by the processor.
///
/// Word 0 holds the entry-point `jmp` into the code region; word 3 is the
/// MMIO port; the rest of `[0, data_break)` is static data (string literals,
/// `alloc-static` reservations, spilled constants and variable homes), and
/// `[data_break, len)` is code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    /// All words, data first, then code
    pub words: Vec<u32>,
    /// Index of the first code word
    pub data_break: u32,
}

impl Image {
    /// Serialize as little-endian 32-bit words, the on-disk format
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.words.len() * 4);
        for word in &self.words {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        bytes
    }
}

/// Read an image file back into words. The file carries no metadata, so the
/// data/code boundary is not recoverable; the processor does not need it.
pub fn words_from_bytes(bytes: &[u8]) -> Result<Vec<u32>, Error> {
    if bytes.len() % 4 != 0 {
        return Err(Error::BadImage(format!(
            "length {} is not a multiple of the word size",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}
