use crc32fast::Hasher;
use thiserror::Error;

pub const MAGIC: &[u8; 4] = b"TSR2";
/// Header: magic (4) + crc (4) + len (4).
pub const HEADER_LEN: usize = 4 + 4 + 4;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame header is truncated or has the wrong magic")]
    BadHeader,
    #[error("frame length mismatch: header says {expected}, found {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("data integrity error (CRC mismatch)")]
    CrcMismatch,
}

/// One sealed blob as laid out on disk:
/// `[magic: 4][crc32(ciphertext): 4][len: 4][ciphertext: len]`.
///
/// The CRC only catches torn or bit-rotted files. Authenticity comes from the
/// cipher.
pub struct Frame<'a> {
    ciphertext: &'a [u8],
}

fn crc32(bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

pub fn encode(ciphertext: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&crc32(ciphertext).to_be_bytes());
    out.extend_from_slice(&(ciphertext.len() as u32).to_be_bytes());
    out.extend_from_slice(ciphertext);
    out
}

/// Splits a frame and checks its length and ciphertext CRC.
pub fn decode(bytes: &[u8]) -> Result<Frame<'_>, FrameError> {
    if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
        return Err(FrameError::BadHeader);
    }

    let crc = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    let len = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;

    let ciphertext = &bytes[HEADER_LEN..];
    if ciphertext.len() != len {
        return Err(FrameError::LengthMismatch {
            expected: len,
            actual: ciphertext.len(),
        });
    }
    if crc32(ciphertext) != crc {
        return Err(FrameError::CrcMismatch);
    }

    Ok(Frame { ciphertext })
}

impl<'a> Frame<'a> {
    pub fn ciphertext(&self) -> &'a [u8] {
        self.ciphertext
    }
}
