//! ESP (Encapsulating Security Payload) wire format
//!
//! Implements the framing parts of RFC 4303 - IP Encapsulating Security
//! Payload (ESP): header, padding and trailer. The transforms that use them
//! live in [`encrypt`](crate::ipsec::encrypt) and
//! [`decrypt`](crate::ipsec::decrypt).
//!
//! # ESP Packet Format (RFC 4303)
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+ ----
//! |               Security Parameters Index (SPI)                 | ^Auth
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+ |Cov-
//! |                      Sequence Number                          | |erage
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+ | ----
//! |                    Payload Data (variable)                    | |  ^
//! ~                                                               ~ |  |
//! |                                                               | |Conf.
//! +               +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+ |Cov-
//! |               |     Padding (0-255 bytes)                     | |erage
//! +-+-+-+-+-+-+-+-+               +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+ |  |
//! |                               |  Pad Length   | Next Header   | v  v
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+ ----
//! |         Integrity Check Value-ICV   (variable)                |
//! ~                                                               ~
//! |                                                               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Payload Data starts with the explicit IV when the algorithm uses one.
//! For AEAD algorithms the 16-byte tag follows the ciphertext and there is
//! no separate ICV.

use crate::ipsec::{Error, Result};

/// SPI + sequence number
pub const ESP_HEADER_LEN: usize = 8;

/// Pad length + next header
pub const ESP_TRAILER_LEN: usize = 2;

/// ESP header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EspHeader {
    /// Security Parameters Index
    pub spi: u32,

    /// Low 32 bits of the sequence number
    pub seq: u32,
}

impl EspHeader {
    /// Parse from the start of `buf`
    ///
    /// # Errors
    ///
    /// Returns `BufferTooShort` if fewer than 8 bytes are available
    pub fn read(buf: &[u8]) -> Result<Self> {
        if buf.len() < ESP_HEADER_LEN {
            return Err(Error::BufferTooShort {
                required: ESP_HEADER_LEN,
                available: buf.len(),
            });
        }
        Ok(EspHeader {
            spi: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            seq: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
        })
    }

    /// Serialize into the first 8 bytes of `buf`
    pub fn write(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.spi.to_be_bytes());
        buf[4..8].copy_from_slice(&self.seq.to_be_bytes());
    }
}

/// ESP trailer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EspTrailer {
    /// Number of padding bytes preceding the trailer
    pub pad_len: u8,

    /// Protocol of the protected payload
    pub next_header: u8,
}

impl EspTrailer {
    /// Read the trailer from the last two bytes of decrypted `plaintext`
    ///
    /// # Errors
    ///
    /// - `BufferTooShort` if the plaintext cannot hold a trailer
    /// - `Trailer` if the pad length is not smaller than `block_size`, or
    ///   the padding would run past the start of the plaintext
    pub fn read(plaintext: &[u8], block_size: usize) -> Result<Self> {
        let len = plaintext.len();
        if len < ESP_TRAILER_LEN {
            return Err(Error::BufferTooShort {
                required: ESP_TRAILER_LEN,
                available: len,
            });
        }

        let trailer = EspTrailer {
            pad_len: plaintext[len - 2],
            next_header: plaintext[len - 1],
        };

        if trailer.pad_len as usize >= block_size
            || trailer.pad_len as usize + ESP_TRAILER_LEN > len
        {
            return Err(Error::Trailer {
                pad_len: trailer.pad_len,
                block_size,
            });
        }

        Ok(trailer)
    }

    /// Bytes removed from the tail when stripping padding and trailer
    pub fn strip_len(&self) -> usize {
        self.pad_len as usize + ESP_TRAILER_LEN
    }
}

/// Calculate padding length for a payload
///
/// ```text
/// blocks = 1 + (payload_len + 1) / block_size
/// pad    = block_size * blocks - 2 - payload_len
/// ```
///
/// The result always lies in `[0, block_size - 1]` and makes
/// `payload_len + pad + 2` a multiple of `block_size`.
pub fn padding_len(payload_len: usize, block_size: usize) -> usize {
    let blocks = 1 + (payload_len + 1) / block_size;
    block_size * blocks - ESP_TRAILER_LEN - payload_len
}

/// Fill `padding` with the monotonic sequence 1, 2, 3, ...
pub fn write_padding(padding: &mut [u8]) {
    for (i, byte) in padding.iter_mut().enumerate() {
        *byte = (i + 1) as u8;
    }
}

/// AEAD additional authenticated data: SPI, low sequence half and, with
/// ESN, the high half appended after it. Returns the buffer and the number
/// of bytes used.
pub fn aead_aad(spi: u32, seq: u64, esn: bool) -> ([u8; 12], usize) {
    let mut aad = [0u8; 12];
    aad[0..4].copy_from_slice(&spi.to_be_bytes());
    aad[4..8].copy_from_slice(&(seq as u32).to_be_bytes());
    if esn {
        aad[8..12].copy_from_slice(&((seq >> 32) as u32).to_be_bytes());
        (aad, 12)
    } else {
        (aad, 8)
    }
}
