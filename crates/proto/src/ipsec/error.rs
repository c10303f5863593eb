//! Error types for ESP packet transforms
//!
//! Two kinds of failure share this type. Per-packet failures (replay,
//! integrity, length, trailer, unknown inner protocol, sequence exhaustion)
//! drop exactly one packet and map to a named node counter through
//! [`Error::counter`]. Control-plane failures (bad keys, unknown SA index,
//! store exhaustion) are returned to the caller of the SA store and never
//! appear on the packet path.

use std::fmt;

/// Result type for ESP operations
pub type Result<T> = std::result::Result<T, Error>;

/// ESP engine errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Sequence number is stale or a duplicate
    Replay(u64),

    /// ICV or AEAD tag mismatch
    Integrity,

    /// Ciphertext is not a whole number of cipher blocks
    Length {
        /// Ciphertext length in bytes
        len: usize,
        /// Cipher block size
        block_size: usize,
    },

    /// Trailer pad length is not smaller than the block size
    Trailer {
        /// Pad length read from the trailer
        pad_len: u8,
        /// Cipher block size
        block_size: usize,
    },

    /// Inner next-header is not an IP protocol this node can dispatch
    DecryptionFailed(u8),

    /// Outbound sequence space is exhausted for the SA with this SPI
    SequenceExhausted(u32),

    /// Transport-mode outer header is neither IPv4 nor IPv6
    NotIp(u8),

    /// Buffer too short for operation
    BufferTooShort {
        /// Required length
        required: usize,
        /// Available length
        available: usize,
    },

    /// Invalid configuration parameter
    InvalidParameter(String),

    /// Key length does not match the algorithm
    InvalidKeyLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// No SA installed at this index
    SaNotFound(u32),

    /// SA store has no free slots
    StoreFull(usize),

    /// Cryptographic primitive failure
    CryptoError(String),
}

impl Error {
    /// Node counter incremented when a packet is dropped with this error
    pub fn counter(&self) -> &'static str {
        match self {
            Error::Replay(_) => "replay",
            Error::Integrity => "integrity-failed",
            Error::Length { .. } | Error::BufferTooShort { .. } => "length-error",
            Error::Trailer { .. } => "trailer-error",
            Error::DecryptionFailed(_) => "decrypt-failed",
            Error::SequenceExhausted(_) => "sequence-exhausted",
            Error::NotIp(_) => "not-ip",
            Error::CryptoError(_) => "decrypt-failed",
            Error::InvalidParameter(_)
            | Error::InvalidKeyLength { .. }
            | Error::SaNotFound(_)
            | Error::StoreFull(_) => "drop",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Replay(seq) => write!(f, "Replay detected (sequence: {})", seq),
            Error::Integrity => write!(f, "Integrity check failed"),
            Error::Length { len, block_size } => write!(
                f,
                "Ciphertext length {} is not a multiple of block size {}",
                len, block_size
            ),
            Error::Trailer { pad_len, block_size } => write!(
                f,
                "Invalid pad length {} for block size {}",
                pad_len, block_size
            ),
            Error::DecryptionFailed(next) => {
                write!(f, "Decryption failed: unknown next header {}", next)
            }
            Error::SequenceExhausted(spi) => {
                write!(f, "Sequence number space exhausted (SPI: 0x{:08x})", spi)
            }
            Error::NotIp(byte) => write!(f, "Not an IP header (first byte: 0x{:02x})", byte),
            Error::BufferTooShort {
                required,
                available,
            } => {
                write!(
                    f,
                    "Buffer too short: need {} bytes, have {}",
                    required, available
                )
            }
            Error::InvalidParameter(msg) => write!(f, "Invalid parameter: {}", msg),
            Error::InvalidKeyLength { expected, actual } => {
                write!(
                    f,
                    "Invalid key length: expected {}, got {}",
                    expected, actual
                )
            }
            Error::SaNotFound(index) => write!(f, "Security Association not found: {}", index),
            Error::StoreFull(capacity) => {
                write!(f, "SA store full (capacity: {})", capacity)
            }
            Error::CryptoError(msg) => write!(f, "Cryptographic error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<Error> for espflow_platform::PlatformError {
    fn from(err: Error) -> Self {
        match err {
            Error::StoreFull(_) => espflow_platform::PlatformError::Exhausted(err.to_string()),
            Error::InvalidParameter(_) | Error::InvalidKeyLength { .. } => {
                espflow_platform::PlatformError::Config(err.to_string())
            }
            other => espflow_platform::PlatformError::ControlPlane(other.to_string()),
        }
    }
}
