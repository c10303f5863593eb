//! ESP cryptographic transforms
//!
//! This module maps the ESP algorithm identifiers onto RustCrypto
//! primitives:
//! - [`CryptoAlg`] / [`IntegAlg`]: algorithm identifiers and their wire
//!   parameters (block size, IV size, key size, ICV truncation)
//! - [`CipherSuite`]: keyed encryption context, one variant per
//!   algorithm family (null, CBC, CTR, AEAD)
//! - [`IntegSuite`]: keyed MAC context (HMAC, CMAC)
//!
//! Contexts are built once when a worker first sees an SA generation and are
//! reused for every packet after that.

use std::fmt;

pub mod cipher;
pub mod integ;

pub use self::cipher::CipherSuite;
pub use self::integ::IntegSuite;

/// Length of the nonce salt carried by CTR and GCM SAs
pub const SALT_LEN: usize = 4;

/// AEAD authentication tag length
pub const GCM_TAG_LEN: usize = 16;

/// ESP encryption algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CryptoAlg {
    /// No encryption (integrity only)
    None,
    /// DES-CBC (RFC 2405)
    DesCbc,
    /// 3DES-EDE-CBC (RFC 2451)
    TripleDesCbc,
    /// AES-CBC with 128-bit key (RFC 3602)
    AesCbc128,
    /// AES-CBC with 192-bit key
    AesCbc192,
    /// AES-CBC with 256-bit key
    AesCbc256,
    /// AES-CTR with 128-bit key (RFC 3686)
    AesCtr128,
    /// AES-CTR with 192-bit key
    AesCtr192,
    /// AES-CTR with 256-bit key
    AesCtr256,
    /// AES-GCM with 128-bit key and 16-byte ICV (RFC 4106)
    AesGcm128,
    /// AES-GCM with 192-bit key
    AesGcm192,
    /// AES-GCM with 256-bit key
    AesGcm256,
}

/// Cipher family, selects the per-packet IV and trailer handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherFamily {
    /// Payload sent in the clear
    Null,
    /// Block cipher in CBC mode with a random explicit IV
    Cbc,
    /// Counter mode with a sequence-derived IV
    Ctr,
    /// AEAD with a sequence-derived IV and appended tag
    Aead,
}

impl CryptoAlg {
    /// Get the algorithm family
    pub fn family(self) -> CipherFamily {
        match self {
            CryptoAlg::None => CipherFamily::Null,
            CryptoAlg::DesCbc
            | CryptoAlg::TripleDesCbc
            | CryptoAlg::AesCbc128
            | CryptoAlg::AesCbc192
            | CryptoAlg::AesCbc256 => CipherFamily::Cbc,
            CryptoAlg::AesCtr128 | CryptoAlg::AesCtr192 | CryptoAlg::AesCtr256 => {
                CipherFamily::Ctr
            }
            CryptoAlg::AesGcm128 | CryptoAlg::AesGcm192 | CryptoAlg::AesGcm256 => {
                CipherFamily::Aead
            }
        }
    }

    /// Block size used for padding and ciphertext length checks
    pub fn block_size(self) -> usize {
        match self {
            CryptoAlg::None => 1,
            CryptoAlg::DesCbc | CryptoAlg::TripleDesCbc => 8,
            _ => 16,
        }
    }

    /// Explicit IV length carried after the sequence number
    pub fn iv_size(self) -> usize {
        match self.family() {
            CipherFamily::Null => 0,
            CipherFamily::Cbc => self.block_size(),
            CipherFamily::Ctr | CipherFamily::Aead => 8,
        }
    }

    /// Required encryption key length in bytes
    pub fn key_len(self) -> usize {
        match self {
            CryptoAlg::None => 0,
            CryptoAlg::DesCbc => 8,
            CryptoAlg::TripleDesCbc => 24,
            CryptoAlg::AesCbc128 | CryptoAlg::AesCtr128 | CryptoAlg::AesGcm128 => 16,
            CryptoAlg::AesCbc192 | CryptoAlg::AesCtr192 | CryptoAlg::AesGcm192 => 24,
            CryptoAlg::AesCbc256 | CryptoAlg::AesCtr256 | CryptoAlg::AesGcm256 => 32,
        }
    }

    /// Whether the SA must carry a 4-byte nonce salt
    pub fn needs_salt(self) -> bool {
        matches!(self.family(), CipherFamily::Ctr | CipherFamily::Aead)
    }

    /// Length of the tag appended by the cipher itself (AEAD only)
    pub fn tag_len(self) -> usize {
        if self.is_aead() {
            GCM_TAG_LEN
        } else {
            0
        }
    }

    /// Check if this is an AEAD cipher
    pub fn is_aead(self) -> bool {
        self.family() == CipherFamily::Aead
    }

    /// Canonical lowercase name
    pub fn name(self) -> &'static str {
        match self {
            CryptoAlg::None => "none",
            CryptoAlg::DesCbc => "des-cbc",
            CryptoAlg::TripleDesCbc => "3des-cbc",
            CryptoAlg::AesCbc128 => "aes-cbc-128",
            CryptoAlg::AesCbc192 => "aes-cbc-192",
            CryptoAlg::AesCbc256 => "aes-cbc-256",
            CryptoAlg::AesCtr128 => "aes-ctr-128",
            CryptoAlg::AesCtr192 => "aes-ctr-192",
            CryptoAlg::AesCtr256 => "aes-ctr-256",
            CryptoAlg::AesGcm128 => "aes-gcm-128",
            CryptoAlg::AesGcm192 => "aes-gcm-192",
            CryptoAlg::AesGcm256 => "aes-gcm-256",
        }
    }
}

impl fmt::Display for CryptoAlg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// ESP integrity algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum IntegAlg {
    /// No separate integrity (AEAD or unauthenticated)
    None,
    /// HMAC-MD5-96 (RFC 2403)
    HmacMd5_96,
    /// HMAC-SHA1-96 (RFC 2404)
    HmacSha1_96,
    /// HMAC-SHA-256 truncated to 96 bits
    HmacSha256_96,
    /// HMAC-SHA-256-128 (RFC 4868)
    HmacSha256_128,
    /// HMAC-SHA-384-192 (RFC 4868)
    HmacSha384_192,
    /// AES-CMAC-96 (RFC 4494)
    Cmac96,
}

impl IntegAlg {
    /// ICV length after truncation
    pub fn trunc_len(self) -> usize {
        match self {
            IntegAlg::None => 0,
            IntegAlg::HmacMd5_96
            | IntegAlg::HmacSha1_96
            | IntegAlg::HmacSha256_96
            | IntegAlg::Cmac96 => 12,
            IntegAlg::HmacSha256_128 => 16,
            IntegAlg::HmacSha384_192 => 24,
        }
    }

    /// Required integrity key length in bytes
    pub fn key_len(self) -> usize {
        match self {
            IntegAlg::None => 0,
            IntegAlg::HmacMd5_96 => 16,
            IntegAlg::HmacSha1_96 => 20,
            IntegAlg::HmacSha256_96 | IntegAlg::HmacSha256_128 => 32,
            IntegAlg::HmacSha384_192 => 48,
            IntegAlg::Cmac96 => 16,
        }
    }

    /// Canonical lowercase name
    pub fn name(self) -> &'static str {
        match self {
            IntegAlg::None => "none",
            IntegAlg::HmacMd5_96 => "hmac-md5-96",
            IntegAlg::HmacSha1_96 => "hmac-sha1-96",
            IntegAlg::HmacSha256_96 => "hmac-sha256-96",
            IntegAlg::HmacSha256_128 => "hmac-sha256-128",
            IntegAlg::HmacSha384_192 => "hmac-sha384-192",
            IntegAlg::Cmac96 => "aes-cmac-96",
        }
    }
}

impl fmt::Display for IntegAlg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
