//! Packet transforms for the espflow dataplane.
//!
//! This crate provides the per-packet protocol engines that run on the
//! dataplane workers:
//!
//! - **IPsec ESP** (Encapsulating Security Payload) - RFC 4303 encode and
//!   decode with anti-replay protection, driven by a batch dispatcher
//!
//! # Features
//!
//! - `ipsec` (default) - ESP encoder, decoder and SA store
//! - `serde` - `Serialize`/`Deserialize` for configuration and counters
//!
//! # Example
//!
//! ```rust
//! use espflow_proto::ipsec::esp::{padding_len, EspHeader};
//!
//! let header = EspHeader { spi: 0x1000, seq: 1 };
//! let mut wire = [0u8; 8];
//! header.write(&mut wire);
//! assert_eq!(EspHeader::read(&wire).unwrap(), header);
//!
//! // 40-byte payload, AES block size
//! assert_eq!(padding_len(40, 16), 6);
//! ```
//!
//! # Security
//!
//! - All cryptographic operations use vetted RustCrypto implementations
//! - Constant-time ICV comparison
//! - Secure memory handling with `zeroize`
//!
//! # References
//!
//! - [RFC 4303](https://datatracker.ietf.org/doc/html/rfc4303) - IP Encapsulating Security Payload
//! - [RFC 4106](https://datatracker.ietf.org/doc/html/rfc4106) - AES-GCM in IPsec ESP

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

#[cfg(feature = "ipsec")]
pub mod ipsec;
