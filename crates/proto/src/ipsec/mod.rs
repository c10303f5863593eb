//! IPsec ESP packet transforms
//!
//! This module implements the dataplane half of IPsec: turning plaintext IP
//! packets into ESP packets and back, for Security Associations installed by
//! an external control plane.
//!
//! - **ESP** (Encapsulating Security Payload) - RFC 4303
//! - **AES-CBC / AES-CTR / AES-GCM / 3DES / DES** - RFC 3602, 3686, 4106, 2451, 2405
//! - **HMAC-MD5/SHA1/SHA2, AES-CMAC** truncated ICVs
//! - **Anti-replay** with extended sequence numbers - RFC 4303 Appendix A
//!
//! # Architecture
//!
//! ```text
//! control plane
//!   └── SaStore (add / rekey / delete / reclaim)
//!          │  versioned table snapshots
//!          ▼
//! worker N: WorkerContext (cipher + MAC contexts, replay windows)
//!          │
//!   Dispatcher ── EspEncrypt ──► ip4-lookup / ip6-lookup / interface-output
//!          └──── EspDecrypt ──► ip4-input / ip6-input / ipsec-gre-input
//! ```
//!
//! # Quick Start
//!
//! ```rust
//! use espflow_proto::ipsec::{
//!     config::SaParams,
//!     crypto::{CryptoAlg, IntegAlg},
//!     metrics::EspMetrics,
//!     Dispatcher, EspDecrypt, EspEncrypt, NextStage, Packet, PacketPool, SaStore,
//!     VecFrameSink, WorkerContext,
//! };
//! use std::net::Ipv4Addr;
//! use std::sync::Arc;
//!
//! let store = Arc::new(SaStore::new(16, 1));
//! let index = store.add(
//!     SaParams::builder()
//!         .with_spi(0x1000)
//!         .with_crypto(CryptoAlg::AesCbc128, vec![0x01; 16])
//!         .with_integ(IntegAlg::HmacSha1_96, vec![0x02; 20])
//!         .with_tunnel_v4(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2))
//!         .build()?,
//! )?;
//!
//! let metrics = Arc::new(EspMetrics::new());
//! let dispatcher = Dispatcher::new(256, metrics.clone());
//! let mut worker = WorkerContext::new(0, Arc::clone(&store));
//! let mut pool = PacketPool::new();
//!
//! // 20-byte IPv4 header, no payload
//! let mut inner = [0u8; 20];
//! inner[0] = 0x45;
//! let mut packet = Packet::from_bytes(&inner);
//! packet.meta.sa_index = index;
//! let handle = pool.insert(packet);
//!
//! let mut sink = VecFrameSink::new();
//! dispatcher.run(&mut EspEncrypt::new(), &mut worker, &mut pool, &[handle], &mut sink);
//! assert_eq!(sink.handles_for(NextStage::Ip4Lookup), vec![handle]);
//!
//! // Strip the outer header and feed the packet back in
//! pool.get_mut(handle).unwrap().pop_front(20)?;
//! let mut sink = VecFrameSink::new();
//! dispatcher.run(&mut EspDecrypt::new(), &mut worker, &mut pool, &[handle], &mut sink);
//! assert_eq!(sink.handles_for(NextStage::Ip4Input), vec![handle]);
//! assert_eq!(pool.get(handle).unwrap().current(), &inner[..]);
//! # Ok::<(), espflow_proto::ipsec::Error>(())
//! ```
//!
//! # References
//!
//! - [RFC 4303](https://datatracker.ietf.org/doc/html/rfc4303) - ESP Protocol
//! - [RFC 4106](https://datatracker.ietf.org/doc/html/rfc4106) - AES-GCM in ESP
//! - [RFC 3686](https://datatracker.ietf.org/doc/html/rfc3686) - AES-CTR in ESP
//!
//! # Security
//!
//! - No unsafe code
//! - Constant-time ICV comparison
//! - Keys zeroized on drop and redacted from `Debug` output

#![forbid(unsafe_code)]

pub mod config;
pub mod crypto;
pub mod decrypt;
pub mod dispatch;
pub mod encrypt;
pub mod error;
pub mod esp;
pub mod ip;
pub mod logging;
pub mod metrics;
pub mod packet;
pub mod replay;
pub mod sa;
pub mod sa_store;
pub mod worker;

// Re-export commonly used types
pub use config::{DataplaneConfig, SaParams};
pub use decrypt::{DecryptTrace, EspDecrypt};
pub use dispatch::{
    BatchSummary, Dispatcher, Frame, FrameSink, NextStage, PacketTransform, VecFrameSink,
};
pub use encrypt::{EncryptTrace, EspEncrypt};
pub use error::{Error, Result};
pub use packet::{Packet, PacketHandle, PacketPool};
pub use sa::{SaMode, SaStats, SecurityAssociation};
pub use sa_store::{SaStore, SaTable};
pub use worker::WorkerContext;
