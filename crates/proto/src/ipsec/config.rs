//! Dataplane and SA configuration
//!
//! Provides configuration structures and builder patterns for the ESP
//! dataplane ([`DataplaneConfig`]) and for the parameters of one Security
//! Association handed to the SA store ([`SaParams`]).

use super::{
    crypto::{CryptoAlg, IntegAlg, SALT_LEN},
    dispatch::DEFAULT_FRAME_CAPACITY,
    packet::{DEFAULT_HEADROOM, DEFAULT_TAILROOM},
    replay::{DEFAULT_WINDOW_SIZE, MAX_WINDOW_SIZE, MIN_WINDOW_SIZE},
    sa::SaMode,
    Error, Result,
};
use std::net::{Ipv4Addr, Ipv6Addr};
use zeroize::Zeroizing;

/// Default number of SA slots
pub const DEFAULT_SA_CAPACITY: usize = 1024;

/// Largest frame the dispatcher will build
pub const MAX_FRAME_CAPACITY: usize = 1024;

/// Smallest headroom that fits an IPv6 outer header, ESP header, IV and
/// link-layer header
pub const MIN_HEADROOM: usize = 64;

/// Dataplane configuration
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DataplaneConfig {
    /// Number of dataplane workers
    pub workers: usize,

    /// Packet handles per output frame
    pub frame_capacity: usize,

    /// Number of SA slots in the store
    pub sa_capacity: usize,

    /// Headroom reserved in front of each packet
    pub headroom: usize,

    /// Tailroom reserved after each packet
    pub tailroom: usize,
}

impl Default for DataplaneConfig {
    fn default() -> Self {
        DataplaneConfig {
            workers: 1,
            frame_capacity: DEFAULT_FRAME_CAPACITY,
            sa_capacity: DEFAULT_SA_CAPACITY,
            headroom: DEFAULT_HEADROOM,
            tailroom: DEFAULT_TAILROOM,
        }
    }
}

impl DataplaneConfig {
    /// Create builder for dataplane configuration
    pub fn builder() -> DataplaneConfigBuilder {
        DataplaneConfigBuilder::new()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::InvalidParameter(
                "At least one worker required".into(),
            ));
        }
        if self.frame_capacity == 0 || self.frame_capacity > MAX_FRAME_CAPACITY {
            return Err(Error::InvalidParameter(format!(
                "frame_capacity must be between 1 and {}",
                MAX_FRAME_CAPACITY
            )));
        }
        if self.sa_capacity == 0 || self.sa_capacity > u32::MAX as usize {
            return Err(Error::InvalidParameter(
                "sa_capacity must be non-zero and fit in 32 bits".into(),
            ));
        }
        if self.headroom < MIN_HEADROOM {
            return Err(Error::InvalidParameter(format!(
                "headroom must be at least {} bytes",
                MIN_HEADROOM
            )));
        }
        Ok(())
    }
}

/// Builder for DataplaneConfig
#[derive(Default)]
pub struct DataplaneConfigBuilder {
    workers: Option<usize>,
    frame_capacity: Option<usize>,
    sa_capacity: Option<usize>,
    headroom: Option<usize>,
    tailroom: Option<usize>,
}

impl DataplaneConfigBuilder {
    /// Create new dataplane builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set worker count
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Set frame capacity
    pub fn with_frame_capacity(mut self, capacity: usize) -> Self {
        self.frame_capacity = Some(capacity);
        self
    }

    /// Set SA store capacity
    pub fn with_sa_capacity(mut self, capacity: usize) -> Self {
        self.sa_capacity = Some(capacity);
        self
    }

    /// Set packet headroom
    pub fn with_headroom(mut self, headroom: usize) -> Self {
        self.headroom = Some(headroom);
        self
    }

    /// Set packet tailroom
    pub fn with_tailroom(mut self, tailroom: usize) -> Self {
        self.tailroom = Some(tailroom);
        self
    }

    /// Build DataplaneConfig with validation
    pub fn build(self) -> Result<DataplaneConfig> {
        let defaults = DataplaneConfig::default();
        let config = DataplaneConfig {
            workers: self.workers.unwrap_or(defaults.workers),
            frame_capacity: self.frame_capacity.unwrap_or(defaults.frame_capacity),
            sa_capacity: self.sa_capacity.unwrap_or(defaults.sa_capacity),
            headroom: self.headroom.unwrap_or(defaults.headroom),
            tailroom: self.tailroom.unwrap_or(defaults.tailroom),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Parameters of one Security Association
///
/// Immutable once installed. A rekey installs a fresh set.
#[derive(Clone)]
pub struct SaParams {
    /// Security Parameters Index
    pub spi: u32,

    /// Encryption algorithm
    pub crypto_alg: CryptoAlg,

    /// Encryption key
    pub crypto_key: Zeroizing<Vec<u8>>,

    /// Integrity algorithm
    pub integ_alg: IntegAlg,

    /// Integrity key
    pub integ_key: Zeroizing<Vec<u8>>,

    /// Nonce salt for CTR and GCM
    pub salt: Option<[u8; SALT_LEN]>,

    /// Tunnel or transport mode
    pub mode: SaMode,

    /// Enforce the anti-replay window on receive
    pub use_anti_replay: bool,

    /// Extended (64-bit) sequence numbers
    pub use_esn: bool,

    /// Anti-replay window size in packets
    pub replay_window: u32,

    /// Worker that owns the receive-side state of this SA
    pub owner_worker: usize,

    /// Last sequence number already used (0 for a fresh SA)
    pub initial_seq: u64,
}

impl std::fmt::Debug for SaParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaParams")
            .field("spi", &format_args!("0x{:08x}", self.spi))
            .field("crypto_alg", &self.crypto_alg)
            .field("crypto_key", &"<redacted>")
            .field("integ_alg", &self.integ_alg)
            .field("integ_key", &"<redacted>")
            .field("salt", &self.salt.map(|_| "<redacted>"))
            .field("mode", &self.mode)
            .field("use_anti_replay", &self.use_anti_replay)
            .field("use_esn", &self.use_esn)
            .field("replay_window", &self.replay_window)
            .field("owner_worker", &self.owner_worker)
            .finish()
    }
}

impl SaParams {
    /// Create builder for SA parameters
    pub fn builder() -> SaParamsBuilder {
        SaParamsBuilder::new()
    }

    /// Validate parameters
    pub fn validate(&self) -> Result<()> {
        if self.crypto_key.len() != self.crypto_alg.key_len() {
            return Err(Error::InvalidKeyLength {
                expected: self.crypto_alg.key_len(),
                actual: self.crypto_key.len(),
            });
        }
        if self.integ_key.len() != self.integ_alg.key_len() {
            return Err(Error::InvalidKeyLength {
                expected: self.integ_alg.key_len(),
                actual: self.integ_key.len(),
            });
        }
        if self.crypto_alg.needs_salt() != self.salt.is_some() {
            return Err(Error::InvalidParameter(format!(
                "salt is required for CTR and GCM only (algorithm: {})",
                self.crypto_alg
            )));
        }
        if self.crypto_alg.is_aead() && self.integ_alg != IntegAlg::None {
            return Err(Error::InvalidParameter(
                "AEAD algorithms carry their own ICV".into(),
            ));
        }
        if self.crypto_alg == CryptoAlg::None && self.integ_alg == IntegAlg::None {
            return Err(Error::InvalidParameter(
                "SA must provide confidentiality or integrity".into(),
            ));
        }
        if !(MIN_WINDOW_SIZE..=MAX_WINDOW_SIZE).contains(&self.replay_window) {
            return Err(Error::InvalidParameter(format!(
                "replay_window must be between {} and {}",
                MIN_WINDOW_SIZE, MAX_WINDOW_SIZE
            )));
        }
        if !self.use_esn && self.initial_seq > u32::MAX as u64 {
            return Err(Error::InvalidParameter(
                "initial_seq exceeds 32 bits without ESN".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for SaParams
pub struct SaParamsBuilder {
    spi: Option<u32>,
    crypto: Option<(CryptoAlg, Vec<u8>)>,
    integ: Option<(IntegAlg, Vec<u8>)>,
    salt: Option<[u8; SALT_LEN]>,
    mode: Option<SaMode>,
    use_anti_replay: bool,
    use_esn: bool,
    replay_window: u32,
    owner_worker: usize,
    initial_seq: u64,
}

impl Default for SaParamsBuilder {
    fn default() -> Self {
        SaParamsBuilder {
            spi: None,
            crypto: None,
            integ: None,
            salt: None,
            mode: None,
            use_anti_replay: true,
            use_esn: false,
            replay_window: DEFAULT_WINDOW_SIZE,
            owner_worker: 0,
            initial_seq: 0,
        }
    }
}

impl SaParamsBuilder {
    /// Create new SA builder (anti-replay on, ESN off)
    pub fn new() -> Self {
        Self::default()
    }

    /// Set SPI
    pub fn with_spi(mut self, spi: u32) -> Self {
        self.spi = Some(spi);
        self
    }

    /// Set encryption algorithm and key
    pub fn with_crypto(mut self, alg: CryptoAlg, key: impl Into<Vec<u8>>) -> Self {
        self.crypto = Some((alg, key.into()));
        self
    }

    /// Set integrity algorithm and key
    pub fn with_integ(mut self, alg: IntegAlg, key: impl Into<Vec<u8>>) -> Self {
        self.integ = Some((alg, key.into()));
        self
    }

    /// Set CTR/GCM nonce salt
    pub fn with_salt(mut self, salt: [u8; SALT_LEN]) -> Self {
        self.salt = Some(salt);
        self
    }

    /// IPv4 tunnel mode between `src` and `dst`
    pub fn with_tunnel_v4(mut self, src: Ipv4Addr, dst: Ipv4Addr) -> Self {
        self.mode = Some(SaMode::Tunnel4 { src, dst });
        self
    }

    /// IPv6 tunnel mode between `src` and `dst`
    pub fn with_tunnel_v6(mut self, src: Ipv6Addr, dst: Ipv6Addr) -> Self {
        self.mode = Some(SaMode::Tunnel6 { src, dst });
        self
    }

    /// Transport mode
    pub fn with_transport(mut self) -> Self {
        self.mode = Some(SaMode::Transport);
        self
    }

    /// Enable or disable anti-replay enforcement
    pub fn with_anti_replay(mut self, enabled: bool) -> Self {
        self.use_anti_replay = enabled;
        self
    }

    /// Enable or disable extended sequence numbers
    pub fn with_esn(mut self, enabled: bool) -> Self {
        self.use_esn = enabled;
        self
    }

    /// Set anti-replay window size
    pub fn with_replay_window(mut self, size: u32) -> Self {
        self.replay_window = size;
        self
    }

    /// Set the worker owning receive-side state
    pub fn with_owner_worker(mut self, worker: usize) -> Self {
        self.owner_worker = worker;
        self
    }

    /// Resume from a sequence number already consumed elsewhere
    pub fn with_initial_sequence(mut self, seq: u64) -> Self {
        self.initial_seq = seq;
        self
    }

    /// Build SaParams with validation
    pub fn build(self) -> Result<SaParams> {
        let (crypto_alg, crypto_key) = self.crypto.unwrap_or((CryptoAlg::None, Vec::new()));
        let (integ_alg, integ_key) = self.integ.unwrap_or((IntegAlg::None, Vec::new()));

        let params = SaParams {
            spi: self
                .spi
                .ok_or_else(|| Error::InvalidParameter("spi is required".into()))?,
            crypto_alg,
            crypto_key: Zeroizing::new(crypto_key),
            integ_alg,
            integ_key: Zeroizing::new(integ_key),
            salt: self.salt,
            mode: self
                .mode
                .ok_or_else(|| Error::InvalidParameter("mode is required".into()))?,
            use_anti_replay: self.use_anti_replay,
            use_esn: self.use_esn,
            replay_window: self.replay_window,
            owner_worker: self.owner_worker,
            initial_seq: self.initial_seq,
        };

        params.validate()?;
        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_builder() -> SaParamsBuilder {
        SaParams::builder()
            .with_spi(0x1000)
            .with_crypto(CryptoAlg::AesCbc128, vec![1u8; 16])
            .with_integ(IntegAlg::HmacSha1_96, vec![2u8; 20])
            .with_tunnel_v4(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2))
    }

    #[test]
    fn test_dataplane_defaults() {
        let config = DataplaneConfig::builder().build().unwrap();
        assert_eq!(config.workers, 1);
        assert_eq!(config.frame_capacity, 256);
        assert_eq!(config.headroom, 128);
    }

    #[test]
    fn test_dataplane_validation() {
        assert!(DataplaneConfig::builder().with_workers(0).build().is_err());
        assert!(DataplaneConfig::builder()
            .with_frame_capacity(0)
            .build()
            .is_err());
        assert!(DataplaneConfig::builder()
            .with_frame_capacity(MAX_FRAME_CAPACITY + 1)
            .build()
            .is_err());
        assert!(DataplaneConfig::builder().with_headroom(32).build().is_err());
        assert!(DataplaneConfig::builder()
            .with_workers(4)
            .with_sa_capacity(16)
            .build()
            .is_ok());
    }

    #[test]
    fn test_sa_params_build() {
        let params = create_test_builder().build().unwrap();
        assert_eq!(params.spi, 0x1000);
        assert!(params.use_anti_replay);
        assert!(!params.use_esn);
        assert_eq!(params.replay_window, DEFAULT_WINDOW_SIZE);
        assert!(params.mode.is_tunnel());
    }

    #[test]
    fn test_sa_params_requires_spi_and_mode() {
        assert!(SaParams::builder()
            .with_crypto(CryptoAlg::AesCbc128, vec![0u8; 16])
            .with_transport()
            .build()
            .is_err());
        assert!(SaParams::builder()
            .with_spi(1)
            .with_crypto(CryptoAlg::AesCbc128, vec![0u8; 16])
            .build()
            .is_err());
    }

    #[test]
    fn test_sa_params_key_length() {
        let err = create_test_builder()
            .with_crypto(CryptoAlg::AesCbc256, vec![0u8; 16])
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            Error::InvalidKeyLength {
                expected: 32,
                actual: 16
            }
        );
    }

    #[test]
    fn test_sa_params_salt_iff_required() {
        // CTR without salt
        assert!(create_test_builder()
            .with_crypto(CryptoAlg::AesCtr128, vec![0u8; 16])
            .build()
            .is_err());
        // CBC with salt
        assert!(create_test_builder().with_salt([1, 2, 3, 4]).build().is_err());
        // CTR with salt
        assert!(create_test_builder()
            .with_crypto(CryptoAlg::AesCtr128, vec![0u8; 16])
            .with_salt([1, 2, 3, 4])
            .build()
            .is_ok());
    }

    #[test]
    fn test_sa_params_rejects_aead_with_integ() {
        assert!(create_test_builder()
            .with_crypto(CryptoAlg::AesGcm128, vec![0u8; 16])
            .with_salt([0; 4])
            .build()
            .is_err());
    }

    #[test]
    fn test_sa_params_rejects_null_null() {
        let result = SaParams::builder().with_spi(1).with_transport().build();
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn test_sa_params_window_range() {
        assert!(create_test_builder().with_replay_window(16).build().is_err());
        assert!(create_test_builder().with_replay_window(32).build().is_ok());
    }

    #[test]
    fn test_initial_sequence_limited_without_esn() {
        assert!(create_test_builder()
            .with_initial_sequence(u32::MAX as u64 + 1)
            .build()
            .is_err());
        assert!(create_test_builder()
            .with_esn(true)
            .with_initial_sequence(u32::MAX as u64 + 1)
            .build()
            .is_ok());
    }

    #[test]
    fn test_sa_params_debug_redacts_keys() {
        let debug = format!("{:?}", create_test_builder().build().unwrap());
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("[1, 1, 1"));
    }
}
