//! Security Association state shared by every worker
//!
//! A [`SecurityAssociation`] splits into two halves:
//! - immutable parameters ([`SaParams`]) fixed at install or rekey time
//! - a few atomics touched on the packet path: the outbound sequence
//!   counter, the byte counter and the degraded flag
//!
//! Receive-side state (the anti-replay window) is not stored here. It lives
//! in the owning worker's [`SaContext`](crate::ipsec::worker::SaContext),
//! so concurrent decoders never race on it.

use super::{
    config::SaParams,
    crypto::{CryptoAlg, IntegAlg},
    Error, Result,
};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// SA encapsulation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SaMode {
    /// Tunnel mode with an IPv4 outer header
    Tunnel4 {
        /// Tunnel source
        src: Ipv4Addr,
        /// Tunnel destination
        dst: Ipv4Addr,
    },

    /// Tunnel mode with an IPv6 outer header
    Tunnel6 {
        /// Tunnel source
        src: Ipv6Addr,
        /// Tunnel destination
        dst: Ipv6Addr,
    },

    /// Transport mode (ESP inserted after the original IP header)
    Transport,
}

impl SaMode {
    /// Check if this is a tunnel mode
    pub fn is_tunnel(&self) -> bool {
        !matches!(self, SaMode::Transport)
    }
}

/// Point-in-time counters of one SA
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SaStats {
    /// Store slot
    pub index: u32,

    /// Install generation
    pub generation: u64,

    /// Security Parameters Index
    pub spi: u32,

    /// Last outbound sequence number handed out
    pub sequence: u64,

    /// Bytes processed, saturating
    pub bytes: u64,

    /// Outbound sequence space exhausted
    pub degraded: bool,
}

/// Installed Security Association
#[derive(Debug)]
pub struct SecurityAssociation {
    index: u32,
    generation: u64,
    params: SaParams,
    seq: AtomicU64,
    bytes: AtomicU64,
    degraded: AtomicBool,
}

impl SecurityAssociation {
    pub(crate) fn new(index: u32, generation: u64, params: SaParams) -> Self {
        let seq = AtomicU64::new(params.initial_seq);
        SecurityAssociation {
            index,
            generation,
            params,
            seq,
            bytes: AtomicU64::new(0),
            degraded: AtomicBool::new(false),
        }
    }

    /// Store slot
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Install generation; never repeats for the lifetime of the store
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// SA parameters
    pub fn params(&self) -> &SaParams {
        &self.params
    }

    /// Security Parameters Index
    pub fn spi(&self) -> u32 {
        self.params.spi
    }

    /// Encapsulation mode
    pub fn mode(&self) -> SaMode {
        self.params.mode
    }

    /// Encryption algorithm
    pub fn crypto_alg(&self) -> CryptoAlg {
        self.params.crypto_alg
    }

    /// Integrity algorithm
    pub fn integ_alg(&self) -> IntegAlg {
        self.params.integ_alg
    }

    /// Extended sequence numbers enabled
    pub fn use_esn(&self) -> bool {
        self.params.use_esn
    }

    /// Anti-replay enforcement enabled
    pub fn use_anti_replay(&self) -> bool {
        self.params.use_anti_replay
    }

    /// Worker owning the receive-side state
    pub fn owner_worker(&self) -> usize {
        self.params.owner_worker
    }

    /// Allocate the next outbound sequence number
    ///
    /// Without ESN the counter stops at `u32::MAX`; with ESN at `u64::MAX`.
    /// Once exhausted the SA is flagged degraded and every further call
    /// fails without touching the counter, until the SA is rekeyed.
    ///
    /// # Errors
    ///
    /// Returns `SequenceExhausted` carrying the SPI
    pub fn next_sequence(&self) -> Result<u64> {
        let limit = if self.params.use_esn {
            u64::MAX
        } else {
            u32::MAX as u64
        };

        match self
            .seq
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |seq| {
                (seq < limit).then(|| seq + 1)
            }) {
            Ok(prev) => Ok(prev + 1),
            Err(_) => {
                self.degraded.store(true, Ordering::Release);
                Err(Error::SequenceExhausted(self.params.spi))
            }
        }
    }

    /// Last sequence number handed out (the initial value before any)
    pub fn sequence(&self) -> u64 {
        self.seq.load(Ordering::Acquire)
    }

    /// Account `n` processed bytes
    pub fn add_bytes(&self, n: usize) {
        let _ = self
            .bytes
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |b| {
                Some(b.saturating_add(n as u64))
            });
    }

    /// Bytes processed so far
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Check whether the outbound sequence space ran out
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> SaStats {
        SaStats {
            index: self.index,
            generation: self.generation,
            spi: self.params.spi,
            sequence: self.sequence(),
            bytes: self.bytes(),
            degraded: self.is_degraded(),
        }
    }
}
