//! Node counters for the ESP dataplane
//!
//! [`EspMetrics`] receives the per-batch counter deltas the dispatcher
//! reports through [`CounterSink`] and keeps running totals in atomics, so
//! one instance can be shared by every worker.
//!
//! # Example
//!
//! ```
//! use espflow_platform::CounterSink;
//! use espflow_proto::ipsec::metrics::EspMetrics;
//!
//! let metrics = EspMetrics::new();
//!
//! metrics.increment("esp-decrypt", "received", 4);
//! metrics.increment("esp-decrypt", "replay", 1);
//!
//! let snapshot = metrics.snapshot();
//! assert_eq!(snapshot.decrypt_received, 4);
//! assert_eq!(snapshot.replay_detected, 1);
//! ```

use espflow_platform::CounterSink;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Node id of the encoder
pub const ENCRYPT_NODE: &str = "esp-encrypt";

/// Node id of the decoder
pub const DECRYPT_NODE: &str = "esp-decrypt";

/// ESP node counters
///
/// Clones share the same counters.
#[derive(Debug, Clone)]
pub struct EspMetrics {
    /// Packets entering the encoder
    pub encrypt_received: Arc<AtomicU64>,

    /// Packets dropped because the SA ran out of sequence numbers
    pub sequence_exhausted: Arc<AtomicU64>,

    /// Encoder drops for lack of buffer space
    pub encrypt_length_error: Arc<AtomicU64>,

    /// Encoder drops for a non-IP inner packet
    pub encrypt_not_ip: Arc<AtomicU64>,

    /// Packets entering the decoder
    pub decrypt_received: Arc<AtomicU64>,

    /// Decoder drops for an unusable inner protocol
    pub decrypt_failed: Arc<AtomicU64>,

    /// ICV or AEAD tag mismatches
    pub integrity_failed: Arc<AtomicU64>,

    /// Replayed or too-old sequence numbers
    pub replay_detected: Arc<AtomicU64>,

    /// Invalid pad length in the trailer
    pub trailer_error: Arc<AtomicU64>,

    /// Ciphertext not a whole number of blocks, or truncated packet
    pub decrypt_length_error: Arc<AtomicU64>,

    /// Transport-mode packet without a usable IP header
    pub decrypt_not_ip: Arc<AtomicU64>,

    /// Packets dropped for any other reason (unknown SA, missing handle)
    pub dropped: Arc<AtomicU64>,

    /// Frames handed to next stages
    pub frames_flushed: Arc<AtomicU64>,

    /// Counter names this sink does not know
    pub unrecognized: Arc<AtomicU64>,
}

impl EspMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self {
            encrypt_received: Arc::new(AtomicU64::new(0)),
            sequence_exhausted: Arc::new(AtomicU64::new(0)),
            encrypt_length_error: Arc::new(AtomicU64::new(0)),
            encrypt_not_ip: Arc::new(AtomicU64::new(0)),
            decrypt_received: Arc::new(AtomicU64::new(0)),
            decrypt_failed: Arc::new(AtomicU64::new(0)),
            integrity_failed: Arc::new(AtomicU64::new(0)),
            replay_detected: Arc::new(AtomicU64::new(0)),
            trailer_error: Arc::new(AtomicU64::new(0)),
            decrypt_length_error: Arc::new(AtomicU64::new(0)),
            decrypt_not_ip: Arc::new(AtomicU64::new(0)),
            dropped: Arc::new(AtomicU64::new(0)),
            frames_flushed: Arc::new(AtomicU64::new(0)),
            unrecognized: Arc::new(AtomicU64::new(0)),
        }
    }

    fn counter(&self, node: &str, counter: &str) -> &AtomicU64 {
        match (node, counter) {
            (ENCRYPT_NODE, "received") => &self.encrypt_received,
            (ENCRYPT_NODE, "sequence-exhausted") => &self.sequence_exhausted,
            (ENCRYPT_NODE, "length-error") => &self.encrypt_length_error,
            (ENCRYPT_NODE, "not-ip") => &self.encrypt_not_ip,
            (DECRYPT_NODE, "received") => &self.decrypt_received,
            (DECRYPT_NODE, "decrypt-failed") => &self.decrypt_failed,
            (DECRYPT_NODE, "integrity-failed") => &self.integrity_failed,
            (DECRYPT_NODE, "replay") => &self.replay_detected,
            (DECRYPT_NODE, "trailer-error") => &self.trailer_error,
            (DECRYPT_NODE, "length-error") => &self.decrypt_length_error,
            (DECRYPT_NODE, "not-ip") => &self.decrypt_not_ip,
            (_, "drop") => &self.dropped,
            (_, "frames-flushed") => &self.frames_flushed,
            _ => &self.unrecognized,
        }
    }

    /// Get current metrics snapshot
    ///
    /// Values may be slightly inconsistent across counters due to
    /// concurrent updates.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            encrypt_received: self.encrypt_received.load(Ordering::Relaxed),
            sequence_exhausted: self.sequence_exhausted.load(Ordering::Relaxed),
            encrypt_length_error: self.encrypt_length_error.load(Ordering::Relaxed),
            encrypt_not_ip: self.encrypt_not_ip.load(Ordering::Relaxed),
            decrypt_received: self.decrypt_received.load(Ordering::Relaxed),
            decrypt_failed: self.decrypt_failed.load(Ordering::Relaxed),
            integrity_failed: self.integrity_failed.load(Ordering::Relaxed),
            replay_detected: self.replay_detected.load(Ordering::Relaxed),
            trailer_error: self.trailer_error.load(Ordering::Relaxed),
            decrypt_length_error: self.decrypt_length_error.load(Ordering::Relaxed),
            decrypt_not_ip: self.decrypt_not_ip.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            frames_flushed: self.frames_flushed.load(Ordering::Relaxed),
            unrecognized: self.unrecognized.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters to zero
    pub fn reset(&self) {
        for counter in [
            &self.encrypt_received,
            &self.sequence_exhausted,
            &self.encrypt_length_error,
            &self.encrypt_not_ip,
            &self.decrypt_received,
            &self.decrypt_failed,
            &self.integrity_failed,
            &self.replay_detected,
            &self.trailer_error,
            &self.decrypt_length_error,
            &self.decrypt_not_ip,
            &self.dropped,
            &self.frames_flushed,
            &self.unrecognized,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for EspMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl CounterSink for EspMetrics {
    fn increment(&self, node: &str, counter: &str, n: u64) {
        self.counter(node, counter).fetch_add(n, Ordering::Relaxed);
    }
}

/// Point-in-time snapshot of the ESP node counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MetricsSnapshot {
    /// Packets entering the encoder
    pub encrypt_received: u64,
    /// Sequence exhaustion drops
    pub sequence_exhausted: u64,
    /// Encoder buffer-space drops
    pub encrypt_length_error: u64,
    /// Encoder non-IP drops
    pub encrypt_not_ip: u64,
    /// Packets entering the decoder
    pub decrypt_received: u64,
    /// Unusable inner protocol
    pub decrypt_failed: u64,
    /// ICV or tag mismatches
    pub integrity_failed: u64,
    /// Replay drops
    pub replay_detected: u64,
    /// Bad trailers
    pub trailer_error: u64,
    /// Decoder length drops
    pub decrypt_length_error: u64,
    /// Decoder non-IP drops
    pub decrypt_not_ip: u64,
    /// Other drops
    pub dropped: u64,
    /// Frames flushed
    pub frames_flushed: u64,
    /// Unknown counter names
    pub unrecognized: u64,
}

impl MetricsSnapshot {
    /// Packets the decoder dropped, all reasons
    pub fn decrypt_drops(&self) -> u64 {
        self.decrypt_failed
            + self.integrity_failed
            + self.replay_detected
            + self.trailer_error
            + self.decrypt_length_error
            + self.decrypt_not_ip
    }

    /// Share of decoder input that was dropped (0.0 to 1.0)
    pub fn decrypt_drop_rate(&self) -> f64 {
        if self.decrypt_received == 0 {
            return 0.0;
        }
        self.decrypt_drops() as f64 / self.decrypt_received as f64
    }
}
