//! Structured logging for the ESP dataplane
//!
//! Thin wrappers over `tracing` so every module logs the same events with
//! the same field names.
//!
//! # Log Levels
//!
//! - **TRACE**: Packet hexdumps, frame flushes
//! - **DEBUG**: Per-packet ESP processing
//! - **INFO**: SA install, rekey, delete, reclaim
//! - **WARN**: Replay and integrity drops, sequence exhaustion
//!
//! # Example
//!
//! ```no_run
//! use espflow_proto::ipsec::logging;
//!
//! tracing_subscriber::fmt()
//!     .with_env_filter("espflow_proto::ipsec=debug")
//!     .init();
//!
//! logging::log_esp_packet("encrypt", 0x1000, 1, 40);
//! ```

use super::config::SaParams;
use tracing::{debug, info, trace, warn};

/// Log ESP packet processing
///
/// # Arguments
///
/// * `operation` - "encrypt" or "decrypt"
/// * `spi` - ESP Security Parameter Index
/// * `seq` - Sequence number (full 64-bit value)
/// * `len` - Packet length after the transform
pub fn log_esp_packet(operation: &str, spi: u32, seq: u64, len: usize) {
    debug!(
        operation = operation,
        spi = %format_args!("0x{:08x}", spi),
        seq_num = seq,
        len = len,
        "ESP packet processed"
    );
}

/// Log replay detection
pub fn log_replay_detected(spi: u32, seq: u64) {
    warn!(
        spi = %format_args!("0x{:08x}", spi),
        seq_num = seq,
        "Replay detected - packet dropped"
    );
}

/// Log ICV or AEAD tag mismatch
pub fn log_integrity_failure(spi: u32, seq: u64) {
    warn!(
        spi = %format_args!("0x{:08x}", spi),
        seq_num = seq,
        "Integrity check failed - packet dropped"
    );
}

/// Log outbound sequence exhaustion
pub fn log_sequence_exhausted(spi: u32) {
    warn!(
        spi = %format_args!("0x{:08x}", spi),
        "Sequence number space exhausted - SA needs rekey"
    );
}

/// Log SA installation
///
/// # Arguments
///
/// * `index` - Store slot
/// * `params` - Installed parameters (keys are never logged)
pub fn log_sa_installed(index: u32, params: &SaParams) {
    info!(
        sa_index = index,
        spi = %format_args!("0x{:08x}", params.spi),
        crypto = %params.crypto_alg,
        integ = %params.integ_alg,
        tunnel = params.mode.is_tunnel(),
        esn = params.use_esn,
        "SA installed"
    );
}

/// Log SA rekey
pub fn log_sa_rekeyed(index: u32, spi: u32, generation: u64) {
    info!(
        sa_index = index,
        spi = %format_args!("0x{:08x}", spi),
        generation = generation,
        "SA rekeyed"
    );
}

/// Log SA deletion
///
/// # Arguments
///
/// * `index` - Store slot
/// * `spi` - SPI of the removed SA
/// * `version` - Table version that no longer contains it
pub fn log_sa_deleted(index: u32, spi: u32, version: u64) {
    info!(
        sa_index = index,
        spi = %format_args!("0x{:08x}", spi),
        version = version,
        "SA deleted, slot pending reclamation"
    );
}

/// Log slot reclamation
pub fn log_sa_reclaimed(count: usize, version: u64) {
    info!(slots = count, quiescent_version = version, "SA slots reclaimed");
}

/// Log a frame handed to the next stage
pub fn log_frame_flush(node: &str, stage: &str, packets: usize) {
    trace!(
        node = node,
        next = stage,
        packets = packets,
        "Frame flushed"
    );
}

/// Log packet contents at trace level
pub fn log_packet_hexdump(node: &str, data: &[u8]) {
    trace!(
        node = node,
        len = data.len(),
        data = %hex::encode(data),
        "Packet contents"
    );
}
