//! ESP decoder node
//!
//! Verifies and decrypts an ESP packet whose current window starts at the
//! ESP header, and hands the recovered inner packet to IP input.
//!
//! Processing order per packet:
//!
//! 1. Hand off to the owning worker if this worker does not own the SA
//! 2. Anti-replay check (no state change)
//! 3. ICV verification over ESP header, IV and ciphertext
//! 4. Anti-replay advance (after the AEAD tag check for GCM)
//! 5. Block alignment check and decryption
//! 6. Trailer validation, padding removal
//! 7. Tunnel: dispatch on next header. Transport: restore the IP header
//!
//! A packet failing any step is dropped and leaves the replay window as it
//! was.

use super::{
    crypto::{CryptoAlg, IntegAlg},
    esp::{self, EspHeader, EspTrailer, ESP_HEADER_LEN},
    ip::{v4, v6, IpVersion, IPV4_HEADER_LEN, IPV6_HEADER_LEN, IP_PROTOCOL_IPV6, IP_PROTOCOL_IP_IN_IP},
    logging,
    metrics::DECRYPT_NODE,
    packet::Packet,
    sa::SecurityAssociation,
    worker::{Resolved, SaContext, WorkerContext},
    Error, NextStage, PacketTransform, Result,
};
use espflow_platform::{DataplaneModule, NullTraceSink, TraceSink};
use std::sync::Arc;

/// Longest explicit IV of any supported algorithm
const MAX_IV_LEN: usize = 16;

/// Trace record for a decoded (or dropped) packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecryptTrace {
    /// SPI from the ESP header
    pub spi: u32,
    /// Sequence number from the ESP header
    pub seq: u32,
    /// Encryption algorithm
    pub crypto: CryptoAlg,
    /// Integrity algorithm
    pub integ: IntegAlg,
}

/// ESP decoder
pub struct EspDecrypt {
    trace: Arc<dyn TraceSink<DecryptTrace>>,
}

impl Default for EspDecrypt {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EspDecrypt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EspDecrypt").finish_non_exhaustive()
    }
}

impl EspDecrypt {
    /// Create decoder that discards trace records
    pub fn new() -> Self {
        Self::with_trace_sink(Arc::new(NullTraceSink))
    }

    /// Create decoder reporting traced packets to `trace`
    pub fn with_trace_sink(trace: Arc<dyn TraceSink<DecryptTrace>>) -> Self {
        EspDecrypt { trace }
    }
}

impl DataplaneModule for EspDecrypt {
    fn id(&self) -> &'static str {
        DECRYPT_NODE
    }

    fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    fn description(&self) -> &'static str {
        "ESP decapsulation (RFC 4303)"
    }
}

impl PacketTransform for EspDecrypt {
    fn process(&mut self, worker: &mut WorkerContext, packet: &mut Packet) -> Result<NextStage> {
        let index = packet.meta.sa_index;
        let owner = worker
            .sa(index)
            .ok_or(Error::SaNotFound(index))?
            .owner_worker();
        if owner != worker.id() {
            return Ok(NextStage::Handoff(owner));
        }

        packet.linearize();
        let header = EspHeader::read(packet.current())?;

        let Resolved { sa, ctx, .. } = worker.resolve(index)?;
        let result = decapsulate(sa, ctx, header, packet);

        if packet.meta.traced {
            self.trace.record(DecryptTrace {
                spi: header.spi,
                seq: header.seq,
                crypto: sa.crypto_alg(),
                integ: sa.integ_alg(),
            });
        }
        result
    }
}

fn decapsulate(
    sa: &SecurityAssociation,
    ctx: &mut SaContext,
    header: EspHeader,
    packet: &mut Packet,
) -> Result<NextStage> {
    let esp_start = packet.offset();
    let alg = sa.crypto_alg();
    let iv_len = alg.iv_size();
    let tag_len = alg.tag_len();
    let block_size = alg.block_size();
    let icv_len = ctx.integ.icv_len();

    let overhead = ESP_HEADER_LEN + iv_len + tag_len + icv_len;
    if packet.len() < overhead {
        return Err(Error::BufferTooShort {
            required: overhead,
            available: packet.len(),
        });
    }

    let seq = if sa.use_esn() {
        ctx.replay
            .infer_esn(header.seq)
            .ok_or(Error::Replay(header.seq as u64))?
    } else {
        header.seq as u64
    };

    if sa.use_anti_replay() && !ctx.replay.check(seq) {
        logging::log_replay_detected(sa.spi(), seq);
        return Err(Error::Replay(seq));
    }

    let seq_hi = sa.use_esn().then_some((seq >> 32) as u32);

    if icv_len > 0 {
        let (covered, icv) = packet.current().split_at(packet.len() - icv_len);
        if !ctx.integ.verify(covered, seq_hi, icv) {
            logging::log_integrity_failure(sa.spi(), seq);
            return Err(Error::Integrity);
        }
        packet.shrink_tail(icv_len)?;
    }

    if !alg.is_aead() {
        ctx.replay.advance(seq);
    }

    let mut iv = [0u8; MAX_IV_LEN];
    iv[..iv_len].copy_from_slice(&packet.current()[ESP_HEADER_LEN..ESP_HEADER_LEN + iv_len]);
    packet.pop_front(ESP_HEADER_LEN + iv_len)?;

    let ct_len = packet.len() - tag_len;
    if ct_len % block_size != 0 {
        return Err(Error::Length {
            len: ct_len,
            block_size,
        });
    }

    let (aad, aad_len) = esp::aead_aad(header.spi, seq, sa.use_esn());
    let (ciphertext, tag) = packet.current_mut().split_at_mut(ct_len);
    ctx.cipher
        .decrypt(&iv[..iv_len], &aad[..aad_len], ciphertext, tag)
        .map_err(|e| {
            if e == Error::Integrity {
                logging::log_integrity_failure(sa.spi(), seq);
            }
            e
        })?;
    packet.shrink_tail(tag_len)?;

    if alg.is_aead() {
        ctx.replay.advance(seq);
    }

    let trailer = EspTrailer::read(packet.current(), block_size)?;
    packet.shrink_tail(trailer.strip_len())?;

    let stage = if sa.mode().is_tunnel() {
        match trailer.next_header {
            IP_PROTOCOL_IP_IN_IP => NextStage::Ip4Input,
            IP_PROTOCOL_IPV6 => NextStage::Ip6Input,
            other => return Err(Error::DecryptionFailed(other)),
        }
    } else {
        restore_ip_header(packet, esp_start, trailer.next_header)?
    };

    sa.add_bytes(packet.len());
    packet.meta.tx_if = None;
    logging::log_esp_packet("decrypt", sa.spi(), seq, packet.len());
    logging::log_packet_hexdump(DECRYPT_NODE, packet.current());

    if packet.meta.ipsec_gre {
        return Ok(NextStage::IpsecGreInput);
    }
    Ok(stage)
}

/// Move the transport-mode IP header up against the decrypted payload and
/// fix its protocol and length fields
fn restore_ip_header(packet: &mut Packet, esp_start: usize, next_header: u8) -> Result<NextStage> {
    let l3 = packet
        .meta
        .l3_offset
        .filter(|&offset| offset < esp_start)
        .ok_or(Error::NotIp(0))?;
    let hdr = &packet.buffer()[l3..esp_start];
    let hdr_len = hdr.len();

    let version = IpVersion::of(hdr[0]).ok_or(Error::NotIp(hdr[0]))?;
    let valid = match version {
        IpVersion::V4 => hdr_len >= IPV4_HEADER_LEN && v4::header_len(hdr) == hdr_len,
        IpVersion::V6 => hdr_len == IPV6_HEADER_LEN,
    };
    if !valid {
        return Err(Error::NotIp(hdr[0]));
    }

    let payload_start = packet.offset();
    packet
        .buffer_mut()
        .copy_within(l3..esp_start, payload_start - hdr_len);
    packet.push_front(hdr_len)?;

    let total = packet.len();
    let too_long = |_| Error::Length {
        len: total,
        block_size: 1,
    };
    let hdr = &mut packet.current_mut()[..hdr_len];
    match version {
        IpVersion::V4 => {
            v4::set_protocol(hdr, next_header);
            // Fragment id, flags and offset
            hdr[4..8].fill(0);
            v4::finalize(hdr, u16::try_from(total).map_err(too_long)?);
            packet.meta.l3_offset = Some(packet.offset());
            Ok(NextStage::Ip4Input)
        }
        IpVersion::V6 => {
            v6::set_next_header(hdr, next_header);
            v6::set_payload_len(
                hdr,
                u16::try_from(total - IPV6_HEADER_LEN).map_err(too_long)?,
            );
            packet.meta.l3_offset = Some(packet.offset());
            Ok(NextStage::Ip6Input)
        }
    }
}
