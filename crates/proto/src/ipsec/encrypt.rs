//! ESP encoder node
//!
//! Turns a plaintext IP packet into an ESP packet for the SA bound in
//! `packet.meta.sa_index`.
//!
//! # Tunnel mode
//!
//! ```text
//! before:                 [ inner IP packet ]
//! after:  [ outer IP | ESP | IV | inner IP packet | pad | pl | nh | ICV ]
//! ```
//!
//! # Transport mode
//!
//! ```text
//! before:       [ IP | payload ]
//! after:  [ IP | ESP | IV | payload | pad | pl | nh | ICV ]
//! ```
//!
//! The IP header is moved forward into the headroom, so the payload is never
//! copied. When the egress interface is already known the link-layer header
//! in front of the IP header moves with it and the packet goes straight to
//! interface output.

use super::{
    crypto::{CryptoAlg, IntegAlg},
    esp::{self, EspHeader, ESP_HEADER_LEN, ESP_TRAILER_LEN},
    ip::{self, v4, v6, IpVersion, IPV4_HEADER_LEN, IPV6_HEADER_LEN, IP_PROTOCOL_ESP},
    logging,
    metrics::ENCRYPT_NODE,
    packet::{Packet, ETHERNET_HEADER_LEN},
    sa::{SaMode, SecurityAssociation},
    worker::{Resolved, SaContext, WorkerContext},
    NextStage, PacketTransform, Error, Result,
};
use espflow_platform::{DataplaneModule, NullTraceSink, TraceSink};
use rand::rngs::StdRng;
use std::sync::Arc;

/// Trace record for an encoded packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptTrace {
    /// SPI of the SA
    pub spi: u32,
    /// Sequence number allocated to this packet, 0 if none was
    pub seq: u64,
    /// Encryption algorithm
    pub crypto: CryptoAlg,
    /// Integrity algorithm
    pub integ: IntegAlg,
}

/// ESP encoder
pub struct EspEncrypt {
    trace: Arc<dyn TraceSink<EncryptTrace>>,
}

impl Default for EspEncrypt {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EspEncrypt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EspEncrypt").finish_non_exhaustive()
    }
}

impl EspEncrypt {
    /// Create encoder that discards trace records
    pub fn new() -> Self {
        Self::with_trace_sink(Arc::new(NullTraceSink))
    }

    /// Create encoder reporting traced packets to `trace`
    pub fn with_trace_sink(trace: Arc<dyn TraceSink<EncryptTrace>>) -> Self {
        EspEncrypt { trace }
    }
}

impl DataplaneModule for EspEncrypt {
    fn id(&self) -> &'static str {
        ENCRYPT_NODE
    }

    fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    fn description(&self) -> &'static str {
        "ESP encapsulation (RFC 4303)"
    }
}

impl PacketTransform for EspEncrypt {
    fn process(&mut self, worker: &mut WorkerContext, packet: &mut Packet) -> Result<NextStage> {
        packet.linearize();

        let Resolved { sa, ctx, rng } = worker.resolve(packet.meta.sa_index)?;
        let allocated = allocate(sa, packet);
        let seq = allocated.as_ref().map_or(0, |&(_, seq)| seq);
        let result =
            allocated.and_then(|(inner, seq)| encapsulate(sa, ctx, rng, packet, inner, seq));

        if packet.meta.traced {
            self.trace.record(EncryptTrace {
                spi: sa.spi(),
                seq,
                crypto: sa.crypto_alg(),
                integ: sa.integ_alg(),
            });
        }
        result
    }
}

/// Make room for the outer header (tunnel) or move the IP header forward
/// (transport). Returns the ESP header offset within the current window,
/// the next-header value for the trailer, and the default next stage.
fn open_gap(
    mode: SaMode,
    inner: IpVersion,
    gap: usize,
    packet: &mut Packet,
) -> Result<(usize, u8, NextStage)> {
    match mode {
        SaMode::Tunnel4 { src, dst } => {
            let prefix = IPV4_HEADER_LEN + gap;
            packet.push_front(prefix)?;
            let (outer, rest) = packet.current_mut().split_at_mut(prefix);
            ip::write_outer_v4(&mut outer[..IPV4_HEADER_LEN], rest, src, dst);
            packet.meta.tx_if = None;
            Ok((IPV4_HEADER_LEN, inner.encap_protocol(), NextStage::Ip4Lookup))
        }
        SaMode::Tunnel6 { src, dst } => {
            let prefix = IPV6_HEADER_LEN + gap;
            packet.push_front(prefix)?;
            let (outer, rest) = packet.current_mut().split_at_mut(prefix);
            ip::write_outer_v6(&mut outer[..IPV6_HEADER_LEN], rest, src, dst);
            packet.meta.tx_if = None;
            Ok((IPV6_HEADER_LEN, inner.encap_protocol(), NextStage::Ip6Lookup))
        }
        SaMode::Transport => {
            let hdr = packet.current();
            let (hdr_len, protocol, stage) = match inner {
                IpVersion::V4 => (v4::header_len(hdr), v4::protocol(hdr), NextStage::Ip4Lookup),
                IpVersion::V6 => (IPV6_HEADER_LEN, v6::next_header(hdr), NextStage::Ip6Lookup),
            };
            if hdr_len < IPV4_HEADER_LEN || hdr_len > hdr.len() {
                return Err(Error::NotIp(hdr[0]));
            }

            let with_l2 = packet.meta.tx_if.is_some();
            if with_l2 && packet.headroom() < gap + ETHERNET_HEADER_LEN {
                return Err(Error::BufferTooShort {
                    required: gap + ETHERNET_HEADER_LEN,
                    available: packet.headroom(),
                });
            }

            let old = packet.offset();
            packet.push_front(gap)?;
            let new = packet.offset();

            let buf = packet.buffer_mut();
            if with_l2 {
                buf.copy_within(old - ETHERNET_HEADER_LEN..old, new - ETHERNET_HEADER_LEN);
            }
            buf.copy_within(old..old + hdr_len, new);

            let hdr = &mut packet.current_mut()[..hdr_len];
            match inner {
                IpVersion::V4 => v4::set_protocol(hdr, IP_PROTOCOL_ESP),
                IpVersion::V6 => v6::set_next_header(hdr, IP_PROTOCOL_ESP),
            }

            let stage = if with_l2 {
                NextStage::InterfaceOutput
            } else {
                stage
            };
            Ok((hdr_len, protocol, stage))
        }
    }
}

/// Classify the inner packet and take a sequence number for it
fn allocate(sa: &SecurityAssociation, packet: &Packet) -> Result<(IpVersion, u64)> {
    let first = *packet.current().first().ok_or(Error::BufferTooShort {
        required: 1,
        available: 0,
    })?;
    let inner = IpVersion::of(first).ok_or(Error::NotIp(first))?;
    let min_len = match inner {
        IpVersion::V4 => IPV4_HEADER_LEN,
        IpVersion::V6 => IPV6_HEADER_LEN,
    };
    if packet.len() < min_len {
        return Err(Error::BufferTooShort {
            required: min_len,
            available: packet.len(),
        });
    }

    let seq = sa.next_sequence().map_err(|e| {
        logging::log_sequence_exhausted(sa.spi());
        e
    })?;
    Ok((inner, seq))
}

fn encapsulate(
    sa: &SecurityAssociation,
    ctx: &mut SaContext,
    rng: &mut StdRng,
    packet: &mut Packet,
    inner: IpVersion,
    seq: u64,
) -> Result<NextStage> {
    let inner_len = packet.len();
    let alg = sa.crypto_alg();
    let iv_len = alg.iv_size();
    let tag_len = alg.tag_len();
    let icv_len = ctx.integ.icv_len();

    let (esp_off, next_header, stage) =
        open_gap(sa.mode(), inner, ESP_HEADER_LEN + iv_len, packet)?;

    let iv_start = esp_off + ESP_HEADER_LEN;
    let ct_start = iv_start + iv_len;
    let pad = esp::padding_len(packet.len() - ct_start, alg.block_size());
    packet.grow_tail(pad + ESP_TRAILER_LEN + tag_len + icv_len)?;

    let buf = packet.current_mut();
    let icv_start = buf.len() - icv_len;
    let tag_start = icv_start - tag_len;
    let trailer_start = tag_start - ESP_TRAILER_LEN;

    esp::write_padding(&mut buf[trailer_start - pad..trailer_start]);
    buf[trailer_start] = pad as u8;
    buf[trailer_start + 1] = next_header;

    EspHeader {
        spi: sa.spi(),
        seq: seq as u32,
    }
    .write(&mut buf[esp_off..iv_start]);
    ctx.cipher.write_iv(seq, rng, &mut buf[iv_start..ct_start]);

    let (aad, aad_len) = esp::aead_aad(sa.spi(), seq, sa.use_esn());
    let (head, rest) = buf.split_at_mut(ct_start);
    let (plaintext, tail) = rest.split_at_mut(tag_start - ct_start);
    ctx.cipher.encrypt(
        &head[iv_start..],
        &aad[..aad_len],
        plaintext,
        &mut tail[..tag_len],
    )?;

    if icv_len > 0 {
        let seq_hi = sa.use_esn().then_some((seq >> 32) as u32);
        let (covered, icv) = buf[esp_off..].split_at_mut(icv_start - esp_off);
        ctx.integ.compute(covered, seq_hi, icv);
    }

    let total = packet.len();
    let length_error = |_| Error::Length {
        len: total,
        block_size: alg.block_size(),
    };
    let outer = packet.current_mut();
    match IpVersion::of(outer[0]) {
        Some(IpVersion::V4) => {
            v4::finalize(&mut outer[..esp_off], u16::try_from(total).map_err(length_error)?)
        }
        _ => v6::set_payload_len(
            outer,
            u16::try_from(total - IPV6_HEADER_LEN).map_err(length_error)?,
        ),
    }
    sa.add_bytes(inner_len);

    if stage == NextStage::InterfaceOutput {
        packet.push_front(ETHERNET_HEADER_LEN)?;
    }

    logging::log_esp_packet("encrypt", sa.spi(), seq, packet.len());
    logging::log_packet_hexdump(ENCRYPT_NODE, packet.current());
    Ok(stage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipsec::{
        config::SaParams,
        esp::padding_len,
        ip::{checksum, IP_PROTOCOL_IP_IN_IP},
        SaStore,
    };
    use parking_lot::Mutex;
    use std::net::Ipv4Addr;

    fn create_test_ipv4(payload_len: usize, protocol: u8) -> Vec<u8> {
        let total = IPV4_HEADER_LEN + payload_len;
        let mut pkt = vec![0u8; total];
        pkt[0] = 0x45;
        pkt[2..4].copy_from_slice(&(total as u16).to_be_bytes());
        pkt[8] = 64;
        pkt[9] = protocol;
        pkt[12..16].copy_from_slice(&[192, 168, 1, 1]);
        pkt[16..20].copy_from_slice(&[192, 168, 1, 2]);
        v4::finalize(&mut pkt[..IPV4_HEADER_LEN], total as u16);
        for (i, b) in pkt[IPV4_HEADER_LEN..].iter_mut().enumerate() {
            *b = i as u8;
        }
        pkt
    }

    fn create_test_worker(params: SaParams) -> (Arc<SaStore>, WorkerContext, u32) {
        let store = Arc::new(SaStore::new(4, 1));
        let index = store.add(params).unwrap();
        let worker = WorkerContext::with_seed(0, Arc::clone(&store), 1);
        (store, worker, index)
    }

    fn tunnel_params() -> SaParams {
        SaParams::builder()
            .with_spi(0x1000)
            .with_crypto(CryptoAlg::AesCbc128, vec![0x01u8; 16])
            .with_integ(IntegAlg::HmacSha1_96, vec![0x02u8; 20])
            .with_tunnel_v4(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2))
            .build()
            .unwrap()
    }

    #[test]
    fn test_tunnel_v4_layout() {
        let (_store, mut worker, index) = create_test_worker(tunnel_params());
        let inner = create_test_ipv4(20, 17);
        let mut packet = Packet::from_bytes(&inner);
        packet.meta.sa_index = index;

        let stage = EspEncrypt::new().process(&mut worker, &mut packet).unwrap();
        assert_eq!(stage, NextStage::Ip4Lookup);

        let out = packet.current();
        let pad = padding_len(inner.len(), 16);
        assert_eq!(out.len(), 20 + 8 + 16 + inner.len() + pad + 2 + 12);

        // Outer header
        assert_eq!(v4::protocol(out), IP_PROTOCOL_ESP);
        assert_eq!(v4::total_len(out) as usize, out.len());
        assert_eq!(checksum(&out[..20]), 0);
        assert_eq!(&out[12..16], &[10, 0, 0, 1]);
        assert_eq!(&out[16..20], &[10, 0, 0, 2]);

        // ESP header
        let header = EspHeader::read(&out[20..]).unwrap();
        assert_eq!(header.spi, 0x1000);
        assert_eq!(header.seq, 1);
        assert_eq!(packet.meta.tx_if, None);
    }

    #[test]
    fn test_sequence_increments_per_packet() {
        let (store, mut worker, index) = create_test_worker(tunnel_params());
        let mut node = EspEncrypt::new();

        for expected in 1..=3u32 {
            let mut packet = Packet::from_bytes(&create_test_ipv4(20, 17));
            packet.meta.sa_index = index;
            node.process(&mut worker, &mut packet).unwrap();
            assert_eq!(EspHeader::read(&packet.current()[20..]).unwrap().seq, expected);
        }
        assert_eq!(store.stats(index).unwrap().sequence, 3);
        assert_eq!(store.stats(index).unwrap().bytes, 3 * 40);
    }

    #[test]
    fn test_failed_encode_not_counted_in_bytes() {
        let (store, mut worker, index) = create_test_worker(tunnel_params());
        let mut node = EspEncrypt::new();

        // No tailroom for padding, trailer and ICV
        let mut packet = Packet::with_room(&create_test_ipv4(20, 17), 128, 0);
        packet.meta.sa_index = index;
        assert!(matches!(
            node.process(&mut worker, &mut packet),
            Err(Error::BufferTooShort { .. })
        ));

        let stats = store.stats(index).unwrap();
        assert_eq!(stats.sequence, 1);
        assert_eq!(stats.bytes, 0);

        let mut packet = Packet::from_bytes(&create_test_ipv4(20, 17));
        packet.meta.sa_index = index;
        node.process(&mut worker, &mut packet).unwrap();
        assert_eq!(store.stats(index).unwrap().bytes, 40);
    }

    #[test]
    fn test_null_cipher_trailer_in_clear() {
        let params = SaParams::builder()
            .with_spi(7)
            .with_integ(IntegAlg::HmacSha256_128, vec![0x02u8; 32])
            .with_tunnel_v4(Ipv4Addr::LOCALHOST, Ipv4Addr::LOCALHOST)
            .build()
            .unwrap();
        let (_store, mut worker, index) = create_test_worker(params);
        let inner = create_test_ipv4(12, 6);
        let mut packet = Packet::from_bytes(&inner);
        packet.meta.sa_index = index;

        EspEncrypt::new().process(&mut worker, &mut packet).unwrap();
        let out = packet.current();
        let body = &out[28..out.len() - 16];
        assert_eq!(&body[..inner.len()], &inner[..]);
        // Block size 1: no padding, pad length 0, next header IP-in-IP
        assert_eq!(&body[inner.len()..], &[0, IP_PROTOCOL_IP_IN_IP]);
    }

    #[test]
    fn test_transport_keeps_addresses() {
        let params = SaParams::builder()
            .with_spi(0x2000)
            .with_crypto(CryptoAlg::AesGcm128, vec![0x05u8; 16])
            .with_salt([9, 9, 9, 9])
            .with_transport()
            .build()
            .unwrap();
        let (_store, mut worker, index) = create_test_worker(params);
        let inner = create_test_ipv4(32, 17);
        let mut packet = Packet::from_bytes(&inner);
        packet.meta.sa_index = index;

        let stage = EspEncrypt::new().process(&mut worker, &mut packet).unwrap();
        assert_eq!(stage, NextStage::Ip4Lookup);

        let out = packet.current();
        assert_eq!(&out[12..20], &inner[12..20]);
        assert_eq!(v4::protocol(out), IP_PROTOCOL_ESP);
        assert_eq!(v4::total_len(out) as usize, out.len());
        assert!(v4::checksum_ok(out));
        // IV carries the sequence number
        assert_eq!(&out[28..36], &[0, 0, 0, 1, 0, 0, 0, 0]);
    }

    #[test]
    fn test_transport_with_known_interface_keeps_l2_header() {
        let params = SaParams::builder()
            .with_spi(0x2000)
            .with_crypto(CryptoAlg::AesCbc128, vec![0x05u8; 16])
            .with_integ(IntegAlg::HmacSha1_96, vec![0x06u8; 20])
            .with_transport()
            .build()
            .unwrap();
        let (_store, mut worker, index) = create_test_worker(params);

        let mut frame = vec![0xE0u8; ETHERNET_HEADER_LEN];
        frame.extend_from_slice(&create_test_ipv4(16, 17));
        let mut packet = Packet::from_bytes(&frame);
        packet.pop_front(ETHERNET_HEADER_LEN).unwrap();
        packet.meta.sa_index = index;
        packet.meta.tx_if = Some(3);

        let stage = EspEncrypt::new().process(&mut worker, &mut packet).unwrap();
        assert_eq!(stage, NextStage::InterfaceOutput);
        assert_eq!(&packet.current()[..ETHERNET_HEADER_LEN], &[0xE0; ETHERNET_HEADER_LEN]);
        assert_eq!(packet.current()[ETHERNET_HEADER_LEN], 0x45);
    }

    #[test]
    fn test_rejects_non_ip() {
        let (store, mut worker, index) = create_test_worker(tunnel_params());
        let mut packet = Packet::from_bytes(&[0x00; 40]);
        packet.meta.sa_index = index;

        assert_eq!(
            EspEncrypt::new().process(&mut worker, &mut packet),
            Err(Error::NotIp(0))
        );
        // No sequence number consumed
        assert_eq!(store.stats(index).unwrap().sequence, 0);
    }

    #[test]
    fn test_insufficient_headroom() {
        let (_store, mut worker, index) = create_test_worker(tunnel_params());
        let mut packet = Packet::with_room(&create_test_ipv4(20, 17), 16, 64);
        packet.meta.sa_index = index;
        assert!(matches!(
            EspEncrypt::new().process(&mut worker, &mut packet),
            Err(Error::BufferTooShort { .. })
        ));
    }

    #[test]
    fn test_exhausted_sequence_drops_until_rekey() {
        let mut params = tunnel_params();
        params.initial_seq = u32::MAX as u64;
        let (store, mut worker, index) = create_test_worker(params);
        let mut node = EspEncrypt::new();

        for _ in 0..2 {
            let mut packet = Packet::from_bytes(&create_test_ipv4(20, 17));
            packet.meta.sa_index = index;
            let before = packet.current().to_vec();
            assert_eq!(
                node.process(&mut worker, &mut packet),
                Err(Error::SequenceExhausted(0x1000))
            );
            assert_eq!(packet.current(), &before[..]);
        }
        assert!(store.is_degraded(index));

        store.rekey(index, tunnel_params()).unwrap();
        worker.begin_batch();
        let mut packet = Packet::from_bytes(&create_test_ipv4(20, 17));
        packet.meta.sa_index = index;
        assert!(node.process(&mut worker, &mut packet).is_ok());
    }

    #[derive(Default)]
    struct Traces(Mutex<Vec<EncryptTrace>>);

    impl TraceSink<EncryptTrace> for Traces {
        fn record(&self, record: EncryptTrace) {
            self.0.lock().push(record);
        }
    }

    #[test]
    fn test_trace_only_for_flagged_packets() {
        let (_store, mut worker, index) = create_test_worker(tunnel_params());
        let traces = Arc::new(Traces::default());
        let mut node = EspEncrypt::with_trace_sink(traces.clone());

        for traced in [false, true] {
            let mut packet = Packet::from_bytes(&create_test_ipv4(20, 17));
            packet.meta.sa_index = index;
            packet.meta.traced = traced;
            node.process(&mut worker, &mut packet).unwrap();
        }

        let recorded = traces.0.lock();
        assert_eq!(recorded.len(), 1);
        assert_eq!(
            recorded[0],
            EncryptTrace {
                spi: 0x1000,
                seq: 2,
                crypto: CryptoAlg::AesCbc128,
                integ: IntegAlg::HmacSha1_96,
            }
        );
    }

    #[test]
    fn test_trace_records_allocated_sequence() {
        let (store, mut worker, index) = create_test_worker(tunnel_params());
        let traces = Arc::new(Traces::default());
        let mut node = EspEncrypt::with_trace_sink(traces.clone());

        let mut packet = Packet::from_bytes(&create_test_ipv4(20, 17));
        packet.meta.sa_index = index;
        packet.meta.traced = true;
        node.process(&mut worker, &mut packet).unwrap();

        // Another encoder on the same SA moves the counter on
        store.get(index).unwrap().next_sequence().unwrap();

        let mut not_ip = Packet::from_bytes(&[0u8; 20]);
        not_ip.meta.sa_index = index;
        not_ip.meta.traced = true;
        assert!(node.process(&mut worker, &mut not_ip).is_err());

        let recorded = traces.0.lock();
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[0].seq, 1);
        assert_eq!(recorded[1].seq, 0);
        assert_eq!(store.stats(index).unwrap().sequence, 2);
    }
}
