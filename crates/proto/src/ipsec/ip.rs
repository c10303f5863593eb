//! IPv4 / IPv6 header helpers
//!
//! Byte-offset accessors for the handful of IP header fields the ESP
//! transforms read or rewrite, plus the RFC 1071 header checksum.

use std::net::{Ipv4Addr, Ipv6Addr};

/// IPv4 header length without options
pub const IPV4_HEADER_LEN: usize = 20;

/// IPv6 fixed header length
pub const IPV6_HEADER_LEN: usize = 40;

/// IP-in-IP (IPv4 encapsulation)
pub const IP_PROTOCOL_IP_IN_IP: u8 = 4;

/// IPv6 encapsulation
pub const IP_PROTOCOL_IPV6: u8 = 41;

/// Generic Routing Encapsulation
pub const IP_PROTOCOL_GRE: u8 = 47;

/// Encapsulating Security Payload
pub const IP_PROTOCOL_ESP: u8 = 50;

/// IP version of a header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpVersion {
    /// IPv4
    V4,
    /// IPv6
    V6,
}

impl IpVersion {
    /// Classify a header by its first byte
    pub fn of(first_byte: u8) -> Option<Self> {
        match first_byte >> 4 {
            4 => Some(IpVersion::V4),
            6 => Some(IpVersion::V6),
            _ => None,
        }
    }

    /// Next-header value used when this version is tunnelled
    pub fn encap_protocol(self) -> u8 {
        match self {
            IpVersion::V4 => IP_PROTOCOL_IP_IN_IP,
            IpVersion::V6 => IP_PROTOCOL_IPV6,
        }
    }
}

/// RFC 1071 Internet checksum
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for pair in &mut chunks {
        sum += u16::from_be_bytes([pair[0], pair[1]]) as u32;
    }
    if let [last] = chunks.remainder() {
        sum += (*last as u32) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// IPv4 header helpers
pub mod v4 {
    use super::checksum;

    /// Header length from the IHL field
    pub fn header_len(hdr: &[u8]) -> usize {
        ((hdr[0] & 0x0F) as usize) * 4
    }

    /// Type of service byte
    pub fn tos(hdr: &[u8]) -> u8 {
        hdr[1]
    }

    /// Time to live
    pub fn ttl(hdr: &[u8]) -> u8 {
        hdr[8]
    }

    /// Protocol field
    pub fn protocol(hdr: &[u8]) -> u8 {
        hdr[9]
    }

    /// Set protocol field
    pub fn set_protocol(hdr: &mut [u8], protocol: u8) {
        hdr[9] = protocol;
    }

    /// Total length field
    pub fn total_len(hdr: &[u8]) -> u16 {
        u16::from_be_bytes([hdr[2], hdr[3]])
    }

    /// Header checksum field
    pub fn header_checksum(hdr: &[u8]) -> u16 {
        u16::from_be_bytes([hdr[10], hdr[11]])
    }

    /// Rewrite total length and recompute the header checksum
    pub fn finalize(hdr: &mut [u8], total_len: u16) {
        let len = header_len(hdr);
        hdr[2..4].copy_from_slice(&total_len.to_be_bytes());
        hdr[10..12].copy_from_slice(&[0, 0]);
        let sum = checksum(&hdr[..len]);
        hdr[10..12].copy_from_slice(&sum.to_be_bytes());
    }

    /// Check that the header checksum verifies
    pub fn checksum_ok(hdr: &[u8]) -> bool {
        checksum(&hdr[..header_len(hdr)]) == 0
    }
}

/// IPv6 header helpers
pub mod v6 {
    /// Version / traffic class / flow label word
    pub fn vtcfl(hdr: &[u8]) -> u32 {
        u32::from_be_bytes([hdr[0], hdr[1], hdr[2], hdr[3]])
    }

    /// Traffic class
    pub fn traffic_class(hdr: &[u8]) -> u8 {
        ((vtcfl(hdr) >> 20) & 0xFF) as u8
    }

    /// Next header field
    pub fn next_header(hdr: &[u8]) -> u8 {
        hdr[6]
    }

    /// Set next header field
    pub fn set_next_header(hdr: &mut [u8], next: u8) {
        hdr[6] = next;
    }

    /// Hop limit
    pub fn hop_limit(hdr: &[u8]) -> u8 {
        hdr[7]
    }

    /// Payload length field
    pub fn payload_len(hdr: &[u8]) -> u16 {
        u16::from_be_bytes([hdr[4], hdr[5]])
    }

    /// Set payload length field
    pub fn set_payload_len(hdr: &mut [u8], len: u16) {
        hdr[4..6].copy_from_slice(&len.to_be_bytes());
    }
}

/// Write a 20-byte outer IPv4 header for tunnel mode
///
/// TOS and TTL are inherited from the inner header (traffic class and hop
/// limit for an IPv6 inner packet). Length and checksum are left zero and
/// set by [`v4::finalize`] once the packet is complete.
pub fn write_outer_v4(out: &mut [u8], inner: &[u8], src: Ipv4Addr, dst: Ipv4Addr) {
    let (tos, ttl) = match IpVersion::of(inner[0]) {
        Some(IpVersion::V6) => (v6::traffic_class(inner), v6::hop_limit(inner)),
        _ => (v4::tos(inner), v4::ttl(inner)),
    };

    out[0] = 0x45;
    out[1] = tos;
    out[2..4].copy_from_slice(&[0, 0]);
    out[4..6].copy_from_slice(&[0, 0]);
    out[6..8].copy_from_slice(&[0, 0]);
    out[8] = ttl;
    out[9] = IP_PROTOCOL_ESP;
    out[10..12].copy_from_slice(&[0, 0]);
    out[12..16].copy_from_slice(&src.octets());
    out[16..20].copy_from_slice(&dst.octets());
}

/// Write a 40-byte outer IPv6 header for tunnel mode
///
/// The version / traffic class / flow label word and hop limit are inherited
/// from an IPv6 inner header; an IPv4 inner header contributes its TOS and
/// TTL instead.
pub fn write_outer_v6(out: &mut [u8], inner: &[u8], src: Ipv6Addr, dst: Ipv6Addr) {
    let (word, hop_limit) = match IpVersion::of(inner[0]) {
        Some(IpVersion::V6) => (v6::vtcfl(inner), v6::hop_limit(inner)),
        _ => ((6u32 << 28) | ((v4::tos(inner) as u32) << 20), v4::ttl(inner)),
    };

    out[0..4].copy_from_slice(&word.to_be_bytes());
    out[4..6].copy_from_slice(&[0, 0]);
    out[6] = IP_PROTOCOL_ESP;
    out[7] = hop_limit;
    out[8..24].copy_from_slice(&src.octets());
    out[24..40].copy_from_slice(&dst.octets());
}
