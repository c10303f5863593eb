//! Packet buffers
//!
//! A [`Packet`] owns one contiguous buffer with reserved headroom and
//! tailroom. The live region (the "current window") is described by a start
//! offset and a length, so pushing an outer header or appending a trailer
//! only moves those two numbers.
//!
//! ```text
//! 0          start                    start+len              data.len()
//! |-headroom-|======== current =========|-------tailroom-------|
//! ```
//!
//! Packets are addressed by [`PacketHandle`] through a [`PacketPool`], the
//! way the batch dispatcher hands them between stages.

use crate::ipsec::{Error, Result};

/// Default headroom reserved in front of a received packet
pub const DEFAULT_HEADROOM: usize = 128;

/// Default tailroom reserved after a received packet
pub const DEFAULT_TAILROOM: usize = 128;

/// Ethernet header length
pub const ETHERNET_HEADER_LEN: usize = 14;

/// Stable reference to a packet in a [`PacketPool`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PacketHandle(pub u32);

/// Per-packet metadata carried alongside the buffer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PacketMeta {
    /// SA bound to this packet by classification
    pub sa_index: u32,

    /// Ingress interface
    pub rx_if: u32,

    /// Egress interface, if already resolved
    pub tx_if: Option<u32>,

    /// Emit a trace record for this packet
    pub traced: bool,

    /// Packet carries IPsec-protected GRE
    pub ipsec_gre: bool,

    /// Absolute buffer offset of the IP header that preceded the ESP header
    pub l3_offset: Option<usize>,
}

/// Packet buffer with movable current window
#[derive(Debug, Clone)]
pub struct Packet {
    data: Vec<u8>,
    start: usize,
    len: usize,
    next: Option<Box<Packet>>,

    /// Packet metadata
    pub meta: PacketMeta,
}

impl Packet {
    /// Create a packet holding `bytes` with the given headroom and tailroom
    pub fn with_room(bytes: &[u8], headroom: usize, tailroom: usize) -> Self {
        let mut data = vec![0u8; headroom + bytes.len() + tailroom];
        data[headroom..headroom + bytes.len()].copy_from_slice(bytes);
        Packet {
            data,
            start: headroom,
            len: bytes.len(),
            next: None,
            meta: PacketMeta::default(),
        }
    }

    /// Create a packet holding `bytes` with default headroom and tailroom
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self::with_room(bytes, DEFAULT_HEADROOM, DEFAULT_TAILROOM)
    }

    /// Offset of the current window within the buffer
    pub fn offset(&self) -> usize {
        self.start
    }

    /// Length of the current window (first segment only)
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the current window is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes available in front of the current window
    pub fn headroom(&self) -> usize {
        self.start
    }

    /// Bytes available after the current window
    pub fn tailroom(&self) -> usize {
        self.data.len() - self.start - self.len
    }

    /// Current window
    pub fn current(&self) -> &[u8] {
        &self.data[self.start..self.start + self.len]
    }

    /// Current window, mutable
    pub fn current_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.start..self.start + self.len]
    }

    /// Whole underlying buffer, for reads at absolute offsets
    pub fn buffer(&self) -> &[u8] {
        &self.data
    }

    /// Whole underlying buffer, mutable
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Move the start of the window back by `n` bytes (prepend a header)
    pub fn push_front(&mut self, n: usize) -> Result<()> {
        if n > self.start {
            return Err(Error::BufferTooShort {
                required: n,
                available: self.start,
            });
        }
        self.start -= n;
        self.len += n;
        Ok(())
    }

    /// Move the start of the window forward by `n` bytes (strip a header)
    pub fn pop_front(&mut self, n: usize) -> Result<()> {
        if n > self.len {
            return Err(Error::BufferTooShort {
                required: n,
                available: self.len,
            });
        }
        self.start += n;
        self.len -= n;
        Ok(())
    }

    /// Extend the window into the tailroom by `n` bytes
    pub fn grow_tail(&mut self, n: usize) -> Result<()> {
        if n > self.tailroom() {
            return Err(Error::BufferTooShort {
                required: n,
                available: self.tailroom(),
            });
        }
        self.len += n;
        Ok(())
    }

    /// Drop `n` bytes from the end of the window
    pub fn shrink_tail(&mut self, n: usize) -> Result<()> {
        if n > self.len {
            return Err(Error::BufferTooShort {
                required: n,
                available: self.len,
            });
        }
        self.len -= n;
        Ok(())
    }

    /// Append a chained segment
    pub fn chain(&mut self, segment: Packet) {
        match self.next {
            Some(ref mut next) => next.chain(segment),
            None => self.next = Some(Box::new(segment)),
        }
    }

    /// Check whether further segments follow this one
    pub fn is_chained(&self) -> bool {
        self.next.is_some()
    }

    /// Total length across all chained segments
    pub fn length_in_chain(&self) -> usize {
        let mut total = self.len;
        let mut next = self.next.as_deref();
        while let Some(seg) = next {
            total += seg.len;
            next = seg.next.as_deref();
        }
        total
    }

    /// Pull every chained segment into the first buffer
    ///
    /// The first segment's headroom and tailroom are preserved. This is the
    /// only operation that may reallocate.
    pub fn linearize(&mut self) {
        let Some(mut next) = self.next.take() else {
            return;
        };

        let extra = next.length_in_chain();
        let tailroom = self.tailroom();
        let end = self.start + self.len;
        let mut data = Vec::with_capacity(self.data.len() + extra);
        data.extend_from_slice(&self.data[..end]);
        loop {
            data.extend_from_slice(next.current());
            match next.next.take() {
                Some(seg) => next = seg,
                None => break,
            }
        }
        data.resize(data.len() + tailroom, 0);

        self.data = data;
        self.len += extra;
    }
}

/// Arena of packets addressed by [`PacketHandle`]
#[derive(Debug, Default)]
pub struct PacketPool {
    slots: Vec<Option<Packet>>,
    free: Vec<u32>,
}

impl PacketPool {
    /// Create empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a packet and return its handle
    pub fn insert(&mut self, packet: Packet) -> PacketHandle {
        match self.free.pop() {
            Some(idx) => {
                self.slots[idx as usize] = Some(packet);
                PacketHandle(idx)
            }
            None => {
                self.slots.push(Some(packet));
                PacketHandle((self.slots.len() - 1) as u32)
            }
        }
    }

    /// Get packet by handle
    pub fn get(&self, handle: PacketHandle) -> Option<&Packet> {
        self.slots.get(handle.0 as usize).and_then(Option::as_ref)
    }

    /// Get packet by handle, mutable
    pub fn get_mut(&mut self, handle: PacketHandle) -> Option<&mut Packet> {
        self.slots.get_mut(handle.0 as usize).and_then(Option::as_mut)
    }

    /// Remove a packet, returning its slot to the free list
    pub fn remove(&mut self, handle: PacketHandle) -> Option<Packet> {
        let packet = self.slots.get_mut(handle.0 as usize)?.take()?;
        self.free.push(handle.0);
        Some(packet)
    }

    /// Number of live packets
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Check if the pool holds no packets
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
