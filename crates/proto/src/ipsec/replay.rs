//! Anti-Replay Protection for IPSec ESP
//!
//! Implements RFC 4303 Section 3.4.3 - Anti-Replay mechanism, including the
//! extended sequence number inference of RFC 4303 Appendix A.
//!
//! # Overview
//!
//! The anti-replay window prevents attackers from capturing and replaying
//! valid ESP packets. Each inbound SA maintains a sliding window of
//! recently received sequence numbers using a bitmap.
//!
//! Acceptance is split into two steps. [`ReplayWindow::check`] never
//! mutates the window and runs before the ICV is verified.
//! [`ReplayWindow::advance`] runs only once the packet has authenticated, so
//! a forged packet can never move the window.
//!
//! # Algorithm
//!
//! ```text
//! Window Size: 64 packets (configurable)
//!
//! Bitmap Representation:
//! ┌────────────────────────────────────────────────────────┐
//! │ MSB                                              LSB   │
//! │  63  62  61  ...  2   1   0                           │
//! │   ↑                        ↑                           │
//! │ Oldest              Newest (highest_seq)              │
//! └────────────────────────────────────────────────────────┘
//!
//! Example:
//! - highest_seq = 100
//! - window_size = 64
//! - Valid range: [37, 100]
//! ```
//!
//! # Extended Sequence Numbers
//!
//! With ESN only the low 32 bits travel on the wire. The high 32 bits are
//! inferred from the window position: a low value far below the window
//! bottom is taken to belong to the next 2^32 epoch, a value above the
//! window bottom while the window straddles a wrap belongs to the previous
//! one.
//!
//! # References
//!
//! - [RFC 4303 Section 3.4.3](https://datatracker.ietf.org/doc/html/rfc4303#section-3.4.3)
//! - [RFC 4303 Appendix A](https://datatracker.ietf.org/doc/html/rfc4303#appendix-A)

/// Default anti-replay window size (64 packets)
pub const DEFAULT_WINDOW_SIZE: u32 = 64;

/// Minimum allowed window size
pub const MIN_WINDOW_SIZE: u32 = 32;

/// Maximum window size (limited by bitmap storage)
pub const MAX_WINDOW_SIZE: u32 = 64;

/// Anti-Replay Window
///
/// # Example
///
/// ```rust
/// use espflow_proto::ipsec::replay::ReplayWindow;
///
/// let mut window = ReplayWindow::new(64);
///
/// assert!(window.check(1));
/// window.advance(1);
///
/// // Duplicate
/// assert!(!window.check(1));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayWindow {
    /// Highest sequence number accepted so far (full 64-bit value)
    highest_seq: u64,

    /// Bitmap of accepted packets within window
    ///
    /// Bit 0 (LSB) = highest_seq
    /// Bit 1 = highest_seq - 1
    bitmap: u64,

    /// Window size, between MIN_WINDOW_SIZE and MAX_WINDOW_SIZE
    window_size: u32,
}

impl Default for ReplayWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}

impl ReplayWindow {
    /// Create new anti-replay window
    ///
    /// # Panics
    ///
    /// Panics if window_size is outside valid range. SA parameters are
    /// validated before a window is ever built from them.
    pub fn new(window_size: u32) -> Self {
        assert!(
            (MIN_WINDOW_SIZE..=MAX_WINDOW_SIZE).contains(&window_size),
            "Window size must be between {} and {}",
            MIN_WINDOW_SIZE,
            MAX_WINDOW_SIZE
        );

        ReplayWindow {
            highest_seq: 0,
            bitmap: 0,
            window_size,
        }
    }

    /// Check whether `seq` would be accepted, without touching the window
    ///
    /// # Algorithm
    ///
    /// 1. Reject seq=0 (reserved, never transmitted)
    /// 2. seq > highest_seq: accept
    /// 3. seq at or below highest_seq - window_size: reject (too old)
    /// 4. bit for seq already set: reject (duplicate)
    /// 5. otherwise accept
    pub fn check(&self, seq: u64) -> bool {
        if seq == 0 {
            return false;
        }

        if seq > self.highest_seq {
            return true;
        }

        let diff = self.highest_seq - seq;
        if diff >= self.window_size as u64 {
            return false;
        }

        self.bitmap & (1u64 << diff) == 0
    }

    /// Record `seq` as received
    ///
    /// Must only be called after the packet carrying `seq` has passed
    /// [`check`](Self::check) and integrity verification.
    pub fn advance(&mut self, seq: u64) {
        if seq > self.highest_seq {
            let shift = seq - self.highest_seq;

            if shift < 64 {
                self.bitmap <<= shift;
            } else {
                self.bitmap = 0;
            }

            self.bitmap |= 1;
            self.highest_seq = seq;
        } else {
            let diff = self.highest_seq - seq;
            if diff < self.window_size as u64 {
                self.bitmap |= 1u64 << diff;
            }
        }
    }

    /// Check and advance in one step
    ///
    /// Only for callers that have no separate authentication stage.
    pub fn check_and_update(&mut self, seq: u64) -> bool {
        if !self.check(seq) {
            return false;
        }
        self.advance(seq);
        true
    }

    /// Reconstruct the full 64-bit sequence number from its wire low half
    ///
    /// Returns `None` when the inferred high half would fall before the
    /// first epoch or past the last one. Such a packet can never be valid.
    pub fn infer_esn(&self, seq_lo: u32) -> Option<u64> {
        let th = (self.highest_seq >> 32) as u32;
        let tl = self.highest_seq as u32;
        let w = self.window_size;

        let sh = if tl >= w - 1 {
            // Window entirely within one epoch
            if seq_lo >= tl - (w - 1) {
                th
            } else {
                th.checked_add(1)?
            }
        } else {
            // Window straddles the 2^32 boundary
            if seq_lo >= tl.wrapping_sub(w - 1) {
                th.checked_sub(1)?
            } else {
                th
            }
        };

        Some(((sh as u64) << 32) | seq_lo as u64)
    }

    /// Get highest sequence number received
    pub fn highest_seq(&self) -> u64 {
        self.highest_seq
    }

    /// Get window size
    pub fn window_size(&self) -> u32 {
        self.window_size
    }

    /// Get current bitmap (for debugging/testing)
    pub fn bitmap(&self) -> u64 {
        self.bitmap
    }

    /// Reset window to initial state
    pub fn reset(&mut self) {
        self.highest_seq = 0;
        self.bitmap = 0;
    }
}
