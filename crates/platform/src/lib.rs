//! # espflow Platform
//!
//! Core platform types and collaborator traits shared by the espflow
//! dataplane crates.
//!
//! This crate provides:
//! - Unified error types (`PlatformError`, `PlatformResult`)
//! - Collaborator traits (`DataplaneModule`, `CounterSink`, `TraceSink`)
//!
//! # Examples
//!
//! ```
//! use espflow_platform::{CounterSink, PlatformResult};
//! use std::sync::atomic::{AtomicU64, Ordering};
//!
//! struct Total(AtomicU64);
//!
//! impl CounterSink for Total {
//!     fn increment(&self, _node: &str, _counter: &str, n: u64) {
//!         self.0.fetch_add(n, Ordering::Relaxed);
//!     }
//! }
//!
//! # fn main() -> PlatformResult<()> {
//! let total = Total(AtomicU64::new(0));
//! total.increment("esp-decrypt", "received", 4);
//! assert_eq!(total.0.load(Ordering::Relaxed), 4);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod error;
pub mod traits;

pub use error::{PlatformError, PlatformResult};
pub use traits::{CounterSink, DataplaneModule, NullTraceSink, TraceSink};

/// Platform version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
