//! Collaborator traits for espflow dataplane modules
//!
//! The packet transform nodes never talk to a concrete metrics backend or
//! trace buffer. They see these traits, and the embedding dataplane plugs in
//! whatever it uses.

use crate::PlatformResult;

/// Dataplane module interface
///
/// Every node registered with the dataplane implements this trait to provide
/// unified lifecycle management.
pub trait DataplaneModule: Send + Sync {
    /// Unique module identifier (also used as the counter node name)
    fn id(&self) -> &'static str;

    /// Module version
    fn version(&self) -> &'static str;

    /// Module description
    fn description(&self) -> &'static str;

    /// Initialize the module
    ///
    /// # Errors
    ///
    /// Returns an error if initialization fails
    fn init(&mut self) -> PlatformResult<()> {
        Ok(())
    }

    /// Shutdown the module
    ///
    /// # Errors
    ///
    /// Returns an error if shutdown fails
    fn shutdown(&mut self) -> PlatformResult<()> {
        Ok(())
    }
}

/// Named counter sink
///
/// Counters are addressed by node name plus counter name, for example
/// `("esp-decrypt", "replay")`. Implementations must be cheap to call from
/// the per-batch path and must not block.
pub trait CounterSink: Send + Sync {
    /// Add `n` to the counter `counter` of node `node`
    fn increment(&self, node: &str, counter: &str, n: u64);
}

/// Per-packet diagnostic trace sink
///
/// Only invoked for packets whose trace flag is set. Nothing in the
/// transform path depends on what the sink does with the record.
pub trait TraceSink<R>: Send + Sync {
    /// Record one trace entry
    fn record(&self, record: R);
}

/// Trace sink that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTraceSink;

impl<R> TraceSink<R> for NullTraceSink {
    fn record(&self, _record: R) {}
}
