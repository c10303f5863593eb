//! Batch dispatcher
//!
//! Runs a [`PacketTransform`] over a batch of packet handles and sorts the
//! results into output frames, one pending frame per next stage. Order is
//! preserved within each stage. Every input packet ends up in exactly one
//! frame; a failed transform sends the packet to [`NextStage::Drop`] and
//! bumps the counter named by [`Error::counter`](crate::ipsec::Error::counter).
//!
//! ```text
//! batch: [p0 p1 p2 p3 p4]
//!            |
//!        transform
//!            |
//!   ip4-input: [p0 p2 p3]   error-drop: [p1]   handoff-worker-1: [p4]
//! ```

use super::{
    config::DataplaneConfig,
    logging,
    packet::{Packet, PacketHandle, PacketPool},
    worker::WorkerContext,
    Result,
};
use espflow_platform::{CounterSink, DataplaneModule};
use std::fmt;
use std::sync::Arc;

/// Default number of handles per frame
pub const DEFAULT_FRAME_CAPACITY: usize = 256;

/// Where a packet goes after a transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NextStage {
    /// Discard
    Drop,
    /// IPv4 route lookup (tunnel-mode output)
    Ip4Lookup,
    /// IPv6 route lookup (tunnel-mode output)
    Ip6Lookup,
    /// Straight to the egress interface (transport mode, known interface)
    InterfaceOutput,
    /// Local IPv4 input (decrypted inner packet)
    Ip4Input,
    /// Local IPv6 input (decrypted inner packet)
    Ip6Input,
    /// GRE-over-IPsec input
    IpsecGreInput,
    /// Hand the packet to the worker owning its SA
    Handoff(usize),
}

impl fmt::Display for NextStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NextStage::Drop => write!(f, "error-drop"),
            NextStage::Ip4Lookup => write!(f, "ip4-lookup"),
            NextStage::Ip6Lookup => write!(f, "ip6-lookup"),
            NextStage::InterfaceOutput => write!(f, "interface-output"),
            NextStage::Ip4Input => write!(f, "ip4-input"),
            NextStage::Ip6Input => write!(f, "ip6-input"),
            NextStage::IpsecGreInput => write!(f, "ipsec-gre-input"),
            NextStage::Handoff(worker) => write!(f, "handoff-worker-{}", worker),
        }
    }
}

/// Bounded, ordered list of packet handles bound for one stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    stage: NextStage,
    handles: Vec<PacketHandle>,
    capacity: usize,
}

impl Frame {
    /// Create an empty frame
    pub fn new(stage: NextStage, capacity: usize) -> Self {
        Frame {
            stage,
            handles: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Destination stage
    pub fn stage(&self) -> NextStage {
        self.stage
    }

    /// Handles in arrival order
    pub fn handles(&self) -> &[PacketHandle] {
        &self.handles
    }

    /// Number of handles
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Check if the frame holds no handles
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Check if the frame cannot take another handle
    pub fn is_full(&self) -> bool {
        self.handles.len() >= self.capacity
    }

    fn push(&mut self, handle: PacketHandle) {
        self.handles.push(handle);
    }
}

/// Downstream end of the dispatcher
///
/// `acquire` is the only place a worker may wait.
pub trait FrameSink {
    /// Get an empty frame for `stage`
    fn acquire(&mut self, stage: NextStage, capacity: usize) -> Frame;

    /// Hand a filled frame to its stage
    fn flush(&mut self, frame: Frame);
}

/// Frame sink that collects every flushed frame
#[derive(Debug, Default)]
pub struct VecFrameSink {
    frames: Vec<Frame>,
}

impl VecFrameSink {
    /// Create empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames flushed so far, in flush order
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// All handles sent to `stage`, in order
    pub fn handles_for(&self, stage: NextStage) -> Vec<PacketHandle> {
        self.frames
            .iter()
            .filter(|f| f.stage == stage)
            .flat_map(|f| f.handles.iter().copied())
            .collect()
    }

    /// Remove and return every collected frame
    pub fn take(&mut self) -> Vec<Frame> {
        std::mem::take(&mut self.frames)
    }
}

impl FrameSink for VecFrameSink {
    fn acquire(&mut self, stage: NextStage, capacity: usize) -> Frame {
        Frame::new(stage, capacity)
    }

    fn flush(&mut self, frame: Frame) {
        self.frames.push(frame);
    }
}

/// Per-packet transform plugged into the dispatcher
pub trait PacketTransform: DataplaneModule {
    /// Transform one packet in place and pick its next stage
    ///
    /// On error the packet is dropped and the error's counter incremented.
    fn process(&mut self, worker: &mut WorkerContext, packet: &mut Packet) -> Result<NextStage>;
}

/// Outcome of one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Packets in the batch
    pub received: usize,
    /// Packets sent to a forwarding stage
    pub forwarded: usize,
    /// Packets sent to another worker
    pub handed_off: usize,
    /// Packets dropped
    pub dropped: usize,
    /// Frames flushed
    pub frames: usize,
}

#[derive(Default)]
struct Counters {
    entries: Vec<(&'static str, u64)>,
}

impl Counters {
    fn bump(&mut self, name: &'static str) {
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, count)) => *count += 1,
            None => self.entries.push((name, 1)),
        }
    }

    fn report(&self, node: &str, sink: &dyn CounterSink) {
        for (name, count) in &self.entries {
            sink.increment(node, name, *count);
        }
    }
}

struct Batch<'s, S: FrameSink + ?Sized> {
    node: &'static str,
    capacity: usize,
    sink: &'s mut S,
    pending: Vec<Frame>,
    counters: Counters,
    summary: BatchSummary,
}

impl<'s, S: FrameSink + ?Sized> Batch<'s, S> {
    fn enqueue(&mut self, stage: NextStage, handle: PacketHandle) {
        let pos = match self.pending.iter().position(|f| f.stage == stage) {
            Some(pos) => pos,
            None => {
                self.pending.push(self.sink.acquire(stage, self.capacity));
                self.pending.len() - 1
            }
        };

        self.pending[pos].push(handle);
        if self.pending[pos].is_full() {
            let full = self.pending.swap_remove(pos);
            self.flush(full);
        }

        match stage {
            NextStage::Drop => self.summary.dropped += 1,
            NextStage::Handoff(_) => self.summary.handed_off += 1,
            _ => self.summary.forwarded += 1,
        }
    }

    fn flush(&mut self, frame: Frame) {
        logging::log_frame_flush(self.node, &frame.stage.to_string(), frame.len());
        self.summary.frames += 1;
        self.counters.bump("frames-flushed");
        self.sink.flush(frame);
    }

    fn finish(mut self, counters: &dyn CounterSink) -> BatchSummary {
        for frame in std::mem::take(&mut self.pending) {
            if !frame.is_empty() {
                self.flush(frame);
            }
        }
        self.counters.report(self.node, counters);
        self.summary
    }
}

/// Batch dispatcher
pub struct Dispatcher {
    frame_capacity: usize,
    counters: Arc<dyn CounterSink>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("frame_capacity", &self.frame_capacity)
            .finish()
    }
}

impl Dispatcher {
    /// Create dispatcher building frames of `frame_capacity` handles
    pub fn new(frame_capacity: usize, counters: Arc<dyn CounterSink>) -> Self {
        Dispatcher {
            frame_capacity: frame_capacity.max(1),
            counters,
        }
    }

    /// Create dispatcher from the dataplane configuration
    pub fn from_config(config: &DataplaneConfig, counters: Arc<dyn CounterSink>) -> Self {
        Self::new(config.frame_capacity, counters)
    }

    /// Frame capacity
    pub fn frame_capacity(&self) -> usize {
        self.frame_capacity
    }

    /// Run `node` over `batch`
    ///
    /// The worker picks up the latest SA table first and keeps it for the
    /// whole batch. Counters are reported once, after the last frame is
    /// flushed.
    pub fn run<T, S>(
        &self,
        node: &mut T,
        worker: &mut WorkerContext,
        pool: &mut PacketPool,
        batch: &[PacketHandle],
        sink: &mut S,
    ) -> BatchSummary
    where
        T: PacketTransform + ?Sized,
        S: FrameSink + ?Sized,
    {
        worker.begin_batch();

        let mut state = Batch {
            node: node.id(),
            capacity: self.frame_capacity,
            sink,
            pending: Vec::new(),
            counters: Counters::default(),
            summary: BatchSummary {
                received: batch.len(),
                ..BatchSummary::default()
            },
        };

        for &handle in batch {
            state.counters.bump("received");

            let stage = match pool.get_mut(handle) {
                Some(packet) => match node.process(worker, packet) {
                    Ok(stage) => stage,
                    Err(e) => {
                        state.counters.bump(e.counter());
                        NextStage::Drop
                    }
                },
                None => {
                    state.counters.bump("drop");
                    NextStage::Drop
                }
            };

            state.enqueue(stage, handle);
        }

        state.finish(self.counters.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipsec::{Error, SaStore};
    use parking_lot::Mutex;

    /// Sends packets by their first byte: 4 -> ip4-input, 6 -> ip6-input,
    /// 0xEE -> replay error, anything else -> integrity error
    struct FirstByte;

    impl DataplaneModule for FirstByte {
        fn id(&self) -> &'static str {
            "first-byte"
        }
        fn version(&self) -> &'static str {
            "0"
        }
        fn description(&self) -> &'static str {
            "test transform"
        }
    }

    impl PacketTransform for FirstByte {
        fn process(&mut self, _worker: &mut WorkerContext, packet: &mut Packet) -> Result<NextStage> {
            match packet.current()[0] {
                4 => Ok(NextStage::Ip4Input),
                6 => Ok(NextStage::Ip6Input),
                0xEE => Err(Error::Replay(1)),
                _ => Err(Error::Integrity),
            }
        }
    }

    #[derive(Default)]
    struct RecordingCounters {
        seen: Mutex<Vec<(String, String, u64)>>,
    }

    impl CounterSink for RecordingCounters {
        fn increment(&self, node: &str, counter: &str, n: u64) {
            self.seen.lock().push((node.into(), counter.into(), n));
        }
    }

    impl RecordingCounters {
        fn get(&self, counter: &str) -> u64 {
            self.seen
                .lock()
                .iter()
                .filter(|(_, c, _)| c == counter)
                .map(|(_, _, n)| n)
                .sum()
        }
    }

    fn create_test_batch(pool: &mut PacketPool, first_bytes: &[u8]) -> Vec<PacketHandle> {
        first_bytes
            .iter()
            .map(|&b| pool.insert(Packet::from_bytes(&[b, 0, 0, 0])))
            .collect()
    }

    fn create_test_worker() -> WorkerContext {
        WorkerContext::with_seed(0, Arc::new(SaStore::new(1, 1)), 0)
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(NextStage::Drop.to_string(), "error-drop");
        assert_eq!(NextStage::Ip4Lookup.to_string(), "ip4-lookup");
        assert_eq!(NextStage::IpsecGreInput.to_string(), "ipsec-gre-input");
        assert_eq!(NextStage::Handoff(3).to_string(), "handoff-worker-3");
    }

    #[test]
    fn test_every_packet_lands_in_one_frame() {
        let counters = Arc::new(RecordingCounters::default());
        let dispatcher = Dispatcher::new(256, counters.clone());
        let mut pool = PacketPool::new();
        let batch = create_test_batch(&mut pool, &[4, 6, 0xEE, 4, 1, 6, 4]);
        let mut sink = VecFrameSink::new();

        let summary = dispatcher.run(
            &mut FirstByte,
            &mut create_test_worker(),
            &mut pool,
            &batch,
            &mut sink,
        );

        assert_eq!(summary.received, 7);
        assert_eq!(summary.forwarded, 5);
        assert_eq!(summary.dropped, 2);
        assert_eq!(
            sink.handles_for(NextStage::Ip4Input),
            vec![batch[0], batch[3], batch[6]]
        );
        assert_eq!(sink.handles_for(NextStage::Ip6Input), vec![batch[1], batch[5]]);
        assert_eq!(sink.handles_for(NextStage::Drop), vec![batch[2], batch[4]]);

        assert_eq!(counters.get("received"), 7);
        assert_eq!(counters.get("replay"), 1);
        assert_eq!(counters.get("integrity-failed"), 1);
        assert_eq!(counters.get("frames-flushed"), 3);
    }

    #[test]
    fn test_full_frames_are_flushed_early() {
        let counters = Arc::new(RecordingCounters::default());
        let dispatcher = Dispatcher::new(2, counters);
        let mut pool = PacketPool::new();
        let batch = create_test_batch(&mut pool, &[4, 4, 4, 4, 4]);
        let mut sink = VecFrameSink::new();

        let summary = dispatcher.run(
            &mut FirstByte,
            &mut create_test_worker(),
            &mut pool,
            &batch,
            &mut sink,
        );

        let sizes: Vec<usize> = sink.frames().iter().map(Frame::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(summary.frames, 3);
        assert_eq!(sink.handles_for(NextStage::Ip4Input), batch);
    }

    #[test]
    fn test_missing_handle_is_dropped_and_counted() {
        let counters = Arc::new(RecordingCounters::default());
        let dispatcher = Dispatcher::new(8, counters.clone());
        let mut pool = PacketPool::new();
        let mut sink = VecFrameSink::new();

        let summary = dispatcher.run(
            &mut FirstByte,
            &mut create_test_worker(),
            &mut pool,
            &[PacketHandle(42)],
            &mut sink,
        );

        assert_eq!(summary.dropped, 1);
        assert_eq!(sink.handles_for(NextStage::Drop), vec![PacketHandle(42)]);
        assert_eq!(counters.get("drop"), 1);
    }

    #[test]
    fn test_empty_batch_flushes_nothing() {
        let counters = Arc::new(RecordingCounters::default());
        let dispatcher = Dispatcher::new(8, counters.clone());
        let mut sink = VecFrameSink::new();

        let summary = dispatcher.run(
            &mut FirstByte,
            &mut create_test_worker(),
            &mut PacketPool::new(),
            &[],
            &mut sink,
        );

        assert_eq!(summary, BatchSummary::default());
        assert!(sink.frames().is_empty());
        assert!(counters.seen.lock().is_empty());
    }
}
