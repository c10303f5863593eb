//! Per-worker dataplane state
//!
//! Each worker owns a [`WorkerContext`]: its view of the SA table, its keyed
//! cipher and MAC contexts, the anti-replay windows of the SAs it owns, and
//! its random source for CBC IVs. Nothing in here is shared, so the packet
//! path takes no locks.

use super::{
    crypto::{CipherSuite, IntegSuite},
    replay::ReplayWindow,
    sa::SecurityAssociation,
    sa_store::{SaStore, SaTable},
    Error, Result,
};
use rand::{rngs::StdRng, SeedableRng};
use std::sync::Arc;

/// Worker-local state for one SA generation
#[derive(Debug)]
pub struct SaContext {
    generation: u64,

    /// Keyed cipher
    pub cipher: CipherSuite,

    /// Keyed MAC
    pub integ: IntegSuite,

    /// Anti-replay window (meaningful on the owning worker only)
    pub replay: ReplayWindow,
}

impl SaContext {
    fn new(sa: &SecurityAssociation) -> Result<Self> {
        let params = sa.params();
        Ok(SaContext {
            generation: sa.generation(),
            cipher: CipherSuite::new(params.crypto_alg, &params.crypto_key, params.salt)?,
            integ: IntegSuite::new(params.integ_alg, &params.integ_key)?,
            replay: ReplayWindow::new(params.replay_window),
        })
    }

    /// SA generation these contexts were built for
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Everything a transform needs for one packet
pub struct Resolved<'a> {
    /// Shared SA
    pub sa: &'a SecurityAssociation,

    /// Worker-local contexts for the SA
    pub ctx: &'a mut SaContext,

    /// Worker random source
    pub rng: &'a mut StdRng,
}

/// Dataplane worker state
#[derive(Debug)]
pub struct WorkerContext {
    id: usize,
    store: Arc<SaStore>,
    table: Arc<SaTable>,
    contexts: Vec<Option<SaContext>>,
    rng: StdRng,
}

impl WorkerContext {
    /// Create worker `id` seeded from OS entropy
    pub fn new(id: usize, store: Arc<SaStore>) -> Self {
        Self::with_rng(id, store, StdRng::from_entropy())
    }

    /// Create worker `id` with a deterministic random source
    pub fn with_seed(id: usize, store: Arc<SaStore>, seed: u64) -> Self {
        Self::with_rng(id, store, StdRng::seed_from_u64(seed))
    }

    fn with_rng(id: usize, store: Arc<SaStore>, rng: StdRng) -> Self {
        let mut table = store.snapshot();
        store.refresh(id, &mut table);
        let contexts = (0..table.capacity()).map(|_| None).collect();
        WorkerContext {
            id,
            store,
            table,
            contexts,
            rng,
        }
    }

    /// Worker id
    pub fn id(&self) -> usize {
        self.id
    }

    /// Table version this worker currently runs with
    pub fn version(&self) -> u64 {
        self.table.version()
    }

    /// Pick up the latest SA table
    ///
    /// Called by the dispatcher before each batch. Contexts of SAs that were
    /// deleted or rekeyed are dropped here, which also drops their keys.
    pub fn begin_batch(&mut self) {
        if !self.store.refresh(self.id, &mut self.table) {
            return;
        }

        let table = &self.table;
        for (index, slot) in self.contexts.iter_mut().enumerate() {
            let live = match (slot.as_ref(), table.get(index as u32)) {
                (Some(ctx), Some(sa)) => ctx.generation == sa.generation(),
                _ => false,
            };
            if !live {
                *slot = None;
            }
        }
    }

    /// Look up the SA at `index` and its worker-local contexts
    ///
    /// Contexts are built on first use of each SA generation.
    ///
    /// # Errors
    ///
    /// - `SaNotFound` if the current snapshot has no SA at `index`
    /// - key errors if the contexts cannot be built
    pub fn resolve(&mut self, index: u32) -> Result<Resolved<'_>> {
        let sa = self.table.get(index).ok_or(Error::SaNotFound(index))?;
        let slot = self
            .contexts
            .get_mut(index as usize)
            .ok_or(Error::SaNotFound(index))?;

        if slot
            .as_ref()
            .map_or(true, |ctx| ctx.generation != sa.generation())
        {
            *slot = Some(SaContext::new(sa)?);
        }
        let ctx = slot.as_mut().ok_or(Error::SaNotFound(index))?;

        Ok(Resolved {
            sa: sa.as_ref(),
            ctx,
            rng: &mut self.rng,
        })
    }

    /// SA at `index` in this worker's snapshot
    pub fn sa(&self, index: u32) -> Option<&Arc<SecurityAssociation>> {
        self.table.get(index)
    }

    /// Anti-replay window of the SA at `index`, if this worker has built one
    pub fn replay_window(&self, index: u32) -> Option<&ReplayWindow> {
        self.contexts
            .get(index as usize)
            .and_then(Option::as_ref)
            .map(|ctx| &ctx.replay)
    }

    /// Number of SA generations with built contexts
    pub fn cached_contexts(&self) -> usize {
        self.contexts.iter().flatten().count()
    }
}
