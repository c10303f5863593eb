//! Shared SA store
//!
//! Holds every installed [`SecurityAssociation`] in a fixed number of slots
//! addressed by a 32-bit index. Control-plane updates (add, rekey, delete)
//! build a new [`SaTable`] and publish it in one step; workers pick up the
//! latest table at the start of each batch with [`SaStore::refresh`] and
//! keep using that snapshot until the batch ends.
//!
//! A deleted slot is not reused immediately. The deletion is stamped with
//! the table version that no longer contains it, and [`SaStore::reclaim`]
//! returns the slot to the free list only once every worker has observed
//! that version or a later one.
//!
//! # Example
//!
//! ```rust
//! use espflow_proto::ipsec::{config::SaParams, crypto::{CryptoAlg, IntegAlg}, SaStore};
//!
//! let store = SaStore::new(16, 1);
//! let params = SaParams::builder()
//!     .with_spi(0x1000)
//!     .with_crypto(CryptoAlg::AesCbc128, vec![0u8; 16])
//!     .with_integ(IntegAlg::HmacSha1_96, vec![0u8; 20])
//!     .with_transport()
//!     .build()
//!     .unwrap();
//!
//! let index = store.add(params).unwrap();
//! assert_eq!(store.get(index).unwrap().spi(), 0x1000);
//! ```

use super::{
    config::{DataplaneConfig, SaParams},
    logging,
    sa::{SaStats, SecurityAssociation},
    Error, Result,
};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Immutable view of the store at one version
#[derive(Debug)]
pub struct SaTable {
    version: u64,
    slots: Vec<Option<Arc<SecurityAssociation>>>,
}

impl SaTable {
    /// Table version
    pub fn version(&self) -> u64 {
        self.version
    }

    /// SA at `index`, if installed in this version
    pub fn get(&self, index: u32) -> Option<&Arc<SecurityAssociation>> {
        self.slots.get(index as usize).and_then(Option::as_ref)
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

#[derive(Debug)]
struct PendingDeletion {
    index: u32,
    version: u64,
}

#[derive(Debug)]
struct Control {
    free: Vec<u32>,
    pending: Vec<PendingDeletion>,
    next_generation: u64,
}

/// Shared SA store
#[derive(Debug)]
pub struct SaStore {
    current: RwLock<Arc<SaTable>>,
    version: AtomicU64,
    control: Mutex<Control>,
    observed: Box<[AtomicU64]>,
}

impl SaStore {
    /// Create a store with `capacity` slots shared by `workers` workers
    pub fn new(capacity: usize, workers: usize) -> Self {
        let table = SaTable {
            version: 0,
            slots: vec![None; capacity],
        };

        SaStore {
            current: RwLock::new(Arc::new(table)),
            version: AtomicU64::new(0),
            control: Mutex::new(Control {
                free: (0..capacity as u32).rev().collect(),
                pending: Vec::new(),
                next_generation: 1,
            }),
            observed: (0..workers.max(1)).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    /// Create a store sized by the dataplane configuration
    pub fn from_config(config: &DataplaneConfig) -> Self {
        Self::new(config.sa_capacity, config.workers)
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.current.read().capacity()
    }

    /// Number of workers whose progress gates reclamation
    pub fn workers(&self) -> usize {
        self.observed.len()
    }

    /// Current table version
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Number of installed SAs
    pub fn len(&self) -> usize {
        self.current.read().slots.iter().flatten().count()
    }

    /// Check if no SA is installed
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deleted slots still waiting for every worker to move on
    pub fn pending_deletions(&self) -> usize {
        self.control.lock().pending.len()
    }

    /// Build the next table version under the control lock
    fn publish<F>(&self, update: F) -> u64
    where
        F: FnOnce(&mut Vec<Option<Arc<SecurityAssociation>>>),
    {
        let mut current = self.current.write();
        let mut slots = current.slots.clone();
        update(&mut slots);

        let version = current.version + 1;
        *current = Arc::new(SaTable { version, slots });
        self.version.store(version, Ordering::Release);
        version
    }

    /// Install an SA and return its index
    ///
    /// # Errors
    ///
    /// - `InvalidParameter` / `InvalidKeyLength` if the parameters are invalid
    /// - `InvalidParameter` if the owner worker does not exist
    /// - `StoreFull` if no slot is free
    pub fn add(&self, params: SaParams) -> Result<u32> {
        params.validate()?;
        self.check_owner(&params)?;

        let mut control = self.control.lock();
        let index = control
            .free
            .pop()
            .ok_or_else(|| Error::StoreFull(self.capacity()))?;
        let generation = control.next_generation;
        control.next_generation += 1;

        logging::log_sa_installed(index, &params);
        let sa = Arc::new(SecurityAssociation::new(index, generation, params));
        self.publish(|slots| slots[index as usize] = Some(sa));
        Ok(index)
    }

    /// Replace the SA at `index` with fresh parameters
    ///
    /// The new SA gets a new generation, a fresh sequence counter and byte
    /// counter, and is not degraded. Workers still running on an older
    /// snapshot finish their batch with the old keys.
    ///
    /// # Errors
    ///
    /// - `SaNotFound` if nothing is installed at `index`
    /// - parameter validation errors as for [`add`](Self::add)
    pub fn rekey(&self, index: u32, params: SaParams) -> Result<u64> {
        params.validate()?;
        self.check_owner(&params)?;

        let mut control = self.control.lock();
        if self.get(index).is_none() {
            return Err(Error::SaNotFound(index));
        }
        let generation = control.next_generation;
        control.next_generation += 1;

        logging::log_sa_rekeyed(index, params.spi, generation);
        let sa = Arc::new(SecurityAssociation::new(index, generation, params));
        self.publish(|slots| slots[index as usize] = Some(sa));
        Ok(generation)
    }

    /// Remove the SA at `index`
    ///
    /// The slot becomes reusable after [`reclaim`](Self::reclaim) has seen
    /// every worker pass the version published here.
    ///
    /// # Errors
    ///
    /// Returns `SaNotFound` if nothing is installed at `index`
    pub fn delete(&self, index: u32) -> Result<()> {
        let mut control = self.control.lock();
        let spi = self.get(index).ok_or(Error::SaNotFound(index))?.spi();

        let version = self.publish(|slots| slots[index as usize] = None);
        control.pending.push(PendingDeletion { index, version });
        logging::log_sa_deleted(index, spi, version);
        Ok(())
    }

    /// Return slots of deleted SAs to the free list once no worker can
    /// still be using them. Returns the number of slots freed.
    pub fn reclaim(&self) -> usize {
        let quiescent = self
            .observed
            .iter()
            .map(|v| v.load(Ordering::Acquire))
            .min()
            .unwrap_or(u64::MAX);

        let mut control = self.control.lock();
        let before = control.pending.len();
        let mut freed = Vec::new();
        control.pending.retain(|p| {
            if p.version <= quiescent {
                freed.push(p.index);
                false
            } else {
                true
            }
        });
        control.free.extend(freed);

        let count = before - control.pending.len();
        if count > 0 {
            logging::log_sa_reclaimed(count, quiescent);
        }
        count
    }

    /// SA currently installed at `index`
    pub fn get(&self, index: u32) -> Option<Arc<SecurityAssociation>> {
        self.current.read().get(index).cloned()
    }

    /// Counters of the SA at `index`
    pub fn stats(&self, index: u32) -> Option<SaStats> {
        self.get(index).map(|sa| sa.stats())
    }

    /// Check whether the SA at `index` has exhausted its sequence space
    pub fn is_degraded(&self, index: u32) -> bool {
        self.get(index).is_some_and(|sa| sa.is_degraded())
    }

    /// Latest published table
    pub fn snapshot(&self) -> Arc<SaTable> {
        Arc::clone(&self.current.read())
    }

    /// Bring `cached` up to date for `worker` and record that the worker
    /// has moved to its version. Returns true if the snapshot changed.
    ///
    /// Called at batch boundaries only. Holding `cached` across a batch
    /// keeps every SA it references alive until the next refresh.
    pub fn refresh(&self, worker: usize, cached: &mut Arc<SaTable>) -> bool {
        let changed = self.version.load(Ordering::Acquire) != cached.version;
        if changed {
            *cached = self.snapshot();
        }
        if let Some(observed) = self.observed.get(worker) {
            observed.store(cached.version, Ordering::Release);
        }
        changed
    }

    fn check_owner(&self, params: &SaParams) -> Result<()> {
        if params.owner_worker >= self.observed.len() {
            return Err(Error::InvalidParameter(format!(
                "owner_worker {} out of range ({} workers)",
                params.owner_worker,
                self.observed.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipsec::crypto::{CryptoAlg, IntegAlg};
    use std::thread;

    fn create_test_params(spi: u32) -> SaParams {
        SaParams::builder()
            .with_spi(spi)
            .with_crypto(CryptoAlg::AesCbc128, vec![0x11u8; 16])
            .with_integ(IntegAlg::HmacSha1_96, vec![0x22u8; 20])
            .with_transport()
            .build()
            .unwrap()
    }

    #[test]
    fn test_add_and_get() {
        let store = SaStore::new(4, 1);
        let index = store.add(create_test_params(0x1000)).unwrap();
        assert_eq!(index, 0);
        assert_eq!(store.get(index).unwrap().spi(), 0x1000);
        assert_eq!(store.len(), 1);
        assert_eq!(store.version(), 1);
        assert!(store.get(1).is_none());
    }

    #[test]
    fn test_store_full() {
        let store = SaStore::new(2, 1);
        store.add(create_test_params(1)).unwrap();
        store.add(create_test_params(2)).unwrap();
        assert_eq!(store.add(create_test_params(3)), Err(Error::StoreFull(2)));
    }

    #[test]
    fn test_add_rejects_unknown_owner() {
        let store = SaStore::new(2, 2);
        let mut params = create_test_params(1);
        params.owner_worker = 2;
        assert!(matches!(store.add(params), Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn test_rekey_resets_state() {
        let store = SaStore::new(4, 1);
        let index = store.add(create_test_params(0x1000)).unwrap();
        let old = store.get(index).unwrap();
        old.next_sequence().unwrap();
        old.add_bytes(64);

        let generation = store.rekey(index, create_test_params(0x1001)).unwrap();
        let new = store.get(index).unwrap();
        assert_eq!(new.generation(), generation);
        assert_ne!(new.generation(), old.generation());
        assert_eq!(new.spi(), 0x1001);
        assert_eq!(new.sequence(), 0);
        assert_eq!(new.bytes(), 0);

        // Old snapshot still usable
        assert_eq!(old.spi(), 0x1000);
    }

    #[test]
    fn test_rekey_missing() {
        let store = SaStore::new(4, 1);
        assert_eq!(
            store.rekey(3, create_test_params(1)),
            Err(Error::SaNotFound(3))
        );
    }

    #[test]
    fn test_delete_defers_reuse_until_workers_move_on() {
        let store = SaStore::new(1, 2);
        let mut w0 = store.snapshot();
        let mut w1 = store.snapshot();

        let index = store.add(create_test_params(1)).unwrap();
        store.refresh(0, &mut w0);
        store.refresh(1, &mut w1);
        assert!(w1.get(index).is_some());

        store.delete(index).unwrap();
        assert!(store.get(index).is_none());
        assert_eq!(store.delete(index), Err(Error::SaNotFound(index)));

        // Worker 1 still holds the old table
        store.refresh(0, &mut w0);
        assert_eq!(store.reclaim(), 0);
        assert!(matches!(
            store.add(create_test_params(2)),
            Err(Error::StoreFull(1))
        ));
        assert!(w1.get(index).is_some());

        store.refresh(1, &mut w1);
        assert!(w1.get(index).is_none());
        assert_eq!(store.reclaim(), 1);
        assert_eq!(store.pending_deletions(), 0);
        assert_eq!(store.add(create_test_params(2)).unwrap(), index);
    }

    #[test]
    fn test_generation_never_repeats_for_reused_slot() {
        let store = SaStore::new(1, 1);
        let mut table = store.snapshot();

        let index = store.add(create_test_params(1)).unwrap();
        let first = store.get(index).unwrap().generation();
        store.delete(index).unwrap();
        store.refresh(0, &mut table);
        store.reclaim();

        let again = store.add(create_test_params(2)).unwrap();
        assert_eq!(again, index);
        assert!(store.get(again).unwrap().generation() > first);
    }

    #[test]
    fn test_refresh_reports_change() {
        let store = SaStore::new(2, 1);
        let mut table = store.snapshot();
        assert!(!store.refresh(0, &mut table));
        store.add(create_test_params(1)).unwrap();
        assert!(store.refresh(0, &mut table));
        assert_eq!(table.version(), store.version());
    }

    #[test]
    fn test_degraded_and_stats() {
        let store = SaStore::new(2, 1);
        let mut params = create_test_params(1);
        params.initial_seq = u32::MAX as u64;
        let index = store.add(params).unwrap();

        assert!(!store.is_degraded(index));
        assert!(store.get(index).unwrap().next_sequence().is_err());
        assert!(store.is_degraded(index));
        assert!(store.stats(index).unwrap().degraded);

        store.rekey(index, create_test_params(1)).unwrap();
        assert!(!store.is_degraded(index));
    }

    #[test]
    fn test_concurrent_readers_during_updates() {
        let store = Arc::new(SaStore::new(8, 2));
        let index = store.add(create_test_params(0)).unwrap();

        let reader = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let mut table = store.snapshot();
                for _ in 0..1000 {
                    store.refresh(1, &mut table);
                    let sa = table.get(index).expect("slot stays installed");
                    assert_eq!(sa.index(), index);
                }
            })
        };

        for spi in 1..200 {
            store.rekey(index, create_test_params(spi)).unwrap();
        }
        reader.join().unwrap();
        assert_eq!(store.get(index).unwrap().spi(), 199);
    }
}
