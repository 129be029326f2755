//! Hardware pool admission control.
//!
//! Fixed-function encoder blocks support only N simultaneous sessions;
//! exceeding that corrupts or rejects encodes at the driver level, so
//! admission control happens here, before the backend is ever invoked.
//!
//! Misusing a pool (double-acquire, release-without-acquire, acquire over
//! capacity) is a scheduler bug, not a runtime condition, and panics.

use encodeq_config::PoolConfig;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Named resource with a fixed concurrent-slot count.
#[derive(Debug)]
pub struct HardwarePool {
    name: String,
    slot_count: usize,
    holders: HashSet<String>,
}

impl HardwarePool {
    pub fn new(name: impl Into<String>, slot_count: usize) -> Self {
        Self {
            name: name.into(),
            slot_count,
            holders: HashSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    pub fn holder_count(&self) -> usize {
        self.holders.len()
    }

    /// Whether a free slot exists.
    pub fn can_acquire(&self) -> bool {
        self.holders.len() < self.slot_count
    }

    /// Grant a slot to the job.
    ///
    /// # Panics
    /// Panics if the pool is full or the job already holds a slot here.
    pub fn acquire(&mut self, job_id: &str) {
        assert!(
            self.holders.len() < self.slot_count,
            "pool '{}' over capacity: {} slots, acquire for job {}",
            self.name,
            self.slot_count,
            job_id
        );
        assert!(
            self.holders.insert(job_id.to_string()),
            "pool '{}': job {} acquired a slot it already holds",
            self.name,
            job_id
        );
    }

    /// Return the job's slot.
    ///
    /// # Panics
    /// Panics if the job holds no slot in this pool.
    pub fn release(&mut self, job_id: &str) {
        assert!(
            self.holders.remove(job_id),
            "pool '{}': release for job {} which holds no slot",
            self.name,
            job_id
        );
    }

    pub fn holds(&self, job_id: &str) -> bool {
        self.holders.contains(job_id)
    }
}

/// Owns every named pool behind one lock so that a job needing several
/// pools (encoder + decoder) is admitted or deferred atomically.
#[derive(Debug)]
pub struct ResourceAllocator {
    pools: Mutex<HashMap<String, HardwarePool>>,
}

impl ResourceAllocator {
    pub fn new(configs: &[PoolConfig]) -> Self {
        let pools = configs
            .iter()
            .map(|c| {
                (
                    c.name.clone(),
                    HardwarePool::new(c.name.clone(), c.slots as usize),
                )
            })
            .collect();
        Self {
            pools: Mutex::new(pools),
        }
    }

    /// Whether every named pool has a free slot. Unknown pool names count
    /// as available: a job can only require pools that exist in config,
    /// and requiring none means no admission control.
    pub fn can_acquire_all(&self, names: &[String]) -> bool {
        let pools = self.pools.lock().expect("allocator lock poisoned");
        names
            .iter()
            .all(|n| pools.get(n).map_or(true, HardwarePool::can_acquire))
    }

    /// Acquire a slot in every named pool for the job, or none at all.
    /// Returns false (acquiring nothing) when any pool is full.
    pub fn try_acquire_all(&self, names: &[String], job_id: &str) -> bool {
        let mut pools = self.pools.lock().expect("allocator lock poisoned");

        let all_free = names
            .iter()
            .all(|n| pools.get(n).map_or(true, HardwarePool::can_acquire));
        if !all_free {
            return false;
        }

        for name in names {
            if let Some(pool) = pools.get_mut(name) {
                pool.acquire(job_id);
            }
        }
        true
    }

    /// Release the job's slot in every named pool.
    ///
    /// # Panics
    /// Panics if the job holds no slot in one of the named pools.
    pub fn release_all(&self, names: &[String], job_id: &str) {
        let mut pools = self.pools.lock().expect("allocator lock poisoned");
        for name in names {
            if let Some(pool) = pools.get_mut(name) {
                pool.release(job_id);
            }
        }
    }

    /// Snapshot of (name, holders, slots) for the status surface.
    pub fn usage(&self) -> Vec<(String, usize, usize)> {
        let pools = self.pools.lock().expect("allocator lock poisoned");
        let mut usage: Vec<_> = pools
            .values()
            .map(|p| (p.name().to_string(), p.holder_count(), p.slot_count()))
            .collect();
        usage.sort();
        usage
    }
}
