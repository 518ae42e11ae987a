//! Wire-id keyed job cache.
//!
//! The chips echo a 7-bit job id with every nonce, so at most 128 jobs can
//! be told apart on the wire, and generations with small live-job windows
//! reuse ids long before 128 jobs have passed through. The cache is what
//! makes an echoed id meaningful: a slot holds the one job currently valid
//! for that id, or nothing.
//!
//! Lock discipline: critical sections only copy data. `get_clone` deep-copies
//! the job under the lock and releases it before returning, so verification
//! hashes against an immutable snapshot without ever holding the lock.

use parking_lot::Mutex;

use crate::job_source::MiningJob;

/// Number of distinguishable wire job ids.
pub const WIRE_ID_SPACE: usize = 128;

pub struct JobCache {
    slots: Mutex<Vec<Option<MiningJob>>>,
}

impl Default for JobCache {
    fn default() -> Self {
        Self::new()
    }
}

impl JobCache {
    pub fn new() -> Self {
        JobCache {
            slots: Mutex::new(vec![None; WIRE_ID_SPACE]),
        }
    }

    fn index(wire_id: u8) -> usize {
        usize::from(wire_id) % WIRE_ID_SPACE
    }

    /// Install `job` as the valid job for `wire_id`, superseding whatever
    /// held the slot before.
    pub fn put(&self, wire_id: u8, job: MiningJob) {
        self.slots.lock()[Self::index(wire_id)] = Some(job);
    }

    /// Snapshot the job currently valid for `wire_id`.
    ///
    /// `None` means the id is stale or was never issued; results carrying it
    /// must be dropped.
    pub fn get_clone(&self, wire_id: u8) -> Option<MiningJob> {
        self.slots.lock()[Self::index(wire_id)].clone()
    }

    /// Mark `wire_id` invalid ahead of reuse.
    pub fn invalidate(&self, wire_id: u8) {
        self.slots.lock()[Self::index(wire_id)] = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn job(tag: &str) -> MiningJob {
        MiningJob {
            version: 0x2000_0000,
            version_mask: 0x1fff_e000,
            prev_block_hash: [0; 32],
            prev_block_hash_be: [0; 32],
            merkle_root: [0; 32],
            merkle_root_be: [0; 32],
            ntime: 0x68d6_17dc,
            target: 0x1701_fa38,
            starting_nonce: 0,
            pool_diff: 512,
            asic_diff: 256,
            pool_id: 0,
            job_id: tag.to_string(),
            extranonce2: tag.to_string(),
        }
    }

    #[test]
    fn put_then_get_round_trips() {
        let cache = JobCache::new();
        cache.put(5, job("a"));
        assert_eq!(cache.get_clone(5).unwrap().job_id, "a");
        assert!(cache.get_clone(6).is_none());
    }

    #[test]
    fn put_supersedes_previous_occupant() {
        let cache = JobCache::new();
        cache.put(5, job("old"));
        cache.put(5, job("new"));
        assert_eq!(cache.get_clone(5).unwrap().job_id, "new");
    }

    #[test]
    fn stale_id_after_invalidation_reports_nothing() {
        // A reply tagged with id 5 arrives after the job that owned id 5 was
        // evicted. The cache must answer "nothing" (or the current occupant),
        // never the evicted job.
        let cache = JobCache::new();
        cache.put(5, job("evicted"));
        cache.invalidate(5);
        assert!(cache.get_clone(5).is_none());

        cache.put(5, job("current"));
        assert_eq!(cache.get_clone(5).unwrap().job_id, "current");
    }

    #[test]
    fn wire_ids_wrap_into_the_id_space() {
        let cache = JobCache::new();
        cache.put(130, job("wrapped"));
        assert_eq!(cache.get_clone(2).unwrap().job_id, "wrapped");
    }

    #[test]
    fn concurrent_overwrite_and_clone_never_tears() {
        // Producer rewrites slot 7 while a reader clones it in a tight loop.
        // Every clone must be one job or the other, never a mix; the tag is
        // duplicated in two fields so tearing would be visible.
        let cache = Arc::new(JobCache::new());

        let writer = {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                for i in 0..10_000u32 {
                    cache.put(7, job(&format!("gen-{i}")));
                }
            })
        };
        let reader = {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                let mut seen = 0u32;
                while seen < 10_000 {
                    if let Some(snapshot) = cache.get_clone(7) {
                        assert_eq!(snapshot.job_id, snapshot.extranonce2);
                        seen += 1;
                    }
                }
            })
        };

        writer.join().unwrap();
        reader.join().unwrap();
    }
}
