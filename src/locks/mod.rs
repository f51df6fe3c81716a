// backuptool/src/locks/mod.rs
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// Who holds a job's lock, and since when.
#[derive(Debug, Clone)]
pub struct LockHolder {
    pub holder_id: Uuid,
    pub acquired_at: DateTime<Utc>,
}

/// Process-local lock table keyed by job name. Guarantees at-most-one
/// concurrent run per job on this host; independent jobs never contend.
#[derive(Default)]
pub struct LockTable {
    held: Mutex<HashMap<String, LockHolder>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-blocking check-and-set. `None` means another run of this job
    /// already holds the lock; the caller skips, it never queues.
    pub fn acquire(&self, job_name: &str) -> Option<LockGuard<'_>> {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if held.contains_key(job_name) {
            return None;
        }
        let holder = LockHolder {
            holder_id: Uuid::new_v4(),
            acquired_at: Utc::now(),
        };
        let holder_id = holder.holder_id;
        held.insert(job_name.to_string(), holder);
        Some(LockGuard {
            table: self,
            job_name: job_name.to_string(),
            holder_id,
        })
    }

    /// Snapshot of the current holder, if any. For reporting; the answer can
    /// be stale by the time the caller looks at it.
    pub fn holder(&self, job_name: &str) -> Option<LockHolder> {
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(job_name)
            .cloned()
    }

    fn release(&self, job_name: &str) {
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(job_name);
    }
}

/// Scoped hold on one job name. Dropping the guard releases the lock, so
/// every exit path of a run — success, error, panic unwind — frees it.
pub struct LockGuard<'a> {
    table: &'a LockTable,
    job_name: String,
    holder_id: Uuid,
}

impl LockGuard<'_> {
    pub fn holder_id(&self) -> Uuid {
        self.holder_id
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.table.release(&self.job_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_acquire_then_release_on_drop() {
        let table = LockTable::new();
        {
            let _guard = table.acquire("job-a").expect("first acquire succeeds");
            assert!(table.acquire("job-a").is_none());
        }
        // Dropping the guard freed the name.
        assert!(table.acquire("job-a").is_some());
    }

    #[test]
    fn test_independent_job_names_do_not_contend() {
        let table = LockTable::new();
        let _a = table.acquire("job-a").expect("job-a acquires");
        let _b = table.acquire("job-b").expect("job-b acquires");
        assert!(table.acquire("job-a").is_none());
        assert!(table.acquire("job-b").is_none());
    }

    #[test]
    fn test_concurrent_acquires_yield_exactly_one_winner() {
        let table = Arc::new(LockTable::new());
        let barrier = Arc::new(Barrier::new(8));
        let wins = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = Arc::clone(&table);
                let barrier = Arc::clone(&barrier);
                let wins = Arc::clone(&wins);
                std::thread::spawn(move || {
                    barrier.wait();
                    let guard = table.acquire("contended");
                    if guard.is_some() {
                        wins.fetch_add(1, Ordering::SeqCst);
                    }
                    // Nobody releases until every thread has attempted.
                    barrier.wait();
                    drop(guard);
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread completes");
        }

        assert_eq!(wins.load(Ordering::SeqCst), 1);
        assert!(table.acquire("contended").is_some());
    }
}
