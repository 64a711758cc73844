//! The concurrency core: a bounded worker pool that durably commits
//! [`SubstrateBatch`]es, grounded on a classic bounded-channel-with-N-consumers
//! design (`spec.md` §4.7, §9 "do not translate the pattern as mutex-free
//! shared-state concurrency; model it as a bounded channel with N
//! consumers"). Workers are plain OS threads, not async tasks; there is
//! no tokio runtime anywhere in this crate.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use substrate_core::SubstrateBatch;
use substrate_store::{StoreError, SubstrateStore};

/// Tunables surfaced as `flusher.*` configuration keys (`spec.md` §6).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlusherConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub deadlock_retries: u32,
}

impl Default for FlusherConfig {
    fn default() -> Self {
        FlusherConfig {
            workers: 3,
            queue_capacity: 16,
            deadlock_retries: 4,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FlusherError {
    #[error("failed to acquire a store connection for flusher worker {worker}: {source}")]
    StoreUnavailable {
        worker: usize,
        #[source]
        source: StoreError,
    },
}

/// Running totals a caller can poll for failure visibility: the
/// "separate diagnostic channel" `spec.md` §7 assigns to batch outcomes
/// that are deliberately not reflected in `ingest_*`'s return value.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlusherStats {
    pub committed: u64,
    pub dropped: u64,
}

struct Shared {
    queue: Mutex<VecDeque<SubstrateBatch>>,
    not_empty: Condvar,
    not_full: Condvar,
    idle: Condvar,
    stop: AtomicBool,
    busy: AtomicUsize,
    capacity: usize,
    committed: AtomicU64,
    dropped: AtomicU64,
}

/// A running pool of worker threads, each owning its own store handle.
/// Dropping a `Flusher` (or calling [`Flusher::shutdown`] explicitly)
/// stops accepting new work, drains in-flight batches, and joins every
/// worker thread. No thread is ever leaked.
pub struct Flusher {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Flusher {
    /// Spawn `config.workers` threads, each calling `open_store` once to
    /// acquire its private connection. A failure to open any worker's
    /// connection is the one fatal error this crate surfaces to the
    /// caller (`spec.md` §7, "Fatal"); no threads are left running in
    /// that case.
    pub fn start<S, F>(config: FlusherConfig, open_store: F) -> Result<Self, FlusherError>
    where
        S: SubstrateStore + Send + 'static,
        F: Fn() -> Result<S, StoreError>,
    {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            idle: Condvar::new(),
            stop: AtomicBool::new(false),
            busy: AtomicUsize::new(0),
            capacity: config.queue_capacity,
            committed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        });

        let mut workers = Vec::with_capacity(config.workers);
        for worker in 0..config.workers {
            let store = open_store().map_err(|source| FlusherError::StoreUnavailable { worker, source })?;
            let shared = Arc::clone(&shared);
            let retries = config.deadlock_retries;
            let handle = thread::Builder::new()
                .name(format!("substrate-flusher-{worker}"))
                .spawn(move || worker_loop(shared, store, retries))
                .expect("failed to spawn flusher worker thread");
            workers.push(handle);
        }

        Ok(Flusher {
            shared,
            workers: Mutex::new(workers),
        })
    }

    /// Hand a batch to the pool. Blocks while the queue already holds
    /// `queue_capacity` batches; this is the backpressure mechanism that
    /// keeps memory bounded under a fast producer. An empty batch (an empty
    /// document's yield) is silently dropped rather than enqueued
    /// (`spec.md` §7, "empty document").
    pub fn enqueue(&self, batch: SubstrateBatch) {
        if batch.is_empty() {
            return;
        }
        let mut queue = self.shared.queue.lock().unwrap_or_else(|p| p.into_inner());
        while queue.len() >= self.shared.capacity && !self.shared.stop.load(Ordering::Acquire) {
            queue = self
                .shared
                .not_full
                .wait(queue)
                .unwrap_or_else(|p| p.into_inner());
        }
        if self.shared.stop.load(Ordering::Acquire) {
            return;
        }
        queue.push_back(batch);
        self.shared.not_empty.notify_one();
    }

    /// Block until the queue is empty and no worker is mid-commit. Does
    /// not stop the pool; more work can be enqueued afterward.
    pub fn wait_all(&self) {
        let mut queue = self.shared.queue.lock().unwrap_or_else(|p| p.into_inner());
        while !(queue.is_empty() && self.shared.busy.load(Ordering::Acquire) == 0) {
            queue = self
                .shared
                .idle
                .wait(queue)
                .unwrap_or_else(|p| p.into_inner());
        }
    }

    /// Signal stop, wake every worker, and join them. Safe to call more
    /// than once (idempotent) and safe to let `Drop` call implicitly.
    pub fn shutdown(&self) {
        self.shared.stop.store(true, Ordering::Release);
        self.shared.not_empty.notify_all();
        self.shared.not_full.notify_all();
        let mut handles = self.workers.lock().unwrap_or_else(|p| p.into_inner());
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
    }

    pub fn stats(&self) -> FlusherStats {
        FlusherStats {
            committed: self.shared.committed.load(Ordering::Acquire),
            dropped: self.shared.dropped.load(Ordering::Acquire),
        }
    }

    pub fn queue_len(&self) -> usize {
        self.shared
            .queue
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .len()
    }
}

impl Drop for Flusher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop<S: SubstrateStore>(shared: Arc<Shared>, store: S, max_retries: u32) {
    loop {
        let batch = {
            let mut queue = shared.queue.lock().unwrap_or_else(|p| p.into_inner());
            loop {
                if let Some(batch) = queue.pop_front() {
                    shared.not_full.notify_one();
                    break batch;
                }
                if shared.stop.load(Ordering::Acquire) {
                    return;
                }
                queue = shared.not_empty.wait(queue).unwrap_or_else(|p| p.into_inner());
            }
        };

        shared.busy.fetch_add(1, Ordering::AcqRel);
        if commit_with_retries(&store, &batch, max_retries) {
            shared.committed.fetch_add(1, Ordering::Relaxed);
        } else {
            shared.dropped.fetch_add(1, Ordering::Relaxed);
        }
        shared.busy.fetch_sub(1, Ordering::AcqRel);

        let queue = shared.queue.lock().unwrap_or_else(|p| p.into_inner());
        if queue.is_empty() && shared.busy.load(Ordering::Acquire) == 0 {
            shared.idle.notify_all();
        }
    }
}

/// Commit `batch`, retrying whole-transaction on deadlock text matches
/// with randomized exponential backoff (`spec.md` §4.7 step 6, §9:
/// "deadlock retries must re-serialize the entire transaction"). Returns
/// `true` if the batch was ultimately committed, `false` if it was
/// dropped after a non-deadlock error or retry exhaustion. Either way
/// the pool keeps running.
fn commit_with_retries<S: SubstrateStore>(store: &S, batch: &SubstrateBatch, max_retries: u32) -> bool {
    let mut retry = 0u32;
    loop {
        match store.write_batch(batch) {
            Ok(()) => return true,
            Err(err) => {
                let is_deadlock = err.to_string().to_lowercase().contains("deadlock");
                if is_deadlock && retry < max_retries {
                    let base_ms = 20u64 * 2u64.saturating_pow(retry);
                    let jitter = fastrand::u64(0..=base_ms);
                    thread::sleep(Duration::from_millis(base_ms + jitter));
                    retry += 1;
                    continue;
                }
                tracing::error!(error = %err, retry, "dropping batch after store failure");
                return false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;
    use substrate_core::CompositionRecord;
    use substrate_hash::Hash128;

    #[derive(Clone)]
    struct CountingStore {
        calls: Arc<StdAtomicUsize>,
    }

    impl SubstrateStore for CountingStore {
        fn write_batch(&self, _batch: &SubstrateBatch) -> Result<(), StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn batch_with_one_composition() -> SubstrateBatch {
        let mut batch = SubstrateBatch::new();
        batch.compositions.push(CompositionRecord {
            comp_id: Hash128::digest(b"a"),
            phys_id: Hash128::digest(b"b"),
        });
        batch
    }

    #[test]
    fn enqueue_and_wait_all_drains_the_queue() {
        let calls = Arc::new(StdAtomicUsize::new(0));
        let calls_for_factory = Arc::clone(&calls);
        let flusher = Flusher::start(FlusherConfig { workers: 2, queue_capacity: 4, deadlock_retries: 1 }, move || {
            Ok::<_, StoreError>(CountingStore { calls: Arc::clone(&calls_for_factory) })
        })
        .unwrap();

        for _ in 0..10 {
            flusher.enqueue(batch_with_one_composition());
        }
        flusher.wait_all();
        assert_eq!(calls.load(Ordering::SeqCst), 10);
        assert_eq!(flusher.stats().committed, 10);
    }

    #[test]
    fn empty_batch_is_not_enqueued() {
        let calls = Arc::new(StdAtomicUsize::new(0));
        let calls_for_factory = Arc::clone(&calls);
        let flusher = Flusher::start(FlusherConfig::default(), move || {
            Ok::<_, StoreError>(CountingStore { calls: Arc::clone(&calls_for_factory) })
        })
        .unwrap();

        flusher.enqueue(SubstrateBatch::new());
        flusher.wait_all();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn enqueue_after_shutdown_is_ignored() {
        let calls = Arc::new(StdAtomicUsize::new(0));
        let calls_for_factory = Arc::clone(&calls);
        let flusher = Flusher::start(FlusherConfig::default(), move || {
            Ok::<_, StoreError>(CountingStore { calls: Arc::clone(&calls_for_factory) })
        })
        .unwrap();

        flusher.shutdown();
        flusher.enqueue(batch_with_one_composition());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(flusher.queue_len(), 0);
    }

    #[test]
    fn shutdown_is_idempotent_and_joins_workers() {
        let flusher = Flusher::start(FlusherConfig::default(), || {
            Ok::<_, StoreError>(CountingStore { calls: Arc::new(StdAtomicUsize::new(0)) })
        })
        .unwrap();
        flusher.shutdown();
        flusher.shutdown();
    }

    #[test]
    fn store_factory_failure_is_surfaced_and_no_workers_leak() {
        let result = Flusher::start(FlusherConfig::default(), || {
            Err::<CountingStore, _>(StoreError::Backend("connection refused".into()))
        });
        assert!(result.is_err());
    }

    #[derive(Clone)]
    struct FlakyStore {
        fail_times: Arc<StdAtomicUsize>,
        calls: Arc<StdAtomicUsize>,
    }

    impl SubstrateStore for FlakyStore {
        fn write_batch(&self, _batch: &SubstrateBatch) -> Result<(), StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.fail_times.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_times.fetch_sub(1, Ordering::SeqCst);
                return Err(StoreError::Backend("deadlock detected".into()));
            }
            Ok(())
        }
    }

    #[test]
    fn commit_with_retries_recovers_from_transient_deadlocks() {
        let store = FlakyStore {
            fail_times: Arc::new(StdAtomicUsize::new(2)),
            calls: Arc::new(StdAtomicUsize::new(0)),
        };
        let committed = commit_with_retries(&store, &batch_with_one_composition(), 4);
        assert!(committed);
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn commit_with_retries_drops_after_exhausting_retries() {
        let store = FlakyStore {
            fail_times: Arc::new(StdAtomicUsize::new(10)),
            calls: Arc::new(StdAtomicUsize::new(0)),
        };
        let committed = commit_with_retries(&store, &batch_with_one_composition(), 2);
        assert!(!committed);
        // Initial attempt plus 2 retries.
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn commit_with_retries_does_not_retry_non_deadlock_errors() {
        let store_calls = Arc::new(StdAtomicUsize::new(0));

        struct AlwaysCorrupt {
            calls: Arc<StdAtomicUsize>,
        }
        impl SubstrateStore for AlwaysCorrupt {
            fn write_batch(&self, _batch: &SubstrateBatch) -> Result<(), StoreError> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::CorruptRow("bad encoding".into()))
            }
        }

        let store = AlwaysCorrupt { calls: Arc::clone(&store_calls) };
        let committed = commit_with_retries(&store, &batch_with_one_composition(), 4);
        assert!(!committed);
        assert_eq!(store_calls.load(Ordering::SeqCst), 1);
    }
}
