//! Bounded pool of reusable detector instances.
//!
//! Each detector type has its own slot: a LIFO free list plus a live count
//! guarded by one mutex, and a condvar that wakes waiters when an instance
//! comes back. A slot never holds more than `max_per_type` live instances;
//! once that many are checked out, `acquire` waits up to the configured
//! timeout and then fails with [`AnalysisError::ResourceExhausted`].

use std::collections::BTreeMap;
use std::ops::Deref;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use crate::config::{DetectorsConfig, PoolConfig};
use crate::detectors::{Detector, DetectorKind};
use crate::error::AnalysisError;

/// Counters for one detector type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Instances that exist right now, idle or checked out.
    pub live: usize,
    /// Highest `live` value observed.
    pub peak_live: usize,
    /// Instances ever constructed, replacements included.
    pub created: usize,
    /// Poisoned instances discarded and replaced.
    pub replaced: usize,
    pub idle: usize,
}

#[derive(Debug, Default)]
struct SlotState {
    free: Vec<Detector>,
    live: usize,
    peak_live: usize,
    created: usize,
    replaced: usize,
}

#[derive(Debug, Default)]
struct Slot {
    state: Mutex<SlotState>,
    returned: Condvar,
}

/// Explicitly owned pool; one per analysis run.
#[derive(Debug)]
pub struct DetectorPool {
    slots: BTreeMap<DetectorKind, Slot>,
    detectors: DetectorsConfig,
    max_per_type: usize,
    acquire_timeout: Duration,
}

impl DetectorPool {
    pub fn new(detectors: &DetectorsConfig, pool: &PoolConfig) -> Self {
        Self::with_limits(
            detectors,
            pool.effective_max_per_type(),
            pool.acquire_timeout(),
        )
    }

    pub fn with_limits(
        detectors: &DetectorsConfig,
        max_per_type: usize,
        acquire_timeout: Duration,
    ) -> Self {
        let slots = DetectorKind::ALL
            .iter()
            .map(|&kind| (kind, Slot::default()))
            .collect();
        Self {
            slots,
            detectors: detectors.clone(),
            max_per_type: max_per_type.max(1),
            acquire_timeout,
        }
    }

    pub fn max_per_type(&self) -> usize {
        self.max_per_type
    }

    /// Check out a detector, constructing one if the type is under its
    /// bound, otherwise waiting for a release.
    pub fn acquire(&self, kind: DetectorKind) -> Result<PooledDetector<'_>, AnalysisError> {
        let slot = self.slot(kind);
        let started = Instant::now();
        let deadline = started + self.acquire_timeout;
        let mut state = slot.state.lock();

        loop {
            if let Some(detector) = state.free.pop() {
                return Ok(self.handle(kind, detector));
            }
            if state.live < self.max_per_type {
                state.live += 1;
                state.created += 1;
                state.peak_live = state.peak_live.max(state.live);
                drop(state);
                return Ok(self.handle(kind, Detector::new(kind, &self.detectors)));
            }
            if slot.returned.wait_until(&mut state, deadline).timed_out()
                && state.free.is_empty()
                && state.live >= self.max_per_type
            {
                tracing::warn!(detector = %kind, "detector pool exhausted");
                return Err(AnalysisError::ResourceExhausted {
                    kind,
                    waited: started.elapsed(),
                });
            }
        }
    }

    /// Return a detector to the pool. Equivalent to dropping the handle.
    pub fn release(&self, handle: PooledDetector<'_>) {
        drop(handle);
    }

    pub fn stats(&self, kind: DetectorKind) -> PoolStats {
        let state = self.slot(kind).state.lock();
        PoolStats {
            live: state.live,
            peak_live: state.peak_live,
            created: state.created,
            replaced: state.replaced,
            idle: state.free.len(),
        }
    }

    pub fn all_stats(&self) -> BTreeMap<DetectorKind, PoolStats> {
        DetectorKind::ALL
            .iter()
            .map(|&kind| (kind, self.stats(kind)))
            .collect()
    }

    fn slot(&self, kind: DetectorKind) -> &Slot {
        // Every kind gets a slot in `with_limits`.
        &self.slots[&kind]
    }

    fn handle(&self, kind: DetectorKind, detector: Detector) -> PooledDetector<'_> {
        PooledDetector {
            pool: self,
            kind,
            detector: Some(detector),
            poisoned: false,
        }
    }

    fn give_back(&self, kind: DetectorKind, detector: Detector, poisoned: bool) {
        let slot = self.slot(kind);
        let mut state = slot.state.lock();
        if poisoned {
            drop(detector);
            state.replaced += 1;
            state.created += 1;
            state.free.push(Detector::new(kind, &self.detectors));
            tracing::debug!(detector = %kind, "replaced faulted detector instance");
        } else {
            state.free.push(detector);
        }
        drop(state);
        slot.returned.notify_one();
    }
}

/// A checked-out detector. Dropping it returns the instance to its pool,
/// or a fresh replacement when it was marked poisoned.
#[derive(Debug)]
pub struct PooledDetector<'a> {
    pool: &'a DetectorPool,
    kind: DetectorKind,
    detector: Option<Detector>,
    poisoned: bool,
}

impl PooledDetector<'_> {
    pub fn kind(&self) -> DetectorKind {
        self.kind
    }

    /// Mark the instance as faulted so it is discarded on release.
    pub fn mark_poisoned(&mut self) {
        self.poisoned = true;
    }
}

impl Deref for PooledDetector<'_> {
    type Target = Detector;

    fn deref(&self) -> &Detector {
        match &self.detector {
            Some(detector) => detector,
            // Only taken in Drop.
            None => unreachable!("detector handle used after release"),
        }
    }
}

impl Drop for PooledDetector<'_> {
    fn drop(&mut self) {
        if let Some(detector) = self.detector.take() {
            self.pool.give_back(self.kind, detector, self.poisoned);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn pool(max: usize, timeout_ms: u64) -> DetectorPool {
        DetectorPool::with_limits(
            &DetectorsConfig::default(),
            max,
            Duration::from_millis(timeout_ms),
        )
    }

    #[test]
    fn test_reuses_released_instance() {
        let pool = pool(2, 50);
        let first = pool.acquire(DetectorKind::Position).unwrap();
        pool.release(first);
        let _second = pool.acquire(DetectorKind::Position).unwrap();
        let stats = pool.stats(DetectorKind::Position);
        assert_eq!(stats.created, 1);
        assert_eq!(stats.live, 1);
        assert_eq!(stats.idle, 0);
    }

    #[test]
    fn test_types_are_bounded_independently() {
        let pool = pool(1, 10);
        let _a = pool.acquire(DetectorKind::Position).unwrap();
        let _b = pool.acquire(DetectorKind::Meaning).unwrap();
        assert_eq!(pool.stats(DetectorKind::Position).live, 1);
        assert_eq!(pool.stats(DetectorKind::Meaning).live, 1);
    }

    #[test]
    fn test_exhausted_pool_times_out() {
        let pool = pool(1, 20);
        let _held = pool.acquire(DetectorKind::Timing).unwrap();
        let err = pool.acquire(DetectorKind::Timing).unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::ResourceExhausted {
                kind: DetectorKind::Timing,
                ..
            }
        ));
        assert_eq!(pool.stats(DetectorKind::Timing).live, 1);
    }

    #[test]
    fn test_poisoned_instance_is_replaced() {
        let pool = pool(1, 50);
        let mut handle = pool.acquire(DetectorKind::Values).unwrap();
        handle.mark_poisoned();
        drop(handle);
        let stats = pool.stats(DetectorKind::Values);
        assert_eq!(stats.replaced, 1);
        assert_eq!(stats.created, 2);
        assert_eq!(stats.live, 1, "replacement keeps the live count");
        assert_eq!(stats.idle, 1);
    }

    #[test]
    fn test_waiter_wakes_on_release() {
        let pool = Arc::new(pool(1, 2_000));
        let held = pool.acquire(DetectorKind::Execution).unwrap();
        let acquired = Arc::new(AtomicUsize::new(0));

        let waiter = {
            let pool = Arc::clone(&pool);
            let acquired = Arc::clone(&acquired);
            std::thread::spawn(move || {
                let _h = pool.acquire(DetectorKind::Execution).unwrap();
                acquired.fetch_add(1, Ordering::SeqCst);
            })
        };

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(acquired.load(Ordering::SeqCst), 0);
        drop(held);
        waiter.join().unwrap();
        assert_eq!(acquired.load(Ordering::SeqCst), 1);
        assert_eq!(pool.stats(DetectorKind::Execution).created, 1);
    }

    #[test]
    fn test_live_never_exceeds_bound_under_contention() {
        let pool = Arc::new(pool(4, 5_000));
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let handle = pool.acquire(DetectorKind::Algorithm).unwrap();
                        assert!(pool.stats(DetectorKind::Algorithm).live <= 4);
                        drop(handle);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        let stats = pool.stats(DetectorKind::Algorithm);
        assert!(stats.peak_live <= 4);
        assert!(stats.created <= 4);
    }
}
