//! Monitor hooks: observation points with no semantics of their own. Passed
//! explicitly to every worker rather than reached through a process-wide
//! metrics singleton, so a test can attach a `CountingObserver` to one
//! worker without perturbing any other.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::location::{TTLocation, PT};

/// Observation points a worker calls out on, none of which affect control
/// flow. Default bodies are no-ops so an implementor only needs to override
/// the hooks it cares about.
pub trait Observer: Send + Sync + 'static {
    fn instant_send(&self, _partition: u32) {}

    fn record_scheduled(&self, _loc: TTLocation) {}

    fn record_delivered(&self, _loc: TTLocation) {}

    fn record_removed(&self, _loc: TTLocation) {}

    fn checkpoint_advanced(&self, _pt: PT, _loc: TTLocation) {}

    fn dlq_written(&self, _partition: u32) {}
}

/// The default observer: every hook is a no-op.
#[derive(Default, Clone, Copy)]
pub struct NoopObserver;

impl Observer for NoopObserver {}

/// Test-only observer that tallies each hook so assertions can check what
/// actually happened without scraping logs.
#[derive(Default)]
pub struct CountingObserver {
    pub instant_sends: AtomicU64,
    pub scheduled: AtomicU64,
    pub delivered: AtomicU64,
    pub removed: AtomicU64,
    pub checkpoints_advanced: AtomicU64,
    pub dlq_writes: AtomicU64,
}

impl Observer for CountingObserver {
    fn instant_send(&self, _partition: u32) {
        self.instant_sends.fetch_add(1, Ordering::Relaxed);
    }

    fn record_scheduled(&self, _loc: TTLocation) {
        self.scheduled.fetch_add(1, Ordering::Relaxed);
    }

    fn record_delivered(&self, _loc: TTLocation) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    fn record_removed(&self, _loc: TTLocation) {
        self.removed.fetch_add(1, Ordering::Relaxed);
    }

    fn checkpoint_advanced(&self, _pt: PT, _loc: TTLocation) {
        self.checkpoints_advanced.fetch_add(1, Ordering::Relaxed);
    }

    fn dlq_written(&self, _partition: u32) {
        self.dlq_writes.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn counting_observer_tallies_each_hook_independently() {
        let observer = CountingObserver::default();
        observer.instant_send(0);
        observer.instant_send(0);
        observer.record_delivered(TTLocation::new(0, 1, 0));
        assert_eq!(observer.instant_sends.load(Ordering::Relaxed), 2);
        assert_eq!(observer.delivered.load(Ordering::Relaxed), 1);
        assert_eq!(observer.scheduled.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn noop_observer_accepts_every_hook() {
        let observer = NoopObserver;
        observer.instant_send(0);
        observer.record_scheduled(TTLocation::new(0, 1, 0));
        observer.checkpoint_advanced(PT::dispatcher(0), TTLocation::new(0, 1, 0));
    }
}
