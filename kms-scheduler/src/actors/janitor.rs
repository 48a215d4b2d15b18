//! Janitor (4.5): the Dispatcher's mirror image. Scans forward over time
//! keys but descending over sequence within each, trailing the Dispatcher's
//! checkpoint by a configured offset, and deletes entries once they are
//! safely behind delivery.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use kms_common::latch::Latch;
use kms_common::now_unix_seconds;
use kms_common::KillSwitch;
use tokio::sync::Notify;
use tracing::{error, info, info_span, warn, Instrument};

use crate::actors::checkpoint::Checkpoint;
use crate::location::{TTLocation, PT};
use crate::observer::Observer;
use crate::timetable::Timetable;
use crate::worker::Worker;

const WAIT_EMPTY_POLL: Duration = Duration::from_secs(1);
const PENDING_REMOVALS_CAPACITY: usize = 1024;

pub struct Janitor {
    partition: u32,
    timetable: std::sync::Arc<Timetable>,
    checkpoint: std::sync::Arc<Checkpoint>,
    observer: std::sync::Arc<dyn Observer>,
    kill_switch: KillSwitch,
    pause: Latch,
    highwater_offset_seconds: i64,
    checkpoint_interval: Duration,
    clean_interval: Duration,
    /// No lookback default is specified for the Janitor; nothing earlier
    /// than the Dispatcher's own rewind window could have been scanned, so
    /// the Janitor reuses the same `lookback_days` for its first-run start.
    lookback_seconds: i64,
    last_location: Mutex<Option<TTLocation>>,
    unacked_removals: Mutex<HashSet<TTLocation>>,
    empty_notify: Notify,
    pending_tx: flume::Sender<TTLocation>,
    pending_rx: flume::Receiver<TTLocation>,
}

impl Janitor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        partition: u32,
        timetable: std::sync::Arc<Timetable>,
        checkpoint: std::sync::Arc<Checkpoint>,
        observer: std::sync::Arc<dyn Observer>,
        kill_switch: KillSwitch,
        highwater_offset_seconds: i64,
        checkpoint_interval: Duration,
        clean_interval: Duration,
        lookback_days: u32,
    ) -> std::sync::Arc<Self> {
        let (pending_tx, pending_rx) = flume::bounded(PENDING_REMOVALS_CAPACITY);
        std::sync::Arc::new(Janitor {
            partition,
            timetable,
            checkpoint,
            observer,
            kill_switch,
            pause: Latch::new(false),
            highwater_offset_seconds,
            checkpoint_interval,
            clean_interval,
            lookback_seconds: i64::from(lookback_days) * 86_400,
            last_location: Mutex::new(None),
            unacked_removals: Mutex::new(HashSet::new()),
            empty_notify: Notify::new(),
            pending_tx,
            pending_rx,
        })
    }

    fn pt(&self) -> PT {
        PT::janitor(self.partition)
    }

    pub fn partition(&self) -> u32 {
        self.partition
    }

    pub fn pause(&self) {
        self.pause.set();
        info!(partition = self.partition, "janitor paused");
    }

    pub fn resume(&self) {
        self.pause.clear();
        info!(partition = self.partition, "janitor resumed");
    }

    fn span(&self) -> tracing::Span {
        info_span!("janitor", partition = self.partition)
    }

    pub fn spawn(self: &std::sync::Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        info!(partition = self.partition, "janitor starting");
        let span = self.span();
        vec![
            tokio::spawn(self.clone().run_scan_loop().instrument(span.clone())),
            tokio::spawn(self.clone().run_removal_loop().instrument(span.clone())),
            tokio::spawn(self.clone().run_periodic_checkpoint().instrument(span)),
        ]
    }

    async fn cancellable<F: std::future::Future<Output = ()>>(&self, future: F) -> bool {
        tokio::select! {
            _ = future => false,
            _ = self.kill_switch.cancelled() => true,
        }
    }

    /// `dispatcher_checkpoint(partition).time_key - offset - 1`, per the
    /// Janitor's highwater rule (the extra `-1` is specified literally, not
    /// an off-by-one: it buys an extra second of safety margin). Returns
    /// `None` while no Dispatcher checkpoint exists yet, in which case the
    /// caller waits on `dispatcher_checkpointed`.
    fn highwater_time_key(&self) -> anyhow::Result<Option<i64>> {
        let recorded = self.checkpoint.dispatcher_checkpoint(self.partition)?;
        Ok(recorded.map(|cp| cp.time_key - self.highwater_offset_seconds - 1))
    }

    async fn run_scan_loop(self: std::sync::Arc<Self>) {
        let default_start = TTLocation::new(
            self.partition,
            now_unix_seconds() - self.lookback_seconds,
            TTLocation::COUNTER_SEQUENCE,
        );
        let resume_from = match self.checkpoint.get(self.pt(), default_start) {
            Ok(loc) => loc,
            Err(error) => {
                error!(partition = self.partition, %error, "failed to read janitor checkpoint");
                return;
            }
        };
        let mut t = resume_from.time_key;

        loop {
            if self.kill_switch.is_dead() {
                return;
            }
            if self.cancellable(self.pause.wait_until_clear()).await {
                return;
            }

            let highwater_time_key = match self.highwater_time_key() {
                Ok(Some(hw)) => hw,
                Ok(None) => {
                    if self
                        .cancellable(self.checkpoint.wait_for_dispatcher_checkpointed())
                        .await
                    {
                        return;
                    }
                    continue;
                }
                Err(error) => {
                    error!(partition = self.partition, %error, "failed to compute janitor highwater");
                    return;
                }
            };

            while t <= highwater_time_key {
                if self.kill_switch.is_dead() {
                    return;
                }
                let count = match self.timetable.counter(self.partition, t) {
                    Ok(count) => count,
                    Err(error) => {
                        error!(partition = self.partition, time_key = t, %error, "janitor scan failed reading counter");
                        return;
                    }
                };
                let mut seq = count as i32 - 1;
                while seq >= 0 {
                    let loc = TTLocation::new(self.partition, t, seq);
                    if self.cancellable(async {
                        let _ = self.pending_tx.send_async(loc).await;
                    })
                    .await
                    {
                        return;
                    }
                    seq -= 1;
                }
                let counter_loc = TTLocation::counter(self.partition, t);
                if self.cancellable(async {
                    let _ = self.pending_tx.send_async(counter_loc).await;
                })
                .await
                {
                    return;
                }
                t += 1;
                tokio::task::yield_now().await;
            }

            if self.cancellable(tokio::time::sleep(self.clean_interval)).await {
                return;
            }
        }
    }

    async fn run_removal_loop(self: std::sync::Arc<Self>) {
        let mut prev: Option<TTLocation> = None;
        loop {
            let received = tokio::select! {
                item = self.pending_rx.recv_async() => item,
                _ = self.kill_switch.cancelled() => return,
            };
            let Ok(loc) = received else {
                return;
            };

            self.unacked_removals.lock().unwrap().insert(loc);
            let result = self.timetable.delete(loc);
            self.unacked_removals.lock().unwrap().remove(&loc);

            match result {
                Ok(()) => {
                    self.observer.record_removed(loc);
                    let should_advance = match prev {
                        None => true,
                        Some(previous) => {
                            loc.time_key > previous.time_key
                                || (loc.time_key == previous.time_key && loc.sequence < previous.sequence)
                        }
                    };
                    if should_advance {
                        self.checkpoint.update(self.pt(), loc);
                        prev = Some(loc);
                    }
                    *self.last_location.lock().unwrap() = Some(loc);
                }
                Err(error) => {
                    warn!(partition = self.partition, %loc, %error, "janitor removal failed, checkpoint not advanced");
                }
            }
            self.empty_notify.notify_waiters();
        }
    }

    async fn run_periodic_checkpoint(self: std::sync::Arc<Self>) {
        loop {
            if self.cancellable(tokio::time::sleep(self.checkpoint_interval)).await {
                return;
            }
            if let Some(loc) = *self.last_location.lock().unwrap() {
                self.checkpoint.update(self.pt(), loc);
            }
        }
    }

    pub async fn wait_empty(&self, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut iterations: u64 = 0;
        loop {
            if self.unacked_removals.lock().unwrap().is_empty() {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                let remaining = self.unacked_removals.lock().unwrap().len();
                warn!(partition = self.partition, remaining, "janitor wait_empty timed out");
                return;
            }
            iterations += 1;
            if iterations % 10 == 0 {
                let remaining = self.unacked_removals.lock().unwrap().len();
                info!(partition = self.partition, remaining, "waiting for in-flight removals to drain");
            }
            let remaining_time = deadline.saturating_duration_since(tokio::time::Instant::now());
            tokio::select! {
                _ = self.empty_notify.notified() => {}
                _ = tokio::time::sleep(WAIT_EMPTY_POLL.min(remaining_time)) => {}
            }
        }
    }
}

#[async_trait]
impl Worker for Janitor {
    fn partition(&self) -> u32 {
        Janitor::partition(self)
    }

    fn start(self: std::sync::Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        Janitor::spawn(&self)
    }

    fn pause(&self) {
        Janitor::pause(self)
    }

    fn resume(&self) {
        Janitor::resume(self)
    }

    async fn wait_empty(&self, timeout: Duration) {
        Janitor::wait_empty(self, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::NoopObserver;
    use crate::record::MessageRecord;
    use kms_store::MemStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn removes_a_record_once_behind_the_dispatcher_checkpoint() {
        let timetable = Arc::new(Timetable::new(Arc::new(MemStore::new())));
        let checkpoint = Checkpoint::new(timetable.clone(), Duration::from_millis(50), Arc::new(NoopObserver));

        let time_key = now_unix_seconds() - 20_000;
        let loc = timetable
            .append(0, time_key, &MessageRecord::new(None, None, vec![], "orders".into()))
            .unwrap();
        // Pin the Janitor's resume point at `time_key` and the Dispatcher
        // checkpoint just past it, so the scan covers exactly one time key
        // instead of the whole lookback window.
        checkpoint.update(PT::janitor(0), TTLocation::new(0, time_key - 1, TTLocation::COUNTER_SEQUENCE));
        checkpoint.update(PT::dispatcher(0), TTLocation::new(0, time_key + 1, -1));

        let janitor = Janitor::new(
            0,
            timetable.clone(),
            checkpoint,
            Arc::new(NoopObserver),
            KillSwitch::new(),
            0,
            Duration::from_secs(10),
            Duration::from_millis(50),
            1,
        );
        let handles = janitor.spawn();

        let removed = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if timetable.get_record(loc).unwrap().is_none() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        assert!(removed.is_ok(), "janitor should have removed the stale record");

        for handle in handles {
            handle.abort();
        }
    }
}
