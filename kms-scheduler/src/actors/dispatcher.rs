//! Dispatcher (4.4): per-partition worker that scans the Timetable forward
//! from its checkpoint, enqueues due records, and delivers them to their
//! destination topic. Its three concurrent loops (scan, delivery, periodic
//! checkpoint) cooperate through a pause latch and a kill switch rather than
//! a mailbox, closer to a worker than a message handler.

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
use crate::broker::Producer;
use crate::location::{TTLocation, PT};
use crate::observer::Observer;
use crate::timetable::Timetable;
use crate::worker::Worker;

const SCAN_IDLE_SLEEP: Duration = Duration::from_millis(250);
const WAIT_EMPTY_POLL: Duration = Duration::from_secs(1);
const PENDING_DELIVERIES_CAPACITY: usize = 1024;

pub struct Dispatcher {
    partition: u32,
    timetable: std::sync::Arc<Timetable>,
    checkpoint: std::sync::Arc<Checkpoint>,
    producer: std::sync::Arc<dyn Producer>,
    observer: std::sync::Arc<dyn Observer>,
    kill_switch: KillSwitch,
    pause: Latch,
    lookback_seconds: i64,
    checkpoint_interval: Duration,
    last_location: Mutex<Option<TTLocation>>,
    unacked_deliveries: Mutex<HashSet<TTLocation>>,
    empty_notify: Notify,
    pending_tx: flume::Sender<(crate::record::MessageRecord, TTLocation)>,
    pending_rx: flume::Receiver<(crate::record::MessageRecord, TTLocation)>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        partition: u32,
        timetable: std::sync::Arc<Timetable>,
        checkpoint: std::sync::Arc<Checkpoint>,
        producer: std::sync::Arc<dyn Producer>,
        observer: std::sync::Arc<dyn Observer>,
        kill_switch: KillSwitch,
        lookback_days: u32,
        checkpoint_interval: Duration,
    ) -> std::sync::Arc<Self> {
        let (pending_tx, pending_rx) = flume::bounded(PENDING_DELIVERIES_CAPACITY);
        std::sync::Arc::new(Dispatcher {
            partition,
            timetable,
            checkpoint,
            producer,
            observer,
            kill_switch,
            pause: Latch::new(false),
            lookback_seconds: i64::from(lookback_days) * 86_400,
            checkpoint_interval,
            last_location: Mutex::new(None),
            unacked_deliveries: Mutex::new(HashSet::new()),
            empty_notify: Notify::new(),
            pending_tx,
            pending_rx,
        })
    }

    fn pt(&self) -> PT {
        PT::dispatcher(self.partition)
    }

    pub fn partition(&self) -> u32 {
        self.partition
    }

    pub fn pause(&self) {
        self.pause.set();
        info!(partition = self.partition, "dispatcher paused");
    }

    pub fn resume(&self) {
        self.pause.clear();
        info!(partition = self.partition, "dispatcher resumed");
    }

    fn span(&self) -> tracing::Span {
        info_span!("dispatcher", partition = self.partition)
    }

    /// Spawns the scan, delivery, and periodic-checkpoint tasks, each under
    /// a span scoped to this worker's `(kind, partition)`. All three observe
    /// the same kill switch, so killing it tears down every task.
    pub fn spawn(self: &std::sync::Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        info!(partition = self.partition, "dispatcher starting");
        let span = self.span();
        vec![
            tokio::spawn(self.clone().run_scan_loop().instrument(span.clone())),
            tokio::spawn(self.clone().run_delivery_loop().instrument(span.clone())),
            tokio::spawn(self.clone().run_periodic_checkpoint().instrument(span)),
        ]
    }

    async fn cancellable<F: std::future::Future<Output = ()>>(&self, future: F) -> bool {
        tokio::select! {
            _ = future => false,
            _ = self.kill_switch.cancelled() => true,
        }
    }

    async fn run_scan_loop(self: std::sync::Arc<Self>) {
        let default_start = TTLocation::new(self.partition, now_unix_seconds() - self.lookback_seconds, -1);
        let resume_from = match self.checkpoint.get(self.pt(), default_start) {
            Ok(loc) => loc,
            Err(error) => {
                error!(partition = self.partition, %error, "failed to read dispatcher checkpoint");
                return;
            }
        };
        let mut t = resume_from.time_key + 1;
        let mut seq: i32 = if resume_from.sequence >= 0 { resume_from.sequence + 1 } else { 0 };

        loop {
            if self.kill_switch.is_dead() {
                return;
            }
            if self.cancellable(self.pause.wait_until_clear()).await {
                return;
            }

            let highwater_time_key = now_unix_seconds() - 1;
            while t <= highwater_time_key {
                if self.kill_switch.is_dead() {
                    return;
                }
                let count = match self.timetable.counter(self.partition, t) {
                    Ok(count) => count,
                    Err(error) => {
                        error!(partition = self.partition, time_key = t, %error, "dispatcher scan failed reading counter");
                        return;
                    }
                };
                while i64::from(seq) < count {
                    let loc = TTLocation::new(self.partition, t, seq);
                    match self.timetable.get_record(loc) {
                        Ok(Some(record)) => {
                            self.observer.record_scheduled(loc);
                            if self.cancellable(async {
                                let _ = self.pending_tx.send_async((record, loc)).await;
                            })
                            .await
                            {
                                return;
                            }
                        }
                        Ok(None) => {}
                        Err(error) => {
                            error!(partition = self.partition, %loc, %error, "dispatcher scan failed reading record");
                            return;
                        }
                    }
                    *self.last_location.lock().unwrap() = Some(loc);
                    seq += 1;
                    tokio::task::yield_now().await;
                }
                // `t` was fully scanned (counter checked, every sequence below it
                // processed): record it, not the next, not-yet-scanned time key.
                // A periodic checkpoint persisting a not-yet-scanned time key would
                // make a restart resume past it, silently dropping whatever was
                // scheduled there.
                *self.last_location.lock().unwrap() = Some(TTLocation::counter(self.partition, t));
                seq = 0;
                t += 1;
                tokio::task::yield_now().await;
            }

            if self.cancellable(tokio::time::sleep(SCAN_IDLE_SLEEP)).await {
                return;
            }
        }
    }

    async fn run_delivery_loop(self: std::sync::Arc<Self>) {
        loop {
            let received = tokio::select! {
                item = self.pending_rx.recv_async() => item,
                _ = self.kill_switch.cancelled() => return,
            };
            let Ok((record, loc)) = received else {
                return;
            };

            self.unacked_deliveries.lock().unwrap().insert(loc);
            let destination = record.destination().to_string();
            let result = self
                .producer
                .send(&destination, None, record.k.clone(), record.v.clone(), record.h.clone())
                .await;

            self.unacked_deliveries.lock().unwrap().remove(&loc);
            match result {
                Ok(_offset) => {
                    let fallback = TTLocation::new(self.partition, 0, TTLocation::COUNTER_SEQUENCE);
                    let current = self.checkpoint.get(self.pt(), fallback).unwrap_or(fallback);
                    if loc > current {
                        self.checkpoint.update(self.pt(), loc);
                    }
                    self.observer.record_delivered(loc);
                }
                Err(error) => {
                    warn!(partition = self.partition, %loc, %error, "dispatcher delivery failed, checkpoint not advanced");
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

    /// Blocks until `unacked_deliveries` drains or `timeout` elapses,
    /// logging the remaining count every ten polls. Called before a
    /// graceful stop or a rebalance revoke.
    pub async fn wait_empty(&self, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut iterations: u64 = 0;
        loop {
            if self.unacked_deliveries.lock().unwrap().is_empty() {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                let remaining = self.unacked_deliveries.lock().unwrap().len();
                warn!(partition = self.partition, remaining, "dispatcher wait_empty timed out");
                return;
            }
            iterations += 1;
            if iterations % 10 == 0 {
                let remaining = self.unacked_deliveries.lock().unwrap().len();
                info!(partition = self.partition, remaining, "waiting for in-flight deliveries to drain");
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
impl Worker for Dispatcher {
    fn partition(&self) -> u32 {
        Dispatcher::partition(self)
    }

    fn start(self: std::sync::Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        Dispatcher::spawn(&self)
    }

    fn pause(&self) {
        Dispatcher::pause(self)
    }

    fn resume(&self) {
        Dispatcher::resume(self)
    }

    async fn wait_empty(&self, timeout: Duration) {
        Dispatcher::wait_empty(self, timeout).await
    }
}
