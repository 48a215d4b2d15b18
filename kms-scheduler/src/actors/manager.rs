//! Manager (4.2): owns the Timetable and Checkpoint, validates and routes
//! ingress, and spawns/tears down per-partition Dispatchers and Janitors as
//! partitions are assigned and revoked. Modeled as a plain `Arc`-shared
//! struct with a `RebalanceListener` impl rather than a message-handling
//! actor: its callers already hand it discrete events one at a time (a
//! consumer poll loop, a rebalance callback), so there is no mailbox worth
//! adding in front of methods that are never called concurrently against
//! the same partition's state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kms_common::latch::Latch;
use kms_common::{now_unix_seconds, parse_deliver_at};
use kms_common::KillSwitch;
use kms_config::SchedulerConfig;
use tracing::{info, warn};

use crate::actors::checkpoint::Checkpoint;
use crate::actors::dispatcher::Dispatcher;
use crate::actors::janitor::Janitor;
use crate::assignor::assert_assignment_or_exit;
use crate::broker::{ConsumedRecord, LocalBroker, Producer, RebalanceListener};
use crate::error::SchedulerError;
use crate::observer::Observer;
use crate::record::{DlqRecord, Headers, MessageRecord, HEADER_ACTION, HEADER_DELIVER_AT, HEADER_DELIVER_TO, ACTION_ADD};
use crate::timetable::Timetable;
use crate::worker::Worker;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

struct PartitionWorkers {
    partition: u32,
    workers: Vec<Arc<dyn Worker>>,
    handles: Vec<tokio::task::JoinHandle<()>>,
    kill_switch: KillSwitch,
}

pub struct Manager {
    config: SchedulerConfig,
    broker: Arc<LocalBroker>,
    timetable: Arc<Timetable>,
    checkpoint: Arc<Checkpoint>,
    observer: Arc<dyn Observer>,
    topics_created: Latch,
    timetable_recovered: Latch,
    workers: std::sync::Mutex<HashMap<u32, PartitionWorkers>>,
    instant_send_total: std::sync::Mutex<HashMap<u32, u64>>,
}

impl Manager {
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn kms_store::PartitionedStore>,
        broker: Arc<LocalBroker>,
        observer: Arc<dyn Observer>,
    ) -> Arc<Self> {
        let timetable = Arc::new(Timetable::new(store));
        let checkpoint = Checkpoint::new(
            timetable.clone(),
            Duration::from_secs_f64(config.checkpoint_save_interval_seconds),
            observer.clone(),
        );
        Arc::new(Manager {
            config,
            broker,
            timetable,
            checkpoint,
            observer,
            topics_created: Latch::new(false),
            timetable_recovered: Latch::new(false),
            workers: std::sync::Mutex::new(HashMap::new()),
            instant_send_total: std::sync::Mutex::new(HashMap::new()),
        })
    }

    /// Declares every topic this engine touches, at `topic_partitions`
    /// partitions each, then releases the `topics_created` latch every
    /// worker waits on before its first scan.
    pub fn ensure_topics(&self) {
        let p = self.config.topic_partitions;
        self.broker.ensure_topic(&self.config.input_topic(), p);
        self.broker.ensure_topic(&self.config.actions_topic(), p);
        self.broker.ensure_topic(&self.config.dlq_topic(), p);
        self.broker.ensure_topic(&self.config.timetable_changelog_topic(), p);
        self.topics_created.set();
    }

    pub async fn wait_topics_created(&self) {
        self.topics_created.wait_until_set().await;
    }

    pub fn broker(&self) -> &Arc<LocalBroker> {
        &self.broker
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn timetable_counter(&self, partition: u32, time_key: i64) -> i64 {
        self.timetable.counter(partition, time_key).unwrap_or(0)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.lock().unwrap().len()
    }

    fn header(headers: &Headers, name: &str) -> Option<String> {
        headers.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone())
    }

    /// Drops the three control headers this engine adds/reads
    /// (`x-kms-action`, `x-kms-deliver-at`, `x-kms-deliver-to`) so neither an
    /// instantly-forwarded record nor a stored one carries them into the
    /// destination topic or the Timetable. Non-kms headers pass through
    /// byte-for-byte.
    fn strip_kms_headers(headers: &Headers) -> Headers {
        headers
            .iter()
            .filter(|(k, _)| k != HEADER_ACTION && k != HEADER_DELIVER_AT && k != HEADER_DELIVER_TO)
            .cloned()
            .collect()
    }

    async fn send_to_dlq(&self, record: &ConsumedRecord, errors: Vec<String>) -> Result<(), SchedulerError> {
        let dlq = DlqRecord {
            key: record.key.clone(),
            value: record.value.clone(),
            headers: record.headers.clone(),
            errors,
        };
        let json = dlq.to_json().map_err(|e| SchedulerError::Validation(e.to_string()))?;
        self.broker
            .send(&self.config.dlq_topic(), Some(record.partition), record.key.clone(), Some(json), Vec::new())
            .await
            .map_err(|e| SchedulerError::Transient(e.into()))?;
        self.observer.dlq_written(record.partition);
        Ok(())
    }

    /// Ingress agent on `input`. Malformed headers are DLQ'd, never
    /// propagated as an error — `distribute` always returns `Ok` once the
    /// record has been routed somewhere.
    pub async fn distribute(&self, record: ConsumedRecord) -> Result<(), SchedulerError> {
        let deliver_at = Self::header(&record.headers, HEADER_DELIVER_AT);
        let deliver_to = Self::header(&record.headers, HEADER_DELIVER_TO);

        let mut errors = Vec::new();
        if deliver_at.is_none() {
            errors.push(format!("missing header `{HEADER_DELIVER_AT}`"));
        }
        if deliver_to.is_none() {
            errors.push(format!("missing header `{HEADER_DELIVER_TO}`"));
        }
        let (deliver_at, deliver_to) = match (deliver_at, deliver_to) {
            (Some(at), Some(to)) => (at, to),
            _ => return self.send_to_dlq(&record, errors).await,
        };

        let time_key = match parse_deliver_at(&deliver_at) {
            Ok(seconds) => seconds,
            Err(error) => {
                errors.push(format!("unparseable `{HEADER_DELIVER_AT}`: {error}"));
                return self.send_to_dlq(&record, errors).await;
            }
        };

        if time_key < now_unix_seconds() {
            self.instant_send(&record, &deliver_to).await?;
            return Ok(());
        }

        let mut headers = record.headers.clone();
        headers.push((HEADER_ACTION.to_string(), ACTION_ADD.to_string()));
        headers.retain(|(k, _)| k != HEADER_DELIVER_AT);
        headers.push((HEADER_DELIVER_AT.to_string(), time_key.to_string()));

        self.broker
            .send(
                &self.config.actions_topic(),
                Some(record.partition),
                record.key.clone(),
                record.value.clone(),
                headers,
            )
            .await
            .map_err(|e| SchedulerError::Transient(e.into()))?;
        Ok(())
    }

    async fn instant_send(&self, record: &ConsumedRecord, deliver_to: &str) -> Result<(), SchedulerError> {
        self.broker
            .send(deliver_to, None, record.key.clone(), record.value.clone(), Self::strip_kms_headers(&record.headers))
            .await
            .map_err(|e| SchedulerError::Transient(e.into()))?;
        self.observer.instant_send(record.partition);
        *self
            .instant_send_total
            .lock()
            .unwrap()
            .entry(record.partition)
            .or_insert(0) += 1;
        Ok(())
    }

    pub fn instant_send_total(&self, partition: u32) -> u64 {
        *self.instant_send_total.lock().unwrap().get(&partition).unwrap_or(&0)
    }

    /// Agent on `actions`, running on the worker that owns this partition
    /// of the Timetable.
    pub async fn process_actions(&self, record: ConsumedRecord) -> Result<(), SchedulerError> {
        let deliver_to = Self::header(&record.headers, HEADER_DELIVER_TO)
            .ok_or_else(|| SchedulerError::Validation(format!("action record missing `{HEADER_DELIVER_TO}`")))?;
        let time_key: i64 = Self::header(&record.headers, HEADER_DELIVER_AT)
            .ok_or_else(|| SchedulerError::Validation(format!("action record missing `{HEADER_DELIVER_AT}`")))?
            .parse()
            .map_err(|_| SchedulerError::Validation(format!("action record has a non-numeric `{HEADER_DELIVER_AT}`")))?;

        if time_key < now_unix_seconds() {
            return self.instant_send(&record, &deliver_to).await;
        }

        let stored_headers = Self::strip_kms_headers(&record.headers);
        let message = MessageRecord::new(record.key.clone(), record.value.clone(), stored_headers, deliver_to);
        let loc = self
            .timetable
            .append(record.partition, time_key, &message)
            .map_err(SchedulerError::Store)?;
        self.observer.record_scheduled(loc);
        Ok(())
    }

    fn spawn_partition(&self, partition: u32) {
        let kill_switch = KillSwitch::new();
        let producer: Arc<dyn Producer> = self.broker.clone();
        let dispatcher = Dispatcher::new(
            partition,
            self.timetable.clone(),
            self.checkpoint.clone(),
            producer,
            self.observer.clone(),
            kill_switch.clone(),
            self.config.dispatcher.default_checkpoint_lookback_days,
            Duration::from_secs(self.config.dispatcher.checkpoint_interval_seconds),
        );
        let janitor = Janitor::new(
            partition,
            self.timetable.clone(),
            self.checkpoint.clone(),
            self.observer.clone(),
            kill_switch.clone(),
            self.config.janitor.highwater_offset_seconds,
            Duration::from_secs(self.config.janitor.checkpoint_interval_seconds),
            Duration::from_secs(self.config.janitor.clean_interval_seconds),
            self.config.dispatcher.default_checkpoint_lookback_days,
        );

        let mut handles = dispatcher.clone().start();
        handles.extend(janitor.clone().start());
        let workers: Vec<Arc<dyn Worker>> = vec![dispatcher, janitor];

        self.workers.lock().unwrap().insert(
            partition,
            PartitionWorkers {
                partition,
                workers,
                handles,
                kill_switch,
            },
        );
        info!(partition, "spawned dispatcher and janitor");
    }

    /// Pauses workers, waits for in-flight deliveries/removals to drain
    /// (bounded by `DRAIN_TIMEOUT`), then tears down their tasks. Used by
    /// both `on_partitions_revoked` and `stop`.
    async fn drain_and_remove(&self, partitions: &[u32]) {
        let removed: Vec<PartitionWorkers> = {
            let mut workers = self.workers.lock().unwrap();
            partitions.iter().filter_map(|p| workers.remove(p)).collect()
        };
        for partition_workers in removed {
            for worker in &partition_workers.workers {
                worker.pause();
            }
            for worker in &partition_workers.workers {
                worker.wait_empty(DRAIN_TIMEOUT).await;
            }
            partition_workers.kill_switch.kill();
            for handle in partition_workers.handles {
                let _ = handle.await;
            }
            info!(partition = partition_workers.partition, "dispatcher and janitor stopped");
        }
    }

    /// Pauses every worker, drains in-flight work, and flushes the
    /// Checkpoint. Does not exit the process; callers own the runtime
    /// shutdown sequence.
    pub async fn stop(&self) {
        let partitions: Vec<u32> = self.workers.lock().unwrap().keys().copied().collect();
        self.checkpoint.pause();
        self.drain_and_remove(&partitions).await;
        if let Err(error) = self.checkpoint.persist() {
            warn!(%error, "checkpoint flush failed during shutdown");
        }
    }

    /// When `debug_stats_enabled`, logs partition/instant-send counters on
    /// a fixed cadence. Purely observational; returns `None` when disabled
    /// so the caller doesn't spawn a task that would just sleep forever.
    pub fn spawn_debug_stats(self: &Arc<Self>, kill_switch: KillSwitch) -> Option<tokio::task::JoinHandle<()>> {
        if !self.config.debug_stats_enabled {
            return None;
        }
        let manager = self.clone();
        Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = kill_switch.cancelled() => return,
                    _ = tokio::time::sleep(Duration::from_secs(30)) => {}
                }
                let worker_count = manager.worker_count();
                let instant_sends: u64 = manager.instant_send_total.lock().unwrap().values().sum();
                info!(worker_count, instant_sends, "scheduler debug stats");
            }
        }))
    }
}

#[async_trait]
impl RebalanceListener for Manager {
    async fn on_rebalance_started(&self) {
        self.timetable_recovered.clear();
        self.checkpoint.on_rebalance_started();
        self.checkpoint.pause();
        let workers = self.workers.lock().unwrap();
        for partition_workers in workers.values() {
            for worker in &partition_workers.workers {
                worker.pause();
            }
        }
    }

    async fn on_partitions_revoked(&self, revoked: &[u32]) {
        if let Err(error) = self.checkpoint.persist() {
            warn!(%error, "checkpoint flush failed during revoke");
        }
        self.drain_and_remove(revoked).await;
    }

    async fn on_partitions_assigned(&self, assigned: &[u32]) {
        let currently_owned: std::collections::HashSet<u32> =
            self.workers.lock().unwrap().keys().copied().collect();
        assert_assignment_or_exit(&currently_owned, assigned);
        for &partition in assigned {
            self.spawn_partition(partition);
        }
    }
}

impl Manager {
    /// Called once the Timetable state for every newly assigned partition
    /// has been recovered (the changelog has caught this process up). Not
    /// itself a `RebalanceListener` hook because it isn't part of the
    /// broker's own callback sequence — the bundled example calls it
    /// directly after assignment.
    pub fn on_timetable_recovery_completed(&self) {
        self.timetable_recovered.set();
        self.checkpoint.resume();
        let workers = self.workers.lock().unwrap();
        for partition_workers in workers.values() {
            for worker in &partition_workers.workers {
                worker.resume();
            }
        }
    }
}
