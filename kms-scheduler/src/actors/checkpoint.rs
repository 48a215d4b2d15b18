//! Checkpoint service (4.3): a pending buffer of the latest scan progress
//! per `PT`, periodically flushed into the Timetable itself. Unlike the
//! Dispatcher and Janitor, this is a plain `Arc`-shared struct guarded by a
//! mutex, mirroring how the pending map is described as simple shared state
//! touched by cooperating tasks rather than an independent message-handling
//! unit.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kms_common::latch::Latch;
use kms_common::KillSwitch;
use tracing::{error, info};

use crate::location::{WorkerKind, PT};
use crate::location::TTLocation;
use crate::observer::Observer;
use crate::timetable::Timetable;

pub struct Checkpoint {
    timetable: Arc<Timetable>,
    pending: Mutex<HashMap<PT, TTLocation>>,
    pause: Latch,
    dispatcher_checkpointed: Latch,
    save_interval: Duration,
    observer: Arc<dyn Observer>,
}

impl Checkpoint {
    pub fn new(timetable: Arc<Timetable>, save_interval: Duration, observer: Arc<dyn Observer>) -> Arc<Self> {
        Arc::new(Checkpoint {
            timetable,
            pending: Mutex::new(HashMap::new()),
            pause: Latch::new(false),
            dispatcher_checkpointed: Latch::new(false),
            save_interval,
            observer,
        })
    }

    /// Overwrites the pending progress for `pt`. Sets the
    /// `dispatcher_checkpointed` latch on the first Dispatcher update since
    /// the last rebalance, which is what lets a Janitor with no prior
    /// checkpoint start computing its highwater.
    pub fn update(&self, pt: PT, loc: TTLocation) {
        let mut pending = self.pending.lock().unwrap();
        let is_first_dispatcher_update =
            pt.kind == WorkerKind::Dispatcher && !self.dispatcher_checkpointed.is_set();
        pending.insert(pt, loc);
        drop(pending);
        if is_first_dispatcher_update {
            self.dispatcher_checkpointed.set();
        }
    }

    /// Returns the pending value for `pt` if present, else the last
    /// persisted value, else `default`.
    pub fn get(&self, pt: PT, default: TTLocation) -> anyhow::Result<TTLocation> {
        if let Some(loc) = self.pending.lock().unwrap().get(&pt) {
            return Ok(*loc);
        }
        if let Some(loc) = self.timetable.read_checkpoint(pt)? {
            return Ok(loc);
        }
        Ok(default)
    }

    pub async fn wait_for_dispatcher_checkpointed(&self) {
        self.dispatcher_checkpointed.wait_until_set().await;
    }

    /// The Dispatcher checkpoint for `partition`, if any has been recorded
    /// yet (pending or persisted). Used by the Janitor to compute its
    /// highwater; returns `None` rather than a default because "no
    /// checkpoint yet" and "checkpoint at the default" are meaningfully
    /// different here.
    pub fn dispatcher_checkpoint(&self, partition: u32) -> anyhow::Result<Option<TTLocation>> {
        let pt = PT::dispatcher(partition);
        if let Some(loc) = self.pending.lock().unwrap().get(&pt) {
            return Ok(Some(*loc));
        }
        self.timetable.read_checkpoint(pt)
    }

    pub fn pause(&self) {
        self.pause.set();
        info!("checkpoint paused");
    }

    pub fn resume(&self) {
        self.pause.clear();
        info!("checkpoint resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.pause.is_set()
    }

    pub async fn wait_while_paused(&self) {
        self.pause.wait_until_clear().await;
    }

    /// Called from `on_rebalance_started`: the next Dispatcher to check in
    /// after a rebalance must re-arm the latch for any waiting Janitor.
    pub fn on_rebalance_started(&self) {
        self.dispatcher_checkpointed.clear();
    }

    /// Flushes every pending entry to the Timetable, clearing each on a
    /// successful write. A write failure leaves that entry pending for the
    /// next cycle.
    pub fn persist(&self) -> anyhow::Result<()> {
        let snapshot: Vec<(PT, TTLocation)> = {
            let pending = self.pending.lock().unwrap();
            pending.iter().map(|(pt, loc)| (*pt, *loc)).collect()
        };
        for (pt, loc) in snapshot {
            self.timetable.write_checkpoint(pt, loc)?;
            self.observer.checkpoint_advanced(pt, loc);
            let mut pending = self.pending.lock().unwrap();
            if pending.get(&pt) == Some(&loc) {
                pending.remove(&pt);
            }
        }
        Ok(())
    }

    /// Spawns the periodic persist loop. Exits once `kill_switch` fires,
    /// performing one last flush so in-flight progress is not lost on a
    /// graceful shutdown.
    pub fn spawn_periodic(self: Arc<Self>, kill_switch: KillSwitch) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = kill_switch.cancelled() => break,
                    _ = tokio::time::sleep(self.save_interval) => {}
                }
                if self.is_paused() {
                    continue;
                }
                if let Err(error) = self.persist() {
                    error!(%error, "checkpoint persist failed");
                }
            }
            if let Err(error) = self.persist() {
                error!(%error, "final checkpoint flush failed");
            } else {
                info!("final checkpoint flush completed");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::NoopObserver;
    use kms_store::MemStore;

    fn checkpoint() -> Arc<Checkpoint> {
        let timetable = Arc::new(Timetable::new(Arc::new(MemStore::new())));
        Checkpoint::new(timetable, Duration::from_millis(10), Arc::new(NoopObserver))
    }

    #[test]
    fn get_falls_back_to_default_when_nothing_is_recorded() {
        let checkpoint = checkpoint();
        let default = TTLocation::new(0, 0, -1);
        assert_eq!(checkpoint.get(PT::dispatcher(0), default).unwrap(), default);
    }

    #[test]
    fn update_then_get_returns_the_pending_value_before_any_persist() {
        let checkpoint = checkpoint();
        let loc = TTLocation::new(0, 100, 3);
        checkpoint.update(PT::dispatcher(0), loc);
        assert_eq!(checkpoint.get(PT::dispatcher(0), TTLocation::new(0, 0, -1)).unwrap(), loc);
    }

    #[test]
    fn first_dispatcher_update_sets_the_dispatcher_checkpointed_latch() {
        let checkpoint = checkpoint();
        assert!(!checkpoint.dispatcher_checkpointed.is_set());
        checkpoint.update(PT::dispatcher(0), TTLocation::new(0, 100, 0));
        assert!(checkpoint.dispatcher_checkpointed.is_set());
    }

    #[test]
    fn janitor_updates_never_touch_the_dispatcher_checkpointed_latch() {
        let checkpoint = checkpoint();
        checkpoint.update(PT::janitor(0), TTLocation::new(0, 100, 0));
        assert!(!checkpoint.dispatcher_checkpointed.is_set());
    }

    #[test]
    fn persist_clears_the_pending_entry_and_survives_in_the_timetable() {
        let checkpoint = checkpoint();
        let loc = TTLocation::new(0, 100, 3);
        checkpoint.update(PT::dispatcher(0), loc);
        checkpoint.persist().unwrap();
        assert!(checkpoint.pending.lock().unwrap().is_empty());
        // A fresh Checkpoint over the same Timetable recovers the persisted value.
        let recovered = Checkpoint::new(checkpoint.timetable.clone(), Duration::from_secs(1), Arc::new(NoopObserver));
        assert_eq!(
            recovered.get(PT::dispatcher(0), TTLocation::new(0, 0, -1)).unwrap(),
            loc
        );
    }

    #[test]
    fn on_rebalance_started_clears_the_dispatcher_checkpointed_latch() {
        let checkpoint = checkpoint();
        checkpoint.update(PT::dispatcher(0), TTLocation::new(0, 100, 0));
        assert!(checkpoint.dispatcher_checkpointed.is_set());
        checkpoint.on_rebalance_started();
        assert!(!checkpoint.dispatcher_checkpointed.is_set());
    }
}
