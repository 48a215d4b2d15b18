use tokio::sync::watch;

/// A broadcast gate with set/clear semantics, built on a `watch` channel.
///
/// Used for the scheduler's cooperative latches: `topics_created`,
/// `timetable_recovered`, `dispatcher_checkpointed`, and the per-worker pause
/// gate. Any number of scan loops can `wait_until_set`/`wait_until_clear` at
/// their suspension points; `set`/`clear` wake every waiter immediately.
#[derive(Clone)]
pub struct Latch {
    tx: watch::Sender<bool>,
}

impl Latch {
    pub fn new(initial: bool) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Latch { tx }
    }

    pub fn set(&self) {
        let _ = self.tx.send_if_modified(|value| {
            let changed = !*value;
            *value = true;
            changed
        });
    }

    pub fn clear(&self) {
        let _ = self.tx.send_if_modified(|value| {
            let changed = *value;
            *value = false;
            changed
        });
    }

    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    /// Suspends until the latch becomes set. Returns immediately if already set.
    pub async fn wait_until_set(&self) {
        let mut rx = self.tx.subscribe();
        if *rx.borrow() {
            return;
        }
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
    }

    /// Suspends until the latch becomes clear. Returns immediately if already clear.
    pub async fn wait_until_clear(&self) {
        let mut rx = self.tx.subscribe();
        if !*rx.borrow() {
            return;
        }
        while rx.changed().await.is_ok() {
            if !*rx.borrow() {
                return;
            }
        }
    }
}

impl Default for Latch {
    fn default() -> Self {
        Latch::new(false)
    }
}
