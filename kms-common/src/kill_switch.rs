use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// A shared flag that lets any holder tear down a tree of cooperating tasks.
///
/// Cloning a `KillSwitch` shares the same underlying flag: tripping one
/// clone is observed by every other. Workers race `cancelled()` against
/// their next receive so a kill is noticed even while otherwise idle, not
/// just at the next message.
#[derive(Clone, Default)]
pub struct KillSwitch {
    killed: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl KillSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kill(&self) {
        self.killed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_alive(&self) -> bool {
        !self.killed.load(Ordering::Acquire)
    }

    pub fn is_dead(&self) -> bool {
        !self.is_alive()
    }

    /// Resolves once the switch has been tripped. Safe to race in a
    /// `select!` against a receive future: the `Notify` is armed before the
    /// flag is re-checked, so a `kill()` landing between the check and the
    /// await is never missed.
    pub async fn cancelled(&self) {
        loop {
            if self.is_dead() {
                return;
            }
            let notified = self.notify.notified();
            if self.is_dead() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancelled_resolves_immediately_once_already_killed() {
        let kill_switch = KillSwitch::new();
        kill_switch.kill();
        tokio::time::timeout(Duration::from_millis(50), kill_switch.cancelled())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn cancelled_wakes_a_pending_waiter() {
        let kill_switch = KillSwitch::new();
        let waiter = kill_switch.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        kill_switch.kill();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("waiter should have woken up")
            .unwrap();
    }

    #[test]
    fn a_fresh_switch_is_alive() {
        let kill_switch = KillSwitch::new();
        assert!(kill_switch.is_alive());
        assert!(!kill_switch.is_dead());
    }
}
