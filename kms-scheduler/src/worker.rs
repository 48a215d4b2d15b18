//! Shared per-partition worker lifecycle. The Dispatcher and the Janitor are
//! two concrete implementors of the same small interface the Manager drives
//! them through — start the worker's tasks, pause/resume its scanning
//! across a rebalance, and wait for in-flight work to drain before
//! teardown. `stop` is deliberately not part of this trait: the Manager
//! owns the spawned task handles directly and joins them, so teardown stays
//! structured concurrency rather than a method call on the worker itself.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

#[async_trait]
pub trait Worker: Send + Sync {
    fn partition(&self) -> u32;

    /// Spawns this worker's tasks, returning their join handles.
    fn start(self: Arc<Self>) -> Vec<tokio::task::JoinHandle<()>>;

    fn pause(&self);
    fn resume(&self);

    async fn wait_empty(&self, timeout: Duration);
}
