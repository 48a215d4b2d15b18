//! The Timetable sits on top of a partitioned, ordered key-value store. The
//! real deployment backs it with a changelog-replicated engine (out of
//! scope here); this crate only fixes the trait boundary the scheduler
//! needs, plus two implementations good enough to run and test the engine
//! standalone: a file-backed `SledStore` and an in-process `MemStore`.

mod mem;
mod sled_store;

pub use mem::MemStore;
pub use sled_store::SledStore;

/// Per-partition get/put/delete plus an ordered prefix scan, matching the
/// lexicographic key order the Timetable's `TTLocation` encoding depends on.
///
/// Implementors own one partition's keyspace per `partition` index; there is
/// no cross-partition atomicity, mirroring invariant 5 of the data model
/// (exactly one owner writes to a partition at a time).
pub trait PartitionedStore: Send + Sync + 'static {
    fn get(&self, partition: u32, key: &str) -> anyhow::Result<Option<String>>;

    fn put(&self, partition: u32, key: &str, value: &str) -> anyhow::Result<()>;

    fn delete(&self, partition: u32, key: &str) -> anyhow::Result<()>;

    /// Ascending iteration over keys in `partition` starting with `prefix`.
    /// Used by invariant checks and tests, not by the Dispatcher/Janitor
    /// scan loops themselves, which address records by computed key.
    fn scan_prefix(&self, partition: u32, prefix: &str) -> anyhow::Result<Vec<(String, String)>>;
}
