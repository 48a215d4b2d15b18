use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::PartitionedStore;

/// In-process, non-durable `PartitionedStore`. Good for unit tests and the
/// documented examples; not a stand-in for the changelog-backed production
/// store, which must survive a process restart.
#[derive(Default)]
pub struct MemStore {
    partitions: Mutex<BTreeMap<u32, BTreeMap<String, String>>>,
}

impl MemStore {
    pub fn new() -> Self {
        MemStore::default()
    }
}

impl PartitionedStore for MemStore {
    fn get(&self, partition: u32, key: &str) -> anyhow::Result<Option<String>> {
        let partitions = self.partitions.lock().unwrap();
        Ok(partitions
            .get(&partition)
            .and_then(|table| table.get(key))
            .cloned())
    }

    fn put(&self, partition: u32, key: &str, value: &str) -> anyhow::Result<()> {
        let mut partitions = self.partitions.lock().unwrap();
        partitions
            .entry(partition)
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, partition: u32, key: &str) -> anyhow::Result<()> {
        let mut partitions = self.partitions.lock().unwrap();
        if let Some(table) = partitions.get_mut(&partition) {
            table.remove(key);
        }
        Ok(())
    }

    fn scan_prefix(&self, partition: u32, prefix: &str) -> anyhow::Result<Vec<(String, String)>> {
        let partitions = self.partitions.lock().unwrap();
        let Some(table) = partitions.get(&partition) else {
            return Ok(Vec::new());
        };
        Ok(table
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }
}
