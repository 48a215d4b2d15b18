use std::path::Path;

use anyhow::Context;
use tracing::info;

use crate::PartitionedStore;

/// File-backed `PartitionedStore`. Each partition gets its own `sled::Tree`
/// so that partition ownership transfer never requires scanning or
/// re-keying another partition's data, matching invariant 5 (a partition has
/// exactly one writer) without any cross-tree coordination.
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let db = sled::open(path)
            .with_context(|| format!("Failed to open sled database at `{}`.", path.display()))?;
        info!(path = %path.display(), "opened sled-backed partitioned store");
        Ok(SledStore { db })
    }

    fn tree(&self, partition: u32) -> anyhow::Result<sled::Tree> {
        self.db
            .open_tree(format!("partition-{partition}"))
            .context("Failed to open partition tree.")
    }
}

impl PartitionedStore for SledStore {
    fn get(&self, partition: u32, key: &str) -> anyhow::Result<Option<String>> {
        let tree = self.tree(partition)?;
        let value = tree.get(key).context("Failed to read from the store.")?;
        match value {
            Some(bytes) => Ok(Some(
                String::from_utf8(bytes.to_vec()).context("Stored value was not valid UTF-8.")?,
            )),
            None => Ok(None),
        }
    }

    fn put(&self, partition: u32, key: &str, value: &str) -> anyhow::Result<()> {
        let tree = self.tree(partition)?;
        tree.insert(key, value.as_bytes())
            .context("Failed to write to the store.")?;
        Ok(())
    }

    fn delete(&self, partition: u32, key: &str) -> anyhow::Result<()> {
        let tree = self.tree(partition)?;
        tree.remove(key).context("Failed to delete from the store.")?;
        Ok(())
    }

    fn scan_prefix(&self, partition: u32, prefix: &str) -> anyhow::Result<Vec<(String, String)>> {
        let tree = self.tree(partition)?;
        let mut entries = Vec::new();
        for item in tree.scan_prefix(prefix) {
            let (key_bytes, value_bytes) = item.context("Failed to iterate the store.")?;
            let key = String::from_utf8(key_bytes.to_vec()).context("Stored key was not valid UTF-8.")?;
            let value =
                String::from_utf8(value_bytes.to_vec()).context("Stored value was not valid UTF-8.")?;
            entries.push((key, value));
        }
        Ok(entries)
    }
}
