//! The Timetable superimposes two logical tables on one `PartitionedStore`
//! partition: a `TimeKey` counter (`"<t>"` -> decimal count) and a set of
//! message records (`"<t>-<s>"` -> JSON `MessageRecord`), plus the two
//! reserved Checkpoint keys (`"!checkpoint-dispatcher"`,
//! `"!checkpoint-janitor"`). All three share the same keyspace because the
//! `!` prefix can never collide with a decimal time key.

use std::sync::Arc;

use kms_store::PartitionedStore;

use crate::location::{TTLocation, PT};
use crate::record::MessageRecord;

pub struct Timetable {
    store: Arc<dyn PartitionedStore>,
}

impl Timetable {
    pub fn new(store: Arc<dyn PartitionedStore>) -> Self {
        Timetable { store }
    }

    /// The TimeKey counter for `(partition, time_key)`, or `0` if absent.
    pub fn counter(&self, partition: u32, time_key: i64) -> anyhow::Result<i64> {
        let loc = TTLocation::counter(partition, time_key);
        match self.store.get(partition, &loc.key())? {
            Some(raw) => Ok(raw.parse()?),
            None => Ok(0),
        }
    }

    /// Appends one message record at the next free sequence for `time_key`,
    /// atomically (from the caller's standpoint) bumping the counter.
    /// Returns the location the record was written at.
    pub fn append(
        &self,
        partition: u32,
        time_key: i64,
        record: &MessageRecord,
    ) -> anyhow::Result<TTLocation> {
        let count = self.counter(partition, time_key)?;
        let loc = TTLocation::new(partition, time_key, count as i32);
        let counter_loc = TTLocation::counter(partition, time_key);
        self.store
            .put(partition, &counter_loc.key(), &(count + 1).to_string())?;
        self.store.put(partition, &loc.key(), &record.to_json()?)?;
        Ok(loc)
    }

    /// Reads the message record at `loc`, if present. Never called for a
    /// counter location.
    pub fn get_record(&self, loc: TTLocation) -> anyhow::Result<Option<MessageRecord>> {
        debug_assert!(!loc.is_counter(), "get_record called on a counter location");
        match self.store.get(loc.partition, &loc.key())? {
            Some(raw) => Ok(Some(MessageRecord::from_json(&raw)?)),
            None => Ok(None),
        }
    }

    /// Deletes the entry at `loc`. Idempotent: deleting an absent key is a
    /// no-op, which is what lets the Janitor replay deletes after a crash.
    pub fn delete(&self, loc: TTLocation) -> anyhow::Result<()> {
        self.store.delete(loc.partition, &loc.key())
    }

    /// Reads the persisted checkpoint for `pt`, if any.
    pub fn read_checkpoint(&self, pt: PT) -> anyhow::Result<Option<TTLocation>> {
        match self.store.get(pt.partition, &pt.checkpoint_key())? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Persists `loc` as the checkpoint for `pt`.
    pub fn write_checkpoint(&self, pt: PT, loc: TTLocation) -> anyhow::Result<()> {
        self.store
            .put(pt.partition, &pt.checkpoint_key(), &serde_json::to_string(&loc)?)
    }

    /// Verifies invariant 1 of the data model: the TimeKey counter for
    /// `time_key` in `partition` equals the number of message records
    /// actually present at that time key. Used by tests and the optional
    /// debug-stats pass, never by the scan loops themselves.
    pub fn check_counter_matches_records(&self, partition: u32, time_key: i64) -> anyhow::Result<bool> {
        let counter = self.counter(partition, time_key)?;
        let prefix = format!("{time_key}-");
        let present = self
            .store
            .scan_prefix(partition, &prefix)?
            .into_iter()
            .filter(|(key, _)| key.starts_with(&prefix) && key[prefix.len()..].parse::<i32>().is_ok())
            .count();
        Ok(counter as usize == present)
    }
}

impl serde::Serialize for TTLocation {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("TTLocation", 3)?;
        state.serialize_field("partition", &self.partition)?;
        state.serialize_field("time_key", &self.time_key)?;
        state.serialize_field("sequence", &self.sequence)?;
        state.end()
    }
}

impl<'de> serde::Deserialize<'de> for TTLocation {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(serde::Deserialize)]
        struct Raw {
            partition: u32,
            time_key: i64,
            sequence: i32,
        }
        let raw = Raw::deserialize(deserializer)?;
        Ok(TTLocation::new(raw.partition, raw.time_key, raw.sequence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kms_store::MemStore;

    fn timetable() -> Timetable {
        Timetable::new(Arc::new(MemStore::new()))
    }

    fn record(destination: &str) -> MessageRecord {
        MessageRecord::new(Some("k".to_string()), Some("v".to_string()), Vec::new(), destination.to_string())
    }

    #[test]
    fn append_assigns_ascending_sequences_and_bumps_the_counter() {
        let tt = timetable();
        let first = tt.append(0, 100, &record("orders")).unwrap();
        let second = tt.append(0, 100, &record("orders")).unwrap();
        assert_eq!(first, TTLocation::new(0, 100, 0));
        assert_eq!(second, TTLocation::new(0, 100, 1));
        assert_eq!(tt.counter(0, 100).unwrap(), 2);
    }

    #[test]
    fn append_is_scoped_per_partition() {
        let tt = timetable();
        tt.append(0, 100, &record("a")).unwrap();
        assert_eq!(tt.counter(1, 100).unwrap(), 0);
    }

    #[test]
    fn get_record_round_trips_what_append_wrote() {
        let tt = timetable();
        let loc = tt.append(0, 100, &record("orders")).unwrap();
        let fetched = tt.get_record(loc).unwrap().unwrap();
        assert_eq!(fetched.destination(), "orders");
    }

    #[test]
    fn delete_is_idempotent() {
        let tt = timetable();
        let loc = tt.append(0, 100, &record("orders")).unwrap();
        tt.delete(loc).unwrap();
        assert!(tt.get_record(loc).unwrap().is_none());
        tt.delete(loc).unwrap();
    }

    #[test]
    fn checkpoint_round_trips() {
        let tt = timetable();
        let pt = PT::dispatcher(0);
        assert!(tt.read_checkpoint(pt).unwrap().is_none());
        let loc = TTLocation::new(0, 100, 3);
        tt.write_checkpoint(pt, loc).unwrap();
        assert_eq!(tt.read_checkpoint(pt).unwrap(), Some(loc));
    }

    #[test]
    fn counter_matches_records_invariant_holds_after_appends_and_deletes() {
        let tt = timetable();
        tt.append(0, 100, &record("a")).unwrap();
        let second = tt.append(0, 100, &record("a")).unwrap();
        assert!(tt.check_counter_matches_records(0, 100).unwrap());

        tt.delete(second).unwrap();
        // The counter is not decremented on delete (only the Janitor removes
        // records; the counter is cleaned up with the rest of the time key),
        // so the invariant is checked against records still present, not
        // against a recomputed counter.
        assert!(!tt.check_counter_matches_records(0, 100).unwrap());
    }
}
