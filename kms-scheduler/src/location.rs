use std::cmp::Ordering;
use std::fmt;

/// Identifies a position within one partition's Timetable keyspace.
///
/// Locations order lexicographically on `(partition, time_key, sequence)`.
/// `sequence == -1` is the sentinel referring to the TimeKey counter entry
/// itself, and sorts before every real sequence sharing that `time_key`,
/// which is what lets the Dispatcher and Janitor treat "the counter" and
/// "the records" as one ordered traversal.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct TTLocation {
    pub partition: u32,
    pub time_key: i64,
    pub sequence: i32,
}

impl TTLocation {
    pub const COUNTER_SEQUENCE: i32 = -1;

    pub fn new(partition: u32, time_key: i64, sequence: i32) -> Self {
        TTLocation {
            partition,
            time_key,
            sequence,
        }
    }

    /// The location of the TimeKey counter entry for `time_key` in `partition`.
    pub fn counter(partition: u32, time_key: i64) -> Self {
        TTLocation::new(partition, time_key, Self::COUNTER_SEQUENCE)
    }

    pub fn is_counter(&self) -> bool {
        self.sequence == Self::COUNTER_SEQUENCE
    }

    /// The Timetable key for this location: `"<time_key>"` for the counter,
    /// `"<time_key>-<sequence>"` for a message record.
    pub fn key(&self) -> String {
        if self.is_counter() {
            self.time_key.to_string()
        } else {
            format!("{}-{}", self.time_key, self.sequence)
        }
    }
}

impl Ord for TTLocation {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.partition, self.time_key, self.sequence).cmp(&(
            other.partition,
            other.time_key,
            other.sequence,
        ))
    }
}

impl PartialOrd for TTLocation {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for TTLocation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({}, {}, {})", self.partition, self.time_key, self.sequence)
    }
}

/// Which of the two per-partition workers a `Checkpoint` entry belongs to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum WorkerKind {
    Dispatcher,
    Janitor,
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            WorkerKind::Dispatcher => write!(f, "dispatcher"),
            WorkerKind::Janitor => write!(f, "janitor"),
        }
    }
}

/// `(part, partition)`: the Checkpoint key space.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct PT {
    pub kind: WorkerKind,
    pub partition: u32,
}

impl PT {
    pub fn new(kind: WorkerKind, partition: u32) -> Self {
        PT { kind, partition }
    }

    pub fn dispatcher(partition: u32) -> Self {
        PT::new(WorkerKind::Dispatcher, partition)
    }

    pub fn janitor(partition: u32) -> Self {
        PT::new(WorkerKind::Janitor, partition)
    }

    /// The reserved Timetable key a PT's checkpoint is persisted under. Uses
    /// a `!` prefix, which never appears in a `str(time_key)` key because
    /// time keys are plain decimal digits, so checkpoint entries cannot
    /// collide with counter or message entries in the same partition.
    pub fn checkpoint_key(&self) -> String {
        format!("!checkpoint-{}", self.kind)
    }
}

impl fmt::Display for PT {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}[{}]", self.kind, self.partition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_sorts_before_any_real_sequence_at_the_same_time_key() {
        let counter = TTLocation::counter(0, 100);
        let first_record = TTLocation::new(0, 100, 0);
        assert!(counter < first_record);
    }

    #[test]
    fn locations_order_by_partition_then_time_key_then_sequence() {
        let a = TTLocation::new(0, 100, 5);
        let b = TTLocation::new(0, 101, 0);
        let c = TTLocation::new(1, 0, 0);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn key_encoding_matches_the_counter_and_message_formats() {
        assert_eq!(TTLocation::counter(0, 42).key(), "42");
        assert_eq!(TTLocation::new(0, 42, 3).key(), "42-3");
    }

    #[test]
    fn checkpoint_key_cannot_collide_with_a_time_key() {
        let pt = PT::dispatcher(0);
        assert!(pt.checkpoint_key().parse::<i64>().is_err());
    }
}
