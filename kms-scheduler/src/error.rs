use thiserror::Error;

/// The scheduler's error taxonomy, matching the recoverability classes the
/// design calls out: validation failures are DLQ'd and forgotten, transient
/// failures are retried by the next scan pass, store failures crash the
/// owning worker so the runtime re-assigns the partition, and fatal
/// failures terminate the process outright.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Malformed or missing ingress headers. Routed to the DLQ; never
    /// retried within the process.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A producer send failed or returned no offset. The caller must not
    /// advance a checkpoint past the associated location.
    #[error("transient failure: {0}")]
    Transient(#[source] anyhow::Error),

    /// A read, write, or codec failure against the Timetable's backing
    /// store. Surfaced by a scan loop as a worker crash.
    #[error("store failure: {0}")]
    Store(#[source] anyhow::Error),

    /// A partition-assignment invariant was violated. The process must exit
    /// with the fixed non-zero code so an external supervisor restarts it.
    #[error("fatal assignment invariant violation: {0}")]
    Fatal(String),
}

impl SchedulerError {
    pub fn is_validation(&self) -> bool {
        matches!(self, SchedulerError::Validation(_))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, SchedulerError::Fatal(_))
    }
}
