//! The partition-assignor guard: every invariant in the data model assumes
//! exactly one owner per Timetable partition. Validating that is a
//! precondition, not a best-effort check, so a violation here is fatal to
//! the process rather than merely logged.

use std::collections::HashSet;
use std::process;

use tracing::error;

use crate::error::SchedulerError;

/// Exit code used when the assignor detects an invariant violation. Fixed so
/// an external supervisor can distinguish "restart me" from an ordinary
/// panic or signal.
pub const ASSIGNMENT_VIOLATION_EXIT_CODE: i32 = 42;

/// Checks that `assigned` contains no duplicate partitions and that none of
/// them are already owned (i.e. the revoke half of a rebalance always runs
/// before the assign half). Returns `SchedulerError::Fatal` on failure; does
/// not itself decide whether to exit, so tests can observe the failure
/// without killing the test process.
pub fn validate_assignment(
    currently_owned: &HashSet<u32>,
    assigned: &[u32],
) -> Result<(), SchedulerError> {
    let mut seen = HashSet::with_capacity(assigned.len());
    for &partition in assigned {
        if !seen.insert(partition) {
            return Err(SchedulerError::Fatal(format!(
                "partition {partition} appears twice in one assignment"
            )));
        }
        if currently_owned.contains(&partition) {
            return Err(SchedulerError::Fatal(format!(
                "partition {partition} assigned while still owned from a prior assignment"
            )));
        }
    }
    Ok(())
}

/// Validates `assigned` against `currently_owned` and terminates the process
/// with [`ASSIGNMENT_VIOLATION_EXIT_CODE`] on failure. Call this from the
/// rebalance callback path; never from a context where the violation could
/// be silently swallowed.
pub fn assert_assignment_or_exit(currently_owned: &HashSet<u32>, assigned: &[u32]) {
    if let Err(error) = validate_assignment(currently_owned, assigned) {
        error!(%error, "partition-assignor invariant violated, exiting");
        process::exit(ASSIGNMENT_VIOLATION_EXIT_CODE);
    }
}
