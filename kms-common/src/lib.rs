mod clock;
mod kill_switch;
pub mod latch;
mod logging;

pub use clock::{now_unix_seconds, parse_deliver_at};
pub use kill_switch::KillSwitch;
pub use logging::{setup_logging, setup_logging_for_tests};
