//! Delayed-delivery scheduling engine: clients publish a message with a
//! future delivery time and a destination topic; the engine holds it in a
//! partitioned, changelog-backed key-value store (the Timetable) and
//! re-publishes it at the requested second. See [`actors::manager::Manager`]
//! for the entry point that ties ingress, the Timetable, and the
//! per-partition Dispatcher/Janitor workers together.

pub mod actors;
pub mod assignor;
pub mod broker;
pub mod error;
pub mod location;
pub mod observer;
pub mod record;
pub mod timetable;
pub mod worker;

pub use actors::checkpoint::Checkpoint;
pub use actors::dispatcher::Dispatcher;
pub use actors::janitor::Janitor;
pub use actors::manager::Manager;
pub use broker::{BrokerError, BrokerOffset, ConsumedRecord, Consumer, LocalBroker, Producer, RebalanceListener};
pub use error::SchedulerError;
pub use location::{TTLocation, WorkerKind, PT};
pub use observer::{CountingObserver, NoopObserver, Observer};
pub use record::{
    DlqRecord, Headers, MessageRecord, ACTION_ADD, HEADER_ACTION, HEADER_DELIVER_AT, HEADER_DELIVER_TO,
};
pub use timetable::Timetable;
pub use worker::Worker;
