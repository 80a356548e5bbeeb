// crates/events/src/lib.rs
//! In-process publish-subscribe for scribeflow.
//!
//! [`EventBus`] is a generic typed register of [`EventSink`]s. Delivery is
//! at-most-once and lossy on full queues: a slow subscriber drops events
//! rather than back-pressuring the publisher.

pub mod bus;
pub mod domain;

pub use bus::{CallbackSink, Delivery, EventBus, EventSink, QueueSink, SinkId};
pub use domain::{AudioFileEvent, DomainEvent, EventKind, ProjectEvent};
