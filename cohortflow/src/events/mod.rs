//! Event sinks for lifecycle observability.
//!
//! The job lifecycle manager emits a [`LifecycleEvent`](crate::core::LifecycleEvent)
//! for every transition to the sink it was built with.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
