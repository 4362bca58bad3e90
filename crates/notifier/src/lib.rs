//! Notification delivery pipeline.
//!
//! Producers enqueue work items through [`queue::NotificationQueue`]; the
//! [`worker::NotificationWorker`] polls the record store, fans each item out
//! over the registered [`channels::ChannelSender`]s and applies the
//! retry/dead-letter policy.

pub mod channels;
pub mod dispatcher;
pub mod queue;
pub mod store;
pub mod worker;
