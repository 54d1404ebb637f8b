//! Polls a fixed set of Kafka topics on independent timers, decodes each
//! record against a schema registry and logs it.

pub mod binding;
pub mod config;
pub mod consumer;
pub mod decoder;
pub mod error;
pub mod lifecycle;
pub mod metrics;
pub mod record;
pub mod registry;
pub mod router;
pub mod scheduler;
pub mod schema_registry;
pub mod sink;
pub mod status;
