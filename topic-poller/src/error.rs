use std::time::Duration;

use rdkafka::error::KafkaError;
use thiserror::Error;

use crate::binding::{BindingError, Topic};
use crate::decoder::MessageField;

/// Broker or schema registry could not be reached. Fatal during startup.
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("failed to create consumer for {topic}: {source}")]
    Client { topic: Topic, source: KafkaError },
    #[error("broker unreachable for {topic} within {timeout:?}: {source}")]
    Broker {
        topic: Topic,
        timeout: Duration,
        source: KafkaError,
    },
    #[error("metadata probe for {topic} did not complete")]
    ProbeAborted { topic: Topic },
    #[error("schema registry unreachable: {0}")]
    Registry(#[from] RegistryError),
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("consumer for {0} has been stopped")]
    Stopped(Topic),
}

#[derive(Error, Debug, Clone)]
pub enum RegistryError {
    #[error("failed to reach schema registry at {url}: {reason}")]
    Unreachable { url: String, reason: String },
    #[error("schema registry returned {status} for {url}")]
    Status { url: String, status: u16 },
    #[error("schema {0} not found in registry")]
    NotFound(u32),
    #[error("schema {id} could not be parsed: {reason}")]
    InvalidSchema { id: u32, reason: String },
}

/// A single record could not be decoded. Recovered per record.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("record at offset {offset} has no value payload")]
    MissingValue { offset: i64 },
    #[error("{field} payload is {len} bytes, shorter than the 5 byte header")]
    Truncated { field: MessageField, len: usize },
    #[error("{field} payload starts with unknown magic byte {byte}")]
    UnknownMagicByte { field: MessageField, byte: u8 },
    #[error("{field} schema lookup failed: {source}")]
    Registry {
        field: MessageField,
        source: RegistryError,
    },
    #[error("{field} datum does not match schema {schema_id}: {source}")]
    Avro {
        field: MessageField,
        schema_id: u32,
        source: apache_avro::Error,
    },
    #[error("{field} datum is malformed for schema {schema_id}")]
    Malformed { field: MessageField, schema_id: u32 },
    #[error("{field} datum has {remaining} trailing bytes after decoding")]
    TrailingBytes {
        field: MessageField,
        remaining: usize,
    },
}

#[derive(Error, Debug)]
pub enum ShutdownError {
    #[error("failed to commit offsets for {topic} while stopping: {source}")]
    Commit { topic: Topic, source: KafkaError },
    #[error("consumer for {topic} did not stop within {timeout:?}")]
    Timeout { topic: Topic, timeout: Duration },
    #[error("stop task for {topic} panicked")]
    Panicked { topic: Topic },
}

impl ShutdownError {
    pub fn topic(&self) -> Topic {
        match self {
            ShutdownError::Commit { topic, .. }
            | ShutdownError::Timeout { topic, .. }
            | ShutdownError::Panicked { topic } => *topic,
        }
    }
}

/// Anything that keeps the service from starting or serving.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("invalid configuration: {0}")]
    Config(#[from] envconfig::Error),
    #[error("invalid topic binding: {0}")]
    Binding(#[from] BindingError),
    #[error("failed to build schema registry client: {0}")]
    HttpClient(#[from] reqwest::Error),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("status listener failed: {0}")]
    Io(#[from] std::io::Error),
}
