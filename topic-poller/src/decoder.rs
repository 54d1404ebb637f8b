use std::fmt;
use std::sync::Arc;

use apache_avro::from_avro_datum;
use serde_json::Value;
use tracing::debug;

use crate::error::DecodeError;
use crate::record::{DecodedMessage, RawRecord};
use crate::schema_registry::SchemaRegistry;

const MAGIC_BYTE: u8 = 0;
const HEADER_LEN: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageField {
    Key,
    Value,
}

impl fmt::Display for MessageField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageField::Key => f.write_str("key"),
            MessageField::Value => f.write_str("value"),
        }
    }
}

/// Which half of which topic a payload belongs to. Keys and values of the
/// same topic are registered under different subjects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializationContext<'a> {
    pub topic: &'a str,
    pub field: MessageField,
}

impl<'a> SerializationContext<'a> {
    pub fn new(topic: &'a str, field: MessageField) -> Self {
        Self { topic, field }
    }

    pub fn subject(&self) -> String {
        format!("{}-{}", self.topic, self.field)
    }
}

/// Turns schema-registry framed Avro payloads into JSON values.
///
/// Payloads carry a magic byte, a big-endian schema id and the Avro datum.
/// The schema is looked up through the registry on every call; caching is
/// the registry's business.
pub struct RecordDecoder {
    registry: Arc<dyn SchemaRegistry>,
}

impl RecordDecoder {
    pub fn new(registry: Arc<dyn SchemaRegistry>) -> Self {
        Self { registry }
    }

    pub async fn decode(&self, topic: &str, raw: RawRecord) -> Result<DecodedMessage, DecodeError> {
        let key = match raw.key.as_deref() {
            Some(bytes) => Some(
                self.decode_field(&SerializationContext::new(topic, MessageField::Key), bytes)
                    .await?,
            ),
            None => None,
        };

        let value_bytes = raw
            .value
            .as_deref()
            .ok_or(DecodeError::MissingValue { offset: raw.offset })?;
        let value = self
            .decode_field(
                &SerializationContext::new(topic, MessageField::Value),
                value_bytes,
            )
            .await?;

        Ok(DecodedMessage {
            topic: raw.topic,
            partition: raw.partition,
            offset: raw.offset,
            key,
            value,
            timestamp_millis: raw.timestamp_millis,
        })
    }

    async fn decode_field(
        &self,
        context: &SerializationContext<'_>,
        payload: &[u8],
    ) -> Result<Value, DecodeError> {
        let field = context.field;
        let (schema_id, mut datum) = split_header(field, payload)?;

        let schema = self
            .registry
            .schema(schema_id)
            .await
            .map_err(|source| DecodeError::Registry { field, source })?;

        debug!(subject = %context.subject(), schema_id, "decoding payload");

        let value = from_avro_datum(&schema, &mut datum, None).map_err(|source| {
            DecodeError::Avro {
                field,
                schema_id,
                source,
            }
        })?;

        // A datum cut short inside a string or bytes field reads back as
        // null instead of failing.
        if !value.validate(&schema) {
            return Err(DecodeError::Malformed { field, schema_id });
        }

        if !datum.is_empty() {
            return Err(DecodeError::TrailingBytes {
                field,
                remaining: datum.len(),
            });
        }

        Value::try_from(value).map_err(|source| DecodeError::Avro {
            field,
            schema_id,
            source,
        })
    }
}

fn split_header(field: MessageField, payload: &[u8]) -> Result<(u32, &[u8]), DecodeError> {
    if payload.len() < HEADER_LEN {
        return Err(DecodeError::Truncated {
            field,
            len: payload.len(),
        });
    }
    if payload[0] != MAGIC_BYTE {
        return Err(DecodeError::UnknownMagicByte {
            field,
            byte: payload[0],
        });
    }

    let schema_id = u32::from_be_bytes([payload[1], payload[2], payload[3], payload[4]]);
    Ok((schema_id, &payload[HEADER_LEN..]))
}
