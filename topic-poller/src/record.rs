use serde::Serialize;
use serde_json::Value;

/// A record as handed over by the broker client, owned so it can outlive
/// the consumer borrow it was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    pub timestamp_millis: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Value>,
    pub value: Value,
    pub timestamp_millis: Option<i64>,
}
