use async_trait::async_trait;
use tracing::info;

use crate::record::DecodedMessage;

/// Where decoded messages end up.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn emit(&self, message: DecodedMessage);
}

/// Writes each message as one structured log event.
pub struct LogSink;

#[async_trait]
impl MessageSink for LogSink {
    async fn emit(&self, message: DecodedMessage) {
        let key = message
            .key
            .as_ref()
            .map(|key| key.to_string())
            .unwrap_or_else(|| "null".to_owned());

        info!(
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            key = %key,
            value = %message.value,
            timestamp = message.timestamp_millis,
            "decoded message"
        );
    }
}
