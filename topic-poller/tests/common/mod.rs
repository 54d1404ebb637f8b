#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use apache_avro::types::Value as AvroValue;
use apache_avro::{to_avro_datum, Schema};
use async_trait::async_trait;
use tokio::time::Instant;

use topic_poller::binding::{Topic, TopicBinding};
use topic_poller::consumer::{ConsumerFactory, ConsumerHandle, TopicConsumer};
use topic_poller::error::{ConnectionError, FetchError, RegistryError, ShutdownError};
use topic_poller::lifecycle::ServiceContext;
use topic_poller::record::{DecodedMessage, RawRecord};
use topic_poller::schema_registry::SchemaRegistry;
use topic_poller::sink::MessageSink;

pub const KEY_SCHEMA_ID: u32 = 1;
pub const ORDER_SCHEMA_ID: u32 = 2;

pub const ORDER_SCHEMA: &str = r#"{
    "type": "record",
    "name": "Order",
    "fields": [
        {"name": "id", "type": "long"},
        {"name": "amount", "type": "double"}
    ]
}"#;

/// Ordered log of what the fakes saw, shared across all of them.
#[derive(Clone, Default)]
pub struct Events(Arc<Mutex<Vec<String>>>);

impl Events {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn all(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.all().iter().position(|e| e == event)
    }
}

pub struct FakeConsumer {
    topic: Topic,
    records: Mutex<VecDeque<RawRecord>>,
    fetch_delay: Duration,
    fetch_starts: Mutex<Vec<Instant>>,
    fetches_completed: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    stopped: AtomicBool,
    stop_calls: AtomicUsize,
    releases: AtomicUsize,
    events: Events,
}

impl FakeConsumer {
    pub fn new(topic: Topic, events: Events) -> Self {
        Self {
            topic,
            records: Mutex::new(VecDeque::new()),
            fetch_delay: Duration::ZERO,
            fetch_starts: Mutex::new(Vec::new()),
            fetches_completed: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            stopped: AtomicBool::new(false),
            stop_calls: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
            events,
        }
    }

    /// Every fetch blocks for `delay`, whatever timeout it was given.
    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }

    pub fn with_records(self, records: Vec<RawRecord>) -> Self {
        self.records.lock().unwrap().extend(records);
        self
    }

    pub fn fetch_starts(&self) -> Vec<Instant> {
        self.fetch_starts.lock().unwrap().clone()
    }

    pub fn fetches_completed(&self) -> usize {
        self.fetches_completed.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TopicConsumer for FakeConsumer {
    fn topic(&self) -> Topic {
        self.topic
    }

    async fn fetch_one(&self, timeout: Duration) -> Result<Option<RawRecord>, FetchError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(FetchError::Stopped(self.topic));
        }

        self.fetch_starts.lock().unwrap().push(Instant::now());
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        self.events.push(format!("{}:fetch_start", self.topic));

        if !self.fetch_delay.is_zero() {
            tokio::time::sleep(self.fetch_delay).await;
        }
        let record = self.records.lock().unwrap().pop_front();
        if record.is_none() && self.fetch_delay.is_zero() {
            tokio::time::sleep(timeout).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.fetches_completed.fetch_add(1, Ordering::SeqCst);
        self.events.push(format!("{}:fetch_end", self.topic));
        Ok(record)
    }

    async fn stop(&self) -> Result<(), ShutdownError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.events.push(format!("{}:stop", self.topic));
        Ok(())
    }
}

pub struct FakeFactory {
    consumers: BTreeMap<Topic, Arc<FakeConsumer>>,
    unreachable: Option<Topic>,
    connects: AtomicUsize,
}

impl FakeFactory {
    pub fn new(consumers: Vec<Arc<FakeConsumer>>) -> Self {
        Self {
            consumers: consumers.into_iter().map(|c| (c.topic(), c)).collect(),
            unreachable: None,
            connects: AtomicUsize::new(0),
        }
    }

    pub fn unreachable_for(mut self, topic: Topic) -> Self {
        self.unreachable = Some(topic);
        self
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConsumerFactory for FakeFactory {
    async fn connect(&self, binding: &TopicBinding) -> Result<ConsumerHandle, ConnectionError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.unreachable == Some(binding.topic()) {
            return Err(ConnectionError::ProbeAborted {
                topic: binding.topic(),
            });
        }
        let consumer: ConsumerHandle = self
            .consumers
            .get(&binding.topic())
            .cloned()
            .expect("no fake consumer for topic");
        Ok(consumer)
    }
}

pub struct FakeRegistry {
    schemas: HashMap<u32, Arc<Schema>>,
    lookup_delay: Duration,
    failing_lookups: AtomicUsize,
    unreachable: bool,
    closed: AtomicBool,
    events: Events,
}

impl FakeRegistry {
    pub fn new(events: Events) -> Self {
        let schemas = HashMap::from([
            (
                KEY_SCHEMA_ID,
                Arc::new(Schema::parse_str(r#""string""#).unwrap()),
            ),
            (
                ORDER_SCHEMA_ID,
                Arc::new(Schema::parse_str(ORDER_SCHEMA).unwrap()),
            ),
        ]);
        Self {
            schemas,
            lookup_delay: Duration::ZERO,
            failing_lookups: AtomicUsize::new(0),
            unreachable: false,
            closed: AtomicBool::new(false),
            events,
        }
    }

    pub fn with_lookup_delay(mut self, delay: Duration) -> Self {
        self.lookup_delay = delay;
        self
    }

    /// The next `count` schema lookups fail as if the registry were down.
    pub fn with_failing_lookups(self, count: usize) -> Self {
        self.failing_lookups.store(count, Ordering::SeqCst);
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SchemaRegistry for FakeRegistry {
    async fn schema(&self, id: u32) -> Result<Arc<Schema>, RegistryError> {
        if !self.lookup_delay.is_zero() {
            tokio::time::sleep(self.lookup_delay).await;
        }
        let failing = self
            .failing_lookups
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            self.events.push(format!("schema:{id}:failed"));
            return Err(RegistryError::Unreachable {
                url: format!("http://registry.invalid/schemas/ids/{id}"),
                reason: "connection refused".to_string(),
            });
        }
        self.events.push(format!("schema:{id}"));
        self.schemas.get(&id).cloned().ok_or(RegistryError::NotFound(id))
    }

    async fn ping(&self) -> Result<(), RegistryError> {
        if self.unreachable {
            return Err(RegistryError::Unreachable {
                url: "http://registry.invalid".to_string(),
                reason: "connection refused".to_string(),
            });
        }
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.events.push("registry:close");
    }
}

#[derive(Default)]
pub struct CollectingSink {
    messages: Mutex<Vec<DecodedMessage>>,
}

impl CollectingSink {
    pub fn messages(&self) -> Vec<DecodedMessage> {
        self.messages.lock().unwrap().clone()
    }

    pub fn offsets(&self) -> Vec<i64> {
        self.messages().iter().map(|m| m.offset).collect()
    }
}

#[async_trait]
impl MessageSink for CollectingSink {
    async fn emit(&self, message: DecodedMessage) {
        self.messages.lock().unwrap().push(message);
    }
}

fn frame(schema_id: u32, datum: Vec<u8>) -> Vec<u8> {
    let mut payload = vec![0];
    payload.extend_from_slice(&schema_id.to_be_bytes());
    payload.extend(datum);
    payload
}

pub fn order_record(topic: &str, offset: i64, id: i64, amount: f64) -> RawRecord {
    let key_schema = Schema::parse_str(r#""string""#).unwrap();
    let value_schema = Schema::parse_str(ORDER_SCHEMA).unwrap();

    let key = to_avro_datum(&key_schema, AvroValue::String(format!("order-{id}"))).unwrap();
    let value = to_avro_datum(
        &value_schema,
        AvroValue::Record(vec![
            ("id".to_string(), AvroValue::Long(id)),
            ("amount".to_string(), AvroValue::Double(amount)),
        ]),
    )
    .unwrap();

    RawRecord {
        topic: topic.to_string(),
        partition: 0,
        offset,
        key: Some(frame(KEY_SCHEMA_ID, key)),
        value: Some(frame(ORDER_SCHEMA_ID, value)),
        timestamp_millis: Some(1_700_000_000_000 + offset),
    }
}

pub fn malformed_record(topic: &str, offset: i64) -> RawRecord {
    RawRecord {
        topic: topic.to_string(),
        partition: 0,
        offset,
        key: None,
        value: Some(vec![0, 0, 0]),
        timestamp_millis: None,
    }
}

pub fn binding(topic: Topic, name: &str, interval_secs: u64) -> TopicBinding {
    TopicBinding::new(topic, name, interval_secs).unwrap()
}

pub fn context(
    bindings: Vec<TopicBinding>,
    registry: Arc<FakeRegistry>,
    factory: Arc<FakeFactory>,
    sink: Arc<CollectingSink>,
) -> ServiceContext {
    ServiceContext {
        bindings,
        schema_registry: registry,
        consumers: factory,
        sink,
        fetch_timeout: Duration::from_millis(500),
        close_timeout: Duration::from_secs(5),
    }
}
