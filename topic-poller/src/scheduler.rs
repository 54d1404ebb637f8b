use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::binding::{Topic, TopicBinding};
use crate::consumer::ConsumerHandle;
use crate::decoder::RecordDecoder;
use crate::registry::ConsumerRegistry;
use crate::sink::MessageSink;
use crate::status::{PollerSlot, PollerState, PollerStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Empty,
    Logged { offset: i64 },
    DecodeFailed { offset: i64 },
    FetchFailed,
}

impl TickOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TickOutcome::Empty => "empty",
            TickOutcome::Logged { .. } => "logged",
            TickOutcome::DecodeFailed { .. } => "decode_failed",
            TickOutcome::FetchFailed => "fetch_failed",
        }
    }
}

/// Drives one topic: fetch a single record, decode it, hand it to the sink.
pub struct Poller {
    binding: TopicBinding,
    consumer: ConsumerHandle,
    decoder: Arc<RecordDecoder>,
    sink: Arc<dyn MessageSink>,
    slot: Arc<PollerSlot>,
    fetch_timeout: Duration,
}

impl Poller {
    pub fn new(
        binding: TopicBinding,
        consumer: ConsumerHandle,
        decoder: Arc<RecordDecoder>,
        sink: Arc<dyn MessageSink>,
        slot: Arc<PollerSlot>,
        fetch_timeout: Duration,
    ) -> Self {
        let fetch_timeout = binding.fetch_timeout(fetch_timeout);
        Self {
            binding,
            consumer,
            decoder,
            sink,
            slot,
            fetch_timeout,
        }
    }

    /// One fetch-decode-emit cycle. Failures are logged and reported in the
    /// outcome; nothing is retried, the next tick simply moves on.
    pub async fn tick(&self) -> TickOutcome {
        let topic = self.binding.topic();

        let record = match self.consumer.fetch_one(self.fetch_timeout).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!(%topic, "no record available");
                return TickOutcome::Empty;
            }
            Err(e) => {
                warn!(%topic, error = %e, "fetch failed, waiting for next tick");
                return TickOutcome::FetchFailed;
            }
        };

        let (partition, offset) = (record.partition, record.offset);
        match self.decoder.decode(self.binding.topic_name(), record).await {
            Ok(message) => {
                self.sink.emit(message).await;
                TickOutcome::Logged { offset }
            }
            Err(e) => {
                warn!(%topic, partition, offset, error = %e, "failed to decode record, skipping");
                TickOutcome::DecodeFailed { offset }
            }
        }
    }

    async fn run(self, cancel: CancellationToken) {
        let topic = self.binding.topic();
        let period = self.binding.poll_interval();

        // Ticks of one topic never overlap: a late tick is skipped rather
        // than queued behind the one still running.
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        self.slot.set_state(PollerState::Scheduled);
        self.slot.report_healthy();
        info!(%topic, interval_secs = period.as_secs(), "poller scheduled");

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    self.slot.set_state(PollerState::Firing);
                    let started = Instant::now();

                    let outcome = self.tick().await;

                    metrics::counter!(
                        "topic_poller_ticks_total",
                        "topic" => topic.logical_name(),
                        "outcome" => outcome.as_str()
                    )
                    .increment(1);
                    metrics::histogram!(
                        "topic_poller_tick_duration_seconds",
                        "topic" => topic.logical_name()
                    )
                    .record(started.elapsed().as_secs_f64());

                    self.slot.record(&outcome);
                    self.slot.report_healthy();
                    self.slot.set_state(PollerState::Scheduled);
                }
            }
        }

        self.slot.set_state(PollerState::Cancelled);
        info!(%topic, "poller cancelled");
    }
}

/// One independent timer task per topic, cancelled together.
pub struct PollScheduler {
    cancel: CancellationToken,
    tasks: Vec<(Topic, JoinHandle<()>)>,
}

impl PollScheduler {
    /// Spawn a poller for every binding that has an open consumer. A topic
    /// gets at most one poller; later bindings for it are skipped.
    pub fn arm(
        bindings: &[TopicBinding],
        registry: &ConsumerRegistry,
        decoder: Arc<RecordDecoder>,
        sink: Arc<dyn MessageSink>,
        status: &PollerStatus,
        fetch_timeout: Duration,
    ) -> Self {
        let cancel = CancellationToken::new();
        let mut tasks = Vec::with_capacity(bindings.len());
        let mut armed = BTreeSet::new();

        for binding in bindings {
            let topic = binding.topic();
            if !armed.insert(topic) {
                warn!(
                    %topic,
                    topic_name = binding.topic_name(),
                    "poller already armed, skipping binding"
                );
                continue;
            }
            let (Some(consumer), Some(slot)) = (registry.get(topic), status.slot(topic)) else {
                error!(%topic, "no consumer open for binding, not scheduling it");
                continue;
            };

            let poller = Poller::new(
                binding.clone(),
                consumer.clone(),
                decoder.clone(),
                sink.clone(),
                slot,
                fetch_timeout,
            );
            tasks.push((topic, tokio::spawn(poller.run(cancel.child_token()))));
        }

        info!(pollers = tasks.len(), "poll scheduler armed");
        Self { cancel, tasks }
    }

    /// Stop every timer. Ticks already running are left to finish.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait until every poller has exited.
    pub async fn join(self) {
        for (topic, task) in self.tasks {
            if let Err(e) = task.await {
                error!(%topic, error = %e, "poller task panicked");
            }
        }
    }

    pub async fn shutdown(self) {
        self.cancel();
        self.join().await;
        info!("poll scheduler stopped");
    }
}
