use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

/// Longest accepted poll interval: one week.
pub const MAX_POLL_INTERVAL_SECONDS: u64 = 7 * 24 * 60 * 60;

/// The closed set of topics this service monitors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    Users,
    Orders,
}

impl Topic {
    pub const ALL: [Topic; 2] = [Topic::Users, Topic::Orders];

    pub fn logical_name(&self) -> &'static str {
        match self {
            Topic::Users => "users",
            Topic::Orders => "orders",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.logical_name())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BindingError {
    #[error("poll interval for {0} must be a positive number of seconds")]
    ZeroInterval(Topic),
    #[error("poll interval for {topic} must be at most {max} seconds")]
    IntervalTooLong { topic: Topic, max: u64 },
    #[error("topic name for {0} must not be empty")]
    EmptyTopicName(Topic),
}

/// One monitored topic: which broker topic backs a logical name, and how
/// often it is polled. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicBinding {
    topic: Topic,
    topic_name: String,
    poll_interval_seconds: u64,
}

impl TopicBinding {
    pub fn new(
        topic: Topic,
        topic_name: impl Into<String>,
        poll_interval_seconds: u64,
    ) -> Result<Self, BindingError> {
        let topic_name = topic_name.into();
        if topic_name.is_empty() {
            return Err(BindingError::EmptyTopicName(topic));
        }
        if poll_interval_seconds == 0 {
            return Err(BindingError::ZeroInterval(topic));
        }
        if poll_interval_seconds > MAX_POLL_INTERVAL_SECONDS {
            return Err(BindingError::IntervalTooLong {
                topic,
                max: MAX_POLL_INTERVAL_SECONDS,
            });
        }

        Ok(Self {
            topic,
            topic_name,
            poll_interval_seconds,
        })
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }

    pub fn logical_name(&self) -> &'static str {
        self.topic.logical_name()
    }

    pub fn topic_name(&self) -> &str {
        &self.topic_name
    }

    pub fn poll_interval_seconds(&self) -> u64 {
        self.poll_interval_seconds
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    /// Wait used for each fetch: the configured timeout, capped at half the
    /// poll interval so a tick is always over before the next one is due.
    pub fn fetch_timeout(&self, configured: Duration) -> Duration {
        configured.min(self.poll_interval() / 2)
    }
}

/// Keep the first binding of each topic. Every topic has exactly one
/// consumer and one poller, so later bindings for it are dropped.
pub fn unique_by_topic(bindings: Vec<TopicBinding>) -> Vec<TopicBinding> {
    let mut seen = BTreeSet::new();
    bindings
        .into_iter()
        .filter(|binding| {
            let first = seen.insert(binding.topic());
            if !first {
                warn!(
                    topic = %binding.topic(),
                    topic_name = binding.topic_name(),
                    "duplicate binding ignored"
                );
            }
            first
        })
        .collect()
}
