use std::collections::BTreeMap;
use std::time::Duration;

use futures::future::join_all;
use tracing::{error, info, warn};

use crate::binding::{Topic, TopicBinding};
use crate::consumer::{ConsumerFactory, ConsumerHandle};
use crate::error::{ConnectionError, ShutdownError};

/// Owns one consumer handle per bound topic. Built once at startup and never
/// changed afterwards; pollers borrow clones of the handles and must be
/// finished before [`ConsumerRegistry::close_all`] runs.
pub struct ConsumerRegistry {
    handles: BTreeMap<Topic, ConsumerHandle>,
    close_timeout: Duration,
}

impl ConsumerRegistry {
    /// Connect a consumer for every binding. If any of them fails, the ones
    /// already opened are closed again before the error is returned.
    pub async fn open(
        bindings: &[TopicBinding],
        factory: &dyn ConsumerFactory,
        close_timeout: Duration,
    ) -> Result<Self, ConnectionError> {
        let mut registry = Self {
            handles: BTreeMap::new(),
            close_timeout,
        };

        for binding in bindings {
            if registry.handles.contains_key(&binding.topic()) {
                warn!(topic = %binding.topic(), "duplicate binding ignored");
                continue;
            }

            match factory.connect(binding).await {
                Ok(handle) => {
                    registry.handles.insert(binding.topic(), handle);
                }
                Err(e) => {
                    error!(topic = %binding.topic(), error = %e, "failed to open consumer");
                    registry.close_all().await;
                    return Err(e);
                }
            }
        }

        info!(consumers = registry.handles.len(), "consumer registry opened");
        Ok(registry)
    }

    pub fn get(&self, topic: Topic) -> Option<&ConsumerHandle> {
        self.handles.get(&topic)
    }

    pub fn topics(&self) -> impl Iterator<Item = Topic> + '_ {
        self.handles.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Stop every handle concurrently, each bounded by the close timeout, so
    /// one stuck consumer cannot hold up the rest. Failures are logged and
    /// returned, never short-circuited.
    pub async fn close_all(self) -> Vec<ShutdownError> {
        let close_timeout = self.close_timeout;

        let results = join_all(self.handles.into_iter().map(|(topic, handle)| async move {
            match tokio::time::timeout(close_timeout, handle.stop()).await {
                Ok(result) => result,
                Err(_) => Err(ShutdownError::Timeout {
                    topic,
                    timeout: close_timeout,
                }),
            }
        }))
        .await;

        let failures: Vec<ShutdownError> = results.into_iter().filter_map(Result::err).collect();
        for failure in &failures {
            error!(topic = %failure.topic(), error = %failure, "failed to close consumer");
        }

        info!(failures = failures.len(), "consumer registry closed");
        failures
    }
}
