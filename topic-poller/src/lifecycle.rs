use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::binding::{unique_by_topic, TopicBinding};
use crate::config::Config;
use crate::consumer::{ConsumerFactory, KafkaConsumerFactory};
use crate::decoder::RecordDecoder;
use crate::error::{ConnectionError, ServiceError, ShutdownError};
use crate::registry::ConsumerRegistry;
use crate::router::router;
use crate::scheduler::PollScheduler;
use crate::schema_registry::{HttpSchemaRegistry, SchemaRegistry};
use crate::sink::{LogSink, MessageSink};
use crate::status::PollerStatus;

/// Everything the service needs, built up front and handed to
/// [`ServiceLifecycle::start`]. Nothing is looked up globally afterwards.
pub struct ServiceContext {
    pub bindings: Vec<TopicBinding>,
    pub schema_registry: Arc<dyn SchemaRegistry>,
    pub consumers: Arc<dyn ConsumerFactory>,
    pub sink: Arc<dyn MessageSink>,
    pub fetch_timeout: Duration,
    pub close_timeout: Duration,
}

impl ServiceContext {
    /// Builds the schema registry client and the Kafka consumer factory.
    /// No connection is made yet.
    pub fn from_config(config: &Config) -> Result<Self, ServiceError> {
        let bindings = config.bindings()?;

        let schema_registry = HttpSchemaRegistry::new(
            config.schema_registry.url.as_str(),
            config.schema_registry.request_timeout.0,
            config.schema_registry.cache_capacity,
        )?;

        Ok(Self {
            bindings,
            schema_registry: Arc::new(schema_registry),
            consumers: Arc::new(KafkaConsumerFactory::new(config.kafka.clone())),
            sink: Arc::new(LogSink),
            fetch_timeout: config.fetch_timeout.0,
            close_timeout: config.shutdown_timeout.0,
        })
    }
}

/// The running service: consumers, pollers and the schema registry client,
/// started and stopped in a fixed order.
pub struct ServiceLifecycle {
    schema_registry: Arc<dyn SchemaRegistry>,
    registry: ConsumerRegistry,
    scheduler: PollScheduler,
    status: PollerStatus,
    shutdown: CancellationToken,
}

impl ServiceLifecycle {
    /// Check the schema registry, open every consumer, then arm the
    /// scheduler. Any failure aborts before the scheduler exists, with
    /// whatever was opened already released.
    pub async fn start(context: ServiceContext) -> Result<Self, ConnectionError> {
        let ServiceContext {
            bindings,
            schema_registry,
            consumers,
            sink,
            fetch_timeout,
            close_timeout,
        } = context;
        let bindings = unique_by_topic(bindings);

        if let Err(e) = schema_registry.ping().await {
            error!(error = %e, "schema registry unreachable, aborting startup");
            schema_registry.close().await;
            return Err(e.into());
        }

        let registry =
            match ConsumerRegistry::open(&bindings, consumers.as_ref(), close_timeout).await {
                Ok(registry) => registry,
                Err(e) => {
                    error!(error = %e, "failed to open consumers, aborting startup");
                    schema_registry.close().await;
                    return Err(e);
                }
            };

        let shutdown = CancellationToken::new();
        let status = PollerStatus::new(&bindings, fetch_timeout, shutdown.clone());
        let decoder = Arc::new(RecordDecoder::new(schema_registry.clone()));
        let scheduler =
            PollScheduler::arm(&bindings, &registry, decoder, sink, &status, fetch_timeout);

        info!(topics = registry.len(), "service started");
        Ok(Self {
            schema_registry,
            registry,
            scheduler,
            status,
            shutdown,
        })
    }

    pub fn status(&self) -> PollerStatus {
        self.status.clone()
    }

    /// Cancelled as soon as shutdown begins; readiness reports unavailable
    /// from then on.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Reverse of startup: stop the pollers and wait for running ticks, close
    /// every consumer, release the schema registry client. Close failures are
    /// logged and returned; they never stop the remaining steps.
    pub async fn shutdown(self) -> Vec<ShutdownError> {
        info!("service shutting down");
        self.shutdown.cancel();

        self.scheduler.shutdown().await;
        let failures = self.registry.close_all().await;
        self.schema_registry.close().await;

        if failures.is_empty() {
            info!("service stopped");
        } else {
            warn!(failures = failures.len(), "service stopped with close failures");
        }
        failures
    }
}

/// Start the service, serve the status endpoints until `shutdown_signal`
/// resolves, then shut everything down.
pub async fn run<F>(
    config: Config,
    metrics: Option<PrometheusHandle>,
    shutdown_signal: F,
) -> Result<(), ServiceError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let context = ServiceContext::from_config(&config)?;
    let service = ServiceLifecycle::start(context).await?;

    let listener = match tokio::net::TcpListener::bind(config.bind()).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(bind = config.bind(), error = %e, "failed to bind status listener");
            service.shutdown().await;
            return Err(e.into());
        }
    };
    info!(bind = config.bind(), "status listener accepting requests");

    let token = service.shutdown_token();
    let served = axum::serve(listener, router(service.status(), metrics))
        .with_graceful_shutdown(async move {
            shutdown_signal.await;
            token.cancel();
        })
        .await;

    service.shutdown().await;
    served.map_err(ServiceError::from)
}
