//! Poll the users and orders topics and log every decoded record.
use std::path::Path;

use tokio::signal;
use tracing::level_filters::LevelFilter;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use topic_poller::config::Config;
use topic_poller::error::ServiceError;
use topic_poller::lifecycle;
use topic_poller::metrics::setup_metrics_recorder;

fn setup_tracing(debug: bool) {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy()
        .add_directive("rdkafka=warn".parse().expect("valid directive"));

    let log_layer = if debug {
        fmt::layer().with_target(true).with_filter(filter).boxed()
    } else {
        fmt::layer()
            .json()
            .flatten_event(true)
            .with_filter(filter)
            .boxed()
    };

    tracing_subscriber::registry().with(log_layer).init();
}

async fn shutdown() {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");

    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .expect("failed to register SIGINT handler");

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    info!("Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> Result<(), ServiceError> {
    let config = Config::load(Path::new(".env"))?;
    setup_tracing(config.debug);

    let recorder_handle = match setup_metrics_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            error!(error = %e, "failed to install metrics recorder, continuing without");
            None
        }
    };

    info!(bind = config.bind(), "starting topic poller");
    if let Err(e) = lifecycle::run(config, recorder_handle, shutdown()).await {
        error!(error = %e, "topic poller failed");
        return Err(e);
    }

    Ok(())
}
