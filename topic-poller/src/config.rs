use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use envconfig::Envconfig;

use crate::binding::{BindingError, Topic, TopicBinding, MAX_POLL_INTERVAL_SECONDS};

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "9001")]
    pub port: u16,

    #[envconfig(from = "DEBUG", default = "false")]
    pub debug: bool,

    #[envconfig(from = "CONSUMER_KAFKA_TOPIC_USERS")]
    pub kafka_topic_users: NonEmptyString,

    #[envconfig(from = "CONSUMER_KAFKA_TOPIC_ORDERS")]
    pub kafka_topic_orders: NonEmptyString,

    #[envconfig(from = "CONSUMER_POLL_INTERVAL_SECONDS")]
    pub poll_interval: PositiveSeconds,

    #[envconfig(from = "CONSUMER_FETCH_TIMEOUT_MS", default = "1000")]
    pub fetch_timeout: EnvMsDuration,

    #[envconfig(from = "CONSUMER_SHUTDOWN_TIMEOUT_MS", default = "10000")]
    pub shutdown_timeout: EnvMsDuration,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(nested = true)]
    pub schema_registry: SchemaRegistryConfig,
}

impl Config {
    /// Read `env_file` into the process environment if it exists, then load
    /// from the environment. Variables that are already set take precedence
    /// over the file.
    pub fn load(env_file: &Path) -> Result<Self, envconfig::Error> {
        dotenv::from_path(env_file).ok();
        Self::init_from_env()
    }

    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// One binding per monitored topic, all sharing the configured interval.
    pub fn bindings(&self) -> Result<Vec<TopicBinding>, BindingError> {
        Topic::ALL
            .iter()
            .map(|topic| {
                let name = match topic {
                    Topic::Users => &self.kafka_topic_users,
                    Topic::Orders => &self.kafka_topic_orders,
                };
                TopicBinding::new(*topic, name.as_str(), self.poll_interval.0)
            })
            .collect()
    }
}

#[derive(Envconfig, Clone)]
pub struct KafkaConfig {
    #[envconfig(from = "CONSUMER_KAFKA_BOOTSTRAP_SERVERS")]
    pub bootstrap_servers: NonEmptyString,

    #[envconfig(from = "CONSUMER_GROUP_ID")]
    pub group_id: NonEmptyString,

    #[envconfig(from = "CONSUMER_KAFKA_TLS", default = "false")]
    pub tls: bool,

    // earliest, latest
    #[envconfig(from = "CONSUMER_OFFSET_RESET", default = "latest")]
    pub offset_reset: String,

    #[envconfig(from = "CONSUMER_AUTO_COMMIT_INTERVAL_MS", default = "5000")]
    pub auto_commit_interval_ms: u32,

    // How long the broker gets to answer the startup metadata probe
    #[envconfig(from = "CONSUMER_STARTUP_TIMEOUT_MS", default = "10000")]
    pub startup_timeout: EnvMsDuration,
}

#[derive(Envconfig, Clone)]
pub struct SchemaRegistryConfig {
    #[envconfig(from = "CONSUMER_SCHEMA_REGISTRY_SERVER")]
    pub url: NonEmptyString,

    #[envconfig(from = "CONSUMER_SCHEMA_REGISTRY_TIMEOUT_MS", default = "5000")]
    pub request_timeout: EnvMsDuration,

    #[envconfig(from = "CONSUMER_SCHEMA_CACHE_CAPACITY", default = "1000")]
    pub cache_capacity: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(Duration::from_millis(ms)))
    }
}

/// Whole seconds, strictly greater than zero and at most one week.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositiveSeconds(pub u64);

#[derive(Debug, PartialEq, Eq)]
pub struct ParsePositiveSecondsError;

impl FromStr for PositiveSeconds {
    type Err = ParsePositiveSecondsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().parse::<u64>() {
            Ok(secs) if (1..=MAX_POLL_INTERVAL_SECONDS).contains(&secs) => {
                Ok(PositiveSeconds(secs))
            }
            _ => Err(ParsePositiveSecondsError),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonEmptyString(pub String);

impl NonEmptyString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct StringIsEmptyError;

impl FromStr for NonEmptyString {
    type Err = StringIsEmptyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            Err(StringIsEmptyError)
        } else {
            Ok(NonEmptyString(s.to_owned()))
        }
    }
}
