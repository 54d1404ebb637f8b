use std::sync::Arc;
use std::time::Duration;

use apache_avro::Schema;
use async_trait::async_trait;
use moka::future::Cache;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::RegistryError;

/// Resolves schema ids embedded in payloads to parsed Avro schemas.
#[async_trait]
pub trait SchemaRegistry: Send + Sync {
    async fn schema(&self, id: u32) -> Result<Arc<Schema>, RegistryError>;

    /// Reachability check run once during startup.
    async fn ping(&self) -> Result<(), RegistryError>;

    async fn close(&self);
}

#[derive(Debug, Deserialize)]
struct SchemaResponse {
    schema: String,
}

/// Client for a Confluent-compatible schema registry REST API, with parsed
/// schemas cached by id.
pub struct HttpSchemaRegistry {
    base_url: String,
    client: reqwest::Client,
    cache: Cache<u32, Arc<Schema>>,
}

impl HttpSchemaRegistry {
    pub fn new(
        base_url: &str,
        request_timeout: Duration,
        cache_capacity: u64,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            client,
            cache: Cache::builder().max_capacity(cache_capacity).build(),
        })
    }

    async fn fetch(&self, id: u32) -> Result<Arc<Schema>, RegistryError> {
        let url = format!("{}/schemas/ids/{}", self.base_url, id);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| RegistryError::Unreachable {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => return Err(RegistryError::NotFound(id)),
            status if !status.is_success() => {
                return Err(RegistryError::Status {
                    url,
                    status: status.as_u16(),
                })
            }
            _ => {}
        }

        let body: SchemaResponse =
            response
                .json()
                .await
                .map_err(|e| RegistryError::InvalidSchema {
                    id,
                    reason: e.to_string(),
                })?;

        let schema = Schema::parse_str(&body.schema).map_err(|e| RegistryError::InvalidSchema {
            id,
            reason: e.to_string(),
        })?;

        debug!(schema_id = id, "schema fetched from registry");
        Ok(Arc::new(schema))
    }
}

#[async_trait]
impl SchemaRegistry for HttpSchemaRegistry {
    async fn schema(&self, id: u32) -> Result<Arc<Schema>, RegistryError> {
        if let Some(cached) = self.cache.get(&id).await {
            return Ok(cached);
        }

        // Concurrent misses for the same id share a single request.
        self.cache
            .try_get_with(id, self.fetch(id))
            .await
            .map_err(|e| (*e).clone())
    }

    async fn ping(&self) -> Result<(), RegistryError> {
        let url = format!("{}/subjects", self.base_url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| RegistryError::Unreachable {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(RegistryError::Status {
                url,
                status: response.status().as_u16(),
            });
        }

        Ok(())
    }

    async fn close(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
        info!(url = %self.base_url, "schema registry client released");
    }
}
