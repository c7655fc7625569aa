//! Schema-managed HTTP client for the analytics API (spec.md §4.4, §6).
//! Grounded on `appdAnalyticsApi.go`'s `AppDAnalyticsClient`: GET/POST/PATCH/
//! DELETE against `/events/schema/{name}`, a local schema cache, and a diff
//! that only ever emits `"add"` operations typed `"string"` (Design Notes
//! §9: schema-patch types are never inferred from sample values).

use std::collections::BTreeMap;

use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    #[serde(rename = "eventType")]
    pub event_type: String,
    pub schema: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct SchemaPatch {
    add: BTreeMap<String, String>,
    rename: BTreeMap<String, String>,
}

pub struct AnalyticsApiConfig {
    pub base_url: String,
    pub global_account_name: String,
    pub api_key: String,
}

pub struct SchemaClient {
    http: Client,
    config: AnalyticsApiConfig,
}

const MEDIA_TYPE: &str = "application/vnd.appd.events+json;v=2";

impl SchemaClient {
    pub fn new(config: AnalyticsApiConfig) -> Self {
        SchemaClient {
            http: Client::builder().cookie_store(true).timeout(std::time::Duration::from_secs(60)).build().expect("reqwest client"),
            config,
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.config.base_url, path))
            .header("X-Events-API-Key", &self.config.api_key)
            .header("X-Events-API-AccountName", &self.config.global_account_name)
            .header("Accept", MEDIA_TYPE)
    }

    pub async fn get_schema(&self, table: &str) -> EngineResult<Schema> {
        let url = format!("/events/schema/{table}");
        let resp = self.request(Method::GET, &url).send().await.map_err(|e| EngineError::TransportFailure {
            url: url.clone(),
            source: e,
        })?;
        resp.json::<Schema>().await.map_err(|e| EngineError::ResponseMalformed {
            url,
            detail: e.to_string(),
        })
    }

    pub async fn create_schema(&self, schema: &Schema) -> EngineResult<()> {
        let url = format!("/events/schema/{}", schema.event_type);
        self.request(Method::POST, &url)
            .header("Content-Type", MEDIA_TYPE)
            .json(schema)
            .send()
            .await
            .map_err(|e| EngineError::TransportFailure { url, source: e })?;
        Ok(())
    }

    pub async fn delete_schema(&self, table: &str) -> EngineResult<()> {
        let url = format!("/events/schema/{table}");
        self.request(Method::DELETE, &url)
            .send()
            .await
            .map_err(|e| EngineError::TransportFailure { url, source: e })?;
        Ok(())
    }

    /// Creates the schema table, retrying up to `attempts` times on a fixed
    /// `interval` — the original's workaround for eventual consistency
    /// between a delete and the name becoming available again.
    pub async fn create_schema_if_not_present(
        &self,
        schema: &Schema,
        attempts: u32,
        interval: std::time::Duration,
    ) -> EngineResult<()> {
        let mut last_err = None;
        for attempt in 0..attempts.max(1) {
            match self.create_schema(schema).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::debug!(attempt, error = %e, "schema create attempt failed, retrying");
                    last_err = Some(e);
                    tokio::time::sleep(interval).await;
                }
            }
        }
        Err(last_err.unwrap_or_else(|| EngineError::SchemaMismatch {
            table: schema.event_type.clone(),
            detail: "schema creation exhausted retries".to_string(),
        }))
    }

    /// Diffs `needed` fields (every key present in a bundle about to be
    /// published) against `cached`, returning the fields that must be
    /// PATCHed in (always typed `string`).
    pub fn needed_patch(cached: &Schema, needed: &[String]) -> BTreeMap<String, String> {
        needed
            .iter()
            .filter(|f| !cached.schema.contains_key(*f))
            .map(|f| (f.clone(), "string".to_string()))
            .collect()
    }

    pub async fn update_schema(&self, table: &str, add: BTreeMap<String, String>) -> EngineResult<()> {
        if add.is_empty() {
            return Ok(());
        }
        let url = format!("/events/schema/{table}");
        let patch = vec![SchemaPatch {
            add,
            rename: BTreeMap::new(),
        }];
        self.request(Method::PATCH, &url)
            .header("Content-Type", MEDIA_TYPE)
            .json(&patch)
            .send()
            .await
            .map_err(|e| EngineError::TransportFailure { url, source: e })?;
        Ok(())
    }

    /// Ensures the remote schema has every field in `needed`, fetching,
    /// diffing, and patching as required (spec.md §4.4 schema lifecycle
    /// step 3).
    pub async fn ensure_schema(&self, table: &str, needed: &[String]) -> EngineResult<Schema> {
        let cached = self.get_schema(table).await?;
        let add = Self::needed_patch(&cached, needed);
        if add.is_empty() {
            return Ok(cached);
        }
        self.update_schema(table, add).await?;
        self.get_schema(table).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn needed_patch_only_adds_missing_fields_as_string() {
        let cached = Schema {
            event_type: "t".to_string(),
            schema: [("a".to_string(), "string".to_string())].into_iter().collect(),
        };
        let patch = SchemaClient::needed_patch(&cached, &["a".to_string(), "b".to_string()]);
        assert_eq!(patch.len(), 1);
        assert_eq!(patch.get("b"), Some(&"string".to_string()));
    }
}
