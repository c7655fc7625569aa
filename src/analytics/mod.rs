//! Analytics sink: schema management, cumulative-to-delta conversion, and
//! timer-coalesced bundling/publishing of scraped metrics and logs (spec.md
//! §4.4), plus the supplemental metric-tree derivation (SPEC_FULL.md §11).

pub mod bundler;
pub mod cumulative;
pub mod metric_tree;
pub mod schema;

use std::collections::BTreeMap;
use std::sync::Arc;

use reqwest::Client;

use crate::error::{EngineError, EngineResult};
use crate::telemetry::{AggregationType, Log, LogConsumer, Metric, MetricConsumer};
use bundler::{Bundler, FlushHandler};
use cumulative::CumulativeCache;
use metric_tree::MetricTreeRule;
use schema::{AnalyticsApiConfig, Schema, SchemaClient};

/// Publishes a flushed bundle of records as a JSON array to
/// `/events/publish/{table}`, ensuring the remote schema has every field
/// the bundle carries before sending (spec.md §4.4 schema lifecycle).
struct Publisher {
    http: Client,
    base_url: String,
    schema: Arc<SchemaClient>,
}

impl Publisher {
    async fn publish(&self, table: &str, records: Vec<serde_json::Value>) -> EngineResult<()> {
        let fields: Vec<String> = records
            .iter()
            .filter_map(|r| r.as_object())
            .flat_map(|o| o.keys().cloned())
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();
        if self.schema.ensure_schema(table, &fields).await.is_err() {
            // table doesn't exist yet: create it from scratch and retry once
            let schema = Schema {
                event_type: table.to_string(),
                schema: fields.iter().map(|f| (f.clone(), "string".to_string())).collect(),
            };
            self.schema
                .create_schema_if_not_present(&schema, 5, std::time::Duration::from_secs(1))
                .await?;
        }

        let url = format!("{}/events/publish/{}", self.base_url, table);
        self.http
            .post(&url)
            .header("Content-Type", "application/vnd.appd.events+json;v=2")
            .json(&records)
            .send()
            .await
            .map_err(|e| EngineError::TransportFailure { url, source: e })?;
        Ok(())
    }
}

struct BundlerFlushHandler {
    publisher: Arc<Publisher>,
    runtime: tokio::runtime::Handle,
}

impl FlushHandler for BundlerFlushHandler {
    fn flush(&self, table: &str, records: Vec<serde_json::Value>) {
        let publisher = Arc::clone(&self.publisher);
        let table = table.to_string();
        self.runtime.spawn(async move {
            if let Err(e) = publisher.publish(&table, records).await {
                tracing::warn!(table = %table, error = %e, "failed to publish analytics bundle");
            }
        });
    }
}

/// Wires schema management, cumulative-to-delta conversion, metric-tree
/// derivation, and bundled publishing into the single downstream consumer
/// the scrape engine hands metrics and logs to.
pub struct AnalyticsSink {
    bundler: Arc<Bundler>,
    cumulative: CumulativeCache,
    metric_tree_rules: Vec<MetricTreeRule>,
    machine_agent_url: Option<String>,
    http: Client,
}

pub const METRICS_TABLE: &str = "fabric_metrics";
pub const LOGS_TABLE: &str = "fabric_logs";

impl AnalyticsSink {
    pub fn new(config: AnalyticsApiConfig, machine_agent_url: Option<String>, metric_tree_rules: Vec<MetricTreeRule>) -> Self {
        let http = Client::builder()
            .cookie_store(true)
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .expect("reqwest client");
        let base_url = config.base_url.clone();
        let schema = Arc::new(SchemaClient::new(config));
        let publisher = Arc::new(Publisher {
            http: http.clone(),
            base_url,
            schema,
        });
        let handler = Arc::new(BundlerFlushHandler {
            publisher,
            runtime: tokio::runtime::Handle::current(),
        });
        AnalyticsSink {
            bundler: Arc::new(Bundler::new(handler)),
            cumulative: CumulativeCache::default(),
            metric_tree_rules,
            machine_agent_url,
            http,
        }
    }

    fn metric_record(&self, metric: &Metric) -> Option<serde_json::Value> {
        let value = match metric.aggregation {
            AggregationType::Gauge => metric.value,
            AggregationType::Sum => {
                let mut attrs = stringify_attrs(&metric.resource_attributes);
                attrs.extend(stringify_attrs(&metric.attributes));
                let key = CumulativeCache::cache_key(&metric.name, &attrs);
                self.cumulative.delta(&key, metric.value)?
            }
        };
        let mut obj = serde_json::Map::new();
        obj.insert("name".to_string(), serde_json::Value::String(metric.name.clone()));
        obj.insert("value".to_string(), serde_json::json!(value));
        obj.insert("timeUnixMillis".to_string(), serde_json::json!(metric.time_unix_millis));
        for (k, v) in &metric.attributes {
            obj.insert(k.clone(), v.to_json());
        }
        for (k, v) in &metric.resource_attributes {
            obj.entry(k.clone()).or_insert_with(|| v.to_json());
        }
        Some(serde_json::Value::Object(obj))
    }

    fn log_record(&self, log: &Log) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        obj.insert("message".to_string(), serde_json::Value::String(log.message.clone()));
        obj.insert("severityText".to_string(), serde_json::Value::String(log.severity_text.clone()));
        obj.insert("timeUnixMillis".to_string(), serde_json::json!(log.time_unix_millis));
        for (k, v) in &log.attributes {
            obj.insert(k.clone(), v.to_json());
        }
        for (k, v) in &log.resource_attributes {
            obj.entry(k.clone()).or_insert_with(|| v.to_json());
        }
        serde_json::Value::Object(obj)
    }

    pub async fn flush_metric_tree(&self, metrics: &[Metric]) -> EngineResult<()> {
        let Some(url) = &self.machine_agent_url else {
            return Ok(());
        };
        let records = metric_tree::derive_metric_tree_records(metrics, &self.metric_tree_rules);
        metric_tree::post_metric_tree_records(&self.http, url, &records).await
    }
}

fn stringify_attrs(attrs: &BTreeMap<String, crate::value::Value>) -> BTreeMap<String, String> {
    attrs.iter().map(|(k, v)| (k.clone(), v.to_string())).collect()
}

impl MetricConsumer for AnalyticsSink {
    fn consume_metric(&self, metric: Metric) {
        if let Some(record) = self.metric_record(&metric) {
            self.bundler.append(METRICS_TABLE, record);
        }
    }
}

impl LogConsumer for AnalyticsSink {
    fn consume_log(&self, log: Log) {
        let record = self.log_record(&log);
        self.bundler.append(LOGS_TABLE, record);
    }
}

/// Formats a histogram bucket boundary pair into the sortable bucket name
/// the original's exporter uses so lexical and numeric bucket order agree:
/// `(-inf, b]`, `(a, b]`, `(a, +inf)`. Supplemental feature (SPEC_FULL.md
/// §11); no histogram metric type exists in the core spec, but a rule's
/// `emit_db_record` fields can synthesize one from reducer-derived bucket
/// counts, and this is the shared name formatter for doing so.
pub fn histogram_bucket_name(lower: Option<f64>, upper: Option<f64>) -> String {
    match (lower, upper) {
        (None, Some(b)) => format!("(-inf, {b}]"),
        (Some(a), Some(b)) => format!("({a}, {b}]"),
        (Some(a), None) => format!("({a}, +inf)"),
        (None, None) => "(-inf, +inf)".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn histogram_bucket_names_match_sortable_format() {
        assert_eq!(histogram_bucket_name(None, Some(10.0)), "(-inf, 10]");
        assert_eq!(histogram_bucket_name(Some(10.0), Some(20.0)), "(10, 20]");
        assert_eq!(histogram_bucket_name(Some(20.0), None), "(20, +inf)");
    }
}
