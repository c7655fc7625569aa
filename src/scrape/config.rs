//! Rule-tree configuration schema (spec.md §6's "Configuration surface").
//! Grounded on `config.go`'s YAML struct tags, adapted to `serde_yaml`
//! (the teacher crate's own config uses `toml`, but the original system and
//! spec.md both specify YAML — see SPEC_FULL.md §10.3).

use serde::Deserialize;

fn default_false() -> bool {
    false
}

/// `{name, value}` or `{name, valueFrom}` — exactly one of the two value
/// forms must be present; validated in `QueryTreeConfig::validate`.
#[derive(Debug, Clone, Deserialize)]
pub struct AttrBinding {
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default, rename = "valueFrom")]
    pub value_from: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReducerMapContribution {
    pub name: String,
    #[serde(rename = "valueFrom")]
    pub value_from: String,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AggregationType {
    Sum,
    Gauge,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricEmit {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub unit: String,
    #[serde(rename = "aggregationType")]
    pub aggregation_type: AggregationType,
    #[serde(rename = "valueFrom")]
    pub value_from: String,
    #[serde(default)]
    pub filters: Vec<String>,
    #[serde(default, rename = "resourceAttributes")]
    pub resource_attributes: Vec<AttrBinding>,
    #[serde(default, rename = "itemAttributes")]
    pub item_attributes: Vec<AttrBinding>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogEmit {
    #[serde(rename = "messageFrom")]
    pub message_from: String,
    #[serde(rename = "severityFrom")]
    pub severity_from: String,
    #[serde(default, rename = "timestampFrom")]
    pub timestamp_from: Option<String>,
    #[serde(default)]
    pub filters: Vec<String>,
    #[serde(default, rename = "resourceAttributes")]
    pub resource_attributes: Vec<AttrBinding>,
    #[serde(default, rename = "itemAttributes")]
    pub item_attributes: Vec<AttrBinding>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DbEmit {
    pub table: String,
    pub fields: Vec<AttrBinding>,
    #[serde(default)]
    pub filters: Vec<String>,
    #[serde(default = "default_false")]
    pub dump: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleConfig {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default, rename = "queryParameters")]
    pub query_parameters: Vec<AttrBinding>,
    #[serde(default, rename = "queryPostData")]
    pub query_post_data: Option<String>,
    #[serde(default)]
    pub select: Option<String>,
    #[serde(default, rename = "forEach")]
    pub for_each: Option<Box<RuleConfig>>,
    #[serde(default, rename = "resourceAttributes")]
    pub resource_attributes: Vec<AttrBinding>,
    #[serde(default, rename = "itemAttributes")]
    pub item_attributes: Vec<AttrBinding>,
    #[serde(default)]
    pub reducers: Vec<String>,
    #[serde(default, rename = "reducerMaps")]
    pub reducer_maps: Vec<ReducerMapContribution>,
    #[serde(default, rename = "emitMetric")]
    pub emit_metric: Vec<MetricEmit>,
    #[serde(default, rename = "emitLogs")]
    pub emit_logs: Vec<LogEmit>,
    #[serde(default, rename = "emitDbRecord")]
    pub emit_db_record: Vec<DbEmit>,
}

/// `query == "LOOP_ITEM"` (or empty/absent) means "reuse the incoming doc
/// rather than issuing a request" (spec.md §4.3 step 2c).
pub const LOOP_ITEM: &str = "LOOP_ITEM";

impl RuleConfig {
    pub fn reuses_incoming_document(&self) -> bool {
        match &self.query {
            None => true,
            Some(q) => q.is_empty() || q == LOOP_ITEM,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScopeConfig {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryTreeConfig {
    pub name: String,
    #[serde(default)]
    pub resource: Vec<AttrBinding>,
    pub scope: ScopeConfig,
    pub rules: RuleConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScrapeConfig {
    #[serde(default)]
    pub interval_seconds: u64,
    pub queries: Vec<QueryTreeConfig>,
}
