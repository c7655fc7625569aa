//! Metric-tree derivation (SPEC_FULL.md §11, supplemental to the core
//! scrape spec). Grounded on `metric-exporter.go`'s `getMetricTreeRecords`/
//! `matchesConditions`/`getMetricPath`/`postMetricTreeRecords`: a small set
//! of rules match a subset of scraped metrics by attribute equality and
//! render a machine-agent tree path from the matched metric's attributes,
//! then POST the resulting records to a machine-agent HTTP endpoint.

use std::collections::BTreeMap;

use reqwest::Client;
use serde::Serialize;

use crate::error::{EngineError, EngineResult};
use crate::scrape::templating;
use crate::telemetry::Metric;

#[derive(Debug, Clone)]
pub struct MatchCondition {
    pub attribute: String,
    pub equals: String,
}

#[derive(Debug, Clone)]
pub struct MetricTreeRule {
    pub metric_name: String,
    pub match_conditions: Vec<MatchCondition>,
    pub path_template: String,
}

#[derive(Debug, Serialize)]
pub struct MetricTreeRecord {
    pub path: String,
    pub value: f64,
    #[serde(rename = "timeUnixMillis")]
    pub time_unix_millis: i64,
}

fn matches_conditions(metric: &Metric, conditions: &[MatchCondition]) -> bool {
    conditions.iter().all(|cond| {
        metric
            .attributes
            .get(&cond.attribute)
            .map(|v| v.as_str().ok() == Some(cond.equals.as_str()))
            .unwrap_or(false)
    })
}

fn get_metric_path(template: &str, metric: &Metric) -> EngineResult<String> {
    let mut params = BTreeMap::new();
    for (k, v) in &metric.attributes {
        match v.as_str() {
            Ok(s) => params.insert(k.clone(), s.to_string()),
            Err(_) => params.insert(k.clone(), crate::jsonpath::stringify(&v.to_json())),
        };
    }
    for (k, v) in &metric.resource_attributes {
        params.entry(k.clone()).or_insert_with(|| match v.as_str() {
            Ok(s) => s.to_string(),
            Err(_) => crate::jsonpath::stringify(&v.to_json()),
        });
    }
    templating::substitute_strict(template, &params)
}

/// Matches `metrics` against `rules`, rendering one `MetricTreeRecord` per
/// match. A rule whose path template references an attribute the matched
/// metric doesn't carry is skipped with a logged warning rather than
/// failing the whole batch.
pub fn derive_metric_tree_records(metrics: &[Metric], rules: &[MetricTreeRule]) -> Vec<MetricTreeRecord> {
    let mut records = Vec::new();
    for metric in metrics {
        for rule in rules {
            if metric.name != rule.metric_name {
                continue;
            }
            if !matches_conditions(metric, &rule.match_conditions) {
                continue;
            }
            match get_metric_path(&rule.path_template, metric) {
                Ok(path) => records.push(MetricTreeRecord {
                    path,
                    value: metric.value,
                    time_unix_millis: metric.time_unix_millis,
                }),
                Err(e) => {
                    tracing::warn!(metric = %metric.name, error = %e, "skipping metric tree record, unresolved path template");
                }
            }
        }
    }
    records
}

pub async fn post_metric_tree_records(http: &Client, machine_agent_url: &str, records: &[MetricTreeRecord]) -> EngineResult<()> {
    if records.is_empty() {
        return Ok(());
    }
    http.post(machine_agent_url)
        .json(records)
        .send()
        .await
        .map_err(|e| EngineError::TransportFailure {
            url: machine_agent_url.to_string(),
            source: e,
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context_stack::Scope;
    use crate::value::Value;

    fn sample_metric() -> Metric {
        let mut attributes = BTreeMap::new();
        attributes.insert("tenant".to_string(), Value::Str("mgmt".to_string()));
        attributes.insert("node".to_string(), Value::Str("node-201".to_string()));
        Metric {
            name: "health".to_string(),
            description: String::new(),
            unit: String::new(),
            aggregation: crate::telemetry::AggregationType::Gauge,
            start_time_unix_millis: 0,
            time_unix_millis: 1000,
            value: 100.0,
            attributes,
            resource_attributes: BTreeMap::new(),
            scope: Scope::default(),
        }
    }

    #[test]
    fn matching_rule_renders_path_from_attributes() {
        let metric = sample_metric();
        let rule = MetricTreeRule {
            metric_name: "health".to_string(),
            match_conditions: vec![MatchCondition {
                attribute: "tenant".to_string(),
                equals: "mgmt".to_string(),
            }],
            path_template: "Fabric|{{node}}|Health".to_string(),
        };
        let records = derive_metric_tree_records(&[metric], &[rule]);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].path, "Fabric|node-201|Health");
        assert_eq!(records[0].value, 100.0);
    }

    #[test]
    fn non_matching_condition_is_skipped() {
        let metric = sample_metric();
        let rule = MetricTreeRule {
            metric_name: "health".to_string(),
            match_conditions: vec![MatchCondition {
                attribute: "tenant".to_string(),
                equals: "aaa_600_aci_a".to_string(),
            }],
            path_template: "Fabric|{{node}}|Health".to_string(),
        };
        assert!(derive_metric_tree_records(&[metric], &[rule]).is_empty());
    }
}
