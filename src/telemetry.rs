//! Abstract telemetry record types and the downstream consumer interface.
//! Deliberately thin per spec.md §1/§6: the host collector's concrete metric
//!/log data model is opaque to this engine, so these types model only the
//! resource → scope → records shape the engine itself needs to build before
//! handing a batch to a consumer.

use std::collections::BTreeMap;

use crate::context_stack::Scope;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationType {
    /// Cumulative monotonic sum.
    Sum,
    Gauge,
}

#[derive(Debug, Clone)]
pub struct Metric {
    pub name: String,
    pub description: String,
    pub unit: String,
    pub aggregation: AggregationType,
    pub start_time_unix_millis: i64,
    pub time_unix_millis: i64,
    pub value: f64,
    pub attributes: BTreeMap<String, Value>,
    pub resource_attributes: BTreeMap<String, Value>,
    pub scope: Scope,
}

/// Default severity-text → severity-number mapping (spec.md §4.3.1).
/// `Error2` stands in for the OTel `ERROR2`/`major` severity level, distinct
/// from plain `Error`/`minor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeverityNumber {
    Info,
    Warn,
    Error,
    Error2,
    Fatal,
}

pub fn default_severity_mapper(severity_text: &str) -> SeverityNumber {
    match severity_text.to_ascii_lowercase().as_str() {
        "info" => SeverityNumber::Info,
        "warning" => SeverityNumber::Warn,
        "minor" => SeverityNumber::Error,
        "major" => SeverityNumber::Error2,
        "critical" => SeverityNumber::Fatal,
        _ => SeverityNumber::Info,
    }
}

#[derive(Debug, Clone)]
pub struct Log {
    pub message: String,
    pub severity_text: String,
    pub severity_number: SeverityNumber,
    pub time_unix_millis: i64,
    pub attributes: BTreeMap<String, Value>,
    pub resource_attributes: BTreeMap<String, Value>,
    pub scope: Scope,
}

/// A pluggable severity mapper, so a receiver can override the default
/// text→number mapping without the engine depending on a concrete table.
pub type SeverityMapper = fn(&str) -> SeverityNumber;

pub trait MetricConsumer: Send + Sync {
    fn consume_metric(&self, metric: Metric);
}

pub trait LogConsumer: Send + Sync {
    fn consume_log(&self, log: Log);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_severity_mapping_matches_spec_table() {
        assert_eq!(default_severity_mapper("info"), SeverityNumber::Info);
        assert_eq!(default_severity_mapper("warning"), SeverityNumber::Warn);
        assert_eq!(default_severity_mapper("minor"), SeverityNumber::Error);
        assert_eq!(default_severity_mapper("major"), SeverityNumber::Error2);
        assert_eq!(default_severity_mapper("critical"), SeverityNumber::Fatal);
    }
}
