//! Builds attribute maps and emit records (metric/log/DB) from rule
//! configuration, per spec.md §4.3.1. Grounded on `emitter.go`'s
//! filter→merge→evaluate→build pipeline.

use std::collections::BTreeMap;

use chrono::Utc;

use crate::context_stack::ScraperContext;
use crate::error::{EngineError, EngineResult};
use crate::expr::{functions, ExpressionEnv};
use crate::telemetry::{default_severity_mapper, AggregationType as TelemetryAgg, Log, Metric, SeverityMapper};
use crate::value::Value;

use super::config::{AggregationType as ConfigAgg, AttrBinding, DbEmit, LogEmit, MetricEmit};

/// Resolves a `value`/`valueFrom`-style field. An expression prefixed with
/// `=` is compiled and evaluated; anything else is a literal JSON-path query
/// run against the currently focused document (spec.md §4.2).
pub fn eval_value_or_path(
    env: &ExpressionEnv,
    doc: &serde_json::Value,
    ctx: &ScraperContext,
    raw: &str,
) -> EngineResult<Value> {
    match raw.strip_prefix('=') {
        Some(expr) => env.evaluate_with_doc(expr, doc, ctx),
        None => Ok(functions::jqs(doc, raw)),
    }
}

pub fn eval_attr_bindings(
    env: &ExpressionEnv,
    doc: &serde_json::Value,
    ctx: &ScraperContext,
    bindings: &[AttrBinding],
) -> EngineResult<BTreeMap<String, Value>> {
    let mut out = BTreeMap::new();
    for binding in bindings {
        let value = match (&binding.value, &binding.value_from) {
            (Some(literal), _) => Value::Str(literal.clone()),
            (None, Some(expr)) => eval_value_or_path(env, doc, ctx, expr)?,
            (None, None) => {
                return Err(EngineError::ConfigInvalid(format!(
                    "attribute `{}` has neither `value` nor `valueFrom`",
                    binding.name
                )))
            }
        };
        out.insert(binding.name.clone(), value);
    }
    Ok(out)
}

/// Filters are ANDed; an expression that errors or yields non-bool fails
/// the whole filter set (spec.md §4.3.2).
pub fn filters_pass(
    env: &ExpressionEnv,
    doc: &serde_json::Value,
    ctx: &ScraperContext,
    filters: &[String],
) -> EngineResult<bool> {
    for raw in filters {
        let expr = raw.strip_prefix('=').unwrap_or(raw);
        let v = env.evaluate_with_doc(expr, doc, ctx)?;
        if !v.as_bool()? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn merge_attrs(base: &BTreeMap<String, Value>, extra: BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    let mut out = base.clone();
    out.extend(extra);
    out
}

/// Builds a metric record from an `emitMetric` block, or `None` if the
/// filter set rejects it. `interval_millis` sets the metric's start
/// timestamp (`now - interval`), per spec.md §4.3.1.
pub fn build_metric(
    env: &ExpressionEnv,
    doc: &serde_json::Value,
    ctx: &ScraperContext,
    emit: &MetricEmit,
    interval_millis: i64,
) -> EngineResult<Option<Metric>> {
    if !filters_pass(env, doc, ctx, &emit.filters)? {
        return Ok(None);
    }

    let resource_attrs = merge_attrs(&ctx.resource_attrs(), eval_attr_bindings(env, doc, ctx, &emit.resource_attributes)?);
    let item_attrs = merge_attrs(&ctx.item_attrs(), eval_attr_bindings(env, doc, ctx, &emit.item_attributes)?);

    let raw_value = eval_value_or_path(env, doc, ctx, &emit.value_from)?;
    let value = raw_value.as_f64().map_err(|_| EngineError::ExpressionEval {
        expr: emit.value_from.clone(),
        detail: format!("metric `{}` valueFrom did not coerce to a double", emit.name),
    })?;

    let now = Utc::now().timestamp_millis();
    Ok(Some(Metric {
        name: emit.name.clone(),
        description: emit.description.clone(),
        unit: emit.unit.clone(),
        aggregation: match emit.aggregation_type {
            ConfigAgg::Sum => TelemetryAgg::Sum,
            ConfigAgg::Gauge => TelemetryAgg::Gauge,
        },
        start_time_unix_millis: now - interval_millis,
        time_unix_millis: now,
        value,
        attributes: item_attrs,
        resource_attributes: resource_attrs,
        scope: ctx.scope(),
    }))
}

pub fn build_log(
    env: &ExpressionEnv,
    doc: &serde_json::Value,
    ctx: &ScraperContext,
    emit: &LogEmit,
    severity_mapper: SeverityMapper,
) -> EngineResult<Option<Log>> {
    if !filters_pass(env, doc, ctx, &emit.filters)? {
        return Ok(None);
    }

    let resource_attrs = merge_attrs(&ctx.resource_attrs(), eval_attr_bindings(env, doc, ctx, &emit.resource_attributes)?);
    let item_attrs = merge_attrs(&ctx.item_attrs(), eval_attr_bindings(env, doc, ctx, &emit.item_attributes)?);

    let message = eval_value_or_path(env, doc, ctx, &emit.message_from)?.to_string();
    let severity_text = eval_value_or_path(env, doc, ctx, &emit.severity_from)?.to_string();
    let severity_number = severity_mapper(&severity_text);

    let time_unix_millis = match &emit.timestamp_from {
        Some(raw) => {
            let ts = eval_value_or_path(env, doc, ctx, raw)?;
            match ts.as_str().ok().and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok()) {
                Some(dt) => dt.timestamp_millis(),
                None => Utc::now().timestamp_millis(),
            }
        }
        None => Utc::now().timestamp_millis(),
    };

    Ok(Some(Log {
        message,
        severity_text,
        severity_number,
        time_unix_millis,
        attributes: item_attrs,
        resource_attributes: resource_attrs,
        scope: ctx.scope(),
    }))
}

/// Builds the JSON document to upsert into the Context DB from an
/// `emitDbRecord` block's `fields`, returning `None` if filtered out.
pub fn build_db_record(
    env: &ExpressionEnv,
    doc: &serde_json::Value,
    ctx: &ScraperContext,
    emit: &DbEmit,
) -> EngineResult<Option<serde_json::Value>> {
    if !filters_pass(env, doc, ctx, &emit.filters)? {
        return Ok(None);
    }
    let fields = eval_attr_bindings(env, doc, ctx, &emit.fields)?;
    Ok(Some(Value::Map(fields).to_json()))
}

pub fn default_mapper() -> SeverityMapper {
    default_severity_mapper
}
