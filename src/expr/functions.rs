//! Host function implementations callable from rule expressions, both as
//! free calls (`jqs('./x')`) and as method-chain calls on a receiver value
//! (`node.jqs('./x')`), mirroring the CEL function/overload registrations in
//! `expressions.go` (`env.Functions(...)`, each with a free-function and a
//! member-function binding to the same Go func).
//!
//! Functions that need engine-wide state (the `notSeen` cache, reducer
//! accumulators, the context DB) take that state explicitly from
//! [`super::env::ExpressionEnv`]; everything else here is a pure function of
//! its arguments, which keeps the dispatch table in `env.rs` the only place
//! that needs to know about shared mutable state.

use chrono::{DateTime, Utc};

use crate::context_db::ContextDb;
use crate::error::{EngineError, EngineResult};
use crate::jsonpath;
use crate::value::Value;

fn eval_err(what: &str, detail: impl Into<String>) -> EngineError {
    EngineError::ExpressionEval {
        expr: what.to_string(),
        detail: detail.into(),
    }
}

// ---- jq-style document queries (fn_jq.go) ----------------------------------

/// `jqs(path)` / `doc.jqs(path)`: first matching node, stringified.
pub fn jqs(doc: &serde_json::Value, path: &str) -> Value {
    match jsonpath::find_one(doc, path) {
        Some(v) => Value::Str(jsonpath::stringify(v)),
        None => Value::Str(String::new()),
    }
}

/// `jqas(path)` / `doc.jqas(path)`: all matching nodes, stringified.
pub fn jqas(doc: &serde_json::Value, path: &str) -> Value {
    Value::string_list(jsonpath::find_all(doc, path).into_iter().map(jsonpath::stringify).collect())
}

pub fn has_field(doc: &serde_json::Value, path: &str) -> Value {
    Value::Bool(jsonpath::find_one(doc, path).is_some())
}

// ---- string utilities (fn_split.go, fn_merge.go) ---------------------------

/// `split(s, sep)`.
pub fn split(s: &str, sep: &str) -> Value {
    if sep.is_empty() {
        return Value::string_list(vec![s.to_string()]);
    }
    Value::string_list(s.split(sep).map(str::to_string).collect())
}

/// `merge(parts, sep, indices...)`: joins the selected elements of `parts`
/// (by position) with `sep`, preserving the order the indices are given in.
pub fn merge(parts: &[Value], sep: &str, indices: &[i64]) -> EngineResult<Value> {
    let mut picked = Vec::with_capacity(indices.len());
    for &idx in indices {
        let idx = usize::try_from(idx).map_err(|_| eval_err("merge", "negative index"))?;
        let part = parts
            .get(idx)
            .ok_or_else(|| eval_err("merge", format!("index {idx} out of range")))?;
        picked.push(part.to_string());
    }
    Ok(Value::Str(picked.join(sep)))
}

/// `flatten(lists)`: one level of list-of-lists flattening (`fn_split.go`'s
/// `flattenSliceAny`/`flattenSliceStr`).
pub fn flatten(v: &Value) -> Value {
    let mut out = Vec::new();
    if let Value::List(items) = v {
        for item in items {
            match item {
                Value::List(inner) => out.extend(inner.iter().cloned()),
                other => out.push(other.clone()),
            }
        }
    }
    Value::List(out)
}

// ---- time (fn_time.go) ------------------------------------------------------

/// `toUnixMillis(rfc3339)`.
pub fn to_unix_millis(s: &str) -> EngineResult<Value> {
    let parsed = DateTime::parse_from_rfc3339(s)
        .map_err(|e| eval_err("toUnixMillis", format!("`{s}` is not RFC3339: {e}")))?;
    Ok(Value::Int(parsed.timestamp_millis()))
}

/// `fromUnixMillis(millis)`.
pub fn from_unix_millis(millis: i64) -> Value {
    let dt = DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or_default();
    Value::Str(dt.to_rfc3339())
}

/// `now()`, current wall-clock time as an RFC3339 string.
pub fn now() -> Value {
    Value::Str(Utc::now().to_rfc3339())
}

// ---- dedup cache (fn_seen.go) ----------------------------------------------

/// Builds the same `\x01`-joined cache key `fn_seen.go`'s `notSeen` uses to
/// identify a unique tuple of identifying values.
pub fn seen_key(parts: &[String]) -> Vec<u8> {
    let mut key = Vec::new();
    for part in parts {
        key.push(0x01);
        key.extend_from_slice(part.as_bytes());
    }
    key
}

// ---- reducers (fn_reducers.go) ---------------------------------------------
//
// `sumReducer`/`countReducer`/`avgReducer` aggregate a `list<double>`
// argument directly (typically `reducerMap(name)`'s result); the named
// accumulator itself lives on `ExpressionEnv` and is populated by a rule's
// `reducerMaps` contributions (spec.md §3's "Reducer" data model).

pub fn sum_list(items: &[Value]) -> EngineResult<f64> {
    let mut total = 0.0;
    for v in items {
        total += v.as_f64()?;
    }
    Ok(total)
}

pub fn count_list(items: &[Value]) -> i64 {
    items.len() as i64
}

pub fn avg_list(items: &[Value]) -> EngineResult<f64> {
    if items.is_empty() {
        return Ok(0.0);
    }
    Ok(sum_list(items)? / items.len() as f64)
}

// ---- db lookups (fn_contextdb.go) ------------------------------------------

/// `dbGetFirst(jqPath, table, index, fields)`: look up one record, project
/// it through `jqPath` the same way `jqs` projects a live document, empty
/// string if no record matches or the path selects nothing.
pub fn db_get_first(
    db: &ContextDb,
    jq_path: &str,
    table: &str,
    index: &str,
    values: &[String],
) -> EngineResult<Value> {
    Ok(match db.get_first(table, index, values)? {
        Some(rec) => jqs(&rec.data, jq_path),
        None => Value::Str(String::new()),
    })
}

/// `dbGetFirstA`: same lookup as `dbGetFirst`, but preserves a list-typed
/// projection instead of collapsing it to its first element — grounds the
/// `jsonquery`-array-projection-returning overload in `fn_contextdb.go`.
pub fn db_get_first_a(
    db: &ContextDb,
    jq_path: &str,
    table: &str,
    index: &str,
    values: &[String],
) -> EngineResult<Value> {
    Ok(match db.get_first(table, index, values)? {
        Some(rec) => jqas(&rec.data, jq_path),
        None => Value::List(vec![]),
    })
}

/// `dbGetAll(jqPath, table, index, fields)`: project every matching record
/// through `jqPath`, deduplicating the resulting strings (`fn_contextdb.go`'s
/// `removeDuplicateValues`).
pub fn db_get_all(
    db: &ContextDb,
    jq_path: &str,
    table: &str,
    index: &str,
    values: &[String],
) -> EngineResult<Value> {
    let records = db.get_all(table, index, values)?;
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for rec in &records {
        if let Value::Str(s) = jqs(&rec.data, jq_path) {
            if !s.is_empty() && seen.insert(s.clone()) {
                out.push(Value::Str(s));
            }
        }
    }
    Ok(Value::List(out))
}

// ---- debug passthrough (fn_print.go) ---------------------------------------

/// `print(prefix, v)`: logs at debug level and returns `v` unchanged, so it
/// can be spliced into an expression chain without altering the result.
pub fn print_passthrough(prefix: &str, v: Value) -> Value {
    tracing::debug!(value = %v, "{prefix}");
    v
}

/// Coerces an argument list's string-like elements for functions that need
/// plain `String`s (grok, split, merge separators, etc).
pub fn as_string_args(args: &[Value]) -> EngineResult<Vec<String>> {
    args.iter().map(|v| v.as_str().map(str::to_string)).collect()
}

pub fn string_list_arg(v: &Value) -> EngineResult<Vec<String>> {
    v.as_list()?.iter().map(|item| item.as_str().map(str::to_string)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_joins_selected_indices() {
        let parts = vec![Value::Str("a".into()), Value::Str("b".into()), Value::Str("c".into())];
        let got = merge(&parts, "-", &[2, 0]).unwrap();
        assert_eq!(got, Value::Str("c-a".into()));
    }

    #[test]
    fn flatten_one_level() {
        let v = Value::List(vec![
            Value::List(vec![Value::Int(1), Value::Int(2)]),
            Value::Int(3),
        ]);
        assert_eq!(flatten(&v), Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]));
    }

    #[test]
    fn jqs_on_document() {
        let doc = json!({"attributes": {"name": "eth1/1"}});
        assert_eq!(jqs(&doc, "./attributes/name"), Value::Str("eth1/1".into()));
    }
}
