use std::collections::BTreeMap;
use std::fmt;

use crate::error::{EngineError, EngineResult};

/// Tagged value type for the expression runtime. Replaces the source's
/// reflection-driven `any`-typed dispatch (`reflect.TypeOf(value).Kind()`
/// switches in `fn_reducers.go`, `fn_aci_path.go`, etc.) with an explicit sum
/// type; illegal coercions below return typed errors rather than panicking.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, ""),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Value::Map(m) => {
                let parts: Vec<String> = m.iter().map(|(k, v)| format!("{k}: {v}")).collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
        }
    }
}

impl Value {
    pub fn as_f64(&self) -> EngineResult<f64> {
        match self {
            Value::Int(i) => Ok(*i as f64),
            Value::Float(x) => Ok(*x),
            Value::Str(s) if s.is_empty() => Ok(0.0),
            Value::Str(s) => s.parse::<f64>().map_err(|_| EngineError::ExpressionEval {
                expr: s.clone(),
                detail: "non-numeric value cannot be coerced to a double".to_string(),
            }),
            other => Err(EngineError::ExpressionEval {
                expr: other.to_string(),
                detail: "value cannot be coerced to a double".to_string(),
            }),
        }
    }

    pub fn as_bool(&self) -> EngineResult<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(EngineError::ExpressionEval {
                expr: other.to_string(),
                detail: "value is not a boolean".to_string(),
            }),
        }
    }

    pub fn as_str(&self) -> EngineResult<&str> {
        match self {
            Value::Str(s) => Ok(s.as_str()),
            other => Err(EngineError::ExpressionEval {
                expr: other.to_string(),
                detail: "value is not a string".to_string(),
            }),
        }
    }

    pub fn as_list(&self) -> EngineResult<&[Value]> {
        match self {
            Value::List(items) => Ok(items),
            other => Err(EngineError::ExpressionEval {
                expr: other.to_string(),
                detail: "value is not a list".to_string(),
            }),
        }
    }

    pub fn as_map(&self) -> EngineResult<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Ok(m),
            other => Err(EngineError::ExpressionEval {
                expr: other.to_string(),
                detail: "value is not a map".to_string(),
            }),
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(x) => *x != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Map(m) => !m.is_empty(),
        }
    }

    pub fn from_json(v: &serde_json::Value) -> Value {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::Str(s.clone()),
            serde_json::Value::Array(items) => {
                Value::List(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn string_list(items: Vec<String>) -> Value {
        Value::List(items.into_iter().map(Value::Str).collect())
    }

    pub fn string_map(items: BTreeMap<String, String>) -> Value {
        Value::Map(items.into_iter().map(|(k, v)| (k, Value::Str(v))).collect())
    }

    /// Inverse of `from_json`, used at the boundary with `jsonpath` and the
    /// context DB, both of which operate on `serde_json::Value`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(x) => serde_json::json!(x),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(m) => {
                serde_json::Value::Object(m.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
            }
        }
    }
}
