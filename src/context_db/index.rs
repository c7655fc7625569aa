use serde::{Deserialize, Serialize};

use crate::jsonpath;

/// One index declaration on a table: a list of JSON-path field selectors
/// plus the `unique`/`multiValue` flags from spec.md §3/§6. The `id` index
/// is required, unique, and single-value on every table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSchema {
    pub name: String,
    #[serde(default)]
    pub unique: bool,
    #[serde(default, rename = "multiValue")]
    pub multi_value: bool,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub indexes: Vec<IndexSchema>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbSchema {
    pub tables: Vec<TableSchema>,
}

impl TableSchema {
    pub fn primary(&self) -> Option<&IndexSchema> {
        self.indexes.iter().find(|i| i.name == "id")
    }
}

const FIELD_SEP: u8 = 0x01;
const KEY_TERM: u8 = 0x00;

/// Resolves one field selector against a record's JSON, returning the
/// value set to index it under: a single value for scalar paths, or every
/// element for an array-valued path (multi-value indexing).
fn resolve_field_values(data: &serde_json::Value, path: &str) -> Vec<String> {
    let matches = jsonpath::find_all(data, path);
    if let [serde_json::Value::Array(items)] = matches.as_slice() {
        items.iter().map(jsonpath::stringify).collect()
    } else {
        matches.into_iter().map(jsonpath::stringify).collect()
    }
}

fn encode_tuple(values: &[&str]) -> Vec<u8> {
    let mut key = Vec::new();
    for v in values {
        key.push(FIELD_SEP);
        key.extend_from_slice(v.as_bytes());
    }
    key.push(KEY_TERM);
    key
}

/// Encodes the composite key(s) a record should be indexed under, per the
/// single-value / multi-value indexer contracts in spec.md §4.1. Returns
/// an empty vec if the record should not be indexed at all (a required
/// field resolved to nothing, or a multi-value field resolved to an empty
/// array).
pub fn index_keys_for_record(schema: &IndexSchema, data: &serde_json::Value) -> Vec<Vec<u8>> {
    if !schema.multi_value {
        let mut values = Vec::with_capacity(schema.fields.len());
        for field in &schema.fields {
            let resolved = resolve_field_values(data, field);
            match resolved.into_iter().next() {
                Some(v) if !v.is_empty() => values.push(v),
                _ => return Vec::new(),
            }
        }
        let refs: Vec<&str> = values.iter().map(String::as_str).collect();
        return vec![encode_tuple(&refs)];
    }

    // multi-value: cartesian product of each field's resolved value set
    let mut per_field: Vec<Vec<String>> = Vec::with_capacity(schema.fields.len());
    for field in &schema.fields {
        let resolved = resolve_field_values(data, field);
        if resolved.is_empty() {
            return Vec::new();
        }
        per_field.push(resolved);
    }

    let mut combos: Vec<Vec<String>> = vec![Vec::new()];
    for values in per_field {
        let mut next = Vec::with_capacity(combos.len() * values.len());
        for combo in &combos {
            for v in &values {
                let mut extended = combo.clone();
                extended.push(v.clone());
                next.push(extended);
            }
        }
        combos = next;
    }

    combos
        .into_iter()
        .map(|combo| {
            let refs: Vec<&str> = combo.iter().map(String::as_str).collect();
            encode_tuple(&refs)
        })
        .collect()
}

/// Encodes a query tuple (caller-supplied field values) the same way a
/// record's fields are encoded, for exact-match lookup.
pub fn encode_query(values: &[String]) -> Vec<u8> {
    let refs: Vec<&str> = values.iter().map(String::as_str).collect();
    encode_tuple(&refs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn multi_value_cartesian_product_count() {
        let schema = IndexSchema {
            name: "ip".into(),
            unique: false,
            multi_value: true,
            fields: vec!["/ipv4".into()],
        };
        let data = json!({"ipv4": ["10.1.1.1", "10.1.1.2", "10.1.1.3"]});
        let keys = index_keys_for_record(&schema, &data);
        assert_eq!(keys.len(), 3);
    }

    #[test]
    fn empty_array_field_not_indexed() {
        let schema = IndexSchema {
            name: "ip".into(),
            unique: false,
            multi_value: true,
            fields: vec!["/ipv4".into()],
        };
        let data = json!({"ipv4": []});
        assert!(index_keys_for_record(&schema, &data).is_empty());
    }

    #[test]
    fn missing_single_value_field_not_indexed() {
        let schema = IndexSchema {
            name: "id".into(),
            unique: true,
            multi_value: false,
            fields: vec!["/application".into(), "/tier".into()],
        };
        let data = json!({"application": "appA"});
        assert!(index_keys_for_record(&schema, &data).is_empty());
    }
}
