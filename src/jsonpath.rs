//! A small XPath-like path query language over `serde_json::Value`, covering
//! the subset the engine actually needs: field access, `*` wildcard over
//! object/array children, numeric indices, and a single attribute-equality
//! predicate (`name[@attr="value"]`). Grounded in the shape of queries used
//! throughout `jsonscraper/scraper.go` (`/imdata/*/fvTenant`,
//! `./children/*/healthInst/attributes/cur`) — a full XPath engine like the
//! original's `antchfx/jsonquery` is not needed for this query shape.

use regex::Regex;
use serde_json::Value as Json;
use std::sync::OnceLock;

fn predicate_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^([A-Za-z0-9_]+)\[@([A-Za-z0-9_]+)=['"]([^'"]*)['"]\]$"#).unwrap()
    })
}

fn index_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Za-z0-9_]+)\[(\d+)\]$").unwrap())
}

#[derive(Debug, Clone)]
enum Segment {
    Field(String),
    Wildcard,
    IndexedField(String, usize),
    Predicate {
        field: String,
        attr: String,
        value: String,
    },
}

fn parse_segments(path: &str) -> Vec<Segment> {
    let trimmed = path.trim_start_matches("./").trim_start_matches('/');
    trimmed
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|raw| {
            if raw == "*" {
                return Segment::Wildcard;
            }
            if let Some(c) = predicate_re().captures(raw) {
                return Segment::Predicate {
                    field: c[1].to_string(),
                    attr: c[2].to_string(),
                    value: c[3].to_string(),
                };
            }
            if let Some(c) = index_re().captures(raw) {
                return Segment::IndexedField(c[1].to_string(), c[2].parse().unwrap_or(0));
            }
            Segment::Field(raw.to_string())
        })
        .collect()
}

/// Runs `path` against `doc`, returning every matching node (depth-first,
/// left-to-right).
pub fn find_all<'a>(doc: &'a Json, path: &str) -> Vec<&'a Json> {
    let segments = parse_segments(path);
    let mut current: Vec<&Json> = vec![doc];
    for seg in &segments {
        let mut next = Vec::new();
        for node in current {
            apply_segment(node, seg, &mut next);
        }
        current = next;
    }
    current
}

/// First match of `path` against `doc`, or `None`.
pub fn find_one<'a>(doc: &'a Json, path: &str) -> Option<&'a Json> {
    find_all(doc, path).into_iter().next()
}

fn apply_segment<'a>(node: &'a Json, seg: &Segment, out: &mut Vec<&'a Json>) {
    match seg {
        Segment::Wildcard => match node {
            Json::Object(map) => out.extend(map.values()),
            Json::Array(items) => out.extend(items.iter()),
            _ => {}
        },
        Segment::Field(name) => match node {
            Json::Object(map) => {
                if let Some(v) = map.get(name) {
                    out.push(v);
                }
            }
            Json::Array(items) => {
                for item in items {
                    apply_segment(item, seg, out);
                }
            }
            _ => {}
        },
        Segment::IndexedField(name, idx) => {
            if let Some(Json::Array(items)) = node.get(name) {
                if let Some(v) = items.get(*idx) {
                    out.push(v);
                }
            }
        }
        Segment::Predicate { field, attr, value } => {
            if let Some(Json::Array(items)) = node.get(field) {
                for item in items {
                    if item.get(attr).and_then(Json::as_str) == Some(value.as_str()) {
                        out.push(item);
                    }
                }
            }
        }
    }
}

/// Stringifies a matched node the way `jqs`/`dbGetFirst` project values:
/// strings pass through unquoted, everything else uses its JSON rendering.
pub fn stringify(v: &Json) -> String {
    match v {
        Json::String(s) => s.clone(),
        Json::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wildcard_over_array_then_field() {
        let doc = json!({
            "imdata": [
                {"fvTenant": {"attributes": {"name": "aaa_600_aci_a"}}},
                {"fvTenant": {"attributes": {"name": "mgmt"}}},
            ]
        });
        let names: Vec<String> = find_all(&doc, "/imdata/*/fvTenant")
            .into_iter()
            .filter_map(|v| v.pointer("/attributes/name").and_then(Json::as_str))
            .map(String::from)
            .collect();
        assert_eq!(names, vec!["aaa_600_aci_a", "mgmt"]);
    }

    #[test]
    fn relative_path_from_current_node() {
        let node = json!({"attributes": {"name": "eth1/1"}});
        let got = find_one(&node, "./attributes/name").map(stringify);
        assert_eq!(got.as_deref(), Some("eth1/1"));
    }

    #[test]
    fn missing_path_returns_empty() {
        let doc = json!({"a": 1});
        assert!(find_all(&doc, "/b/c").is_empty());
    }
}
