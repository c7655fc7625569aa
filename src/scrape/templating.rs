//! Parameter-stack string templating (spec.md §4.3.3). Two variants exist:
//! a permissive `${name}` substitution for URLs (unresolved names pass
//! through unchanged) and a strict `{{name}}` substitution for request
//! bodies that fails loudly on a missing variable. The original system
//! names these "two variants... paired delimiters" without pinning down
//! the long-form syntax; `{{name}}` is this crate's choice, recorded as an
//! Open Question decision in DESIGN.md.

use std::collections::BTreeMap;

use crate::error::EngineError;

/// `${name}` substitution used for URL templates. A name not present in
/// `params` is left as literal text. Substituted values are percent-encoded
/// (`urlencoding`) since they land directly in a URL path/query segment,
/// where a parameter containing `/`, `&`, or whitespace would otherwise
/// corrupt the request.
pub fn substitute_lenient(template: &str, params: &BTreeMap<String, String>) -> String {
    let encoded: BTreeMap<String, String> = params
        .iter()
        .map(|(k, v)| (k.clone(), urlencoding::encode(v).into_owned()))
        .collect();
    substitute(template, "${", "}", &encoded, false).expect("lenient substitution never errors")
}

/// `{{name}}` substitution used for request-body templates. A name not
/// present in `params` is a hard error.
pub fn substitute_strict(template: &str, params: &BTreeMap<String, String>) -> Result<String, EngineError> {
    substitute(template, "{{", "}}", params, true)
}

fn substitute(
    template: &str,
    open: &str,
    close: &str,
    params: &BTreeMap<String, String>,
    strict: bool,
) -> Result<String, EngineError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    loop {
        match rest.find(open) {
            None => {
                out.push_str(rest);
                break;
            }
            Some(start) => {
                out.push_str(&rest[..start]);
                let after_open = &rest[start + open.len()..];
                match after_open.find(close) {
                    None => {
                        // unterminated placeholder: treat the rest as literal
                        out.push_str(&rest[start..]);
                        break;
                    }
                    Some(end) => {
                        let name = &after_open[..end];
                        match params.get(name) {
                            Some(v) => out.push_str(v),
                            None if strict => {
                                return Err(EngineError::ConfigInvalid(format!(
                                    "template references undefined parameter `{name}`"
                                )))
                            }
                            None => {
                                out.push_str(open);
                                out.push_str(name);
                                out.push_str(close);
                            }
                        }
                        rest = &after_open[end + close.len()..];
                    }
                }
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lenient_passes_through_unresolved_names() {
        let mut params = BTreeMap::new();
        params.insert("node".to_string(), "node-201".to_string());
        let got = substitute_lenient("/api/${node}/${missing}/status", &params);
        assert_eq!(got, "/api/node-201/${missing}/status");
    }

    #[test]
    fn strict_errors_on_missing_name() {
        let params = BTreeMap::new();
        assert!(substitute_strict("{\"node\": \"{{node}}\"}", &params).is_err());
    }

    #[test]
    fn strict_substitutes_present_names() {
        let mut params = BTreeMap::new();
        params.insert("node".to_string(), "node-201".to_string());
        let got = substitute_strict("{\"node\": \"{{node}}\"}", &params).unwrap();
        assert_eq!(got, "{\"node\": \"node-201\"}");
    }
}
