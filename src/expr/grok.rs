//! Minimal grok-style named-capture matcher, covering just the macro forms
//! the five predefined fabric patterns use (`%{DATA:name}`,
//! `%{GREEDYDATA:name}`). Grounded on `expressions/fn_grok.go`'s use of
//! `vjeantet/grok` with `NamedCapturesOnly: true`; the Rust ecosystem's
//! `grok` crates are unmaintained, so this re-implements the handful of
//! macros actually needed on top of `regex`'s native named groups, which
//! the teacher crate already depends on.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

/// The five predefined fabric patterns from `fn_grok.go`'s
/// `grokPredefinePatterns`.
pub fn predefined_pattern(name: &str) -> Option<&'static str> {
    match name {
        "ACIBUNDLE" => Some(r"uni/infra/funcprof/accbundle-%{GREEDYDATA:bundle}"),
        "ACI_EP_LOGIF" => {
            Some(r"topology/%{DATA:pod}/protpaths-%{DATA:node1}-%{DATA:node2}/pathep-\[%{DATA:bundle}\]")
        }
        "ACI_EP_PHYIF" => Some(r"topology/%{DATA:pod}/paths-%{DATA:node}/pathep-\[%{DATA:if}\]"),
        "ACIEP" => Some(r"uni/tn-%{DATA:tenant}/ap-%{DATA:applicationPolicy}/epg-%{DATA:epg}/cep-%{GREEDYDATA:mac}"),
        "ACIPHYIF" => Some(r"topology/%{DATA:pod}/%{DATA:node}/sys/phys-\[%{DATA:if}\]"),
        _ => None,
    }
}

fn macro_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"%\{([A-Za-z_]+)(?::([A-Za-z0-9_]+))?\}").unwrap())
}

fn reference_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^%\{([A-Za-z_]+)\}$").unwrap())
}

/// Expands `%{NAME}` (a predefined-pattern reference) and `%{MACRO:cap}`
/// macros into a plain regex with named capture groups.
fn expand(pattern: &str) -> Result<String, String> {
    if let Some(c) = reference_re().captures(pattern.trim()) {
        let name = &c[1];
        return match predefined_pattern(name) {
            Some(p) => expand(p),
            None => Err(format!("unknown grok pattern `{name}`")),
        };
    }

    let mut out = String::new();
    let mut last = 0;
    for c in macro_re().captures_iter(pattern) {
        let m = c.get(0).unwrap();
        out.push_str(&regex::escape(&pattern[last..m.start()]));
        let macro_name = &c[1];
        let capture_name = c.get(2).map(|m| m.as_str());
        let body = match macro_name {
            "GREEDYDATA" => ".*",
            "DATA" => ".*?",
            other => return Err(format!("unsupported grok macro `{other}`")),
        };
        match capture_name {
            Some(name) => out.push_str(&format!("(?P<{name}>{body})")),
            None => out.push_str(&format!("(?:{body})")),
        }
        last = m.end();
    }
    out.push_str(&regex::escape(&pattern[last..]));
    Ok(out)
}

/// Matches `text` against `pattern` (which may be `%{PREDEFINED_NAME}` or
/// a raw grok expression), returning the named captures. `NamedCapturesOnly`
/// semantics: only named groups appear in the result.
pub fn parse(text: &str, pattern: &str) -> Result<BTreeMap<String, String>, String> {
    let regex_src = expand(pattern)?;
    let re = Regex::new(&format!("^{regex_src}$"))
        .or_else(|_| Regex::new(&regex_src))
        .map_err(|e| format!("invalid grok-derived regex: {e}"))?;
    let caps = re
        .captures(text)
        .ok_or_else(|| format!("Error parsing >{text}< by Grok pattern >{pattern}<"))?;
    let mut result = BTreeMap::new();
    for name in re.capture_names().flatten() {
        if let Some(m) = caps.name(name) {
            result.insert(name.to_string(), m.as_str().to_string());
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Concrete Scenario E (spec.md §8).
    #[test]
    fn scenario_e_aci_phyif() {
        let got = parse("topology/pod-1/node-101/sys/phys-[eth1/9]", "%{ACIPHYIF}").unwrap();
        assert_eq!(got.get("pod").map(String::as_str), Some("pod-1"));
        assert_eq!(got.get("node").map(String::as_str), Some("node-101"));
        assert_eq!(got.get("if").map(String::as_str), Some("eth1/9"));
    }

    #[test]
    fn unmatched_text_is_an_error_not_panic() {
        assert!(parse("not-a-fabric-path", "%{ACIPHYIF}").is_err());
    }
}
