//! Fabric topology path parsing: `acipath`, `acipathnodes`, `acipathparse`.
//! Ported from `expressions/fn_aci_path.go`, with one deliberate deviation
//! from the Go source: `acipathnodes`/`acipathparse` sort their node list.
//! The Go implementation accumulates nodes in a `map[string]string` and
//! iterates it directly, which has no stable order; spec.md Scenario D
//! explicitly requires a sorted result, so the dedup set here is sorted
//! before being returned.

use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq)]
pub struct AciPath {
    pub path: String,
    pub target: String,
    pub pod: String,
    pub pod_id: String,
    pub node: String,
    pub node_id: String,
}

/// Parses `"topology/pod-1/node-201/sys/phys-[eth1/33]"` into its
/// constituent fields. Malformed input maps to a `{"fail": "1"|"2"}`
/// marker map in the original; here that's an explicit `Err` instead of a
/// sentinel value, per the redesign notes on illegal coercions.
pub fn acipath(s: &str) -> Result<AciPath, String> {
    let parts: Vec<&str> = s.splitn(2, "-[").collect();
    if parts.len() != 2 {
        return Err(format!("acipath: missing `-[` target delimiter in `{s}`"));
    }
    let target = parts[1].split(']').next().unwrap_or("").to_string();
    let path_parts: Vec<&str> = parts[0].split('/').collect();
    if path_parts.len() < 3 {
        return Err(format!("acipath: expected at least 3 `/`-separated segments in `{s}`"));
    }
    let pod = path_parts[1].to_string();
    let pod_id = pod
        .split('-')
        .nth(1)
        .ok_or_else(|| format!("acipath: pod segment `{pod}` has no `-id` suffix"))?
        .to_string();
    let node = path_parts[2].to_string();
    let node_id = node.splitn(2, '-').nth(1).unwrap_or("").to_string();

    Ok(AciPath {
        path: parts[0].to_string(),
        target,
        pod,
        pod_id,
        node,
        node_id,
    })
}

enum PathKind {
    SingleNode(String),
    PortChannel(String, String),
    VmmLearned,
    Unrecognized,
}

fn classify(path: &str) -> Option<(String, PathKind)> {
    let elems: Vec<&str> = path.split('/').collect();
    if elems.len() < 3 {
        return None;
    }
    let pod = elems[1].to_string();
    let node_elems: Vec<&str> = elems[2].split('-').collect();
    let kind = match node_elems.first() {
        Some(&"paths") => PathKind::SingleNode(node_elems.get(1)?.to_string()),
        Some(&"protpaths") => {
            PathKind::PortChannel(node_elems.get(1)?.to_string(), node_elems.get(2)?.to_string())
        }
        Some(&"pathgrp") => PathKind::VmmLearned,
        _ => PathKind::Unrecognized,
    };
    Some((pod, kind))
}

/// Extracts unique `topology/{pod}/node-{id}` strings from a list of
/// fabric paths, sorted.
pub fn acipathnodes(paths: &[String]) -> Vec<String> {
    let mut nodes: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for path in paths {
        let Some((pod, kind)) = classify(path) else {
            continue;
        };
        match kind {
            PathKind::SingleNode(id) => {
                nodes.entry(pod).or_default().insert(id);
            }
            PathKind::PortChannel(a, b) => {
                let set = nodes.entry(pod).or_default();
                set.insert(a);
                set.insert(b);
            }
            PathKind::VmmLearned | PathKind::Unrecognized => {}
        }
    }
    let mut result: Vec<String> = nodes
        .into_iter()
        .flat_map(|(pod, ids)| ids.into_iter().map(move |id| format!("topology/{pod}/node-{id}")))
        .collect();
    result.sort();
    result
}

pub struct AciPathParse {
    pub nodes: Vec<String>,
    pub phy_ifs: Vec<String>,
    pub log_ifs: Vec<String>,
}

/// Same traversal as `acipathnodes` but also classifies each input path as
/// a physical interface (`paths-`) or logical/port-channel interface
/// (`protpaths-`) path, in addition to the sorted node list.
pub fn acipathparse(paths: &[String]) -> AciPathParse {
    let nodes = acipathnodes(paths);
    let mut phy_ifs = BTreeSet::new();
    let mut log_ifs = BTreeSet::new();
    for path in paths {
        let Some((_, kind)) = classify(path) else {
            continue;
        };
        match kind {
            PathKind::SingleNode(_) => {
                phy_ifs.insert(path.clone());
            }
            PathKind::PortChannel(_, _) => {
                log_ifs.insert(path.clone());
            }
            PathKind::VmmLearned | PathKind::Unrecognized => {}
        }
    }
    AciPathParse {
        nodes,
        phy_ifs: phy_ifs.into_iter().collect(),
        log_ifs: log_ifs.into_iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Concrete Scenario C (spec.md §8).
    #[test]
    fn scenario_c_acipath() {
        let got = acipath("topology/pod-1/node-201/sys/phys-[eth1/33]").unwrap();
        assert_eq!(got.path, "topology/pod-1/node-201/sys/phys");
        assert_eq!(got.target, "eth1/33");
        assert_eq!(got.pod, "pod-1");
        assert_eq!(got.pod_id, "1");
        assert_eq!(got.node, "node-201");
        assert_eq!(got.node_id, "201");
    }

    // Concrete Scenario D (spec.md §8): sorted, deduplicated node list
    // across single-node, port-channel, and VMM-learned path prefixes.
    #[test]
    fn scenario_d_acipathnodes_sorted() {
        let paths = vec![
            "topology/pod-1/paths-201/sys/phys-[eth1/33]".to_string(),
            "topology/pod-1/paths-202/sys/phys-[eth1/34]".to_string(),
            "topology/pod-1/protpaths-203-204/pathep-[bundle1]".to_string(),
            "topology/pod-1/pathgrp-[vc1]/pathep-[x]".to_string(),
        ];
        let got = acipathnodes(&paths);
        assert_eq!(
            got,
            vec![
                "topology/pod-1/node-201",
                "topology/pod-1/node-202",
                "topology/pod-1/node-203",
                "topology/pod-1/node-204",
            ]
        );
    }
}
