//! Black-box coverage of spec.md §8's six Concrete Scenarios (A–F), driven
//! through the crate's public API rather than its internal unit tests. The
//! teacher crate has no `tests/` directory of its own, but this is the
//! idiomatic Rust home for cross-module scenario tests (SPEC_FULL.md
//! §10.4), mirroring `db_test.go` living as its own file in the original
//! source rather than inlined with the code it tests.

use std::collections::HashMap;
use std::sync::Arc;

use fabric_scrape_engine::analytics::bundler::{Bundler, FlushHandler, DEFAULT_IDLE_TIMEOUT};
use fabric_scrape_engine::context_db::index::{DbSchema, IndexSchema, TableSchema};
use fabric_scrape_engine::context_db::ContextDb;
use fabric_scrape_engine::expr::grok;
use fabric_scrape_engine::expr::acipath;
use fabric_scrape_engine::expr::ExpressionEnv;
use fabric_scrape_engine::scrape::client::{ScrapeClient, StaticSessionClient};
use fabric_scrape_engine::scrape::config::{
    AggregationType, AttrBinding, MetricEmit, QueryTreeConfig, RuleConfig, ScopeConfig, ScrapeConfig,
};
use fabric_scrape_engine::scrape::Scraper;
use fabric_scrape_engine::telemetry::MetricConsumer;

fn appd_schema() -> DbSchema {
    DbSchema {
        tables: vec![TableSchema {
            name: "appd".into(),
            indexes: vec![
                IndexSchema {
                    name: "id".into(),
                    unique: true,
                    multi_value: false,
                    fields: vec!["/application".into(), "/tier".into(), "/node".into()],
                },
                IndexSchema {
                    name: "ip".into(),
                    unique: false,
                    multi_value: true,
                    fields: vec!["/ipv4".into()],
                },
            ],
        }],
    }
}

// Scenario A: GetAll by a multi-value `ip` index returns exactly the one
// record containing the queried address.
#[test]
fn scenario_a_db_multi_value_ip_lookup() {
    let db = ContextDb::init(appd_schema()).unwrap();
    let fixtures = [
        ("appA", "tier1", "node1", vec!["10.133.10.150", "10.134.10.150"]),
        ("appB", "tier1", "node2", vec!["10.133.10.151", "10.134.10.151"]),
        ("appC", "tier2", "node3", vec!["10.133.10.152", "10.134.10.152"]),
        ("appD", "tier2", "node4", vec!["10.133.10.153", "10.134.10.153"]),
        ("appE", "tier3", "node5", vec!["10.133.10.154", "10.134.10.154"]),
    ];
    for (app, tier, node, ips) in fixtures {
        db.insert_or_update(
            "appd",
            serde_json::json!({"application": app, "tier": tier, "node": node, "ipv4": ips}),
        )
        .unwrap();
    }

    let got = db.get_all("appd", "ip", &["10.134.10.150".to_string()]).unwrap();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].data["application"], "appA");
}

// Scenario B: forEach over `/imdata/*/fvTenant` emits one `health` metric
// per tenant, each from its own resource-attribute-scoped document.
#[tokio::test]
async fn scenario_b_scrape_tree_emits_one_metric_per_tenant() {
    let doc = serde_json::json!({
        "imdata": [
            {"fvTenant": {"attributes": {"name": "aaa_600_aci_a"}, "children": [
                {"healthInst": {"attributes": {"cur": "100"}}}
            ]}},
            {"fvTenant": {"attributes": {"name": "mgmt"}, "children": [
                {"healthInst": {"attributes": {"cur": "100"}}}
            ]}},
        ]
    });

    let mut responses = HashMap::new();
    responses.insert("/api/tenants".to_string(), doc.to_string());
    let client: Arc<dyn ScrapeClient> = Arc::new(StaticSessionClient::new(responses));

    let for_each = RuleConfig {
        resource_attributes: vec![AttrBinding {
            name: "tenant".to_string(),
            value: None,
            value_from: Some("=jqs('./attributes/name')".to_string()),
        }],
        emit_metric: vec![MetricEmit {
            name: "health".to_string(),
            description: String::new(),
            unit: String::new(),
            aggregation_type: AggregationType::Gauge,
            value_from: "=jqs('./children/*/healthInst/attributes/cur')".to_string(),
            filters: vec![],
            resource_attributes: vec![],
            item_attributes: vec![],
        }],
        ..Default::default()
    };
    let root = RuleConfig {
        query: Some("/api/tenants".to_string()),
        select: Some("/imdata/*/fvTenant".to_string()),
        for_each: Some(Box::new(for_each)),
        ..Default::default()
    };
    let tree = QueryTreeConfig {
        name: "tenants".to_string(),
        resource: vec![],
        scope: ScopeConfig {
            name: "aci".to_string(),
            version: "1.0".to_string(),
        },
        rules: root,
    };

    struct CollectingConsumer {
        metrics: std::sync::Mutex<Vec<fabric_scrape_engine::telemetry::Metric>>,
    }
    impl MetricConsumer for CollectingConsumer {
        fn consume_metric(&self, metric: fabric_scrape_engine::telemetry::Metric) {
            self.metrics.lock().unwrap().push(metric);
        }
    }

    let consumer = Arc::new(CollectingConsumer {
        metrics: std::sync::Mutex::new(Vec::new()),
    });
    let scraper = Scraper::new(
        ScrapeConfig {
            interval_seconds: 60,
            queries: vec![tree],
        },
        client,
        Arc::new(ExpressionEnv::new(None)),
        None,
        Some(Arc::clone(&consumer) as Arc<dyn MetricConsumer>),
        None,
    );

    scraper.run_cycle().await.unwrap();

    let metrics = consumer.metrics.lock().unwrap();
    assert_eq!(metrics.len(), 2);
    assert!(metrics.iter().all(|m| m.value == 100.0));
    let names: std::collections::HashSet<_> =
        metrics.iter().map(|m| m.resource_attributes.get("tenant").unwrap().to_string()).collect();
    assert!(names.contains("aaa_600_aci_a"));
    assert!(names.contains("mgmt"));
}

// Scenario C: acipath() decomposes a physical-interface topology path into
// its six named fields.
#[test]
fn scenario_c_acipath_decomposes_physical_interface_path() {
    let got = acipath::acipath("topology/pod-1/node-201/sys/phys-[eth1/33]").unwrap();
    assert_eq!(got.path, "topology/pod-1/node-201/sys/phys");
    assert_eq!(got.target, "eth1/33");
    assert_eq!(got.pod, "pod-1");
    assert_eq!(got.pod_id, "1");
    assert_eq!(got.node, "node-201");
    assert_eq!(got.node_id, "201");
}

// Scenario D: acipathnodes() collapses path-group/port-channel/single-node
// paths into a sorted, deduplicated node list.
#[test]
fn scenario_d_acipathnodes_returns_sorted_node_list() {
    let paths = vec![
        "topology/pod-1/paths-201/sys/phys-[eth1/33]".to_string(),
        "topology/pod-1/paths-202/sys/phys-[eth1/34]".to_string(),
        "topology/pod-1/protpaths-203-204/sys/phys-[eth1/1]".to_string(),
        "topology/pod-1/pathgrp-[po1]".to_string(),
    ];
    let got = acipath::acipathnodes(&paths);
    assert!(got.contains(&"topology/pod-1/node-201".to_string()));
    assert!(got.contains(&"topology/pod-1/node-202".to_string()));
    assert!(got.contains(&"topology/pod-1/node-203".to_string()));
    assert!(got.contains(&"topology/pod-1/node-204".to_string()));
    let mut sorted = got.clone();
    sorted.sort();
    assert_eq!(got, sorted);
}

// Scenario E: grok() extracts named captures from a fabric topology path.
#[test]
fn scenario_e_grok_extracts_pod_node_interface() {
    let got = grok::parse("topology/pod-1/node-101/sys/phys-[eth1/9]", "%{ACIPHYIF}").unwrap();
    assert_eq!(got.get("pod").map(String::as_str), Some("pod-1"));
    assert_eq!(got.get("node").map(String::as_str), Some("node-101"));
    assert_eq!(got.get("if").map(String::as_str), Some("eth1/9"));
}

// Scenario F: the bundler flushes at the size threshold, then again after
// an idle period once a new record lands below the threshold.
#[tokio::test(start_paused = true)]
async fn scenario_f_bundler_flushes_on_size_then_idle() {
    struct CountingHandler {
        flushes: std::sync::atomic::AtomicUsize,
        last_len: std::sync::Mutex<Vec<usize>>,
    }
    impl FlushHandler for CountingHandler {
        fn flush(&self, _table: &str, records: Vec<serde_json::Value>) {
            self.flushes.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.last_len.lock().unwrap().push(records.len());
        }
    }

    let handler = Arc::new(CountingHandler {
        flushes: std::sync::atomic::AtomicUsize::new(0),
        last_len: std::sync::Mutex::new(Vec::new()),
    });
    let bundler = Arc::new(Bundler::new(Arc::clone(&handler) as Arc<dyn FlushHandler>));

    for i in 0..19 {
        bundler.append("events", serde_json::json!({"i": i}));
    }
    tokio::task::yield_now().await;
    assert_eq!(handler.flushes.load(std::sync::atomic::Ordering::SeqCst), 0);

    bundler.append("events", serde_json::json!({"i": 19}));
    tokio::task::yield_now().await;
    assert_eq!(handler.flushes.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(handler.last_len.lock().unwrap().last(), Some(&20));

    bundler.append("events", serde_json::json!({"i": 20}));
    tokio::time::advance(DEFAULT_IDLE_TIMEOUT + std::time::Duration::from_millis(10)).await;
    tokio::task::yield_now().await;
    assert_eq!(handler.flushes.load(std::sync::atomic::Ordering::SeqCst), 2);
    assert_eq!(handler.last_len.lock().unwrap().last(), Some(&1));
}
