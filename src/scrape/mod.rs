//! The periodic scrape driver: walks a rule tree per cycle, maintaining the
//! nested evaluation context and routing emitted records to telemetry
//! consumers and the Context DB. Grounds spec.md §4.3's `RunRule` algorithm,
//! styled after the teacher crate's `anomaly_engine.rs`/`alert_engine.rs`
//! periodic-task shape (a ticker loop spawning one task per tick, errors
//! logged and swallowed at the task boundary so one bad cycle never kills
//! the driver).

pub mod client;
pub mod config;
pub mod emitter;
pub mod templating;

use std::sync::Arc;
use std::time::Duration;

use crate::context_db::ContextDb;
use crate::context_stack::{Scope, ScraperContext};
use crate::error::{EngineError, EngineResult};
use crate::expr::ExpressionEnv;
use crate::jsonpath;
use crate::telemetry::{LogConsumer, MetricConsumer, SeverityMapper};

use client::{HttpMethod, ScrapeClient};
use config::{QueryTreeConfig, RuleConfig, ScrapeConfig};

pub struct Scraper {
    config: ScrapeConfig,
    client: Arc<dyn ScrapeClient>,
    expr_env: Arc<ExpressionEnv>,
    context_db: Option<Arc<ContextDb>>,
    metric_consumer: Option<Arc<dyn MetricConsumer>>,
    log_consumer: Option<Arc<dyn LogConsumer>>,
    severity_mapper: SeverityMapper,
}

impl Scraper {
    pub fn new(
        config: ScrapeConfig,
        client: Arc<dyn ScrapeClient>,
        expr_env: Arc<ExpressionEnv>,
        context_db: Option<Arc<ContextDb>>,
        metric_consumer: Option<Arc<dyn MetricConsumer>>,
        log_consumer: Option<Arc<dyn LogConsumer>>,
    ) -> Self {
        Scraper {
            config,
            client,
            expr_env,
            context_db,
            metric_consumer,
            log_consumer,
            severity_mapper: emitter::default_mapper(),
        }
    }

    /// Spawns the per-receiver ticker task (spec.md §5 task #1): one scrape
    /// task launched per tick, without waiting for the previous tick's task
    /// to finish (overlap is explicitly permitted).
    pub fn spawn_driver(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let interval = Duration::from_secs(self.config.interval_seconds.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let this = Arc::clone(&self);
                tokio::spawn(async move {
                    if let Err(e) = this.run_cycle().await {
                        tracing::error!(error = %e, "scrape cycle failed");
                    }
                });
            }
        })
    }

    /// Runs one full cycle over every configured query tree. Login failure
    /// skips the whole cycle (spec.md §4.3's failure semantics); a failure
    /// within one tree's rule traversal is logged and the engine moves on
    /// to the next tree.
    pub async fn run_cycle(&self) -> EngineResult<()> {
        if let Err(e) = self.client.login().await {
            tracing::warn!(error = %e, "login failed, skipping scrape cycle");
            return Ok(());
        }

        for tree in &self.config.queries {
            if let Err(e) = self.run_query_tree(tree).await {
                tracing::warn!(query = %tree.name, error = %e, "query tree failed");
            }
        }

        if let Err(e) = self.client.logout().await {
            tracing::debug!(error = %e, "logout failed");
        }
        Ok(())
    }

    async fn run_query_tree(&self, tree: &QueryTreeConfig) -> EngineResult<()> {
        let mut ctx = ScraperContext::new();
        ctx.push();

        let resource_attrs = emitter::eval_attr_bindings(&self.expr_env, &serde_json::Value::Null, &ctx, &tree.resource)?;
        for (k, v) in resource_attrs {
            ctx.add_resource_attr(k, v);
        }
        ctx.set_scope(Scope {
            name: tree.scope.name.clone(),
            version: tree.scope.version.clone(),
        });

        let result = self.run_rule(&tree.rules, None, &mut ctx).await;
        ctx.pop();
        result
    }

    /// `RunRule` (spec.md §4.3 step 2), recursing for `select`+`forEach`.
    fn run_rule<'a>(
        &'a self,
        rule: &'a RuleConfig,
        incoming_doc: Option<serde_json::Value>,
        ctx: &'a mut ScraperContext,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = EngineResult<()>> + Send + 'a>> {
        Box::pin(async move {
            ctx.push();

            let doc_for_params = incoming_doc.clone().unwrap_or(serde_json::Value::Null);
            for binding in &rule.query_parameters {
                let value = emitter::eval_attr_bindings(
                    &self.expr_env,
                    &doc_for_params,
                    ctx,
                    std::slice::from_ref(binding),
                )?;
                if let Some(v) = value.get(&binding.name) {
                    ctx.add_parameter(binding.name.clone(), v.to_string());
                }
            }

            let doc = self.resolve_document(rule, &incoming_doc, ctx).await?;
            ctx.set_document(doc.clone());

            let resource_attrs = emitter::eval_attr_bindings(&self.expr_env, &doc, ctx, &rule.resource_attributes)?;
            for (k, v) in resource_attrs {
                ctx.add_resource_attr(k, v);
            }
            let item_attrs = emitter::eval_attr_bindings(&self.expr_env, &doc, ctx, &rule.item_attributes)?;
            for (k, v) in item_attrs {
                ctx.add_item_attr(k, v);
            }

            for name in &rule.reducers {
                self.expr_env.init_reducer(name);
            }

            if let (Some(select), Some(for_each)) = (&rule.select, &rule.for_each) {
                let nodes: Vec<serde_json::Value> = jsonpath::find_all(&doc, select).into_iter().cloned().collect();
                for node in nodes {
                    if let Err(e) = self.run_rule(for_each, Some(node), ctx).await {
                        tracing::warn!(error = %e, "forEach sub-rule failed, continuing with siblings");
                    }
                }
            }

            for contrib in &rule.reducer_maps {
                match emitter::eval_value_or_path(&self.expr_env, &doc, ctx, &contrib.value_from) {
                    Ok(v) => self.expr_env.push_reducer(&contrib.name, v),
                    Err(e) => tracing::warn!(reducer = %contrib.name, error = %e, "reducer-map contribution dropped"),
                }
            }

            self.process_emits(rule, &doc, ctx);

            ctx.pop();
            Ok(())
        })
    }

    async fn resolve_document(
        &self,
        rule: &RuleConfig,
        incoming_doc: &Option<serde_json::Value>,
        ctx: &ScraperContext,
    ) -> EngineResult<serde_json::Value> {
        if rule.reuses_incoming_document() {
            return Ok(incoming_doc.clone().unwrap_or(serde_json::Value::Null));
        }
        let params = ctx.parameters();
        let url = templating::substitute_lenient(rule.query.as_deref().unwrap_or(""), &params);
        let body = rule
            .query_post_data
            .as_deref()
            .map(|b| templating::substitute_strict(b, &params))
            .transpose()?;
        let method = if body.is_some() { HttpMethod::Post } else { HttpMethod::Get };

        let text = self.client.do_request(method, &url, body.as_deref()).await?;
        serde_json::from_str(&text).map_err(|e| EngineError::ResponseMalformed {
            url,
            detail: e.to_string(),
        })
    }

    fn process_emits(&self, rule: &RuleConfig, doc: &serde_json::Value, ctx: &ScraperContext) {
        if let Some(consumer) = &self.metric_consumer {
            for emit in &rule.emit_metric {
                match emitter::build_metric(&self.expr_env, doc, ctx, emit, self.config.interval_seconds as i64 * 1000) {
                    Ok(Some(metric)) => consumer.consume_metric(metric),
                    Ok(None) => {}
                    Err(e) => tracing::warn!(metric = %emit.name, error = %e, "dropping metric record"),
                }
            }
        }

        if let Some(consumer) = &self.log_consumer {
            for emit in &rule.emit_logs {
                match emitter::build_log(&self.expr_env, doc, ctx, emit, self.severity_mapper) {
                    Ok(Some(log)) => consumer.consume_log(log),
                    Ok(None) => {}
                    Err(e) => tracing::warn!(error = %e, "dropping log record"),
                }
            }
        }

        if let Some(db) = &self.context_db {
            for emit in &rule.emit_db_record {
                match emitter::build_db_record(&self.expr_env, doc, ctx, emit) {
                    Ok(Some(record)) => {
                        if let Err(e) = db.insert_or_update(&emit.table, record) {
                            tracing::warn!(table = %emit.table, error = %e, "db emit failed");
                        } else if emit.dump {
                            match db.dump(&emit.table) {
                                Ok(rows) => tracing::debug!(table = %emit.table, rows = ?rows, "context db dump"),
                                Err(e) => tracing::warn!(table = %emit.table, error = %e, "db dump failed"),
                            }
                        }
                    }
                    Ok(None) => {}
                    Err(e) => tracing::warn!(table = %emit.table, error = %e, "dropping db record"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{AggregationType, AttrBinding, MetricEmit};
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct CollectingConsumer {
        metrics: Mutex<Vec<crate::telemetry::Metric>>,
    }

    impl MetricConsumer for CollectingConsumer {
        fn consume_metric(&self, metric: crate::telemetry::Metric) {
            self.metrics.lock().unwrap().push(metric);
        }
    }

    // Concrete Scenario B (spec.md §8): forEach over `/imdata/*/fvTenant`,
    // emitting one `health` metric per tenant.
    #[tokio::test]
    async fn scenario_b_foreach_emits_one_metric_per_tenant() {
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
        let client: Arc<dyn ScrapeClient> = Arc::new(client::StaticSessionClient::new(responses));

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
            scope: config::ScopeConfig {
                name: "aci".to_string(),
                version: "1.0".to_string(),
            },
            rules: root,
        };

        let consumer = Arc::new(CollectingConsumer { metrics: Mutex::new(Vec::new()) });
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
}
