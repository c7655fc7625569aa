use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use fabric_scrape_engine::analytics::metric_tree::{MatchCondition, MetricTreeRule};
use fabric_scrape_engine::analytics::schema::AnalyticsApiConfig;
use fabric_scrape_engine::analytics::AnalyticsSink;
use fabric_scrape_engine::config::AppConfig;
use fabric_scrape_engine::context_db::ContextDb;
use fabric_scrape_engine::expr::ExpressionEnv;
use fabric_scrape_engine::scrape::client::{ScrapeClient, StaticSessionClient};
use fabric_scrape_engine::scrape::Scraper;
use fabric_scrape_engine::telemetry::{LogConsumer, MetricConsumer};

/// Loads the canned request/response table `StaticSessionClient` serves.
/// A signed-request or cookie-jar-session client talking to a real fabric
/// controller is out of scope for this crate (see DESIGN.md); a deployer
/// wires their own `ScrapeClient` impl in here instead.
fn build_client() -> anyhow::Result<StaticSessionClient> {
    let fixtures_path = std::env::var("FABRIC_SCRAPE_FIXTURES").ok();
    let responses = match fixtures_path {
        Some(path) => {
            let contents = std::fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        }
        None => std::collections::HashMap::new(),
    };
    Ok(StaticSessionClient::new(responses))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("fabric_scrape_engine=debug")
        }))
        .init();

    let config_path = std::env::var("FABRIC_SCRAPE_CONFIG").unwrap_or_else(|_| "./fabric-scrape.yaml".to_string());
    let config = AppConfig::load(&config_path)?;

    let context_db = match config.context_db {
        Some(schema) => Some(Arc::new(ContextDb::init(schema)?)),
        None => None,
    };

    let expr_env = Arc::new(ExpressionEnv::new(context_db.clone()));

    let client: Arc<dyn ScrapeClient> = Arc::new(build_client()?);

    let metric_tree_rules = config
        .analytics
        .metric_tree_rules
        .iter()
        .map(|r| MetricTreeRule {
            metric_name: r.metric_name.clone(),
            match_conditions: r
                .match_conditions
                .iter()
                .map(|c| MatchCondition {
                    attribute: c.attribute.clone(),
                    equals: c.equals.clone(),
                })
                .collect(),
            path_template: r.path_template.clone(),
        })
        .collect();

    let analytics_sink = if config.analytics.base_url.is_empty() {
        tracing::info!("no analytics base_url configured, scraped records will not be published");
        None
    } else {
        Some(Arc::new(AnalyticsSink::new(
            AnalyticsApiConfig {
                base_url: config.analytics.base_url.clone(),
                global_account_name: config.analytics.global_account_name.clone(),
                api_key: config.analytics.api_key.clone(),
            },
            config.analytics.machine_agent_url.clone(),
            metric_tree_rules,
        )))
    };

    let metric_consumer: Option<Arc<dyn MetricConsumer>> =
        analytics_sink.clone().map(|s| s as Arc<dyn MetricConsumer>);
    let log_consumer: Option<Arc<dyn LogConsumer>> = analytics_sink.map(|s| s as Arc<dyn LogConsumer>);

    let scraper = Arc::new(Scraper::new(
        config.scrape,
        client,
        expr_env,
        context_db,
        metric_consumer,
        log_consumer,
    ));

    tracing::info!("fabric-scrape-engine starting");
    let driver = scraper.spawn_driver();
    driver.await?;
    Ok(())
}
