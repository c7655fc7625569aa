//! Top-level YAML configuration (SPEC_FULL.md §10.3: YAML over TOML,
//! matching the original's rule-tree config shape more directly than TOML
//! tables would). Grounded on the teacher's own `config.rs` default-
//! fallback-with-logging idiom: a missing file is not fatal at startup, it
//! just means "run with defaults."

use std::path::Path;

use serde::Deserialize;

use crate::context_db::index::DbSchema;
use crate::scrape::config::ScrapeConfig;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub scrape: ScrapeConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    /// Context DB table/index declarations (spec.md §3/§6). Absent means no
    /// context DB is wired up for this run — rules with `emitDbRecord` or
    /// `dbGetFirst`/`dbGetAll`/`dbGetFirstA` calls will simply fail at eval
    /// time, logged and skipped like any other per-rule error.
    pub context_db: Option<DbSchema>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub global_account_name: String,
    #[serde(default)]
    pub api_key: String,
    pub machine_agent_url: Option<String>,
    #[serde(default)]
    pub metric_tree_rules: Vec<MetricTreeRuleConfig>,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        AnalyticsConfig {
            base_url: String::new(),
            global_account_name: String::new(),
            api_key: String::new(),
            machine_agent_url: None,
            metric_tree_rules: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricTreeRuleConfig {
    pub metric_name: String,
    #[serde(default)]
    pub match_conditions: Vec<MatchConditionConfig>,
    pub path_template: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MatchConditionConfig {
    pub attribute: String,
    pub equals: String,
}

impl AppConfig {
    /// Loads config from a YAML file. Returns defaults (an empty query
    /// list, nothing scraped) if the file doesn't exist — the same
    /// missing-file-is-not-fatal posture as the original.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("config file not found at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = serde_yaml::from_str(&contents)?;
        tracing::info!("loaded config from {}", path.display());
        Ok(config)
    }
}
