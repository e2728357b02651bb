use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub reindex: ReindexConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    #[serde(default = "default_engine_kind")]
    pub kind: String,
    #[serde(default = "default_engine_host")]
    pub host: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_index")]
    pub index: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,
    /// Block each upsert until the engine has applied it.
    #[serde(default)]
    pub wait_for_writes: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kind: default_engine_kind(),
            host: default_engine_host(),
            api_key: None,
            index: default_index(),
            timeout_secs: default_timeout_secs(),
            task_timeout_secs: default_task_timeout_secs(),
            wait_for_writes: false,
        }
    }
}

fn default_engine_kind() -> String {
    "meilisearch".to_string()
}
fn default_engine_host() -> String {
    "http://localhost:7700".to_string()
}
fn default_index() -> String {
    "articles".to_string()
}
fn default_timeout_secs() -> u64 {
    10
}
fn default_task_timeout_secs() -> u64 {
    30
}

impl EngineConfig {
    /// API key from `MEILISEARCH_API_KEY`, falling back to the config file.
    pub fn resolved_api_key(&self) -> Option<String> {
        std::env::var("MEILISEARCH_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .or_else(|| self.api_key.clone())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    #[serde(default = "default_capacity")]
    pub capacity: u32,
    #[serde(default = "default_refill_per_sec")]
    pub refill_per_sec: f64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_idle_ttl_secs")]
    pub idle_ttl_secs: u64,
    #[serde(default = "default_key_source")]
    pub key_source: String,
    #[serde(default = "default_key_header")]
    pub key_header: String,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            refill_per_sec: default_refill_per_sec(),
            sweep_interval_secs: default_sweep_interval_secs(),
            idle_ttl_secs: default_idle_ttl_secs(),
            key_source: default_key_source(),
            key_header: default_key_header(),
        }
    }
}

fn default_capacity() -> u32 {
    60
}
fn default_refill_per_sec() -> f64 {
    1.0
}
fn default_sweep_interval_secs() -> u64 {
    300
}
fn default_idle_ttl_secs() -> u64 {
    300
}
fn default_key_source() -> String {
    "peer".to_string()
}
fn default_key_header() -> String {
    "x-forwarded-for".to_string()
}

impl RateLimitConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            max_limit: default_max_limit(),
        }
    }
}

fn default_limit() -> usize {
    20
}
fn default_max_limit() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReindexConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for ReindexConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

fn default_batch_size() -> usize {
    500
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    match config.engine.kind.as_str() {
        "meilisearch" | "memory" => {}
        other => anyhow::bail!(
            "Unknown engine kind: '{}'. Must be meilisearch or memory.",
            other
        ),
    }

    let rl = &config.rate_limit;
    if rl.capacity == 0 {
        anyhow::bail!("rate_limit.capacity must be > 0");
    }
    if !(rl.refill_per_sec.is_finite() && rl.refill_per_sec > 0.0) {
        anyhow::bail!("rate_limit.refill_per_sec must be > 0");
    }
    if rl.sweep_interval_secs == 0 {
        anyhow::bail!("rate_limit.sweep_interval_secs must be > 0");
    }
    if rl.idle_ttl_secs == 0 {
        anyhow::bail!("rate_limit.idle_ttl_secs must be > 0");
    }
    match rl.key_source.as_str() {
        "peer" => {}
        "header" if rl.key_header.trim().is_empty() => {
            anyhow::bail!("rate_limit.key_header must be set when key_source is 'header'")
        }
        "header" => {}
        other => anyhow::bail!(
            "Unknown rate_limit.key_source: '{}'. Must be peer or header.",
            other
        ),
    }

    if config.search.max_limit == 0 {
        anyhow::bail!("search.max_limit must be >= 1");
    }
    if config.search.default_limit == 0 || config.search.default_limit > config.search.max_limit {
        anyhow::bail!("search.default_limit must be in [1, search.max_limit]");
    }

    if config.reindex.batch_size == 0 {
        anyhow::bail!("reindex.batch_size must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &str) -> Config {
        let content = format!(
            r#"
[db]
path = "/tmp/catalog.sqlite"

[server]
bind = "127.0.0.1:8080"
{}
"#,
            extra
        );
        toml::from_str(&content).unwrap()
    }

    #[test]
    fn test_defaults_are_valid() {
        let cfg = parse("");
        validate(&cfg).unwrap();
        assert_eq!(cfg.engine.kind, "meilisearch");
        assert_eq!(cfg.engine.index, "articles");
        assert_eq!(cfg.rate_limit.capacity, 60);
        assert_eq!(cfg.rate_limit.sweep_interval(), Duration::from_secs(300));
        assert_eq!(cfg.search.default_limit, 20);
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let cfg = parse("[rate_limit]\ncapacity = 0\n");
        let err = validate(&cfg).unwrap_err();
        assert!(err.to_string().contains("capacity"));
    }

    #[test]
    fn test_rejects_non_positive_refill() {
        let cfg = parse("[rate_limit]\nrefill_per_sec = 0.0\n");
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn test_rejects_unknown_engine() {
        let cfg = parse("[engine]\nkind = \"elastic\"\n");
        let err = validate(&cfg).unwrap_err();
        assert!(err.to_string().contains("elastic"));
    }

    #[test]
    fn test_rejects_default_limit_above_max() {
        let cfg = parse("[search]\ndefault_limit = 50\nmax_limit = 10\n");
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn test_header_key_source_needs_header() {
        let cfg = parse("[rate_limit]\nkey_source = \"header\"\nkey_header = \"\"\n");
        assert!(validate(&cfg).is_err());

        let cfg = parse("[rate_limit]\nkey_source = \"header\"\n");
        validate(&cfg).unwrap();
    }

    #[test]
    fn test_example_config_loads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/catalog.example.toml");
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.engine.index, "articles");
        assert_eq!(cfg.rate_limit.sweep_interval(), Duration::from_secs(300));
    }
}
