//! Configuration management with YAML support

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub rules: RulesConfig,

    #[serde(default)]
    pub semantic: SemanticConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub sweep: SweepConfig,

    #[serde(default)]
    pub discovery: DiscoveryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Attempts a CLI batch makes when SQLite reports the file busy
    #[serde(default = "default_busy_retries")]
    pub busy_retries: u32,

    /// First backoff delay; doubles per attempt
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

/// Rule matcher thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesConfig {
    /// A winner is accepted only when its score is strictly above this
    #[serde(default = "default_acceptance_threshold")]
    pub acceptance_threshold: f64,

    /// Score that maps to confidence 1.0
    #[serde(default = "default_normalizing_constant")]
    pub normalizing_constant: f64,
}

/// Semantic matcher settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default = "default_min_similarity")]
    pub min_similarity: f64,

    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    /// Upper bound on labelled vectors scanned per query
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,

    #[serde(default = "default_few_shot_limit")]
    pub few_shot_limit: usize,
}

/// Pattern snapshot lifetime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

/// Project discovery from recent history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,

    /// Focus events an app needs before it becomes a project
    #[serde(default = "default_min_app_events")]
    pub min_app_events: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Used when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_database_path() -> String {
    dirs::data_dir()
        .map(|dir| dir.join("worktrail").join("worktrail.db"))
        .map(|path| path.to_string_lossy().to_string())
        .unwrap_or_else(|| "~/.local/share/worktrail/worktrail.db".to_string())
}

fn default_busy_retries() -> u32 {
    5
}

fn default_retry_backoff_ms() -> u64 {
    50
}

fn default_acceptance_threshold() -> f64 {
    0.4
}

fn default_normalizing_constant() -> f64 {
    3.0
}

fn default_top_k() -> usize {
    5
}

fn default_min_similarity() -> f64 {
    0.5
}

fn default_min_confidence() -> f64 {
    0.5
}

fn default_max_candidates() -> usize {
    5000
}

fn default_few_shot_limit() -> usize {
    200
}

fn default_ttl_secs() -> u64 {
    300
}

fn default_batch_size() -> usize {
    500
}

fn default_lookback_days() -> u32 {
    90
}

fn default_min_app_events() -> usize {
    3
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            busy_retries: default_busy_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            acceptance_threshold: default_acceptance_threshold(),
            normalizing_constant: default_normalizing_constant(),
        }
    }
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_similarity: default_min_similarity(),
            min_confidence: default_min_confidence(),
            max_candidates: default_max_candidates(),
            few_shot_limit: default_few_shot_limit(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            lookback_days: default_lookback_days(),
            min_app_events: default_min_app_events(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl DatabaseConfig {
    /// Delay before retry number `attempt` (0-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(1u64 << attempt.min(16)))
    }
}

impl Config {
    /// Load configuration from a YAML file
    /// Searches in order:
    /// 1. Provided path
    /// 2. ./worktrail.yaml (current directory)
    /// 3. ~/.config/worktrail/worktrail.yaml
    pub fn load(path: &str) -> Result<Self> {
        let search_paths = vec![
            shellexpand::tilde(path).to_string(),
            "worktrail.yaml".to_string(),
            shellexpand::tilde("~/.config/worktrail/worktrail.yaml").to_string(),
        ];

        for search_path in &search_paths {
            if std::path::Path::new(search_path).exists() {
                let content = std::fs::read_to_string(search_path)?;
                let config: Config = serde_yaml::from_str(&content)
                    .with_context(|| format!("Invalid config file {}", search_path))?;
                return Ok(config);
            }
        }

        // No config file found, use defaults
        Ok(Config::default())
    }

    /// Get the database path, expanding ~ to home directory
    pub fn database_path(&self) -> PathBuf {
        let expanded = shellexpand::tilde(&self.database.path).to_string();
        PathBuf::from(expanded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.rules.acceptance_threshold, 0.4);
        assert_eq!(config.rules.normalizing_constant, 3.0);
        assert_eq!(config.semantic.top_k, 5);
        assert_eq!(config.semantic.max_candidates, 5000);
        assert_eq!(config.cache.ttl(), Duration::from_secs(300));
        assert_eq!(config.discovery.lookback_days, 90);
        assert_eq!(config.discovery.min_app_events, 3);
        assert!(config.database.path.ends_with("worktrail.db"));
    }

    #[test]
    fn test_backoff_doubles() {
        let db = DatabaseConfig::default();
        assert_eq!(db.backoff(0), Duration::from_millis(50));
        assert_eq!(db.backoff(3), Duration::from_millis(400));
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
database:
  path: ~/.local/share/worktrail/test.db
  busy_retries: 2

rules:
  acceptance_threshold: 0.6

semantic:
  top_k: 3
  min_similarity: 0.7

sweep:
  batch_size: 50
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.database.path, "~/.local/share/worktrail/test.db");
        assert_eq!(config.database.busy_retries, 2);
        assert_eq!(config.database.retry_backoff_ms, 50);
        assert_eq!(config.rules.acceptance_threshold, 0.6);
        assert_eq!(config.rules.normalizing_constant, 3.0);
        assert_eq!(config.semantic.top_k, 3);
        assert_eq!(config.semantic.min_confidence, 0.5);
        assert_eq!(config.sweep.batch_size, 50);
        assert_eq!(config.logging.level, "info");
        assert!(!config.database_path().to_string_lossy().starts_with('~'));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.yaml");
        std::fs::write(&path, "cache:\n  ttl_secs: 5\n").unwrap();

        let config = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.cache.ttl_secs, 5);
    }
}
