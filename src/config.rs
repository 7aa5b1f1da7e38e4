//! Configuration file handling.
//!
//! Settings come from `vacina.toml` (every field has a default) and are then
//! overridden by the environment variables the deployment already uses:
//! `DATABASE_URL`, `DATA_TABLE`, `SUPABASE_URL`, `SUPABASE_SERVICE_ROLE_KEY`,
//! `CORS_ORIGINS` and `VACINA_BIND`.

use crate::db;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

pub const DEFAULT_CONFIG_FILE: &str = "vacina.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub rest: RestConfig,

    #[serde(default)]
    pub mappings: MappingsConfig,

    #[serde(default)]
    pub forecast: ForecastConfig,

    #[serde(default)]
    pub comparison: ComparisonConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Allowed CORS origins; `["*"]` allows any.
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            cors_origins: default_cors_origins(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_cors_origins() -> Vec<String> {
    [
        "http://localhost:5173",
        "http://127.0.0.1:5173",
        "http://localhost:8080",
        "http://127.0.0.1:8080",
        "http://localhost:3000",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Where distribution rows are read from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// SQLite database file. Unset disables the database provider.
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Table holding the distribution rows (database and REST).
    #[serde(default = "default_table")]
    pub table: String,

    /// Directory searched for local JSON fixtures.
    #[serde(default = "default_fixtures_dir")]
    pub fixtures_dir: PathBuf,

    /// Fixture file names, first existing one wins.
    #[serde(default = "default_fixture_files")]
    pub fixture_files: Vec<String>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            table: default_table(),
            fixtures_dir: default_fixtures_dir(),
            fixture_files: default_fixture_files(),
        }
    }
}

fn default_table() -> String {
    db::DEFAULT_TABLE.to_string()
}

fn default_fixtures_dir() -> PathBuf {
    PathBuf::from("fixtures")
}

fn default_fixture_files() -> Vec<String> {
    vec![
        "normalized_vacinas_rerun2.json".to_string(),
        "normalized_vacinas_rerun.json".to_string(),
        "distribuicao.json".to_string(),
    ]
}

/// Supabase / PostgREST gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestConfig {
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub service_key: Option<String>,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            url: None,
            service_key: None,
            timeout_secs: default_timeout(),
        }
    }
}

impl RestConfig {
    /// URL and key, only when both are set
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.url.as_deref(), self.service_key.as_deref()) {
            (Some(url), Some(key)) if !url.is_empty() && !key.is_empty() => Some((url, key)),
            _ => None,
        }
    }
}

fn default_timeout() -> u64 {
    30
}

/// Label mapping rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MappingsConfig {
    /// Rule file replacing the built-in rules.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Re-read `path` this often (seconds); 0 disables reloading.
    #[serde(default)]
    pub reload_interval_secs: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForecastMethod {
    #[default]
    Mean,
    Trend,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendBackend {
    /// Least squares over local history
    #[default]
    Linear,
    /// `obter_comparacao_dados` RPC through the REST gateway
    Rpc,
}

/// Forecast engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastConfig {
    #[serde(default)]
    pub method: ForecastMethod,

    #[serde(default)]
    pub trend_source: TrendBackend,

    #[serde(default = "default_recent_window")]
    pub recent_window: usize,

    #[serde(default = "default_divergence_factor")]
    pub divergence_factor: f64,

    #[serde(default = "default_target_year")]
    pub default_target_year: i32,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            method: ForecastMethod::default(),
            trend_source: TrendBackend::default(),
            recent_window: default_recent_window(),
            divergence_factor: default_divergence_factor(),
            default_target_year: default_target_year(),
        }
    }
}

fn default_recent_window() -> usize {
    5
}

fn default_divergence_factor() -> f64 {
    3.0
}

fn default_target_year() -> i32 {
    2025
}

/// Historical vs. projected comparison settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonConfig {
    /// The only accepted `ano` for comparisons.
    #[serde(default = "default_reference_year")]
    pub reference_year: i32,
}

impl Default for ComparisonConfig {
    fn default() -> Self {
        Self {
            reference_year: default_reference_year(),
        }
    }
}

fn default_reference_year() -> i32 {
    2024
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// The given file, else `vacina.toml` when present, else defaults; then
    /// environment overrides and validation.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::load(p)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => Self::load(Path::new(DEFAULT_CONFIG_FILE))?,
            None => Config::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup` (the process environment in production).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(url) = get("DATABASE_URL") {
            match sqlite_path(&url) {
                Some(path) => self.data.database_path = Some(path),
                None => warn!("DATABASE_URL is not a SQLite location, ignoring it"),
            }
        }
        if let Some(table) = get("DATA_TABLE") {
            self.data.table = table;
        }
        if let Some(url) = get("SUPABASE_URL") {
            self.rest.url = Some(url);
        }
        if let Some(key) = get("SUPABASE_SERVICE_ROLE_KEY") {
            self.rest.service_key = Some(key);
        }
        if let Some(origins) = get("CORS_ORIGINS") {
            self.server.cors_origins = origins
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }
        if let Some(bind) = get("VACINA_BIND") {
            self.server.bind = bind;
        }
    }

    pub fn validate(&self) -> Result<()> {
        db::validate_table_name(&self.data.table).context("Invalid data.table")?;
        if self.forecast.recent_window == 0 {
            bail!("forecast.recent_window must be at least 1");
        }
        if !(self.forecast.divergence_factor >= 1.0) {
            bail!("forecast.divergence_factor must be >= 1");
        }
        if self.comparison.reference_year <= 0 {
            bail!("comparison.reference_year must be positive");
        }
        Ok(())
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

/// `sqlite:///data/x.db`, `sqlite:x.db` or a bare path; other schemes are not SQLite
fn sqlite_path(url: &str) -> Option<PathBuf> {
    if let Some(rest) = url.strip_prefix("sqlite://") {
        return Some(PathBuf::from(rest));
    }
    if let Some(rest) = url.strip_prefix("sqlite:") {
        return Some(PathBuf::from(rest));
    }
    if url.contains("://") {
        return None;
    }
    Some(PathBuf::from(url))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.data.table, "distribuicao");
        assert_eq!(config.forecast.method, ForecastMethod::Mean);
        assert_eq!(config.forecast.recent_window, 5);
        assert_eq!(config.comparison.reference_year, 2024);
        assert!(config.rest.credentials().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[data]
table = "vacinas_2024"

[forecast]
method = "trend"
trend_source = "rpc"
divergence_factor = 4.0

[mappings]
path = "rules/mappings.json"
reload_interval_secs = 60
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.data.table, "vacinas_2024");
        assert_eq!(config.forecast.method, ForecastMethod::Trend);
        assert_eq!(config.forecast.trend_source, TrendBackend::Rpc);
        assert_eq!(config.forecast.divergence_factor, 4.0);
        assert_eq!(config.forecast.default_target_year, 2025);
        assert_eq!(config.mappings.reload_interval_secs, 60);
        assert_eq!(config.server.bind, "0.0.0.0:8000");
    }

    #[test]
    fn test_environment_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("DATABASE_URL", "sqlite:///var/lib/vacina.db"),
            ("DATA_TABLE", "dist"),
            ("SUPABASE_URL", "https://x.supabase.co"),
            ("SUPABASE_SERVICE_ROLE_KEY", "secret"),
            ("CORS_ORIGINS", "http://a.test, http://b.test,"),
            ("VACINA_BIND", "  "),
        ]);

        let mut config = Config::default();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.data.database_path, Some(PathBuf::from("/var/lib/vacina.db")));
        assert_eq!(config.data.table, "dist");
        assert_eq!(config.rest.credentials(), Some(("https://x.supabase.co", "secret")));
        assert_eq!(config.server.cors_origins, vec!["http://a.test", "http://b.test"]);
        // blank values do not override
        assert_eq!(config.server.bind, "0.0.0.0:8000");
    }

    #[test]
    fn test_non_sqlite_database_url_ignored() {
        let mut config = Config::default();
        config.apply_overrides(|k| (k == "DATABASE_URL").then(|| "postgres://u@h/db".to_string()));
        assert_eq!(config.data.database_path, None);
    }

    #[test]
    fn test_validation_rejects_bad_table() {
        let mut config = Config::default();
        config.data.table = "dist; DROP".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(toml_str.contains("[server]"));
        assert!(toml_str.contains("[forecast]"));
        assert!(toml_str.contains("[comparison]"));

        let back: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(back.data.table, "distribuicao");
    }
}
