// 🔌 Record providers - where distribution rows come from
//
// Tried in order: SQLite database, Supabase REST gateway, local JSON files.
// The first provider with rows ends the search; an empty answer falls through
// to the next one. Individual failures are logged and absorbed; only a chain
// where everything failed is an error for the caller.

use crate::db;
use crate::error::{EngineError, ProviderError};
use crate::records::{rows_to_records, RawRecord, SourceRow};
use async_trait::async_trait;
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Coarse pushdown filters. The label filter is never pushed down; raw
/// spellings vary too much.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordQuery {
    pub year: Option<i32>,
    pub month: Option<u32>,
    /// Two-letter UF, matched as a substring of the raw sigla ("SES-PR")
    pub region: Option<String>,
}

impl RecordQuery {
    fn accepts(&self, record: &RawRecord) -> bool {
        self.year.map_or(true, |y| record.year == y) && self.month.map_or(true, |m| record.month == m)
    }
}

#[async_trait]
pub trait RecordProvider: Send + Sync {
    /// Source name reported by `/source`: "db", "supabase-rest" or "local"
    fn name(&self) -> &'static str;

    async fn fetch(&self, query: &RecordQuery) -> Result<Vec<RawRecord>, ProviderError>;
}

// ============================================================================
// SQLITE
// ============================================================================

pub struct SqliteProvider {
    db: Arc<Mutex<Connection>>,
    table: String,
}

impl SqliteProvider {
    /// Open an existing database read-only
    pub fn open(path: &Path, table: &str) -> Result<Self, ProviderError> {
        db::validate_table_name(table).map_err(|e| ProviderError::BadResponse {
            provider: "db",
            message: e.to_string(),
        })?;
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|source| ProviderError::Database { provider: "db", source })?;

        Ok(Self::from_connection(conn, table))
    }

    /// Wrap an already prepared connection; the table name must be valid
    pub fn from_connection(conn: Connection, table: &str) -> Self {
        SqliteProvider {
            db: Arc::new(Mutex::new(conn)),
            table: table.to_string(),
        }
    }
}

#[async_trait]
impl RecordProvider for SqliteProvider {
    fn name(&self) -> &'static str {
        "db"
    }

    async fn fetch(&self, query: &RecordQuery) -> Result<Vec<RawRecord>, ProviderError> {
        let db = Arc::clone(&self.db);
        let table = self.table.clone();
        let query = query.clone();

        let rows = tokio::task::spawn_blocking(move || {
            let conn = db.lock().map_err(|_| ProviderError::BadResponse {
                provider: "db",
                message: "connection lock poisoned".to_string(),
            })?;
            db::query_rows(&conn, &table, &query)
                .map_err(|source| ProviderError::Database { provider: "db", source })
        })
        .await
        .map_err(|e| ProviderError::BadResponse {
            provider: "db",
            message: e.to_string(),
        })??;

        Ok(rows_to_records(rows, "db"))
    }
}

// ============================================================================
// SUPABASE REST (PostgREST)
// ============================================================================

pub struct RestProvider {
    base_url: String,
    service_key: String,
    table: String,
    client: reqwest::Client,
}

impl RestProvider {
    pub fn new(base_url: &str, service_key: &str, table: &str, timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Request {
                provider: "supabase-rest",
                message: e.to_string(),
            })?;

        Ok(RestProvider {
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key: service_key.to_string(),
            table: table.to_string(),
            client,
        })
    }

    /// PostgREST query string for the pushdown filters
    pub fn query_params(query: &RecordQuery) -> Vec<(&'static str, String)> {
        let mut params = vec![("select", "TX_SIGLA,TX_INSUMO,ANO,MES,QTDE".to_string())];
        if let Some(year) = query.year {
            params.push(("ANO", format!("eq.{}", year)));
        }
        if let Some(month) = query.month {
            params.push(("MES", format!("eq.{}", month)));
        }
        if let Some(uf) = &query.region {
            params.push(("TX_SIGLA", format!("ilike.*{}*", uf)));
        }
        params
    }
}

#[async_trait]
impl RecordProvider for RestProvider {
    fn name(&self) -> &'static str {
        "supabase-rest"
    }

    async fn fetch(&self, query: &RecordQuery) -> Result<Vec<RawRecord>, ProviderError> {
        let url = format!("{}/rest/v1/{}", self.base_url, self.table);
        let response = self
            .client
            .get(&url)
            .query(&Self::query_params(query))
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| ProviderError::Request {
                provider: "supabase-rest",
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::BadResponse {
                provider: "supabase-rest",
                message: format!("HTTP {}", status),
            });
        }

        let rows: Vec<SourceRow> = response.json().await.map_err(|e| ProviderError::BadResponse {
            provider: "supabase-rest",
            message: e.to_string(),
        })?;

        Ok(rows_to_records(rows, "supabase-rest"))
    }
}

// ============================================================================
// LOCAL JSON FIXTURES
// ============================================================================

/// First existing file among the candidates, read on every fetch
pub struct FixtureProvider {
    candidates: Vec<PathBuf>,
}

impl FixtureProvider {
    pub fn new(candidates: Vec<PathBuf>) -> Self {
        FixtureProvider { candidates }
    }

    pub fn in_dir(dir: &Path, file_names: &[String]) -> Self {
        Self::new(file_names.iter().map(|name| dir.join(name)).collect())
    }

    fn first_existing(&self) -> Option<&PathBuf> {
        self.candidates.iter().find(|p| p.is_file())
    }
}

#[async_trait]
impl RecordProvider for FixtureProvider {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn fetch(&self, query: &RecordQuery) -> Result<Vec<RawRecord>, ProviderError> {
        let path = self.first_existing().ok_or(ProviderError::NotConfigured { provider: "local" })?;
        debug!(path = %path.display(), "Reading local fixture");

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ProviderError::Io { provider: "local", source })?;
        let rows: Vec<SourceRow> = serde_json::from_str(&content).map_err(|e| ProviderError::BadResponse {
            provider: "local",
            message: format!("{}: {}", path.display(), e),
        })?;

        let mut records = rows_to_records(rows, "local");
        records.retain(|r| query.accepts(r));
        Ok(records)
    }
}

// ============================================================================
// CHAIN
// ============================================================================

#[derive(Default)]
pub struct ProviderChain {
    providers: Vec<Arc<dyn RecordProvider>>,
}

impl ProviderChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provider: Arc<dyn RecordProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Name of the first provider in the chain ("local" when none)
    pub fn source(&self) -> &'static str {
        self.providers.first().map_or("local", |p| p.name())
    }

    /// Rows from the first provider that has any. Empty when every provider
    /// that answered had none; an error only when none answered.
    pub async fn fetch(&self, query: &RecordQuery) -> crate::error::Result<(Vec<RawRecord>, &'static str)> {
        let mut attempts = Vec::new();
        let mut answered_empty = None;

        for provider in &self.providers {
            match provider.fetch(query).await {
                Ok(records) if records.is_empty() => {
                    debug!(provider = provider.name(), "No rows, trying next provider");
                    answered_empty.get_or_insert(provider.name());
                }
                Ok(records) => {
                    info!(provider = provider.name(), rows = records.len(), "Fetched distribution records");
                    return Ok((records, provider.name()));
                }
                Err(e) => {
                    warn!("Provider failed, trying next: {}", e);
                    attempts.push(e.to_string());
                }
            }
        }

        match answered_empty {
            Some(name) => Ok((Vec::new(), name)),
            None => Err(EngineError::UpstreamUnavailable { attempts }),
        }
    }
}
