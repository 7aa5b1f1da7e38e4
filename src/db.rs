// 🗄️ SQLite store - raw distribution lines imported from CSV exports
//
// Rows are stored exactly as published (raw labels, raw siglas). Normalization
// happens at query time against the current rule snapshot, so a rules reload
// never requires a re-import.

use crate::providers::RecordQuery;
use crate::records::{RawRecord, SourceRow};
use anyhow::{bail, Context, Result};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{info, warn};

pub const DEFAULT_TABLE: &str = "distribuicao";

/// Table names end up in SQL text, so only plain identifiers are accepted
pub fn validate_table_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .map_or(false, |c| c.is_ascii_alphabetic() || c == '_');
    if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') || name.len() > 63 {
        bail!("invalid table name {:?}", name);
    }
    Ok(())
}

// ============================================================================
// IMPORTED RECORD
// ============================================================================

/// CSV line as published: TX_SIGLA;TX_INSUMO;ANO;MES;QTDE
#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(rename = "TX_SIGLA", alias = "tx_sigla", default)]
    tx_sigla: Option<String>,
    #[serde(rename = "TX_INSUMO", alias = "tx_insumo", default)]
    tx_insumo: Option<String>,
    #[serde(rename = "ANO", alias = "ano", default)]
    ano: Option<String>,
    #[serde(rename = "MES", alias = "mes", default)]
    mes: Option<String>,
    #[serde(rename = "QTDE", alias = "qtde", default)]
    qtde: Option<String>,
}

impl CsvRow {
    fn into_source_row(self) -> SourceRow {
        let text = |v: Option<String>| v.filter(|s| !s.trim().is_empty()).map(Value::String);
        SourceRow {
            tx_sigla: self.tx_sigla,
            tx_insumo: self.tx_insumo,
            ano: text(self.ano),
            mes: text(self.mes),
            qtde: text(self.qtde),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportedRecord {
    pub record: RawRecord,
    pub source_file: String,
    pub line_number: u64,
}

impl ImportedRecord {
    /// Same file + line + content always hashes the same, so re-importing a
    /// file is a no-op
    pub fn compute_idempotency_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!(
            "{}|{}|{}|{}|{}|{}|{}",
            self.source_file,
            self.line_number,
            self.record.region_code,
            self.record.raw_label,
            self.record.year,
            self.record.month,
            self.record.quantity
        ));
        format!("{:x}", hasher.finalize())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportStats {
    pub inserted: usize,
    pub duplicates: usize,
    pub rejected: usize,
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection, table: &str) -> Result<()> {
    validate_table_name(table)?;

    // WAL for crash recovery; in-memory databases silently stay in "memory"
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                idempotency_hash TEXT UNIQUE NOT NULL,
                tx_sigla TEXT NOT NULL,
                tx_insumo TEXT NOT NULL,
                ano INTEGER NOT NULL,
                mes INTEGER NOT NULL,
                qtde REAL NOT NULL,
                source_file TEXT NOT NULL,
                line_number INTEGER NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )"
        ),
        [],
    )?;

    conn.execute(
        &format!("CREATE INDEX IF NOT EXISTS idx_{table}_periodo ON {table}(ano, mes)"),
        [],
    )?;

    conn.execute(
        &format!("CREATE INDEX IF NOT EXISTS idx_{table}_sigla ON {table}(tx_sigla)"),
        [],
    )?;

    Ok(())
}

// ============================================================================
// IMPORT
// ============================================================================

/// Read a CSV export. Both `,` and `;` separated files are accepted; invalid
/// lines are skipped and counted.
pub fn load_csv(csv_path: &Path) -> Result<(Vec<ImportedRecord>, usize)> {
    let content = std::fs::read_to_string(csv_path)
        .with_context(|| format!("Failed to read CSV file {}", csv_path.display()))?;
    let first_line = content.lines().next().unwrap_or_default();
    let delimiter = if first_line.matches(';').count() > first_line.matches(',').count() {
        b';'
    } else {
        b','
    };

    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let source_file = csv_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| csv_path.display().to_string());

    let mut records = Vec::new();
    let mut rejected = 0;

    for (index, result) in rdr.deserialize::<CsvRow>().enumerate() {
        // header is line 1
        let line_number = index as u64 + 2;
        let row = result.with_context(|| format!("Failed to parse {} line {}", source_file, line_number))?;

        match row.into_source_row().into_raw() {
            Ok(record) => records.push(ImportedRecord {
                record,
                source_file: source_file.clone(),
                line_number,
            }),
            Err(reason) => {
                rejected += 1;
                warn!(file = %source_file, line = line_number, "Skipping invalid line: {:?}", reason);
            }
        }
    }

    Ok((records, rejected))
}

pub fn insert_records(conn: &Connection, table: &str, records: &[ImportedRecord]) -> Result<ImportStats> {
    validate_table_name(table)?;
    let mut stats = ImportStats::default();

    let sql = format!(
        "INSERT INTO {table} (
            idempotency_hash, tx_sigla, tx_insumo, ano, mes, qtde, source_file, line_number
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
    );

    for imported in records {
        let hash = imported.compute_idempotency_hash();
        let r = &imported.record;

        let result = conn.execute(
            &sql,
            params![
                hash,
                r.region_code,
                r.raw_label,
                r.year,
                r.month,
                r.quantity,
                imported.source_file,
                imported.line_number as i64,
            ],
        );

        match result {
            Ok(_) => stats.inserted += 1,
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                stats.duplicates += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    info!(
        table,
        inserted = stats.inserted,
        duplicates = stats.duplicates,
        "Imported distribution records"
    );

    Ok(stats)
}

pub fn verify_count(conn: &Connection, table: &str) -> Result<i64> {
    validate_table_name(table)?;
    let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
    Ok(count)
}

// ============================================================================
// QUERY
// ============================================================================

/// Rows matching the coarse pushdown filters (ano, mes, uf substring).
///
/// The caller must have validated `table`.
pub fn query_rows(conn: &Connection, table: &str, query: &RecordQuery) -> rusqlite::Result<Vec<SourceRow>> {
    let mut sql = format!("SELECT tx_sigla, tx_insumo, ano, mes, qtde FROM {table} WHERE 1 = 1");
    let mut args: Vec<SqlValue> = Vec::new();

    if let Some(year) = query.year {
        sql.push_str(" AND ano = ?");
        args.push(SqlValue::Integer(year as i64));
    }
    if let Some(month) = query.month {
        sql.push_str(" AND mes = ?");
        args.push(SqlValue::Integer(month as i64));
    }
    if let Some(uf) = &query.region {
        sql.push_str(" AND UPPER(tx_sigla) LIKE ?");
        args.push(SqlValue::Text(format!("%{}%", uf.to_uppercase())));
    }
    sql.push_str(" ORDER BY ano, mes, id");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(args), |row| {
            Ok(SourceRow {
                tx_sigla: row.get(0)?,
                tx_insumo: row.get(1)?,
                ano: Some(json!(row.get::<_, i64>(2)?)),
                mes: Some(json!(row.get::<_, i64>(3)?)),
                qtde: Some(json!(row.get::<_, f64>(4)?)),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(rows)
}
