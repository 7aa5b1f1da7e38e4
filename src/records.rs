// 💉 Distribution records - raw rows from providers and their normalized form
//
// Providers hand back loosely typed rows (upper- or lower-case column names,
// numbers as strings, nulls). They are validated into RawRecord in exactly one
// place: SourceRow::into_raw. Anything that fails validation is dropped there.

use crate::rules::Normalizer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

// ============================================================================
// RAW RECORD
// ============================================================================

/// One distribution line as read from a provider. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub year: i32,
    pub month: u32,
    pub region_code: String,
    pub raw_label: String,
    pub quantity: f64,
}

impl RawRecord {
    pub fn new(
        year: i32,
        month: u32,
        region_code: impl Into<String>,
        raw_label: impl Into<String>,
        quantity: f64,
    ) -> Self {
        RawRecord {
            year,
            month,
            region_code: region_code.into(),
            raw_label: raw_label.into(),
            quantity,
        }
    }
}

// ============================================================================
// NORMALIZED RECORD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedRecord {
    #[serde(flatten)]
    pub raw: RawRecord,
    pub canonical_label: String,
    pub canonical_region: String,
}

impl NormalizedRecord {
    pub fn year(&self) -> i32 {
        self.raw.year
    }

    pub fn month(&self) -> u32 {
        self.raw.month
    }

    pub fn quantity(&self) -> f64 {
        self.raw.quantity
    }
}

/// Normalize a batch of records against one rule snapshot
pub fn normalize_records(records: Vec<RawRecord>, normalizer: &Normalizer) -> Vec<NormalizedRecord> {
    records
        .into_iter()
        .map(|raw| {
            let canonical_label = normalizer.normalize_label(&raw.raw_label);
            let canonical_region = normalizer.normalize_region(&raw.region_code);
            NormalizedRecord {
                raw,
                canonical_label,
                canonical_region,
            }
        })
        .collect()
}

// ============================================================================
// SOURCE ROW (provider boundary)
// ============================================================================

/// Row shape shared by the database, the REST gateway and fixture files.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceRow {
    #[serde(rename = "TX_SIGLA", alias = "tx_sigla", default)]
    pub tx_sigla: Option<String>,

    #[serde(rename = "TX_INSUMO", alias = "tx_insumo", default)]
    pub tx_insumo: Option<String>,

    #[serde(rename = "ANO", alias = "ano", default)]
    pub ano: Option<Value>,

    #[serde(rename = "MES", alias = "mes", default)]
    pub mes: Option<Value>,

    #[serde(rename = "QTDE", alias = "qtde", default)]
    pub qtde: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RowRejection {
    MissingYear,
    InvalidMonth(String),
    InvalidQuantity(String),
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', ".").parse::<f64>().ok(),
        _ => None,
    }
}

impl SourceRow {
    /// Validate into a RawRecord. Null quantity counts as zero.
    pub fn into_raw(self) -> Result<RawRecord, RowRejection> {
        let year = self
            .ano
            .as_ref()
            .and_then(value_as_f64)
            .filter(|y| y.fract() == 0.0 && *y > 0.0)
            .ok_or(RowRejection::MissingYear)? as i32;

        let month = match self.mes.as_ref().and_then(value_as_f64) {
            Some(m) if m.fract() == 0.0 && (1.0..=12.0).contains(&m) => m as u32,
            other => return Err(RowRejection::InvalidMonth(format!("{:?}", other))),
        };

        let quantity = match self.qtde.as_ref() {
            None | Some(Value::Null) => 0.0,
            Some(v) => match value_as_f64(v) {
                Some(q) if q.is_finite() && q >= 0.0 => q,
                _ => return Err(RowRejection::InvalidQuantity(v.to_string())),
            },
        };

        Ok(RawRecord {
            year,
            month,
            region_code: self.tx_sigla.unwrap_or_default(),
            raw_label: self.tx_insumo.unwrap_or_default(),
            quantity,
        })
    }
}

/// Convert provider rows, skipping (and counting) the invalid ones
pub fn rows_to_records(rows: Vec<SourceRow>, provider: &str) -> Vec<RawRecord> {
    let total = rows.len();
    let mut records = Vec::with_capacity(total);
    let mut first_rejection = None;

    for row in rows {
        match row.into_raw() {
            Ok(record) => records.push(record),
            Err(reason) => {
                first_rejection.get_or_insert(reason);
            }
        }
    }

    if let Some(reason) = first_rejection {
        warn!(
            provider,
            rejected = total - records.len(),
            total,
            "Skipped invalid rows (first: {:?})",
            reason
        );
    }

    records
}
