// 📡 API schemas - one explicit request/response type per endpoint
//
// Field names are the wire names the dashboard already consumes.

use crate::comparison::{ComparisonPoint, ComparisonStatus};
use crate::error::{EngineError, Result};
use crate::forecast::{ForecastBasis, ForecastPoint, ProjectionUnit};
use serde::{Deserialize, Serialize};

// ============================================================================
// QUERY PARAMETERS
// ============================================================================

/// Filters shared by overview, timeseries, ranking and forecast.
/// Kept as strings so malformed values become a 400 naming the parameter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardParams {
    pub ano: Option<String>,
    pub mes: Option<String>,
    pub uf: Option<String>,
    pub fabricante: Option<String>,
}

impl DashboardParams {
    /// No filter given at all (blank values count as absent)
    pub fn is_empty(&self) -> bool {
        [&self.ano, &self.mes, &self.uf, &self.fabricante]
            .iter()
            .all(|p| present(p).is_none())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NormalizeParams {
    pub tx_insumo: Option<String>,
    pub tx_sigla: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrevisaoParams {
    pub insumo_nome: Option<String>,
    pub uf: Option<String>,
    pub mes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComparacaoParams {
    pub insumo_nome: Option<String>,
    pub ano: Option<String>,
    pub uf: Option<String>,
    pub mes: Option<String>,
}

/// Trimmed value, None when absent or blank
pub fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

pub fn parse_year(param: &'static str, value: &Option<String>) -> Result<Option<i32>> {
    let Some(raw) = present(value) else {
        return Ok(None);
    };
    match raw.parse::<i32>() {
        Ok(year) if year > 0 => Ok(Some(year)),
        _ => Err(EngineError::validation(
            param,
            format!("'{}' não é um ano válido", raw),
        )),
    }
}

pub fn parse_month(param: &'static str, value: &Option<String>) -> Result<Option<u32>> {
    let Some(raw) = present(value) else {
        return Ok(None);
    };
    match raw.parse::<u32>() {
        Ok(month) if (1..=12).contains(&month) => Ok(Some(month)),
        _ => Err(EngineError::validation(
            param,
            format!("'{}' inválido. Deve ser um número inteiro (1-12)", raw),
        )),
    }
}

// ============================================================================
// RESPONSES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingsResponse {
    pub vacinas: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizeResponse {
    pub tx_insumo: Option<String>,
    pub tx_insumo_norm: Option<String>,
    pub tx_sigla: Option<String>,
    pub tx_sigla_norm: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverviewResponse {
    pub total_doses: f64,
    pub periodo: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeseriesPoint {
    pub data: String,
    pub doses_distribuidas: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingEntry {
    pub uf: String,
    pub sigla: String,
    pub doses_distribuidas: f64,
}

/// Dashboard forecast point, rounded to whole doses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastResponsePoint {
    pub data: String,
    pub doses_previstas: Option<f64>,
    pub intervalo_inferior: Option<f64>,
    pub intervalo_superior: Option<f64>,
    pub base: ForecastBasis,
}

impl From<&ForecastPoint> for ForecastResponsePoint {
    fn from(point: &ForecastPoint) -> Self {
        let round = |v: Option<f64>| v.map(f64::round);
        ForecastResponsePoint {
            data: point.target_period.clone(),
            doses_previstas: round(point.projected_value),
            intervalo_inferior: round(point.confidence_lower),
            intervalo_superior: round(point.confidence_upper),
            base: point.basis,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricoPoint {
    pub ano: i32,
    pub quantidade: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrevisaoResponse {
    pub insumo: String,
    pub historico: Vec<HistoricoPoint>,
    pub previsao: ForecastPoint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparacaoResponse {
    pub insumo: String,
    pub projecao_unidade: ProjectionUnit,
    pub status: ComparisonStatus,
    pub dados_comparacao: Vec<ComparisonPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceResponse {
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub rules_version: u64,
}

/// Body of every non-2xx response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub erro: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parametro: Option<String>,
}

impl From<&EngineError> for ErrorBody {
    fn from(err: &EngineError) -> Self {
        let erro = match err {
            EngineError::Validation { message, .. } => message.clone(),
            EngineError::InsufficientData(_) => {
                "Nenhum dado encontrado para os filtros fornecidos.".to_string()
            }
            other => other.to_string(),
        };
        ErrorBody {
            erro,
            parametro: err.param().map(str::to_string),
        }
    }
}
