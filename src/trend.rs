//! Trend sources: richer projections offered to the forecast engine.
//!
//! The engine never trusts these blindly; see `ForecastEngine::assess_trend`.

use crate::error::ProviderError;
use crate::forecast::{TrendProjection, TrendRow, TrendRowKind};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, info};

/// Inputs a trend source may use. Local sources read `history`, remote ones
/// recompute from the filters.
#[derive(Debug, Clone, Default)]
pub struct TrendRequest {
    pub label: Option<String>,
    pub region: Option<String>,
    pub month: Option<u32>,
    pub target_year: i32,
    pub history: Vec<(i32, f64)>,
}

#[async_trait]
pub trait TrendSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn project(&self, request: &TrendRequest) -> Result<TrendProjection, ProviderError>;
}

// ============================================================================
// LOCAL LEAST SQUARES
// ============================================================================

/// Ordinary least squares over (year, value), with a ±1 residual std band
#[derive(Debug, Clone, Default)]
pub struct LinearTrend;

impl LinearTrend {
    pub fn fit(history: &[(i32, f64)], target_year: i32) -> TrendProjection {
        let mut rows: Vec<TrendRow> = history
            .iter()
            .map(|(year, value)| TrendRow {
                year: *year,
                quantity: Some(*value),
                kind: TrendRowKind::Historical,
                lower: None,
                upper: None,
            })
            .collect();

        let n = history.len() as f64;
        if history.len() < 2 {
            // Nothing to fit; report only the projected point
            if let Some((_, value)) = history.first() {
                return TrendProjection {
                    rows: vec![TrendRow {
                        year: target_year,
                        quantity: Some(*value),
                        kind: TrendRowKind::Projected,
                        lower: None,
                        upper: None,
                    }],
                };
            }
            return TrendProjection::default();
        }

        let mean_x = history.iter().map(|(y, _)| *y as f64).sum::<f64>() / n;
        let mean_y = history.iter().map(|(_, v)| *v).sum::<f64>() / n;
        let sxx: f64 = history.iter().map(|(y, _)| (*y as f64 - mean_x).powi(2)).sum();
        let sxy: f64 = history
            .iter()
            .map(|(y, v)| (*y as f64 - mean_x) * (v - mean_y))
            .sum();

        let slope = if sxx == 0.0 { 0.0 } else { sxy / sxx };
        let intercept = mean_y - slope * mean_x;
        let predict = |x: f64| intercept + slope * x;

        let residual_var = history
            .iter()
            .map(|(y, v)| (v - predict(*y as f64)).powi(2))
            .sum::<f64>()
            / n;
        let band = residual_var.sqrt();
        let projected = predict(target_year as f64);

        rows.push(TrendRow {
            year: target_year,
            quantity: Some(projected),
            kind: TrendRowKind::Projected,
            lower: Some(projected - band),
            upper: Some(projected + band),
        });

        TrendProjection { rows }
    }
}

#[async_trait]
impl TrendSource for LinearTrend {
    fn name(&self) -> &'static str {
        "linear"
    }

    async fn project(&self, request: &TrendRequest) -> Result<TrendProjection, ProviderError> {
        Ok(LinearTrend::fit(&request.history, request.target_year))
    }
}

// ============================================================================
// REMOTE RPC (PostgREST)
// ============================================================================

const RPC_NAME: &str = "obter_comparacao_dados";

/// Projection computed by the database behind a PostgREST gateway
pub struct RestTrendSource {
    base_url: String,
    service_key: String,
    client: reqwest::Client,
}

impl RestTrendSource {
    pub fn new(base_url: &str, service_key: &str, timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Request {
                provider: "rpc-trend",
                message: e.to_string(),
            })?;

        Ok(RestTrendSource {
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key: service_key.to_string(),
            client,
        })
    }

    fn payload(request: &TrendRequest, prefix: &str) -> Value {
        let mut body = Map::new();
        body.insert(format!("{}insumo_nome", prefix), json!(request.label));
        if let Some(uf) = &request.region {
            body.insert(format!("{}uf", prefix), json!(uf));
        }
        if let Some(mes) = request.month {
            body.insert(format!("{}mes", prefix), json!(mes));
        }
        Value::Object(body)
    }

    async fn call(&self, body: &Value) -> Result<Value, ProviderError> {
        let url = format!("{}/rest/v1/rpc/{}", self.base_url, RPC_NAME);
        let response = self
            .client
            .post(&url)
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Request {
                provider: "rpc-trend",
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::BadResponse {
                provider: "rpc-trend",
                message: format!("HTTP {}", status),
            });
        }

        response.json::<Value>().await.map_err(|e| ProviderError::BadResponse {
            provider: "rpc-trend",
            message: e.to_string(),
        })
    }
}

fn pick_number(obj: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| match obj.get(*k)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Parse RPC rows `{ano, quantidade, tipo_dado}`. Only a plain array or an
/// object wrapping one under `data` is accepted.
pub fn parse_rpc_rows(payload: &Value) -> Result<TrendProjection, ProviderError> {
    let items = match payload {
        Value::Array(items) => items,
        Value::Object(obj) => match obj.get("data") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(ProviderError::BadResponse {
                    provider: "rpc-trend",
                    message: "expected an array of rows".to_string(),
                })
            }
        },
        _ => {
            return Err(ProviderError::BadResponse {
                provider: "rpc-trend",
                message: "expected an array of rows".to_string(),
            })
        }
    };

    let mut rows = Vec::with_capacity(items.len());
    for item in items {
        let Value::Object(obj) = item else {
            return Err(ProviderError::BadResponse {
                provider: "rpc-trend",
                message: format!("row is not an object: {}", item),
            });
        };

        let year = pick_number(obj, &["ano", "year"]).ok_or_else(|| ProviderError::BadResponse {
            provider: "rpc-trend",
            message: format!("row without year: {}", item),
        })? as i32;

        let kind = match obj
            .get("tipo_dado")
            .or_else(|| obj.get("tipo"))
            .and_then(Value::as_str)
            .map(str::to_lowercase)
            .as_deref()
        {
            Some("previsao" | "previsão" | "projecao" | "projeção") => TrendRowKind::Projected,
            _ => TrendRowKind::Historical,
        };

        rows.push(TrendRow {
            year,
            quantity: pick_number(obj, &["quantidade", "quantity", "valor"]),
            kind,
            lower: pick_number(obj, &["intervalo_inferior", "lower"]),
            upper: pick_number(obj, &["intervalo_superior", "upper"]),
        });
    }

    Ok(TrendProjection { rows })
}

#[async_trait]
impl TrendSource for RestTrendSource {
    fn name(&self) -> &'static str {
        "rpc-trend"
    }

    async fn project(&self, request: &TrendRequest) -> Result<TrendProjection, ProviderError> {
        // Deployed RPC versions disagree on parameter names
        let plain = Self::payload(request, "");
        let payload = match self.call(&plain).await {
            Ok(payload) => payload,
            Err(first) => {
                debug!("Plain RPC parameters rejected ({}), retrying with underscored names", first);
                self.call(&Self::payload(request, "_")).await?
            }
        };

        let projection = parse_rpc_rows(&payload)?;
        info!(rows = projection.rows.len(), "Received trend projection from RPC");
        Ok(projection)
    }
}
