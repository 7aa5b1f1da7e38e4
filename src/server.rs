// 🌐 HTTP surface - axum router over the Service
//
// Handlers only extract parameters and map errors to status codes; all
// behavior lives in Service.

use crate::api::{
    ComparacaoParams, DashboardParams, ErrorBody, NormalizeParams, PrevisaoParams,
};
use crate::error::EngineError;
use crate::service::Service;
use axum::{
    extract::{Query, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    service: Arc<Service>,
}

/// EngineError rendered as `{erro, parametro?}` with the matching status
pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        ApiError(err)
    }
}

pub fn status_for(err: &EngineError) -> StatusCode {
    match err {
        EngineError::Validation { .. } => StatusCode::BAD_REQUEST,
        EngineError::InsufficientData(_) => StatusCode::NOT_FOUND,
        EngineError::UpstreamUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }
        (status, Json(ErrorBody::from(&self.0))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// ============================================================================
// API Handlers
// ============================================================================

/// GET /health
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.health())
}

/// GET /source - first configured provider
async fn source(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.source())
}

/// GET /mappings - canonical vaccine names
async fn mappings(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.mappings())
}

/// GET /normalize?tx_insumo&tx_sigla
async fn normalize(State(state): State<AppState>, Query(params): Query<NormalizeParams>) -> impl IntoResponse {
    Json(state.service.normalize(&params))
}

async fn overview(
    State(state): State<AppState>,
    Query(params): Query<DashboardParams>,
) -> ApiResult<crate::api::OverviewResponse> {
    Ok(Json(state.service.overview(&params).await?))
}

async fn timeseries(
    State(state): State<AppState>,
    Query(params): Query<DashboardParams>,
) -> ApiResult<Vec<crate::api::TimeseriesPoint>> {
    Ok(Json(state.service.timeseries(&params).await?))
}

async fn ranking_ufs(
    State(state): State<AppState>,
    Query(params): Query<DashboardParams>,
) -> ApiResult<Vec<crate::api::RankingEntry>> {
    Ok(Json(state.service.ranking(&params).await?))
}

async fn forecast(
    State(state): State<AppState>,
    Query(params): Query<DashboardParams>,
) -> ApiResult<Vec<crate::api::ForecastResponsePoint>> {
    Ok(Json(state.service.forecast(&params).await?))
}

/// GET /api/previsao?insumo_nome&uf&mes
async fn previsao(
    State(state): State<AppState>,
    Query(params): Query<PrevisaoParams>,
) -> ApiResult<crate::api::PrevisaoResponse> {
    Ok(Json(state.service.previsao(&params).await?))
}

/// GET /api/previsao/comparacao?insumo_nome&ano&uf&mes
async fn comparacao(
    State(state): State<AppState>,
    Query(params): Query<ComparacaoParams>,
) -> ApiResult<crate::api::ComparacaoResponse> {
    Ok(Json(state.service.comparacao(&params).await?))
}

// ============================================================================
// Router
// ============================================================================

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods(Any)
        .allow_headers(Any)
}

pub fn router(service: Arc<Service>, cors_origins: &[String]) -> Router {
    let state = AppState { service };

    let api_routes = Router::new()
        .route("/mappings", get(mappings))
        .route("/previsao", get(previsao))
        .route("/previsao/comparacao", get(comparacao))
        .with_state(state.clone());

    Router::new()
        .route("/health", get(health))
        .route("/source", get(source))
        .route("/mappings", get(mappings))
        .route("/normalize", get(normalize))
        .route("/overview", get(overview))
        .route("/timeseries", get(timeseries))
        .route("/ranking/ufs", get(ranking_ufs))
        .route("/forecast", get(forecast))
        .with_state(state)
        .nest("/api", api_routes)
        .layer(cors_layer(cors_origins))
}

/// Re-read the mapping file every `every`; failures keep the current rules
pub fn spawn_rules_reload(service: Arc<Service>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // first tick fires immediately; the rules were just loaded
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = service.reload_rules() {
                warn!("Mapping reload failed, keeping current rules: {:#}", e);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::ForecastEngine;
    use crate::providers::tests::StaticProvider;
    use crate::providers::ProviderChain;
    use crate::rules::Normalizer;
    use crate::service::tests::sample_service;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn app() -> Router {
        router(Arc::new(sample_service()), &["*".to_string()])
    }

    #[tokio::test]
    async fn test_health_and_source() {
        let (status, body) = get_json(app(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "ok", "rules_version": 1}));

        let (_, body) = get_json(app(), "/source").await;
        assert_eq!(body, json!({"source": "local"}));
    }

    #[tokio::test]
    async fn test_mappings_on_both_paths() {
        let (status, plain) = get_json(app(), "/mappings").await;
        let (_, prefixed) = get_json(app(), "/api/mappings").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(plain, prefixed);
        assert!(plain["vacinas"].as_array().unwrap().contains(&json!("BCG")));
    }

    #[tokio::test]
    async fn test_normalize_nulls_for_absent_params() {
        let (_, body) = get_json(app(), "/normalize?tx_sigla=SES-PR").await;
        assert_eq!(
            body,
            json!({"tx_insumo": null, "tx_insumo_norm": null, "tx_sigla": "SES-PR", "tx_sigla_norm": "PR"})
        );
    }

    #[tokio::test]
    async fn test_dashboard_routes() {
        let (_, overview) = get_json(app(), "/overview?ano=2024&fabricante=BCG").await;
        assert_eq!(overview, json!({"total_doses": 250.0, "periodo": "2024"}));

        let (_, series) = get_json(app(), "/timeseries?uf=PR").await;
        assert_eq!(series[0], json!({"data": "2020-01", "doses_distribuidas": 10.0}));

        let (_, ranking) = get_json(app(), "/ranking/ufs?ano=2024").await;
        assert_eq!(ranking[0], json!({"uf": "SP", "sigla": "SP", "doses_distribuidas": 225.0}));

        let (_, empty) = get_json(app(), "/forecast").await;
        assert_eq!(empty, json!([]));

        let (_, forecast) = get_json(app(), "/forecast?fabricante=BCG&mes=1").await;
        assert_eq!(forecast[0]["data"], json!("2025-01"));
        assert_eq!(forecast[0]["doses_previstas"], json!(20.0));
        assert_eq!(forecast[0]["base"], json!("monthly_mean"));
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let (status, body) = get_json(app(), "/overview?mes=13").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["parametro"], json!("mes"));

        let (status, body) = get_json(app(), "/api/previsao").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["parametro"], json!("insumo_nome"));

        let (status, body) = get_json(app(), "/api/previsao?insumo_nome=Raiva").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["erro"].is_string());

        let (status, body) = get_json(app(), "/api/previsao/comparacao?insumo_nome=BCG&ano=2023").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["parametro"], json!("ano"));

        let down = Service::new(Normalizer::builtin(), ProviderChain::new(), ForecastEngine::new());
        let (status, _) = get_json(router(Arc::new(down), &[]), "/timeseries").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_previsao_and_comparacao() {
        let (status, body) = get_json(app(), "/api/previsao?insumo_nome=bcg").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["insumo"], json!("BCG"));
        assert_eq!(body["historico"][4], json!({"ano": 2024, "quantidade": 250.0}));
        assert_eq!(body["previsao"]["projected_value"], json!(200.0));

        let (status, body) =
            get_json(app(), "/api/previsao/comparacao?insumo_nome=BCG&ano=2024&mes=1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["projecao_unidade"], json!("mensal"));
        assert_eq!(body["status"], json!("comparable"));
        assert_eq!(
            body["dados_comparacao"],
            json!([
                {"ano": 2024, "quantidade": 250.0, "tipo": "historico", "unidade": "anual", "anualizado": false},
                {"ano": 2025, "quantidade": 240.0, "tipo": "projecao", "unidade": "mensal", "anualizado": true}
            ])
        );

        let (status, body) =
            get_json(app(), "/api/previsao/comparacao?insumo_nome=Raiva&ano=2024").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], json!("dados_insuficientes"));
    }

    #[tokio::test]
    async fn test_restricted_cors_origins_still_route() {
        let chain = ProviderChain::new().with(Arc::new(StaticProvider::new(vec![])));
        let service = Service::new(Normalizer::builtin(), chain, ForecastEngine::new());
        let app = router(
            Arc::new(service),
            &["http://localhost:5173".to_string(), "not a header\n".to_string()],
        );
        let (status, body) = get_json(app, "/overview").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"total_doses": 0.0, "periodo": null}));
    }
}
