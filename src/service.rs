// 🧭 Service - one method per endpoint
//
// Every request takes one rule snapshot and uses it for both the incoming
// filter values and the fetched records, so a concurrent reload can never
// mix two rule versions in one answer.

use crate::aggregation::{self, GroupBy, RecordFilter};
use crate::api::{
    parse_month, parse_year, present, ComparacaoParams, ComparacaoResponse, DashboardParams,
    ForecastResponsePoint, HealthResponse, HistoricoPoint, MappingsResponse, NormalizeParams,
    NormalizeResponse, OverviewResponse, PrevisaoParams, PrevisaoResponse, RankingEntry,
    SourceResponse, TimeseriesPoint,
};
use crate::comparison::{projection_unit_for, ComparisonReconciler};
use crate::config::{Config, ForecastMethod, TrendBackend};
use crate::error::{EngineError, Result};
use crate::forecast::{ForecastEngine, ForecastPoint, TrendProjection};
use crate::providers::{FixtureProvider, ProviderChain, RecordQuery, RestProvider, SqliteProvider};
use crate::records::{normalize_records, NormalizedRecord};
use crate::rules::{Normalizer, RuleSet, UF_CODES};
use crate::snapshot::SnapshotStore;
use crate::trend::{LinearTrend, RestTrendSource, TrendRequest, TrendSource};
use anyhow::Context;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Label reported by the comparison when no vaccine was chosen
const ALL_LABELS: &str = "Total";

/// Resolved filters: what is pushed down and what is checked after normalization
#[derive(Debug, Clone, Default)]
struct Scope {
    query: RecordQuery,
    filter: RecordFilter,
}

pub struct Service {
    rules: SnapshotStore<Normalizer>,
    providers: ProviderChain,
    engine: ForecastEngine,
    reconciler: ComparisonReconciler,
    trend: Option<Arc<dyn TrendSource>>,
    reference_year: i32,
    mappings_path: Option<PathBuf>,
}

impl Service {
    pub fn new(normalizer: Normalizer, providers: ProviderChain, engine: ForecastEngine) -> Self {
        Service {
            rules: SnapshotStore::new(normalizer, "builtin"),
            providers,
            engine,
            reconciler: ComparisonReconciler::new(),
            trend: None,
            reference_year: 2024,
            mappings_path: None,
        }
    }

    pub fn with_trend(mut self, trend: Arc<dyn TrendSource>) -> Self {
        self.trend = Some(trend);
        self
    }

    pub fn with_reference_year(mut self, year: i32) -> Self {
        self.reference_year = year;
        self
    }

    pub fn with_mappings_file(mut self, path: PathBuf) -> anyhow::Result<Self> {
        let labels = RuleSet::from_file(&path)?;
        self.rules = SnapshotStore::new(
            Normalizer::new(labels, RuleSet::builtin_regions()),
            path.display().to_string(),
        );
        self.mappings_path = Some(path);
        Ok(self)
    }

    /// Wire providers, rules and the forecast method from configuration
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let mut chain = ProviderChain::new();

        if let Some(path) = &config.data.database_path {
            match SqliteProvider::open(path, &config.data.table) {
                Ok(provider) => chain = chain.with(Arc::new(provider)),
                Err(e) => warn!("Database provider disabled: {}", e),
            }
        }

        let timeout = Duration::from_secs(config.rest.timeout_secs);
        if let Some((url, key)) = config.rest.credentials() {
            let provider = RestProvider::new(url, key, &config.data.table, timeout)
                .context("Failed to build REST client")?;
            chain = chain.with(Arc::new(provider));
        }

        chain = chain.with(Arc::new(FixtureProvider::in_dir(
            &config.data.fixtures_dir,
            &config.data.fixture_files,
        )));

        let f = &config.forecast;
        let engine = ForecastEngine::with_settings(f.recent_window, f.divergence_factor, f.default_target_year);

        let mut service = Service::new(Normalizer::builtin(), chain, engine)
            .with_reference_year(config.comparison.reference_year);

        if let Some(path) = &config.mappings.path {
            service = service
                .with_mappings_file(path.clone())
                .with_context(|| format!("Failed to load mappings from {}", path.display()))?;
        }

        if f.method == ForecastMethod::Trend {
            let trend: Arc<dyn TrendSource> = match (f.trend_source, config.rest.credentials()) {
                (TrendBackend::Rpc, Some((url, key))) => Arc::new(
                    RestTrendSource::new(url, key, timeout).context("Failed to build RPC client")?,
                ),
                (TrendBackend::Rpc, None) => {
                    warn!("RPC trend requested without REST credentials, using local least squares");
                    Arc::new(LinearTrend)
                }
                (TrendBackend::Linear, _) => Arc::new(LinearTrend),
            };
            service = service.with_trend(trend);
        }

        info!(
            source = service.providers.source(),
            rules_version = service.rules.version(),
            trend = service.trend.as_ref().map(|t| t.name()),
            "Service ready"
        );

        Ok(service)
    }

    pub fn rules_version(&self) -> u64 {
        self.rules.version()
    }

    /// Re-read the mapping file and swap the new rules in
    pub fn reload_rules(&self) -> anyhow::Result<u64> {
        let path = self
            .mappings_path
            .as_ref()
            .context("No mapping file configured")?;
        let labels = RuleSet::from_file(path)?;
        let version = self.rules.swap(
            Normalizer::new(labels, RuleSet::builtin_regions()),
            path.display().to_string(),
        );
        info!(version, path = %path.display(), "Mapping rules reloaded");
        Ok(version)
    }

    pub fn has_mappings_file(&self) -> bool {
        self.mappings_path.is_some()
    }

    // ========================================================================
    // FILTER RESOLUTION
    // ========================================================================

    fn scope(
        normalizer: &Normalizer,
        year: Option<i32>,
        month: Option<u32>,
        uf: Option<&str>,
        label: Option<&str>,
    ) -> Scope {
        let region = uf.map(|u| normalizer.normalize_region(u));
        let canonical_label = label.map(|l| normalizer.normalize_label(l));

        // Only real UF codes are worth a substring match at the source
        let pushdown_region = region
            .as_deref()
            .filter(|r| UF_CODES.contains(r))
            .map(str::to_string);

        Scope {
            query: RecordQuery {
                year,
                month,
                region: pushdown_region,
            },
            filter: RecordFilter {
                year,
                month,
                region,
                canonical_label,
            },
        }
    }

    async fn records(&self, normalizer: &Normalizer, query: &RecordQuery) -> Result<Vec<NormalizedRecord>> {
        let (raw, _) = self.providers.fetch(query).await?;
        Ok(normalize_records(raw, normalizer))
    }

    /// Local mean, or a vetted trend when one is configured. `target_year`
    /// defaults to the year after the data.
    async fn project(
        &self,
        label: Option<&str>,
        region: Option<&str>,
        month: Option<u32>,
        target_year: Option<i32>,
        annual: &BTreeMap<i32, f64>,
        monthly: &BTreeMap<(i32, u32), f64>,
    ) -> ForecastPoint {
        let target_year = target_year.unwrap_or_else(|| self.engine.target_year(annual, Some(monthly)));

        let Some(source) = &self.trend else {
            return self.engine.forecast_for(target_year, annual, Some(monthly), month);
        };

        let request = TrendRequest {
            label: label.map(str::to_string),
            region: region.map(str::to_string),
            month,
            target_year,
            history: ForecastEngine::history(annual, Some(monthly), month),
        };

        let projection = match source.project(&request).await {
            Ok(projection) => projection,
            Err(e) => {
                warn!(source = source.name(), "Trend source failed: {}", e);
                TrendProjection::default()
            }
        };

        self.engine
            .forecast_with_trend_for(target_year, annual, Some(monthly), month, Some(&projection))
    }

    // ========================================================================
    // ENDPOINTS
    // ========================================================================

    pub fn mappings(&self) -> MappingsResponse {
        MappingsResponse {
            vacinas: self.rules.current().value.labels().canonical_names(),
        }
    }

    pub fn normalize(&self, params: &NormalizeParams) -> NormalizeResponse {
        let snapshot = self.rules.current();
        let normalizer = &snapshot.value;
        NormalizeResponse {
            tx_insumo: params.tx_insumo.clone(),
            tx_insumo_norm: params.tx_insumo.as_deref().map(|l| normalizer.normalize_label(l)),
            tx_sigla: params.tx_sigla.clone(),
            tx_sigla_norm: params.tx_sigla.as_deref().map(|s| normalizer.normalize_region(s)),
        }
    }

    pub async fn overview(&self, params: &DashboardParams) -> Result<OverviewResponse> {
        let year = parse_year("ano", &params.ano)?;
        let month = parse_month("mes", &params.mes)?;
        let snapshot = self.rules.current();
        let scope = Self::scope(&snapshot.value, year, month, present(&params.uf), present(&params.fabricante));

        let records = self.records(&snapshot.value, &scope.query).await?;
        let periodo = match (year, month) {
            (Some(y), Some(m)) => Some(format!("{:04}-{:02}", y, m)),
            (Some(y), None) => Some(format!("{:04}", y)),
            _ => None,
        };

        Ok(OverviewResponse {
            total_doses: aggregation::total(&records, &scope.filter),
            periodo,
        })
    }

    pub async fn timeseries(&self, params: &DashboardParams) -> Result<Vec<TimeseriesPoint>> {
        let year = parse_year("ano", &params.ano)?;
        let month = parse_month("mes", &params.mes)?;
        let snapshot = self.rules.current();
        let scope = Self::scope(&snapshot.value, year, month, present(&params.uf), present(&params.fabricante));

        let records = self.records(&snapshot.value, &scope.query).await?;
        Ok(aggregation::aggregate(&records, &scope.filter, GroupBy::YearMonth)
            .into_iter()
            .map(|p| TimeseriesPoint {
                data: p.key.label(),
                doses_distribuidas: p.total_quantity,
            })
            .collect())
    }

    /// Every UF is ranked, so a `uf` filter does not apply here
    pub async fn ranking(&self, params: &DashboardParams) -> Result<Vec<RankingEntry>> {
        let year = parse_year("ano", &params.ano)?;
        let month = parse_month("mes", &params.mes)?;
        let snapshot = self.rules.current();
        let scope = Self::scope(&snapshot.value, year, month, None, present(&params.fabricante));

        let records = self.records(&snapshot.value, &scope.query).await?;
        Ok(aggregation::ranking(&records, &scope.filter)
            .into_iter()
            .map(|p| {
                let uf = p.key.label();
                RankingEntry {
                    sigla: uf.clone(),
                    uf,
                    doses_distribuidas: p.total_quantity,
                }
            })
            .collect())
    }

    /// Empty without filters; otherwise one point for the year after the data
    pub async fn forecast(&self, params: &DashboardParams) -> Result<Vec<ForecastResponsePoint>> {
        if params.is_empty() {
            return Ok(Vec::new());
        }
        // validated even though history spans all years
        parse_year("ano", &params.ano)?;
        let month = parse_month("mes", &params.mes)?;

        let snapshot = self.rules.current();
        let scope = Self::scope(&snapshot.value, None, month, present(&params.uf), present(&params.fabricante));
        let records = self.records(&snapshot.value, &scope.query).await?;

        let annual = aggregation::annual_totals(&records, &scope.filter);
        let monthly = aggregation::monthly_totals(&records, &scope.filter);
        let point = self
            .project(
                scope.filter.canonical_label.as_deref(),
                scope.filter.region.as_deref(),
                month,
                None,
                &annual,
                &monthly,
            )
            .await;

        Ok(vec![ForecastResponsePoint::from(&point)])
    }

    pub async fn previsao(&self, params: &PrevisaoParams) -> Result<PrevisaoResponse> {
        let insumo = present(&params.insumo_nome).ok_or_else(|| {
            EngineError::validation(
                "insumo_nome",
                "É obrigatório informar o nome da vacina (insumo_nome) para plotar o gráfico de previsão.",
            )
        })?;
        let month = parse_month("mes", &params.mes)?;

        let snapshot = self.rules.current();
        let scope = Self::scope(&snapshot.value, None, month, present(&params.uf), Some(insumo));
        let records = self.records(&snapshot.value, &scope.query).await?;

        let annual = aggregation::annual_totals(&records, &scope.filter);
        let monthly = aggregation::monthly_totals(&records, &scope.filter);
        let label = scope.filter.canonical_label.clone().unwrap_or_default();

        let point = self
            .project(Some(&label), scope.filter.region.as_deref(), month, None, &annual, &monthly)
            .await;
        if point.is_no_data() {
            return Err(EngineError::InsufficientData(label));
        }

        let historico = ForecastEngine::history(&annual, Some(&monthly), month)
            .into_iter()
            .map(|(ano, quantidade)| HistoricoPoint { ano, quantidade })
            .collect();

        Ok(PrevisaoResponse {
            insumo: label,
            historico,
            previsao: point,
        })
    }

    /// Reference-year total next to the following year's projection
    pub async fn comparacao(&self, params: &ComparacaoParams) -> Result<ComparacaoResponse> {
        let year = parse_year("ano", &params.ano)?;
        if year != Some(self.reference_year) {
            return Err(EngineError::validation(
                "ano",
                format!(
                    "Para gerar a comparação de previsão, o ano base precisa ser {}.",
                    self.reference_year
                ),
            ));
        }
        let month = parse_month("mes", &params.mes)?;

        let snapshot = self.rules.current();
        let scope = Self::scope(&snapshot.value, None, None, present(&params.uf), present(&params.insumo_nome));
        let records = self.records(&snapshot.value, &scope.query).await?;

        let reference_year = self.reference_year;
        let history: Vec<NormalizedRecord> = records
            .into_iter()
            .filter(|r| r.year() <= reference_year)
            .collect();

        let annual = aggregation::annual_totals(&history, &scope.filter);
        let monthly = aggregation::monthly_totals(&history, &scope.filter);
        let historical_total = annual.get(&reference_year).copied();

        // The projection is always for the year after the reference year,
        // whatever year the data stops at
        let label = scope.filter.canonical_label.as_deref();
        let point = self
            .project(
                label,
                scope.filter.region.as_deref(),
                month,
                Some(reference_year + 1),
                &annual,
                &monthly,
            )
            .await;

        let unit = projection_unit_for(&point, month, historical_total);
        let comparison = self
            .reconciler
            .compare(reference_year, historical_total, &point, unit);

        if comparison.is_insufficient() {
            info!(insumo = label.unwrap_or(ALL_LABELS), "Comparison has no usable data");
        } else {
            debug!(insumo = label.unwrap_or(ALL_LABELS), "Comparison: {}", comparison.summary());
        }

        Ok(ComparacaoResponse {
            insumo: label.unwrap_or(ALL_LABELS).to_string(),
            projecao_unidade: comparison.projection_unit,
            status: comparison.status,
            dados_comparacao: comparison.points.to_vec(),
        })
    }

    pub fn source(&self) -> SourceResponse {
        SourceResponse {
            source: self.providers.source().to_string(),
        }
    }

    pub fn health(&self) -> HealthResponse {
        HealthResponse {
            status: "ok".to_string(),
            rules_version: self.rules_version(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::comparison::{ComparisonStatus, PointKind};
    use crate::forecast::{ForecastBasis, ProjectionUnit};
    use crate::providers::tests::StaticProvider;
    use crate::records::RawRecord;
    use std::io::Write;

    /// BCG annual totals 100, 200, 150, 300, 250 (2020..=2024), January
    /// values 10, 20, 15, 30, 25; plus one Hepatite B line.
    pub(crate) fn sample_records() -> Vec<RawRecord> {
        let mut records = Vec::new();
        for (year, jan, total) in [
            (2020, 10.0, 100.0),
            (2021, 20.0, 200.0),
            (2022, 15.0, 150.0),
            (2023, 30.0, 300.0),
            (2024, 25.0, 250.0),
        ] {
            records.push(RawRecord::new(year, 1, "SES-PR", "VACINA BCG", jan));
            records.push(RawRecord::new(year, 2, "SES-SP", "BCG - FRASCO 10 DOSES", total - jan));
        }
        records.push(RawRecord::new(2024, 3, "SES-PR", "VACINA HEPATITE B (RECOMBINANTE)", 50.0));
        records
    }

    pub(crate) fn sample_service() -> Service {
        let chain = ProviderChain::new().with(Arc::new(StaticProvider::new(sample_records())));
        Service::new(Normalizer::builtin(), chain, ForecastEngine::new())
    }

    fn dashboard(ano: Option<&str>, mes: Option<&str>, uf: Option<&str>, fabricante: Option<&str>) -> DashboardParams {
        DashboardParams {
            ano: ano.map(String::from),
            mes: mes.map(String::from),
            uf: uf.map(String::from),
            fabricante: fabricante.map(String::from),
        }
    }

    fn comparacao(insumo: Option<&str>, ano: Option<&str>, mes: Option<&str>) -> ComparacaoParams {
        ComparacaoParams {
            insumo_nome: insumo.map(String::from),
            ano: ano.map(String::from),
            uf: None,
            mes: mes.map(String::from),
        }
    }

    #[tokio::test]
    async fn test_overview() {
        let service = sample_service();

        let bcg = service.overview(&dashboard(Some("2024"), None, None, Some("bcg"))).await.unwrap();
        assert_eq!(bcg.total_doses, 250.0);
        assert_eq!(bcg.periodo.as_deref(), Some("2024"));

        let pr_january = service
            .overview(&dashboard(Some("2024"), Some("1"), Some("PR"), None))
            .await
            .unwrap();
        assert_eq!(pr_january.total_doses, 25.0);
        assert_eq!(pr_january.periodo.as_deref(), Some("2024-01"));

        let all = service.overview(&DashboardParams::default()).await.unwrap();
        assert_eq!(all.total_doses, 1050.0);
        assert_eq!(all.periodo, None);
    }

    #[tokio::test]
    async fn test_timeseries_is_chronological() {
        let service = sample_service();
        let series = service.timeseries(&dashboard(None, None, None, Some("BCG"))).await.unwrap();

        assert_eq!(series.len(), 10);
        assert_eq!(series[0].data, "2020-01");
        assert_eq!(series[1].data, "2020-02");
        assert_eq!(series[9].data, "2024-02");
        assert!(series.windows(2).all(|w| w[0].data < w[1].data));
    }

    #[tokio::test]
    async fn test_ranking_descending() {
        let service = sample_service();
        let ranking = service.ranking(&dashboard(Some("2024"), None, Some("SP"), None)).await.unwrap();

        assert_eq!(ranking.len(), 2);
        assert_eq!(ranking[0].uf, "SP");
        assert_eq!(ranking[0].sigla, "SP");
        assert_eq!(ranking[0].doses_distribuidas, 225.0);
        assert_eq!(ranking[1].uf, "PR");
        assert_eq!(ranking[1].doses_distribuidas, 75.0);
    }

    #[tokio::test]
    async fn test_forecast_endpoint() {
        let service = sample_service();

        assert!(service.forecast(&DashboardParams::default()).await.unwrap().is_empty());

        let annual = service.forecast(&dashboard(Some("2024"), None, None, Some("BCG"))).await.unwrap();
        assert_eq!(annual.len(), 1);
        assert_eq!(annual[0].data, "2025");
        assert_eq!(annual[0].doses_previstas, Some(200.0));
        assert_eq!(annual[0].intervalo_inferior, Some(129.0));
        assert_eq!(annual[0].intervalo_superior, Some(271.0));
        assert_eq!(annual[0].base, ForecastBasis::AnnualMean);

        let january = service.forecast(&dashboard(None, Some("01"), None, Some("BCG"))).await.unwrap();
        assert_eq!(january[0].data, "2025-01");
        assert_eq!(january[0].doses_previstas, Some(20.0));

        let nothing = service.forecast(&dashboard(None, None, None, Some("Raiva"))).await.unwrap();
        assert_eq!(nothing[0].doses_previstas, None);
        assert_eq!(nothing[0].base, ForecastBasis::NoData);
    }

    #[tokio::test]
    async fn test_validation_names_parameter() {
        let service = sample_service();

        let err = service.overview(&dashboard(None, Some("13"), None, None)).await.unwrap_err();
        assert_eq!(err.param(), Some("mes"));

        let err = service.timeseries(&dashboard(Some("abc"), None, None, None)).await.unwrap_err();
        assert_eq!(err.param(), Some("ano"));
    }

    #[tokio::test]
    async fn test_previsao() {
        let service = sample_service();

        let missing = service.previsao(&PrevisaoParams::default()).await.unwrap_err();
        assert_eq!(missing.param(), Some("insumo_nome"));

        let response = service
            .previsao(&PrevisaoParams {
                insumo_nome: Some("vacina bcg".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(response.insumo, "BCG");
        assert_eq!(response.historico.len(), 5);
        assert_eq!(response.historico[0], HistoricoPoint { ano: 2020, quantidade: 100.0 });
        assert_eq!(response.previsao.projected_value, Some(200.0));
        assert_eq!(response.previsao.target_period, "2025");

        let none = service
            .previsao(&PrevisaoParams {
                insumo_nome: Some("Raiva".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(none, EngineError::InsufficientData(_)));
    }

    #[tokio::test]
    async fn test_comparacao_requires_reference_year() {
        let service = sample_service();

        for ano in [None, Some("2023"), Some("x")] {
            let err = service.comparacao(&comparacao(Some("BCG"), ano, None)).await.unwrap_err();
            assert_eq!(err.param(), Some("ano"));
        }
    }

    #[tokio::test]
    async fn test_comparacao_annualizes_monthly_projection() {
        let service = sample_service();
        let response = service
            .comparacao(&comparacao(Some("BCG"), Some("2024"), Some("1")))
            .await
            .unwrap();

        assert_eq!(response.insumo, "BCG");
        assert_eq!(response.projecao_unidade, ProjectionUnit::Mensal);
        assert_eq!(response.status, ComparisonStatus::Comparable);

        let [historico, projecao] = [&response.dados_comparacao[0], &response.dados_comparacao[1]];
        assert_eq!(historico.year, 2024);
        assert_eq!(historico.quantity, Some(250.0));
        assert_eq!(historico.kind, PointKind::Historico);
        assert_eq!(projecao.year, 2025);
        assert_eq!(projecao.quantity, Some(240.0));
        assert!(projecao.annualized);
    }

    #[tokio::test]
    async fn test_comparacao_insufficient_and_total() {
        let service = sample_service();

        let none = service
            .comparacao(&comparacao(Some("Raiva"), Some("2024"), None))
            .await
            .unwrap();
        assert_eq!(none.status, ComparisonStatus::InsufficientData);
        assert!(none.dados_comparacao.iter().all(|p| p.quantity.is_none()));

        let total = service.comparacao(&comparacao(None, Some("2024"), None)).await.unwrap();
        assert_eq!(total.insumo, "Total");
        assert_eq!(total.projecao_unidade, ProjectionUnit::Anual);
        assert_eq!(total.dados_comparacao[0].quantity, Some(300.0));
    }

    #[tokio::test]
    async fn test_trend_method_is_vetted() {
        let chain = ProviderChain::new().with(Arc::new(StaticProvider::new(sample_records())));
        let service =
            Service::new(Normalizer::builtin(), chain, ForecastEngine::new()).with_trend(Arc::new(LinearTrend));

        let points = service.forecast(&dashboard(None, None, None, Some("BCG"))).await.unwrap();
        assert_eq!(points[0].base, ForecastBasis::Trend);
        // OLS over 100, 200, 150, 300, 250 gives 320 for 2025
        assert_eq!(points[0].doses_previstas, Some(320.0));
    }

    #[tokio::test]
    async fn test_comparacao_projects_year_after_reference_when_data_stops_early() {
        let up_to_2022: Vec<RawRecord> = sample_records().into_iter().filter(|r| r.year <= 2022).collect();
        let chain = ProviderChain::new().with(Arc::new(StaticProvider::new(up_to_2022)));
        let service =
            Service::new(Normalizer::builtin(), chain, ForecastEngine::new()).with_trend(Arc::new(LinearTrend));

        let dashboard_point = service.forecast(&dashboard(None, None, None, Some("BCG"))).await.unwrap();
        assert_eq!(dashboard_point[0].data, "2023");
        assert_eq!(dashboard_point[0].doses_previstas, Some(200.0));

        let response = service
            .comparacao(&comparacao(Some("BCG"), Some("2024"), None))
            .await
            .unwrap();
        let [historico, projecao] = [&response.dados_comparacao[0], &response.dados_comparacao[1]];
        assert_eq!(historico.year, 2024);
        assert_eq!(historico.quantity, None);
        // OLS over 100, 200, 150 (2020..=2022) extended to 2025
        assert_eq!(projecao.year, 2025);
        assert_eq!(projecao.quantity, Some(250.0));
        assert_eq!(response.status, ComparisonStatus::Comparable);
    }

    #[tokio::test]
    async fn test_all_providers_down() {
        let service = Service::new(Normalizer::builtin(), ProviderChain::new(), ForecastEngine::new());
        let err = service.overview(&DashboardParams::default()).await.unwrap_err();
        assert!(matches!(err, EngineError::UpstreamUnavailable { .. }));
    }

    #[test]
    fn test_normalize_and_mappings() {
        let service = sample_service();
        let response = service.normalize(&NormalizeParams {
            tx_insumo: Some("DILUENTE P/ VACINA BCG".into()),
            tx_sigla: None,
        });
        assert_eq!(response.tx_insumo_norm.as_deref(), Some("BCG"));
        assert_eq!(response.tx_sigla_norm, None);

        let vacinas = service.mappings().vacinas;
        assert!(vacinas.contains(&"BCG".to_string()));
        assert!(vacinas.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(service.source().source, "local");
        assert_eq!(service.health().rules_version, 1);
    }

    #[test]
    fn test_reload_rules_swaps_snapshot() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"[{{"vacina_normalizada": "BCG", "pattern": "BCG"}}]"#).unwrap();

        let service = sample_service().with_mappings_file(file.path().to_path_buf()).unwrap();
        assert_eq!(service.mappings().vacinas, vec!["BCG"]);
        assert_eq!(service.rules_version(), 1);

        let mut file = std::fs::OpenOptions::new().write(true).truncate(true).open(file.path()).unwrap();
        write!(
            file,
            r#"[{{"vacina_normalizada": "BCG", "pattern": "BCG"}}, {{"vacina_normalizada": "Raiva", "pattern": "RAIVA"}}]"#
        )
        .unwrap();

        assert_eq!(service.reload_rules().unwrap(), 2);
        assert_eq!(service.mappings().vacinas, vec!["BCG", "Raiva"]);

        assert!(sample_service().reload_rules().is_err());
    }
}
