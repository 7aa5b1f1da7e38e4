// 🔮 Forecast Engine - projections for the year after the last recorded one
//
// Per call the engine moves through:
//   NO_DATA -> COMPUTED (mean of history)
//           -> TREND    (upstream projection accepted)
//           -> FALLBACK (upstream projection degenerate, local substitute)
// The state reached is recorded in ForecastPoint::basis.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

// ============================================================================
// FORECAST POINT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastBasis {
    MonthlyMean,
    AnnualMean,
    Trend,
    FallbackMedian,
    FallbackRecentMean,
    /// Nothing to compute from
    NoData,
}

impl ForecastBasis {
    pub fn is_fallback(&self) -> bool {
        matches!(self, ForecastBasis::FallbackMedian | ForecastBasis::FallbackRecentMean)
    }
}

/// Unit of a projected value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectionUnit {
    Anual,
    Mensal,
}

impl ProjectionUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectionUnit::Anual => "anual",
            ProjectionUnit::Mensal => "mensal",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    /// "YYYY" in annual mode, "YYYY-MM" in monthly mode
    pub target_period: String,
    pub target_year: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_month: Option<u32>,
    /// None means no computation was possible, distinct from a zero projection
    pub projected_value: Option<f64>,
    pub basis: ForecastBasis,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_lower: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_upper: Option<f64>,
}

impl ForecastPoint {
    fn empty(target_year: i32, target_month: Option<u32>) -> Self {
        ForecastPoint {
            target_period: period_label(target_year, target_month),
            target_year,
            target_month,
            projected_value: None,
            basis: ForecastBasis::NoData,
            confidence_lower: None,
            confidence_upper: None,
        }
    }

    pub fn is_no_data(&self) -> bool {
        self.basis == ForecastBasis::NoData || self.projected_value.is_none()
    }

    /// Monthly-mode projections are per month, everything else per year
    pub fn unit(&self) -> ProjectionUnit {
        if self.target_month.is_some() {
            ProjectionUnit::Mensal
        } else {
            ProjectionUnit::Anual
        }
    }
}

fn period_label(year: i32, month: Option<u32>) -> String {
    match month {
        Some(m) => format!("{:04}-{:02}", year, m),
        None => format!("{:04}", year),
    }
}

// ============================================================================
// UPSTREAM TREND
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendRowKind {
    Historical,
    Projected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendRow {
    pub year: i32,
    pub quantity: Option<f64>,
    pub kind: TrendRowKind,
    #[serde(default)]
    pub lower: Option<f64>,
    #[serde(default)]
    pub upper: Option<f64>,
}

/// A richer projection computed outside the engine (regression, database RPC)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrendProjection {
    pub rows: Vec<TrendRow>,
}

impl TrendProjection {
    pub fn projected_for(&self, year: i32) -> Option<&TrendRow> {
        self.rows
            .iter()
            .find(|r| r.kind == TrendRowKind::Projected && r.year == year)
    }
}

/// Why an upstream projection was discarded
#[derive(Debug, Clone, PartialEq)]
pub enum Degeneracy {
    /// Nothing local to check the trend against
    NoHistory,
    MissingTarget,
    IsolatedPoint,
    ZeroSeries,
    NotFinite(f64),
    Diverges { value: f64, min: f64, max: f64 },
}

// ============================================================================
// FORECAST ENGINE
// ============================================================================

#[derive(Debug, Clone)]
pub struct ForecastEngine {
    /// How many of the latest values the fallback looks at
    pub recent_window: usize,

    /// A trend value outside [min / f, max * f] of history is rejected
    pub divergence_factor: f64,

    /// Target year when there is no history at all
    pub default_target_year: i32,
}

impl ForecastEngine {
    pub fn new() -> Self {
        ForecastEngine {
            recent_window: 5,
            divergence_factor: 3.0,
            default_target_year: 2025,
        }
    }

    pub fn with_settings(recent_window: usize, divergence_factor: f64, default_target_year: i32) -> Self {
        ForecastEngine {
            recent_window: recent_window.max(1),
            divergence_factor,
            default_target_year,
        }
    }

    /// Year after the latest year present in either series
    pub fn target_year(
        &self,
        annual: &BTreeMap<i32, f64>,
        monthly: Option<&BTreeMap<(i32, u32), f64>>,
    ) -> i32 {
        let last_annual = annual.keys().next_back().copied();
        let last_monthly = monthly.and_then(|m| m.keys().next_back().map(|(y, _)| *y));
        match last_annual.max(last_monthly) {
            Some(year) => year + 1,
            None => self.default_target_year,
        }
    }

    /// The (year, value) history a projection in this mode is computed from
    pub fn history(
        annual: &BTreeMap<i32, f64>,
        monthly: Option<&BTreeMap<(i32, u32), f64>>,
        target_month: Option<u32>,
    ) -> Vec<(i32, f64)> {
        match target_month {
            None => annual.iter().map(|(y, v)| (*y, *v)).collect(),
            Some(month) => monthly
                .map(|m| {
                    m.iter()
                        .filter(|((_, mo), _)| *mo == month)
                        .map(|((y, _), v)| (*y, *v))
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    /// Mean of the history for the requested mode
    ///
    /// Annual totals `{2020: 100, 2021: 200, 2022: 150, 2023: 300, 2024: 250}`
    /// project 200 for 2025.
    pub fn forecast(
        &self,
        annual: &BTreeMap<i32, f64>,
        monthly: Option<&BTreeMap<(i32, u32), f64>>,
        target_month: Option<u32>,
    ) -> ForecastPoint {
        self.forecast_for(self.target_year(annual, monthly), annual, monthly, target_month)
    }

    /// `forecast` labelled for a fixed `target_year`
    pub fn forecast_for(
        &self,
        target_year: i32,
        annual: &BTreeMap<i32, f64>,
        monthly: Option<&BTreeMap<(i32, u32), f64>>,
        target_month: Option<u32>,
    ) -> ForecastPoint {
        let history = Self::history(annual, monthly, target_month);
        let mut point = ForecastPoint::empty(target_year, target_month);

        let values: Vec<f64> = history.iter().map(|(_, v)| *v).collect();
        let Some(avg) = mean(&values) else {
            debug!(period = %point.target_period, "No history to forecast from");
            return point;
        };

        point.projected_value = Some(avg);
        point.basis = if target_month.is_some() {
            ForecastBasis::MonthlyMean
        } else {
            ForecastBasis::AnnualMean
        };

        if values.len() > 1 {
            let sd = population_std_dev(&values, avg);
            point.confidence_lower = Some((avg - sd).max(0.0));
            point.confidence_upper = Some(avg + sd);
        }

        point
    }

    /// Like `forecast`, but prefers a sane upstream trend projection and falls
    /// back to a local substitute when the upstream answer is degenerate.
    pub fn forecast_with_trend(
        &self,
        annual: &BTreeMap<i32, f64>,
        monthly: Option<&BTreeMap<(i32, u32), f64>>,
        target_month: Option<u32>,
        trend: Option<&TrendProjection>,
    ) -> ForecastPoint {
        let target_year = self.target_year(annual, monthly);
        self.forecast_with_trend_for(target_year, annual, monthly, target_month, trend)
    }

    /// `forecast_with_trend` for a fixed `target_year`; the trend must carry
    /// a projected row for exactly that year
    pub fn forecast_with_trend_for(
        &self,
        target_year: i32,
        annual: &BTreeMap<i32, f64>,
        monthly: Option<&BTreeMap<(i32, u32), f64>>,
        target_month: Option<u32>,
        trend: Option<&TrendProjection>,
    ) -> ForecastPoint {
        let computed = self.forecast_for(target_year, annual, monthly, target_month);
        let Some(trend) = trend else {
            return computed;
        };

        let history = Self::history(annual, monthly, target_month);
        let values: Vec<f64> = history.iter().map(|(_, v)| *v).collect();

        match self.assess_trend(trend, computed.target_year, &values) {
            Ok(row) => ForecastPoint {
                projected_value: row.quantity,
                basis: ForecastBasis::Trend,
                confidence_lower: row.lower,
                confidence_upper: row.upper,
                ..computed
            },
            Err(reason) => {
                warn!(
                    period = %computed.target_period,
                    "Discarding degenerate trend projection: {:?}",
                    reason
                );
                self.fallback(&values, computed)
            }
        }
    }

    /// Accept the projected row for `target_year` or explain why not
    pub fn assess_trend<'a>(
        &self,
        trend: &'a TrendProjection,
        target_year: i32,
        history: &[f64],
    ) -> Result<&'a TrendRow, Degeneracy> {
        if history.is_empty() {
            return Err(Degeneracy::NoHistory);
        }

        let row = trend
            .projected_for(target_year)
            .ok_or(Degeneracy::MissingTarget)?;

        let valued: Vec<f64> = trend.rows.iter().filter_map(|r| r.quantity).collect();
        if valued.len() <= 1 {
            return Err(Degeneracy::IsolatedPoint);
        }
        if valued.iter().all(|q| *q == 0.0) {
            return Err(Degeneracy::ZeroSeries);
        }

        let value = row.quantity.ok_or(Degeneracy::MissingTarget)?;
        if !value.is_finite() || value < 0.0 {
            return Err(Degeneracy::NotFinite(value));
        }

        let min = history.iter().copied().fold(f64::INFINITY, f64::min);
        let max = history.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let low = min / self.divergence_factor;
        let high = max * self.divergence_factor;
        if value < low || value > high {
            return Err(Degeneracy::Diverges { value, min, max });
        }

        Ok(row)
    }

    /// Median of the recent window when it has at least 3 values, else its mean
    fn fallback(&self, history: &[f64], computed: ForecastPoint) -> ForecastPoint {
        let start = history.len().saturating_sub(self.recent_window);
        let recent = &history[start..];

        let (value, basis) = if recent.len() >= 3 {
            (median(recent), ForecastBasis::FallbackMedian)
        } else {
            (mean(recent), ForecastBasis::FallbackRecentMean)
        };

        match value {
            Some(v) => ForecastPoint {
                projected_value: Some(v),
                basis,
                confidence_lower: None,
                confidence_upper: None,
                ..computed
            },
            None => ForecastPoint::empty(computed.target_year, computed.target_month),
        }
    }
}

impl Default for ForecastEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// STATISTICS
// ============================================================================

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    if n % 2 == 1 {
        Some(sorted[n / 2])
    } else {
        Some((sorted[n / 2 - 1] + sorted[n / 2]) / 2.0)
    }
}

pub fn population_std_dev(values: &[f64], avg: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let var = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

// ============================================================================
// TESTS
// ============================================================================
