// ⚖️ Comparison Reconciler - historical total vs. projection, in the same unit
//
// Historical totals are always annual. A monthly projection is annualized
// (x12) before it is put next to one, and the point says so.

use crate::forecast::{ForecastBasis, ForecastPoint, ProjectionUnit};
use serde::{Deserialize, Serialize};

// ============================================================================
// COMPARISON POINT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointKind {
    Historico,
    Projecao,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonPoint {
    #[serde(rename = "ano")]
    pub year: i32,
    #[serde(rename = "quantidade")]
    pub quantity: Option<f64>,
    #[serde(rename = "tipo")]
    pub kind: PointKind,
    #[serde(rename = "unidade")]
    pub unit: ProjectionUnit,
    #[serde(rename = "anualizado")]
    pub annualized: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonStatus {
    Comparable,
    /// Both sides null or zero; nothing to draw
    #[serde(rename = "dados_insuficientes")]
    InsufficientData,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comparison {
    pub projection_unit: ProjectionUnit,
    pub status: ComparisonStatus,
    pub points: [ComparisonPoint; 2],
}

impl Comparison {
    pub fn is_insufficient(&self) -> bool {
        self.status == ComparisonStatus::InsufficientData
    }

    pub fn historical(&self) -> &ComparisonPoint {
        &self.points[0]
    }

    pub fn projected(&self) -> &ComparisonPoint {
        &self.points[1]
    }

    pub fn summary(&self) -> String {
        let fmt = |q: Option<f64>| q.map_or("n/d".to_string(), |v| format!("{:.0}", v));
        format!(
            "{} = {} vs {} = {} ({}{})",
            self.points[0].year,
            fmt(self.points[0].quantity),
            self.points[1].year,
            fmt(self.points[1].quantity),
            self.projection_unit.as_str(),
            if self.points[1].annualized { ", anualizado" } else { "" }
        )
    }
}

// ============================================================================
// RECONCILER
// ============================================================================

fn is_degenerate(value: Option<f64>) -> bool {
    value.map_or(true, |v| v == 0.0)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ComparisonReconciler;

impl ComparisonReconciler {
    pub fn new() -> Self {
        ComparisonReconciler
    }

    /// Two points: `historico` at `historical_year`, `projecao` at the next year
    ///
    /// Example: a monthly projection of 600 becomes 7200 with `annualized = true`.
    pub fn compare(
        &self,
        historical_year: i32,
        historical_total: Option<f64>,
        projection: &ForecastPoint,
        projection_unit: ProjectionUnit,
    ) -> Comparison {
        let annualize = projection_unit == ProjectionUnit::Mensal;
        let projected = projection
            .projected_value
            .map(|v| if annualize { v * 12.0 } else { v });

        let insufficient = is_degenerate(historical_total) && is_degenerate(projected);

        let (historical_qty, projected_qty, status) = if insufficient {
            (None, None, ComparisonStatus::InsufficientData)
        } else {
            (historical_total, projected, ComparisonStatus::Comparable)
        };

        Comparison {
            projection_unit,
            status,
            points: [
                ComparisonPoint {
                    year: historical_year,
                    quantity: historical_qty,
                    kind: PointKind::Historico,
                    unit: ProjectionUnit::Anual,
                    annualized: false,
                },
                ComparisonPoint {
                    year: historical_year + 1,
                    quantity: projected_qty,
                    kind: PointKind::Projecao,
                    unit: projection_unit,
                    annualized: annualize && projected_qty.is_some(),
                },
            ],
        }
    }
}

/// Unit of a projection whose unit is not known up front (upstream trends).
///
/// A month filter means a monthly figure. Otherwise the projection is compared
/// against the historical annual total H: tiny values (< H/100) and values
/// whose x12 lands within [0.5H, 2H] are monthly; values >= H/2 are annual.
pub fn infer_projection_unit(
    month_filter: Option<u32>,
    historical_total: Option<f64>,
    projected: Option<f64>,
) -> ProjectionUnit {
    if month_filter.is_some() {
        return ProjectionUnit::Mensal;
    }

    let (Some(h), Some(p)) = (historical_total, projected) else {
        return ProjectionUnit::Anual;
    };
    if h <= 0.0 || p < 0.0 {
        return ProjectionUnit::Anual;
    }

    if p < h / 100.0 {
        return ProjectionUnit::Mensal;
    }
    let ratio = p * 12.0 / h;
    if (0.5..=2.0).contains(&ratio) {
        ProjectionUnit::Mensal
    } else if p >= h * 0.5 {
        ProjectionUnit::Anual
    } else {
        ProjectionUnit::Mensal
    }
}

/// Unit of a forecast point: local means know it, trends are inferred
pub fn projection_unit_for(
    point: &ForecastPoint,
    month_filter: Option<u32>,
    historical_total: Option<f64>,
) -> ProjectionUnit {
    match point.basis {
        ForecastBasis::Trend => {
            infer_projection_unit(month_filter, historical_total, point.projected_value)
        }
        _ => point.unit(),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn projection(value: Option<f64>, month: Option<u32>, basis: ForecastBasis) -> ForecastPoint {
        ForecastPoint {
            target_period: match month {
                Some(m) => format!("2025-{:02}", m),
                None => "2025".to_string(),
            },
            target_year: 2025,
            target_month: month,
            projected_value: value,
            basis,
            confidence_lower: None,
            confidence_upper: None,
        }
    }

    #[test]
    fn test_monthly_projection_is_annualized() {
        let reconciler = ComparisonReconciler::new();
        let point = projection(Some(600.0), Some(1), ForecastBasis::MonthlyMean);

        let comparison = reconciler.compare(2024, Some(8000.0), &point, ProjectionUnit::Mensal);

        assert_eq!(comparison.status, ComparisonStatus::Comparable);
        assert_eq!(comparison.historical().year, 2024);
        assert_eq!(comparison.historical().quantity, Some(8000.0));
        assert_eq!(comparison.historical().kind, PointKind::Historico);
        assert!(!comparison.historical().annualized);

        assert_eq!(comparison.projected().year, 2025);
        assert_eq!(comparison.projected().quantity, Some(7200.0));
        assert_eq!(comparison.projected().kind, PointKind::Projecao);
        assert!(comparison.projected().annualized);

        println!("✅ {}", comparison.summary());
    }

    #[test]
    fn test_annual_projection_untouched() {
        let reconciler = ComparisonReconciler::new();
        let point = projection(Some(1234.5678), None, ForecastBasis::AnnualMean);

        let comparison = reconciler.compare(2024, Some(1000.0), &point, ProjectionUnit::Anual);
        assert_eq!(comparison.projected().quantity, Some(1234.5678));
        assert!(!comparison.projected().annualized);
        assert_eq!(comparison.projection_unit, ProjectionUnit::Anual);
    }

    #[test]
    fn test_both_degenerate_is_insufficient() {
        let reconciler = ComparisonReconciler::new();

        for (historical, projected) in [
            (None, None),
            (Some(0.0), None),
            (None, Some(0.0)),
            (Some(0.0), Some(0.0)),
        ] {
            let point = projection(projected, None, ForecastBasis::AnnualMean);
            let comparison = reconciler.compare(2024, historical, &point, ProjectionUnit::Anual);

            assert!(comparison.is_insufficient());
            assert_eq!(comparison.points.len(), 2);
            assert!(comparison.points.iter().all(|p| p.quantity.is_none()));
            assert!(!comparison.projected().annualized);
        }
    }

    #[test]
    fn test_one_sided_zero_is_kept() {
        let reconciler = ComparisonReconciler::new();
        let point = projection(Some(50.0), None, ForecastBasis::AnnualMean);

        let comparison = reconciler.compare(2024, Some(0.0), &point, ProjectionUnit::Anual);
        assert_eq!(comparison.status, ComparisonStatus::Comparable);
        assert_eq!(comparison.historical().quantity, Some(0.0));

        let missing = projection(None, None, ForecastBasis::NoData);
        let comparison = reconciler.compare(2024, Some(10.0), &missing, ProjectionUnit::Mensal);
        assert_eq!(comparison.projected().quantity, None);
        assert!(!comparison.projected().annualized);
    }

    #[test]
    fn test_infer_projection_unit() {
        assert_eq!(infer_projection_unit(Some(3), Some(1000.0), Some(1000.0)), ProjectionUnit::Mensal);
        assert_eq!(infer_projection_unit(None, None, Some(10.0)), ProjectionUnit::Anual);
        assert_eq!(infer_projection_unit(None, Some(12_000.0), Some(50.0)), ProjectionUnit::Mensal);
        assert_eq!(infer_projection_unit(None, Some(12_000.0), Some(1_000.0)), ProjectionUnit::Mensal);
        assert_eq!(infer_projection_unit(None, Some(12_000.0), Some(11_000.0)), ProjectionUnit::Anual);
        assert_eq!(infer_projection_unit(None, Some(12_000.0), Some(3_000.0)), ProjectionUnit::Mensal);
    }

    #[test]
    fn test_projection_unit_for_local_mean_is_known() {
        let monthly = projection(Some(11_000.0), Some(2), ForecastBasis::MonthlyMean);
        assert_eq!(projection_unit_for(&monthly, Some(2), Some(12_000.0)), ProjectionUnit::Mensal);

        let annual = projection(Some(50.0), None, ForecastBasis::AnnualMean);
        assert_eq!(projection_unit_for(&annual, None, Some(12_000.0)), ProjectionUnit::Anual);

        let trend = projection(Some(1_000.0), None, ForecastBasis::Trend);
        assert_eq!(projection_unit_for(&trend, None, Some(12_000.0)), ProjectionUnit::Mensal);
    }

    #[test]
    fn test_serialized_wire_names() {
        let reconciler = ComparisonReconciler::new();
        let point = projection(Some(600.0), Some(1), ForecastBasis::MonthlyMean);
        let comparison = reconciler.compare(2024, None, &point, ProjectionUnit::Mensal);

        let json = serde_json::to_value(&comparison.points).unwrap();
        assert_eq!(
            json,
            serde_json::json!([
                {"ano": 2024, "quantidade": null, "tipo": "historico", "unidade": "anual", "anualizado": false},
                {"ano": 2025, "quantidade": 7200.0, "tipo": "projecao", "unidade": "mensal", "anualizado": true}
            ])
        );
    }
}
