// 🎫 Session state - last issued request wins
//
// Every refresh takes a generation ticket. A result is applied only while its
// ticket is still the newest one issued, checked again after every await, so
// a slow response for an old filter set can never overwrite a newer one.

use crate::api::{DashboardParams, ForecastResponsePoint, OverviewResponse, RankingEntry, TimeseriesPoint};
use crate::error::{EngineError, Result};
use crate::service::Service;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

// ============================================================================
// GENERATION GATE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Ticket(u64);

impl Ticket {
    pub fn generation(&self) -> u64 {
        self.0
    }
}

/// Holds the visible value and the generation that produced it
#[derive(Debug)]
pub struct LatestOnly<T> {
    issued: AtomicU64,
    visible: Mutex<Option<(Ticket, T)>>,
}

impl<T: Clone> LatestOnly<T> {
    pub fn new() -> Self {
        LatestOnly {
            issued: AtomicU64::new(0),
            visible: Mutex::new(None),
        }
    }

    /// A ticket newer than every ticket issued before
    pub fn issue(&self) -> Ticket {
        Ticket(self.issued.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn is_current(&self, ticket: Ticket) -> bool {
        self.issued.load(Ordering::SeqCst) == ticket.0
    }

    /// Make `value` visible if `ticket` is still the newest; false means the
    /// value was discarded
    pub fn apply(&self, ticket: Ticket, value: T) -> bool {
        let mut visible = match self.visible.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let newer_than_visible = visible.as_ref().map_or(true, |(shown, _)| ticket > *shown);
        if !self.is_current(ticket) || !newer_than_visible {
            debug!(generation = ticket.0, "Discarding stale result");
            return false;
        }

        *visible = Some((ticket, value));
        true
    }

    pub fn latest(&self) -> Option<T> {
        let visible = match self.visible.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        visible.as_ref().map(|(_, v)| v.clone())
    }

    pub fn visible_generation(&self) -> Option<u64> {
        let visible = match self.visible.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        visible.as_ref().map(|(t, _)| t.0)
    }
}

impl<T: Clone> Default for LatestOnly<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// DASHBOARD SESSION
// ============================================================================

/// Everything the dashboard shows for one filter set
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardView {
    pub params: DashboardParams,
    pub overview: OverviewResponse,
    pub timeseries: Vec<TimeseriesPoint>,
    pub ranking: Vec<RankingEntry>,
    pub forecast: Vec<ForecastResponsePoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Applied(u64),
    /// A newer refresh was issued while this one was in flight
    Superseded,
}

pub struct DashboardSession {
    service: Arc<Service>,
    view: LatestOnly<DashboardView>,
}

impl DashboardSession {
    pub fn new(service: Arc<Service>) -> Self {
        DashboardSession {
            service,
            view: LatestOnly::new(),
        }
    }

    pub fn view(&self) -> Option<DashboardView> {
        self.view.latest()
    }

    /// Load all four dashboard panels for `params`
    pub async fn refresh(&self, params: DashboardParams) -> Result<RefreshOutcome> {
        let ticket = self.view.issue();

        let (overview, timeseries) = match tokio::try_join!(
            self.service.overview(&params),
            self.service.timeseries(&params)
        ) {
            Ok(panels) => panels,
            Err(e) => return self.discard_if_stale(ticket, e),
        };
        if !self.view.is_current(ticket) {
            return Ok(RefreshOutcome::Superseded);
        }

        let (ranking, forecast) = match tokio::try_join!(
            self.service.ranking(&params),
            self.service.forecast(&params)
        ) {
            Ok(panels) => panels,
            Err(e) => return self.discard_if_stale(ticket, e),
        };

        let view = DashboardView {
            params,
            overview,
            timeseries,
            ranking,
            forecast,
        };
        if self.view.apply(ticket, view) {
            Ok(RefreshOutcome::Applied(ticket.generation()))
        } else {
            Ok(RefreshOutcome::Superseded)
        }
    }

    /// A failed request only reports its error while it is still the newest
    fn discard_if_stale(&self, ticket: Ticket, error: EngineError) -> Result<RefreshOutcome> {
        if self.view.is_current(ticket) {
            return Err(error);
        }
        debug!(generation = ticket.generation(), "Dropping error from superseded refresh: {}", error);
        Ok(RefreshOutcome::Superseded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::forecast::ForecastEngine;
    use crate::providers::{ProviderChain, RecordProvider, RecordQuery};
    use crate::records::RawRecord;
    use crate::rules::Normalizer;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;
    use tokio::sync::Notify;

    #[test]
    fn test_only_newest_ticket_applies() {
        let gate: LatestOnly<&str> = LatestOnly::new();
        let r1 = gate.issue();
        let r2 = gate.issue();
        assert!(r2 > r1);

        assert!(gate.apply(r2, "second"));
        assert!(!gate.apply(r1, "first"));
        assert_eq!(gate.latest(), Some("second"));
        assert_eq!(gate.visible_generation(), Some(2));
    }

    #[test]
    fn test_stale_even_before_newer_applies() {
        let gate: LatestOnly<u32> = LatestOnly::new();
        let r1 = gate.issue();
        let _r2 = gate.issue();

        // r2 still in flight; r1 must not show up in the meantime
        assert!(!gate.apply(r1, 1));
        assert_eq!(gate.latest(), None);
    }

    /// Holds the very first fetch until released; later fetches return at once
    struct GatedProvider {
        records: Vec<RawRecord>,
        first: AtomicBool,
        fail_first: bool,
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl RecordProvider for GatedProvider {
        fn name(&self) -> &'static str {
            "local"
        }

        async fn fetch(&self, _query: &RecordQuery) -> std::result::Result<Vec<RawRecord>, ProviderError> {
            if self.first.swap(false, Ordering::SeqCst) {
                self.entered.notify_one();
                self.release.notified().await;
                if self.fail_first {
                    return Err(ProviderError::Request {
                        provider: "local",
                        message: "connection reset".into(),
                    });
                }
            }
            Ok(self.records.clone())
        }
    }

    #[tokio::test]
    async fn test_slow_first_request_is_discarded() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let provider = GatedProvider {
            records: vec![
                RawRecord::new(2023, 1, "SES-PR", "VACINA BCG", 10.0),
                RawRecord::new(2024, 1, "SES-SP", "VACINA BCG", 30.0),
            ],
            first: AtomicBool::new(true),
            fail_first: false,
            entered: Arc::clone(&entered),
            release: Arc::clone(&release),
        };

        let chain = ProviderChain::new().with(Arc::new(provider));
        let service = Arc::new(Service::new(Normalizer::builtin(), chain, ForecastEngine::new()));
        let session = Arc::new(DashboardSession::new(service));

        let r1_params = DashboardParams {
            uf: Some("PR".into()),
            ..Default::default()
        };
        let r2_params = DashboardParams {
            uf: Some("SP".into()),
            ..Default::default()
        };

        // R1 issued first, stuck in its first fetch
        let r1 = {
            let session = Arc::clone(&session);
            let params = r1_params.clone();
            tokio::spawn(async move { session.refresh(params).await })
        };
        entered.notified().await;

        // R2 issued later, completes first
        let r2 = session.refresh(r2_params.clone()).await.unwrap();
        assert_eq!(r2, RefreshOutcome::Applied(2));

        // R1 resolves after R2 and must be dropped
        release.notify_one();
        let r1 = r1.await.unwrap().unwrap();
        assert_eq!(r1, RefreshOutcome::Superseded);

        let view = session.view().unwrap();
        assert_eq!(view.params, r2_params);
        assert_eq!(view.overview.total_doses, 30.0);

        println!("✅ Stale refresh discarded: view shows the newest filters");
    }

    #[tokio::test]
    async fn test_failed_stale_request_is_discarded() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let provider = GatedProvider {
            records: vec![RawRecord::new(2024, 1, "SES-SP", "VACINA BCG", 30.0)],
            first: AtomicBool::new(true),
            fail_first: true,
            entered: Arc::clone(&entered),
            release: Arc::clone(&release),
        };

        let chain = ProviderChain::new().with(Arc::new(provider));
        let service = Arc::new(Service::new(Normalizer::builtin(), chain, ForecastEngine::new()));
        let session = Arc::new(DashboardSession::new(service));

        let r1 = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.refresh(DashboardParams::default()).await })
        };
        entered.notified().await;

        let r2_params = DashboardParams {
            uf: Some("SP".into()),
            ..Default::default()
        };
        let r2 = session.refresh(r2_params.clone()).await.unwrap();
        assert_eq!(r2, RefreshOutcome::Applied(2));

        // R1's provider now fails; the error belongs to a stale request
        release.notify_one();
        let r1 = r1.await.unwrap().unwrap();
        assert_eq!(r1, RefreshOutcome::Superseded);
        assert_eq!(session.view().unwrap().params, r2_params);
    }

    #[tokio::test]
    async fn test_refresh_fills_every_panel() {
        let chain = ProviderChain::new().with(Arc::new(crate::providers::tests::StaticProvider::new(
            crate::service::tests::sample_records(),
        )));
        let service = Arc::new(Service::new(Normalizer::builtin(), chain, ForecastEngine::new()));
        let session = DashboardSession::new(service);

        let params = DashboardParams {
            fabricante: Some("BCG".into()),
            ..Default::default()
        };
        assert_eq!(session.refresh(params).await.unwrap(), RefreshOutcome::Applied(1));

        let view = session.view().unwrap();
        assert_eq!(view.overview.total_doses, 1000.0);
        assert_eq!(view.timeseries.len(), 10);
        assert_eq!(view.ranking.len(), 2);
        assert_eq!(view.forecast[0].doses_previstas, Some(200.0));
    }
}
