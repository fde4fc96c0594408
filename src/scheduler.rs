//! Background refresh of the cached board.
//!
//! Re-values the portfolio of whoever currently owns the price cache on a
//! fixed period. Nobody owning the cache means there is nothing to refresh.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::service::PortfolioService;

/// Starts the refresh loop. The first refresh happens one `period` after
/// the call; abort the handle to stop it.
pub fn start_refresh_scheduler(service: Arc<PortfolioService>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Board refresh scheduler started ({:?} interval)", period);

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick is immediate, the board was just valued
        ticker.tick().await;

        loop {
            ticker.tick().await;
            run_scheduled_refresh(&service).await;
        }
    })
}

/// One refresh. Returns whether a valuation completed.
pub async fn run_scheduled_refresh(service: &PortfolioService) -> bool {
    let Some(owner) = service.cache().owner().await else {
        debug!("Scheduled refresh skipped: no board is open");
        return false;
    };

    match service.refresh_board(&owner).await {
        Ok(rows) => {
            info!(owner = %owner, "Scheduled refresh valued {} holdings", rows.len());
            true
        }
        Err(e) => {
            warn!(owner = %owner, "Scheduled refresh failed: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::investor::{Identity, Questionnaire};
    use crate::optimizer::{FakeOptimizer, OptimizerClient};
    use crate::preferences::InMemoryPreferenceStore;
    use crate::stocks::StaticQuoteSource;
    use crate::store::InMemoryPortfolioStore;
    use crate::valuation::ValuationEngine;

    async fn service_with_portfolio(email: &str) -> Arc<PortfolioService> {
        let service = PortfolioService::new(
            OptimizerClient::new(FakeOptimizer::returning(
                r#"{"selected_assets": ["AAA"], "weights": [1.0]}"#,
            )),
            Arc::new(InMemoryPortfolioStore::new()),
            Arc::new(InMemoryPreferenceStore::new()),
            Arc::new(StaticQuoteSource::new().with_price("AAA", 20.0)),
            ValuationEngine::new(Duration::ZERO),
        );
        let q = Questionnaire::new(Identity::parse(email).unwrap(), [1; 7], 5, 100.0, 1).unwrap();
        service.submit(q).await.unwrap();
        Arc::new(service)
    }

    #[tokio::test]
    async fn test_refresh_without_owner_is_skipped() {
        let service = service_with_portfolio("a@x.com").await;
        assert!(!run_scheduled_refresh(&service).await);
        assert!(service.cache().owner().await.is_none());
    }

    #[tokio::test]
    async fn test_refresh_failure_is_reported() {
        let service = service_with_portfolio("a@x.com").await;
        let stranger = Identity::parse("b@x.com").unwrap();
        service.cache().ticket(&stranger).await;
        assert!(!run_scheduled_refresh(&service).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_refreshes_current_owner() {
        let service = service_with_portfolio("a@x.com").await;
        let a = Identity::parse("a@x.com").unwrap();
        service.cache().ticket(&a).await;

        let handle = start_refresh_scheduler(service.clone(), Duration::from_secs(60));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(service.cache().get(&a).await.is_none());

        tokio::time::sleep(Duration::from_secs(31)).await;
        let cached = service.cache().get(&a).await.unwrap();
        assert_eq!(cached.rows[0].units_owned, Some(5.0));

        handle.abort();
    }
}
