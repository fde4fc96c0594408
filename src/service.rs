//! The portfolio pipeline as one service: questionnaire in, board out.

use std::sync::Arc;
use tracing::{error, info, warn};

use crate::cache::PriceCache;
use crate::config::Config;
use crate::error::BoardResult;
use crate::investor::{Identity, Questionnaire};
use crate::optimizer::{OptimizerClient, SubprocessOptimizer};
use crate::portfolio::Portfolio;
use crate::preferences::{CsvPreferenceStore, PreferenceStore};
use crate::stocks::{FinnhubQuoteSource, QuoteSource};
use crate::store::{JsonPortfolioStore, PortfolioStore};
use crate::valuation::{rebase_units, ValuationEngine, ValuationRow};

/// What a successful submission produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub identity: Identity,
    pub score: i64,
    pub lambda: f64,
    pub portfolio: Portfolio,
}

pub struct PortfolioService {
    optimizer: OptimizerClient,
    portfolios: Arc<dyn PortfolioStore>,
    preferences: Arc<dyn PreferenceStore>,
    quotes: Arc<dyn QuoteSource>,
    engine: ValuationEngine,
    cache: PriceCache,
}

impl PortfolioService {
    pub fn new(
        optimizer: OptimizerClient,
        portfolios: Arc<dyn PortfolioStore>,
        preferences: Arc<dyn PreferenceStore>,
        quotes: Arc<dyn QuoteSource>,
        engine: ValuationEngine,
    ) -> Self {
        Self {
            optimizer,
            portfolios,
            preferences,
            quotes,
            engine,
            cache: PriceCache::new(),
        }
    }

    /// File-backed stores under the data directory, the subprocess optimizer
    /// and Finnhub quotes.
    pub fn from_config(config: &Config) -> BoardResult<Self> {
        let optimizer = OptimizerClient::new(SubprocessOptimizer::new(
            config.optimizer_program.clone(),
            config.optimizer_script.clone(),
            config.optimizer_timeout,
        ));
        let quotes = FinnhubQuoteSource::new(&config.finnhub_base_url, &config.finnhub_api_key)?;
        if config.finnhub_api_key.is_empty() {
            warn!("FINNHUB_API_KEY is not set, quote requests will be rejected");
        }

        Ok(Self::new(
            optimizer,
            Arc::new(JsonPortfolioStore::new(config.portfolios_path())),
            Arc::new(CsvPreferenceStore::new(config.preferences_path())),
            Arc::new(quotes),
            ValuationEngine::new(config.quote_delay),
        ))
    }

    pub fn cache(&self) -> &PriceCache {
        &self.cache
    }

    /// Score the questionnaire, build a portfolio and persist both.
    ///
    /// Nothing is written unless the optimizer produced a valid portfolio,
    /// so a failed build leaves any previous records in place. The portfolio
    /// is written first and put back if the answers cannot be saved.
    pub async fn submit(&self, questionnaire: Questionnaire) -> BoardResult<Submission> {
        questionnaire.validate()?;
        let score = questionnaire.score();
        let lambda = questionnaire.risk_aversion();
        info!(
            identity = %questionnaire.identity,
            score,
            lambda,
            "Building portfolio"
        );

        let portfolio = self
            .optimizer
            .build(lambda, questionnaire.horizon_years, questionnaire.portfolio_size)
            .await?;

        let identity = &questionnaire.identity;
        let previous = match self.portfolios.load(identity).await {
            Ok(p) => Some(p),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        self.portfolios.save(identity, &portfolio).await?;
        if let Err(e) = self.preferences.save(&questionnaire).await {
            self.restore_portfolio(identity, previous).await;
            return Err(e);
        }
        // cost bases survive, rows of the replaced portfolio do not
        self.cache.discard_rows(identity).await;
        info!(
            identity = %questionnaire.identity,
            "Saved portfolio of {} assets",
            portfolio.len()
        );

        Ok(Submission {
            identity: questionnaire.identity,
            score,
            lambda,
            portfolio,
        })
    }

    async fn restore_portfolio(&self, identity: &Identity, previous: Option<Portfolio>) {
        let restored = match &previous {
            Some(p) => self.portfolios.save(identity, p).await,
            None => self.portfolios.delete(identity).await,
        };
        match restored {
            Ok(()) => warn!(identity = %identity, "Preferences not saved, portfolio rolled back"),
            Err(e) => error!(identity = %identity, "Could not roll back portfolio: {}", e),
        }
    }

    pub async fn portfolio(&self, identity: &Identity) -> BoardResult<Portfolio> {
        self.portfolios.load(identity).await
    }

    pub async fn preferences(&self, identity: &Identity) -> BoardResult<Questionnaire> {
        self.preferences.load(identity).await
    }

    pub async fn owners(&self) -> BoardResult<Vec<Identity>> {
        self.portfolios.owners().await
    }

    /// Remove the portfolio, the questionnaire answers and any cached board.
    pub async fn delete_portfolio(&self, identity: &Identity) -> BoardResult<()> {
        self.portfolios.delete(identity).await?;
        if !self.preferences.delete(identity).await? {
            warn!(identity = %identity, "Portfolio had no saved preferences");
        }
        self.cache.clear_for(identity).await;
        info!(identity = %identity, "Deleted portfolio");
        Ok(())
    }

    /// The board for `identity`: cached rows if this identity owns the
    /// cache, otherwise a fresh valuation.
    pub async fn board(&self, identity: &Identity) -> BoardResult<Vec<ValuationRow>> {
        self.cache.invalidate_if_owner_changed(identity).await;
        if let Some(cached) = self.cache.get(identity).await {
            let initial = self.preferences.load(identity).await?.initial_investment;
            return Ok(rebase_units(&cached.rows, initial));
        }
        self.refresh_board(identity).await
    }

    pub async fn refresh_board(&self, identity: &Identity) -> BoardResult<Vec<ValuationRow>> {
        let portfolio = self.portfolios.load(identity).await?;
        let initial = self.preferences.load(identity).await?.initial_investment;
        self.engine
            .valuate(identity, &portfolio, initial, self.quotes.as_ref(), &self.cache)
            .await
    }

    pub async fn logout(&self, identity: &Identity) {
        if self.cache.clear_for(identity).await {
            info!(identity = %identity, "Cleared cached board on logout");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoardError;
    use crate::optimizer::FakeOptimizer;
    use crate::preferences::InMemoryPreferenceStore;
    use crate::stocks::StaticQuoteSource;
    use crate::store::InMemoryPortfolioStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    const AAA_BBB: &str = r#"{"selected_assets": ["AAA", "BBB"], "weights": [0.6, 0.4]}"#;

    struct Harness {
        service: PortfolioService,
        optimizer: Arc<FakeOptimizer>,
        portfolios: Arc<InMemoryPortfolioStore>,
        preferences: Arc<InMemoryPreferenceStore>,
    }

    fn harness(optimizer: FakeOptimizer, quotes: StaticQuoteSource) -> Harness {
        let optimizer = Arc::new(optimizer);
        let portfolios = Arc::new(InMemoryPortfolioStore::new());
        let preferences = Arc::new(InMemoryPreferenceStore::new());
        let service = PortfolioService::new(
            OptimizerClient::new(optimizer.clone()),
            portfolios.clone(),
            preferences.clone(),
            Arc::new(quotes),
            ValuationEngine::new(Duration::ZERO),
        );
        Harness {
            service,
            optimizer,
            portfolios,
            preferences,
        }
    }

    fn quotes() -> StaticQuoteSource {
        StaticQuoteSource::new()
            .with_price("AAA", 12.0)
            .with_profile("AAA", "Alpha Corp", 1500.0)
            .with_price("BBB", 16.0)
            .with_profile("BBB", "Beta Ltd", 800.0)
    }

    fn id(email: &str) -> Identity {
        Identity::parse(email).unwrap()
    }

    fn questionnaire(email: &str, investment: f64) -> Questionnaire {
        Questionnaire::new(id(email), [1, 1, 1, 1, 1, 1, 1], 10, investment, 2).unwrap()
    }

    #[tokio::test]
    async fn test_submit_scores_builds_and_persists() {
        let h = harness(FakeOptimizer::returning(AAA_BBB), quotes());
        let submission = h.service.submit(questionnaire("a@x.com", 1000.0)).await.unwrap();

        assert_eq!(submission.score, 7);
        assert_eq!(submission.lambda, 1.0);
        assert_eq!(h.optimizer.last_args(), Some((1.0, 10, 2)));
        assert_eq!(h.portfolios.load(&id("a@x.com")).await.unwrap(), submission.portfolio);
        assert_eq!(
            h.preferences.load(&id("a@x.com")).await.unwrap().initial_investment,
            1000.0
        );
    }

    #[tokio::test]
    async fn test_failed_build_leaves_previous_records() {
        let h = harness(FakeOptimizer::returning(AAA_BBB), quotes());
        h.service.submit(questionnaire("a@x.com", 1000.0)).await.unwrap();

        h.optimizer.set_response("Traceback (most recent call last):");
        let err = h.service.submit(questionnaire("a@x.com", 5000.0)).await.unwrap_err();
        assert!(matches!(err, BoardError::OptimizerUnavailable { .. }));

        let kept = h.service.portfolio(&id("a@x.com")).await.unwrap();
        assert_eq!(kept.selected_assets(), &["AAA".to_string(), "BBB".to_string()]);
        assert_eq!(
            h.service.preferences(&id("a@x.com")).await.unwrap().initial_investment,
            1000.0
        );
    }

    #[tokio::test]
    async fn test_contract_violation_writes_nothing() {
        let h = harness(
            FakeOptimizer::returning(r#"{"selected_assets": ["AAA"], "weights": [0.5, 0.5]}"#),
            quotes(),
        );
        let err = h.service.submit(questionnaire("a@x.com", 1000.0)).await.unwrap_err();
        assert!(matches!(err, BoardError::OptimizerContractViolation(_)));
        assert!(h.service.owners().await.unwrap().is_empty());
        assert!(h.service.preferences(&id("a@x.com")).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_board_values_and_caches() {
        let h = harness(FakeOptimizer::returning(AAA_BBB), quotes());
        let a = id("a@x.com");
        h.service.submit(questionnaire("a@x.com", 1000.0)).await.unwrap();

        let rows = h.service.board(&a).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].units_owned, Some(50.0));
        assert_eq!(rows[1].units_owned, Some(25.0));
        assert_eq!(rows[0].company_name, "Alpha Corp");
        assert!(h.service.cache().get(&a).await.is_some());
    }

    #[tokio::test]
    async fn test_resubmission_revalues_with_new_investment() {
        let h = harness(FakeOptimizer::returning(AAA_BBB), quotes());
        let a = id("a@x.com");
        h.service.submit(questionnaire("a@x.com", 1000.0)).await.unwrap();
        h.service.board(&a).await.unwrap();

        h.service.submit(questionnaire("a@x.com", 2000.0)).await.unwrap();
        let rows = h.service.board(&a).await.unwrap();
        assert_eq!(rows[0].units_owned, Some(100.0));
        assert_eq!(rows[1].units_owned, Some(50.0));
    }

    /// Wraps an in-memory store; `save` fails while `broken` is set.
    #[derive(Default)]
    struct FlakyPortfolioStore {
        inner: InMemoryPortfolioStore,
        broken: AtomicBool,
    }

    #[async_trait]
    impl PortfolioStore for FlakyPortfolioStore {
        async fn save(&self, identity: &Identity, portfolio: &Portfolio) -> BoardResult<()> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(BoardError::StoreWriteFailure("disk full".to_string()));
            }
            self.inner.save(identity, portfolio).await
        }

        async fn load(&self, identity: &Identity) -> BoardResult<Portfolio> {
            self.inner.load(identity).await
        }

        async fn delete(&self, identity: &Identity) -> BoardResult<()> {
            self.inner.delete(identity).await
        }

        async fn owners(&self) -> BoardResult<Vec<Identity>> {
            self.inner.owners().await
        }
    }

    #[derive(Default)]
    struct FlakyPreferenceStore {
        inner: InMemoryPreferenceStore,
        broken: AtomicBool,
    }

    #[async_trait]
    impl PreferenceStore for FlakyPreferenceStore {
        async fn save(&self, questionnaire: &Questionnaire) -> BoardResult<()> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(BoardError::StoreWriteFailure("disk full".to_string()));
            }
            self.inner.save(questionnaire).await
        }

        async fn load(&self, identity: &Identity) -> BoardResult<Questionnaire> {
            self.inner.load(identity).await
        }

        async fn delete(&self, identity: &Identity) -> BoardResult<bool> {
            self.inner.delete(identity).await
        }
    }

    fn flaky_service(
        optimizer: Arc<FakeOptimizer>,
        portfolios: Arc<FlakyPortfolioStore>,
        preferences: Arc<FlakyPreferenceStore>,
    ) -> PortfolioService {
        PortfolioService::new(
            OptimizerClient::new(optimizer),
            portfolios,
            preferences,
            Arc::new(quotes()),
            ValuationEngine::new(Duration::ZERO),
        )
    }

    #[tokio::test]
    async fn test_resubmission_with_new_assets_replaces_board() {
        let h = harness(
            FakeOptimizer::returning(AAA_BBB),
            quotes().with_price("CCC", 40.0),
        );
        let a = id("a@x.com");
        h.service.submit(questionnaire("a@x.com", 1000.0)).await.unwrap();
        h.service.board(&a).await.unwrap();

        h.optimizer
            .set_response(r#"{"selected_assets": ["CCC"], "weights": [1.0]}"#);
        h.service.submit(questionnaire("a@x.com", 1000.0)).await.unwrap();

        let rows = h.service.board(&a).await.unwrap();
        let symbols: Vec<&str> = rows.iter().map(|r| r.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["CCC"]);
        assert_eq!(rows[0].units_owned, Some(25.0));
        // cost basis of a dropped holding is still remembered
        assert_eq!(h.service.cache().price_buy(&a, "AAA").await, Some(12.0));
    }

    #[tokio::test]
    async fn test_failed_portfolio_write_keeps_previous_answers() {
        let optimizer = Arc::new(FakeOptimizer::returning(AAA_BBB));
        let portfolios = Arc::new(FlakyPortfolioStore::default());
        let preferences = Arc::new(FlakyPreferenceStore::default());
        let service = flaky_service(optimizer, portfolios.clone(), preferences.clone());
        let a = id("a@x.com");
        service.submit(questionnaire("a@x.com", 1000.0)).await.unwrap();

        portfolios.broken.store(true, Ordering::SeqCst);
        let err = service.submit(questionnaire("a@x.com", 5000.0)).await.unwrap_err();
        assert!(matches!(err, BoardError::StoreWriteFailure(_)));
        assert_eq!(service.preferences(&a).await.unwrap().initial_investment, 1000.0);
    }

    #[tokio::test]
    async fn test_failed_answers_write_rolls_back_portfolio() {
        let optimizer = Arc::new(FakeOptimizer::returning(AAA_BBB));
        let portfolios = Arc::new(FlakyPortfolioStore::default());
        let preferences = Arc::new(FlakyPreferenceStore::default());
        let service = flaky_service(optimizer.clone(), portfolios.clone(), preferences.clone());
        let a = id("a@x.com");
        service.submit(questionnaire("a@x.com", 1000.0)).await.unwrap();

        preferences.broken.store(true, Ordering::SeqCst);
        optimizer.set_response(r#"{"selected_assets": ["CCC"], "weights": [1.0]}"#);
        let err = service.submit(questionnaire("a@x.com", 5000.0)).await.unwrap_err();
        assert!(matches!(err, BoardError::StoreWriteFailure(_)));

        let kept = service.portfolio(&a).await.unwrap();
        assert_eq!(kept.selected_assets(), &["AAA".to_string(), "BBB".to_string()]);
        assert_eq!(service.preferences(&a).await.unwrap().initial_investment, 1000.0);

        // a first submission that fails leaves no portfolio behind
        let b = id("b@x.com");
        assert!(service.submit(questionnaire("b@x.com", 10.0)).await.is_err());
        assert!(service.portfolio(&b).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_board_for_other_user_switches_cache_owner() {
        let h = harness(FakeOptimizer::returning(AAA_BBB), quotes());
        let a = id("a@x.com");
        let b = id("b@x.com");
        h.service.submit(questionnaire("a@x.com", 1000.0)).await.unwrap();
        h.service.submit(questionnaire("b@x.com", 500.0)).await.unwrap();

        h.service.board(&a).await.unwrap();
        let rows = h.service.board(&b).await.unwrap();
        assert_eq!(rows[0].units_owned, Some(25.0));
        assert_eq!(h.service.cache().owner().await, Some(b.clone()));
        assert!(h.service.cache().get(&a).await.is_none());
    }

    #[tokio::test]
    async fn test_board_without_portfolio_is_not_found() {
        let h = harness(FakeOptimizer::returning(AAA_BBB), quotes());
        let err = h.service.board(&id("nobody@x.com")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_removes_everything() {
        let h = harness(FakeOptimizer::returning(AAA_BBB), quotes());
        let a = id("a@x.com");
        h.service.submit(questionnaire("a@x.com", 1000.0)).await.unwrap();
        h.service.board(&a).await.unwrap();

        h.service.delete_portfolio(&a).await.unwrap();
        assert!(h.service.portfolio(&a).await.unwrap_err().is_not_found());
        assert!(h.service.preferences(&a).await.unwrap_err().is_not_found());
        assert!(h.service.cache().owner().await.is_none());

        assert!(h.service.delete_portfolio(&a).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_logout_clears_only_own_cache() {
        let h = harness(FakeOptimizer::returning(AAA_BBB), quotes());
        let a = id("a@x.com");
        h.service.submit(questionnaire("a@x.com", 1000.0)).await.unwrap();
        h.service.board(&a).await.unwrap();

        h.service.logout(&id("b@x.com")).await;
        assert!(h.service.cache().get(&a).await.is_some());
        h.service.logout(&a).await;
        assert!(h.service.cache().get(&a).await.is_none());
    }
}
