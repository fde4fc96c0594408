//! Mark-to-market valuation of a stored portfolio
//!
//! For each holding, in portfolio order, one quote and one profile are
//! requested, the first usable price seen for the symbol is anchored as its
//! cost basis (`priceBuy`) in the [`PriceCache`], and a row is emitted.
//! Symbols are processed one at a time with a fixed pause in between to stay
//! under the quote source's request rate.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

use crate::cache::{CacheTicket, PriceCache};
use crate::error::{BoardError, BoardResult};
use crate::investor::Identity;
use crate::portfolio::Portfolio;
use crate::stocks::{CompanyProfile, QuoteSource};

/// Pause between two symbols. Finnhub's free tier allows 60 calls a minute
/// and each symbol costs two.
pub const DEFAULT_QUOTE_DELAY: Duration = Duration::from_millis(300);

/// One line of the valuation board.
///
/// Unavailable values are `None` and serialize as `null`; they are never
/// folded into zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValuationRow {
    pub symbol: String,
    pub company_name: String,
    pub price: Option<f64>,
    pub change_percent: Option<f64>,
    pub market_cap: Option<f64>,
    pub weight_in_portfolio: f64,
    /// Not computed. The intended definition has not been settled, so the
    /// column stays unavailable rather than guessed.
    #[serde(rename = "weightedChangeUSD")]
    pub weighted_change_usd: Option<f64>,
    pub units_owned: Option<f64>,
    pub price_buy: Option<f64>,
}

impl ValuationRow {
    /// Value of the position at the current price.
    pub fn market_value(&self) -> Option<f64> {
        Some(self.units_owned? * usable_price(self.price)?)
    }

    /// Price move since the cost basis was anchored, in percent.
    pub fn change_since_buy(&self) -> Option<f64> {
        let now = usable_price(self.price)?;
        let then = usable_price(self.price_buy)?;
        Some((now - then) / then * 100.0)
    }
}

/// A price we can divide by.
pub fn usable_price(price: Option<f64>) -> Option<f64> {
    price.filter(|p| p.is_finite() && *p > 0.0)
}

/// `initial · weight / price`, or `None` when the price is missing, zero or
/// not finite.
pub fn units_owned(initial_investment: f64, weight: f64, price: Option<f64>) -> Option<f64> {
    let price = usable_price(price)?;
    Some(initial_investment * weight / price).filter(|u| u.is_finite())
}

/// Recompute units for rows that were valued against another initial
/// investment (cached rows are re-based when the stored amount is re-read).
pub fn rebase_units(rows: &[ValuationRow], initial_investment: f64) -> Vec<ValuationRow> {
    rows.iter()
        .map(|row| ValuationRow {
            units_owned: units_owned(initial_investment, row.weight_in_portfolio, row.price),
            ..row.clone()
        })
        .collect()
}

/// Text for a value that may be unavailable.
pub fn display_value(value: Option<f64>, decimals: usize) -> String {
    match value {
        Some(v) => format!("{:.*}", decimals, v),
        None => "N/A".to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct ValuationEngine {
    delay: Duration,
}

impl Default for ValuationEngine {
    fn default() -> Self {
        Self::new(DEFAULT_QUOTE_DELAY)
    }
}

impl ValuationEngine {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Value `portfolio` for `identity` and store the rows in `cache`.
    ///
    /// A symbol whose quote cannot be fetched is left out; the call only
    /// fails when not a single row could be produced. If the cache changed
    /// owner while this ran, the rows are still returned but not cached.
    pub async fn valuate(
        &self,
        identity: &Identity,
        portfolio: &Portfolio,
        initial_investment: f64,
        quotes: &dyn QuoteSource,
        cache: &PriceCache,
    ) -> BoardResult<Vec<ValuationRow>> {
        if !initial_investment.is_finite() || initial_investment < 0.0 {
            return Err(BoardError::invalid(format!(
                "initial investment {} is not a usable amount",
                initial_investment
            )));
        }

        let ticket = cache.ticket(identity).await;
        let rows = self
            .valuate_rows(&ticket, portfolio, initial_investment, quotes, cache)
            .await?;

        if !cache.commit(ticket, rows.clone()).await {
            info!(owner = %identity, "Cache changed owner during valuation, result not cached");
        }
        Ok(rows)
    }

    async fn valuate_rows(
        &self,
        ticket: &CacheTicket,
        portfolio: &Portfolio,
        initial_investment: f64,
        quotes: &dyn QuoteSource,
        cache: &PriceCache,
    ) -> BoardResult<Vec<ValuationRow>> {
        let mut rows = Vec::with_capacity(portfolio.len());
        let mut failed = 0usize;

        for (i, (symbol, weight)) in portfolio.holdings().enumerate() {
            if i > 0 && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            let (quote, profile) = tokio::join!(quotes.quote(symbol), quotes.profile(symbol));

            let quote = match quote {
                Ok(q) => q,
                Err(e) => {
                    warn!(symbol, "Skipping holding: {}", e);
                    failed += 1;
                    continue;
                }
            };
            let profile = profile.unwrap_or_else(|e| {
                warn!(symbol, "Profile unavailable, using ticker as name: {}", e);
                CompanyProfile::default()
            });

            let price = quote.price.filter(|p| p.is_finite());
            let price_buy = match usable_price(price) {
                Some(p) => Some(cache.record_price_buy(ticket, symbol, p).await.unwrap_or(p)),
                None => cache.anchored_price_buy(ticket, symbol).await,
            };

            rows.push(ValuationRow {
                symbol: symbol.to_string(),
                company_name: profile.name.unwrap_or_else(|| symbol.to_string()),
                price,
                change_percent: quote.change_percent.filter(|c| c.is_finite()),
                market_cap: profile.market_cap.filter(|m| m.is_finite()),
                weight_in_portfolio: weight,
                weighted_change_usd: None,
                units_owned: units_owned(initial_investment, weight, price),
                price_buy,
            });
        }

        info!(
            owner = %ticket.owner(),
            "Valuation complete: {} ok, {} failed",
            rows.len(),
            failed
        );

        if rows.is_empty() && !portfolio.is_empty() {
            return Err(BoardError::QuoteSourceUnavailable {
                attempted: portfolio.len(),
            });
        }
        Ok(rows)
    }
}
