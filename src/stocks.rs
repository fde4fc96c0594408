//! Live stock quotes and company profiles
//!
//! This module handles:
//! - The quote-source seam used by valuation ([`QuoteSource`])
//! - Finnhub's `/quote` and `/stock/profile2` endpoints
//! - A static source for tests and offline runs

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::debug;

use crate::error::{BoardError, BoardResult};

pub const FINNHUB_BASE_URL: &str = "https://finnhub.io/api/v1";

/// Current price and day change for one ticker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub price: Option<f64>,
    pub change_percent: Option<f64>,
}

/// Company name and market capitalization (millions, as Finnhub reports it).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompanyProfile {
    pub name: Option<String>,
    pub market_cap: Option<f64>,
}

/// Where valuation gets its prices. Each call may fail independently per symbol.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn quote(&self, symbol: &str) -> BoardResult<Quote>;

    async fn profile(&self, symbol: &str) -> BoardResult<CompanyProfile>;
}

#[derive(Debug, Deserialize)]
struct FinnhubQuote {
    /// current price
    c: Option<f64>,
    /// percent change
    dp: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FinnhubProfile {
    name: Option<String>,
    market_capitalization: Option<f64>,
}

pub struct FinnhubQuoteSource {
    client: Client,
    base_url: String,
    api_key: String,
}

impl FinnhubQuoteSource {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> BoardResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| BoardError::invalid(format!("could not build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, symbol: &str) -> BoardResult<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!(symbol, path, "Finnhub request");

        let resp = self
            .client
            .get(&url)
            .header("X-Finnhub-Token", &self.api_key)
            .query(&[("symbol", symbol)])
            .send()
            .await
            .map_err(|e| BoardError::quote_fetch(symbol, format!("request failed: {}", e)))?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::FORBIDDEN {
            return Err(BoardError::quote_fetch(symbol, format!("rate limited [CODE: {}]", status)));
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(BoardError::quote_fetch(
                symbol,
                format!("[CODE: {}]: {}", status, text),
            ));
        }

        resp.json::<T>()
            .await
            .map_err(|e| BoardError::quote_fetch(symbol, format!("bad response body: {}", e)))
    }
}

#[async_trait]
impl QuoteSource for FinnhubQuoteSource {
    async fn quote(&self, symbol: &str) -> BoardResult<Quote> {
        let q: FinnhubQuote = self.get_json("/quote", symbol).await?;
        Ok(Quote {
            price: q.c,
            change_percent: q.dp,
        })
    }

    async fn profile(&self, symbol: &str) -> BoardResult<CompanyProfile> {
        let p: FinnhubProfile = self.get_json("/stock/profile2", symbol).await?;
        Ok(CompanyProfile {
            // unknown tickers come back as an empty object
            name: p.name.filter(|n| !n.trim().is_empty()),
            market_cap: p.market_capitalization,
        })
    }
}

/// Fixed quotes, for tests and for running the board without network access.
#[derive(Debug, Clone, Default)]
pub struct StaticQuoteSource {
    quotes: HashMap<String, Quote>,
    profiles: HashMap<String, CompanyProfile>,
    failing_quotes: HashSet<String>,
    failing_profiles: HashSet<String>,
}

impl StaticQuoteSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(mut self, symbol: &str, price: f64) -> Self {
        self.quotes.insert(
            symbol.to_string(),
            Quote {
                price: Some(price),
                change_percent: Some(0.0),
            },
        );
        self
    }

    pub fn with_quote(mut self, symbol: &str, quote: Quote) -> Self {
        self.quotes.insert(symbol.to_string(), quote);
        self
    }

    pub fn with_profile(mut self, symbol: &str, name: &str, market_cap: f64) -> Self {
        self.profiles.insert(
            symbol.to_string(),
            CompanyProfile {
                name: Some(name.to_string()),
                market_cap: Some(market_cap),
            },
        );
        self
    }

    pub fn failing_quote(mut self, symbol: &str) -> Self {
        self.failing_quotes.insert(symbol.to_string());
        self
    }

    pub fn failing_profile(mut self, symbol: &str) -> Self {
        self.failing_profiles.insert(symbol.to_string());
        self
    }
}

#[async_trait]
impl QuoteSource for StaticQuoteSource {
    async fn quote(&self, symbol: &str) -> BoardResult<Quote> {
        if self.failing_quotes.contains(symbol) {
            return Err(BoardError::quote_fetch(symbol, "quote endpoint unavailable"));
        }
        self.quotes
            .get(symbol)
            .cloned()
            .ok_or_else(|| BoardError::quote_fetch(symbol, "unknown symbol"))
    }

    async fn profile(&self, symbol: &str) -> BoardResult<CompanyProfile> {
        if self.failing_profiles.contains(symbol) {
            return Err(BoardError::quote_fetch(symbol, "profile endpoint unavailable"));
        }
        Ok(self.profiles.get(symbol).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl<T: QuoteSource + ?Sized> QuoteSource for std::sync::Arc<T> {
    async fn quote(&self, symbol: &str) -> BoardResult<Quote> {
        (**self).quote(symbol).await
    }

    async fn profile(&self, symbol: &str) -> BoardResult<CompanyProfile> {
        (**self).profile(symbol).await
    }
}
