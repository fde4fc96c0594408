use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{BoardError, BoardResult};

/// How far the weights may drift from summing to exactly 1.
pub const WEIGHT_TOLERANCE: f64 = 1e-3;

/// A constructed portfolio: tickers and a parallel list of weights.
///
/// The JSON field names are the optimizer's output names, and the same
/// document is what gets persisted per user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    selected_assets: Vec<String>,
    weights: Vec<f64>,
}

impl Portfolio {
    pub fn new(selected_assets: Vec<String>, weights: Vec<f64>) -> BoardResult<Self> {
        let portfolio = Portfolio {
            selected_assets,
            weights,
        };
        portfolio.check()?;
        Ok(portfolio)
    }

    /// Validate the invariants. Violations are reported as the optimizer
    /// breaking its contract since that is the only producer of portfolios.
    pub fn check(&self) -> BoardResult<()> {
        if self.selected_assets.len() != self.weights.len() {
            return Err(BoardError::OptimizerContractViolation(format!(
                "{} assets but {} weights",
                self.selected_assets.len(),
                self.weights.len()
            )));
        }
        if self.selected_assets.is_empty() {
            return Err(BoardError::OptimizerContractViolation(
                "portfolio has no assets".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for ticker in &self.selected_assets {
            if ticker.trim().is_empty() {
                return Err(BoardError::OptimizerContractViolation(
                    "empty ticker symbol".to_string(),
                ));
            }
            if !seen.insert(ticker.as_str()) {
                return Err(BoardError::OptimizerContractViolation(format!(
                    "duplicate ticker {}",
                    ticker
                )));
            }
        }

        if let Some((ticker, w)) = self
            .holdings()
            .find(|(_, w)| !w.is_finite() || *w < 0.0)
        {
            return Err(BoardError::OptimizerContractViolation(format!(
                "weight {} for {} is not a non-negative number",
                w, ticker
            )));
        }

        let total: f64 = self.weights.iter().sum();
        if (total - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(BoardError::OptimizerContractViolation(format!(
                "weights sum to {:.6}, expected 1",
                total
            )));
        }
        Ok(())
    }

    pub fn selected_assets(&self) -> &[String] {
        &self.selected_assets
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn len(&self) -> usize {
        self.selected_assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected_assets.is_empty()
    }

    /// `(symbol, weight)` pairs in portfolio order.
    pub fn holdings(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.selected_assets
            .iter()
            .map(String::as_str)
            .zip(self.weights.iter().copied())
    }

    pub fn weight_of(&self, symbol: &str) -> Option<f64> {
        self.holdings().find(|(t, _)| *t == symbol).map(|(_, w)| w)
    }

    /// Currency amount assigned to each holding for a given initial investment.
    pub fn allocations(&self, initial_investment: f64) -> Vec<(String, f64)> {
        self.holdings()
            .map(|(ticker, w)| (ticker.to_string(), initial_investment * w))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tickers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_valid_portfolio_keeps_order() {
        let p = Portfolio::new(tickers(&["MSFT", "AAPL", "KO"]), vec![0.5, 0.3, 0.2]).unwrap();
        let order: Vec<&str> = p.holdings().map(|(t, _)| t).collect();
        assert_eq!(order, vec!["MSFT", "AAPL", "KO"]);
        assert_eq!(p.weight_of("AAPL"), Some(0.3));
        assert_eq!(p.weight_of("XOM"), None);
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let err = Portfolio::new(tickers(&["A", "B"]), vec![1.0]).unwrap_err();
        assert!(matches!(err, BoardError::OptimizerContractViolation(_)));
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        assert!(Portfolio::new(tickers(&["A", "B"]), vec![0.5, 0.4]).is_err());
        assert!(Portfolio::new(tickers(&["A", "B"]), vec![0.6, 0.3999]).is_ok());
    }

    #[test]
    fn test_negative_and_nan_weights_rejected() {
        assert!(Portfolio::new(tickers(&["A", "B"]), vec![1.2, -0.2]).is_err());
        assert!(Portfolio::new(tickers(&["A", "B"]), vec![f64::NAN, 1.0]).is_err());
    }

    #[test]
    fn test_duplicate_tickers_rejected() {
        assert!(Portfolio::new(tickers(&["A", "A"]), vec![0.5, 0.5]).is_err());
    }

    #[test]
    fn test_allocations_add_up_to_investment() {
        let p = Portfolio::new(tickers(&["AAA", "BBB"]), vec![0.6, 0.4]).unwrap();
        let alloc = p.allocations(1000.0);
        let total: f64 = alloc.iter().map(|(_, v)| v).sum();
        assert!((total - 1000.0).abs() < 1e-9);
        assert!((alloc[0].1 - 600.0).abs() < 1e-9);
    }

    #[test]
    fn test_json_shape_matches_optimizer_output() {
        let p = Portfolio::new(tickers(&["AAA", "BBB"]), vec![0.6, 0.4]).unwrap();
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["selected_assets"][1], "BBB");
        assert_eq!(json["weights"][0], 0.6);
    }
}
