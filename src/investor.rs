//! Investor questionnaire and risk-aversion scoring
//!
//! A submitted questionnaire is one fixed-shape row: the investor's email,
//! seven scored answers, then horizon, initial investment and portfolio size.
//! The seven answers sum to a score which maps affinely onto the optimizer's
//! risk-aversion parameter λ.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{BoardError, BoardResult};

/// Slope `c` of `λ = 1 + c·(score − k)`.
pub const LAMBDA_SLOPE: f64 = 0.142857;
/// Pivot `k`: seven answers of 1 give λ = 1.
pub const LAMBDA_PIVOT: i64 = 7;

pub const SCORED_ANSWERS: usize = 7;
pub const ROW_WIDTH: usize = 11;

/// Column names of a stored questionnaire row, in order.
pub const PREFERENCE_HEADER: [&str; ROW_WIDTH] = [
    "Email",
    "Familiarity",
    "Portfolio Drop",
    "Risk Investment",
    "Volatility",
    "Drawdown 1 Month",
    "Drawdown 2 Months",
    "Drawdown 3 Months",
    "Investment Horizon",
    "Initial Investment",
    "Portfolio Size",
];

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@,]+@[^\s@,]+\.[^\s@,]+$").expect("static email pattern"));

/// A validated user identity (the email the auth layer bound the credential to).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    pub fn parse(raw: &str) -> BoardResult<Self> {
        let email = raw.trim();
        if email.is_empty() {
            return Err(BoardError::invalid("email is required"));
        }
        if !EMAIL_RE.is_match(email) {
            return Err(BoardError::invalid(format!("'{}' is not an email address", email)));
        }
        Ok(Identity(email.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Identity {
    type Error = BoardError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Identity::parse(&value)
    }
}

impl From<Identity> for String {
    fn from(id: Identity) -> Self {
        id.0
    }
}

/// One questionnaire submission. Immutable once built; a new submission for
/// the same identity replaces it wholesale.
#[derive(Debug, Clone, PartialEq)]
pub struct Questionnaire {
    pub identity: Identity,
    pub answers: [i64; SCORED_ANSWERS],
    pub horizon_years: u32,
    pub initial_investment: f64,
    pub portfolio_size: u32,
}

impl Questionnaire {
    pub fn new(
        identity: Identity,
        answers: [i64; SCORED_ANSWERS],
        horizon_years: u32,
        initial_investment: f64,
        portfolio_size: u32,
    ) -> BoardResult<Self> {
        let q = Questionnaire {
            identity,
            answers,
            horizon_years,
            initial_investment,
            portfolio_size,
        };
        q.validate()?;
        Ok(q)
    }

    /// Parse a stored or submitted row. Cells are trimmed; answers are not
    /// range-checked, only required to be integers.
    pub fn from_row<S: AsRef<str>>(row: &[S]) -> BoardResult<Self> {
        if row.len() != ROW_WIDTH {
            return Err(BoardError::invalid(format!(
                "questionnaire row has {} fields, expected {}",
                row.len(),
                ROW_WIDTH
            )));
        }
        let cell = |i: usize| row[i].as_ref().trim();

        let identity = Identity::parse(cell(0))?;
        let mut answers = [0i64; SCORED_ANSWERS];
        for (i, slot) in answers.iter_mut().enumerate() {
            *slot = Self::parse_field(cell(i + 1), PREFERENCE_HEADER[i + 1])?;
        }
        let horizon_years = Self::parse_field(cell(8), PREFERENCE_HEADER[8])?;
        let initial_investment = Self::parse_field(cell(9), PREFERENCE_HEADER[9])?;
        let portfolio_size = Self::parse_field(cell(10), PREFERENCE_HEADER[10])?;

        Self::new(identity, answers, horizon_years, initial_investment, portfolio_size)
    }

    pub fn to_row(&self) -> Vec<String> {
        let mut row = Vec::with_capacity(ROW_WIDTH);
        row.push(self.identity.to_string());
        row.extend(self.answers.iter().map(|a| a.to_string()));
        row.push(self.horizon_years.to_string());
        row.push(self.initial_investment.to_string());
        row.push(self.portfolio_size.to_string());
        row
    }

    pub fn validate(&self) -> BoardResult<()> {
        if self.horizon_years == 0 {
            return Err(BoardError::invalid("investment horizon must be at least one year"));
        }
        if self.portfolio_size == 0 {
            return Err(BoardError::invalid("portfolio size must be at least one asset"));
        }
        if !self.initial_investment.is_finite() || self.initial_investment < 0.0 {
            return Err(BoardError::invalid(format!(
                "initial investment {} is not a usable amount",
                self.initial_investment
            )));
        }
        Ok(())
    }

    pub fn score(&self) -> i64 {
        score(&self.answers)
    }

    pub fn risk_aversion(&self) -> f64 {
        risk_aversion(self.score())
    }

    fn parse_field<T: std::str::FromStr>(text: &str, column: &str) -> BoardResult<T> {
        text.parse()
            .map_err(|_| BoardError::invalid(format!("{} must be numeric, got '{}'", column, text)))
    }
}

/// Sum of the scored answers. Out-of-range answers are kept as-is; the sum
/// saturates instead of overflowing.
pub fn score(answers: &[i64]) -> i64 {
    answers.iter().fold(0i64, |acc, a| acc.saturating_add(*a))
}

/// `λ = 1 + c·(score − k)`. Higher is more conservative.
pub fn risk_aversion(score: i64) -> f64 {
    1.0 + LAMBDA_SLOPE * score.saturating_sub(LAMBDA_PIVOT) as f64
}
