//! Error taxonomy for the portfolio pipeline.

use thiserror::Error;

pub type BoardResult<T> = Result<T, BoardError>;

/// Failures surfaced by the portfolio pipeline.
///
/// Each variant is a distinct user-visible state. Risk scoring and sorting
/// never produce one of these.
#[derive(Error, Debug)]
pub enum BoardError {
    /// Bad caller input. Rejected before any collaborator is contacted.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The optimizer crashed, timed out, exited non-zero or printed
    /// something that is not JSON.
    #[error("Optimizer unavailable: {diagnostic}")]
    OptimizerUnavailable {
        /// Raw stderr/stdout or spawn error, kept for logging.
        diagnostic: String,
    },

    /// The optimizer answered with JSON of the wrong shape.
    #[error("Optimizer contract violation: {0}")]
    OptimizerContractViolation(String),

    /// Not a single holding could be priced.
    #[error("Quote source unavailable: none of {attempted} symbols could be valued")]
    QuoteSourceUnavailable { attempted: usize },

    /// One symbol failed to price. Only ever seen inside a valuation batch.
    #[error("Quote fetch failed for {symbol}: {message}")]
    QuoteFetch { symbol: String, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store write failure: {0}")]
    StoreWriteFailure(String),
}

impl BoardError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn quote_fetch(symbol: &str, message: impl Into<String>) -> Self {
        Self::QuoteFetch {
            symbol: symbol.to_string(),
            message: message.into(),
        }
    }

    /// True for the failures a caller should report as "nothing stored".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<std::io::Error> for BoardError {
    fn from(e: std::io::Error) -> Self {
        Self::StoreWriteFailure(e.to_string())
    }
}

impl From<serde_json::Error> for BoardError {
    fn from(e: serde_json::Error) -> Self {
        Self::StoreWriteFailure(format!("invalid JSON document: {}", e))
    }
}

impl From<csv::Error> for BoardError {
    fn from(e: csv::Error) -> Self {
        Self::StoreWriteFailure(format!("invalid CSV document: {}", e))
    }
}
