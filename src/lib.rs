//! Risk questionnaire to portfolio to live valuation board.

pub mod cache;
pub mod config;
pub mod error;
pub mod investor;
pub mod optimizer;
pub mod portfolio;
pub mod preferences;
pub mod scheduler;
pub mod service;
pub mod sort;
pub mod stocks;
pub mod store;
pub mod valuation;

pub use config::{Config, LogFormat};
pub use error::{BoardError, BoardResult};
pub use investor::{Identity, Questionnaire};
pub use portfolio::Portfolio;
pub use service::{PortfolioService, Submission};
pub use sort::{SortDirection, SortKey, SortState};
pub use valuation::ValuationRow;
