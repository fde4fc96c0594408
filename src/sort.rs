//! Column sorting for the valuation board.
//!
//! Clicking a column cycles unsorted → ascending → descending → unsorted.
//! Clicking another column starts that one at ascending.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::BoardError;
use crate::valuation::ValuationRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortKey {
    Symbol,
    CompanyName,
    Price,
    ChangePercent,
    MarketCap,
    Weight,
    WeightedChange,
    UnitsOwned,
    PriceBuy,
}

impl SortKey {
    pub const ALL: [SortKey; 9] = [
        SortKey::Symbol,
        SortKey::CompanyName,
        SortKey::Price,
        SortKey::ChangePercent,
        SortKey::MarketCap,
        SortKey::Weight,
        SortKey::WeightedChange,
        SortKey::UnitsOwned,
        SortKey::PriceBuy,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SortKey::Symbol => "symbol",
            SortKey::CompanyName => "company",
            SortKey::Price => "price",
            SortKey::ChangePercent => "change",
            SortKey::MarketCap => "market-cap",
            SortKey::Weight => "weight",
            SortKey::WeightedChange => "weighted-change",
            SortKey::UnitsOwned => "units",
            SortKey::PriceBuy => "price-buy",
        }
    }

    fn compare(&self, a: &ValuationRow, b: &ValuationRow) -> Ordering {
        match self {
            SortKey::Symbol => a.symbol.cmp(&b.symbol),
            SortKey::CompanyName => a.company_name.cmp(&b.company_name),
            SortKey::Price => compare_optional(a.price, b.price),
            SortKey::ChangePercent => compare_optional(a.change_percent, b.change_percent),
            SortKey::MarketCap => compare_optional(a.market_cap, b.market_cap),
            SortKey::Weight => compare_optional(Some(a.weight_in_portfolio), Some(b.weight_in_portfolio)),
            SortKey::WeightedChange => compare_optional(a.weighted_change_usd, b.weighted_change_usd),
            SortKey::UnitsOwned => compare_optional(a.units_owned, b.units_owned),
            SortKey::PriceBuy => compare_optional(a.price_buy, b.price_buy),
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SortKey {
    type Err = BoardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        SortKey::ALL
            .iter()
            .find(|k| k.name() == wanted)
            .copied()
            .ok_or_else(|| {
                let names: Vec<&str> = SortKey::ALL.iter().map(SortKey::name).collect();
                BoardError::invalid(format!("unknown column '{}', expected one of {}", s, names.join(", ")))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// Unavailable values go after every available one.
fn compare_optional(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Stable sort into a new vector; `rows` is left alone.
pub fn sort(rows: &[ValuationRow], key: SortKey, direction: SortDirection) -> Vec<ValuationRow> {
    let mut sorted = rows.to_vec();
    match direction {
        SortDirection::Ascending => sorted.sort_by(|a, b| key.compare(a, b)),
        SortDirection::Descending => sorted.sort_by(|a, b| key.compare(b, a)),
    }
    sorted
}

/// The board's current sort column and direction, if any.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SortState {
    active: Option<(SortKey, SortDirection)>,
}

impl SortState {
    pub fn new() -> Self {
        Self::default()
    }

    /// One click on `key`'s header.
    pub fn select(&mut self, key: SortKey) {
        self.active = match self.active {
            Some((current, SortDirection::Ascending)) if current == key => {
                Some((key, SortDirection::Descending))
            }
            Some((current, SortDirection::Descending)) if current == key => None,
            _ => Some((key, SortDirection::Ascending)),
        };
    }

    pub fn key(&self) -> Option<SortKey> {
        self.active.map(|(k, _)| k)
    }

    pub fn direction(&self) -> Option<SortDirection> {
        self.active.map(|(_, d)| d)
    }

    /// Header marker for `key`.
    pub fn indicator(&self, key: SortKey) -> &'static str {
        match self.active {
            Some((k, SortDirection::Ascending)) if k == key => "▲",
            Some((k, SortDirection::Descending)) if k == key => "▼",
            _ => " ",
        }
    }

    /// Rows in display order. Unsorted returns the source order unchanged.
    pub fn apply(&self, rows: &[ValuationRow]) -> Vec<ValuationRow> {
        match self.active {
            Some((key, direction)) => sort(rows, key, direction),
            None => rows.to_vec(),
        }
    }
}
