//! Last valuation for a single user.
//!
//! There is one slot. Every write names the identity it is for, and a
//! different identity wipes the rows and the cost basis before anything is
//! admitted. A refresh takes a [`CacheTicket`] when it starts; if the owner
//! changes before it finishes, its result is dropped on arrival.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::investor::Identity;
use crate::valuation::{usable_price, ValuationRow};

#[derive(Debug, Clone, PartialEq)]
pub struct CachedValuation {
    pub owner: Identity,
    pub rows: Vec<ValuationRow>,
    /// Cost basis per symbol, fixed at first sight until the owner changes.
    pub price_buy: HashMap<String, f64>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl CachedValuation {
    fn empty(owner: Identity) -> Self {
        Self {
            owner,
            rows: Vec::new(),
            price_buy: HashMap::new(),
            refreshed_at: None,
        }
    }
}

/// Proof that a writer started against a particular owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheTicket {
    owner: Identity,
    epoch: u64,
}

impl CacheTicket {
    pub fn owner(&self) -> &Identity {
        &self.owner
    }
}

#[derive(Debug, Default)]
struct Slot {
    entry: Option<CachedValuation>,
    /// Bumped whenever the entry is discarded.
    epoch: u64,
}

impl Slot {
    fn switch_owner(&mut self, identity: &Identity) -> bool {
        if self.entry.as_ref().is_some_and(|e| e.owner == *identity) {
            return false;
        }
        let previous = self.entry.replace(CachedValuation::empty(identity.clone()));
        self.epoch += 1;
        if let Some(prev) = &previous {
            debug!(from = %prev.owner, to = %identity, "Cache owner changed, clearing");
        }
        previous.is_some()
    }

    fn current(&mut self, ticket: &CacheTicket) -> Option<&mut CachedValuation> {
        if ticket.epoch != self.epoch {
            return None;
        }
        self.entry.as_mut().filter(|e| e.owner == ticket.owner)
    }

    fn current_ref(&self, ticket: &CacheTicket) -> Option<&CachedValuation> {
        if ticket.epoch != self.epoch {
            return None;
        }
        self.entry.as_ref().filter(|e| e.owner == ticket.owner)
    }
}

#[derive(Debug, Default)]
pub struct PriceCache {
    slot: RwLock<Slot>,
}

impl PriceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached valuation, if it belongs to `identity` and has been filled.
    pub async fn get(&self, identity: &Identity) -> Option<CachedValuation> {
        let slot = self.slot.read().await;
        slot.entry
            .as_ref()
            .filter(|e| e.owner == *identity && e.refreshed_at.is_some())
            .cloned()
    }

    pub async fn owner(&self) -> Option<Identity> {
        self.slot.read().await.entry.as_ref().map(|e| e.owner.clone())
    }

    /// Make `identity` the owner, discarding another owner's data. Returns
    /// whether anything was discarded.
    pub async fn invalidate_if_owner_changed(&self, identity: &Identity) -> bool {
        self.slot.write().await.switch_owner(identity)
    }

    /// Replace the rows for `identity`, taking ownership first if needed.
    pub async fn put(&self, identity: &Identity, rows: Vec<ValuationRow>) {
        let mut slot = self.slot.write().await;
        slot.switch_owner(identity);
        if let Some(entry) = slot.entry.as_mut() {
            Self::admit(entry, rows);
        }
    }

    /// Start a write for `identity`.
    pub async fn ticket(&self, identity: &Identity) -> CacheTicket {
        let mut slot = self.slot.write().await;
        slot.switch_owner(identity);
        CacheTicket {
            owner: identity.clone(),
            epoch: slot.epoch,
        }
    }

    /// Anchor `price` as the cost basis for `symbol` unless one exists.
    /// Returns the anchored value, or `None` if the ticket is stale.
    pub async fn record_price_buy(&self, ticket: &CacheTicket, symbol: &str, price: f64) -> Option<f64> {
        let mut slot = self.slot.write().await;
        let entry = slot.current(ticket)?;
        Some(*entry.price_buy.entry(symbol.to_string()).or_insert(price))
    }

    /// Cost basis for `symbol` as seen by a writer; `None` once the ticket
    /// is stale.
    pub async fn anchored_price_buy(&self, ticket: &CacheTicket, symbol: &str) -> Option<f64> {
        let slot = self.slot.read().await;
        slot.current_ref(ticket)
            .and_then(|e| e.price_buy.get(symbol).copied())
    }

    pub async fn price_buy(&self, identity: &Identity, symbol: &str) -> Option<f64> {
        let slot = self.slot.read().await;
        slot.entry
            .as_ref()
            .filter(|e| e.owner == *identity)
            .and_then(|e| e.price_buy.get(symbol).copied())
    }

    /// Finish a write. Returns `false`, leaving the cache untouched, when
    /// the owner changed since the ticket was taken.
    pub async fn commit(&self, ticket: CacheTicket, rows: Vec<ValuationRow>) -> bool {
        let mut slot = self.slot.write().await;
        match slot.current(&ticket) {
            Some(entry) => {
                Self::admit(entry, rows);
                true
            }
            None => {
                debug!(owner = %ticket.owner, "Dropping stale valuation");
                false
            }
        }
    }

    pub async fn clear(&self) {
        let mut slot = self.slot.write().await;
        slot.entry = None;
        slot.epoch += 1;
    }

    /// Clear only if `identity` owns the cache.
    pub async fn clear_for(&self, identity: &Identity) -> bool {
        let mut slot = self.slot.write().await;
        if slot.entry.as_ref().is_some_and(|e| e.owner == *identity) {
            slot.entry = None;
            slot.epoch += 1;
            return true;
        }
        false
    }

    /// Drop the rows of `identity`'s board, keeping its cost bases, so the
    /// next read values afresh. Refreshes already running are discarded.
    pub async fn discard_rows(&self, identity: &Identity) -> bool {
        let mut slot = self.slot.write().await;
        let Some(entry) = slot.entry.as_mut().filter(|e| e.owner == *identity) else {
            return false;
        };
        entry.rows.clear();
        entry.refreshed_at = None;
        slot.epoch += 1;
        debug!(owner = %identity, "Cached rows discarded");
        true
    }

    fn admit(entry: &mut CachedValuation, rows: Vec<ValuationRow>) {
        for row in &rows {
            if let Some(p) = usable_price(row.price_buy).or(usable_price(row.price)) {
                entry.price_buy.entry(row.symbol.clone()).or_insert(p);
            }
        }
        entry.rows = rows;
        entry.refreshed_at = Some(Utc::now());
    }
}
