//! Per-user portfolio persistence.
//!
//! Exactly one portfolio per identity: the stores are maps from identity to
//! an owned [`Portfolio`], so "one live instance" holds by construction.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{BoardError, BoardResult};
use crate::investor::Identity;
use crate::portfolio::Portfolio;

#[async_trait]
pub trait PortfolioStore: Send + Sync {
    /// Replace whatever portfolio `identity` had.
    async fn save(&self, identity: &Identity, portfolio: &Portfolio) -> BoardResult<()>;

    async fn load(&self, identity: &Identity) -> BoardResult<Portfolio>;

    /// Remove the portfolio, or `NotFound` if there was none.
    async fn delete(&self, identity: &Identity) -> BoardResult<()>;

    /// Identities that currently hold a portfolio, sorted.
    async fn owners(&self) -> BoardResult<Vec<Identity>>;
}

fn not_found(identity: &Identity) -> BoardError {
    BoardError::NotFound(format!("no portfolio stored for {}", identity))
}

type PortfolioMap = HashMap<Identity, Portfolio>;

/// In-memory store, used by tests and as a scratch backend.
#[derive(Default)]
pub struct InMemoryPortfolioStore {
    portfolios: Arc<RwLock<PortfolioMap>>,
}

impl InMemoryPortfolioStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PortfolioStore for InMemoryPortfolioStore {
    async fn save(&self, identity: &Identity, portfolio: &Portfolio) -> BoardResult<()> {
        let mut portfolios = self.portfolios.write().await;
        portfolios.insert(identity.clone(), portfolio.clone());
        Ok(())
    }

    async fn load(&self, identity: &Identity) -> BoardResult<Portfolio> {
        let portfolios = self.portfolios.read().await;
        portfolios.get(identity).cloned().ok_or_else(|| not_found(identity))
    }

    async fn delete(&self, identity: &Identity) -> BoardResult<()> {
        let mut portfolios = self.portfolios.write().await;
        portfolios
            .remove(identity)
            .map(|_| ())
            .ok_or_else(|| not_found(identity))
    }

    async fn owners(&self) -> BoardResult<Vec<Identity>> {
        let portfolios = self.portfolios.read().await;
        let mut owners: Vec<Identity> = portfolios.keys().cloned().collect();
        owners.sort();
        Ok(owners)
    }
}

/// All portfolios in one pretty-printed JSON document keyed by email.
///
/// Every mutation is a read-modify-write of the whole document under a
/// mutex, and the new document replaces the old one with a rename so a
/// reader never sees it half-written.
pub struct JsonPortfolioStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonPortfolioStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> BoardResult<BTreeMap<Identity, Portfolio>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(s) if s.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(s) => Ok(serde_json::from_str(&s)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_all(&self, portfolios: &BTreeMap<Identity, Portfolio>) -> BoardResult<()> {
        let body = serde_json::to_string_pretty(portfolios)?;
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            warn!("Could not move {} into place: {}", tmp.display(), e);
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl PortfolioStore for JsonPortfolioStore {
    async fn save(&self, identity: &Identity, portfolio: &Portfolio) -> BoardResult<()> {
        let _guard = self.lock.lock().await;
        let mut portfolios = self.read_all().await?;
        portfolios.insert(identity.clone(), portfolio.clone());
        self.write_all(&portfolios).await?;
        info!(owner = %identity, assets = portfolio.len(), "Portfolio saved");
        Ok(())
    }

    async fn load(&self, identity: &Identity) -> BoardResult<Portfolio> {
        let portfolios = self.read_all().await?;
        debug!(owner = %identity, "Portfolio lookup");
        portfolios.get(identity).cloned().ok_or_else(|| not_found(identity))
    }

    async fn delete(&self, identity: &Identity) -> BoardResult<()> {
        let _guard = self.lock.lock().await;
        let mut portfolios = self.read_all().await?;
        if portfolios.remove(identity).is_none() {
            return Err(not_found(identity));
        }
        self.write_all(&portfolios).await?;
        info!(owner = %identity, "Portfolio deleted");
        Ok(())
    }

    async fn owners(&self) -> BoardResult<Vec<Identity>> {
        Ok(self.read_all().await?.into_keys().collect())
    }
}
