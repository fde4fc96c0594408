//! Stored questionnaire answers, one fixed-column row per user.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::error::{BoardError, BoardResult};
use crate::investor::{Identity, Questionnaire, PREFERENCE_HEADER};

#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// Store the row, replacing any earlier one for the same identity.
    async fn save(&self, questionnaire: &Questionnaire) -> BoardResult<()>;

    async fn load(&self, identity: &Identity) -> BoardResult<Questionnaire>;

    /// Returns whether a row was removed.
    async fn delete(&self, identity: &Identity) -> BoardResult<bool>;
}

fn not_found(identity: &Identity) -> BoardError {
    BoardError::NotFound(format!("no preferences stored for {}", identity))
}

#[derive(Default)]
pub struct InMemoryPreferenceStore {
    rows: RwLock<HashMap<Identity, Questionnaire>>,
}

impl InMemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PreferenceStore for InMemoryPreferenceStore {
    async fn save(&self, questionnaire: &Questionnaire) -> BoardResult<()> {
        self.rows
            .write()
            .await
            .insert(questionnaire.identity.clone(), questionnaire.clone());
        Ok(())
    }

    async fn load(&self, identity: &Identity) -> BoardResult<Questionnaire> {
        self.rows
            .read()
            .await
            .get(identity)
            .cloned()
            .ok_or_else(|| not_found(identity))
    }

    async fn delete(&self, identity: &Identity) -> BoardResult<bool> {
        Ok(self.rows.write().await.remove(identity).is_some())
    }
}

/// CSV file with a header row and one row per identity, in insertion order.
pub struct CsvPreferenceStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl CsvPreferenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raw rows, header excluded. Rows that no longer parse are kept so a
    /// rewrite never silently drops another user's data.
    async fn read_rows(&self) -> BoardResult<Vec<Vec<String>>> {
        let body = match tokio::fs::read_to_string(&self.path).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(body.as_bytes());

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            if record.iter().all(str::is_empty) {
                continue;
            }
            rows.push(record.iter().map(str::to_string).collect());
        }
        Ok(rows)
    }

    async fn write_rows(&self, rows: &[Vec<String>]) -> BoardResult<()> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(PREFERENCE_HEADER)?;
        for row in rows {
            writer.write_record(row)?;
        }
        let body = writer
            .into_inner()
            .map_err(|e| BoardError::StoreWriteFailure(e.to_string()))?;

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        let tmp = self.path.with_extension("csv.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    fn row_owner(row: &[String]) -> Option<&str> {
        row.first().map(|e| e.trim())
    }
}

#[async_trait]
impl PreferenceStore for CsvPreferenceStore {
    async fn save(&self, questionnaire: &Questionnaire) -> BoardResult<()> {
        let _guard = self.lock.lock().await;
        let owner = questionnaire.identity.as_str();
        let mut rows: Vec<Vec<String>> = self
            .read_rows()
            .await?
            .into_iter()
            .filter(|r| Self::row_owner(r) != Some(owner))
            .collect();
        rows.push(questionnaire.to_row());
        self.write_rows(&rows).await?;
        info!(owner, "Preferences saved");
        Ok(())
    }

    async fn load(&self, identity: &Identity) -> BoardResult<Questionnaire> {
        let rows = self.read_rows().await?;
        let row = rows
            .iter()
            .find(|r| Self::row_owner(r) == Some(identity.as_str()))
            .ok_or_else(|| not_found(identity))?;
        Questionnaire::from_row(row).map_err(|e| {
            warn!(owner = %identity, "Stored preferences row is unreadable: {}", e);
            e
        })
    }

    async fn delete(&self, identity: &Identity) -> BoardResult<bool> {
        let _guard = self.lock.lock().await;
        let rows = self.read_rows().await?;
        let before = rows.len();
        let kept: Vec<Vec<String>> = rows
            .into_iter()
            .filter(|r| Self::row_owner(r) != Some(identity.as_str()))
            .collect();
        if kept.len() == before {
            return Ok(false);
        }
        // header stays even when the last row goes
        self.write_rows(&kept).await?;
        info!(owner = %identity, "Preferences deleted");
        Ok(true)
    }
}
