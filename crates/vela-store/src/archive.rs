//! Per-user archive of unliked posts.
//!
//! Records are keyed by user id and deduplicated by post id: adding a post
//! that is already archived replaces the older record.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

use vela_core::{ArchiveRecord, ArchiveStore, Result};

use crate::json_file;

type Archives = BTreeMap<String, Vec<ArchiveRecord>>;

fn merge(existing: &mut Vec<ArchiveRecord>, records: Vec<ArchiveRecord>) {
    for record in records {
        existing.retain(|r| r.post_id != record.post_id);
        existing.push(record);
    }
}

fn remove_ids(existing: &mut Vec<ArchiveRecord>, post_ids: &[String]) -> usize {
    let before = existing.len();
    existing.retain(|r| !post_ids.contains(&r.post_id));
    before - existing.len()
}

fn clear_user(archives: &mut Archives, user_id: Option<&str>) {
    match user_id {
        Some(user) => {
            archives.remove(user);
        }
        None => archives.clear(),
    }
}

/// Archive backed by a JSON object file: `{ "<userId>": [records...] }`.
pub struct JsonFileArchiveStore {
    path: PathBuf,
    /// Held across read-modify-write so concurrent updates don't lose records.
    lock: AsyncMutex<()>,
}

impl JsonFileArchiveStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: AsyncMutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Archived records for one user.
    pub async fn records(&self, user_id: &str) -> Result<Vec<ArchiveRecord>> {
        let _guard = self.lock.lock().await;
        let mut archives = self.read_all().await?;
        Ok(archives.remove(user_id).unwrap_or_default())
    }

    async fn read_all(&self) -> Result<Archives> {
        Ok(json_file::read(&self.path).await?.unwrap_or_default())
    }
}

#[async_trait]
impl ArchiveStore for JsonFileArchiveStore {
    async fn add(&self, records: Vec<ArchiveRecord>, user_id: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let mut archives = self.read_all().await?;
        let count = records.len();
        merge(archives.entry(user_id.to_string()).or_default(), records);
        json_file::write(&self.path, &archives).await?;
        debug!(user_id, count, "Archived unliked posts");
        Ok(true)
    }

    async fn remove(&self, post_ids: &[String], user_id: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let mut archives = self.read_all().await?;
        let removed = match archives.get_mut(user_id) {
            Some(existing) => remove_ids(existing, post_ids),
            None => 0,
        };
        json_file::write(&self.path, &archives).await?;
        debug!(user_id, removed, "Removed posts from archive");
        Ok(true)
    }

    async fn clear(&self, user_id: Option<&str>) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let mut archives = self.read_all().await?;
        clear_user(&mut archives, user_id);
        json_file::write(&self.path, &archives).await?;
        info!(user_id = user_id.unwrap_or("(all)"), "Archive cleared");
        Ok(true)
    }
}

/// In-memory archive.
#[derive(Default)]
pub struct MemoryArchiveStore {
    archives: Mutex<Archives>,
}

impl MemoryArchiveStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self, user_id: &str) -> Vec<ArchiveRecord> {
        self.archives
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Total records across every user.
    pub fn len(&self) -> usize {
        self.archives
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ArchiveStore for MemoryArchiveStore {
    async fn add(&self, records: Vec<ArchiveRecord>, user_id: &str) -> Result<bool> {
        let mut archives = self.archives.lock().unwrap_or_else(PoisonError::into_inner);
        merge(archives.entry(user_id.to_string()).or_default(), records);
        Ok(true)
    }

    async fn remove(&self, post_ids: &[String], user_id: &str) -> Result<bool> {
        let mut archives = self.archives.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = archives.get_mut(user_id) {
            remove_ids(existing, post_ids);
        }
        Ok(true)
    }

    async fn clear(&self, user_id: Option<&str>) -> Result<bool> {
        let mut archives = self.archives.lock().unwrap_or_else(PoisonError::into_inner);
        clear_user(&mut archives, user_id);
        Ok(true)
    }
}
