use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::auth::token::SessionToken;
use crate::error::{errors, CampusResult};

/// Named slots in client-local storage holding session tokens
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn get(&self, slot: &str) -> CampusResult<Option<SessionToken>>;

    async fn set(&self, slot: &str, token: &SessionToken) -> CampusResult<()>;

    /// Remove a slot; removing an empty slot is not an error
    async fn remove(&self, slot: &str) -> CampusResult<()>;
}

/// In-process token store
#[derive(Default)]
pub struct MemoryTokenStore {
    slots: DashMap<String, SessionToken>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn get(&self, slot: &str) -> CampusResult<Option<SessionToken>> {
        Ok(self.slots.get(slot).map(|entry| entry.value().clone()))
    }

    async fn set(&self, slot: &str, token: &SessionToken) -> CampusResult<()> {
        self.slots.insert(slot.to_string(), token.clone());
        debug!(slot, "Session token stored in memory");
        Ok(())
    }

    async fn remove(&self, slot: &str) -> CampusResult<()> {
        if self.slots.remove(slot).is_some() {
            debug!(slot, "Session token removed from memory");
        }
        Ok(())
    }
}

/// On-disk layout of the token file
#[derive(Debug, Default, Serialize, Deserialize)]
struct TokenFile {
    #[serde(default)]
    slots: HashMap<String, SessionToken>,
}

/// Token store persisted as a JSON file, one entry per slot
pub struct FileTokenStore {
    path: PathBuf,
    /// Serialises read-modify-write cycles on the file
    lock: Mutex<()>,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_file(&self) -> CampusResult<TokenFile> {
        match fs::read_to_string(&self.path).await {
            Ok(raw) if raw.trim().is_empty() => Ok(TokenFile::default()),
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| {
                errors::storage_failed(format!("corrupt token file {}: {}", self.path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(TokenFile::default()),
            Err(e) => Err(errors::storage_failed(e)),
        }
    }

    async fn write_file(&self, file: &TokenFile) -> CampusResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(errors::storage_failed)?;
            }
        }
        let raw = serde_json::to_string_pretty(file).map_err(errors::storage_failed)?;
        fs::write(&self.path, raw)
            .await
            .map_err(errors::storage_failed)?;
        Ok(())
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn get(&self, slot: &str) -> CampusResult<Option<SessionToken>> {
        let _guard = self.lock.lock().await;
        let file = self.read_file().await?;
        Ok(file.slots.get(slot).cloned())
    }

    async fn set(&self, slot: &str, token: &SessionToken) -> CampusResult<()> {
        let _guard = self.lock.lock().await;
        let mut file = self.read_file().await?;
        file.slots.insert(slot.to_string(), token.clone());
        self.write_file(&file).await?;
        info!(slot, path = %self.path.display(), "Session token persisted");
        Ok(())
    }

    async fn remove(&self, slot: &str) -> CampusResult<()> {
        let _guard = self.lock.lock().await;
        let mut file = self.read_file().await?;
        if file.slots.remove(slot).is_none() {
            debug!(slot, "No session token to remove");
            return Ok(());
        }
        self.write_file(&file).await?;
        info!(slot, path = %self.path.display(), "Session token removed");
        Ok(())
    }
}
