//! File-Backed State Store
//!
//! Keeps all state in one JSON file under the state directory. Every write
//! rewrites the whole file through a temporary file and a rename, so readers
//! see either the previous or the next state. The topology lock is an
//! advisory `flock` on a file next to it, so the kernel drops it when the
//! holding process dies; the file itself only names the last holder.

use super::{StoreState, TopologyLock};
use crate::domain::ports::Storage;
use crate::error::{Error, Result};
use crate::records::{DiskFilter, DiskRecord, Replacement, ReplacementFilter};
use async_trait::async_trait;
use chrono::Utc;
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::io::{ErrorKind, Read, Seek, Write};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const STATE_FILE: &str = "state.json";
const LOCK_FILE: &str = "topology.lock";

/// State persisted in a directory
pub struct FileStore {
    root_path: PathBuf,
    /// Serializes this process's read-modify-write cycles
    write_guard: Mutex<()>,
}

impl FileStore {
    /// Open (creating if needed) the store rooted at `root_path`
    pub async fn open(root_path: impl Into<PathBuf>) -> Result<Self> {
        let root_path = root_path.into();
        fs::create_dir_all(&root_path).await?;
        info!("State store at {:?}", root_path);
        Ok(Self {
            root_path,
            write_guard: Mutex::new(()),
        })
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    fn state_path(&self) -> PathBuf {
        self.root_path.join(STATE_FILE)
    }

    fn lock_path(&self) -> PathBuf {
        self.root_path.join(LOCK_FILE)
    }

    async fn load(&self) -> Result<StoreState> {
        match fs::read(self.state_path()).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                Error::Store(format!("corrupt state file {:?}: {}", self.state_path(), e))
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(StoreState::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, state: &StoreState) -> Result<()> {
        let path = self.state_path();
        let tmp_path = path.with_extension("json.tmp");

        let json = serde_json::to_vec_pretty(state)?;
        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&tmp_path, &path).await?;
        debug!("State written to {:?} ({} bytes)", path, json.len());
        Ok(())
    }

    /// Apply `f` to the stored state and persist the result
    async fn update<T>(&self, f: impl FnOnce(&mut StoreState) -> T) -> Result<T> {
        let _guard = self.write_guard.lock().await;
        let mut state = self.load().await?;
        let out = f(&mut state);
        self.save(&state).await?;
        Ok(out)
    }
}

#[async_trait]
impl Storage for FileStore {
    async fn disks_document(&self) -> Result<String> {
        Ok(self.load().await?.disks_document)
    }

    async fn set_disks_document(&self, raw: &str) -> Result<()> {
        self.update(|state| state.disks_document = raw.to_string())
            .await
    }

    async fn get_disks(&self, filter: &DiskFilter) -> Result<Vec<DiskRecord>> {
        Ok(self.load().await?.get_disks(filter))
    }

    async fn upsert_disk(&self, record: DiskRecord) -> Result<()> {
        self.update(|state| state.upsert_disk(record)).await
    }

    async fn delete_disks(&self, filter: &DiskFilter) -> Result<usize> {
        self.update(|state| state.delete_disks(filter)).await
    }

    async fn get_replacements(&self, filter: &ReplacementFilter) -> Result<Vec<Replacement>> {
        Ok(self.load().await?.get_replacements(filter))
    }

    async fn upsert_replacement(&self, ticket: Replacement) -> Result<()> {
        self.update(|state| state.upsert_replacement(ticket)).await
    }

    async fn delete_replacement(&self, service_id: &str) -> Result<bool> {
        self.update(|state| state.delete_replacement(service_id))
            .await
    }

    async fn lock(&self, holder: &str) -> Result<TopologyLock> {
        let path = self.lock_path();
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .await?
            .into_std()
            .await;

        let mut flock = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(flock) => flock,
            Err((_, errno)) if errno == Errno::EWOULDBLOCK => {
                let holder = fs::read_to_string(&path)
                    .await
                    .map(|s| s.trim().to_string())
                    .ok()
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| "unknown".to_string());
                return Err(Error::TopologyLocked { holder });
            }
            Err((_, errno)) => return Err(std::io::Error::from(errno).into()),
        };

        let mut previous = String::new();
        flock.read_to_string(&mut previous)?;
        if !previous.trim().is_empty() {
            warn!(
                "Reclaimed topology lock left behind by {}",
                previous.trim()
            );
        }

        let description = format!(
            "{} (pid {}, since {})",
            holder,
            std::process::id(),
            Utc::now().to_rfc3339()
        );
        flock.set_len(0)?;
        flock.rewind()?;
        flock.write_all(description.as_bytes())?;
        flock.sync_all()?;

        debug!("Topology lock acquired: {}", description);
        Ok(TopologyLock::file(holder.to_string(), path, flock))
    }
}
