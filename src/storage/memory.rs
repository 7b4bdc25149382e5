//! In-Memory State Store
//!
//! Volatile store for tests and dry runs.

use super::{StoreState, TopologyLock};
use crate::domain::ports::Storage;
use crate::error::{Error, Result};
use crate::records::{DiskFilter, DiskRecord, Replacement, ReplacementFilter};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

/// State held in process memory
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
    lock: Arc<Mutex<Option<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn disks_document(&self) -> Result<String> {
        Ok(self.state.read().disks_document.clone())
    }

    async fn set_disks_document(&self, raw: &str) -> Result<()> {
        self.state.write().disks_document = raw.to_string();
        Ok(())
    }

    async fn get_disks(&self, filter: &DiskFilter) -> Result<Vec<DiskRecord>> {
        Ok(self.state.read().get_disks(filter))
    }

    async fn upsert_disk(&self, record: DiskRecord) -> Result<()> {
        self.state.write().upsert_disk(record);
        Ok(())
    }

    async fn delete_disks(&self, filter: &DiskFilter) -> Result<usize> {
        Ok(self.state.write().delete_disks(filter))
    }

    async fn get_replacements(&self, filter: &ReplacementFilter) -> Result<Vec<Replacement>> {
        Ok(self.state.read().get_replacements(filter))
    }

    async fn upsert_replacement(&self, ticket: Replacement) -> Result<()> {
        self.state.write().upsert_replacement(ticket);
        Ok(())
    }

    async fn delete_replacement(&self, service_id: &str) -> Result<bool> {
        Ok(self.state.write().delete_replacement(service_id))
    }

    async fn lock(&self, holder: &str) -> Result<TopologyLock> {
        let mut slot = self.lock.lock();
        if let Some(current) = slot.as_ref() {
            return Err(Error::TopologyLocked {
                holder: current.clone(),
            });
        }
        *slot = Some(holder.to_string());
        drop(slot);
        Ok(TopologyLock::slot(holder.to_string(), self.lock.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_lock_is_exclusive() {
        let store = MemoryStore::new();

        let guard = store.lock("replace cs-1").await.unwrap();
        assert_eq!(guard.holder(), "replace cs-1");

        let err = store.lock("replace cs-2").await.unwrap_err();
        assert_matches!(err, Error::TopologyLocked { ref holder } if holder == "replace cs-1");

        drop(guard);
        assert!(store.lock("replace cs-2").await.is_ok());
    }

    #[tokio::test]
    async fn test_basic_operations() {
        let store = MemoryStore::new();
        store.set_disks_document("disk: []\n").await.unwrap();
        assert_eq!(store.disks_document().await.unwrap(), "disk: []\n");

        store
            .upsert_disk(DiskRecord::new("h1", "/dev/sdb", "/m", "img", 90))
            .await
            .unwrap();
        assert_eq!(store.get_disks(&DiskFilter::All).await.unwrap().len(), 1);
        assert_eq!(
            store.delete_disks(&DiskFilter::Host("h1".into())).await.unwrap(),
            1
        );
        assert!(!store.delete_replacement("cs-1").await.unwrap());
    }
}
