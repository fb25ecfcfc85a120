//! In-process implementation of the ResponseStore trait

use crate::http::ResponseDescriptor;
use crate::response_cache::{RequestKey, ResponseStore, StoreError};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

type Partitions = HashMap<String, BTreeMap<RequestKey, ResponseDescriptor>>;

/// ResponseStore that keeps everything in memory; contents are lost on drop
#[derive(Default, Clone)]
pub struct MemoryResponseStore {
    partitions: Arc<Mutex<Partitions>>,
}

impl MemoryResponseStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Partitions>, StoreError> {
        self.partitions
            .lock()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }
}

#[async_trait::async_trait]
impl ResponseStore for MemoryResponseStore {
    async fn open(&self, partition: &str) -> Result<(), StoreError> {
        self.lock()?.entry(partition.to_string()).or_default();
        Ok(())
    }

    async fn put(
        &self,
        partition: &str,
        key: &RequestKey,
        response: &ResponseDescriptor,
    ) -> Result<(), StoreError> {
        self.lock()?
            .entry(partition.to_string())
            .or_default()
            .insert(key.clone(), response.clone());
        Ok(())
    }

    async fn put_all(
        &self,
        partition: &str,
        entries: &[(RequestKey, ResponseDescriptor)],
    ) -> Result<(), StoreError> {
        let mut partitions = self.lock()?;
        let stored = partitions.entry(partition.to_string()).or_default();
        for (key, response) in entries {
            stored.insert(key.clone(), response.clone());
        }
        Ok(())
    }

    async fn lookup(
        &self,
        partition: &str,
        key: &RequestKey,
    ) -> Result<Option<ResponseDescriptor>, StoreError> {
        Ok(self
            .lock()?
            .get(partition)
            .and_then(|stored| stored.get(key))
            .cloned())
    }

    async fn keys(&self, partition: &str) -> Result<Vec<RequestKey>, StoreError> {
        Ok(self
            .lock()?
            .get(partition)
            .map(|stored| stored.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn partitions(&self) -> Result<Vec<String>, StoreError> {
        let mut names: Vec<String> = self.lock()?.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn delete_partition(&self, partition: &str) -> Result<bool, StoreError> {
        Ok(self.lock()?.remove(partition).is_some())
    }
}
