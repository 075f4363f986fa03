//! In-memory provision store backed by DashMap

use crate::domain::ports::{ClaimId, ProvisionRecord, ProvisionStore};
use crate::error::{Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Provision store that keeps records in memory
pub struct MemoryStore {
    records: DashMap<ClaimId, ProvisionRecord>,
    /// Number of successful writes
    writes: AtomicU64,
    /// Is the store accepting calls
    available: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            writes: AtomicU64::new(0),
            available: AtomicBool::new(true),
        }
    }

    /// Set availability (for testing)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }

    /// Number of successful `put` calls
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(Error::Store("memory store unavailable".into()))
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProvisionStore for MemoryStore {
    async fn put(&self, claim: &ClaimId, record: &ProvisionRecord) -> Result<()> {
        self.check_available()?;
        self.records.insert(claim.clone(), record.clone());
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn get(&self, claim: &ClaimId) -> Result<ProvisionRecord> {
        self.check_available()?;
        self.records
            .get(claim)
            .map(|r| r.value().clone())
            .ok_or_else(|| Error::not_found("ProvisionRecord", claim.to_string()))
    }

    async fn delete(&self, claim: &ClaimId) -> Result<()> {
        self.check_available()?;
        self.records.remove(claim);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ProvisionRecord>> {
        self.check_available()?;
        let mut records: Vec<ProvisionRecord> =
            self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| a.claim.cmp(&b.claim));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::ProvisionPhase;
    use crate::store::tests::test_record;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_basic_operations() {
        let store = MemoryStore::new();
        let record = test_record("default", "data");
        let claim = record.claim.clone();

        assert_matches!(store.get(&claim).await, Err(Error::NotFound { .. }));
        assert!(store.find(&claim).await.unwrap().is_none());

        store.put(&claim, &record).await.unwrap();
        assert_eq!(store.get(&claim).await.unwrap(), record);
        assert_eq!(store.write_count(), 1);

        let mut updated = record.clone();
        updated.transition(ProvisionPhase::Creating);
        store.put(&claim, &updated).await.unwrap();
        assert_eq!(store.get(&claim).await.unwrap().phase, ProvisionPhase::Creating);
        assert_eq!(store.len(), 1);

        store.delete(&claim).await.unwrap();
        store.delete(&claim).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_list_is_sorted() {
        let store = MemoryStore::new();
        for name in ["c", "a", "b"] {
            let record = test_record("default", name);
            store.put(&record.claim.clone(), &record).await.unwrap();
        }

        let names: Vec<String> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.claim.name)
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_unavailable() {
        let store = MemoryStore::new();
        let record = test_record("default", "data");
        tokio_test::assert_ok!(tokio_test::block_on(store.put(&record.claim, &record)));

        store.set_available(false);
        assert_matches!(
            tokio_test::block_on(store.put(&record.claim, &record)),
            Err(Error::Store(_))
        );
        tokio_test::assert_err!(tokio_test::block_on(store.list()));

        store.set_available(true);
        assert_eq!(tokio_test::block_on(store.list()).unwrap().len(), 1);
    }
}
