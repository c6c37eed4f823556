//! Memory record store
//!
//! This module provides an implementation of an in-memory record store.
//!
//! # Examples
//!
//! ```
//! use satchel::session::store::memory::MemoryStore;
//! let store = MemoryStore::new();
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::trace;

use crate::clock::{self, Clock};
use crate::session::id::SessionId;
use crate::session::store::{Record, RecordStore, RecordStoreResult, SessionData, expiry_after};

/// An in-memory record store implementation.
///
/// This store keeps all records in memory using a thread-safe hashmap.
/// It's primarily useful for development and testing environments, and for
/// single-process deployments where losing sessions on restart is
/// acceptable.
///
/// Expired records are evicted eagerly when they are read, and in bulk by
/// [`RecordStore::gc`].
///
/// # Examples
///
/// ```
/// use satchel::session::store::memory::MemoryStore;
/// let store = MemoryStore::new();
/// ```
#[derive(Debug, Clone)]
pub struct MemoryStore {
    records: Arc<Mutex<HashMap<SessionId, Record>>>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_clock(clock::system())
    }
}

impl MemoryStore {
    /// Creates a new, empty `MemoryStore`.
    ///
    /// # Examples
    ///
    /// ```
    /// use satchel::session::store::memory::MemoryStore;
    /// let store = MemoryStore::new();
    /// ```
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new, empty `MemoryStore` that reads the current time from
    /// the given clock.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
            clock,
        }
    }

    /// Returns a copy of the record stored for `id`, regardless of whether it
    /// has expired.
    pub async fn record(&self, id: &SessionId) -> Option<Record> {
        self.records.lock().await.get(id).cloned()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn read(&self, id: &SessionId) -> RecordStoreResult<Option<SessionData>> {
        let now = self.clock.now();
        let mut records = self.records.lock().await;

        match records.get(id) {
            Some(record) if record.is_expired(now) => {
                trace!(session_id = id.redacted(), "Evicting expired session on read");
                records.remove(id);
                Ok(None)
            }
            Some(record) => Ok(Some(record.data.clone())),
            None => Ok(None),
        }
    }

    async fn write(
        &self,
        id: &SessionId,
        data: &SessionData,
        lifetime: Duration,
    ) -> RecordStoreResult<()> {
        let expiry_date = expiry_after(self.clock.now(), lifetime)?;
        let record = Record {
            id: id.clone(),
            data: data.clone(),
            expiry_date,
        };
        self.records.lock().await.insert(id.clone(), record);
        Ok(())
    }

    async fn destroy(&self, id: &SessionId) -> RecordStoreResult<()> {
        self.records.lock().await.remove(id);
        Ok(())
    }

    async fn gc(&self, _lifetime: Duration) -> RecordStoreResult<u64> {
        let now = self.clock.now();
        let mut records = self.records.lock().await;

        let before = records.len();
        records.retain(|_, record| !record.is_expired(now));
        let removed = before - records.len();

        Ok(removed as u64)
    }

    async fn count(&self) -> RecordStoreResult<usize> {
        Ok(self.records.lock().await.len())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;
    use serde_json::json;

    use super::*;
    use crate::test::ManualClock;

    const LIFETIME: Duration = Duration::from_secs(60);

    fn make_store() -> (MemoryStore, ManualClock) {
        let clock = ManualClock::new();
        let store = MemoryStore::with_clock(Arc::new(clock.clone()));
        (store, clock)
    }

    fn make_data() -> SessionData {
        let mut data = SessionData::new();
        data.insert("cart".to_owned(), json!([1, 2]));
        data
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let (store, _) = make_store();
        let id = SessionId::generate();
        store.write(&id, &make_data(), LIFETIME).await.unwrap();

        assert_eq!(store.read(&id).await.unwrap(), Some(make_data()));
    }

    #[tokio::test]
    async fn test_read_missing() {
        let (store, _) = make_store();
        assert_eq!(store.read(&SessionId::generate()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_write_sets_expiry() {
        let (store, clock) = make_store();
        let id = SessionId::generate();
        let start = clock.now();
        store.write(&id, &make_data(), LIFETIME).await.unwrap();

        let record = store.record(&id).await.unwrap();
        assert_eq!(record.expiry_date, start + TimeDelta::seconds(60));
    }

    #[tokio::test]
    async fn test_write_slides_expiry() {
        let (store, clock) = make_store();
        let id = SessionId::generate();
        let start = clock.now();
        store.write(&id, &make_data(), LIFETIME).await.unwrap();

        clock.advance(Duration::from_secs(30));
        store.write(&id, &make_data(), LIFETIME).await.unwrap();

        let record = store.record(&id).await.unwrap();
        assert_eq!(record.expiry_date, start + TimeDelta::seconds(90));
    }

    #[tokio::test]
    async fn test_read_after_expiry() {
        let (store, clock) = make_store();
        let id = SessionId::generate();
        store.write(&id, &make_data(), LIFETIME).await.unwrap();

        clock.advance(LIFETIME);
        assert_eq!(store.read(&id).await.unwrap(), None);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_destroy() {
        let (store, _) = make_store();
        let id = SessionId::generate();
        store.write(&id, &make_data(), LIFETIME).await.unwrap();

        store.destroy(&id).await.unwrap();
        assert_eq!(store.read(&id).await.unwrap(), None);

        store.destroy(&id).await.unwrap();
    }

    #[tokio::test]
    async fn test_gc_removes_only_expired() {
        let (store, clock) = make_store();
        let old = SessionId::generate();
        let fresh = SessionId::generate();
        store.write(&old, &make_data(), LIFETIME).await.unwrap();
        clock.advance(Duration::from_secs(30));
        store.write(&fresh, &make_data(), LIFETIME).await.unwrap();

        clock.advance(Duration::from_secs(31));
        assert_eq!(store.gc(LIFETIME).await.unwrap(), 1);
        assert!(store.record(&old).await.is_none());
        assert!(store.record(&fresh).await.is_some());

        assert_eq!(store.gc(LIFETIME).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_writes_same_id() {
        let (store, _) = make_store();
        let id = SessionId::generate();
        let mut first = SessionData::new();
        first.insert("writer".to_owned(), json!("first"));
        let mut second = SessionData::new();
        second.insert("writer".to_owned(), json!("second"));

        let (a, b) = tokio::join!(
            store.write(&id, &first, LIFETIME),
            store.write(&id, &second, LIFETIME),
        );
        a.unwrap();
        b.unwrap();

        let stored = store.read(&id).await.unwrap().unwrap();
        assert!(stored == first || stored == second);
    }
}
