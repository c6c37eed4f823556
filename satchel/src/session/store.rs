//! Session record stores
//!
//! This module defines the [`RecordStore`] trait, the persistence contract
//! the session engine depends on, together with a wrapper that enables
//! runtime selection of a store implementation.
//!
//! Record stores persist one opaque bag of session data per identifier,
//! along with an absolute expiry time. Different implementations keep the
//! data in different places; this crate ships an in-memory store and a
//! file-based store.

pub mod file;
pub mod memory;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{SessionStoreConfig, SessionStoreTypeConfig};
use crate::session::id::SessionId;

pub(crate) const ERROR_PREFIX: &str = "session store:";

/// The data of a single session: a mapping from string keys to arbitrary
/// JSON values.
pub type SessionData = HashMap<String, serde_json::Value>;

/// A persisted session record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// The identifier the record is stored under.
    pub id: SessionId,
    /// The session payload.
    pub data: SessionData,
    /// The point in time after which the record is no longer valid.
    pub expiry_date: DateTime<Utc>,
}

impl Record {
    /// Returns `true` if the record has expired at the given point in time.
    ///
    /// A record is expired at the exact moment of its expiry date.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry_date <= now
    }
}

/// Errors that can occur when interacting with a record store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum RecordStoreError {
    /// The underlying storage backend returned an error.
    #[error("{ERROR_PREFIX} backend error: {0}")]
    Backend(String),
    /// Failed to serialize a record for storage.
    #[error("{ERROR_PREFIX} serialization error: {0}")]
    Serialize(String),
    /// Failed to deserialize a stored record.
    #[error("{ERROR_PREFIX} deserialization error: {0}")]
    Deserialize(String),
}

/// Convenience alias for results returned by record store operations.
pub type RecordStoreResult<T> = Result<T, RecordStoreError>;

/// The persistence contract for session records.
///
/// All operations must be safe to call concurrently, both from multiple
/// requests and from a garbage collection sweep. Writes to the same
/// identifier are last-writer-wins, and a record must never be observable in
/// a partially written state.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RecordStore: Send + Sync + 'static {
    /// Reads the data stored for `id`.
    ///
    /// Returns `None` if there is no record, or if the record has already
    /// expired.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend could not be read or the record could
    /// not be decoded.
    async fn read(&self, id: &SessionId) -> RecordStoreResult<Option<SessionData>>;

    /// Creates or replaces the record for `id` and sets its expiry date to
    /// `now + lifetime`.
    ///
    /// Every successful write restarts the lifetime of the record (sliding
    /// expiration).
    ///
    /// # Errors
    ///
    /// Returns an error if the record could not be encoded or persisted.
    async fn write(
        &self,
        id: &SessionId,
        data: &SessionData,
        lifetime: Duration,
    ) -> RecordStoreResult<()>;

    /// Removes the record for `id`. Succeeds even if the record was absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend failed to remove an existing record.
    async fn destroy(&self, id: &SessionId) -> RecordStoreResult<()>;

    /// Removes every record whose expiry date has passed and returns the
    /// number of removed records.
    ///
    /// `lifetime` is the configured session lifetime; stores that cannot tell
    /// the expiry date of a record may use it to judge staleness instead.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend could not be scanned.
    async fn gc(&self, lifetime: Duration) -> RecordStoreResult<u64>;

    /// Returns the number of records physically held by the store, including
    /// expired records that have not been collected yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend could not be scanned.
    async fn count(&self) -> RecordStoreResult<usize>;
}

/// A cheaply cloneable handle to a type-erased [`RecordStore`].
///
/// This enables runtime selection of the store implementation, e.g. based on
/// the [`SessionStoreConfig`].
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use satchel::session::store::RecordStoreWrapper;
/// use satchel::session::store::memory::MemoryStore;
///
/// let wrapper = RecordStoreWrapper::new(Arc::new(MemoryStore::new()));
/// ```
#[derive(Clone, derive_more::Debug)]
pub struct RecordStoreWrapper(#[debug("..")] Arc<dyn RecordStore>);

impl RecordStoreWrapper {
    /// Create a new [`RecordStoreWrapper`].
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self(store)
    }

    /// Builds the record store described by the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the store could not be initialized, e.g. because
    /// the session directory of a file store could not be created.
    pub fn from_config(config: &SessionStoreConfig) -> RecordStoreResult<Self> {
        let store: Arc<dyn RecordStore> = match &config.store_type {
            SessionStoreTypeConfig::Memory => Arc::new(memory::MemoryStore::new()),
            SessionStoreTypeConfig::File { path } => {
                Arc::new(file::FileStore::new(path.clone())?)
            }
        };
        Ok(Self(store))
    }
}

#[async_trait]
impl RecordStore for RecordStoreWrapper {
    async fn read(&self, id: &SessionId) -> RecordStoreResult<Option<SessionData>> {
        self.0.read(id).await
    }

    async fn write(
        &self,
        id: &SessionId,
        data: &SessionData,
        lifetime: Duration,
    ) -> RecordStoreResult<()> {
        self.0.write(id, data, lifetime).await
    }

    async fn destroy(&self, id: &SessionId) -> RecordStoreResult<()> {
        self.0.destroy(id).await
    }

    async fn gc(&self, lifetime: Duration) -> RecordStoreResult<u64> {
        self.0.gc(lifetime).await
    }

    async fn count(&self) -> RecordStoreResult<usize> {
        self.0.count().await
    }
}

pub(crate) fn expiry_after(
    now: DateTime<Utc>,
    lifetime: Duration,
) -> RecordStoreResult<DateTime<Utc>> {
    TimeDelta::from_std(lifetime)
        .ok()
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .ok_or_else(|| {
            RecordStoreError::Backend(format!("session lifetime out of range: {lifetime:?}"))
        })
}
