//! Session management
//!
//! This module provides [`Session`], the per-request working copy of a
//! session's data. A session is loaded from a [`RecordStore`] at the start
//! of a request, read and mutated in memory while the request is handled,
//! and written back when it is saved.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use satchel::session::Session;
//! use satchel::session::store::RecordStoreWrapper;
//! use satchel::session::store::memory::MemoryStore;
//!
//! # #[tokio::main]
//! # async fn main() -> satchel::Result<()> {
//! let store = RecordStoreWrapper::new(Arc::new(MemoryStore::new()));
//!
//! let mut session = Session::new(store.clone(), Duration::from_secs(3600));
//! let id = session.load(None).await?;
//! session.insert("user_name", "world")?;
//! session.save().await?;
//!
//! let mut session = Session::new(store, Duration::from_secs(3600));
//! session.load(Some(id.as_str())).await?;
//! let name: Option<String> = session.get("user_name")?;
//! assert_eq!(name.as_deref(), Some("world"));
//! # Ok(())
//! # }
//! ```
pub mod id;
pub mod store;

use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error, trace, warn};

use crate::error::{Result, SessionError};
use crate::session::id::SessionId;
use crate::session::store::{RecordStore, RecordStoreWrapper, SessionData};

/// The state of a [`Session`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// The session has not been loaded yet; its data is not accessible.
    Unstarted,
    /// The session has been loaded and may be read and mutated.
    Started,
    /// The session has been saved at least once. It may still be read,
    /// mutated and saved again.
    Saved,
}

/// A session object.
///
/// A `Session` holds the in-memory copy of one session's data for the
/// duration of a single request. Reads and writes only touch memory and are
/// immediately visible to subsequent reads; they become durable once
/// [`Session::save`] succeeds.
///
/// A fresh `Session` is created for every request. Accessing the data before
/// the session has been loaded fails with [`SessionError::NotStarted`].
#[derive(Debug)]
pub struct Session {
    store: RecordStoreWrapper,
    lifetime: Duration,
    state: SessionState,
    id: Option<SessionId>,
    data: SessionData,
    stale_ids: Vec<SessionId>,
}

impl Session {
    /// Creates a new, unstarted session backed by the given store.
    ///
    /// `lifetime` is the time after which the record expires, measured from
    /// the last successful save.
    #[must_use]
    pub fn new(store: RecordStoreWrapper, lifetime: Duration) -> Self {
        Self {
            store,
            lifetime,
            state: SessionState::Unstarted,
            id: None,
            data: SessionData::new(),
            stale_ids: Vec::new(),
        }
    }

    /// Loads the session and returns its identifier.
    ///
    /// `candidate` is the identifier received from the client, if any. It is
    /// adopted only if it is a well-formed [`SessionId`]; otherwise, or if no
    /// candidate was given, a new identifier is generated.
    ///
    /// If the store fails to read the record, the failure is logged and the
    /// session starts out empty.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::AlreadyStarted`] if the session has already
    /// been loaded.
    pub async fn load(&mut self, candidate: Option<&str>) -> Result<SessionId> {
        if self.state != SessionState::Unstarted {
            return Err(SessionError::AlreadyStarted);
        }

        Ok(self.start(candidate).await)
    }

    pub(crate) async fn start(&mut self, candidate: Option<&str>) -> SessionId {
        let id = match candidate.map(SessionId::parse) {
            Some(Ok(id)) => id,
            Some(Err(err)) => {
                debug!(error = %err, "Discarding invalid session id");
                SessionId::generate()
            }
            None => SessionId::generate(),
        };

        self.data = match self.store.read(&id).await {
            Ok(Some(data)) => {
                trace!(session_id = id.redacted(), "Loaded session");
                data
            }
            Ok(None) => {
                trace!(session_id = id.redacted(), "Starting new session");
                SessionData::new()
            }
            Err(err) => {
                warn!(
                    session_id = id.redacted(),
                    error = %err,
                    "Failed to read session; starting with empty data"
                );
                SessionData::new()
            }
        };
        self.state = SessionState::Started;
        self.id = Some(id.clone());

        id
    }

    /// Returns the state of the session.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns the session identifier, or `None` if the session has not been
    /// loaded yet.
    #[must_use]
    pub fn current_id(&self) -> Option<&SessionId> {
        self.id.as_ref()
    }

    /// Returns the session identifier.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotStarted`] if the session has not been
    /// loaded yet.
    pub fn id(&self) -> Result<&SessionId> {
        match &self.id {
            Some(id) if self.state != SessionState::Unstarted => Ok(id),
            _ => Err(not_started()),
        }
    }

    fn data(&self) -> Result<&SessionData> {
        self.id()?;
        Ok(&self.data)
    }

    fn data_mut(&mut self) -> Result<&mut SessionData> {
        self.id()?;
        Ok(&mut self.data)
    }

    /// Gets the value stored under `key`, deserialized into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotStarted`] if the session has not been
    /// loaded, or [`SessionError::Value`] if the stored value cannot be
    /// deserialized into `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.get_value(key)?
            .map(|value| T::deserialize(value).map_err(SessionError::from))
            .transpose()
    }

    /// Gets the raw JSON value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotStarted`] if the session has not been
    /// loaded.
    pub fn get_value(&self, key: &str) -> Result<Option<&Value>> {
        Ok(self.data()?.get(key))
    }

    /// Stores `value` under `key`, returning the previous value, if any.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotStarted`] if the session has not been
    /// loaded, or [`SessionError::Value`] if `value` cannot be serialized.
    pub fn insert<T: Serialize>(
        &mut self,
        key: impl Into<String>,
        value: T,
    ) -> Result<Option<Value>> {
        let value = serde_json::to_value(value)?;
        self.insert_value(key, value)
    }

    /// Stores a raw JSON value under `key`, returning the previous value, if
    /// any.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotStarted`] if the session has not been
    /// loaded.
    pub fn insert_value(
        &mut self,
        key: impl Into<String>,
        value: Value,
    ) -> Result<Option<Value>> {
        Ok(self.data_mut()?.insert(key.into(), value))
    }

    /// Removes the value stored under `key`, returning it, if any.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotStarted`] if the session has not been
    /// loaded.
    pub fn remove(&mut self, key: &str) -> Result<Option<Value>> {
        Ok(self.data_mut()?.remove(key))
    }

    /// Returns `true` if a value is stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotStarted`] if the session has not been
    /// loaded.
    pub fn contains_key(&self, key: &str) -> Result<bool> {
        Ok(self.data()?.contains_key(key))
    }

    /// Returns all the data stored in the session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotStarted`] if the session has not been
    /// loaded.
    pub fn all(&self) -> Result<&SessionData> {
        self.data()
    }

    /// Returns the number of entries stored in the session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotStarted`] if the session has not been
    /// loaded.
    pub fn len(&self) -> Result<usize> {
        Ok(self.data()?.len())
    }

    /// Returns `true` if the session holds no entries.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotStarted`] if the session has not been
    /// loaded.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.data()?.is_empty())
    }

    /// Removes every entry from the session, keeping its identifier.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotStarted`] if the session has not been
    /// loaded.
    pub fn clear(&mut self) -> Result<()> {
        self.data_mut()?.clear();
        Ok(())
    }

    /// Issues a new identifier for the session, keeping its data.
    ///
    /// The record stored under the old identifier is destroyed on the next
    /// [`Session::save`]. Call this after a privilege change (e.g. a login)
    /// so that an identifier known before the change cannot be used
    /// afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotStarted`] if the session has not been
    /// loaded.
    pub fn regenerate_id(&mut self) -> Result<&SessionId> {
        let old_id = self.id()?.clone();
        let new_id = SessionId::generate();
        debug!(
            old_session_id = old_id.redacted(),
            new_session_id = new_id.redacted(),
            "Regenerating session id"
        );

        self.stale_ids.push(old_id);
        Ok(self.id.insert(new_id))
    }

    /// Removes every entry and issues a new identifier; the old record is
    /// destroyed on the next [`Session::save`].
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotStarted`] if the session has not been
    /// loaded.
    pub fn flush(&mut self) -> Result<()> {
        self.clear()?;
        self.regenerate_id()?;
        Ok(())
    }

    /// Writes the session data back to the store, refreshing its expiry.
    ///
    /// Saving more than once is allowed; every call persists the current
    /// data and restarts the lifetime of the record. Records of identifiers
    /// replaced by [`Session::regenerate_id`] are destroyed after the new
    /// record has been written.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotStarted`] if the session has not been
    /// loaded, or [`SessionError::Store`] if the store fails to write the
    /// record or to destroy a replaced one.
    pub async fn save(&mut self) -> Result<()> {
        let id = self.id()?.clone();

        self.store.write(&id, &self.data, self.lifetime).await?;
        trace!(session_id = id.redacted(), entries = self.data.len(), "Saved session");

        while let Some(stale_id) = self.stale_ids.last() {
            self.store.destroy(stale_id).await?;
            self.stale_ids.pop();
        }

        self.state = SessionState::Saved;
        Ok(())
    }

    pub(crate) fn detached(&self) -> Self {
        Self::new(self.store.clone(), self.lifetime)
    }
}

fn not_started() -> SessionError {
    error!("Session accessed before it was loaded");
    SessionError::NotStarted
}

/// A uniform, collection-like view over the data of a session.
///
/// This allows callers to treat a session like a generic associative
/// container: check for a key, fetch, set and unset values, and count the
/// entries.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// use satchel::session::store::RecordStoreWrapper;
/// use satchel::session::store::memory::MemoryStore;
/// use satchel::session::{Session, SessionBag};
///
/// fn remember_visit(bag: &mut impl SessionBag) -> satchel::Result<usize> {
///     if !bag.exists("visited")? {
///         bag.set("visited", serde_json::json!(true))?;
///     }
///     bag.count()
/// }
///
/// # #[tokio::main]
/// # async fn main() -> satchel::Result<()> {
/// let store = RecordStoreWrapper::new(Arc::new(MemoryStore::new()));
/// let mut session = Session::new(store, Duration::from_secs(60));
/// session.load(None).await?;
///
/// assert_eq!(remember_visit(&mut session)?, 1);
/// # Ok(())
/// # }
/// ```
pub trait SessionBag {
    /// Returns `true` if a value is stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying data is not accessible.
    fn exists(&self, key: &str) -> Result<bool>;

    /// Returns the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying data is not accessible.
    fn fetch(&self, key: &str) -> Result<Option<&Value>>;

    /// Stores `value` under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying data is not accessible.
    fn set(&mut self, key: &str, value: Value) -> Result<()>;

    /// Removes the value stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying data is not accessible.
    fn unset(&mut self, key: &str) -> Result<()>;

    /// Returns the number of stored entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying data is not accessible.
    fn count(&self) -> Result<usize>;
}

impl SessionBag for Session {
    fn exists(&self, key: &str) -> Result<bool> {
        self.contains_key(key)
    }

    fn fetch(&self, key: &str) -> Result<Option<&Value>> {
        self.get_value(key)
    }

    fn set(&mut self, key: &str, value: Value) -> Result<()> {
        self.insert_value(key, value)?;
        Ok(())
    }

    fn unset(&mut self, key: &str) -> Result<()> {
        self.remove(key)?;
        Ok(())
    }

    fn count(&self) -> Result<usize> {
        self.len()
    }
}
