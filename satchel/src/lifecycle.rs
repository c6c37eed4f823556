//! Per-request session lifecycle and garbage collection.
//!
//! [`SessionManager`] glues sessions to a request/response cycle without
//! owning any transport or persistence details. A host (a web framework
//! middleware, a test, the CLI) drives it through three entry points:
//!
//! 1. [`SessionManager::begin_request`] resolves the identifier received from
//!    the client and loads the session,
//! 2. [`SessionManager::end_request`] saves the session at the end of the
//!    request,
//! 3. [`SessionManager::run_garbage_collection`] removes expired records, and
//!    is meant to be called periodically (see
//!    [`spawn_gc_task`](crate::scheduler::spawn_gc_task)).
//!
//! # Examples
//!
//! ```
//! use satchel::config::SessionConfig;
//! use satchel::lifecycle::SessionManager;
//!
//! # #[tokio::main]
//! # async fn main() -> satchel::Result<()> {
//! let manager = SessionManager::from_config(SessionConfig::default())?;
//!
//! // first request: no cookie yet
//! let mut request = manager.begin_request(None).await;
//! request.insert("cart", vec![1, 2])?;
//! let cookie = manager.end_request(request).await?;
//!
//! // second request: the client sends the cookie back
//! let request = manager.begin_request(Some(&cookie.value)).await;
//! assert_eq!(request.get::<Vec<u32>>("cart")?, Some(vec![1, 2]));
//! manager.end_request(request).await?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use derive_more::{Deref, DerefMut};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::{SameSite, SessionConfig};
use crate::error::{Result, SessionError};
use crate::session::Session;
use crate::session::id::SessionId;
use crate::session::store::{RecordStore, RecordStoreWrapper};

/// Orchestrates the lifecycle of sessions.
///
/// `SessionManager` is cheap to clone; all clones share the same store,
/// maintenance flag and garbage collection state.
#[derive(Debug, Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

#[derive(Debug)]
struct ManagerInner {
    config: SessionConfig,
    store: RecordStoreWrapper,
    maintenance_mode: AtomicBool,
    gc_running: AtomicBool,
    gc_scheduled: AtomicBool,
}

/// The result of a [`SessionManager::run_garbage_collection`] call.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum GcOutcome {
    /// The store was swept and the given number of expired records was
    /// removed.
    Collected(u64),
    /// The host is in maintenance mode, so the sweep was deliberately
    /// skipped.
    SkippedMaintenance,
    /// Another sweep was still in progress, so this one did nothing.
    AlreadyRunning,
}

impl SessionManager {
    /// Creates a new session manager persisting sessions in `store`.
    #[must_use]
    pub fn new(config: SessionConfig, store: RecordStoreWrapper) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                config,
                store,
                maintenance_mode: AtomicBool::new(false),
                gc_running: AtomicBool::new(false),
                gc_scheduled: AtomicBool::new(false),
            }),
        }
    }

    /// Creates a new session manager with the record store described by
    /// [`SessionConfig::store`].
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Store`] if the store could not be initialized.
    pub fn from_config(config: SessionConfig) -> Result<Self> {
        let store = RecordStoreWrapper::from_config(&config.store)?;
        Ok(Self::new(config, store))
    }

    /// Returns the configuration of the manager.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Returns the record store of the manager.
    #[must_use]
    pub fn store(&self) -> &RecordStoreWrapper {
        &self.inner.store
    }

    /// Returns the lifetime of session records.
    #[must_use]
    pub fn lifetime(&self) -> Duration {
        self.inner.config.lifetime()
    }

    /// Puts the host in or out of maintenance mode.
    ///
    /// While in maintenance mode, [`SessionManager::run_garbage_collection`]
    /// does nothing.
    pub fn set_maintenance_mode(&self, enabled: bool) {
        self.inner.maintenance_mode.store(enabled, Ordering::SeqCst);
    }

    /// Returns `true` if the host is in maintenance mode.
    #[must_use]
    pub fn is_maintenance_mode(&self) -> bool {
        self.inner.maintenance_mode.load(Ordering::SeqCst)
    }

    /// Creates a new, unstarted session backed by the store of this manager.
    #[must_use]
    pub fn new_session(&self) -> Session {
        Session::new(self.inner.store.clone(), self.lifetime())
    }

    /// Starts the session for an incoming request.
    ///
    /// `inbound` is the identifier read from the session cookie, if the
    /// client sent one. Malformed identifiers are discarded and a new one is
    /// issued; a record that fails to load results in an empty session.
    ///
    /// The returned [`RequestSession`] should be passed to
    /// [`SessionManager::end_request`] once the request has been handled.
    /// If it is dropped instead (e.g. because the handler returned early or
    /// panicked), the session is still saved in the background.
    pub async fn begin_request(&self, inbound: Option<&str>) -> RequestSession {
        let mut session = self.new_session();
        let id = session.start(inbound).await;
        debug!(session_id = id.redacted(), "Session started");

        RequestSession {
            session,
            manager: self.clone(),
            armed: true,
        }
    }

    /// Saves the session at the end of a request and returns the cookie that
    /// binds it to the client.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Store`] if the session could not be saved. The
    /// failure is not retried.
    ///
    /// If the returned future is dropped before the save completes, the
    /// session is saved in the background like a dropped [`RequestSession`].
    pub async fn end_request(&self, mut request: RequestSession) -> Result<SessionCookie> {
        let saved = request.session.save().await;
        request.armed = false;
        saved?;

        Ok(request.cookie())
    }

    /// Runs `handler` with the session of an incoming request and saves the
    /// session afterwards, whether the handler succeeded or not.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Handler`] if the handler failed (along with a
    /// commit failure, if the save failed as well), or
    /// [`RequestError::Commit`] if only the save failed.
    ///
    /// # Examples
    ///
    /// ```
    /// use satchel::config::SessionConfig;
    /// use satchel::lifecycle::SessionManager;
    /// use satchel::session::Session;
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let manager = SessionManager::from_config(SessionConfig::default())?;
    ///
    /// let handled = manager
    ///     .run_request(None, async |session: &mut Session| {
    ///         let visits = session.get::<u32>("visits")?.unwrap_or(0) + 1;
    ///         session.insert("visits", visits)?;
    ///         Ok::<_, satchel::SessionError>(visits)
    ///     })
    ///     .await?;
    ///
    /// assert_eq!(handled.value, 1);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn run_request<T, E, F>(
        &self,
        inbound: Option<&str>,
        handler: F,
    ) -> std::result::Result<HandledRequest<T>, RequestError<E>>
    where
        F: AsyncFnOnce(&mut Session) -> std::result::Result<T, E>,
    {
        let mut request = self.begin_request(inbound).await;
        let result = handler(&mut request.session).await;
        let commit = self.end_request(request).await;

        match (result, commit) {
            (Ok(value), Ok(cookie)) => Ok(HandledRequest { value, cookie }),
            (Ok(_), Err(err)) => Err(RequestError::Commit(err)),
            (Err(error), commit) => Err(RequestError::Handler {
                error,
                commit_error: commit.err(),
            }),
        }
    }

    /// Removes every expired session record from the store.
    ///
    /// Does nothing while the host is in maintenance mode, or while another
    /// sweep started by this manager is still running.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Store`] if the store failed to sweep its
    /// records.
    pub async fn run_garbage_collection(&self) -> Result<GcOutcome> {
        if self.is_maintenance_mode() {
            debug!("Skipping session garbage collection in maintenance mode");
            return Ok(GcOutcome::SkippedMaintenance);
        }
        let Some(_guard) = FlagGuard::acquire(&self.inner.gc_running) else {
            debug!("Session garbage collection already in progress");
            return Ok(GcOutcome::AlreadyRunning);
        };

        let removed = self.inner.store.gc(self.lifetime()).await?;
        if removed > 0 {
            info!(removed, "Removed expired sessions");
        } else {
            debug!("No expired sessions to remove");
        }

        Ok(GcOutcome::Collected(removed))
    }

    /// Destroys the record stored under `id`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Store`] if the store failed to remove the
    /// record.
    pub async fn destroy(&self, id: &SessionId) -> Result<()> {
        self.inner.store.destroy(id).await?;
        Ok(())
    }

    fn cookie_for(&self, id: Option<&SessionId>) -> SessionCookie {
        let config = &self.inner.config;
        SessionCookie {
            name: config.cookie.name.clone(),
            value: id.map(ToString::to_string).unwrap_or_default(),
            max_age: config.cookie_max_age(),
            path: config.cookie.path.clone(),
            domain: config.cookie.domain.clone(),
            secure: config.cookie.secure,
            http_only: config.cookie.http_only,
            same_site: config.cookie.same_site,
        }
    }

    pub(crate) fn try_register_gc(&self) -> bool {
        self.inner
            .gc_scheduled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn release_gc(&self) {
        self.inner.gc_scheduled.store(false, Ordering::SeqCst);
    }
}

struct FlagGuard<'a>(&'a AtomicBool);

impl<'a> FlagGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// The session of a request that is being handled.
///
/// Dereferences to [`Session`]. Pass it to [`SessionManager::end_request`]
/// when the request is done; if it is dropped without that, the session is
/// saved on a background task of the current tokio runtime.
#[derive(Debug, Deref, DerefMut)]
pub struct RequestSession {
    #[deref]
    #[deref_mut]
    session: Session,
    manager: SessionManager,
    armed: bool,
}

impl RequestSession {
    /// Returns the cookie that binds the session to the client.
    ///
    /// The cookie always carries the current identifier, so it should be
    /// read after any call to
    /// [`Session::regenerate_id`](crate::session::Session::regenerate_id).
    #[must_use]
    pub fn cookie(&self) -> SessionCookie {
        self.manager.cookie_for(self.session.current_id())
    }
}

impl Drop for RequestSession {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let detached = self.session.detached();
        let mut session = std::mem::replace(&mut self.session, detached);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("Session was not ended explicitly; saving in the background");
                handle.spawn(async move {
                    if let Err(err) = session.save().await {
                        error!(error = %err, "Failed to save session in the background");
                    }
                });
            }
            Err(_) => {
                error!("Session dropped outside of a tokio runtime; changes are lost");
            }
        }
    }
}

/// The value of a request handled by [`SessionManager::run_request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandledRequest<T> {
    /// The value returned by the handler.
    pub value: T,
    /// The cookie that binds the session to the client.
    pub cookie: SessionCookie,
}

/// An error returned by [`SessionManager::run_request`].
#[derive(Debug, Error)]
pub enum RequestError<E> {
    /// The request handler failed.
    #[error("request handler failed: {error}")]
    Handler {
        /// The error returned by the handler.
        error: E,
        /// The error that occurred while saving the session afterwards, if
        /// any.
        commit_error: Option<SessionError>,
    },
    /// The handler succeeded, but the session could not be saved.
    #[error("could not save session: {0}")]
    Commit(#[source] SessionError),
}

/// The session cookie to hand to the transport layer.
///
/// The [`Display`](fmt::Display) implementation renders the value of a
/// `Set-Cookie` header.
///
/// # Examples
///
/// ```
/// use satchel::config::SessionConfig;
/// use satchel::lifecycle::SessionManager;
///
/// # #[tokio::main]
/// # async fn main() -> satchel::Result<()> {
/// let manager = SessionManager::from_config(SessionConfig::default())?;
/// let request = manager.begin_request(None).await;
/// let cookie = manager.end_request(request).await?;
///
/// assert_eq!(cookie.name, "satchel_session");
/// assert!(cookie.to_string().starts_with("satchel_session="));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCookie {
    /// The name of the cookie.
    pub name: String,
    /// The session identifier.
    pub value: String,
    /// How long the client should keep the cookie, or `None` for a cookie
    /// that is discarded when the browser is closed.
    pub max_age: Option<Duration>,
    /// The path the cookie is valid for.
    pub path: String,
    /// The domain the cookie is valid for.
    pub domain: Option<String>,
    /// Whether the cookie is only sent over HTTPS.
    pub secure: bool,
    /// Whether the cookie is hidden from client-side scripts.
    pub http_only: bool,
    /// The `SameSite` attribute of the cookie.
    pub same_site: SameSite,
}

impl fmt::Display for SessionCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}; Path={}", self.name, self.value, self.path)?;
        if let Some(domain) = &self.domain {
            write!(f, "; Domain={domain}")?;
        }
        if let Some(max_age) = self.max_age {
            write!(f, "; Max-Age={}", max_age.as_secs())?;
        }
        if self.secure {
            f.write_str("; Secure")?;
        }
        if self.http_only {
            f.write_str("; HttpOnly")?;
        }
        write!(f, "; SameSite={}", self.same_site)
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU32;
    use std::panic::AssertUnwindSafe;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use futures::FutureExt;
    use serde_json::json;
    use tracing_test::traced_test;

    use super::*;
    use crate::config::CookieConfig;
    use crate::session::store::memory::MemoryStore;
    use crate::session::store::{MockRecordStore, RecordStoreError, RecordStoreResult, SessionData};
    use crate::test::ManualClock;

    /// A memory store whose first write never completes.
    #[derive(Debug, Clone, Default)]
    struct StallingStore {
        inner: MemoryStore,
        stalled: Arc<AtomicBool>,
    }

    #[async_trait]
    impl RecordStore for StallingStore {
        async fn read(&self, id: &SessionId) -> RecordStoreResult<Option<SessionData>> {
            self.inner.read(id).await
        }

        async fn write(
            &self,
            id: &SessionId,
            data: &SessionData,
            lifetime: Duration,
        ) -> RecordStoreResult<()> {
            if !self.stalled.swap(true, Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            self.inner.write(id, data, lifetime).await
        }

        async fn destroy(&self, id: &SessionId) -> RecordStoreResult<()> {
            self.inner.destroy(id).await
        }

        async fn gc(&self, lifetime: Duration) -> RecordStoreResult<u64> {
            self.inner.gc(lifetime).await
        }

        async fn count(&self) -> RecordStoreResult<usize> {
            self.inner.count().await
        }
    }

    async fn wait_for_record(store: &impl RecordStore, id: &SessionId) -> Option<SessionData> {
        for _ in 0..100 {
            if let Some(data) = store.read(id).await.unwrap() {
                return Some(data);
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        None
    }

    fn make_manager(lifetime_minutes: u32) -> (SessionManager, MemoryStore, ManualClock) {
        let clock = ManualClock::new();
        let store = MemoryStore::with_clock(Arc::new(clock.clone()));
        let config = SessionConfig::builder()
            .lifetime(NonZeroU32::new(lifetime_minutes).unwrap())
            .build();
        let manager = SessionManager::new(config, RecordStoreWrapper::new(Arc::new(store.clone())));
        (manager, store, clock)
    }

    #[tokio::test]
    async fn begin_request_without_cookie() {
        let (manager, store, _) = make_manager(1);

        let request = manager.begin_request(None).await;
        let id = request.id().unwrap().clone();
        let cookie = manager.end_request(request).await.unwrap();

        assert_eq!(cookie.value, id.as_str());
        assert!(store.read(&id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn begin_request_with_invalid_cookie() {
        let (manager, _, _) = make_manager(1);

        let request = manager.begin_request(Some("a/b")).await;
        let cookie = request.cookie();
        assert_ne!(cookie.value, "a/b");
        assert!(SessionId::parse(&cookie.value).is_ok());
        manager.end_request(request).await.unwrap();
    }

    #[tokio::test]
    async fn cookie_uses_config() {
        let clock = ManualClock::new();
        let store = MemoryStore::with_clock(Arc::new(clock));
        let config = SessionConfig::builder()
            .lifetime(NonZeroU32::new(2).unwrap())
            .cookie(
                CookieConfig::builder()
                    .name("sid")
                    .path("/app")
                    .domain("example.com")
                    .build(),
            )
            .build();
        let manager = SessionManager::new(config, RecordStoreWrapper::new(Arc::new(store)));

        let request = manager.begin_request(None).await;
        let cookie = manager.end_request(request).await.unwrap();

        assert_eq!(cookie.name, "sid");
        assert_eq!(cookie.path, "/app");
        assert_eq!(cookie.domain.as_deref(), Some("example.com"));
        assert_eq!(cookie.max_age, Some(Duration::from_secs(120)));
        assert_eq!(
            cookie.to_string(),
            format!(
                "sid={}; Path=/app; Domain=example.com; Max-Age=120; Secure; HttpOnly; SameSite=Lax",
                cookie.value
            )
        );
    }

    #[tokio::test]
    async fn cookie_expire_on_close() {
        let config = SessionConfig::builder().expire_on_close(true).build();
        let manager = SessionManager::new(
            config,
            RecordStoreWrapper::new(Arc::new(MemoryStore::new())),
        );

        let request = manager.begin_request(None).await;
        let cookie = manager.end_request(request).await.unwrap();
        assert_eq!(cookie.max_age, None);
        assert!(!cookie.to_string().contains("Max-Age"));
    }

    #[tokio::test]
    async fn cookie_follows_regenerated_id() {
        let (manager, store, _) = make_manager(1);

        let mut request = manager.begin_request(None).await;
        let old_id = request.id().unwrap().clone();
        request.insert("user", "alice").unwrap();
        let new_id = request.regenerate_id().unwrap().clone();
        let cookie = manager.end_request(request).await.unwrap();

        assert_eq!(cookie.value, new_id.as_str());
        assert_eq!(store.read(&old_id).await.unwrap(), None);
        assert!(store.read(&new_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn end_request_reports_save_failure() {
        let writes = Arc::new(AtomicUsize::new(0));
        let mut mock = MockRecordStore::new();
        mock.expect_read().returning(|_| Ok(None));
        let mock_writes = Arc::clone(&writes);
        mock.expect_write().returning(move |_, _, _| {
            mock_writes.fetch_add(1, Ordering::SeqCst);
            Err(RecordStoreError::Backend("timeout".to_owned()))
        });
        let manager = SessionManager::new(
            SessionConfig::default(),
            RecordStoreWrapper::new(Arc::new(mock)),
        );

        let request = manager.begin_request(None).await;
        let result = manager.end_request(request).await;
        assert!(matches!(result, Err(SessionError::Store(_))));

        // a reported failure is not retried in the background
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn cancelled_end_request_still_saves() {
        let store = StallingStore::default();
        let manager = SessionManager::new(
            SessionConfig::default(),
            RecordStoreWrapper::new(Arc::new(store.clone())),
        );

        let mut request = manager.begin_request(None).await;
        request.insert("cart", json!([1])).unwrap();
        let id = request.id().unwrap().clone();
        let result =
            tokio::time::timeout(Duration::from_millis(20), manager.end_request(request)).await;
        assert!(result.is_err());

        let data = wait_for_record(&store, &id).await.unwrap();
        assert_eq!(data.get("cart"), Some(&json!([1])));
        assert!(logs_contain("Session was not ended explicitly"));
    }

    #[tokio::test]
    async fn panicking_handler_still_saves() {
        let (manager, store, _) = make_manager(1);
        let id = SessionId::generate();

        let result = AssertUnwindSafe(manager.run_request(
            Some(id.as_str()),
            async |session: &mut Session| {
                session.insert("cart", vec![1, 2])?;
                if session.contains_key("cart")? {
                    panic!("handler failed");
                }
                Ok::<_, SessionError>(())
            },
        ))
        .catch_unwind()
        .await;
        assert!(result.is_err());

        let data = wait_for_record(&store, &id).await.unwrap();
        assert_eq!(data.get("cart"), Some(&json!([1, 2])));
    }

    #[test]
    #[traced_test]
    fn dropped_outside_runtime_is_logged() {
        let (manager, store, _) = make_manager(1);
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let mut request = runtime.block_on(manager.begin_request(None));
        request.insert("cart", json!([1])).unwrap();
        let id = request.id().unwrap().clone();
        drop(request);

        assert!(logs_contain("Session dropped outside of a tokio runtime"));
        assert_eq!(runtime.block_on(store.read(&id)).unwrap(), None);
    }

    #[tokio::test]
    async fn write_uses_configured_lifetime() {
        let mut mock = MockRecordStore::new();
        mock.expect_read().returning(|_| Ok(None));
        mock.expect_write()
            .withf(|_, _, lifetime| *lifetime == Duration::from_secs(3600))
            .times(1)
            .returning(|_, _, _| Ok(()));
        let config = SessionConfig::builder()
            .lifetime(NonZeroU32::new(60).unwrap())
            .expire_on_close(true)
            .build();
        let manager = SessionManager::new(config, RecordStoreWrapper::new(Arc::new(mock)));

        let request = manager.begin_request(None).await;
        manager.end_request(request).await.unwrap();
    }

    #[tokio::test]
    #[traced_test]
    async fn dropped_request_is_saved() {
        let (manager, store, _) = make_manager(1);

        let id = {
            let mut request = manager.begin_request(None).await;
            request.insert("cart", json!([1])).unwrap();
            request.id().unwrap().clone()
        };

        for _ in 0..100 {
            if store.read(&id).await.unwrap().is_some() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(
            store.read(&id).await.unwrap().unwrap().get("cart"),
            Some(&json!([1]))
        );
        assert!(logs_contain("Session was not ended explicitly"));
    }

    #[tokio::test]
    async fn run_request_commits() {
        let (manager, store, _) = make_manager(1);

        let handled = manager
            .run_request(None, async |session: &mut Session| {
                session.insert("cart", vec![1, 2])?;
                Ok::<_, SessionError>("done")
            })
            .await
            .unwrap();

        assert_eq!(handled.value, "done");
        let id = SessionId::parse(&handled.cookie.value).unwrap();
        assert_eq!(
            store.read(&id).await.unwrap().unwrap().get("cart"),
            Some(&json!([1, 2]))
        );
    }

    #[tokio::test]
    async fn run_request_commits_on_handler_error() {
        let (manager, store, _) = make_manager(1);
        let id = SessionId::generate();

        let result = manager
            .run_request(Some(id.as_str()), async |session: &mut Session| {
                session.insert("attempted", true)?;
                Err::<(), _>(SessionError::NotStarted)
            })
            .await;

        assert!(matches!(
            result,
            Err(RequestError::Handler {
                error: SessionError::NotStarted,
                commit_error: None
            })
        ));
        assert_eq!(
            store.read(&id).await.unwrap().unwrap().get("attempted"),
            Some(&json!(true))
        );
    }

    #[tokio::test]
    async fn run_request_reports_commit_error() {
        let mut mock = MockRecordStore::new();
        mock.expect_read().returning(|_| Ok(None));
        mock.expect_write()
            .returning(|_, _, _| Err(RecordStoreError::Backend("read-only".to_owned())));
        let manager = SessionManager::new(
            SessionConfig::default(),
            RecordStoreWrapper::new(Arc::new(mock)),
        );

        let result = manager
            .run_request(None, async |_: &mut Session| Ok::<_, SessionError>(()))
            .await;
        assert!(matches!(result, Err(RequestError::Commit(_))));
    }

    #[tokio::test]
    async fn garbage_collection_removes_expired() {
        let (manager, store, clock) = make_manager(1);

        let request = manager.begin_request(None).await;
        manager.end_request(request).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);

        clock.advance(Duration::from_secs(61));
        assert_eq!(
            manager.run_garbage_collection().await.unwrap(),
            GcOutcome::Collected(1)
        );
        assert_eq!(
            manager.run_garbage_collection().await.unwrap(),
            GcOutcome::Collected(0)
        );
    }

    #[tokio::test]
    async fn garbage_collection_skipped_in_maintenance_mode() {
        let (manager, store, clock) = make_manager(1);
        let request = manager.begin_request(None).await;
        manager.end_request(request).await.unwrap();
        clock.advance(Duration::from_secs(61));

        manager.set_maintenance_mode(true);
        assert!(manager.is_maintenance_mode());
        assert_eq!(
            manager.run_garbage_collection().await.unwrap(),
            GcOutcome::SkippedMaintenance
        );
        assert_eq!(store.count().await.unwrap(), 1);

        manager.set_maintenance_mode(false);
        assert_eq!(
            manager.run_garbage_collection().await.unwrap(),
            GcOutcome::Collected(1)
        );
    }

    #[tokio::test]
    async fn garbage_collection_uses_lifetime() {
        let mut mock = MockRecordStore::new();
        mock.expect_gc()
            .withf(|lifetime| *lifetime == Duration::from_secs(3600))
            .times(1)
            .returning(|_| Ok(3));
        let config = SessionConfig::builder()
            .lifetime(NonZeroU32::new(60).unwrap())
            .build();
        let manager = SessionManager::new(config, RecordStoreWrapper::new(Arc::new(mock)));

        assert_eq!(
            manager.run_garbage_collection().await.unwrap(),
            GcOutcome::Collected(3)
        );
    }

    #[tokio::test]
    async fn garbage_collection_reports_failure() {
        let mut mock = MockRecordStore::new();
        mock.expect_gc()
            .returning(|_| Err(RecordStoreError::Backend("locked".to_owned())));
        let manager = SessionManager::new(
            SessionConfig::default(),
            RecordStoreWrapper::new(Arc::new(mock)),
        );

        assert!(manager.run_garbage_collection().await.is_err());
    }

    #[tokio::test]
    async fn overlapping_garbage_collection_is_a_no_op() {
        let (manager, _, _) = make_manager(1);

        let guard = FlagGuard::acquire(&manager.inner.gc_running).unwrap();
        assert_eq!(
            manager.run_garbage_collection().await.unwrap(),
            GcOutcome::AlreadyRunning
        );
        drop(guard);
        assert_eq!(
            manager.run_garbage_collection().await.unwrap(),
            GcOutcome::Collected(0)
        );
    }

    #[tokio::test]
    async fn destroy_removes_record() {
        let (manager, store, _) = make_manager(1);
        let request = manager.begin_request(None).await;
        let id = request.id().unwrap().clone();
        manager.end_request(request).await.unwrap();

        manager.destroy(&id).await.unwrap();
        assert_eq!(store.read(&id).await.unwrap(), None);
        manager.destroy(&id).await.unwrap();
    }
}
