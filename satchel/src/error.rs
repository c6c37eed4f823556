//! Error types returned by the session engine.

use thiserror::Error;

use crate::session::store::RecordStoreError;

/// An error that can occur while working with sessions.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    /// The session was accessed before it was loaded.
    ///
    /// This is a programming error: a session has to be loaded with
    /// [`Session::load`](crate::session::Session::load) (or obtained from
    /// [`SessionManager::begin_request`](crate::lifecycle::SessionManager::begin_request))
    /// before its data can be used.
    #[error("session accessed before it was started")]
    NotStarted,
    /// [`Session::load`](crate::session::Session::load) was called on a
    /// session that had already been loaded.
    #[error("session has already been started")]
    AlreadyStarted,
    /// The underlying record store failed.
    #[error(transparent)]
    Store(#[from] RecordStoreError),
    /// A value could not be converted to or from its stored JSON form.
    #[error("could not convert session value: {0}")]
    Value(#[from] serde_json::Error),
    /// A recurring garbage collection task is already registered for the
    /// session manager.
    #[error("garbage collection is already scheduled for this session manager")]
    GcAlreadyScheduled,
    /// The garbage collection interval is zero.
    #[error("garbage collection interval must be greater than zero")]
    InvalidGcInterval,
    /// A background task was requested outside of a tokio runtime.
    #[error("no tokio runtime is available to run the background task")]
    NoRuntime,
}

/// A type alias for results that can contain a [`SessionError`].
pub type Result<T> = std::result::Result<T, SessionError>;
