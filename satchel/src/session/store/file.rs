//! File record store
//!
//! This module provides a record store that keeps every session record in
//! its own JSON file inside a directory. The file name is the session
//! identifier, which is safe to use as a path component because identifiers
//! are always validated before they reach the store.
//!
//! # Examples
//!
//! ```
//! use std::path::PathBuf;
//!
//! use satchel::session::store::file::FileStore;
//!
//! # let dir = tempfile::tempdir()?;
//! # let path = dir.path().join("sessions");
//! let store = FileStore::new(path)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
use std::borrow::Cow;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, trace, warn};

use crate::clock::{self, Clock};
use crate::session::id::SessionId;
use crate::session::store::{
    Record, RecordStore, RecordStoreError, RecordStoreResult, SessionData, expiry_after,
};

const TEMP_SUFFIX: &str = ".tmp";

/// Errors that can occur when using the file record store.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FileStoreError {
    /// An error occurred during an I/O operation.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// An error occurred during JSON serialization.
    #[error("JSON serialization error: {0}")]
    Serialize(serde_json::Error),
    /// An error occurred during JSON deserialization.
    #[error("JSON deserialization error: {0}")]
    Deserialize(serde_json::Error),
}

impl From<FileStoreError> for RecordStoreError {
    fn from(error: FileStoreError) -> RecordStoreError {
        match error {
            FileStoreError::Io(inner) => RecordStoreError::Backend(inner.to_string()),
            FileStoreError::Serialize(inner) => RecordStoreError::Serialize(inner.to_string()),
            FileStoreError::Deserialize(inner) => RecordStoreError::Deserialize(inner.to_string()),
        }
    }
}

/// A file-based record store implementation.
///
/// This store persists records in a directory on the file system, providing
/// a simple and lightweight storage solution that survives restarts.
///
/// Writes go to a uniquely named temporary file first, which is then renamed
/// over the record file. A rename within one directory is atomic, so
/// concurrent writers and garbage collection never observe a partially
/// written record; the last rename wins.
///
/// # Examples
///
/// ```
/// use satchel::session::store::file::FileStore;
///
/// # let dir = tempfile::tempdir()?;
/// let store = FileStore::new(dir.path().join("sessions"))?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone)]
pub struct FileStore {
    /// The directory to save record files.
    dir_path: Cow<'static, Path>,
    clock: Arc<dyn Clock>,
}

impl FileStore {
    /// Creates a new `FileStore` pointing at the given directory.
    ///
    /// # Errors
    ///
    /// Returns [`FileStoreError::Io`] if it fails to create the directory.
    pub fn new(dir_path: impl Into<Cow<'static, Path>>) -> Result<Self, FileStoreError> {
        Self::with_clock(dir_path, clock::system())
    }

    /// Creates a new `FileStore` that reads the current time from the given
    /// clock.
    ///
    /// # Errors
    ///
    /// Returns [`FileStoreError::Io`] if it fails to create the directory.
    pub fn with_clock(
        dir_path: impl Into<Cow<'static, Path>>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, FileStoreError> {
        let dir_path = dir_path.into();
        std::fs::create_dir_all(&dir_path)?;

        Ok(Self { dir_path, clock })
    }

    /// Returns the directory the records are stored in.
    #[must_use]
    pub fn dir_path(&self) -> &Path {
        &self.dir_path
    }

    fn record_path(&self, id: &SessionId) -> PathBuf {
        self.dir_path.join(id.as_str())
    }

    fn temp_path(&self, id: &SessionId) -> PathBuf {
        // the random part keeps concurrent writers of one id apart
        let nonce = SessionId::generate();
        self.dir_path
            .join(format!(".{id}.{}{TEMP_SUFFIX}", &nonce.as_str()[..12]))
    }

    async fn load_record(path: &Path) -> Result<Option<Record>, FileStoreError> {
        let contents = match fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let record = serde_json::from_str(&contents).map_err(FileStoreError::Deserialize)?;

        Ok(Some(record))
    }

    async fn write_temp(&self, temp_path: &Path, contents: &[u8]) -> Result<(), FileStoreError> {
        match fs::write(temp_path, contents).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                // the directory was removed after the store was created
                fs::create_dir_all(&self.dir_path).await?;
                fs::write(temp_path, contents).await?;
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn remove_if_present(path: &Path) -> Result<bool, FileStoreError> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn is_older_than(
        &self,
        path: &Path,
        lifetime: Duration,
    ) -> Result<bool, FileStoreError> {
        let modified: DateTime<Utc> = fs::metadata(path).await?.modified()?.into();
        let stale_at = expiry_after(modified, lifetime)
            .map_err(|err| FileStoreError::Io(io::Error::other(err)))?;

        Ok(stale_at <= self.clock.now())
    }

    async fn inspect(&self, path: &Path, lifetime: Duration) -> Result<Verdict, FileStoreError> {
        match Self::load_record(path).await {
            Ok(Some(record)) if record.is_expired(self.clock.now()) => {
                Ok(Verdict::Expired(record.id))
            }
            Ok(_) => Ok(Verdict::Keep),
            Err(FileStoreError::Deserialize(err)) => {
                if self.is_older_than(path, lifetime).await? {
                    Ok(Verdict::Unreadable(err))
                } else {
                    Ok(Verdict::Keep)
                }
            }
            Err(err) => Err(err),
        }
    }

    async fn collect_entry(&self, path: &Path, lifetime: Duration) -> Result<bool, FileStoreError> {
        match self.inspect(path, lifetime).await? {
            Verdict::Keep => Ok(false),
            Verdict::Expired(_) | Verdict::Unreadable(_) => {
                self.collect_claimed(path, lifetime).await
            }
        }
    }

    /// Moves the record file out of the way, then decides on the moved copy.
    ///
    /// A write may replace the file between the first inspection and the
    /// removal. Only the claimed copy is removed, and only if it is still
    /// collectable; a refreshed record is put back.
    async fn collect_claimed(
        &self,
        path: &Path,
        lifetime: Duration,
    ) -> Result<bool, FileStoreError> {
        let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
            return Ok(false);
        };
        let nonce = SessionId::generate();
        let claimed = self
            .dir_path
            .join(format!(".{file_name}.gc.{}{TEMP_SUFFIX}", &nonce.as_str()[..12]));
        match fs::rename(path, &claimed).await {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(err.into()),
        }

        match self.inspect(&claimed, lifetime).await {
            Ok(Verdict::Expired(id)) => {
                trace!(session_id = id.redacted(), "Removing expired session");
                Self::remove_if_present(&claimed).await
            }
            Ok(Verdict::Unreadable(err)) => {
                warn!(path = %path.display(), error = %err, "Removing unreadable session file");
                Self::remove_if_present(&claimed).await
            }
            Ok(Verdict::Keep) => {
                debug!(path = %path.display(), "Session file was refreshed during the sweep");
                Self::restore(&claimed, path).await?;
                Ok(false)
            }
            Err(err) => {
                Self::restore(&claimed, path).await?;
                Err(err)
            }
        }
    }

    async fn restore(claimed: &Path, path: &Path) -> Result<(), FileStoreError> {
        // linking never replaces a record written after the claim
        match fs::hard_link(claimed, path).await {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {}
            Err(err) => {
                debug!(error = %err, "Hard links unavailable; renaming session file back");
                fs::rename(claimed, path).await?;
                return Ok(());
            }
        }
        Self::remove_if_present(claimed).await?;
        Ok(())
    }
}

enum Verdict {
    Keep,
    Expired(SessionId),
    Unreadable(serde_json::Error),
}

#[async_trait]
impl RecordStore for FileStore {
    async fn read(&self, id: &SessionId) -> RecordStoreResult<Option<SessionData>> {
        let record = Self::load_record(&self.record_path(id)).await?;

        Ok(record
            .filter(|record| !record.is_expired(self.clock.now()))
            .map(|record| record.data))
    }

    async fn write(
        &self,
        id: &SessionId,
        data: &SessionData,
        lifetime: Duration,
    ) -> RecordStoreResult<()> {
        let record = Record {
            id: id.clone(),
            data: data.clone(),
            expiry_date: expiry_after(self.clock.now(), lifetime)?,
        };
        let json_data = serde_json::to_vec(&record).map_err(FileStoreError::Serialize)?;

        let temp_path = self.temp_path(id);
        self.write_temp(&temp_path, &json_data).await?;
        if let Err(err) = fs::rename(&temp_path, self.record_path(id)).await {
            // best effort; a leftover temporary file is collected by gc
            let _ = fs::remove_file(&temp_path).await;
            return Err(FileStoreError::from(err).into());
        }

        Ok(())
    }

    async fn destroy(&self, id: &SessionId) -> RecordStoreResult<()> {
        Self::remove_if_present(&self.record_path(id)).await?;
        Ok(())
    }

    async fn gc(&self, lifetime: Duration) -> RecordStoreResult<u64> {
        let mut entries = match fs::read_dir(&self.dir_path).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(FileStoreError::from(err).into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await.map_err(FileStoreError::from)? {
            let path = entry.path();
            let Some(file_name) = entry.file_name().to_str().map(ToOwned::to_owned) else {
                continue;
            };

            let result = if SessionId::parse(&file_name).is_ok() {
                self.collect_entry(&path, lifetime).await
            } else if file_name.starts_with('.') && file_name.ends_with(TEMP_SUFFIX) {
                // leftover of an interrupted write or sweep
                match self.is_older_than(&path, lifetime).await {
                    Ok(true) => Self::remove_if_present(&path).await.map(|_| false),
                    Ok(false) => Ok(false),
                    Err(err) => Err(err),
                }
            } else {
                Ok(false)
            };

            match result {
                Ok(true) => removed += 1,
                Ok(false) => {}
                // the entry may have been replaced or removed concurrently
                Err(FileStoreError::Io(err)) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "Failed to collect session file");
                }
            }
        }

        debug!(removed, dir = %self.dir_path.display(), "Session file sweep finished");
        Ok(removed)
    }

    async fn count(&self) -> RecordStoreResult<usize> {
        let mut entries = match fs::read_dir(&self.dir_path).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(FileStoreError::from(err).into()),
        };

        let mut count = 0;
        while let Some(entry) = entries.next_entry().await.map_err(FileStoreError::from)? {
            if entry
                .file_name()
                .to_str()
                .is_some_and(|name| SessionId::parse(name).is_ok())
            {
                count += 1;
            }
        }

        Ok(count)
    }
}
