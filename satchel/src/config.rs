//! Configuration data for the session engine.
//!
//! The main struct in this module is [`SessionConfig`], which contains the
//! session lifetime, the cookie attributes handed to the transport layer, the
//! record store to use, and the garbage collection cadence. After creating an
//! instance using [`SessionConfig::from_toml`] or [`SessionConfigBuilder`],
//! it can be passed to
//! [`SessionManager`](crate::lifecycle::SessionManager).
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//!
//! use satchel::config::{SessionConfig, SessionStoreTypeConfig};
//!
//! let config = SessionConfig::from_toml(
//!     r#"
//! lifetime = 60
//! expire_on_close = true
//!
//! [cookie]
//! name = "app_session"
//!
//! [store]
//! type = "file"
//! path = "/var/lib/app/sessions"
//!
//! [gc]
//! interval = "30min"
//! "#,
//! )?;
//!
//! assert_eq!(config.lifetime(), Duration::from_secs(3600));
//! assert_eq!(config.cookie.name, "app_session");
//! assert!(matches!(
//!     config.store.store_type,
//!     SessionStoreTypeConfig::File { .. }
//! ));
//! assert_eq!(config.gc.interval, Duration::from_secs(1800));
//! # Ok::<(), satchel::config::ConfigError>(())
//! ```

// most of the config structures might be extended with non-Copy types
// in the future, so to avoid breaking backwards compatibility, we're
// not implementing Copy for them
#![allow(missing_copy_implementations)]

use std::fmt;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::Duration;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_LIFETIME_MINUTES: NonZeroU32 = NonZeroU32::new(1440).unwrap();
const DEFAULT_COOKIE_NAME: &str = "satchel_session";
const DEFAULT_GC_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// An error that can occur while loading the configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("could not read configuration file `{path}`: {source}")]
    Io {
        /// The path of the configuration file.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },
    /// The configuration is not valid TOML, or does not match the expected
    /// structure.
    #[error("could not parse session configuration: {0}")]
    Toml(#[from] toml::de::Error),
}

/// The configuration for the session engine.
///
/// # Examples
///
/// ```
/// use std::num::NonZeroU32;
/// use std::time::Duration;
///
/// use satchel::config::SessionConfig;
///
/// let config = SessionConfig::builder()
///     .lifetime(NonZeroU32::new(30).unwrap())
///     .expire_on_close(true)
///     .build();
///
/// assert_eq!(config.lifetime(), Duration::from_secs(30 * 60));
/// assert_eq!(config.cookie_max_age(), None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[builder(build_fn(skip, error = std::convert::Infallible))]
#[serde(default)]
pub struct SessionConfig {
    /// The session inactivity lifetime, in minutes. The default is 1440 (one
    /// day).
    ///
    /// Every successful save of a session pushes the expiry of its record to
    /// `now + lifetime`.
    ///
    /// # Examples
    ///
    /// ```
    /// use satchel::config::SessionConfig;
    ///
    /// let config = SessionConfig::from_toml("lifetime = 120")?;
    /// assert_eq!(config.lifetime.get(), 120);
    /// # Ok::<(), satchel::config::ConfigError>(())
    /// ```
    pub lifetime: NonZeroU32,
    /// Whether the session cookie should be discarded when the browser is
    /// closed. The default is `false`.
    ///
    /// This only affects the cookie handed to the client: the server-side
    /// record still expires after [`SessionConfig::lifetime`].
    pub expire_on_close: bool,
    /// The attributes of the session cookie.
    pub cookie: CookieConfig,
    /// The record store used to persist sessions.
    pub store: SessionStoreConfig,
    /// The garbage collection settings.
    pub gc: GcConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig::builder().build()
    }
}

impl SessionConfig {
    /// Create a new [`SessionConfigBuilder`] to build a [`SessionConfig`].
    ///
    /// # Examples
    ///
    /// ```
    /// use satchel::config::SessionConfig;
    ///
    /// let config = SessionConfig::builder().build();
    /// ```
    #[must_use]
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }

    /// Create a new [`SessionConfig`] from a TOML string.
    ///
    /// # Errors
    ///
    /// This function will return an error if the TOML fails to parse as a
    /// [`SessionConfig`].
    ///
    /// # Examples
    ///
    /// ```
    /// use satchel::config::SessionConfig;
    ///
    /// let config = SessionConfig::from_toml("expire_on_close = true")?;
    /// assert!(config.expire_on_close);
    /// # Ok::<(), satchel::config::ConfigError>(())
    /// ```
    pub fn from_toml(toml_content: &str) -> Result<SessionConfig, ConfigError> {
        let config: SessionConfig = toml::from_str(toml_content)?;
        Ok(config)
    }

    /// Reads a [`SessionConfig`] from a TOML file.
    ///
    /// # Errors
    ///
    /// This function will return an error if the file cannot be read or its
    /// contents fail to parse as a [`SessionConfig`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<SessionConfig, ConfigError> {
        let path = path.as_ref();
        let toml_content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        Self::from_toml(&toml_content)
    }

    /// Returns the session lifetime.
    ///
    /// This is always [`SessionConfig::lifetime`] minutes, regardless of
    /// [`SessionConfig::expire_on_close`].
    #[must_use]
    pub fn lifetime(&self) -> Duration {
        Duration::from_secs(self.lifetime_seconds())
    }

    /// Returns the session lifetime in seconds.
    #[must_use]
    pub fn lifetime_seconds(&self) -> u64 {
        u64::from(self.lifetime.get()) * 60
    }

    /// Returns the `Max-Age` of the session cookie, or `None` if the cookie
    /// should only live until the browser is closed.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use satchel::config::SessionConfig;
    ///
    /// let config = SessionConfig::from_toml("lifetime = 1")?;
    /// assert_eq!(config.cookie_max_age(), Some(Duration::from_secs(60)));
    /// # Ok::<(), satchel::config::ConfigError>(())
    /// ```
    #[must_use]
    pub fn cookie_max_age(&self) -> Option<Duration> {
        if self.expire_on_close {
            None
        } else {
            Some(self.lifetime())
        }
    }
}

impl SessionConfigBuilder {
    /// Builds the session configuration.
    ///
    /// # Examples
    ///
    /// ```
    /// use satchel::config::SessionConfig;
    ///
    /// let config = SessionConfig::builder().expire_on_close(true).build();
    /// ```
    #[must_use]
    pub fn build(&self) -> SessionConfig {
        SessionConfig {
            lifetime: self.lifetime.unwrap_or(DEFAULT_LIFETIME_MINUTES),
            expire_on_close: self.expire_on_close.unwrap_or_default(),
            cookie: self.cookie.clone().unwrap_or_default(),
            store: self.store.clone().unwrap_or_default(),
            gc: self.gc.clone().unwrap_or_default(),
        }
    }
}

/// The attributes of the session cookie.
///
/// The session engine does not set cookies itself; these values are handed
/// to the transport layer through
/// [`SessionCookie`](crate::lifecycle::SessionCookie).
///
/// # Examples
///
/// ```
/// use satchel::config::CookieConfig;
///
/// let config = CookieConfig::builder()
///     .name("app_session")
///     .domain("example.com")
///     .secure(false)
///     .build();
/// assert_eq!(config.path, "/");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[builder(build_fn(skip, error = std::convert::Infallible))]
#[serde(default)]
pub struct CookieConfig {
    /// The name of the cookie. The default is `satchel_session`.
    #[builder(setter(into))]
    pub name: String,
    /// The path the cookie is valid for. The default is `/`.
    #[builder(setter(into))]
    pub path: String,
    /// The domain the cookie is valid for. The default is no domain, which
    /// makes the cookie valid for the current host only.
    #[builder(setter(into, strip_option), default)]
    pub domain: Option<String>,
    /// Whether the cookie should only be sent over HTTPS. The default is
    /// `true`.
    pub secure: bool,
    /// Whether the cookie should be hidden from client-side scripts. The
    /// default is `true`.
    pub http_only: bool,
    /// The `SameSite` attribute of the cookie. The default is
    /// [`SameSite::Lax`].
    pub same_site: SameSite,
}

impl Default for CookieConfig {
    fn default() -> Self {
        CookieConfig::builder().build()
    }
}

impl CookieConfig {
    /// Create a new [`CookieConfigBuilder`] to build a [`CookieConfig`].
    #[must_use]
    pub fn builder() -> CookieConfigBuilder {
        CookieConfigBuilder::default()
    }
}

impl CookieConfigBuilder {
    /// Builds the cookie configuration.
    #[must_use]
    pub fn build(&self) -> CookieConfig {
        CookieConfig {
            name: self
                .name
                .clone()
                .unwrap_or_else(|| DEFAULT_COOKIE_NAME.to_owned()),
            path: self.path.clone().unwrap_or_else(|| "/".to_owned()),
            domain: self.domain.clone().unwrap_or_default(),
            secure: self.secure.unwrap_or(true),
            http_only: self.http_only.unwrap_or(true),
            same_site: self.same_site.unwrap_or_default(),
        }
    }
}

/// The `SameSite` attribute of a cookie.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SameSite {
    /// The cookie is only sent with same-site requests.
    Strict,
    /// The cookie is sent with same-site requests and top-level navigations.
    #[default]
    Lax,
    /// The cookie is sent with all requests. Requires a secure cookie.
    None,
}

impl fmt::Display for SameSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        })
    }
}

/// The configuration for the record store.
///
/// # Examples
///
/// ```
/// use satchel::config::{SessionStoreConfig, SessionStoreTypeConfig};
///
/// let config = SessionStoreConfig::builder()
///     .store_type(SessionStoreTypeConfig::Memory)
///     .build();
/// ```
#[derive(Debug, Default, Clone, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[builder(build_fn(skip, error = std::convert::Infallible))]
pub struct SessionStoreConfig {
    /// The type of the record store, along with its settings.
    #[serde(flatten)]
    pub store_type: SessionStoreTypeConfig,
}

impl SessionStoreConfig {
    /// Create a new [`SessionStoreConfigBuilder`] to build a
    /// [`SessionStoreConfig`].
    #[must_use]
    pub fn builder() -> SessionStoreConfigBuilder {
        SessionStoreConfigBuilder::default()
    }
}

impl SessionStoreConfigBuilder {
    /// Builds the record store configuration.
    #[must_use]
    pub fn build(&self) -> SessionStoreConfig {
        SessionStoreConfig {
            store_type: self.store_type.clone().unwrap_or_default(),
        }
    }
}

/// The type of the record store.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionStoreTypeConfig {
    /// Keep records in process memory.
    ///
    /// This enables [`MemoryStore`](crate::session::store::memory::MemoryStore).
    #[default]
    Memory,
    /// Keep every record in its own file inside a directory.
    ///
    /// This enables [`FileStore`](crate::session::store::file::FileStore).
    File {
        /// The directory to store the record files in.
        path: PathBuf,
    },
}

/// The configuration for garbage collection of expired records.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use satchel::config::GcConfig;
///
/// let config = GcConfig::builder()
///     .interval(Duration::from_secs(15 * 60))
///     .build();
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[builder(build_fn(skip, error = std::convert::Infallible))]
#[serde(default)]
pub struct GcConfig {
    /// How often the recurring garbage collection task runs. The default is
    /// one hour.
    ///
    /// # TOML
    ///
    /// This field is serialized as a "human-readable" duration, like `1h` or
    /// `30min`. Please refer to the [`humantime::parse_duration`]
    /// documentation for the supported formats for this field.
    #[serde(with = "crate::serializers::humantime")]
    pub interval: Duration,
}

impl Default for GcConfig {
    fn default() -> Self {
        GcConfig::builder().build()
    }
}

impl GcConfig {
    /// Create a new [`GcConfigBuilder`] to build a [`GcConfig`].
    #[must_use]
    pub fn builder() -> GcConfigBuilder {
        GcConfigBuilder::default()
    }
}

impl GcConfigBuilder {
    /// Builds the garbage collection configuration.
    #[must_use]
    pub fn build(&self) -> GcConfig {
        GcConfig {
            interval: self.interval.unwrap_or(DEFAULT_GC_INTERVAL),
        }
    }
}
