//! Session identifiers.
//!
//! A [`SessionId`] is an opaque, unguessable token that correlates a client
//! with the server-side session record. Identifiers are generated from a
//! cryptographically secure random source and are validated whenever they are
//! received from the outside world (e.g. from a cookie), so that a
//! malformed or injected value is never used as a storage key.

use std::fmt;
use std::str::FromStr;

use derive_more::Display;
use rand::Rng;
use rand::distr::Alphanumeric;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// A validated session identifier.
///
/// Every identifier is exactly [`SessionId::LENGTH`] characters long and
/// consists of ASCII letters and digits only, which makes it safe to use in
/// cookies, URLs and file names.
///
/// # Examples
///
/// ```
/// use satchel::session::id::SessionId;
///
/// let id = SessionId::generate();
/// assert_eq!(id.as_str().len(), SessionId::LENGTH);
///
/// let parsed: SessionId = id.as_str().parse()?;
/// assert_eq!(parsed, id);
///
/// assert!(SessionId::parse("../etc/passwd").is_err());
/// # Ok::<(), satchel::session::id::InvalidSessionId>(())
/// ```
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Serialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// The number of characters in a session identifier.
    ///
    /// 40 characters from a 62-symbol alphabet carry roughly 238 bits of
    /// entropy.
    pub const LENGTH: usize = 40;

    /// Generates a new random identifier.
    ///
    /// The identifier is drawn from the thread-local CSPRNG, so no collision
    /// check against the store is needed.
    #[must_use]
    pub fn generate() -> Self {
        let id: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(Self::LENGTH)
            .map(char::from)
            .collect();
        Self(id)
    }

    /// Validates a candidate identifier.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidSessionId`] if the candidate has the wrong length or
    /// contains a character outside of the `[A-Za-z0-9]` alphabet.
    pub fn parse(candidate: &str) -> Result<Self, InvalidSessionId> {
        if candidate.len() != Self::LENGTH {
            return Err(InvalidSessionId::Length {
                length: candidate.len(),
            });
        }
        if let Some(character) = candidate.chars().find(|c| !c.is_ascii_alphanumeric()) {
            return Err(InvalidSessionId::Character { character });
        }

        Ok(Self(candidate.to_owned()))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a shortened form of the identifier that is safe to log.
    #[must_use]
    pub fn redacted(&self) -> &str {
        &self.0[..8]
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SessionId")
            .field(&format_args!("{}…", self.redacted()))
            .finish()
    }
}

impl FromStr for SessionId {
    type Err = InvalidSessionId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for SessionId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Self::parse(&value).map_err(serde::de::Error::custom)
    }
}

/// An error returned by [`SessionId::parse`] when the candidate is not a
/// well-formed identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[non_exhaustive]
pub enum InvalidSessionId {
    /// The candidate does not have exactly [`SessionId::LENGTH`] characters.
    #[error("session id has invalid length ({length} != {})", SessionId::LENGTH)]
    Length {
        /// The length of the rejected candidate.
        length: usize,
    },
    /// The candidate contains a character outside of the allowed alphabet.
    #[error("session id contains invalid character {character:?}")]
    Character {
        /// The first offending character.
        character: char,
    },
}
