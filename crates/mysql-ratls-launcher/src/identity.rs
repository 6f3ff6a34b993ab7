//! Persisted per-node identity values.
//!
//! Each value lives in its own file under the data directory, which sits on
//! the encrypted mount. Values are written once and read back on every later
//! boot so a node keeps its server id and group name across restarts.

use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::info;

use crate::files::{PRIVATE_MODE, atomic_write};

const IDENTITY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::identity");

/// Errors raised by [`IdentityStore`].
#[derive(Debug, Error)]
pub enum IdentityError {
    /// A persisted value could not be read.
    #[error("failed to read identity file '{path}': {source}")]
    Read {
        /// File that failed.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A value could not be persisted.
    #[error("failed to persist identity file '{path}': {source}")]
    Write {
        /// File that failed.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A persisted value has the wrong shape.
    #[error("identity file '{path}' holds an invalid value '{value}'")]
    Invalid {
        /// File that failed.
        path: Utf8PathBuf,
        /// Offending contents.
        value: String,
    },
}

/// A value returned by [`IdentityStore::get_or_create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredValue {
    /// The value.
    pub value: String,
    /// Whether this call generated and persisted it.
    pub created: bool,
}

/// File-per-key store rooted at a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityStore {
    root: Utf8PathBuf,
}

impl IdentityStore {
    /// Builds a store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding the files.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// File backing `key`.
    #[must_use]
    pub fn path(&self, key: &str) -> Utf8PathBuf {
        self.root.join(key)
    }

    /// Reads `key`. Missing and blank files read as `None`.
    pub fn load(&self, key: &str) -> Result<Option<String>, IdentityError> {
        let path = self.path(key);
        match fs::read_to_string(&path) {
            Ok(contents) => {
                let value = contents.trim();
                Ok((!value.is_empty()).then(|| value.to_owned()))
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(IdentityError::Read { path, source }),
        }
    }

    /// Persists `value` under `key`, readable only by the owner.
    pub fn save(&self, key: &str, value: &str) -> Result<(), IdentityError> {
        let path = self.path(key);
        atomic_write(&path, format!("{value}\n").as_bytes(), PRIVATE_MODE)
            .map_err(|source| IdentityError::Write { path, source })
    }

    /// Returns the persisted value for `key`, generating and persisting one
    /// when none exists.
    pub fn get_or_create(
        &self,
        key: &str,
        generator: impl FnOnce() -> String,
    ) -> Result<StoredValue, IdentityError> {
        if let Some(value) = self.load(key)? {
            return Ok(StoredValue {
                value,
                created: false,
            });
        }
        let value = generator();
        self.save(key, &value)?;
        info!(target: IDENTITY_TARGET, key, path = %self.path(key), "persisted new identity value");
        Ok(StoredValue {
            value,
            created: true,
        })
    }
}
