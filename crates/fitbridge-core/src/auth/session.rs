use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

/// Token pair issued by the destination.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: String,
    pub expiry: DateTime<Utc>,
}

impl AuthSession {
    /// Usable until `skew` before the recorded expiry.
    pub fn is_valid_at(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        !self.access_token.is_empty()
            && self
                .expiry
                .checked_sub_signed(skew)
                .is_some_and(|limit| now < limit)
    }

    pub fn can_refresh(&self) -> bool {
        !self.refresh_token.is_empty()
    }
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSession")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expiry", &self.expiry)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read token store {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("token store {path} is corrupt: {source}")]
    Corrupt {
        path: String,
        source: serde_json::Error,
    },

    #[error("failed to write token store {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to serialize session: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// JSON file holding the last issued [`AuthSession`].
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when nothing has been persisted yet.
    pub fn load(&self) -> Result<Option<AuthSession>, StoreError> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StoreError::Read {
                    path: self.path.display().to_string(),
                    source: e,
                })
            }
        };

        serde_json::from_str(&data)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                path: self.path.display().to_string(),
                source: e,
            })
    }

    /// Replace the stored session atomically.
    ///
    /// The temp file is created next to the target with owner-only
    /// permissions and renamed over it once fully written.
    pub fn save(&self, session: &AuthSession) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(session)?;
        let write_err = |e: std::io::Error| StoreError::Write {
            path: self.path.display().to_string(),
            source: e,
        };

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(write_err)?;

        let mut tmp = NamedTempFile::new_in(dir).map_err(write_err)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tmp.as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o600))
                .map_err(write_err)?;
        }
        tmp.write_all(&json).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(&self.path).map_err(|e| write_err(e.error))?;

        debug!(path = %self.path.display(), "persisted session tokens");
        Ok(())
    }
}
