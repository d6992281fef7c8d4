//! Timestamped, collision-free persistence of corrected activities.

use std::io::Write;
use std::path::PathBuf;

use chrono::{Local, NaiveDateTime};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info};

/// Timestamp layout used in backup file names.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H%M%S";

/// Upper bound on `-N` suffixes tried for one timestamp.
const MAX_DISAMBIGUATORS: u32 = 1000;

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("failed to create backup directory {path}: {source}")]
    CreateDir {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to write backup into {dir}: {source}")]
    Write { dir: String, source: std::io::Error },

    #[error("invalid backup file stem '{stem}'")]
    InvalidStem { stem: String },

    #[error("no free backup name for {stem}_{timestamp} after {attempts} attempts")]
    Exhausted {
        stem: String,
        timestamp: String,
        attempts: u32,
    },
}

/// Writes corrected streams into a flat backup directory.
#[derive(Debug, Clone)]
pub struct BackupWriter {
    dir: PathBuf,
}

impl BackupWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Write `bytes` as `<stem>_<now>.<extension>`.
    pub fn write(&self, stem: &str, extension: &str, bytes: &[u8]) -> Result<PathBuf, BackupError> {
        self.write_at(stem, extension, bytes, Local::now().naive_local())
    }

    /// Write `bytes` under a name derived from `stamp`.
    ///
    /// The content lands in a temp file inside the backup directory first and
    /// is then linked into place without clobbering, so readers never see a
    /// partial file and an existing backup is never replaced. When the name
    /// is taken, `-1`, `-2`, ... is appended to the timestamp.
    pub fn write_at(
        &self,
        stem: &str,
        extension: &str,
        bytes: &[u8],
        stamp: NaiveDateTime,
    ) -> Result<PathBuf, BackupError> {
        validate_stem(stem)?;
        let extension = extension.trim_start_matches('.');

        std::fs::create_dir_all(&self.dir).map_err(|e| BackupError::CreateDir {
            path: self.dir.display().to_string(),
            source: e,
        })?;

        let write_err = |e: std::io::Error| BackupError::Write {
            dir: self.dir.display().to_string(),
            source: e,
        };

        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(write_err)?;
        tmp.write_all(bytes).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;

        let timestamp = stamp.format(TIMESTAMP_FORMAT).to_string();
        for n in 0..MAX_DISAMBIGUATORS {
            let name = if n == 0 {
                format!("{stem}_{timestamp}.{extension}")
            } else {
                format!("{stem}_{timestamp}-{n}.{extension}")
            };
            let target = self.dir.join(&name);

            match tmp.persist_noclobber(&target) {
                Ok(_) => {
                    info!(path = %target.display(), bytes = bytes.len(), "wrote backup");
                    return Ok(target);
                }
                Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {
                    debug!(name = %name, "backup name taken, trying next suffix");
                    tmp = e.file;
                }
                Err(e) => return Err(write_err(e.error)),
            }
        }

        Err(BackupError::Exhausted {
            stem: stem.to_string(),
            timestamp,
            attempts: MAX_DISAMBIGUATORS,
        })
    }
}

fn validate_stem(stem: &str) -> Result<(), BackupError> {
    let invalid = stem.is_empty()
        || stem.contains(['/', '\\', '\0'])
        || stem == "."
        || stem == "..";
    if invalid {
        return Err(BackupError::InvalidStem {
            stem: stem.to_string(),
        });
    }
    Ok(())
}
