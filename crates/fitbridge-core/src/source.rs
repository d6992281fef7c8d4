//! Source activity discovery.
//!
//! The training app writes one `MyNewActivity-<version>.fit` per app release,
//! so the newest recording is the file with the highest version token rather
//! than the one touched most recently.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::SourceConfig;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("no activity matching '{pattern}' found in {dir}")]
    SourceNotFound { dir: String, pattern: String },

    #[error("failed to read source directory {dir}: {source}")]
    ListFailed {
        dir: String,
        source: std::io::Error,
    },

    #[error("failed to read activity {path}: {source}")]
    ReadFailed {
        path: String,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Local,
}

/// How a candidate ranks against its siblings.
///
/// Variant order matters: any parsed version outranks a modification time.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactVersion {
    Modified(DateTime<Utc>),
    Sequence(Vec<u64>),
}

/// One entry of a source listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub path: PathBuf,
    pub version: ArtifactVersion,
}

impl Candidate {
    fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }
}

/// The selected source recording. Read-only: the pipeline never writes back
/// to `path`.
#[derive(Debug, Clone)]
pub struct ActivityArtifact {
    pub id: String,
    pub path: PathBuf,
    pub version: ArtifactVersion,
    pub kind: SourceKind,
    bytes: Vec<u8>,
}

impl ActivityArtifact {
    /// Read a candidate from disk and derive its ledger identifier.
    pub fn load(candidate: Candidate) -> Result<Self, SourceError> {
        let bytes = std::fs::read(&candidate.path).map_err(|e| SourceError::ReadFailed {
            path: candidate.path.display().to_string(),
            source: e,
        })?;
        let id = activity_id(&file_stem(&candidate.path), &bytes);

        Ok(Self {
            id,
            path: candidate.path,
            version: candidate.version,
            kind: SourceKind::Local,
            bytes,
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn stem(&self) -> String {
        file_stem(&self.path)
    }

    pub fn extension(&self) -> String {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("fit")
            .to_string()
    }
}

/// Stable ledger key: file stem plus a content digest prefix.
pub fn activity_id(stem: &str, bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let hex: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
    format!("{stem}-{hex}")
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("activity")
        .to_string()
}

static DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());

/// Parse the numeric tokens after the last `-` in a file stem.
///
/// `MyNewActivity-3.18.2` yields `[3, 18, 2]`; a stem without digits in that
/// position yields `None`.
pub fn parse_version_token(stem: &str) -> Option<Vec<u64>> {
    let (_, token) = stem.rsplit_once('-')?;
    let parts: Vec<u64> = DIGITS
        .find_iter(token)
        .filter_map(|m| m.as_str().parse().ok())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts)
    }
}

/// Pick the most recent candidate. Ties fall back to the file name so the
/// choice never depends on listing order.
pub fn select_latest(candidates: Vec<Candidate>) -> Option<Candidate> {
    candidates.into_iter().max_by(|a, b| match a.version.cmp(&b.version) {
        Ordering::Equal => a.file_name().cmp(b.file_name()),
        other => other,
    })
}

/// Scans one directory for activity files following the app's naming convention.
#[derive(Debug, Clone)]
pub struct SourceSelector {
    dir: PathBuf,
    prefix: String,
    extension: String,
}

impl SourceSelector {
    pub fn new(dir: impl Into<PathBuf>, prefix: &str, extension: &str) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.to_string(),
            extension: extension.trim_start_matches('.').to_string(),
        }
    }

    pub fn from_config(config: &SourceConfig) -> Self {
        Self::new(&config.dir, &config.prefix, &config.extension)
    }

    fn pattern(&self) -> String {
        format!("{}*.{}", self.prefix, self.extension)
    }

    fn not_found(&self) -> SourceError {
        SourceError::SourceNotFound {
            dir: self.dir.display().to_string(),
            pattern: self.pattern(),
        }
    }

    fn matches(&self, path: &Path) -> bool {
        let name_ok = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(&self.prefix));
        let ext_ok = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(&self.extension));
        name_ok && ext_ok
    }

    /// List every matching file with its parsed version or modification time.
    pub fn list_candidates(&self) -> Result<Vec<Candidate>, SourceError> {
        if !self.dir.is_dir() {
            return Err(self.not_found());
        }

        let list_err = |e: std::io::Error| SourceError::ListFailed {
            dir: self.dir.display().to_string(),
            source: e,
        };

        let mut candidates = Vec::new();
        for entry in std::fs::read_dir(&self.dir).map_err(list_err)? {
            let entry = entry.map_err(list_err)?;
            let path = entry.path();
            if !entry.file_type().map_err(list_err)?.is_file() || !self.matches(&path) {
                continue;
            }

            let version = match parse_version_token(&file_stem(&path)) {
                Some(parts) => ArtifactVersion::Sequence(parts),
                None => {
                    let modified = entry
                        .metadata()
                        .and_then(|m| m.modified())
                        .map_err(list_err)?;
                    ArtifactVersion::Modified(modified.into())
                }
            };
            debug!(path = %path.display(), ?version, "found candidate activity");
            candidates.push(Candidate { path, version });
        }

        Ok(candidates)
    }

    /// Select and load the newest activity.
    pub fn select(&self) -> Result<ActivityArtifact, SourceError> {
        let candidates = self.list_candidates()?;
        let count = candidates.len();
        let chosen = select_latest(candidates).ok_or_else(|| self.not_found())?;

        info!(
            path = %chosen.path.display(),
            candidates = count,
            "selected source activity"
        );
        ActivityArtifact::load(chosen)
    }
}
