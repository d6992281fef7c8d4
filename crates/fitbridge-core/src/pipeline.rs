//! One sync run: select, correct, back up, then deliver at most once.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use tracing::{info, info_span};
use uuid::Uuid;

use crate::auth::{CredentialPrompt, SessionManager};
use crate::backup::BackupWriter;
use crate::config::FitbridgeConfig;
use crate::destination::Destination;
use crate::fit::{transform_bytes, TransformStats};
use crate::ledger::DeliveryLedger;
use crate::source::{activity_id, SourceError, SourceSelector};
use crate::upload::{UploadOutcome, Uploader};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Uploaded and recorded in the ledger.
    Delivered,
    /// The ledger already had this activity; nothing was sent.
    AlreadyDelivered,
    /// The destination reported a duplicate; the ledger was updated.
    DuplicateAtDestination,
}

/// Summary of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub activity_id: String,
    pub source: PathBuf,
    pub backup: PathBuf,
    pub stats: TransformStats,
    pub outcome: SyncOutcome,
}

/// Result of correcting a single file without delivering it.
#[derive(Debug, Clone, Serialize)]
pub struct TransformReport {
    pub activity_id: String,
    pub source: PathBuf,
    pub backup: PathBuf,
    pub stats: TransformStats,
}

/// Wires the stages together for one invocation.
pub struct Pipeline<'a, P> {
    config: &'a FitbridgeConfig,
    destination: &'a dyn Destination,
    sessions: SessionManager<P>,
}

impl<'a, P: CredentialPrompt> Pipeline<'a, P> {
    pub fn new(config: &'a FitbridgeConfig, destination: &'a dyn Destination, prompt: P) -> Self {
        Self {
            config,
            destination,
            sessions: SessionManager::from_config(&config.auth, prompt),
        }
    }

    pub fn sessions(&self) -> &SessionManager<P> {
        &self.sessions
    }

    /// Run every stage in order. Nothing reaches the network before the
    /// corrected stream is safely on disk.
    pub fn run(&mut self) -> Result<SyncReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("sync", %run_id);
        let _guard = span.enter();

        // 1. Pick the newest source recording.
        let artifact = SourceSelector::from_config(&self.config.source).select()?;
        let activity_id = artifact.id.clone();

        // 2. Correct the record stream.
        let output = transform_bytes(artifact.bytes())?;
        info!(
            activity_id = %activity_id,
            samples = output.stats.samples,
            summaries = output.stats.summaries,
            dropped = output.stats.dropped,
            "transformed activity"
        );

        // 3. Persist the corrected copy.
        let backup = BackupWriter::new(&self.config.backup.dir).write(
            &artifact.stem(),
            &artifact.extension(),
            &output.bytes,
        )?;

        // 4. Make sure a session is available.
        let session = self.sessions.ensure_session(self.destination)?;

        // 5. Deliver unless already recorded. The ledger lives for this block only.
        let outcome = {
            let mut ledger = DeliveryLedger::open(&self.config.ledger.path)?;
            if ledger.is_delivered(&activity_id)? {
                info!(activity_id = %activity_id, "already delivered, skipping upload");
                SyncOutcome::AlreadyDelivered
            } else {
                let file_name = backup
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("activity.fit")
                    .to_string();
                let uploaded = Uploader::new(self.destination).upload(
                    &mut self.sessions,
                    session,
                    &file_name,
                    &output.bytes,
                )?;

                // 6. Commit.
                ledger.mark_delivered(&activity_id, Utc::now())?;
                match uploaded {
                    UploadOutcome::Accepted(_) => SyncOutcome::Delivered,
                    UploadOutcome::Duplicate => SyncOutcome::DuplicateAtDestination,
                }
            }
        };

        info!(activity_id = %activity_id, outcome = ?outcome, "sync finished");
        Ok(SyncReport {
            run_id,
            activity_id,
            source: artifact.path,
            backup,
            stats: output.stats,
            outcome,
        })
    }
}

/// Correct `input` into `backup_dir` with no network access.
pub fn transform_file(input: &Path, backup_dir: &Path) -> Result<TransformReport> {
    let bytes = std::fs::read(input).map_err(|e| SourceError::ReadFailed {
        path: input.display().to_string(),
        source: e,
    })?;
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("activity")
        .to_string();
    let extension = input
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("fit")
        .to_string();

    let output = transform_bytes(&bytes)?;
    let backup = BackupWriter::new(backup_dir).write(&stem, &extension, &output.bytes)?;

    Ok(TransformReport {
        activity_id: activity_id(&stem, &bytes),
        source: input.to_path_buf(),
        backup,
        stats: output.stats,
    })
}
