use thiserror::Error;

use crate::auth::AuthError;
use crate::backup::BackupError;
use crate::config::ConfigError;
use crate::destination::DestinationError;
use crate::fit::TransformError;
use crate::ledger::LedgerError;
use crate::source::SourceError;
use crate::upload::UploadError;

/// Top-level error type for a sync run.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Configuration parse or validation error.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// No usable source activity.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// Malformed activity stream; nothing was written.
    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Backup(#[from] BackupError),

    /// Session could not be established.
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Destination(#[from] DestinationError),
}

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, SyncError>;
