use thiserror::Error;
use tracing::{info, warn};

use crate::auth::{AuthError, AuthSession, CredentialPrompt, SessionManager};
use crate::destination::{Destination, DestinationError, UploadAck};

/// One initial transfer plus one retry after a refresh.
pub const MAX_ATTEMPTS: u32 = 2;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("destination refused the session after {attempts} attempts")]
    Unauthorized { attempts: u32 },

    #[error("could not renew session: {0}")]
    Auth(#[from] AuthError),

    #[error("upload failed: {0}")]
    Destination(#[source] DestinationError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Accepted(UploadAck),
    /// The destination already had the activity.
    Duplicate,
}

/// Transfers a corrected activity, renewing the session at most once.
pub struct Uploader<'a> {
    destination: &'a dyn Destination,
}

impl<'a> Uploader<'a> {
    pub fn new(destination: &'a dyn Destination) -> Self {
        Self { destination }
    }

    pub fn upload<P: CredentialPrompt>(
        &self,
        sessions: &mut SessionManager<P>,
        mut session: AuthSession,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<UploadOutcome, UploadError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.destination.upload(&session, file_name, bytes) {
                Ok(ack) => {
                    info!(attempt, status = ack.status, file_name, "upload accepted");
                    return Ok(UploadOutcome::Accepted(ack));
                }
                Err(DestinationError::Duplicate) => {
                    info!(attempt, file_name, "destination reports duplicate activity");
                    return Ok(UploadOutcome::Duplicate);
                }
                Err(DestinationError::Unauthorized) if attempt < MAX_ATTEMPTS => {
                    warn!(attempt, "upload unauthorized, renewing session");
                    session = sessions.handle_unauthorized(self.destination)?;
                }
                Err(DestinationError::Unauthorized) => {
                    return Err(UploadError::Unauthorized { attempts: attempt });
                }
                Err(e) => return Err(UploadError::Destination(e)),
            }
        }
    }
}
