//! Session lifecycle against the destination: resume, refresh, interactive
//! login and token persistence.

mod manager;
mod prompt;
mod session;

use thiserror::Error;

use crate::destination::DestinationError;

pub use manager::{SessionManager, SessionState};
pub use prompt::{CredentialPrompt, Credentials, PromptError};
pub use session::{AuthSession, StoreError, TokenStore};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("credentials were rejected: {0}")]
    InvalidCredentials(#[source] DestinationError),

    #[error("authentication transport failure: {0}")]
    Transport(#[source] DestinationError),

    #[error("credential prompt failed: {0}")]
    PromptFailed(#[source] PromptError),

    #[error("token store error: {0}")]
    Store(#[from] StoreError),

    #[error("no usable session (state: {state})")]
    SessionFailed { state: String },
}
