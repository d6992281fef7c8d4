//! The fitness backend receiving corrected activities.

mod http;

use thiserror::Error;

use crate::auth::{AuthSession, Credentials};

pub use http::HttpDestination;

#[derive(Debug, Error)]
pub enum DestinationError {
    /// The access token was not accepted.
    #[error("destination rejected the access token")]
    Unauthorized,

    /// The activity is already present at the destination.
    #[error("destination already has this activity")]
    Duplicate,

    /// The token endpoint refused the credentials or refresh token.
    #[error("destination rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("transport error: {message}")]
    Transport { message: String },

    #[error("destination returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("unexpected destination response: {0}")]
    InvalidResponse(String),

    #[error("destination is not configured: {0}")]
    NotConfigured(String),
}

impl DestinationError {
    /// Whether the failure came from the destination refusing the request
    /// rather than from the network path.
    pub fn is_client_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. } | Self::Unauthorized)
    }
}

/// Acknowledgement returned for an accepted upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadAck {
    pub status: u16,
    pub body: String,
}

/// Operations the pipeline needs from a destination.
pub trait Destination {
    fn authenticate(&self, credentials: &Credentials) -> Result<AuthSession, DestinationError>;

    fn refresh(&self, session: &AuthSession) -> Result<AuthSession, DestinationError>;

    fn upload(
        &self,
        session: &AuthSession,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<UploadAck, DestinationError>;
}

impl<D: Destination + ?Sized> Destination for &D {
    fn authenticate(&self, credentials: &Credentials) -> Result<AuthSession, DestinationError> {
        (**self).authenticate(credentials)
    }

    fn refresh(&self, session: &AuthSession) -> Result<AuthSession, DestinationError> {
        (**self).refresh(session)
    }

    fn upload(
        &self,
        session: &AuthSession,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<UploadAck, DestinationError> {
        (**self).upload(session, file_name, bytes)
    }
}
