use std::fmt;

use thiserror::Error;

/// Username and password for interactive login.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("failed to read credentials: {0}")]
    Io(#[from] std::io::Error),

    #[error("credentials unavailable: {0}")]
    Unavailable(String),
}

/// Source of credentials when no usable session exists.
pub trait CredentialPrompt {
    fn credentials(&mut self) -> Result<Credentials, PromptError>;
}

impl<P: CredentialPrompt + ?Sized> CredentialPrompt for &mut P {
    fn credentials(&mut self) -> Result<Credentials, PromptError> {
        (**self).credentials()
    }
}

impl<P: CredentialPrompt + ?Sized> CredentialPrompt for Box<P> {
    fn credentials(&mut self) -> Result<Credentials, PromptError> {
        (**self).credentials()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_hides_password() {
        let rendered = format!("{:?}", Credentials::new("rider", "hunter2"));
        assert!(rendered.contains("rider"));
        assert!(!rendered.contains("hunter2"));
    }
}
