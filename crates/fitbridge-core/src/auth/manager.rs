use std::fmt;

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use super::prompt::CredentialPrompt;
use super::session::{AuthSession, StoreError, TokenStore};
use super::AuthError;
use crate::config::AuthConfig;
use crate::destination::Destination;

/// Where the manager is in the session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NoSession,
    Resumed { expired: bool },
    Refreshing,
    NeedsInteractiveAuth,
    InteractiveAuth,
    /// Terminal for this run.
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoSession => "no_session",
            Self::Resumed { expired: false } => "resumed",
            Self::Resumed { expired: true } => "expired",
            Self::Refreshing => "refreshing",
            Self::NeedsInteractiveAuth => "needs_interactive_auth",
            Self::InteractiveAuth => "interactive_auth",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Owns the single session for a run and drives its state machine.
pub struct SessionManager<P> {
    store: TokenStore,
    prompt: P,
    skew: Duration,
    state: SessionState,
    session: Option<AuthSession>,
}

impl<P: CredentialPrompt> SessionManager<P> {
    pub fn new(store: TokenStore, prompt: P, skew: Duration) -> Self {
        Self {
            store,
            prompt,
            skew,
            state: SessionState::NoSession,
            session: None,
        }
    }

    pub fn from_config(config: &AuthConfig, prompt: P) -> Self {
        let skew = Duration::seconds(i64::try_from(config.expiry_skew_seconds).unwrap_or(0));
        Self::new(TokenStore::new(&config.token_path), prompt, skew)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    /// Return a session that is valid right now.
    ///
    /// Resumes the persisted token on first use, refreshes it once when it is
    /// expired and falls back to interactive login when refresh is refused.
    pub fn ensure_session(
        &mut self,
        destination: &dyn Destination,
    ) -> Result<AuthSession, AuthError> {
        if self.state == SessionState::NoSession && self.session.is_none() {
            self.resume();
        }

        if self.state == (SessionState::Resumed { expired: true }) {
            self.refresh(destination)?;
        }

        if matches!(
            self.state,
            SessionState::NoSession | SessionState::NeedsInteractiveAuth
        ) {
            self.interactive(destination)?;
        }

        match (&self.state, &self.session) {
            (SessionState::Resumed { expired: false }, Some(session)) => Ok(session.clone()),
            (state, _) => Err(AuthError::SessionFailed {
                state: state.to_string(),
            }),
        }
    }

    /// React to the destination refusing the current access token.
    ///
    /// The session is marked expired and exactly one refresh is attempted.
    pub fn handle_unauthorized(
        &mut self,
        destination: &dyn Destination,
    ) -> Result<AuthSession, AuthError> {
        if self.state == SessionState::Failed {
            return Err(AuthError::SessionFailed {
                state: self.state.to_string(),
            });
        }
        warn!("destination rejected access token, marking session expired");
        self.transition(SessionState::Resumed { expired: true });
        self.ensure_session(destination)
    }

    fn transition(&mut self, next: SessionState) {
        debug!(from = %self.state, to = %next, "session transition");
        self.state = next;
    }

    fn resume(&mut self) {
        match self.store.load() {
            Ok(Some(session)) => {
                let expired = !session.is_valid_at(Utc::now(), self.skew);
                info!(path = %self.store.path().display(), expired, "resumed persisted session");
                self.session = Some(session);
                self.transition(SessionState::Resumed { expired });
            }
            Ok(None) => {
                debug!(path = %self.store.path().display(), "no persisted session");
            }
            Err(e @ StoreError::Corrupt { .. }) => {
                warn!(error = %e, "ignoring unreadable token store");
            }
            Err(e) => {
                warn!(error = %e, "token store unavailable, starting without a session");
            }
        }
    }

    fn refresh(&mut self, destination: &dyn Destination) -> Result<(), AuthError> {
        let Some(current) = self.session.clone().filter(AuthSession::can_refresh) else {
            debug!("no refresh token available");
            self.transition(SessionState::NeedsInteractiveAuth);
            return Ok(());
        };

        self.transition(SessionState::Refreshing);
        match destination.refresh(&current) {
            Ok(session) => self.accept(session),
            Err(e) if e.is_client_rejection() => {
                warn!(error = %e, "refresh rejected, falling back to interactive login");
                self.session = None;
                self.transition(SessionState::NeedsInteractiveAuth);
                Ok(())
            }
            Err(e) => {
                self.transition(SessionState::Failed);
                Err(AuthError::Transport(e))
            }
        }
    }

    fn interactive(&mut self, destination: &dyn Destination) -> Result<(), AuthError> {
        self.transition(SessionState::InteractiveAuth);

        let credentials = match self.prompt.credentials() {
            Ok(c) => c,
            Err(e) => {
                self.transition(SessionState::Failed);
                return Err(AuthError::PromptFailed(e));
            }
        };

        match destination.authenticate(&credentials) {
            Ok(session) => {
                info!(username = %credentials.username, "interactive login succeeded");
                self.accept(session)
            }
            Err(e) if e.is_client_rejection() => {
                self.transition(SessionState::Failed);
                Err(AuthError::InvalidCredentials(e))
            }
            Err(e) => {
                self.transition(SessionState::Failed);
                Err(AuthError::Transport(e))
            }
        }
    }

    /// Persist before exposing the new session.
    fn accept(&mut self, session: AuthSession) -> Result<(), AuthError> {
        if let Err(e) = self.store.save(&session) {
            self.transition(SessionState::Failed);
            return Err(AuthError::Store(e));
        }
        self.session = Some(session);
        self.transition(SessionState::Resumed { expired: false });
        Ok(())
    }
}

impl<P> fmt::Debug for SessionManager<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("store", &self.store)
            .field("state", &self.state)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}
