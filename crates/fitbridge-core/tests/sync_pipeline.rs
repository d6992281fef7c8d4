//! End-to-end sync runs against an in-memory destination.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use chrono::{Duration, Utc};
use tempfile::TempDir;

use fitbridge_core::auth::{
    AuthError, AuthSession, CredentialPrompt, Credentials, PromptError, SessionState, TokenStore,
};
use fitbridge_core::config::FitbridgeConfig;
use fitbridge_core::destination::{Destination, DestinationError, UploadAck};
use fitbridge_core::fit::message::mesg_num;
use fitbridge_core::fit::{FitFile, Message, RawMessage, Sample, SessionSummary};
use fitbridge_core::ledger::DeliveryLedger;
use fitbridge_core::pipeline::{transform_file, Pipeline, SyncOutcome};
use fitbridge_core::upload::UploadError;
use fitbridge_core::SyncError;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakeDestination {
    uploads: RefCell<VecDeque<Result<UploadAck, DestinationError>>>,
    refreshes: RefCell<VecDeque<Result<AuthSession, DestinationError>>>,
    logins: RefCell<VecDeque<Result<AuthSession, DestinationError>>>,
    upload_calls: Cell<usize>,
    refresh_calls: Cell<usize>,
    login_calls: Cell<usize>,
    uploaded: RefCell<Vec<(String, Vec<u8>)>>,
}

impl FakeDestination {
    fn with_uploads(uploads: Vec<Result<UploadAck, DestinationError>>) -> Self {
        Self {
            uploads: RefCell::new(uploads.into()),
            ..Self::default()
        }
    }

    fn refreshes(self, results: Vec<Result<AuthSession, DestinationError>>) -> Self {
        *self.refreshes.borrow_mut() = results.into();
        self
    }

    fn logins(self, results: Vec<Result<AuthSession, DestinationError>>) -> Self {
        *self.logins.borrow_mut() = results.into();
        self
    }
}

impl Destination for FakeDestination {
    fn authenticate(&self, _: &Credentials) -> Result<AuthSession, DestinationError> {
        self.login_calls.set(self.login_calls.get() + 1);
        self.logins
            .borrow_mut()
            .pop_front()
            .expect("unexpected login")
    }

    fn refresh(&self, _: &AuthSession) -> Result<AuthSession, DestinationError> {
        self.refresh_calls.set(self.refresh_calls.get() + 1);
        self.refreshes
            .borrow_mut()
            .pop_front()
            .expect("unexpected refresh")
    }

    fn upload(
        &self,
        _: &AuthSession,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<UploadAck, DestinationError> {
        self.upload_calls.set(self.upload_calls.get() + 1);
        self.uploaded
            .borrow_mut()
            .push((file_name.to_string(), bytes.to_vec()));
        self.uploads
            .borrow_mut()
            .pop_front()
            .expect("unexpected upload")
    }
}

/// Prompt that counts how often it was asked.
#[derive(Clone, Default)]
struct CountingPrompt {
    calls: Rc<Cell<usize>>,
}

impl CredentialPrompt for CountingPrompt {
    fn credentials(&mut self) -> Result<Credentials, PromptError> {
        self.calls.set(self.calls.get() + 1);
        Ok(Credentials::new("rider", "secret"))
    }
}

fn token(access: &str, hours: i64) -> AuthSession {
    AuthSession {
        access_token: access.to_string(),
        refresh_token: format!("{access}-refresh"),
        expiry: Utc::now() + Duration::hours(hours),
    }
}

fn ack() -> UploadAck {
    UploadAck {
        status: 201,
        body: r#"{"id":1}"#.to_string(),
    }
}

fn activity_bytes() -> Vec<u8> {
    FitFile::new(vec![
        Message::Creator(RawMessage::new(mesg_num::FILE_CREATOR)),
        Message::Sample(
            Sample::new()
                .with_cadence(80)
                .with_power(200)
                .with_heart_rate(0)
                .with_temperature(21),
        ),
        Message::Sample(
            Sample::new()
                .with_cadence(90)
                .with_power(210)
                .with_heart_rate(0)
                .with_temperature(21),
        ),
        Message::Lap(RawMessage::new(mesg_num::LAP)),
        Message::SessionSummary(SessionSummary::new()),
    ])
    .encode()
    .unwrap()
}

struct Workspace {
    _tmp: TempDir,
    config: FitbridgeConfig,
}

impl Workspace {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        let source = root.join("source");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::write(source.join("MyNewActivity-3.12.fit"), activity_bytes()).unwrap();

        let mut config = FitbridgeConfig::default();
        config.source.dir = source;
        config.backup.dir = root.join("backup");
        config.auth.token_path = root.join("state").join("tokens.json");
        config.ledger.path = root.join("state").join("ledger.db");

        Self { _tmp: tmp, config }
    }

    fn with_stored_token(self, session: &AuthSession) -> Self {
        TokenStore::new(&self.config.auth.token_path)
            .save(session)
            .unwrap();
        self
    }

    fn ledger(&self) -> DeliveryLedger {
        DeliveryLedger::open(&self.config.ledger.path).unwrap()
    }

    fn backups(&self) -> Vec<PathBuf> {
        list(&self.config.backup.dir)
    }
}

fn list(dir: &Path) -> Vec<PathBuf> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
        Err(_) => Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

#[test]
fn fresh_activity_is_delivered_and_recorded() {
    let ws = Workspace::new().with_stored_token(&token("stored", 2));
    let dest = FakeDestination::with_uploads(vec![Ok(ack())]);
    let prompt = CountingPrompt::default();

    let report = Pipeline::new(&ws.config, &dest, prompt.clone())
        .run()
        .unwrap();

    assert_eq!(report.outcome, SyncOutcome::Delivered);
    assert_eq!(dest.upload_calls.get(), 1);
    assert_eq!(prompt.calls.get(), 0);
    assert!(ws.ledger().is_delivered(&report.activity_id).unwrap());
    assert!(report.activity_id.starts_with("MyNewActivity-3.12-"));

    // The uploaded bytes are the corrected stream that was backed up.
    let backups = ws.backups();
    assert_eq!(backups.len(), 1);
    let uploaded = dest.uploaded.borrow();
    assert_eq!(uploaded[0].1, std::fs::read(&backups[0]).unwrap());

    let corrected = FitFile::decode(&uploaded[0].1).unwrap();
    assert_eq!(corrected.messages.len(), 3);
    let summary = corrected
        .messages
        .iter()
        .find_map(|m| match m {
            Message::SessionSummary(s) => Some(s.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(summary.avg_cadence(), Some(85));
    assert_eq!(summary.avg_power(), Some(205));
    assert_eq!(summary.avg_heart_rate(), Some(0));
}

#[test]
fn rerun_for_delivered_activity_uploads_nothing() {
    let ws = Workspace::new().with_stored_token(&token("stored", 2));

    let first = FakeDestination::with_uploads(vec![Ok(ack())]);
    let report = Pipeline::new(&ws.config, &first, CountingPrompt::default())
        .run()
        .unwrap();
    let entries_before = ws.ledger().entries().unwrap();

    let second = FakeDestination::with_uploads(vec![]);
    let rerun = Pipeline::new(&ws.config, &second, CountingPrompt::default())
        .run()
        .unwrap();

    assert_eq!(rerun.outcome, SyncOutcome::AlreadyDelivered);
    assert_eq!(rerun.activity_id, report.activity_id);
    assert_eq!(second.upload_calls.get(), 0);
    assert_eq!(ws.ledger().entries().unwrap(), entries_before);
    // Every run that corrects the source keeps its own copy.
    assert_eq!(ws.backups().len(), 2);
}

#[test]
fn duplicate_at_destination_marks_ledger() {
    let ws = Workspace::new().with_stored_token(&token("stored", 2));
    let dest = FakeDestination::with_uploads(vec![Err(DestinationError::Duplicate)]);

    let report = Pipeline::new(&ws.config, &dest, CountingPrompt::default())
        .run()
        .unwrap();

    assert_eq!(report.outcome, SyncOutcome::DuplicateAtDestination);
    assert!(ws.ledger().is_delivered(&report.activity_id).unwrap());
}

#[test]
fn source_file_is_never_modified() {
    let ws = Workspace::new().with_stored_token(&token("stored", 2));
    let source = ws.config.source.dir.join("MyNewActivity-3.12.fit");
    let before = std::fs::read(&source).unwrap();

    let dest = FakeDestination::with_uploads(vec![Ok(ack())]);
    Pipeline::new(&ws.config, &dest, CountingPrompt::default())
        .run()
        .unwrap();

    assert_eq!(std::fs::read(&source).unwrap(), before);
    assert_eq!(list(&ws.config.source.dir).len(), 1);
}

// ---------------------------------------------------------------------------
// Unauthorized handling
// ---------------------------------------------------------------------------

#[test]
fn one_unauthorized_then_success_takes_two_attempts() {
    let ws = Workspace::new().with_stored_token(&token("stored", 2));
    let dest = FakeDestination::with_uploads(vec![Err(DestinationError::Unauthorized), Ok(ack())])
        .refreshes(vec![Ok(token("fresh", 2))]);

    let mut pipeline = Pipeline::new(&ws.config, &dest, CountingPrompt::default());
    let report = pipeline.run().unwrap();

    assert_eq!(report.outcome, SyncOutcome::Delivered);
    assert_eq!(dest.upload_calls.get(), 2);
    assert_eq!(dest.refresh_calls.get(), 1);
    assert_eq!(
        pipeline.sessions().state(),
        SessionState::Resumed { expired: false }
    );
    let stored = TokenStore::new(&ws.config.auth.token_path)
        .load()
        .unwrap()
        .unwrap();
    assert_eq!(stored.access_token, "fresh");
}

#[test]
fn two_unauthorized_fail_after_two_attempts() {
    let ws = Workspace::new().with_stored_token(&token("stored", 2));
    let dest = FakeDestination::with_uploads(vec![
        Err(DestinationError::Unauthorized),
        Err(DestinationError::Unauthorized),
    ])
    .refreshes(vec![Ok(token("fresh", 2))]);

    let err = Pipeline::new(&ws.config, &dest, CountingPrompt::default())
        .run()
        .unwrap_err();

    assert!(matches!(
        err,
        SyncError::Upload(UploadError::Unauthorized { attempts: 2 })
    ));
    assert_eq!(dest.upload_calls.get(), 2);
    assert!(ws.ledger().entries().unwrap().is_empty());
    // The corrected copy is kept for a later run.
    assert_eq!(ws.backups().len(), 1);
}

#[test]
fn rejected_refresh_during_upload_logs_in_and_retries() {
    let ws = Workspace::new().with_stored_token(&token("stored", 2));
    let dest = FakeDestination::with_uploads(vec![Err(DestinationError::Unauthorized), Ok(ack())])
        .refreshes(vec![Err(DestinationError::Rejected {
            status: 400,
            message: "invalid_grant".to_string(),
        })])
        .logins(vec![Ok(token("login", 2))]);
    let prompt = CountingPrompt::default();

    let report = Pipeline::new(&ws.config, &dest, prompt.clone())
        .run()
        .unwrap();

    assert_eq!(report.outcome, SyncOutcome::Delivered);
    assert_eq!(dest.upload_calls.get(), 2);
    assert_eq!(dest.refresh_calls.get(), 1);
    assert_eq!(dest.login_calls.get(), 1);
    assert_eq!(prompt.calls.get(), 1);
    assert!(ws.ledger().is_delivered(&report.activity_id).unwrap());
    let stored = TokenStore::new(&ws.config.auth.token_path)
        .load()
        .unwrap()
        .unwrap();
    assert_eq!(stored.access_token, "login");
}

// ---------------------------------------------------------------------------
// Session establishment
// ---------------------------------------------------------------------------

#[test]
fn no_stored_token_prompts_and_persists() {
    let ws = Workspace::new();
    let dest = FakeDestination::with_uploads(vec![Ok(ack())]).logins(vec![Ok(token("login", 2))]);
    let prompt = CountingPrompt::default();

    Pipeline::new(&ws.config, &dest, prompt.clone())
        .run()
        .unwrap();

    assert_eq!(prompt.calls.get(), 1);
    let stored = TokenStore::new(&ws.config.auth.token_path)
        .load()
        .unwrap()
        .unwrap();
    assert_eq!(stored.access_token, "login");
}

#[test]
fn rejected_refresh_falls_back_to_interactive_login() {
    let ws = Workspace::new().with_stored_token(&token("stale", -1));
    let dest = FakeDestination::with_uploads(vec![Ok(ack())])
        .refreshes(vec![Err(DestinationError::Rejected {
            status: 400,
            message: "invalid_grant".to_string(),
        })])
        .logins(vec![Ok(token("login", 2))]);
    let prompt = CountingPrompt::default();

    let report = Pipeline::new(&ws.config, &dest, prompt.clone())
        .run()
        .unwrap();

    assert_eq!(report.outcome, SyncOutcome::Delivered);
    assert_eq!(dest.refresh_calls.get(), 1);
    assert_eq!(prompt.calls.get(), 1);
}

#[test]
fn refresh_transport_failure_aborts_before_upload() {
    let ws = Workspace::new().with_stored_token(&token("stale", -1));
    let dest = FakeDestination::with_uploads(vec![]).refreshes(vec![Err(
        DestinationError::Transport {
            message: "connection refused".to_string(),
        },
    )]);
    let prompt = CountingPrompt::default();

    let err = Pipeline::new(&ws.config, &dest, prompt.clone())
        .run()
        .unwrap_err();

    assert!(matches!(err, SyncError::Auth(AuthError::Transport(_))));
    assert_eq!(dest.upload_calls.get(), 0);
    assert_eq!(prompt.calls.get(), 0);
}

#[test]
fn rejected_credentials_are_terminal() {
    let ws = Workspace::new();
    let dest = FakeDestination::with_uploads(vec![]).logins(vec![Err(
        DestinationError::Rejected {
            status: 401,
            message: "bad password".to_string(),
        },
    )]);

    let err = Pipeline::new(&ws.config, &dest, CountingPrompt::default())
        .run()
        .unwrap_err();

    assert!(matches!(
        err,
        SyncError::Auth(AuthError::InvalidCredentials(_))
    ));
    assert!(TokenStore::new(&ws.config.auth.token_path)
        .load()
        .unwrap()
        .is_none());
}

// ---------------------------------------------------------------------------
// Failure before any network call
// ---------------------------------------------------------------------------

#[test]
fn missing_source_fails_without_side_effects() {
    let ws = Workspace::new();
    std::fs::remove_file(ws.config.source.dir.join("MyNewActivity-3.12.fit")).unwrap();
    let dest = FakeDestination::default();

    let err = Pipeline::new(&ws.config, &dest, CountingPrompt::default())
        .run()
        .unwrap_err();

    assert!(matches!(err, SyncError::Source(_)));
    assert!(ws.backups().is_empty());
    assert_eq!(dest.upload_calls.get(), 0);
}

#[test]
fn malformed_source_writes_no_backup() {
    let ws = Workspace::new();
    std::fs::write(
        ws.config.source.dir.join("MyNewActivity-9.0.fit"),
        b"definitely not a fit file",
    )
    .unwrap();
    let dest = FakeDestination::default();

    let err = Pipeline::new(&ws.config, &dest, CountingPrompt::default())
        .run()
        .unwrap_err();

    assert!(matches!(err, SyncError::Transform(_)));
    assert!(ws.backups().is_empty());
    assert_eq!(dest.login_calls.get(), 0);
}

#[test]
fn transform_file_needs_no_destination() {
    let ws = Workspace::new();
    let input = ws.config.source.dir.join("MyNewActivity-3.12.fit");

    let first = transform_file(&input, &ws.config.backup.dir).unwrap();
    let second = transform_file(&input, &ws.config.backup.dir).unwrap();

    assert_eq!(first.activity_id, second.activity_id);
    assert_ne!(first.backup, second.backup);
    assert_eq!(first.stats.dropped, 2);
    assert_eq!(first.stats.temperature_stripped, 2);
    assert_eq!(ws.backups().len(), 2);
}
