use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use reqwest::blocking::{multipart, Client, Response};
use serde::Deserialize;
use tracing::{debug, warn};

use super::{Destination, DestinationError, UploadAck};
use crate::auth::{AuthSession, Credentials};
use crate::config::DestinationConfig;
use crate::redact::redact;

/// Lifetime assumed when the token endpoint omits one.
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// OAuth2-style HTTP destination on a blocking client.
#[derive(Debug)]
pub struct HttpDestination {
    token_url: String,
    upload_url: String,
    client_id: String,
    http_client: Client,
}

#[derive(Debug, Deserialize)]
struct TokenPayload {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
}

impl HttpDestination {
    pub fn new(config: &DestinationConfig) -> Result<Self, DestinationError> {
        if config.token_url.trim().is_empty() {
            return Err(DestinationError::NotConfigured("token_url is empty".to_string()));
        }
        if config.upload_url.trim().is_empty() {
            return Err(DestinationError::NotConfigured("upload_url is empty".to_string()));
        }

        let http_client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(concat!("fitbridge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(transport)?;

        Ok(Self {
            token_url: config.token_url.clone(),
            upload_url: config.upload_url.clone(),
            client_id: config.client_id.clone(),
            http_client,
        })
    }

    fn request_token(
        &self,
        form: &[(&str, &str)],
        previous_refresh: Option<&str>,
    ) -> Result<AuthSession, DestinationError> {
        let mut fields = form.to_vec();
        if !self.client_id.is_empty() {
            fields.push(("client_id", self.client_id.as_str()));
        }

        let response = self
            .http_client
            .post(&self.token_url)
            .form(&fields)
            .send()
            .map_err(transport)?;

        let status = response.status().as_u16();
        let body = read_body(response);
        match status {
            200..=299 => parse_token_response(&body, Utc::now(), previous_refresh),
            400 | 401 => Err(DestinationError::Rejected {
                status,
                message: redact(&body),
            }),
            _ => Err(DestinationError::Transport {
                message: format!("token endpoint returned {status}: {}", redact(&body)),
            }),
        }
    }
}

impl Destination for HttpDestination {
    fn authenticate(&self, credentials: &Credentials) -> Result<AuthSession, DestinationError> {
        debug!(username = %credentials.username, "requesting token with password grant");
        self.request_token(
            &[
                ("grant_type", "password"),
                ("username", credentials.username.as_str()),
                ("password", credentials.password.as_str()),
            ],
            None,
        )
    }

    fn refresh(&self, session: &AuthSession) -> Result<AuthSession, DestinationError> {
        debug!("requesting token with refresh grant");
        self.request_token(
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", session.refresh_token.as_str()),
            ],
            Some(session.refresh_token.as_str()),
        )
    }

    fn upload(
        &self,
        session: &AuthSession,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<UploadAck, DestinationError> {
        let part = multipart::Part::bytes(bytes.to_vec())
            .file_name(file_name.to_string())
            .mime_str("application/octet-stream")
            .map_err(transport)?;
        let form = multipart::Form::new().part("file", part);

        let response = self
            .http_client
            .post(&self.upload_url)
            .bearer_auth(&session.access_token)
            .multipart(form)
            .send()
            .map_err(transport)?;

        let status = response.status().as_u16();
        let body = read_body(response);
        classify_upload(status, body)
    }
}

fn transport(error: reqwest::Error) -> DestinationError {
    DestinationError::Transport {
        message: error.to_string(),
    }
}

fn read_body(response: Response) -> String {
    response.text().unwrap_or_else(|e| {
        warn!(error = %e, "unable to read response body");
        String::new()
    })
}

fn classify_upload(status: u16, body: String) -> Result<UploadAck, DestinationError> {
    match status {
        200..=299 => Ok(UploadAck { status, body }),
        401 => Err(DestinationError::Unauthorized),
        409 => Err(DestinationError::Duplicate),
        _ => Err(DestinationError::Status {
            status,
            message: redact(&body),
        }),
    }
}

fn parse_token_response(
    body: &str,
    now: DateTime<Utc>,
    previous_refresh: Option<&str>,
) -> Result<AuthSession, DestinationError> {
    let payload: TokenPayload = serde_json::from_str(body)
        .map_err(|e| DestinationError::InvalidResponse(format!("token response: {e}")))?;

    if payload.access_token.is_empty() {
        return Err(DestinationError::InvalidResponse(
            "token response has an empty access_token".to_string(),
        ));
    }

    let expiry = match (payload.expires_at, payload.expires_in) {
        (Some(at), _) => Utc.timestamp_opt(at, 0).single().ok_or_else(|| {
            DestinationError::InvalidResponse(format!("expires_at {at} is out of range"))
        })?,
        (None, Some(secs)) => expiry_after(now, secs)?,
        (None, None) => expiry_after(now, DEFAULT_TOKEN_LIFETIME_SECS)?,
    };

    let refresh_token = payload
        .refresh_token
        .filter(|t| !t.is_empty())
        .or_else(|| previous_refresh.map(str::to_string))
        .unwrap_or_default();

    Ok(AuthSession {
        access_token: payload.access_token,
        refresh_token,
        expiry,
    })
}

fn expiry_after(now: DateTime<Utc>, secs: i64) -> Result<DateTime<Utc>, DestinationError> {
    chrono::Duration::try_seconds(secs)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .ok_or_else(|| {
            DestinationError::InvalidResponse(format!("expires_in {secs} is out of range"))
        })
}
