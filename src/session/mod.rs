//! Session backend endpoints: validation and point-in-time snapshots.
//!
//! The backend is abstracted behind [`SessionBackend`] so tests can drive
//! the connection manager against a mock; production uses the reqwest
//! implementation.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Clone, Debug)]
pub struct SessionConfig {
    base_url: Url,
}

impl SessionConfig {
    pub fn new(server_base_url: impl AsRef<str>) -> Result<Self, SessionError> {
        let mut base = server_base_url.as_ref().trim().to_string();
        if base.is_empty() {
            return Err(SessionError::InvalidConfig(
                "session server base url cannot be empty".into(),
            ));
        }
        if !base.starts_with("http://") && !base.starts_with("https://") {
            base = format!("http://{}", base);
        }
        if !base.ends_with('/') {
            base.push('/');
        }
        let parsed = Url::parse(&base).map_err(|err| {
            SessionError::InvalidConfig(format!("invalid session server url: {err}"))
        })?;
        Ok(Self { base_url: parsed })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn describe_endpoint(&self, session_id: &str) -> Result<Url, SessionError> {
        self.join(&format!("sessions/{session_id}"))
    }

    pub fn session_endpoint(&self, session_id: &str, leaf: &str) -> Result<Url, SessionError> {
        self.join(&format!("sessions/{session_id}/{leaf}"))
    }

    /// Same endpoint with the scheme flipped to ws/wss.
    pub fn websocket_endpoint(&self, session_id: &str, leaf: &str) -> Result<Url, SessionError> {
        let mut url = self.session_endpoint(session_id, leaf)?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme).map_err(|_| {
            SessionError::InvalidConfig(format!("cannot derive websocket scheme for {url}"))
        })?;
        Ok(url)
    }

    fn join(&self, path: &str) -> Result<Url, SessionError> {
        self.base_url.join(path).map_err(|err| {
            SessionError::InvalidConfig(format!("unable to construct endpoint {path}: {err}"))
        })
    }
}

/// Minimal session metadata; a descriptor without an id is treated as
/// "session invalid" before it ever reaches callers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionDescriptor {
    pub id: String,
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("invalid session configuration: {0}")]
    InvalidConfig(String),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("unexpected http status {0}")]
    HttpStatus(StatusCode),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait SessionBackend: Send + Sync {
    async fn describe_session(
        &self,
        config: &SessionConfig,
        session_id: &str,
    ) -> Result<SessionDescriptor, SessionError>;

    async fn fetch_snapshot(
        &self,
        config: &SessionConfig,
        session_id: &str,
    ) -> Result<Vec<u8>, SessionError>;
}

pub struct ReqwestSessionBackend {
    client: reqwest::Client,
}

impl ReqwestSessionBackend {
    pub fn new() -> Result<Self, SessionError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(8))
            .no_proxy()
            .build()?;
        Ok(Self { client })
    }
}

#[derive(Debug, Deserialize)]
struct RawDescriptor {
    #[serde(default)]
    id: Option<String>,
}

#[async_trait]
impl SessionBackend for ReqwestSessionBackend {
    async fn describe_session(
        &self,
        config: &SessionConfig,
        session_id: &str,
    ) -> Result<SessionDescriptor, SessionError> {
        let endpoint = config.describe_endpoint(session_id)?;
        let response = self.client.get(endpoint).send().await?;
        if !response.status().is_success() {
            return Err(SessionError::HttpStatus(response.status()));
        }
        let raw = response.json::<RawDescriptor>().await?;
        let id = raw
            .id
            .ok_or_else(|| SessionError::InvalidResponse("session descriptor missing id".into()))?;
        Ok(SessionDescriptor { id })
    }

    async fn fetch_snapshot(
        &self,
        config: &SessionConfig,
        session_id: &str,
    ) -> Result<Vec<u8>, SessionError> {
        let endpoint = config.session_endpoint(session_id, "snapshot")?;
        let response = self.client.get(endpoint).send().await?;
        if !response.status().is_success() {
            return Err(SessionError::HttpStatus(response.status()));
        }
        Ok(response.bytes().await?.to_vec())
    }
}
