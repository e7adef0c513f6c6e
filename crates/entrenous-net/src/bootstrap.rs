//! REST bootstrap client.
//!
//! Three thin request wrappers: session-id issuance, history fetch, and
//! the plaintext persistence POST. No retries and no caching; callers
//! decide what a failure means.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::config::EngineConfig;
use crate::error::BootstrapError;
use crate::frame::{FrameKind, HistoryEntry};

#[derive(Debug, Clone)]
pub struct BootstrapClient {
    http: Client,
    base: Url,
}

/// Body of the persistence POST.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistRecord {
    pub username: String,
    pub content: Value,
    pub room_id: String,
    #[serde(rename = "type")]
    pub kind: FrameKind,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    session_id: String,
}

impl BootstrapClient {
    pub fn new(config: &EngineConfig) -> Result<Self, BootstrapError> {
        let base = Url::parse(&config.api_base_url)?;
        Ok(Self {
            http: Client::new(),
            base,
        })
    }

    /// `GET /session/{identity}`. One-shot session id issuance.
    pub async fn fetch_session_id(&self, identity: &str) -> Result<String, BootstrapError> {
        let url = self.endpoint(&["session", identity])?;
        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(BootstrapError::UnexpectedStatus(response.status()));
        }
        let body: SessionResponse = response.json().await?;
        debug!(session_id = %body.session_id, "Session id issued");
        Ok(body.session_id)
    }

    /// `GET /messages/{room_id}/`. Full room history, oldest first.
    pub async fn fetch_history(&self, room_id: &str) -> Result<Vec<HistoryEntry>, BootstrapError> {
        let url = self.endpoint(&["messages", room_id, ""])?;
        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(BootstrapError::UnexpectedStatus(response.status()));
        }
        let entries: Vec<HistoryEntry> = response.json().await?;
        debug!(count = entries.len(), "History fetched");
        Ok(entries)
    }

    /// `POST /send/`. Persist the plaintext rendition of an outbound
    /// message before it goes to the wire.
    pub async fn persist_message(&self, record: &PersistRecord) -> Result<(), BootstrapError> {
        let url = self.endpoint(&["send", ""])?;
        let response = self.http.post(url).json(record).send().await?;
        if !response.status().is_success() {
            return Err(BootstrapError::UnexpectedStatus(response.status()));
        }
        Ok(())
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, BootstrapError> {
        let mut url = self.base.clone();
        match url.path_segments_mut() {
            Ok(mut path) => {
                path.pop_if_empty().extend(segments);
            }
            Err(()) => return Err(BootstrapError::InvalidBase),
        }
        Ok(url)
    }
}
