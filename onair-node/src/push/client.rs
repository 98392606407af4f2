use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

use super::messages::{PushRequest, PushResponse};
use crate::error::{Result, SyncError};
use crate::registry::PeerRecord;

/// Client half of the push protocol
#[derive(Debug, Clone)]
pub struct PushClient {
    http_client: Client,
    timeout: Duration,
}

impl PushClient {
    /// Create a new push client with a per-request timeout
    pub fn new(timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| SyncError::Startup(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Push our status to a peer and return the status it acknowledged with
    pub async fn push(&self, peer: &PeerRecord, request: &PushRequest) -> Result<String> {
        let url = peer.status_url();
        let failure = |reason: String| SyncError::PushFailure {
            peer: peer.identity.clone(),
            reason,
        };

        debug!(peer = %peer.identity, url = %url, status = %request.status, "Pushing status");

        let response = self
            .http_client
            .put(&url)
            .json(request)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    failure(format!("timed out after {:?}", self.timeout))
                } else {
                    failure(e.to_string())
                }
            })?;

        let status = response.status();
        if status == StatusCode::UNPROCESSABLE_ENTITY {
            return Err(SyncError::ProtocolMismatch(format!(
                "{} rejected status \"{}\"",
                peer.identity, request.status
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(failure(format!("HTTP {}: {}", status, body)));
        }

        let ack: PushResponse = response
            .json()
            .await
            .map_err(|e| failure(format!("malformed acknowledgement: {}", e)))?;

        if !ack.success {
            return Err(SyncError::ProtocolMismatch(format!(
                "{} rejected status \"{}\"",
                peer.identity, request.status
            )));
        }

        ack.status.ok_or_else(|| {
            SyncError::ProtocolMismatch(format!("{} acknowledged without a status", peer.identity))
        })
    }
}
