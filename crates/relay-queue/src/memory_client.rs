use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

const DEFAULT_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct PrepareRequest<'a> {
    mode_id: &'a str,
    session_key: &'a str,
    engine: &'a str,
    force_full: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareResponse {
    pub prepare_id: String,
    pub mode: String,
    pub from_revision: i64,
    pub to_revision: i64,
    pub xml: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct AckRequest<'a> {
    mode_id: &'a str,
    prepare_id: &'a str,
    session_key: &'a str,
    status: &'a str,
}

/// Runner-side client for the memory service's `/v1/turn/prepare` and
/// `/v1/turn/ack` wire protocol. Every failure here is swallowed before it
/// reaches the Queue Manager's retry ladder — a down memory service
/// downgrades injection, it never fails the user's turn.
pub struct MemoryClient {
    http: reqwest::Client,
    base_url: String,
}

impl MemoryClient {
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    /// Request the delta/full/none XML block for this session. The server
    /// tracks `from_revision` itself (via the session's last acked
    /// revision) — the caller only says which mode/session/engine it's
    /// preparing for and whether a full resend is required. Returns `None`
    /// on any transport or server error; callers proceed without injection
    /// rather than failing the turn.
    pub async fn prepare(
        &self,
        mode_id: &str,
        session_key: &str,
        engine: &str,
        force_full: bool,
    ) -> Option<PrepareResponse> {
        let url = format!("{}/v1/turn/prepare", self.base_url);
        let body = PrepareRequest {
            mode_id,
            session_key,
            engine,
            force_full,
        };
        match self.http.post(&url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => match resp.json::<PrepareResponse>().await {
                Ok(parsed) => Some(parsed),
                Err(e) => {
                    warn!(error = %e, "memory prepare: failed to decode response, proceeding without injection");
                    None
                }
            },
            Ok(resp) => {
                warn!(status = %resp.status(), "memory prepare: non-success response, proceeding without injection");
                None
            }
            Err(e) => {
                warn!(error = %e, "memory prepare: request failed, proceeding without injection");
                None
            }
        }
    }

    /// Acknowledge a prepared turn. Failures are logged only.
    pub async fn ack(&self, mode_id: &str, prepare_id: &str, session_key: &str, success: bool) {
        let url = format!("{}/v1/turn/ack", self.base_url);
        let status = if success { "success" } else { "failed" };
        let body = AckRequest {
            mode_id,
            prepare_id,
            session_key,
            status,
        };
        if let Err(e) = self.http.post(&url).json(&body).send().await {
            warn!(error = %e, "memory ack: request failed");
        }
    }
}
