//! HTTP client for the broker wire protocol.
//!
//! Issues signed `inbox.pull`, `inbox.ack`, and `send` requests. Pull
//! windows are clamped here so the wire request never exceeds the
//! protocol's safe bounds regardless of configuration.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};

use crate::{
    crypto::CryptoContext,
    error::{BridgeError, Result},
    wire::{
        AckRequest, AckResponse, BrokerEnvelope, OutboundAction, PullRequest, PullResponse,
        Routing, SendRequest, SendResponse, MAX_PULL_MESSAGES, MAX_WAIT_SECONDS, PROTOCOL_VERSION,
    },
};

/// Generous ceiling over the 25s long-poll window.
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct BrokerClient {
    http: reqwest::Client,
    base_url: String,
    workspace_id: String,
    bearer_token: Option<String>,
    crypto: Arc<CryptoContext>,
}

/// Clamp a configured pull window to the protocol's safe bounds.
pub fn clamp_pull_window(max_messages: u32, wait_seconds: i64) -> (u32, u32) {
    (
        max_messages.clamp(1, MAX_PULL_MESSAGES),
        wait_seconds.clamp(0, MAX_WAIT_SECONDS) as u32,
    )
}

impl BrokerClient {
    pub fn new(
        base_url: impl Into<String>,
        workspace_id: impl Into<String>,
        bearer_token: Option<String>,
        crypto: Arc<CryptoContext>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            workspace_id: workspace_id.into(),
            bearer_token,
            crypto,
        })
    }

    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    /// Long-poll the inbox. Returns zero or more envelopes.
    pub async fn pull(&self, max_messages: u32, wait_seconds: i64) -> Result<Vec<BrokerEnvelope>> {
        let (max_messages, wait_seconds) = clamp_pull_window(max_messages, wait_seconds);
        let timestamp = Utc::now().timestamp();
        let params = json!({
            "max_messages": max_messages,
            "wait_seconds": wait_seconds,
        });
        let signature =
            self.crypto
                .sign_protocol_request("inbox.pull", &self.workspace_id, timestamp, &params);
        let request = PullRequest {
            workspace_id: self.workspace_id.clone(),
            protocol_version: PROTOCOL_VERSION.to_string(),
            max_messages,
            wait_seconds,
            timestamp,
            signature,
        };

        let response: PullResponse = self.post("/api/inbox/pull", &request).await?;
        if !response.ok {
            return Err(BridgeError::api("pull_rejected", "broker rejected pull", 200));
        }
        Ok(response.messages)
    }

    /// Acknowledge a batch of message ids.
    pub async fn ack(&self, message_ids: &[String]) -> Result<u64> {
        let timestamp = Utc::now().timestamp();
        let params = json!({ "message_ids": message_ids });
        let signature =
            self.crypto
                .sign_protocol_request("inbox.ack", &self.workspace_id, timestamp, &params);
        let request = AckRequest {
            workspace_id: self.workspace_id.clone(),
            protocol_version: PROTOCOL_VERSION.to_string(),
            message_ids: message_ids.to_vec(),
            timestamp,
            signature,
        };

        let response: AckResponse = self.post("/api/inbox/ack", &request).await?;
        if !response.ok {
            return Err(BridgeError::api("ack_rejected", "broker rejected ack", 200));
        }
        Ok(response.acked)
    }

    /// Encrypt, sign, and deliver an outbound action body.
    pub async fn send(
        &self,
        action: OutboundAction,
        routing: &Routing,
        body: &Value,
    ) -> Result<Option<String>> {
        let timestamp = Utc::now().timestamp();
        let sealed = self.crypto.encrypt_and_sign(
            action.as_str(),
            &self.workspace_id,
            timestamp,
            body,
            routing,
        )?;
        let request = SendRequest {
            workspace_id: self.workspace_id.clone(),
            action: action.as_str().to_string(),
            routing: routing.clone(),
            encrypted_body: sealed.encrypted_body,
            nonce: sealed.nonce,
            timestamp,
            signature: sealed.signature,
        };

        let response: SendResponse = self.post("/api/send", &request).await?;
        if !response.ok {
            return Err(BridgeError::api("send_rejected", "broker rejected send", 200));
        }
        Ok(response.ts)
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http.post(&url).json(body);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let text = response.text().await.unwrap_or_default();
            return Err(parse_api_error(&text, status));
        }
        Ok(response.json::<T>().await?)
    }
}

/// Map a non-2xx broker response body to a typed API error, tolerating
/// non-JSON bodies.
fn parse_api_error(body: &str, status: u16) -> BridgeError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let error = parsed.as_ref().and_then(|v| v.get("error"));
    let code = error
        .and_then(|e| e.get("code"))
        .and_then(Value::as_str)
        .unwrap_or("http_error");
    let message = error
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .unwrap_or(body)
        .to_string();
    BridgeError::api(code, message, status)
}
