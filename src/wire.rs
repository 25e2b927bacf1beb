use serde::{Deserialize, Serialize};

/// Protocol version string sent on every signed broker request.
pub const PROTOCOL_VERSION: &str = "1";

/// Server-side clamp on `max_messages` per pull, regardless of configuration.
pub const MAX_PULL_MESSAGES: u32 = 100;
/// Server-side clamp on long-poll `wait_seconds`, regardless of configuration.
pub const MAX_WAIT_SECONDS: i64 = 25;

/// An encrypted, broker-signed container for one inbound event.
///
/// `broker_signature` must verify over the canonical encoding of
/// `(workspace_id, broker_timestamp, encrypted)` before `encrypted` is
/// trusted or decrypted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerEnvelope {
    pub message_id: String,
    pub workspace_id: String,
    /// Sealed-box ciphertext, base64.
    pub encrypted: String,
    /// Unix seconds, assigned by the broker.
    pub broker_timestamp: i64,
    /// Detached ed25519 signature, base64.
    pub broker_signature: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
    pub workspace_id: String,
    pub protocol_version: String,
    pub max_messages: u32,
    pub wait_seconds: u32,
    pub timestamp: i64,
    pub signature: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullResponse {
    pub ok: bool,
    #[serde(default)]
    pub messages: Vec<BrokerEnvelope>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckRequest {
    pub workspace_id: String,
    pub protocol_version: String,
    pub message_ids: Vec<String>,
    pub timestamp: i64,
    pub signature: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AckResponse {
    pub ok: bool,
    #[serde(default)]
    pub acked: u64,
}

/// Routing metadata for outbound sends. Covered by the send signature so it
/// cannot be altered between signing and delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Routing {
    pub channel: String,
    /// Thread to reply into, for `chat.postMessage`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,
    /// Message being reacted to, for `reactions.add`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendRequest {
    pub workspace_id: String,
    pub action: String,
    pub routing: Routing,
    /// Authenticated box ciphertext of the action body, base64.
    pub encrypted_body: String,
    /// Fresh random box nonce, base64.
    pub nonce: String,
    pub timestamp: i64,
    pub signature: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendResponse {
    pub ok: bool,
    /// Broker-assigned message timestamp for the posted action.
    #[serde(default)]
    pub ts: Option<String>,
}

/// Outbound actions the relay can perform through the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundAction {
    PostMessage,
    AddReaction,
}

impl OutboundAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PostMessage => "chat.postMessage",
            Self::AddReaction => "reactions.add",
        }
    }
}
