//! CLI / environment configuration.
//!
//! Every flag has a `BRIDGE_*` environment fallback so the binary runs
//! unattended under a supervisor with no argv. Key material arrives
//! base64-encoded; decoding failures are fatal at startup, never at
//! runtime.

use std::{collections::HashSet, path::PathBuf, time::Duration};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use clap::Parser;

use crate::error::{BridgeError, Result};

/// The four 32-byte keys the bridge needs, decoded and length-checked.
pub struct KeyMaterial {
    pub box_secret: [u8; 32],
    pub signing_seed: [u8; 32],
    pub broker_box_public: [u8; 32],
    pub broker_signing_public: [u8; 32],
}

#[derive(Debug, Parser)]
#[command(name = "agent-relay-bridge")]
#[command(about = "Pull-bridge between a chat broker and a local agent")]
pub struct Config {
    /// Broker base URL, e.g. https://broker.example.com
    #[arg(long, env = "BRIDGE_BROKER_URL")]
    pub broker_url: String,

    #[arg(long, env = "BRIDGE_WORKSPACE_ID")]
    pub workspace_id: String,

    /// Optional bearer token sent on every broker request.
    #[arg(long, env = "BRIDGE_BROKER_TOKEN")]
    pub broker_token: Option<String>,

    /// Unix-seconds expiry of the workspace token, if the broker issued one.
    #[arg(long, env = "BRIDGE_TOKEN_EXPIRES_AT")]
    pub token_expires_at: Option<i64>,

    /// Server box (X25519) secret key, base64.
    #[arg(long, env = "BRIDGE_BOX_SECRET", hide_env_values = true)]
    pub box_secret: String,

    /// Server signing (ed25519) seed, base64.
    #[arg(long, env = "BRIDGE_SIGNING_SEED", hide_env_values = true)]
    pub signing_seed: String,

    /// Broker box public key, base64.
    #[arg(long, env = "BRIDGE_BROKER_BOX_PUBLIC")]
    pub broker_box_public: String,

    /// Broker signing public key, base64.
    #[arg(long, env = "BRIDGE_BROKER_SIGNING_PUBLIC")]
    pub broker_signing_public: String,

    /// Unix socket the local agent listens on.
    #[arg(long, env = "BRIDGE_AGENT_SOCKET")]
    pub agent_socket: PathBuf,

    /// Base poll interval in milliseconds, used when the long-poll window
    /// is zero and as the backoff base.
    #[arg(long, env = "BRIDGE_POLL_INTERVAL_MS", default_value = "5000")]
    pub poll_interval_ms: u64,

    /// Long-poll window requested from the broker (clamped to 0..=25).
    #[arg(long, env = "BRIDGE_WAIT_SECONDS", default_value = "25")]
    pub wait_seconds: i64,

    /// Messages requested per pull (clamped to 1..=100).
    #[arg(long, env = "BRIDGE_MAX_MESSAGES", default_value = "20")]
    pub max_messages: u32,

    #[arg(long, env = "BRIDGE_DEDUPE_TTL_SECS", default_value = "1200")]
    pub dedupe_ttl_secs: u64,

    #[arg(long, env = "BRIDGE_THREAD_CAPACITY", default_value = "500")]
    pub thread_capacity: usize,

    /// Loopback port for the local agent API.
    #[arg(long, env = "BRIDGE_API_PORT", default_value = "8787")]
    pub api_port: u16,

    /// Local API requests admitted per minute.
    #[arg(long, env = "BRIDGE_API_RATE_PER_MINUTE", default_value = "120")]
    pub api_rate_per_minute: u32,

    /// Inbound messages admitted per user per minute.
    #[arg(long, env = "BRIDGE_USER_RATE_PER_MINUTE", default_value = "30")]
    pub user_rate_per_minute: u32,

    /// Comma-separated user ids allowed to reach the agent. Empty allows all.
    #[arg(long, env = "BRIDGE_ALLOWED_USERS")]
    pub allowed_users: Option<String>,

    #[arg(long, env = "BRIDGE_HEALTH_PATH", default_value = "bridge-health.json")]
    pub health_path: PathBuf,

    /// Source label stamped into content forwarded to the agent.
    #[arg(long, env = "BRIDGE_SOURCE_LABEL", default_value = "chat-relay")]
    pub source_label: String,
}

impl Config {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn dedupe_ttl(&self) -> Duration {
        Duration::from_secs(self.dedupe_ttl_secs)
    }

    pub fn allowed_user_set(&self) -> Option<HashSet<String>> {
        let raw = self.allowed_users.as_deref()?.trim();
        if raw.is_empty() {
            return None;
        }
        Some(
            raw.split(',')
                .map(str::trim)
                .filter(|user| !user.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn key_material(&self) -> Result<KeyMaterial> {
        Ok(KeyMaterial {
            box_secret: decode_key("box secret", &self.box_secret)?,
            signing_seed: decode_key("signing seed", &self.signing_seed)?,
            broker_box_public: decode_key("broker box public key", &self.broker_box_public)?,
            broker_signing_public: decode_key(
                "broker signing public key",
                &self.broker_signing_public,
            )?,
        })
    }

    /// Startup checks that cannot be expressed as clap constraints.
    pub fn validate(&self) -> Result<()> {
        if let Some(expires_at) = self.token_expires_at {
            if expires_at <= Utc::now().timestamp() {
                return Err(BridgeError::FatalConfig(format!(
                    "workspace token expired at {expires_at}; re-provision before starting"
                )));
            }
        }
        Ok(())
    }
}

fn decode_key(name: &str, value: &str) -> Result<[u8; 32]> {
    let bytes = BASE64
        .decode(value.trim())
        .map_err(|_| BridgeError::FatalConfig(format!("{name} is not valid base64")))?;
    bytes
        .try_into()
        .map_err(|_| BridgeError::FatalConfig(format!("{name} must decode to 32 bytes")))
}
