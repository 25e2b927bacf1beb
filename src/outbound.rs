//! Outbound delivery: message posts, thread replies, and reactions.
//!
//! Thin layer over [`BrokerClient::send`] that resolves opaque thread
//! handles, shapes the action bodies, and records every delivery attempt
//! on the `outbound` health stage.

use std::sync::Arc;

use serde_json::json;

use crate::{
    broker::BrokerClient,
    error::{BridgeError, Result},
    health::{HealthRecorder, Stage},
    threads::ThreadRegistry,
    wire::{OutboundAction, Routing},
};

#[derive(Clone)]
pub struct OutboundClient {
    broker: BrokerClient,
    threads: ThreadRegistry,
    health: Arc<HealthRecorder>,
}

impl OutboundClient {
    pub fn new(broker: BrokerClient, threads: ThreadRegistry, health: Arc<HealthRecorder>) -> Self {
        Self {
            broker,
            threads,
            health,
        }
    }

    /// Post a message to a channel, optionally into a thread. Returns the
    /// broker-assigned timestamp of the posted message when available.
    pub async fn post_message(
        &self,
        channel: &str,
        thread_ts: Option<&str>,
        text: &str,
    ) -> Result<Option<String>> {
        let routing = Routing {
            channel: channel.to_string(),
            thread_ts: thread_ts.map(str::to_string),
            timestamp: None,
        };
        self.deliver(OutboundAction::PostMessage, routing, json!({ "text": text }))
            .await
    }

    /// Reply into the thread behind an opaque handle issued by the registry.
    pub async fn reply(&self, thread_id: &str, text: &str) -> Result<Option<String>> {
        let (channel, thread_ts) = self
            .threads
            .resolve(thread_id)
            .ok_or_else(|| BridgeError::UnknownThread(thread_id.to_string()))?;
        self.post_message(&channel, Some(&thread_ts), text).await
    }

    /// Add an emoji reaction to the message at `ts` in `channel`.
    pub async fn add_reaction(&self, channel: &str, ts: &str, name: &str) -> Result<()> {
        let routing = Routing {
            channel: channel.to_string(),
            thread_ts: None,
            timestamp: Some(ts.to_string()),
        };
        self.deliver(OutboundAction::AddReaction, routing, json!({ "name": name }))
            .await?;
        Ok(())
    }

    async fn deliver(
        &self,
        action: OutboundAction,
        routing: Routing,
        body: serde_json::Value,
    ) -> Result<Option<String>> {
        match self.broker.send(action, &routing, &body).await {
            Ok(ts) => {
                self.health.mark_ok(Stage::Outbound);
                Ok(ts)
            }
            Err(error) => {
                self.health.mark_error(Stage::Outbound, &error.to_string());
                Err(error)
            }
        }
    }
}
