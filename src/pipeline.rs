//! Per-envelope inbound processing.
//!
//! One envelope goes through verify, decrypt, parse, classify, policy, and
//! forward, in that order. Every branch ends in a [`ProcessOutcome`], and
//! every outcome is acknowledged by the caller: a poison envelope is
//! dropped here so redelivery cannot wedge the inbox, and a policy
//! rejection answers the sender in-thread with a generic refusal.

use std::sync::Arc;

use crate::{
    agent::AgentQueue,
    crypto::CryptoContext,
    events::{self, ActionableEvent, InboundPayload},
    health::{HealthRecorder, Stage},
    outbound::OutboundClient,
    policy::{ContentPolicy, ExternalContent},
    threads::ThreadRegistry,
    wire::BrokerEnvelope,
};

const REFUSAL_TEXT: &str = "Sorry, I can't help with that request.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoisonKind {
    BadSignature,
    DecryptFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    AccessDenied,
    RateLimited,
}

/// Terminal state of one envelope. All variants are acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Wrapped and handed to the agent queue.
    Forwarded,
    /// Valid but not actionable (unknown shape, bot echo, malformed JSON).
    NoOp,
    /// Blocked by policy; a generic refusal was posted in-thread.
    Rejected(RejectReason),
    /// Actionable, but the agent queue was full; acknowledged without
    /// local delivery.
    QueueFull,
    /// Failed verification or decryption; dropped without forwarding.
    Poison(PoisonKind),
}

pub struct Pipeline {
    crypto: Arc<CryptoContext>,
    policy: Arc<dyn ContentPolicy>,
    queue: AgentQueue,
    threads: ThreadRegistry,
    outbound: OutboundClient,
    health: Arc<HealthRecorder>,
    /// Label naming the inbound source in wrapped content, e.g. "chat-relay".
    source_label: String,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        crypto: Arc<CryptoContext>,
        policy: Arc<dyn ContentPolicy>,
        queue: AgentQueue,
        threads: ThreadRegistry,
        outbound: OutboundClient,
        health: Arc<HealthRecorder>,
        source_label: impl Into<String>,
    ) -> Self {
        Self {
            crypto,
            policy,
            queue,
            threads,
            outbound,
            health,
            source_label: source_label.into(),
        }
    }

    pub async fn process(&self, envelope: &BrokerEnvelope) -> ProcessOutcome {
        if !self.crypto.verify_envelope(envelope) {
            tracing::warn!(message_id = %envelope.message_id, "envelope signature rejected, dropping");
            self.health
                .mark_error(Stage::InboundDecrypt, "envelope signature rejected");
            return ProcessOutcome::Poison(PoisonKind::BadSignature);
        }
        let plaintext = match self.crypto.decrypt_envelope(envelope) {
            Ok(plaintext) => plaintext,
            Err(error) => {
                tracing::warn!(message_id = %envelope.message_id, %error, "envelope decrypt failed, dropping");
                self.health
                    .mark_error(Stage::InboundDecrypt, &error.to_string());
                return ProcessOutcome::Poison(PoisonKind::DecryptFailed);
            }
        };
        self.health.mark_ok(Stage::InboundDecrypt);

        // A decrypted payload that is not valid JSON is a no-op, not poison:
        // the transport layers all checked out.
        let payload: InboundPayload = match serde_json::from_slice(&plaintext) {
            Ok(payload) => payload,
            Err(error) => {
                tracing::debug!(message_id = %envelope.message_id, %error, "non-JSON payload ignored");
                return ProcessOutcome::NoOp;
            }
        };
        let Some(event) = events::classify(&payload) else {
            return ProcessOutcome::NoOp;
        };

        if !self.policy.is_allowed(&event.user) {
            tracing::info!(user = %event.user, channel = %event.channel, "user not on allow-list");
            self.send_refusal(&event).await;
            return ProcessOutcome::Rejected(RejectReason::AccessDenied);
        }
        if !self.policy.check_rate(&event.user) {
            tracing::info!(user = %event.user, "rate limit exceeded");
            self.send_refusal(&event).await;
            return ProcessOutcome::Rejected(RejectReason::RateLimited);
        }

        let suspicious = self.policy.detect_suspicious_patterns(&event.text);
        if !suspicious.is_empty() {
            tracing::warn!(user = %event.user, flags = ?suspicious, "suspicious patterns flagged");
        }

        // Replies land in the thread the event belongs to: the existing
        // thread for threaded messages, a new one rooted at the event
        // otherwise.
        let thread_root = event.thread_ts.as_deref().unwrap_or(&event.ts);
        let thread_id = self.threads.id_for(&event.channel, thread_root);

        let wrapped = self.policy.wrap_external_content(&ExternalContent {
            text: &event.text,
            source: &self.source_label,
            user: &event.user,
            channel: &event.channel,
            thread_ts: event.thread_ts.as_deref(),
            thread_id: &thread_id,
            suspicious: &suspicious,
        });

        if !self.queue.enqueue(wrapped) {
            tracing::error!(message_id = %envelope.message_id, "agent queue full, delivery dropped");
            self.health
                .mark_error(Stage::InboundProcess, "agent queue full");
            return ProcessOutcome::QueueFull;
        }
        ProcessOutcome::Forwarded
    }

    /// Best effort: a failed refusal post never blocks acknowledgment.
    async fn send_refusal(&self, event: &ActionableEvent) {
        let thread_root = event.thread_ts.as_deref().unwrap_or(&event.ts);
        if let Err(error) = self
            .outbound
            .post_message(&event.channel, Some(thread_root), REFUSAL_TEXT)
            .await
        {
            tracing::warn!(%error, channel = %event.channel, "failed to post refusal");
        }
    }
}
