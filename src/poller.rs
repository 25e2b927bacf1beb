//! The pull loop: long-poll the broker inbox, dispatch each envelope
//! through the pipeline, acknowledge the whole batch.
//!
//! Acknowledgment is unconditional per envelope once it reaches a terminal
//! outcome, including duplicates and poison. Transient pull and ack
//! failures back off exponentially; an expired workspace token is fatal
//! and stops the loop so the operator re-provisions instead of silently
//! retrying.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::sync::watch;

use crate::{
    broker::BrokerClient,
    crypto::CryptoContext,
    dedupe::DedupeCache,
    error::{BridgeError, Result},
    health::{HealthRecorder, Stage},
    pipeline::Pipeline,
};

const BACKOFF_CEILING: Duration = Duration::from_secs(30);

/// Doubling backoff for consecutive pull failures, reset on success.
#[derive(Debug)]
pub struct Backoff {
    base: Duration,
    failures: u32,
}

impl Backoff {
    pub fn new(base: Duration) -> Self {
        Self { base, failures: 0 }
    }

    pub fn on_success(&mut self) {
        self.failures = 0;
    }

    pub fn on_failure(&mut self) -> Duration {
        let delay = self
            .base
            .saturating_mul(2u32.saturating_pow(self.failures))
            .min(BACKOFF_CEILING);
        self.failures = self.failures.saturating_add(1);
        delay
    }
}

pub struct Poller {
    broker: BrokerClient,
    pipeline: Arc<Pipeline>,
    crypto: Arc<CryptoContext>,
    health: Arc<HealthRecorder>,
    dedupe: DedupeCache,
    max_messages: u32,
    wait_seconds: i64,
    poll_interval: Duration,
}

impl Poller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        broker: BrokerClient,
        pipeline: Arc<Pipeline>,
        crypto: Arc<CryptoContext>,
        health: Arc<HealthRecorder>,
        dedupe_ttl: Duration,
        max_messages: u32,
        wait_seconds: i64,
        poll_interval: Duration,
    ) -> Self {
        Self {
            broker,
            pipeline,
            crypto,
            health,
            dedupe: DedupeCache::new(dedupe_ttl),
            max_messages,
            wait_seconds,
            poll_interval,
        }
    }

    /// One pull/process/ack cycle. Returns the number of envelopes pulled.
    pub async fn run_once(&mut self) -> Result<usize> {
        self.dedupe.prune(Instant::now());

        let envelopes = match self.broker.pull(self.max_messages, self.wait_seconds).await {
            Ok(envelopes) => {
                self.health.mark_ok(Stage::Poll);
                envelopes
            }
            Err(error) => {
                self.health.mark_error(Stage::Poll, &error.to_string());
                if let Some(fatal) = as_fatal(&error) {
                    return Err(fatal);
                }
                return Err(error);
            }
        };

        let pulled = envelopes.len();
        let mut ack_ids = Vec::with_capacity(pulled);
        for envelope in &envelopes {
            if self.dedupe.seen(&envelope.message_id) {
                // Redeliveries are acked but never re-forwarded. A duplicate
                // id arriving with a bad signature is worth its own log line.
                if self.crypto.verify_envelope(envelope) {
                    tracing::info!(message_id = %envelope.message_id, "duplicate envelope, acking without redelivery");
                } else {
                    tracing::warn!(message_id = %envelope.message_id, "duplicate envelope with invalid signature");
                }
                ack_ids.push(envelope.message_id.clone());
                continue;
            }

            let outcome = self.pipeline.process(envelope).await;
            tracing::debug!(message_id = %envelope.message_id, ?outcome, "envelope processed");
            self.dedupe.remember(&envelope.message_id, Instant::now());
            ack_ids.push(envelope.message_id.clone());
        }

        if !ack_ids.is_empty() {
            match self.broker.ack(&ack_ids).await {
                Ok(acked) => {
                    self.health.mark_ok(Stage::Ack);
                    tracing::debug!(acked, "batch acknowledged");
                }
                Err(error) => {
                    // Unacked envelopes will be redelivered; the dedupe cache
                    // keeps the retry idempotent. The iteration still fails so
                    // the loop backs off instead of hot-polling the pending
                    // batch.
                    self.health.mark_error(Stage::Ack, &error.to_string());
                    tracing::warn!(%error, "ack failed, relying on dedupe for redelivery");
                    if let Some(fatal) = as_fatal(&error) {
                        return Err(fatal);
                    }
                    return Err(error);
                }
            }
        }
        Ok(pulled)
    }

    /// Run until shutdown is signalled or a fatal error stops the loop.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut backoff = Backoff::new(self.poll_interval);
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            let delay = match self.run_once().await {
                Ok(_) => {
                    backoff.on_success();
                    // The long-poll window paces the loop; only a zero
                    // window needs a local sleep.
                    if self.wait_seconds > 0 {
                        Duration::ZERO
                    } else {
                        self.poll_interval
                    }
                }
                Err(error) if error.is_fatal() => {
                    tracing::error!(%error, "fatal poll error, stopping");
                    return Err(error);
                }
                Err(error) => {
                    let delay = backoff.on_failure();
                    tracing::warn!(%error, delay_ms = delay.as_millis() as u64, "pull failed, backing off");
                    delay
                }
            };

            if delay.is_zero() {
                continue;
            }
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => return Ok(()),
            }
        }
    }
}

/// An expired or revoked workspace token cannot be recovered by retrying.
fn as_fatal(error: &BridgeError) -> Option<BridgeError> {
    match error {
        BridgeError::Api { code, message, .. } if code == "token_expired" || code == "token_revoked" => {
            Some(BridgeError::FatalConfig(format!(
                "workspace token rejected ({code}): {message}"
            )))
        }
        _ => None,
    }
}
