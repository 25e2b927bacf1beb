//! Persisted per-stage health record for external monitoring.
//!
//! Every external call site updates exactly one sub-record, on both success
//! and failure. The record is serialized to a fixed path after every
//! mutation with an atomic write (temp file + rename) so a concurrent
//! reader never observes a partial file. Nothing inside the process reads
//! it back. All operations are infallible — health reporting must never
//! affect the relay's own liveness.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

const MAX_ERROR_LEN: usize = 300;

/// Pipeline stages tracked by the recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Poll,
    InboundDecrypt,
    InboundProcess,
    Ack,
    Outbound,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct StageHealth {
    pub last_ok_at: Option<DateTime<Utc>>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct PollHealth {
    #[serde(flatten)]
    pub stage: StageHealth,
    pub consecutive_failures: u32,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct HealthRecord {
    pub poll: PollHealth,
    #[serde(rename = "inbound.decrypt")]
    pub inbound_decrypt: StageHealth,
    #[serde(rename = "inbound.process")]
    pub inbound_process: StageHealth,
    pub ack: StageHealth,
    pub outbound: StageHealth,
    pub updated_at: Option<DateTime<Utc>>,
}

pub struct HealthRecorder {
    path: PathBuf,
    record: Mutex<HealthRecord>,
}

impl HealthRecorder {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            record: Mutex::new(HealthRecord::default()),
        }
    }

    pub fn mark_ok(&self, stage: Stage) {
        self.mark(stage, None);
    }

    pub fn mark_error(&self, stage: Stage, error: &str) {
        self.mark(stage, Some(error));
    }

    /// Current in-memory record (snapshot; for tests and introspection).
    pub fn snapshot(&self) -> HealthRecord {
        self.record.lock().clone()
    }

    fn mark(&self, stage: Stage, error: Option<&str>) {
        let now = Utc::now();
        let snapshot = {
            let mut record = self.record.lock();
            if stage == Stage::Poll {
                match error {
                    Some(_) => record.poll.consecutive_failures += 1,
                    None => record.poll.consecutive_failures = 0,
                }
            }
            let sub = match stage {
                Stage::Poll => &mut record.poll.stage,
                Stage::InboundDecrypt => &mut record.inbound_decrypt,
                Stage::InboundProcess => &mut record.inbound_process,
                Stage::Ack => &mut record.ack,
                Stage::Outbound => &mut record.outbound,
            };
            match error {
                Some(message) => {
                    sub.last_error_at = Some(now);
                    sub.last_error = Some(truncate(message));
                }
                None => sub.last_ok_at = Some(now),
            }
            record.updated_at = Some(now);
            record.clone()
        };
        self.persist(&snapshot);
    }

    fn persist(&self, record: &HealthRecord) {
        let Ok(json) = serde_json::to_string_pretty(record) else {
            return;
        };
        // Atomic write: temp file then rename. A persistence failure is
        // logged and swallowed.
        let tmp = self.path.with_extension("tmp");
        match std::fs::write(&tmp, json) {
            Ok(()) => {
                if let Err(error) = std::fs::rename(&tmp, &self.path) {
                    tracing::warn!(%error, path = %self.path.display(), "failed to persist health record");
                }
            }
            Err(error) => {
                tracing::warn!(%error, path = %tmp.display(), "failed to write health temp file");
            }
        }
    }
}

fn truncate(message: &str) -> String {
    if message.len() <= MAX_ERROR_LEN {
        return message.to_string();
    }
    let mut cut = MAX_ERROR_LEN;
    while !message.is_char_boundary(cut) {
        cut -= 1;
    }
    message[..cut].to_string()
}
