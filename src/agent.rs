//! Local agent RPC transport and the ordered forward queue.
//!
//! The agent listens on a unix socket speaking newline-delimited JSON. The
//! bridge's only call is `send` in `steer` mode: open a connection, write
//! one frame, await exactly one response frame, close. Delivery to the
//! agent is serialized through a single-consumer queue so two inbound
//! events are never interleaved out of arrival order, while the poll loop
//! itself never waits on the agent.

use std::{path::PathBuf, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::UnixStream,
    sync::mpsc,
    time::timeout,
};

use crate::{
    error::{BridgeError, Result},
    health::{HealthRecorder, Stage},
};

/// Ceiling on waiting for the agent's delivery acknowledgment.
pub const DELIVERY_ACK_TIMEOUT: Duration = Duration::from_secs(120);

const QUEUE_DEPTH: usize = 256;

#[derive(Debug, Serialize)]
struct AgentSendRequest<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    message: &'a str,
    mode: &'static str,
}

#[derive(Debug, Deserialize)]
struct AgentSendResponse {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    command: Option<String>,
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Point-to-point delivery to the local agent. Trait seam so tests can
/// substitute a recording transport.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    async fn forward(&self, message: &str) -> Result<()>;
}

pub struct AgentRpcClient {
    socket_path: PathBuf,
}

impl AgentRpcClient {
    pub fn new(socket_path: PathBuf) -> Self {
        Self { socket_path }
    }
}

#[async_trait]
impl AgentTransport for AgentRpcClient {
    async fn forward(&self, message: &str) -> Result<()> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| BridgeError::AgentTransport(format!("connect: {e}")))?;
        let (read_half, mut write_half) = stream.into_split();

        let mut frame = serde_json::to_string(&AgentSendRequest {
            kind: "send",
            message,
            mode: "steer",
        })?;
        frame.push('\n');
        write_half
            .write_all(frame.as_bytes())
            .await
            .map_err(|e| BridgeError::AgentTransport(format!("write: {e}")))?;

        let mut lines = BufReader::new(read_half).lines();
        let line = timeout(DELIVERY_ACK_TIMEOUT, lines.next_line())
            .await
            .map_err(|_| BridgeError::AgentTimeout(DELIVERY_ACK_TIMEOUT.as_secs()))?
            .map_err(|e| BridgeError::AgentTransport(format!("read: {e}")))?
            .ok_or_else(|| {
                BridgeError::AgentTransport("connection closed before response".into())
            })?;

        let response: AgentSendResponse = serde_json::from_str(&line)?;
        if response.kind != "response" || response.command.as_deref() != Some("send") {
            return Err(BridgeError::AgentTransport(format!(
                "unexpected frame type {:?}",
                response.kind
            )));
        }
        if response.success {
            Ok(())
        } else {
            Err(BridgeError::AgentTransport(
                response.error.unwrap_or_else(|| "delivery rejected".into()),
            ))
        }
    }
}

/// Single-consumer ordered queue in front of the agent transport.
///
/// Enqueue is fire-and-forget; the worker awaits the transport ack per
/// message and records the result on the `inbound.process` health stage.
#[derive(Clone)]
pub struct AgentQueue {
    tx: mpsc::Sender<String>,
}

impl AgentQueue {
    pub fn spawn(transport: Arc<dyn AgentTransport>, health: Arc<HealthRecorder>) -> Self {
        Self::spawn_with_depth(transport, health, QUEUE_DEPTH)
    }

    pub fn spawn_with_depth(
        transport: Arc<dyn AgentTransport>,
        health: Arc<HealthRecorder>,
        depth: usize,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<String>(depth);
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match transport.forward(&message).await {
                    Ok(()) => health.mark_ok(Stage::InboundProcess),
                    Err(error) => {
                        tracing::warn!(%error, "agent delivery failed");
                        health.mark_error(Stage::InboundProcess, &error.to_string());
                    }
                }
            }
        });
        Self { tx }
    }

    /// Queue a message for ordered delivery. Returns false if the queue is
    /// full or the worker is gone; the caller logs and moves on rather than
    /// blocking the poll loop.
    pub fn enqueue(&self, message: String) -> bool {
        self.tx.try_send(message).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;
    use tokio::net::UnixListener;

    use super::*;

    async fn fake_agent(listener: UnixListener, received: Arc<Mutex<Vec<String>>>, succeed: bool) {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let (read_half, mut write_half) = stream.into_split();
            let mut lines = BufReader::new(read_half).lines();
            if let Ok(Some(line)) = lines.next_line().await {
                received.lock().push(line);
            }
            let reply = if succeed {
                "{\"type\":\"response\",\"command\":\"send\",\"success\":true}\n"
            } else {
                "{\"type\":\"response\",\"command\":\"send\",\"success\":false,\"error\":\"busy\"}\n"
            };
            let _ = write_half.write_all(reply.as_bytes()).await;
        }
    }

    #[tokio::test]
    async fn forward_sends_steer_frame_and_reads_ack() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        tokio::spawn(fake_agent(listener, received.clone(), true));

        let client = AgentRpcClient::new(path);
        client.forward("hello agent").await.unwrap();

        let frames = received.lock().clone();
        assert_eq!(frames.len(), 1);
        let frame: serde_json::Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(frame["type"], "send");
        assert_eq!(frame["mode"], "steer");
        assert_eq!(frame["message"], "hello agent");
    }

    #[tokio::test]
    async fn forward_surfaces_agent_rejection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.sock");
        let listener = UnixListener::bind(&path).unwrap();
        tokio::spawn(fake_agent(listener, Arc::new(Mutex::new(Vec::new())), false));

        let client = AgentRpcClient::new(path);
        let error = client.forward("hello").await.unwrap_err();
        assert!(matches!(error, BridgeError::AgentTransport(ref m) if m == "busy"));
    }

    #[tokio::test]
    async fn forward_fails_when_socket_is_absent() {
        let client = AgentRpcClient::new(PathBuf::from("/tmp/definitely-missing.sock"));
        assert!(matches!(
            client.forward("x").await,
            Err(BridgeError::AgentTransport(_))
        ));
    }

    struct RecordingTransport {
        seen: Mutex<Vec<String>>,
        notify: tokio::sync::mpsc::UnboundedSender<()>,
    }

    #[async_trait]
    impl AgentTransport for RecordingTransport {
        async fn forward(&self, message: &str) -> Result<()> {
            self.seen.lock().push(message.to_string());
            let _ = self.notify.send(());
            Ok(())
        }
    }

    #[tokio::test]
    async fn queue_preserves_arrival_order() {
        let dir = tempfile::tempdir().unwrap();
        let health = Arc::new(HealthRecorder::new(dir.path().join("health.json")));
        let (notify_tx, mut notify_rx) = tokio::sync::mpsc::unbounded_channel();
        let transport = Arc::new(RecordingTransport {
            seen: Mutex::new(Vec::new()),
            notify: notify_tx,
        });
        let queue = AgentQueue::spawn(transport.clone(), health);

        for i in 0..5 {
            assert!(queue.enqueue(format!("msg-{i}")));
        }
        for _ in 0..5 {
            notify_rx.recv().await.unwrap();
        }

        let seen = transport.seen.lock().clone();
        assert_eq!(seen, vec!["msg-0", "msg-1", "msg-2", "msg-3", "msg-4"]);
    }
}
