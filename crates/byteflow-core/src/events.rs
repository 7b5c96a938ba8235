//! Progress channel — per-client event delivery for live task updates.
//!
//! One logical channel per connected client id. Delivery is best-effort over
//! the live connection only: publishing to a disconnected client silently
//! drops the event, nothing is queued for offline clients.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};

use crate::task::{ReportResult, TaskRegistry, TaskStatus};

/// Event pushed to a client over its progress channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    ProgressUpdate {
        task_id: String,
        status: TaskStatus,
        progress: u8,
        message: String,
        timestamp: DateTime<Utc>,
    },
    AgentOutput {
        task_id: String,
        agent_name: String,
        role_name: String,
        step_name: String,
        content: String,
        word_count: usize,
        timestamp: DateTime<Utc>,
    },
    Completion {
        task_id: String,
        result: ReportResult,
        timestamp: DateTime<Utc>,
    },
    Error {
        task_id: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
    Cancelled {
        task_id: String,
        timestamp: DateTime<Utc>,
    },
    Pong {
        timestamp: DateTime<Utc>,
    },
}

impl ProgressEvent {
    /// Terminal events close out a task: exactly one of these is emitted per run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEvent::Completion { .. }
                | ProgressEvent::Error { .. }
                | ProgressEvent::Cancelled { .. }
        )
    }
}

/// Inbound control message from a client.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,
    GetStatus { task_id: String },
}

struct ProgressChannelInner {
    /// client id → (subscription generation, sender). The generation lets a
    /// stale connection's teardown verify it still owns the subscription.
    senders: HashMap<String, (u64, mpsc::UnboundedSender<ProgressEvent>)>,
    next_generation: u64,
}

/// Per-client event channel map. Cloneable handle over shared state.
#[derive(Clone)]
pub struct ProgressChannel {
    inner: Arc<RwLock<ProgressChannelInner>>,
}

impl Default for ProgressChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressChannel {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(ProgressChannelInner {
                senders: HashMap::new(),
                next_generation: 0,
            })),
        }
    }

    /// Subscribe a client, returning the subscription generation and the
    /// receiving half. A reconnecting client replaces its previous sender;
    /// the stale receiver then closes.
    pub async fn subscribe(
        &self,
        client_id: &str,
    ) -> (u64, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.write().await;
        let generation = inner.next_generation;
        inner.next_generation += 1;
        inner.senders.insert(client_id.to_string(), (generation, tx));
        tracing::info!("[ProgressChannel] Client {} subscribed", client_id);
        (generation, rx)
    }

    /// Remove a client's channel, but only if `generation` still owns the
    /// subscription. A stale connection tearing down after a reconnect is a
    /// no-op; the replacement keeps its feed.
    pub async fn unsubscribe(&self, client_id: &str, generation: u64) {
        let mut inner = self.inner.write().await;
        if inner
            .senders
            .get(client_id)
            .is_some_and(|(current, _)| *current == generation)
        {
            inner.senders.remove(client_id);
            tracing::info!("[ProgressChannel] Client {} unsubscribed", client_id);
        }
    }

    /// Whether a client currently has a live channel.
    pub async fn is_connected(&self, client_id: &str) -> bool {
        let inner = self.inner.read().await;
        inner.senders.contains_key(client_id)
    }

    /// Push an event to a client. Silently drops (debug-logged) when the
    /// client is not connected or its receiver is gone.
    pub async fn publish(&self, client_id: &str, event: ProgressEvent) {
        let sender = {
            let inner = self.inner.read().await;
            inner.senders.get(client_id).map(|(_, tx)| tx.clone())
        };

        match sender {
            Some(tx) => {
                if tx.send(event).is_err() {
                    tracing::debug!(
                        "[ProgressChannel] Client {} receiver dropped, event discarded",
                        client_id
                    );
                }
            }
            None => {
                tracing::debug!(
                    "[ProgressChannel] Client {} not connected, event discarded",
                    client_id
                );
            }
        }
    }

    /// Dispatch an inbound control message: `ping` answers with `pong`;
    /// `get_status` replays the task's current state as a `progress_update`
    /// (reconnection recovery), or an `error` event for unknown task ids.
    pub async fn handle_inbound(
        &self,
        client_id: &str,
        message: ClientMessage,
        tasks: &TaskRegistry,
    ) {
        match message {
            ClientMessage::Ping => {
                self.publish(
                    client_id,
                    ProgressEvent::Pong {
                        timestamp: Utc::now(),
                    },
                )
                .await;
            }
            ClientMessage::GetStatus { task_id } => match tasks.snapshot(&task_id).await {
                Some(task) => {
                    self.publish(
                        client_id,
                        ProgressEvent::ProgressUpdate {
                            task_id: task.id.clone(),
                            status: task.status,
                            progress: task.progress,
                            message: format!("Task is {}", task.status.as_str()),
                            timestamp: Utc::now(),
                        },
                    )
                    .await;
                }
                None => {
                    self.publish(
                        client_id,
                        ProgressEvent::Error {
                            task_id: task_id.clone(),
                            message: format!("Task {} not found", task_id),
                            timestamp: Utc::now(),
                        },
                    )
                    .await;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::RunOptions;

    #[tokio::test]
    async fn publish_reaches_subscribed_client() {
        let channel = ProgressChannel::new();
        let (_generation, mut rx) = channel.subscribe("client-1").await;

        channel
            .publish(
                "client-1",
                ProgressEvent::Pong {
                    timestamp: Utc::now(),
                },
            )
            .await;

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, ProgressEvent::Pong { .. }));
    }

    #[tokio::test]
    async fn publish_to_unknown_client_is_dropped() {
        let channel = ProgressChannel::new();
        // No subscriber; must not panic or block.
        channel
            .publish(
                "ghost",
                ProgressEvent::Pong {
                    timestamp: Utc::now(),
                },
            )
            .await;
        assert!(!channel.is_connected("ghost").await);
    }

    #[tokio::test]
    async fn stale_unsubscribe_keeps_reconnected_client_attached() {
        let channel = ProgressChannel::new();
        let (old_generation, _old_rx) = channel.subscribe("client-1").await;
        let (_new_generation, mut new_rx) = channel.subscribe("client-1").await;

        // The first connection tears down after the reconnect took over;
        // its unsubscribe must not detach the replacement.
        channel.unsubscribe("client-1", old_generation).await;
        assert!(channel.is_connected("client-1").await);

        channel
            .publish(
                "client-1",
                ProgressEvent::Pong {
                    timestamp: Utc::now(),
                },
            )
            .await;
        assert!(matches!(
            new_rx.recv().await.unwrap(),
            ProgressEvent::Pong { .. }
        ));
    }

    #[tokio::test]
    async fn unsubscribe_with_current_generation_detaches() {
        let channel = ProgressChannel::new();
        let (generation, _rx) = channel.subscribe("client-1").await;
        channel.unsubscribe("client-1", generation).await;
        assert!(!channel.is_connected("client-1").await);
    }

    #[tokio::test]
    async fn ping_answers_pong() {
        let channel = ProgressChannel::new();
        let tasks = TaskRegistry::default();
        let (_generation, mut rx) = channel.subscribe("client-1").await;

        channel
            .handle_inbound("client-1", ClientMessage::Ping, &tasks)
            .await;

        assert!(matches!(
            rx.recv().await.unwrap(),
            ProgressEvent::Pong { .. }
        ));
    }

    #[tokio::test]
    async fn get_status_replays_task_state() {
        let channel = ProgressChannel::new();
        let tasks = TaskRegistry::default();
        let handle = tasks
            .create("client-1", "A long enough test topic", RunOptions::default())
            .await
            .unwrap();
        let task_id = handle.read().await.id.clone();

        let (_generation, mut rx) = channel.subscribe("client-1").await;
        channel
            .handle_inbound(
                "client-1",
                ClientMessage::GetStatus {
                    task_id: task_id.clone(),
                },
                &tasks,
            )
            .await;

        match rx.recv().await.unwrap() {
            ProgressEvent::ProgressUpdate {
                task_id: id,
                status,
                progress,
                ..
            } => {
                assert_eq!(id, task_id);
                assert_eq!(status, TaskStatus::Pending);
                assert_eq!(progress, 0);
            }
            other => panic!("expected progress_update, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn get_status_for_unknown_task_yields_error_event() {
        let channel = ProgressChannel::new();
        let tasks = TaskRegistry::default();
        let (_generation, mut rx) = channel.subscribe("client-1").await;

        channel
            .handle_inbound(
                "client-1",
                ClientMessage::GetStatus {
                    task_id: "missing".to_string(),
                },
                &tasks,
            )
            .await;

        assert!(matches!(
            rx.recv().await.unwrap(),
            ProgressEvent::Error { .. }
        ));
    }

    #[test]
    fn events_serialize_with_snake_case_tags() {
        let event = ProgressEvent::Cancelled {
            task_id: "t1".to_string(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "cancelled");
        assert_eq!(json["task_id"], "t1");

        let ping: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(ping, ClientMessage::Ping));

        let status: ClientMessage =
            serde_json::from_str(r#"{"type":"get_status","task_id":"t1"}"#).unwrap();
        assert!(matches!(status, ClientMessage::GetStatus { .. }));
    }
}
