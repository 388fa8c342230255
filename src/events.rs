//! Structured event stream for the external log/review surface.
//!
//! Every fallback, failure, and lifecycle edge the engine takes is broadcast
//! as an `OrchestratorEvent`. Consumers (the board, a log shipper) subscribe
//! and render; the engine never blocks on slow or absent subscribers.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Events emitted during task orchestration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    /// A task changed state.
    TaskStateChanged {
        task_id: Uuid,
        from: String,
        to: String,
    },
    /// An attempt began supervision.
    AttemptStarted {
        task_id: Uuid,
        attempt_id: Uuid,
        variant: String,
    },
    /// A resolution tier failed at runtime and the next tier is being tried.
    TierFallback {
        attempt_id: Uuid,
        variant: String,
        failed_tier: String,
        next_tier: String,
    },
    /// All resolution tiers were exhausted for an attempt.
    ResolutionExhausted {
        attempt_id: Uuid,
        variant: String,
    },
    /// An attempt finished with a classified outcome.
    AttemptFinished {
        task_id: Uuid,
        attempt_id: Uuid,
        outcome: String,
        exit_code: Option<i32>,
        duration_ms: u64,
    },
    /// A diff artifact was captured for the review surface.
    DiffCaptured {
        attempt_id: Uuid,
        patch_path: PathBuf,
    },
    /// A worktree could not be released and is now orphaned.
    WorktreeOrphaned {
        attempt_id: Option<Uuid>,
        path: PathBuf,
    },
    /// The sweep reclaimed an orphaned worktree.
    OrphanRemoved { path: PathBuf },
}

/// Broadcast bus for orchestrator events.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<OrchestratorEvent>,
}

impl EventBus {
    /// Create a bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.tx.subscribe()
    }

    /// Emit an event. Lagging or absent subscribers are not an error.
    pub fn emit(&self, event: OrchestratorEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_reach_subscribers() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        let task_id = Uuid::new_v4();
        bus.emit(OrchestratorEvent::TaskStateChanged {
            task_id,
            from: "todo".to_string(),
            to: "in_progress".to_string(),
        });

        match rx.recv().await.unwrap() {
            OrchestratorEvent::TaskStateChanged { task_id: id, to, .. } => {
                assert_eq!(id, task_id);
                assert_eq!(to, "in_progress");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn emit_without_subscribers_is_fine() {
        let bus = EventBus::default();
        bus.emit(OrchestratorEvent::OrphanRemoved {
            path: PathBuf::from("/tmp/x"),
        });
    }

    #[test]
    fn events_serialize_tagged() {
        let event = OrchestratorEvent::TierFallback {
            attempt_id: Uuid::nil(),
            variant: "claude".to_string(),
            failed_tier: "local".to_string(),
            next_tier: "remote-fallback".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "tier_fallback");
        assert_eq!(json["failed_tier"], "local");
    }
}
