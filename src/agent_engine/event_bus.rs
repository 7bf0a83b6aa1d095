use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

use crate::agent_engine::state::{SessionStatus, SubtaskStatus};

/// Progress notifications for observers of a running session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    SessionStarted {
        session_id: String,
        task: String,
    },
    SubtasksPlanned {
        subtasks: Vec<String>,
    },
    SubtaskStarted {
        subtask_id: u32,
        description: String,
    },
    InstructionsIssued {
        subtask_id: u32,
        generation: u32,
        count: usize,
        resume_at: usize,
    },
    InstructionApplied {
        subtask_id: u32,
        index: usize,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    Verified {
        subtask_id: u32,
        success: bool,
    },
    ErrorRecorded {
        seq: u64,
        subtask_id: u32,
        cause: String,
    },
    SubtaskFinished {
        subtask_id: u32,
        status: SubtaskStatus,
    },
    SessionFinished {
        status: SessionStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

/// Requests sent into a running session from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    Stop,
}

pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
    command_tx: mpsc::Sender<SessionCommand>,
    command_rx: mpsc::Receiver<SessionCommand>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(100);
        let (command_tx, command_rx) = mpsc::channel(8);
        Self {
            tx,
            command_tx,
            command_rx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Publish to current subscribers; having none is not an error.
    pub fn publish(&self, event: SessionEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("session event dropped, no subscribers");
        }
    }

    pub fn command_sender(&self) -> mpsc::Sender<SessionCommand> {
        self.command_tx.clone()
    }

    /// Whether a stop was requested since the last check.
    pub fn stop_requested(&mut self) -> bool {
        let mut stop = false;
        while let Ok(cmd) = self.command_rx.try_recv() {
            if cmd == SessionCommand::Stop {
                stop = true;
            }
        }
        stop
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_events_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(SessionEvent::SubtaskStarted {
            subtask_id: 1,
            description: "open application".into(),
        });
        bus.publish(SessionEvent::Verified {
            subtask_id: 1,
            success: true,
        });
        assert!(matches!(rx.recv().await.unwrap(), SessionEvent::SubtaskStarted { subtask_id: 1, .. }));
        assert!(matches!(rx.recv().await.unwrap(), SessionEvent::Verified { success: true, .. }));
    }

    #[tokio::test]
    async fn stop_command_is_seen_once() {
        let mut bus = EventBus::new();
        assert!(!bus.stop_requested());
        bus.command_sender().send(SessionCommand::Stop).await.unwrap();
        assert!(bus.stop_requested());
        assert!(!bus.stop_requested());
    }

    #[test]
    fn events_serialize_tagged() {
        let json = serde_json::to_value(SessionEvent::SessionFinished {
            status: SessionStatus::Exhausted,
            reason: None,
        })
        .unwrap();
        assert_eq!(json["event"], "session_finished");
        assert_eq!(json["status"], "exhausted");
    }
}
