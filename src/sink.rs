// src/sink.rs - Generic publication point for signals and fire outcomes
use log::debug;
use tokio::sync::broadcast;

use crate::types::{Confirmation, ConnectionHealth, PositionState, Signal};

/// Everything the engine publishes for external consumers (persistence,
/// notification/UI layers). The engine is agnostic of who subscribes or
/// how events get rendered.
#[derive(Debug, Clone)]
pub enum SinkEvent {
    SignalPublished(Signal),
    FireConfirmation(Confirmation),
    PositionChanged {
        fire_id: String,
        state: PositionState,
    },
    TerminalHealthChanged {
        identity: String,
        health: ConnectionHealth,
    },
}

/// Broadcast-backed sink handle. Cheap to clone; owned by the engine
/// context and handed to every component that publishes.
#[derive(Clone)]
pub struct EventSink {
    tx: broadcast::Sender<SinkEvent>,
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SinkEvent> {
        self.tx.subscribe()
    }

    /// Publishing never fails the pipeline; with no subscribers the event
    /// is simply dropped.
    pub fn publish(&self, event: SinkEvent) {
        if self.tx.send(event).is_err() {
            debug!("📢 [SINK] No subscribers, event dropped");
        }
    }
}
