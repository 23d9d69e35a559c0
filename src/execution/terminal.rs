// src/execution/terminal.rs - WebSocket bridge to remote execution terminals
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use uuid::Uuid;

use crate::config::ExecutionConfig;
use crate::errors::EngineError;
use crate::execution::position::PositionLedger;
use crate::execution::protocol::{EngineMessage, Handshake, PingPong, TerminalMessage};
use crate::sink::{EventSink, SinkEvent};
use crate::types::{ConnectionHealth, Tick};

/// One connected execution terminal, keyed by the stable identity from
/// its handshake. The sender feeds the per-connection writer task.
/// `generation` identifies the underlying socket: a reconnect under the
/// same identity replaces the handle with a fresh generation, and the
/// old connection's teardown must not touch the new one.
pub struct TerminalHandle {
    pub identity: String,
    pub generation: Uuid,
    pub info: Handshake,
    pub sender: mpsc::UnboundedSender<Message>,
    pub health: ConnectionHealth,
    pub last_telemetry: DateTime<Utc>,
    pub connected_at: DateTime<Utc>,
}

pub type TerminalRegistry = Arc<DashMap<String, TerminalHandle>>;

/// Accepts terminal connections and multiplexes the three logical
/// channels over each socket: commands out, telemetry and confirmations
/// in. Commands are addressed; a message for one identity is never
/// delivered to another.
pub struct TerminalBridge {
    cfg: ExecutionConfig,
    terminals: TerminalRegistry,
    ledger: Arc<PositionLedger>,
    tick_tx: mpsc::Sender<Tick>,
    events: EventSink,
}

impl TerminalBridge {
    pub fn new(
        cfg: ExecutionConfig,
        terminals: TerminalRegistry,
        ledger: Arc<PositionLedger>,
        tick_tx: mpsc::Sender<Tick>,
        events: EventSink,
    ) -> Self {
        Self {
            cfg,
            terminals,
            ledger,
            tick_tx,
            events,
        }
    }

    pub fn registry(&self) -> &TerminalRegistry {
        &self.terminals
    }

    pub async fn start(self: Arc<Self>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr: SocketAddr = self.cfg.bind_addr.parse()?;
        let listener = TcpListener::bind(addr).await?;
        info!("🔌 [BRIDGE] Terminal bridge listening on {}", addr);

        while let Ok((stream, peer)) = listener.accept().await {
            let bridge = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = bridge.handle_connection(stream, peer).await {
                    error!("🔌 [BRIDGE] Connection from {} ended with error: {}", peer, e);
                }
            });
        }
        Ok(())
    }

    async fn handle_connection(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        debug!("🔌 [BRIDGE] Connection from {}, awaiting handshake", peer);

        // No command is deliverable until the terminal announces itself.
        let read_timeout = Duration::from_secs(self.cfg.channel_read_timeout_secs);
        let first = tokio::time::timeout(read_timeout, ws_receiver.next()).await;
        let handshake = match first {
            Ok(Some(Ok(Message::Text(text)))) => match serde_json::from_str::<TerminalMessage>(&text) {
                Ok(TerminalMessage::Handshake(hs)) => hs,
                Ok(other) => {
                    warn!(
                        "🔌 [BRIDGE] {} sent {:?} before handshake, closing",
                        peer,
                        std::mem::discriminant(&other)
                    );
                    return Ok(());
                }
                Err(e) => {
                    warn!("🔌 [BRIDGE] Undecodable handshake from {}: {}", peer, e);
                    return Ok(());
                }
            },
            _ => {
                warn!("🔌 [BRIDGE] {} closed or timed out before handshake", peer);
                return Ok(());
            }
        };

        let identity = handshake.node_id.clone();
        let generation = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let now = Utc::now();
        info!(
            "🤝 [BRIDGE] Terminal '{}' connected from {} (account {}, broker {}, {} symbols)",
            identity,
            peer,
            handshake.account_id,
            handshake.broker,
            handshake.monitored_symbols.len()
        );

        self.terminals.insert(
            identity.clone(),
            TerminalHandle {
                identity: identity.clone(),
                generation,
                info: handshake,
                sender: tx,
                health: ConnectionHealth::Connected,
                last_telemetry: now,
                connected_at: now,
            },
        );

        // Writer: drains the command queue for this terminal only.
        let writer_identity = identity.clone();
        let terminals = Arc::clone(&self.terminals);
        let writer = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Err(e) = ws_sender.send(message).await {
                    warn!("🔌 [BRIDGE] Send to '{}' failed: {}", writer_identity, e);
                    break;
                }
            }
            if let Some(mut handle) = terminals.get_mut(&writer_identity) {
                if handle.generation == generation {
                    handle.health = ConnectionHealth::Disconnected;
                }
            }
        });

        // Reader: bounded waits so supervisor-visible silence is never
        // masked by an indefinite block.
        loop {
            let next = tokio::time::timeout(read_timeout, ws_receiver.next()).await;
            match next {
                Err(_) => {
                    // Read timeout. Keep waiting only while this socket
                    // still backs the registry entry and has not been
                    // written off by the supervisor.
                    let live = self
                        .terminals
                        .get(&identity)
                        .map(|h| {
                            h.generation == generation
                                && h.health != ConnectionHealth::Disconnected
                        })
                        .unwrap_or(false);
                    if live {
                        continue;
                    }
                    info!(
                        "🔌 [BRIDGE] Closing written-off connection for '{}'",
                        identity
                    );
                    break;
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    warn!("🔌 [BRIDGE] Read error from '{}': {}", identity, e);
                    break;
                }
                Ok(Some(Ok(Message::Close(_)))) => break,
                Ok(Some(Ok(Message::Ping(payload)))) => {
                    if let Some(handle) = self.terminals.get(&identity) {
                        let _ = handle.sender.send(Message::Pong(payload));
                    }
                }
                Ok(Some(Ok(Message::Text(text)))) => {
                    if let Err(e) = self.dispatch(&identity, &text).await {
                        warn!("🔌 [BRIDGE] Bad message from '{}': {}", identity, e);
                    }
                }
                Ok(Some(Ok(_))) => {}
            }
        }

        // A newer connection may already own this identity; only the
        // generation that still backs the registry entry reports the
        // disconnect.
        let owns_entry = self
            .terminals
            .get(&identity)
            .map(|h| h.generation == generation)
            .unwrap_or(false);
        if owns_entry {
            info!("🔌 [BRIDGE] Terminal '{}' disconnected", identity);
            if let Some(mut handle) = self.terminals.get_mut(&identity) {
                handle.health = ConnectionHealth::Disconnected;
            }
            self.events.publish(SinkEvent::TerminalHealthChanged {
                identity: identity.clone(),
                health: ConnectionHealth::Disconnected,
            });
        } else {
            debug!(
                "🔌 [BRIDGE] Stale connection for '{}' closed after reconnect",
                identity
            );
        }
        writer.abort();
        Ok(())
    }

    /// Strict decode at the boundary, then typed routing.
    async fn dispatch(&self, identity: &str, text: &str) -> Result<(), EngineError> {
        let message: TerminalMessage =
            serde_json::from_str(text).map_err(|e| EngineError::Transport(e.to_string()))?;

        match message {
            TerminalMessage::Handshake(hs) => {
                // Re-handshake after a reconnect refreshes capabilities.
                if let Some(mut handle) = self.terminals.get_mut(identity) {
                    handle.info = hs;
                    handle.health = ConnectionHealth::Connected;
                    handle.last_telemetry = Utc::now();
                }
            }
            TerminalMessage::Heartbeat(hb) => {
                debug!(
                    "💓 [BRIDGE] Heartbeat from '{}': balance={:.2} equity={:.2} open={}",
                    identity, hb.balance, hb.equity, hb.open_positions_count
                );
                let tracked = self.ledger.open_position_count();
                if hb.open_positions_count as usize != tracked {
                    debug!(
                        "💓 [BRIDGE] '{}' reports {} open positions, ledger tracks {}",
                        identity, hb.open_positions_count, tracked
                    );
                }
                self.mark_telemetry(identity);
            }
            TerminalMessage::Tick(tick) => {
                self.mark_telemetry(identity);
                if self.tick_tx.send(tick.into_tick()).await.is_err() {
                    return Err(EngineError::Transport("tick channel closed".to_string()));
                }
            }
            TerminalMessage::Ohlc(ohlc) => {
                self.mark_telemetry(identity);
                debug!(
                    "🕯️ [BRIDGE] OHLC from '{}': {} {} close={:.5}",
                    identity, ohlc.symbol, ohlc.timeframe, ohlc.close
                );
            }
            TerminalMessage::Confirmation(conf) => {
                self.mark_telemetry(identity);
                info!(
                    "✅ [BRIDGE] Confirmation from '{}': fire_id={} leg={:?} status={:?}",
                    identity, conf.fire_id, conf.leg_id, conf.status
                );
                let state = self.ledger.record_confirmation(&conf);
                self.events.publish(SinkEvent::FireConfirmation(conf.clone()));
                if let Some(state) = state {
                    self.events.publish(SinkEvent::PositionChanged {
                        fire_id: conf.fire_id,
                        state,
                    });
                }
            }
            TerminalMessage::PositionUpdate(update) => {
                self.mark_telemetry(identity);
                if let Some(state) = self.ledger.record_update(&update) {
                    self.events.publish(SinkEvent::PositionChanged {
                        fire_id: update.fire_id,
                        state,
                    });
                }
            }
            TerminalMessage::Ping(ping) => {
                self.mark_telemetry(identity);
                let pong = EngineMessage::Pong(PingPong {
                    ping_id: ping.ping_id,
                    timestamp: Utc::now(),
                });
                self.send_to(identity, &pong)?;
            }
            TerminalMessage::Pong(_) => {
                self.mark_telemetry(identity);
            }
        }
        Ok(())
    }

    fn mark_telemetry(&self, identity: &str) {
        if let Some(mut handle) = self.terminals.get_mut(identity) {
            handle.last_telemetry = Utc::now();
            if handle.health != ConnectionHealth::Disconnected {
                handle.health = ConnectionHealth::Healthy;
            }
        }
    }

    /// Deliver a command to exactly the addressed terminal. Fails when
    /// the identity is unknown or its connection is down; the caller
    /// decides what a failed delivery means.
    pub fn send_to(&self, identity: &str, message: &EngineMessage) -> Result<(), EngineError> {
        if let Some(target) = message.target_identity() {
            if target != identity {
                return Err(EngineError::Validation(format!(
                    "message addressed to '{}' cannot be sent to '{}'",
                    target, identity
                )));
            }
        }
        let handle = self
            .terminals
            .get(identity)
            .ok_or_else(|| EngineError::TerminalUnavailable(identity.to_string()))?;
        if handle.health == ConnectionHealth::Disconnected {
            return Err(EngineError::TerminalUnavailable(identity.to_string()));
        }
        let payload = serde_json::to_string(message)
            .map_err(|e| EngineError::Transport(e.to_string()))?;
        handle
            .sender
            .send(Message::Text(payload))
            .map_err(|_| EngineError::TerminalUnavailable(identity.to_string()))
    }
}
