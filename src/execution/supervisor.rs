// src/execution/supervisor.rs - Terminal health sweeps
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{info, warn};
use uuid::Uuid;

use crate::config::ExecutionConfig;
use crate::execution::protocol::{EngineMessage, PingPong};
use crate::execution::terminal::TerminalBridge;
use crate::sink::{EventSink, SinkEvent};
use crate::types::ConnectionHealth;

/// Health transition for one terminal given seconds of telemetry
/// silence. Telemetry within the window keeps (or restores) HEALTHY;
/// past the window the terminal is DEGRADED and probed; past twice the
/// window the connection is written off until it re-handshakes.
pub fn next_health(
    current: ConnectionHealth,
    silence_secs: i64,
    window_secs: i64,
) -> ConnectionHealth {
    match current {
        ConnectionHealth::Disconnected => ConnectionHealth::Disconnected,
        ConnectionHealth::Connecting => ConnectionHealth::Connecting,
        _ => {
            if silence_secs <= window_secs {
                ConnectionHealth::Healthy
            } else if silence_secs <= window_secs * 2 {
                ConnectionHealth::Degraded
            } else {
                ConnectionHealth::Disconnected
            }
        }
    }
}

/// Periodic sweep over the terminal registry. The supervisor is the only
/// writer of connection health; everyone else reads the published state.
pub fn spawn_supervisor(
    bridge: Arc<TerminalBridge>,
    cfg: ExecutionConfig,
    events: EventSink,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(cfg.supervisor_sweep_secs));
        info!(
            "🩺 [SUPERVISOR] Started (silence window {}s, sweep every {}s)",
            cfg.silence_window_secs, cfg.supervisor_sweep_secs
        );

        loop {
            interval.tick().await;
            let now = Utc::now();

            let identities: Vec<String> = bridge
                .registry()
                .iter()
                .map(|h| h.identity.clone())
                .collect();

            for identity in identities {
                let (old, silence) = match bridge.registry().get(&identity) {
                    Some(handle) => (
                        handle.health,
                        (now - handle.last_telemetry).num_seconds(),
                    ),
                    None => continue,
                };
                let new = next_health(old, silence, cfg.silence_window_secs);
                if new == old {
                    continue;
                }

                if let Some(mut handle) = bridge.registry().get_mut(&identity) {
                    handle.health = new;
                }
                warn!(
                    "🩺 [SUPERVISOR] Terminal '{}' {:?} -> {:?} after {}s of silence",
                    identity, old, new, silence
                );
                events.publish(SinkEvent::TerminalHealthChanged {
                    identity: identity.clone(),
                    health: new,
                });

                if new == ConnectionHealth::Degraded {
                    // Probe; the terminal reconnects with its own backoff
                    // and must re-handshake before commands flow again.
                    let ping = EngineMessage::Ping(PingPong {
                        ping_id: Uuid::new_v4().to_string(),
                        timestamp: now,
                    });
                    if let Err(e) = bridge.send_to(&identity, &ping) {
                        warn!("🩺 [SUPERVISOR] Probe to '{}' failed: {}", identity, e);
                    }
                }
            }
        }
    })
}
