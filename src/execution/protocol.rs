// src/execution/protocol.rs - Typed wire messages for the terminal bridge
//
// Everything crossing the transport boundary is decoded strictly into
// these structs; no component downstream ever does ad-hoc JSON key
// lookups. Field names are wire-stable.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::EngineError;
use crate::types::{AccountSnapshot, Confirmation, FireCommand, LegStatus, Tick};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Handshake {
    pub node_id: String,
    pub account_id: String,
    pub broker: String,
    pub currency: String,
    pub balance: f64,
    pub equity: f64,
    pub leverage: f64,
    pub monitored_symbols: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Heartbeat {
    pub node_id: String,
    pub balance: f64,
    pub equity: f64,
    pub open_positions_count: u32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TickMessage {
    pub symbol: String,
    pub bid: f64,
    pub ask: f64,
    pub spread: f64,
    pub volume: f64,
    pub timestamp: DateTime<Utc>,
}

impl TickMessage {
    pub fn into_tick(self) -> Tick {
        Tick {
            instrument: self.symbol,
            bid: self.bid,
            ask: self.ask,
            volume: self.volume,
            timestamp: self.timestamp,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct OhlcMessage {
    pub symbol: String,
    pub timeframe: String,
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PingPong {
    pub ping_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PositionEvent {
    LegClosed,
    TrailActivated,
}

/// Terminal-side lifecycle report for one leg of an already-confirmed
/// position (staged close hit, trailing stop armed).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PositionUpdate {
    pub fire_id: String,
    pub leg_id: String,
    pub event: PositionEvent,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

/// Messages the terminal sends the engine (telemetry + confirmations).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TerminalMessage {
    Handshake(Handshake),
    Heartbeat(Heartbeat),
    Tick(TickMessage),
    Ohlc(OhlcMessage),
    Confirmation(Confirmation),
    PositionUpdate(PositionUpdate),
    Ping(PingPong),
    Pong(PingPong),
}

/// Messages the engine sends a terminal (commands), always addressed to
/// one specific identity.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineMessage {
    Fire(FireCommand),
    CloseAll { target_identity: String },
    CloseTicket { target_identity: String, ticket: i64 },
    Ping(PingPong),
    Pong(PingPong),
}

impl EngineMessage {
    pub fn target_identity(&self) -> Option<&str> {
        match self {
            EngineMessage::Fire(cmd) => Some(&cmd.target_identity),
            EngineMessage::CloseAll { target_identity } => Some(target_identity),
            EngineMessage::CloseTicket { target_identity, .. } => Some(target_identity),
            EngineMessage::Ping(_) | EngineMessage::Pong(_) => None,
        }
    }
}

/// Pre-submission validation, mirroring what the terminal-side validator
/// enforces before a broker ever sees the order. A violating command is
/// rejected here with an explicit error detail instead of producing a
/// broker-side hard error.
pub fn validate_fire(cmd: &FireCommand) -> Result<(), EngineError> {
    if cmd.fire_id.is_empty() {
        return Err(EngineError::Validation("empty fire_id".to_string()));
    }
    if !(cmd.volume.is_finite() && cmd.volume > 0.0) {
        return Err(EngineError::Validation(format!(
            "non-positive volume {}",
            cmd.volume
        )));
    }
    if !cmd.levels_consistent() {
        return Err(EngineError::Validation(format!(
            "direction-inconsistent levels: {} sl={:.5} entry={:.5} tp={:.5}",
            cmd.direction, cmd.stop_loss, cmd.entry, cmd.take_profit
        )));
    }
    if let Some(plan) = &cmd.staged_config {
        if !plan.is_valid() {
            return Err(EngineError::Validation(format!(
                "invalid staged plan: s1={}% s2={}% trail_remainder={}%",
                plan.stage1.close_percent,
                plan.stage2.close_percent,
                plan.trail_remainder_percent()
            )));
        }
    }
    Ok(())
}

/// Confirmation reporting a validation rejection back to the engine so
/// it can decide to retry with corrected levels or discard.
pub fn rejection_confirmation(cmd: &FireCommand, detail: &str) -> Confirmation {
    Confirmation {
        fire_id: cmd.fire_id.clone(),
        leg_id: None,
        status: LegStatus::Error,
        ticket: None,
        fill_price: None,
        error_detail: Some(detail.to_string()),
        account_snapshot: AccountSnapshot::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Direction, StageLeg, StagedPlan, TrailLeg};
    use chrono::TimeZone;

    fn fire(direction: Direction) -> FireCommand {
        FireCommand {
            fire_id: "f-123".to_string(),
            target_identity: "mt5-node-7".to_string(),
            instrument: "EURUSD".to_string(),
            direction,
            entry: 1.1000,
            stop_loss: 1.0985,
            take_profit: 1.10225,
            volume: 0.10,
            staged_config: None,
        }
    }

    #[test]
    fn wire_field_names_are_stable() {
        let msg = EngineMessage::Fire(fire(Direction::Buy));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "fire");
        assert_eq!(json["fire_id"], "f-123");
        assert_eq!(json["target_identity"], "mt5-node-7");
        assert_eq!(json["symbol"], "EURUSD");
        assert_eq!(json["direction"], "BUY");
        assert!(json.get("staged_config").is_none());
    }

    #[test]
    fn terminal_messages_round_trip_by_tag() {
        let hb = TerminalMessage::Heartbeat(Heartbeat {
            node_id: "mt5-node-7".to_string(),
            balance: 10_000.0,
            equity: 10_050.0,
            open_positions_count: 2,
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        });
        let json = serde_json::to_string(&hb).unwrap();
        assert!(json.contains("\"type\":\"heartbeat\""));
        let back: TerminalMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hb);
    }

    #[test]
    fn direction_inconsistent_fire_is_rejected_with_detail() {
        let mut cmd = fire(Direction::Sell); // sell with buy-shaped levels
        cmd.staged_config = None;
        let err = validate_fire(&cmd).unwrap_err();
        assert!(err.is_validation());
        let confirmation = rejection_confirmation(&cmd, &err.to_string());
        assert_eq!(confirmation.status, LegStatus::Error);
        assert_eq!(confirmation.fire_id, "f-123");
        assert!(confirmation.error_detail.is_some());
    }

    #[test]
    fn staged_fire_with_bad_split_is_rejected() {
        let mut cmd = fire(Direction::Buy);
        cmd.staged_config = Some(StagedPlan {
            stage1: StageLeg { trigger_pips: 10.0, close_percent: 70.0 },
            stage2: StageLeg { trigger_pips: 20.0, close_percent: 40.0 },
            trail: TrailLeg { distance_pips: 8.0 },
        });
        assert!(validate_fire(&cmd).is_err());
    }
}
