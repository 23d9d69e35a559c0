// src/types.rs - Core data model shared across the engine
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "SELL")]
    Sell,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Buy => write!(f, "BUY"),
            Direction::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalClass {
    #[serde(rename = "FAST")]
    Fast,
    #[serde(rename = "PRECISION")]
    Precision,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    pub fn seconds(&self) -> i64 {
        match self {
            Timeframe::M1 => 60,
            Timeframe::M5 => 300,
            Timeframe::M15 => 900,
            Timeframe::M30 => 1800,
            Timeframe::H1 => 3600,
            Timeframe::H4 => 14400,
            Timeframe::D1 => 86400,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }

    pub fn parse(label: &str) -> Option<Timeframe> {
        match label {
            "1m" => Some(Timeframe::M1),
            "5m" => Some(Timeframe::M5),
            "15m" => Some(Timeframe::M15),
            "30m" => Some(Timeframe::M30),
            "1h" => Some(Timeframe::H1),
            "4h" => Some(Timeframe::H4),
            "1d" => Some(Timeframe::D1),
            _ => None,
        }
    }

    /// Start of the period containing `ts`.
    pub fn bucket_start(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let secs = self.seconds();
        let floored = ts.timestamp() - ts.timestamp().rem_euclid(secs);
        Utc.timestamp_opt(floored, 0).single().unwrap_or(ts)
    }
}

/// Pip size by quote currency convention. JPY crosses quote to 2 decimal
/// places, everything else we run to 4.
pub fn pip_size_for(instrument: &str) -> f64 {
    if instrument.to_uppercase().contains("JPY") {
        0.01
    } else {
        0.0001
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Tick {
    pub instrument: String,
    pub bid: f64,
    pub ask: f64,
    pub volume: f64,
    pub timestamp: DateTime<Utc>,
}

impl Tick {
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Candle {
    pub instrument: String,
    pub timeframe: Timeframe,
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub tick_volume: f64,
}

impl Candle {
    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    pub fn upper_wick(&self) -> f64 {
        self.high - self.close.max(self.open)
    }

    pub fn lower_wick(&self) -> f64 {
        self.open.min(self.close) - self.low
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct PatternMatch {
    pub pattern_name: &'static str,
    pub instrument: String,
    pub direction: Direction,
    pub anchor_price: f64,
    pub base_score: f64,
    pub timeframe: Timeframe,
    pub detected_at: DateTime<Utc>,
}

/// Context features the confluence scorer combines with the base score.
#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector {
    pub atr_pips: f64,
    pub session_weight: f64,
    /// Current volume relative to the rolling average (1.0 = normal).
    pub volume_ratio: f64,
    pub multi_tf_alignment: bool,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub pattern: PatternMatch,
    pub final_score: f64,
    pub features: FeatureVector,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ShieldVerdict {
    pub consensus_price: Option<f64>,
    pub agreement_ratio: f64,
    pub outlier_count: usize,
    pub responding_sources: usize,
    pub accepted: bool,
    pub score_bonus: f64,
}

impl ShieldVerdict {
    /// Verdict when not enough sources answered. Always a rejection.
    pub fn rejected(responding: usize) -> Self {
        Self {
            consensus_price: None,
            agreement_ratio: 0.0,
            outlier_count: 0,
            responding_sources: responding,
            accepted: false,
            score_bonus: 0.0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Signal {
    pub id: String,
    pub instrument: String,
    pub direction: Direction,
    pub entry: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub class: SignalClass,
    pub risk_reward_ratio: f64,
    pub final_score: f64,
    pub expiry_at: DateTime<Utc>,
    pub shielded: bool,
    pub created_at: DateTime<Utc>,
}

impl Signal {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry_at
    }

    /// BUY needs sl < entry < tp, SELL the reverse. Levels are never
    /// swapped to "fix" a violation.
    pub fn levels_consistent(&self) -> bool {
        match self.direction {
            Direction::Buy => self.stop_loss < self.entry && self.entry < self.take_profit,
            Direction::Sell => self.take_profit < self.entry && self.entry < self.stop_loss,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct StageLeg {
    pub trigger_pips: f64,
    pub close_percent: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct TrailLeg {
    pub distance_pips: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct StagedPlan {
    pub stage1: StageLeg,
    pub stage2: StageLeg,
    pub trail: TrailLeg,
}

impl StagedPlan {
    /// Volume share left on the trailing leg after both staged closes.
    pub fn trail_remainder_percent(&self) -> f64 {
        100.0 - self.stage1.close_percent - self.stage2.close_percent
    }

    pub fn is_valid(&self) -> bool {
        self.stage1.close_percent > 0.0
            && self.stage2.close_percent > 0.0
            && self.trail_remainder_percent() > 0.0
            && self.stage1.trigger_pips > 0.0
            && self.stage2.trigger_pips > self.stage1.trigger_pips
            && self.trail.distance_pips > 0.0
    }

    pub fn leg_ids(&self) -> [&'static str; 3] {
        ["s1", "s2", "trail"]
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FireCommand {
    pub fire_id: String,
    pub target_identity: String,
    #[serde(rename = "symbol")]
    pub instrument: String,
    pub direction: Direction,
    pub entry: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub volume: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staged_config: Option<StagedPlan>,
}

impl FireCommand {
    pub fn expected_legs(&self) -> usize {
        if self.staged_config.is_some() {
            3
        } else {
            1
        }
    }

    pub fn levels_consistent(&self) -> bool {
        match self.direction {
            Direction::Buy => self.stop_loss < self.entry && self.entry < self.take_profit,
            Direction::Sell => self.take_profit < self.entry && self.entry < self.stop_loss,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegStatus {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "ERROR")]
    Error,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct AccountSnapshot {
    pub balance: f64,
    pub equity: f64,
    pub margin_used: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Confirmation {
    pub fire_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leg_id: Option<String>,
    pub status: LegStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fill_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    pub account_snapshot: AccountSnapshot,
}

/// Observed position lifecycle. The terminal owns the real state; the
/// engine only derives this from confirmations it has actually seen.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionState {
    Pending,
    Open,
    PartiallyFilled,
    Partial1,
    Partial2,
    Trailing,
    Closed,
    Failed,
}

/// Terminal connection health as tracked by the supervisor.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionHealth {
    Disconnected,
    Connecting,
    Connected,
    Healthy,
    Degraded,
}

pub fn signal_validity(class: SignalClass, fast_secs: i64, precision_secs: i64) -> Duration {
    match class {
        SignalClass::Fast => Duration::seconds(fast_secs),
        SignalClass::Precision => Duration::seconds(precision_secs),
    }
}
