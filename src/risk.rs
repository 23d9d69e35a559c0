// src/risk.rs - Stop/target sizing and signal classification
use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use log::{debug, info};
use uuid::Uuid;

use crate::config::RiskConfig;
use crate::errors::EngineError;
use crate::types::{
    signal_validity, Direction, ScoredCandidate, ShieldVerdict, Signal, SignalClass,
};

/// Turns a shield-validated candidate into a concrete Signal: ATR-sized
/// stop and target, a class (FAST or PRECISION) and an absolute expiry.
/// Holds the rolling class mix so the PRECISION share stays within the
/// configured ratio; owned by the engine context, not a global.
pub struct RiskEngine {
    cfg: RiskConfig,
    recent_classes: VecDeque<SignalClass>,
}

impl RiskEngine {
    pub fn new(cfg: RiskConfig) -> Self {
        Self {
            cfg,
            recent_classes: VecDeque::new(),
        }
    }

    /// Score tier decides eligibility, the mix ratio caps how many
    /// PRECISION signals actually go out. The split policy is a tunable,
    /// not a law.
    fn classify(&self, final_score: f64) -> SignalClass {
        if final_score < self.cfg.precision_score_floor {
            return SignalClass::Fast;
        }
        let window = self.cfg.class_mix_window.max(1);
        let precision_recent = self
            .recent_classes
            .iter()
            .filter(|c| **c == SignalClass::Precision)
            .count();
        let projected = (precision_recent + 1) as f64 / window as f64;
        if projected <= self.cfg.class_mix_precision_ratio {
            SignalClass::Precision
        } else {
            SignalClass::Fast
        }
    }

    fn record_class(&mut self, class: SignalClass) {
        if self.recent_classes.len() == self.cfg.class_mix_window.max(1) {
            self.recent_classes.pop_front();
        }
        self.recent_classes.push_back(class);
    }

    pub fn build_signal(
        &mut self,
        candidate: &ScoredCandidate,
        verdict: &ShieldVerdict,
        entry: f64,
        atr: f64,
        now: DateTime<Utc>,
    ) -> Result<Signal, EngineError> {
        if !verdict.accepted {
            return Err(EngineError::Validation(
                "candidate was not shield-accepted".to_string(),
            ));
        }
        if !(atr.is_finite() && atr > 0.0) {
            return Err(EngineError::Validation(format!("unusable ATR {}", atr)));
        }
        if !(entry.is_finite() && entry > 0.0) {
            return Err(EngineError::Validation(format!("unusable entry {}", entry)));
        }

        let final_score = (candidate.final_score + verdict.score_bonus).clamp(0.0, 100.0);
        let class = self.classify(final_score);
        let (stop_mult, reward_mult) = match class {
            SignalClass::Fast => (self.cfg.fast_stop_atr_mult, self.cfg.fast_reward_mult),
            SignalClass::Precision => (
                self.cfg.precision_stop_atr_mult,
                self.cfg.precision_reward_mult,
            ),
        };

        // Clamp into the sane band rather than rejecting a borderline
        // stop size.
        let stop_distance = (atr * stop_mult)
            .clamp(atr * self.cfg.stop_floor_atr_mult, atr * self.cfg.stop_cap_atr_mult);
        let target_distance = stop_distance * reward_mult;

        let (stop_loss, take_profit) = match candidate.pattern.direction {
            Direction::Buy => (entry - stop_distance, entry + target_distance),
            Direction::Sell => (entry + stop_distance, entry - target_distance),
        };

        let signal = Signal {
            id: Uuid::new_v4().to_string(),
            instrument: candidate.pattern.instrument.clone(),
            direction: candidate.pattern.direction,
            entry,
            stop_loss,
            take_profit,
            class,
            risk_reward_ratio: reward_mult,
            final_score,
            expiry_at: now
                + signal_validity(
                    class,
                    self.cfg.fast_validity_secs,
                    self.cfg.precision_validity_secs,
                ),
            shielded: true,
            created_at: now,
        };

        if !signal.levels_consistent() {
            // Never silently swap levels into consistency.
            return Err(EngineError::Validation(format!(
                "direction-inconsistent levels for {} {}: sl={:.5} entry={:.5} tp={:.5}",
                signal.instrument, signal.direction, stop_loss, entry, take_profit
            )));
        }

        self.record_class(class);
        info!(
            "⚖️ [RISK] {} {} {:?} entry={:.5} sl={:.5} tp={:.5} rr=1:{} score={:.1} expires {}",
            signal.instrument,
            signal.direction,
            signal.class,
            signal.entry,
            signal.stop_loss,
            signal.take_profit,
            signal.risk_reward_ratio,
            signal.final_score,
            signal.expiry_at
        );
        debug!(
            "⚖️ [RISK] {} stop_distance={:.5} (atr={:.5}, mult={})",
            signal.instrument, stop_distance, atr, stop_mult
        );
        Ok(signal)
    }
}
