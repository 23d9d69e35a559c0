// src/scoring.rs - Confluence scoring of raw pattern matches
use chrono::{DateTime, Timelike, Utc};
use log::debug;

use crate::candles::InstrumentView;
use crate::config::ScoringConfig;
use crate::types::{Direction, FeatureVector, PatternMatch, ScoredCandidate, Timeframe};

/// Combines a pattern's base score with volatility, session, volume and
/// multi-timeframe context into one 0-100 confluence score. Pure and
/// deterministic: identical inputs always produce identical scores.
pub struct ConfluenceScorer {
    cfg: ScoringConfig,
}

impl ConfluenceScorer {
    pub fn new(cfg: ScoringConfig) -> Self {
        Self { cfg }
    }

    pub fn min_score(&self) -> f64 {
        self.cfg.min_confluence_score
    }

    /// Session weight by UTC hour. The London/NY overlap is the prime
    /// window and carries the highest weight.
    pub fn session_weight(&self, ts: DateTime<Utc>) -> f64 {
        match ts.hour() {
            12..=15 => self.cfg.session_weight_overlap,
            7..=11 => self.cfg.session_weight_london,
            16..=20 => self.cfg.session_weight_newyork,
            _ => self.cfg.session_weight_asian,
        }
    }

    pub fn score(&self, pattern: &PatternMatch, features: FeatureVector) -> ScoredCandidate {
        let volatility_term = if self.cfg.ideal_atr_pips > 0.0 {
            let distance = (features.atr_pips - self.cfg.ideal_atr_pips).abs()
                / self.cfg.ideal_atr_pips;
            (self.cfg.volatility_term_cap * (1.0 - distance))
                .clamp(0.0, self.cfg.volatility_term_cap)
        } else {
            0.0
        };

        let volume_term = ((features.volume_ratio - 1.0) * self.cfg.volume_term_cap)
            .clamp(0.0, self.cfg.volume_term_cap);

        let alignment_term = if features.multi_tf_alignment {
            self.cfg.alignment_bonus
        } else {
            0.0
        };

        let raw = pattern.base_score * features.session_weight
            + volatility_term
            + volume_term
            + alignment_term;
        let final_score = raw.clamp(0.0, 100.0);

        debug!(
            "🧮 [SCORER] {} {} {}: base={:.1} session={:.2} vol_term={:.1} volume_term={:.1} align={:.0} -> {:.1}",
            pattern.instrument,
            pattern.timeframe.label(),
            pattern.pattern_name,
            pattern.base_score,
            features.session_weight,
            volatility_term,
            volume_term,
            alignment_term,
            final_score
        );

        ScoredCandidate {
            pattern: pattern.clone(),
            final_score,
            features,
        }
    }
}

/// Simple per-timeframe trend read: latest close against the close
/// `lookback` candles earlier. None when history is too short.
pub fn timeframe_trend(view: &InstrumentView, timeframe: Timeframe, lookback: usize) -> Option<Direction> {
    let candles = view.candles(timeframe);
    if candles.len() <= lookback {
        return None;
    }
    let latest = candles[candles.len() - 1].close;
    let earlier = candles[candles.len() - 1 - lookback].close;
    if latest > earlier {
        Some(Direction::Buy)
    } else if latest < earlier {
        Some(Direction::Sell)
    } else {
        None
    }
}

/// Multi-timeframe alignment holds when at least two of the configured
/// timeframes agree with the match direction.
pub fn multi_tf_alignment(
    view: &InstrumentView,
    direction: Direction,
    timeframes: &[Timeframe],
    lookback: usize,
) -> bool {
    let agreeing = timeframes
        .iter()
        .filter(|tf| timeframe_trend(view, **tf, lookback) == Some(direction))
        .count();
    agreeing >= 2
}

/// Drop candidates below the configured minimum. Applied before the
/// Shield is ever consulted.
pub fn filter_by_threshold(
    candidates: Vec<ScoredCandidate>,
    min_score: f64,
) -> Vec<ScoredCandidate> {
    candidates
        .into_iter()
        .filter(|c| c.final_score >= min_score)
        .collect()
}
