// src/patterns/engulfing.rs - Engulfing candle at a recent extreme
use crate::config::PatternParams;
use crate::patterns::{detection_time, PatternDetector};
use crate::types::{pip_size_for, Candle, Direction, PatternMatch};

/// Engulfing at level: the last sealed candle's body fully engulfs the
/// prior candle's body with opposite color, and the reversal happens
/// within tolerance of a recent extreme. An engulfing in the middle of
/// nowhere is not a signal.
pub struct EngulfingAtLevelDetector;

impl PatternDetector for EngulfingAtLevelDetector {
    fn name(&self) -> &'static str {
        "engulfing_at_level"
    }

    fn detect(&self, candles: &[Candle], params: &PatternParams) -> Vec<PatternMatch> {
        if candles.len() < params.level_lookback + 2 {
            return Vec::new();
        }

        let n = candles.len();
        let prev = &candles[n - 2];
        let last = &candles[n - 1];
        let tolerance = params.level_tolerance_pips * pip_size_for(&last.instrument);
        let level_window = &candles[n - 2 - params.level_lookback..n - 2];
        let recent_high = level_window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
        let recent_low = level_window.iter().map(|c| c.low).fold(f64::MAX, f64::min);

        let engulfs = last.open.min(last.close) <= prev.open.min(prev.close)
            && last.open.max(last.close) >= prev.open.max(prev.close)
            && last.body() > prev.body();

        if !engulfs {
            return Vec::new();
        }

        let mut matches = Vec::new();

        if last.is_bullish() && prev.is_bearish() && (last.low - recent_low).abs() <= tolerance {
            matches.push(PatternMatch {
                pattern_name: self.name(),
                instrument: last.instrument.clone(),
                direction: Direction::Buy,
                anchor_price: recent_low,
                base_score: params.base_score_engulfing,
                timeframe: last.timeframe,
                detected_at: detection_time(candles),
            });
        } else if last.is_bearish() && prev.is_bullish() && (recent_high - last.high).abs() <= tolerance
        {
            matches.push(PatternMatch {
                pattern_name: self.name(),
                instrument: last.instrument.clone(),
                direction: Direction::Sell,
                anchor_price: recent_high,
                base_score: params.base_score_engulfing,
                timeframe: last.timeframe,
                detected_at: detection_time(candles),
            });
        }

        matches
    }
}
