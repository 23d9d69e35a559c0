// src/patterns/structure_break.rs - BOS / CHoCH off fractal swings
use crate::config::PatternParams;
use crate::patterns::{detection_time, swing_points, PatternDetector};
use crate::types::{Candle, Direction, PatternMatch};

/// Break of structure / change of character: a close beyond the latest
/// confirmed swing extreme invalidates the prior leg. Breaking with the
/// prevailing trend is continuation (BOS), breaking against it flips the
/// trend read (CHoCH); both emit in the breakout direction.
pub struct StructureBreakDetector;

#[derive(PartialEq)]
enum Trend {
    Up,
    Down,
    Flat,
}

fn trend_from_swings(highs: &[(usize, f64)], lows: &[(usize, f64)]) -> Trend {
    if highs.len() < 2 || lows.len() < 2 {
        return Trend::Flat;
    }
    let hh = highs[highs.len() - 1].1 > highs[highs.len() - 2].1;
    let hl = lows[lows.len() - 1].1 > lows[lows.len() - 2].1;
    if hh && hl {
        Trend::Up
    } else if !hh && !hl {
        Trend::Down
    } else {
        Trend::Flat
    }
}

impl PatternDetector for StructureBreakDetector {
    fn name(&self) -> &'static str {
        "break_of_structure"
    }

    fn detect(&self, candles: &[Candle], params: &PatternParams) -> Vec<PatternMatch> {
        if candles.len() < params.structure_lookback {
            return Vec::new();
        }

        let n = candles.len();
        let window = &candles[n - params.structure_lookback..n - 1];
        let (highs, lows) = swing_points(window, params.swing_strength);
        if highs.is_empty() && lows.is_empty() {
            return Vec::new();
        }
        let trend = trend_from_swings(&highs, &lows);
        let last = &candles[n - 1];

        let mut matches = Vec::new();

        if let Some((_, swing_high)) = highs.last() {
            if last.close > *swing_high && trend != Trend::Up {
                // Downtrend (or no trend) leg invalidated to the upside.
                matches.push(PatternMatch {
                    pattern_name: self.name(),
                    instrument: last.instrument.clone(),
                    direction: Direction::Buy,
                    anchor_price: *swing_high,
                    base_score: params.base_score_structure,
                    timeframe: last.timeframe,
                    detected_at: detection_time(candles),
                });
            }
        }

        if let Some((_, swing_low)) = lows.last() {
            if last.close < *swing_low && trend != Trend::Down {
                matches.push(PatternMatch {
                    pattern_name: self.name(),
                    instrument: last.instrument.clone(),
                    direction: Direction::Sell,
                    anchor_price: *swing_low,
                    base_score: params.base_score_structure,
                    timeframe: last.timeframe,
                    detected_at: detection_time(candles),
                });
            }
        }

        matches
    }
}
