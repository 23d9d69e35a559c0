// src/patterns/fair_value_gap.rs - Re-entry into an unfilled price gap
use crate::config::PatternParams;
use crate::patterns::{detection_time, PatternDetector};
use crate::types::{pip_size_for, Candle, Direction, PatternMatch};

/// Fair value gap fill: a three-candle sequence where the first and third
/// candle ranges do not overlap leaves a gap. The signal fires when price
/// first re-enters the still-unfilled gap within the pip tolerance,
/// trading a bounce in the impulse direction.
pub struct FairValueGapDetector;

impl PatternDetector for FairValueGapDetector {
    fn name(&self) -> &'static str {
        "fair_value_gap_fill"
    }

    fn detect(&self, candles: &[Candle], params: &PatternParams) -> Vec<PatternMatch> {
        // Enough room for a gap plus at least one candle moving away.
        if candles.len() < 6 {
            return Vec::new();
        }

        let n = candles.len();
        let last = &candles[n - 1];
        let pip = pip_size_for(&last.instrument);
        let min_gap = params.fvg_min_gap_pips * pip;
        let tolerance = params.fvg_entry_tolerance_pips * pip;

        let mut matches = Vec::new();

        // Walk back looking for the most recent gap that stayed unfilled
        // until the last candle.
        for mid in (2..n - 2).rev() {
            let first = &candles[mid - 1];
            let third = &candles[mid + 1];

            // Bullish gap: the third candle's low never traded back down
            // to the first candle's high.
            if third.low - first.high >= min_gap {
                let gap_top = third.low;
                let gap_bottom = first.high;
                let between = &candles[mid + 2..n - 1];
                let untouched = between.iter().all(|c| c.low > gap_top + tolerance);
                let reentered = last.low <= gap_top + tolerance && last.close > gap_bottom;
                if untouched && reentered {
                    matches.push(PatternMatch {
                        pattern_name: self.name(),
                        instrument: last.instrument.clone(),
                        direction: Direction::Buy,
                        anchor_price: (gap_top + gap_bottom) / 2.0,
                        base_score: params.base_score_fvg,
                        timeframe: last.timeframe,
                        detected_at: detection_time(candles),
                    });
                }
                break;
            }

            if first.low - third.high >= min_gap {
                let gap_top = first.low;
                let gap_bottom = third.high;
                let between = &candles[mid + 2..n - 1];
                let untouched = between.iter().all(|c| c.high < gap_bottom - tolerance);
                let reentered = last.high >= gap_bottom - tolerance && last.close < gap_top;
                if untouched && reentered {
                    matches.push(PatternMatch {
                        pattern_name: self.name(),
                        instrument: last.instrument.clone(),
                        direction: Direction::Sell,
                        anchor_price: (gap_top + gap_bottom) / 2.0,
                        base_score: params.base_score_fvg,
                        timeframe: last.timeframe,
                        detected_at: detection_time(candles),
                    });
                }
                break;
            }
        }

        matches
    }
}
