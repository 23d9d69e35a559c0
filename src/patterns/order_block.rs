// src/patterns/order_block.rs - Return to a high-momentum candle's range
use crate::config::PatternParams;
use crate::patterns::{average_body, detection_time, PatternDetector};
use crate::types::{pip_size_for, Candle, Direction, PatternMatch};

/// Order block bounce: a candle with an outsized body marks heavy
/// participation; when price later returns to within a tolerance band of
/// that candle's range and closes back in the impulse direction, the
/// zone is treated as a reaction level.
pub struct OrderBlockDetector;

impl PatternDetector for OrderBlockDetector {
    fn name(&self) -> &'static str {
        "order_block_bounce"
    }

    fn detect(&self, candles: &[Candle], params: &PatternParams) -> Vec<PatternMatch> {
        if candles.len() < params.order_block_lookback + 3 {
            return Vec::new();
        }

        let n = candles.len();
        let last = &candles[n - 1];
        let tolerance = params.order_block_tolerance_pips * pip_size_for(&last.instrument);
        let window = &candles[n - params.order_block_lookback..n];
        let avg_body = average_body(window);
        if avg_body <= 0.0 {
            return Vec::new();
        }

        // Most recent impulse candle, leaving room for price to move away
        // before it can "return".
        let search_end = n - 3;
        let search_start = n - params.order_block_lookback;
        let impulse_idx = (search_start..search_end)
            .rev()
            .find(|&i| candles[i].body() >= params.order_block_body_mult * avg_body);
        let impulse_idx = match impulse_idx {
            Some(i) => i,
            None => return Vec::new(),
        };
        let block = &candles[impulse_idx];
        let between = &candles[impulse_idx + 1..n - 1];

        let mut matches = Vec::new();

        if block.is_bullish() {
            // Demand block: price must have left the zone upward, then the
            // last candle dips back into it and closes bullish.
            let moved_away = between.iter().all(|c| c.low > block.high);
            let reentered = last.low <= block.high + tolerance && last.low >= block.low - tolerance;
            if moved_away && reentered && last.is_bullish() {
                matches.push(PatternMatch {
                    pattern_name: self.name(),
                    instrument: last.instrument.clone(),
                    direction: Direction::Buy,
                    anchor_price: (block.high + block.low) / 2.0,
                    base_score: params.base_score_order_block,
                    timeframe: last.timeframe,
                    detected_at: detection_time(candles),
                });
            }
        } else if block.is_bearish() {
            let moved_away = between.iter().all(|c| c.high < block.low);
            let reentered = last.high >= block.low - tolerance && last.high <= block.high + tolerance;
            if moved_away && reentered && last.is_bearish() {
                matches.push(PatternMatch {
                    pattern_name: self.name(),
                    instrument: last.instrument.clone(),
                    direction: Direction::Sell,
                    anchor_price: (block.high + block.low) / 2.0,
                    base_score: params.base_score_order_block,
                    timeframe: last.timeframe,
                    detected_at: detection_time(candles),
                });
            }
        }

        matches
    }
}
