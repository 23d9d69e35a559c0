// src/patterns/liquidity_sweep.rs - Wick beyond a recent extreme, then reversal
use crate::config::PatternParams;
use crate::patterns::{detection_time, PatternDetector};
use crate::types::{Candle, Direction, PatternMatch};

/// Liquidity sweep reversal: one candle wicks beyond a recent extreme to
/// take out resting stops, closes back inside, and the following candles
/// confirm with reversal closes. The sweep candle needs a volume surge
/// against the rolling average to count as institutional participation.
pub struct LiquiditySweepDetector;

impl PatternDetector for LiquiditySweepDetector {
    fn name(&self) -> &'static str {
        "liquidity_sweep_reversal"
    }

    fn detect(&self, candles: &[Candle], params: &PatternParams) -> Vec<PatternMatch> {
        let confirm = params.sweep_confirm_candles;
        let needed = params.sweep_lookback + confirm + params.volume_avg_period + 1;
        if candles.len() < needed {
            return Vec::new();
        }

        let n = candles.len();
        let sweep_idx = n - 1 - confirm;
        let sweep = &candles[sweep_idx];
        let window = &candles[sweep_idx - params.sweep_lookback..sweep_idx];

        let avg_volume = {
            let vols = &candles[sweep_idx - params.volume_avg_period..sweep_idx];
            vols.iter().map(|c| c.tick_volume).sum::<f64>() / params.volume_avg_period as f64
        };
        if avg_volume <= 0.0 || sweep.tick_volume < params.volume_surge_mult * avg_volume {
            return Vec::new();
        }

        let prior_high = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
        let prior_low = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
        let confirms = &candles[sweep_idx + 1..n];

        let mut matches = Vec::new();

        // Sweep above the prior high that closes back under it, followed
        // by bearish confirmation closes.
        if sweep.high > prior_high
            && sweep.close < prior_high
            && confirms.iter().all(|c| c.is_bearish())
        {
            matches.push(PatternMatch {
                pattern_name: self.name(),
                instrument: sweep.instrument.clone(),
                direction: Direction::Sell,
                anchor_price: prior_high,
                base_score: params.base_score_liquidity_sweep,
                timeframe: sweep.timeframe,
                detected_at: detection_time(candles),
            });
        }

        if sweep.low < prior_low
            && sweep.close > prior_low
            && confirms.iter().all(|c| c.is_bullish())
        {
            matches.push(PatternMatch {
                pattern_name: self.name(),
                instrument: sweep.instrument.clone(),
                direction: Direction::Buy,
                anchor_price: prior_low,
                base_score: params.base_score_liquidity_sweep,
                timeframe: sweep.timeframe,
                detected_at: detection_time(candles),
            });
        }

        matches
    }
}
