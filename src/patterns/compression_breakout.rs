// src/patterns/compression_breakout.rs - Range contraction then expansion
use crate::config::PatternParams;
use crate::patterns::{detection_time, PatternDetector};
use crate::types::{Candle, Direction, PatternMatch};

/// Volume compression breakout: candle ranges contract against a baseline
/// window, then a single candle closes outside the compression box on a
/// volume surge. Signal direction follows the breakout.
pub struct CompressionBreakoutDetector;

impl PatternDetector for CompressionBreakoutDetector {
    fn name(&self) -> &'static str {
        "volume_compression_breakout"
    }

    fn detect(&self, candles: &[Candle], params: &PatternParams) -> Vec<PatternMatch> {
        let needed = params.compression_baseline_window + params.compression_window + 1;
        if candles.len() < needed {
            return Vec::new();
        }

        let n = candles.len();
        let breakout = &candles[n - 1];
        let box_window = &candles[n - 1 - params.compression_window..n - 1];
        let baseline = &candles
            [n - 1 - params.compression_window - params.compression_baseline_window..n - 1 - params.compression_window];

        let avg_range = |cs: &[Candle]| cs.iter().map(|c| c.range()).sum::<f64>() / cs.len() as f64;
        let box_range = avg_range(box_window);
        let baseline_range = avg_range(baseline);
        if baseline_range <= 0.0 || box_range > params.compression_ratio * baseline_range {
            return Vec::new();
        }

        let avg_volume =
            box_window.iter().map(|c| c.tick_volume).sum::<f64>() / box_window.len() as f64;
        if avg_volume <= 0.0 || breakout.tick_volume < params.volume_surge_mult * avg_volume {
            return Vec::new();
        }

        let box_high = box_window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
        let box_low = box_window.iter().map(|c| c.low).fold(f64::MAX, f64::min);

        let mut matches = Vec::new();
        if breakout.close > box_high {
            matches.push(PatternMatch {
                pattern_name: self.name(),
                instrument: breakout.instrument.clone(),
                direction: Direction::Buy,
                anchor_price: box_high,
                base_score: params.base_score_compression,
                timeframe: breakout.timeframe,
                detected_at: detection_time(candles),
            });
        } else if breakout.close < box_low {
            matches.push(PatternMatch {
                pattern_name: self.name(),
                instrument: breakout.instrument.clone(),
                direction: Direction::Sell,
                anchor_price: box_low,
                base_score: params.base_score_compression,
                timeframe: breakout.timeframe,
                detected_at: detection_time(candles),
            });
        }

        matches
    }
}
