// src/patterns/rsi_divergence.rs - Price/RSI divergence at an extreme
use crate::config::PatternParams;
use crate::patterns::{detection_time, rsi_series, swing_points, PatternDetector};
use crate::types::{Candle, Direction, PatternMatch};

/// RSI divergence at level: price prints a higher high while RSI prints a
/// lower high out of overbought (bearish), or a lower low against a
/// higher RSI low out of oversold (bullish). Only the two most recent
/// confirmed swings are compared.
pub struct RsiDivergenceDetector;

impl PatternDetector for RsiDivergenceDetector {
    fn name(&self) -> &'static str {
        "rsi_divergence_at_level"
    }

    fn detect(&self, candles: &[Candle], params: &PatternParams) -> Vec<PatternMatch> {
        if candles.len() < params.rsi_period * 2 + params.swing_strength * 2 + 1 {
            return Vec::new();
        }

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let rsi = rsi_series(&closes, params.rsi_period);
        let (highs, lows) = swing_points(candles, params.swing_strength);
        let last = &candles[candles.len() - 1];

        let mut matches = Vec::new();

        if highs.len() >= 2 {
            let (i1, p1) = highs[highs.len() - 2];
            let (i2, p2) = highs[highs.len() - 1];
            if let (Some(r1), Some(r2)) = (rsi[i1], rsi[i2]) {
                let divergent = p2 > p1 && r2 < r1;
                let stretched = r1 >= params.rsi_overbought || r2 >= params.rsi_overbought;
                if divergent && stretched {
                    matches.push(PatternMatch {
                        pattern_name: self.name(),
                        instrument: last.instrument.clone(),
                        direction: Direction::Sell,
                        anchor_price: p2,
                        base_score: params.base_score_rsi_divergence,
                        timeframe: last.timeframe,
                        detected_at: detection_time(candles),
                    });
                }
            }
        }

        if lows.len() >= 2 {
            let (i1, p1) = lows[lows.len() - 2];
            let (i2, p2) = lows[lows.len() - 1];
            if let (Some(r1), Some(r2)) = (rsi[i1], rsi[i2]) {
                let divergent = p2 < p1 && r2 > r1;
                let stretched = r1 <= params.rsi_oversold || r2 <= params.rsi_oversold;
                if divergent && stretched {
                    matches.push(PatternMatch {
                        pattern_name: self.name(),
                        instrument: last.instrument.clone(),
                        direction: Direction::Buy,
                        anchor_price: p2,
                        base_score: params.base_score_rsi_divergence,
                        timeframe: last.timeframe,
                        detected_at: detection_time(candles),
                    });
                }
            }
        }

        matches
    }
}
