// src/patterns/mod.rs - Pattern detector trait and shared geometry helpers
use chrono::{DateTime, Duration, Utc};

use crate::config::PatternParams;
use crate::types::{Candle, PatternMatch};

/// One chart pattern detector. Detectors are stateless between
/// invocations: they read the sealed buffer and emit matches, nothing
/// else. A detector that cannot compute a reliable reading returns no
/// match, never a low-confidence guess.
pub trait PatternDetector: Send + Sync {
    fn name(&self) -> &'static str;
    fn detect(&self, candles: &[Candle], params: &PatternParams) -> Vec<PatternMatch>;
}

mod compression_breakout;
mod engulfing;
mod fair_value_gap;
mod liquidity_sweep;
mod order_block;
mod rsi_divergence;
mod structure_break;

pub use compression_breakout::CompressionBreakoutDetector;
pub use engulfing::EngulfingAtLevelDetector;
pub use fair_value_gap::FairValueGapDetector;
pub use liquidity_sweep::LiquiditySweepDetector;
pub use order_block::OrderBlockDetector;
pub use rsi_divergence::RsiDivergenceDetector;
pub use structure_break::StructureBreakDetector;

pub fn all_detectors() -> Vec<Box<dyn PatternDetector>> {
    vec![
        Box::new(LiquiditySweepDetector),
        Box::new(OrderBlockDetector),
        Box::new(FairValueGapDetector),
        Box::new(StructureBreakDetector),
        Box::new(CompressionBreakoutDetector),
        Box::new(EngulfingAtLevelDetector),
        Box::new(RsiDivergenceDetector),
    ]
}

/// Detection timestamp derived from the last sealed candle so runs over
/// identical buffers are reproducible.
pub(crate) fn detection_time(candles: &[Candle]) -> DateTime<Utc> {
    let last = &candles[candles.len() - 1];
    last.open_time + Duration::seconds(last.timeframe.seconds())
}

/// Fractal swing highs/lows: a candle whose high (low) exceeds the
/// `strength` candles on each side. Returns (index, price) pairs.
pub(crate) fn swing_points(
    candles: &[Candle],
    strength: usize,
) -> (Vec<(usize, f64)>, Vec<(usize, f64)>) {
    let mut highs = Vec::new();
    let mut lows = Vec::new();
    if candles.len() < 2 * strength + 1 {
        return (highs, lows);
    }
    for i in strength..candles.len() - strength {
        let c = &candles[i];
        let window = &candles[i - strength..=i + strength];
        if window.iter().all(|o| c.high >= o.high) {
            highs.push((i, c.high));
        }
        if window.iter().all(|o| c.low <= o.low) {
            lows.push((i, c.low));
        }
    }
    (highs, lows)
}

/// Wilder-smoothed RSI series aligned with `closes`; entries before the
/// warmup period are None.
pub(crate) fn rsi_series(closes: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; closes.len()];
    if period == 0 || closes.len() <= period {
        return out;
    }
    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let delta = closes[i] - closes[i - 1];
        if delta >= 0.0 {
            avg_gain += delta;
        } else {
            avg_loss -= delta;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;
    out[period] = Some(rsi_value(avg_gain, avg_loss));
    for i in period + 1..closes.len() {
        let delta = closes[i] - closes[i - 1];
        let (gain, loss) = if delta >= 0.0 { (delta, 0.0) } else { (0.0, -delta) };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
        out[i] = Some(rsi_value(avg_gain, avg_loss));
    }
    out
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

pub(crate) fn average_body(candles: &[Candle]) -> f64 {
    if candles.is_empty() {
        return 0.0;
    }
    candles.iter().map(|c| c.body()).sum::<f64>() / candles.len() as f64
}


#[cfg(test)]
mod tests {
    use super::test_support::series;
    use super::*;

    #[test]
    fn swing_points_find_local_extremes() {
        let rows = vec![
            (1.10, 1.101, 1.099, 1.1005, 10.0),
            (1.1005, 1.102, 1.100, 1.1015, 10.0),
            (1.1015, 1.106, 1.101, 1.105, 10.0), // swing high
            (1.105, 1.1055, 1.102, 1.103, 10.0),
            (1.103, 1.104, 1.0995, 1.100, 10.0), // swing low
            (1.100, 1.102, 1.0999, 1.1015, 10.0),
            (1.1015, 1.103, 1.101, 1.102, 10.0),
        ];
        let candles = series(&rows);
        let (highs, lows) = swing_points(&candles, 2);
        assert!(highs.iter().any(|(i, _)| *i == 2));
        assert!(lows.iter().any(|(i, _)| *i == 4));
    }

    #[test]
    fn rsi_saturates_on_one_way_market() {
        let closes: Vec<f64> = (0..30).map(|i| 1.10 + i as f64 * 0.001).collect();
        let rsi = rsi_series(&closes, 14);
        assert!(rsi[..14].iter().all(|v| v.is_none()));
        assert!(rsi.last().unwrap().unwrap() > 95.0);
    }
}
