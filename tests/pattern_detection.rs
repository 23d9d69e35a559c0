// tests/pattern_detection.rs
//
// Detector behavior on synthetic candle series: each scenario builds a
// buffer shaped like the market structure the detector is looking for
// and checks the match (or the absence of one).

use chrono::{TimeZone, Utc};
use fx_sentinel::config::PatternParams;
use fx_sentinel::patterns::{
    all_detectors, CompressionBreakoutDetector, OrderBlockDetector, PatternDetector,
    StructureBreakDetector,
};
use fx_sentinel::types::{Candle, Direction, Timeframe};

fn candle(i: usize, o: f64, h: f64, l: f64, c: f64, v: f64) -> Candle {
    Candle {
        instrument: "EURUSD".to_string(),
        timeframe: Timeframe::M5,
        open_time: Utc
            .timestamp_opt(1_700_000_100 + i as i64 * 300, 0)
            .unwrap(),
        open: o,
        high: h,
        low: l,
        close: c,
        tick_volume: v,
    }
}

fn series(rows: &[(f64, f64, f64, f64, f64)]) -> Vec<Candle> {
    rows.iter()
        .enumerate()
        .map(|(i, (o, h, l, c, v))| candle(i, *o, *h, *l, *c, *v))
        .collect()
}

/// Zigzag walk by fixed close steps; highs/lows hug the bodies.
fn walk(rows: &mut Vec<(f64, f64, f64, f64, f64)>, from: f64, steps: i32, step: f64) -> f64 {
    let mut p = from;
    for _ in 0..steps.abs() {
        let next = p + step * steps.signum() as f64;
        let (h, l) = if step * steps.signum() as f64 > 0.0 {
            (next + 0.0002, p - 0.0002)
        } else {
            (p + 0.0002, next - 0.0002)
        };
        rows.push((p, h, l, next, 10.0));
        p = next;
    }
    p
}

#[test]
fn compression_then_breakout_fires_in_breakout_direction() {
    let mut rows = Vec::new();
    // Wide baseline ranges.
    for i in 0..20 {
        let o = if i % 2 == 0 { 1.1000 } else { 1.1018 };
        let c = if i % 2 == 0 { 1.1018 } else { 1.1000 };
        rows.push((o, 1.1020, 1.0998, c, 10.0));
    }
    // Tight compression box.
    for _ in 0..8 {
        rows.push((1.1010, 1.1013, 1.1007, 1.1011, 8.0));
    }
    // Breakout close above the box on surging volume.
    rows.push((1.1011, 1.1032, 1.1010, 1.1030, 14.0));

    let matches = CompressionBreakoutDetector.detect(&series(&rows), &PatternParams::from_env());
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].direction, Direction::Buy);
    assert_eq!(matches[0].pattern_name, "volume_compression_breakout");
}

#[test]
fn breakout_without_volume_surge_is_ignored() {
    let mut rows = Vec::new();
    for i in 0..20 {
        let o = if i % 2 == 0 { 1.1000 } else { 1.1018 };
        let c = if i % 2 == 0 { 1.1018 } else { 1.1000 };
        rows.push((o, 1.1020, 1.0998, c, 10.0));
    }
    for _ in 0..8 {
        rows.push((1.1010, 1.1013, 1.1007, 1.1011, 8.0));
    }
    rows.push((1.1011, 1.1032, 1.1010, 1.1030, 8.0)); // no surge

    let matches = CompressionBreakoutDetector.detect(&series(&rows), &PatternParams::from_env());
    assert!(matches.is_empty());
}

#[test]
fn downtrend_break_upward_is_a_change_of_character() {
    let mut rows = Vec::new();
    // Quiet pad so the lookback window is full.
    for i in 0..20 {
        let p = 1.1030 + (i % 2) as f64 * 0.0001;
        rows.push((p, p + 0.0003, p - 0.0003, p + 0.0001, 10.0));
    }
    // Descending waves: lower highs, lower lows.
    let mut p = 1.1030;
    p = walk(&mut rows, p, 3, 0.0010); // to 1.1060
    p = walk(&mut rows, p, -5, 0.0010); // to 1.1010
    p = walk(&mut rows, p, 3, 0.0010); // to 1.1040
    p = walk(&mut rows, p, -5, 0.0010); // to 1.0990
    p = walk(&mut rows, p, 3, 0.0010); // to 1.1020
    p = walk(&mut rows, p, -3, 0.0010); // to 1.0990
    p = walk(&mut rows, p, 2, 0.0010); // to 1.1010
    // Break above the last confirmed swing high (1.1020-ish).
    rows.push((p, 1.1048, p - 0.0002, 1.1045, 12.0));

    let matches = StructureBreakDetector.detect(&series(&rows), &PatternParams::from_env());
    assert!(
        matches.iter().any(|m| m.direction == Direction::Buy),
        "expected an upside structure break, got {:?}",
        matches
    );
}

#[test]
fn return_to_bullish_order_block_fires_buy() {
    let mut rows = Vec::new();
    for i in 0..27 {
        let p = 1.0994 + (i % 2) as f64 * 0.0001;
        rows.push((p, p + 0.0003, p - 0.0003, p + 0.0002, 10.0));
    }
    rows.push((1.1000, 1.1032, 1.0998, 1.1030, 15.0)); // impulse block
    for _ in 0..4 {
        rows.push((1.1035, 1.1042, 1.1033, 1.1039, 10.0)); // holds above the block
    }
    rows.push((1.1036, 1.1041, 1.1028, 1.1040, 11.0)); // dips back in, closes bullish

    let matches = OrderBlockDetector.detect(&series(&rows), &PatternParams::from_env());
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].direction, Direction::Buy);
    let anchor = matches[0].anchor_price;
    assert!(anchor > 1.0998 && anchor < 1.1032);
}

#[test]
fn no_detector_guesses_on_short_history() {
    let rows: Vec<(f64, f64, f64, f64, f64)> = (0..5)
        .map(|i| {
            let p = 1.1000 + i as f64 * 0.0001;
            (p, p + 0.0004, p - 0.0004, p + 0.0001, 10.0)
        })
        .collect();
    let candles = series(&rows);
    let params = PatternParams::from_env();
    for detector in all_detectors() {
        assert!(
            detector.detect(&candles, &params).is_empty(),
            "{} produced a match from {} candles",
            detector.name(),
            candles.len()
        );
    }
}
