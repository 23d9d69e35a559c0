// tests/pipeline_scan.rs
//
// Scan pipeline ordering: cheap local scoring gates candidates before
// any consensus lookups happen, and the fire path re-checks expiry no
// matter what the scan decided earlier.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};

use fx_sentinel::candles::InstrumentView;
use fx_sentinel::config::EngineConfig;
use fx_sentinel::errors::EngineError;
use fx_sentinel::pipeline::{build_fire_command, scan_instrument, EngineContext};
use fx_sentinel::sink::EventSink;
use fx_sentinel::types::{Candle, Direction, Signal, SignalClass, Timeframe};

fn make_context(min_confluence: f64) -> EngineContext {
    let mut config = EngineConfig::from_env();
    config.instruments = vec!["EURUSD".to_string()];
    config.timeframes = vec![Timeframe::M5];
    config.scoring.min_confluence_score = min_confluence;
    config.shield.sources = Vec::new(); // zero responding sources
    EngineContext::new(config, EventSink::new(16))
}

/// Compression box then a volume breakout; scores in the low 70s under
/// the default weights, well clear of the 40/85 thresholds used below.
fn breakout_view() -> Arc<InstrumentView> {
    let mut rows = Vec::new();
    for i in 0..20 {
        let o = if i % 2 == 0 { 1.1000 } else { 1.1018 };
        let c = if i % 2 == 0 { 1.1018 } else { 1.1000 };
        rows.push((o, 1.1020, 1.0998, c, 10.0));
    }
    for _ in 0..8 {
        rows.push((1.1010, 1.1013, 1.1007, 1.1011, 8.0));
    }
    rows.push((1.1011, 1.1032, 1.1010, 1.1030, 14.0));

    let candles: Vec<Candle> = rows
        .iter()
        .enumerate()
        .map(|(i, (o, h, l, c, v))| Candle {
            instrument: "EURUSD".to_string(),
            timeframe: Timeframe::M5,
            open_time: Utc
                .timestamp_opt(1_700_000_100 + i as i64 * 300, 0)
                .unwrap(),
            open: *o,
            high: *h,
            low: *l,
            close: *c,
            tick_volume: *v,
        })
        .collect();

    let mut buffers = HashMap::new();
    buffers.insert(Timeframe::M5, candles);
    Arc::new(InstrumentView {
        instrument: "EURUSD".to_string(),
        buffers,
    })
}

fn sample_signal(expiry_offset_secs: i64) -> Signal {
    let now = Utc::now();
    Signal {
        id: "sig-test-1".to_string(),
        instrument: "EURUSD".to_string(),
        direction: Direction::Buy,
        entry: 1.1000,
        stop_loss: 1.0985,
        take_profit: 1.10225,
        class: SignalClass::Fast,
        risk_reward_ratio: 1.5,
        final_score: 82.0,
        expiry_at: now + Duration::seconds(expiry_offset_secs),
        shielded: true,
        created_at: now,
    }
}

#[tokio::test]
async fn below_threshold_candidates_never_reach_the_shield() {
    let ctx = make_context(85.0);
    ctx.views.insert("EURUSD".to_string(), breakout_view());

    let signals = scan_instrument(&ctx, "EURUSD").await.unwrap();

    assert!(signals.is_empty());
    assert!(ctx.counters.matches.load(Ordering::Relaxed) >= 1);
    assert!(ctx.counters.below_threshold.load(Ordering::Relaxed) >= 1);
    assert_eq!(ctx.shield.validations.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn shield_rejection_blocks_publication() {
    let ctx = make_context(40.0);
    ctx.views.insert("EURUSD".to_string(), breakout_view());

    let signals = scan_instrument(&ctx, "EURUSD").await.unwrap();

    // No responding sources: the shield fails closed, nothing publishes.
    assert!(signals.is_empty());
    assert!(ctx.shield.validations.load(Ordering::Relaxed) >= 1);
    assert!(ctx.counters.shield_rejections.load(Ordering::Relaxed) >= 1);
    assert_eq!(ctx.counters.signals_published.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn unknown_instrument_scans_to_nothing() {
    let ctx = make_context(60.0);
    let signals = scan_instrument(&ctx, "GBPJPY").await.unwrap();
    assert!(signals.is_empty());
    assert_eq!(ctx.counters.matches.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn expired_signal_never_becomes_a_fire_command() {
    let ctx = make_context(60.0);
    let signal = sample_signal(-30);
    let err = build_fire_command(&ctx, &signal, "mt5-node-1", Utc::now()).unwrap_err();
    assert!(matches!(err, EngineError::SignalExpired(_)));
}

#[tokio::test]
async fn fire_command_carries_the_staged_plan_and_registers_once() {
    let ctx = make_context(60.0);
    let signal = sample_signal(300);

    let cmd = build_fire_command(&ctx, &signal, "mt5-node-1", Utc::now()).unwrap();
    assert!(cmd.fire_id.starts_with("fire-"));
    assert_eq!(cmd.target_identity, "mt5-node-1");
    assert_eq!(cmd.expected_legs(), 3); // staged execution on by default
    let plan = cmd.staged_config.as_ref().unwrap();
    assert!(plan.is_valid());

    ctx.ledger.register_fire(&cmd).unwrap();
    assert!(matches!(
        ctx.ledger.register_fire(&cmd),
        Err(EngineError::DuplicateFire(_))
    ));
}
