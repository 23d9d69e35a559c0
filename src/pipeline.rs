// src/pipeline.rs - Scan orchestration: detect -> score -> shield -> risk
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::{debug, error, info};
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::candles::{average_true_range, rolling_average_volume, InstrumentView};
use crate::config::EngineConfig;
use crate::errors::EngineError;
use crate::execution::protocol::{validate_fire, EngineMessage};
use crate::execution::{PositionLedger, TerminalBridge};
use crate::patterns::{all_detectors, PatternDetector};
use crate::risk::RiskEngine;
use crate::scoring::{multi_tf_alignment, ConfluenceScorer};
use crate::shield::ConsensusShield;
use crate::sink::{EventSink, SinkEvent};
use crate::types::{
    pip_size_for, FeatureVector, FireCommand, ScoredCandidate, Signal, StageLeg, StagedPlan,
    TrailLeg,
};

#[derive(Debug, Default)]
pub struct ScanCounters {
    pub cycles: AtomicU64,
    pub matches: AtomicU64,
    pub below_threshold: AtomicU64,
    pub shield_rejections: AtomicU64,
    pub signals_published: AtomicU64,
    pub unit_failures: AtomicU64,
}

/// Everything the scan pipeline needs, owned explicitly by the top-level
/// process and passed around by Arc. There is deliberately no ambient
/// global state anywhere in the engine.
pub struct EngineContext {
    pub config: EngineConfig,
    pub views: Arc<DashMap<String, Arc<InstrumentView>>>,
    pub detectors: Vec<Box<dyn PatternDetector>>,
    pub scorer: ConfluenceScorer,
    pub shield: ConsensusShield,
    pub risk: Mutex<RiskEngine>,
    pub ledger: Arc<PositionLedger>,
    pub sink: EventSink,
    pub counters: ScanCounters,
}

impl EngineContext {
    pub fn new(config: EngineConfig, sink: EventSink) -> Self {
        let scorer = ConfluenceScorer::new(config.scoring.clone());
        let shield = ConsensusShield::new(config.shield.clone());
        let risk = Mutex::new(RiskEngine::new(config.risk.clone()));
        Self {
            config,
            views: Arc::new(DashMap::new()),
            detectors: all_detectors(),
            scorer,
            shield,
            risk,
            ledger: Arc::new(PositionLedger::new()),
            sink,
            counters: ScanCounters::default(),
        }
    }
}

/// One full pass over one instrument's current snapshot. Returns the
/// signals published; an empty result is normal, not an error.
pub async fn scan_instrument(ctx: &EngineContext, instrument: &str) -> Result<Vec<Signal>, EngineError> {
    let view = match ctx.views.get(instrument) {
        Some(v) => Arc::clone(v.value()),
        None => return Ok(Vec::new()), // no candle data yet
    };

    let pip = pip_size_for(instrument);
    let mut signals = Vec::new();

    for timeframe in &ctx.config.timeframes {
        let candles = view.candles(*timeframe);
        if candles.is_empty() {
            continue;
        }

        let atr = match average_true_range(candles, ctx.config.atr_period) {
            Some(atr) if atr > 0.0 => atr,
            _ => continue, // not enough history for this timeframe yet
        };
        let volume_ratio = rolling_average_volume(candles, ctx.config.patterns.volume_avg_period)
            .filter(|avg| *avg > 0.0)
            .map(|avg| candles[candles.len() - 1].tick_volume / avg)
            .unwrap_or(1.0);

        for detector in &ctx.detectors {
            let matches = detector.detect(candles, &ctx.config.patterns);
            ctx.counters
                .matches
                .fetch_add(matches.len() as u64, Ordering::Relaxed);

            for pattern in matches {
                let features = FeatureVector {
                    atr_pips: atr / pip,
                    session_weight: ctx.scorer.session_weight(pattern.detected_at),
                    volume_ratio,
                    multi_tf_alignment: multi_tf_alignment(
                        &view,
                        pattern.direction,
                        &ctx.config.timeframes,
                        ctx.config.scoring.trend_lookback,
                    ),
                };
                let candidate = ctx.scorer.score(&pattern, features);

                // Below-threshold candidates never reach the shield.
                if candidate.final_score < ctx.scorer.min_score() {
                    ctx.counters.below_threshold.fetch_add(1, Ordering::Relaxed);
                    continue;
                }

                if let Some(signal) = shield_and_size(ctx, &view, &candidate, atr).await {
                    signals.push(signal);
                }
            }
        }
    }

    Ok(signals)
}

async fn shield_and_size(
    ctx: &EngineContext,
    view: &InstrumentView,
    candidate: &ScoredCandidate,
    atr: f64,
) -> Option<Signal> {
    let entry = view.latest_close(candidate.pattern.timeframe)?;
    let verdict = ctx.shield.validate(&candidate.pattern.instrument, entry).await;
    if !verdict.accepted {
        ctx.counters.shield_rejections.fetch_add(1, Ordering::Relaxed);
        return None;
    }

    let built = ctx
        .risk
        .lock()
        .build_signal(candidate, &verdict, entry, atr, Utc::now());
    match built {
        Ok(signal) => {
            ctx.counters.signals_published.fetch_add(1, Ordering::Relaxed);
            ctx.sink.publish(SinkEvent::SignalPublished(signal.clone()));
            Some(signal)
        }
        Err(e) => {
            // Validation failures discard the candidate, nothing more.
            debug!(
                "🔎 [PIPELINE] {} candidate discarded: {}",
                candidate.pattern.instrument, e
            );
            None
        }
    }
}

/// Scan every configured instrument on a bounded worker pool. A failure
/// in one instrument never halts the cycle.
pub async fn run_scan_cycle(ctx: Arc<EngineContext>) -> Vec<Signal> {
    ctx.counters.cycles.fetch_add(1, Ordering::Relaxed);
    let semaphore = Arc::new(Semaphore::new(ctx.config.scan_concurrency.max(1)));
    let mut handles = Vec::new();

    for instrument in ctx.config.instruments.clone() {
        let ctx = Arc::clone(&ctx);
        let semaphore = Arc::clone(&semaphore);
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok()?;
            match scan_instrument(&ctx, &instrument).await {
                Ok(signals) => Some(signals),
                Err(e) => {
                    ctx.counters.unit_failures.fetch_add(1, Ordering::Relaxed);
                    error!("🔎 [PIPELINE] Scan of {} failed: {}", instrument, e);
                    None
                }
            }
        }));
    }

    let mut all = Vec::new();
    for handle in handles {
        if let Ok(Some(mut signals)) = handle.await {
            all.append(&mut signals);
        }
    }
    all
}

/// Fixed-interval scan scheduler, decoupled from the logic it triggers.
/// Cadence comes from configuration, never hard-coded control flow.
pub fn spawn_scheduler(ctx: Arc<EngineContext>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(Duration::from_secs(ctx.config.scan_interval_secs.max(1)));
        info!(
            "🔎 [PIPELINE] Scheduler started: {} instruments every {}s",
            ctx.config.instruments.len(),
            ctx.config.scan_interval_secs
        );
        loop {
            interval.tick().await;
            let published = run_scan_cycle(Arc::clone(&ctx)).await;
            if !published.is_empty() {
                info!("🔎 [PIPELINE] Cycle published {} signal(s)", published.len());
            }
        }
    })
}

/// Translate a signal into an addressed FireCommand. The expiry check
/// happens here, immediately before the command is built, not only at
/// scoring time.
pub fn build_fire_command(
    ctx: &EngineContext,
    signal: &Signal,
    target_identity: &str,
    now: DateTime<Utc>,
) -> Result<FireCommand, EngineError> {
    if signal.is_expired(now) {
        return Err(EngineError::SignalExpired(signal.expiry_at));
    }

    let staged_config = if ctx.config.staged.enabled {
        Some(StagedPlan {
            stage1: StageLeg {
                trigger_pips: ctx.config.staged.stage1_trigger_pips,
                close_percent: ctx.config.staged.stage1_close_percent,
            },
            stage2: StageLeg {
                trigger_pips: ctx.config.staged.stage2_trigger_pips,
                close_percent: ctx.config.staged.stage2_close_percent,
            },
            trail: TrailLeg {
                distance_pips: ctx.config.staged.trail_distance_pips,
            },
        })
    } else {
        None
    };

    let cmd = FireCommand {
        fire_id: format!("fire-{}", Uuid::new_v4()),
        target_identity: target_identity.to_string(),
        instrument: signal.instrument.clone(),
        direction: signal.direction,
        entry: signal.entry,
        stop_loss: signal.stop_loss,
        take_profit: signal.take_profit,
        volume: ctx.config.risk.default_volume,
        staged_config,
    };
    validate_fire(&cmd)?;
    Ok(cmd)
}

/// Register the fire in the ledger, then deliver it to exactly one
/// terminal. A duplicate fire_id is never re-sent; transport failures
/// are left to the channel's own reconnect handling.
pub fn fire_signal(
    ctx: &EngineContext,
    bridge: &TerminalBridge,
    signal: &Signal,
    target_identity: &str,
    now: DateTime<Utc>,
) -> Result<String, EngineError> {
    let cmd = build_fire_command(ctx, signal, target_identity, now)?;
    ctx.ledger.register_fire(&cmd)?;
    let fire_id = cmd.fire_id.clone();
    info!(
        "🔥 [PIPELINE] Firing {} {} {} -> '{}' (fire_id {})",
        cmd.instrument, cmd.direction, cmd.volume, target_identity, fire_id
    );
    bridge.send_to(target_identity, &EngineMessage::Fire(cmd))?;
    Ok(fire_id)
}
