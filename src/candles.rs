// src/candles.rs - Tick ingestion and multi-timeframe candle aggregation
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use dashmap::DashMap;
use log::{debug, info, warn};
use tokio::sync::mpsc;

use crate::types::{Candle, Tick, Timeframe};

/// Sealed candles for one (instrument, timeframe) plus the candle
/// currently forming. Sealed candles are immutable once pushed.
#[derive(Debug, Clone)]
pub struct CandleSeries {
    capacity: usize,
    sealed: VecDeque<Candle>,
    open: Option<Candle>,
}

impl CandleSeries {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            sealed: VecDeque::with_capacity(capacity),
            open: None,
        }
    }

    pub fn sealed(&self) -> &VecDeque<Candle> {
        &self.sealed
    }

    pub fn len(&self) -> usize {
        self.sealed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sealed.is_empty()
    }

    fn seal_open(&mut self) -> Option<Candle> {
        let candle = self.open.take()?;
        if self.sealed.len() == self.capacity {
            self.sealed.pop_front();
        }
        self.sealed.push_back(candle.clone());
        Some(candle)
    }
}

/// Per-tick outcome, mostly for counters and tests.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Applied,
    /// Tick applied and one or more candles sealed on period boundaries.
    Sealed(Vec<Candle>),
    DroppedOutOfOrder,
    DroppedInvalid,
}

/// Owns every candle buffer for a single instrument. Exactly one worker
/// task mutates an aggregator; everyone else reads published snapshots.
pub struct CandleAggregator {
    instrument: String,
    series: HashMap<Timeframe, CandleSeries>,
    pub dropped_out_of_order: u64,
    pub dropped_invalid: u64,
    pub ticks_applied: u64,
}

impl CandleAggregator {
    pub fn new(instrument: &str, timeframes: &[Timeframe], capacity: usize) -> Self {
        let series = timeframes
            .iter()
            .map(|tf| (*tf, CandleSeries::new(capacity)))
            .collect();
        Self {
            instrument: instrument.to_string(),
            series,
            dropped_out_of_order: 0,
            dropped_invalid: 0,
            ticks_applied: 0,
        }
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub fn series(&self, timeframe: Timeframe) -> Option<&CandleSeries> {
        self.series.get(&timeframe)
    }

    fn tick_is_valid(tick: &Tick) -> bool {
        tick.bid.is_finite()
            && tick.ask.is_finite()
            && tick.bid > 0.0
            && tick.ask > 0.0
            && tick.ask >= tick.bid
            && tick.volume.is_finite()
            && tick.volume >= 0.0
    }

    /// Apply one tick across all timeframes. Out-of-order ticks are
    /// dropped, never retro-applied; gaps simply open the next candle at
    /// the first period boundary actually observed.
    pub fn apply_tick(&mut self, tick: &Tick) -> TickOutcome {
        if !Self::tick_is_valid(tick) {
            self.dropped_invalid += 1;
            warn!(
                "🕯️ [AGGREGATOR] {} dropped invalid tick (bid={}, ask={}, vol={})",
                self.instrument, tick.bid, tick.ask, tick.volume
            );
            return TickOutcome::DroppedInvalid;
        }

        // A tick older than any open candle is stale for every timeframe.
        if self
            .series
            .values()
            .any(|s| matches!(&s.open, Some(open) if tick.timestamp < open.open_time))
        {
            self.dropped_out_of_order += 1;
            return TickOutcome::DroppedOutOfOrder;
        }

        let price = tick.mid();
        let mut sealed = Vec::new();

        for (tf, series) in self.series.iter_mut() {
            let bucket = tf.bucket_start(tick.timestamp);
            let needs_seal = matches!(&series.open, Some(open) if bucket > open.open_time);
            if needs_seal {
                if let Some(candle) = series.seal_open() {
                    sealed.push(candle);
                }
            }

            match &mut series.open {
                Some(open) => {
                    open.high = open.high.max(price);
                    open.low = open.low.min(price);
                    open.close = price;
                    open.tick_volume += tick.volume;
                }
                None => {
                    series.open = Some(Candle {
                        instrument: self.instrument.clone(),
                        timeframe: *tf,
                        open_time: bucket,
                        open: price,
                        high: price,
                        low: price,
                        close: price,
                        tick_volume: tick.volume,
                    });
                }
            }
        }

        self.ticks_applied += 1;
        if sealed.is_empty() {
            TickOutcome::Applied
        } else {
            TickOutcome::Sealed(sealed)
        }
    }

    /// Immutable view of all sealed buffers, for the scan pipeline.
    pub fn snapshot(&self) -> InstrumentView {
        let buffers = self
            .series
            .iter()
            .map(|(tf, s)| (*tf, s.sealed.iter().cloned().collect::<Vec<_>>()))
            .collect();
        InstrumentView {
            instrument: self.instrument.clone(),
            buffers,
        }
    }
}

/// Read-only snapshot of one instrument's sealed candles across its
/// configured timeframes.
#[derive(Debug, Clone)]
pub struct InstrumentView {
    pub instrument: String,
    pub buffers: HashMap<Timeframe, Vec<Candle>>,
}

impl InstrumentView {
    pub fn candles(&self, timeframe: Timeframe) -> &[Candle] {
        self.buffers.get(&timeframe).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn latest_close(&self, timeframe: Timeframe) -> Option<f64> {
        self.candles(timeframe).last().map(|c| c.close)
    }
}

/// Average True Range over the last `period` sealed candles.
/// Returns None when there is not enough history for a reliable reading.
pub fn average_true_range(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }
    let window = &candles[candles.len() - period - 1..];
    let mut sum = 0.0;
    for pair in window.windows(2) {
        let prev_close = pair[0].close;
        let c = &pair[1];
        let tr = (c.high - c.low)
            .max((c.high - prev_close).abs())
            .max((c.low - prev_close).abs());
        sum += tr;
    }
    Some(sum / period as f64)
}

/// Rolling average tick volume over the last `period` sealed candles,
/// excluding the final candle so it can be compared against it.
pub fn rolling_average_volume(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }
    let window = &candles[candles.len() - period - 1..candles.len() - 1];
    Some(window.iter().map(|c| c.tick_volume).sum::<f64>() / period as f64)
}

/// Spawn the per-instrument aggregation worker. It exclusively owns the
/// aggregator and republishes a fresh snapshot whenever a candle seals.
pub fn spawn_instrument_worker(
    instrument: String,
    timeframes: Vec<Timeframe>,
    capacity: usize,
    mut ticks: mpsc::Receiver<Tick>,
    views: Arc<DashMap<String, Arc<InstrumentView>>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut aggregator = CandleAggregator::new(&instrument, &timeframes, capacity);
        info!(
            "🕯️ [AGGREGATOR] Worker started for {} ({} timeframes, capacity {})",
            instrument,
            timeframes.len(),
            capacity
        );

        while let Some(tick) = ticks.recv().await {
            match aggregator.apply_tick(&tick) {
                TickOutcome::Sealed(candles) => {
                    for candle in &candles {
                        debug!(
                            "🕯️ [AGGREGATOR] Sealed {} {} candle @ {} (o={:.5} h={:.5} l={:.5} c={:.5})",
                            candle.instrument,
                            candle.timeframe.label(),
                            candle.open_time,
                            candle.open,
                            candle.high,
                            candle.low,
                            candle.close
                        );
                    }
                    views.insert(instrument.clone(), Arc::new(aggregator.snapshot()));
                }
                TickOutcome::DroppedOutOfOrder => {
                    debug!(
                        "🕯️ [AGGREGATOR] {} dropped out-of-order tick ({} total)",
                        instrument, aggregator.dropped_out_of_order
                    );
                }
                _ => {}
            }
        }

        info!("🕯️ [AGGREGATOR] Worker for {} shutting down", instrument);
    })
}
