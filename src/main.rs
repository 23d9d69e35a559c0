// src/main.rs - Engine bootstrap
use std::collections::HashMap;
use std::sync::Arc;

use dotenv::dotenv;
use log::{debug, info, warn};
use tokio::sync::mpsc;

use fx_sentinel::candles::spawn_instrument_worker;
use fx_sentinel::config::EngineConfig;
use fx_sentinel::execution::supervisor::spawn_supervisor;
use fx_sentinel::execution::{PositionLedger, TerminalBridge};
use fx_sentinel::pipeline::{fire_signal, spawn_scheduler, EngineContext};
use fx_sentinel::sink::{EventSink, SinkEvent};
use fx_sentinel::types::Tick;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenv().ok();
    log4rs::init_file("log4rs.yaml", Default::default()).expect("Failed to initialize log4rs");

    let config = EngineConfig::from_env();
    info!(
        "🚀 [MAIN] fx_sentinel starting: {} instruments, timeframes {:?}, scan every {}s",
        config.instruments.len(),
        config.timeframes.iter().map(|t| t.label()).collect::<Vec<_>>(),
        config.scan_interval_secs
    );

    let sink = EventSink::new(256);
    let ctx = Arc::new(EngineContext::new(config.clone(), sink.clone()));

    // One aggregation worker per instrument, fed by the tick router.
    let mut instrument_senders: HashMap<String, mpsc::Sender<Tick>> = HashMap::new();
    for instrument in &config.instruments {
        let (tx, rx) = mpsc::channel::<Tick>(1024);
        instrument_senders.insert(instrument.clone(), tx);
        spawn_instrument_worker(
            instrument.clone(),
            config.timeframes.clone(),
            config.candle_capacity,
            rx,
            Arc::clone(&ctx.views),
        );
    }

    let (tick_tx, mut tick_rx) = mpsc::channel::<Tick>(4096);
    tokio::spawn(async move {
        while let Some(tick) = tick_rx.recv().await {
            match instrument_senders.get(&tick.instrument) {
                Some(sender) => {
                    if sender.send(tick).await.is_err() {
                        warn!("📈 [ROUTER] Worker channel closed, tick dropped");
                    }
                }
                None => debug!("📈 [ROUTER] Tick for unmonitored instrument {}", tick.instrument),
            }
        }
    });

    let ledger: Arc<PositionLedger> = Arc::clone(&ctx.ledger);
    let bridge = Arc::new(TerminalBridge::new(
        config.execution.clone(),
        Arc::new(dashmap::DashMap::new()),
        ledger,
        tick_tx,
        sink.clone(),
    ));

    {
        let bridge = Arc::clone(&bridge);
        tokio::spawn(async move {
            if let Err(e) = bridge.start().await {
                log::error!("🔌 [MAIN] Terminal bridge failed: {}", e);
            }
        });
    }

    spawn_supervisor(Arc::clone(&bridge), config.execution.clone(), sink.clone());
    spawn_scheduler(Arc::clone(&ctx));

    // Auto-fire published signals at the configured terminal identity.
    if !config.execution.auto_fire_identity.is_empty() {
        let identity = config.execution.auto_fire_identity.clone();
        let ctx = Arc::clone(&ctx);
        let bridge = Arc::clone(&bridge);
        let mut events = sink.subscribe();
        info!("🔥 [MAIN] Auto-fire enabled, targeting '{}'", identity);
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                if let SinkEvent::SignalPublished(signal) = event {
                    match fire_signal(&ctx, &bridge, &signal, &identity, chrono::Utc::now()) {
                        Ok(fire_id) => info!("🔥 [MAIN] Fired {} as {}", signal.id, fire_id),
                        Err(e) => warn!("🔥 [MAIN] Signal {} not fired: {}", signal.id, e),
                    }
                }
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    info!("🛑 [MAIN] Shutdown requested, exiting");
    Ok(())
}
