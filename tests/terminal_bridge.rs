// tests/terminal_bridge.rs
//
// End-to-end over a real socket: a terminal connects, handshakes, gets
// an addressed fire command, and its confirmation lands in the ledger.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use fx_sentinel::config::ExecutionConfig;
use fx_sentinel::execution::protocol::{EngineMessage, Handshake, Heartbeat, TerminalMessage};
use fx_sentinel::execution::{PositionLedger, TerminalBridge};
use fx_sentinel::sink::EventSink;
use fx_sentinel::types::{
    AccountSnapshot, Confirmation, ConnectionHealth, Direction, FireCommand, LegStatus,
    PositionState, Tick,
};

fn exec_config(port: u16) -> ExecutionConfig {
    ExecutionConfig {
        bind_addr: format!("127.0.0.1:{}", port),
        silence_window_secs: 120,
        supervisor_sweep_secs: 10,
        channel_read_timeout_secs: 5,
        auto_fire_identity: String::new(),
    }
}

fn fire_command(fire_id: &str, target: &str) -> FireCommand {
    FireCommand {
        fire_id: fire_id.to_string(),
        target_identity: target.to_string(),
        instrument: "EURUSD".to_string(),
        direction: Direction::Buy,
        entry: 1.1000,
        stop_loss: 1.0985,
        take_profit: 1.10225,
        volume: 0.10,
        staged_config: None,
    }
}

fn handshake(node_id: &str) -> TerminalMessage {
    TerminalMessage::Handshake(Handshake {
        node_id: node_id.to_string(),
        account_id: "123456".to_string(),
        broker: "TestBroker".to_string(),
        currency: "USD".to_string(),
        balance: 10_000.0,
        equity: 10_000.0,
        leverage: 30.0,
        monitored_symbols: vec!["EURUSD".to_string()],
    })
}

fn start_bridge(port: u16) -> (Arc<TerminalBridge>, Arc<PositionLedger>, mpsc::Receiver<Tick>) {
    let ledger = Arc::new(PositionLedger::new());
    let (tick_tx, tick_rx) = mpsc::channel::<Tick>(16);
    let bridge = Arc::new(TerminalBridge::new(
        exec_config(port),
        Arc::new(dashmap::DashMap::new()),
        Arc::clone(&ledger),
        tick_tx,
        EventSink::new(16),
    ));
    {
        let bridge = Arc::clone(&bridge);
        tokio::spawn(async move {
            let _ = bridge.start().await;
        });
    }
    (bridge, ledger, tick_rx)
}

async fn connect_with_retry(port: u16) -> tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
> {
    let url = format!("ws://127.0.0.1:{}", port);
    for _ in 0..40 {
        if let Ok((ws, _)) = connect_async(url.as_str()).await {
            return ws;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("bridge never came up on {}", url);
}

async fn wait_until<F: Fn() -> bool>(what: &str, check: F) {
    for _ in 0..40 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {}", what);
}

#[tokio::test]
async fn handshake_fire_and_confirmation_round_trip() {
    let port = 49131;
    let (bridge, ledger, _tick_rx) = start_bridge(port);
    let mut ws = connect_with_retry(port).await;

    let hs = serde_json::to_string(&handshake("mt5-node-1")).unwrap();
    ws.send(Message::Text(hs)).await.unwrap();
    wait_until("terminal registration", || {
        bridge.registry().contains_key("mt5-node-1")
    })
    .await;

    let cmd = fire_command("fire-itest-1", "mt5-node-1");
    ledger.register_fire(&cmd).unwrap();
    bridge
        .send_to("mt5-node-1", &EngineMessage::Fire(cmd))
        .unwrap();

    let delivered = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("no command within 5s")
        .expect("socket closed")
        .expect("read error");
    let text = match delivered {
        Message::Text(text) => text,
        other => panic!("expected a text frame, got {:?}", other),
    };
    let engine_msg: EngineMessage = serde_json::from_str(&text).unwrap();
    let received = match engine_msg {
        EngineMessage::Fire(cmd) => cmd,
        other => panic!("expected a fire command, got {:?}", other),
    };
    assert_eq!(received.fire_id, "fire-itest-1");
    assert_eq!(received.instrument, "EURUSD");
    assert_eq!(ledger.state("fire-itest-1"), Some(PositionState::Pending));

    let confirmation = TerminalMessage::Confirmation(Confirmation {
        fire_id: "fire-itest-1".to_string(),
        leg_id: None,
        status: LegStatus::Ok,
        ticket: Some(778899),
        fill_price: Some(1.10005),
        error_detail: None,
        account_snapshot: AccountSnapshot {
            balance: 10_000.0,
            equity: 9_998.5,
            margin_used: 36.7,
        },
    });
    ws.send(Message::Text(serde_json::to_string(&confirmation).unwrap()))
        .await
        .unwrap();

    wait_until("confirmation to reach the ledger", || {
        ledger.state("fire-itest-1") == Some(PositionState::Open)
    })
    .await;
}

#[tokio::test]
async fn tick_telemetry_flows_into_the_engine_channel() {
    let port = 49132;
    let (bridge, _ledger, mut tick_rx) = start_bridge(port);
    let mut ws = connect_with_retry(port).await;

    let hs = serde_json::to_string(&handshake("mt5-node-2")).unwrap();
    ws.send(Message::Text(hs)).await.unwrap();
    wait_until("terminal registration", || {
        bridge.registry().contains_key("mt5-node-2")
    })
    .await;

    let tick = serde_json::json!({
        "type": "tick",
        "symbol": "EURUSD",
        "bid": 1.09995,
        "ask": 1.10005,
        "spread": 1.0,
        "volume": 3.0,
        "timestamp": Utc::now(),
    });
    ws.send(Message::Text(tick.to_string())).await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), tick_rx.recv())
        .await
        .expect("no tick within 5s")
        .expect("tick channel closed");
    assert_eq!(received.instrument, "EURUSD");
    assert!((received.mid() - 1.1000).abs() < 1e-9);
}

#[tokio::test]
async fn misaddressed_command_is_refused_before_delivery() {
    // No listener needed; addressing is checked before any send.
    let ledger = Arc::new(PositionLedger::new());
    let (tick_tx, _tick_rx) = mpsc::channel::<Tick>(1);
    let bridge = TerminalBridge::new(
        exec_config(49133),
        Arc::new(dashmap::DashMap::new()),
        ledger,
        tick_tx,
        EventSink::new(4),
    );

    let cmd = fire_command("fire-itest-2", "mt5-node-b");
    let err = bridge
        .send_to("mt5-node-a", &EngineMessage::Fire(cmd))
        .unwrap_err();
    assert!(err.is_validation());

    // Unknown identity with a correctly addressed message.
    let cmd = fire_command("fire-itest-3", "mt5-node-a");
    let err = bridge
        .send_to("mt5-node-a", &EngineMessage::Fire(cmd))
        .unwrap_err();
    assert!(matches!(
        err,
        fx_sentinel::errors::EngineError::TerminalUnavailable(_)
    ));
}

#[tokio::test]
async fn reconnected_terminal_stays_deliverable_after_old_socket_closes() {
    let port = 49134;
    let (bridge, _ledger, _tick_rx) = start_bridge(port);

    let mut first = connect_with_retry(port).await;
    let hs = serde_json::to_string(&handshake("mt5-node-3")).unwrap();
    first.send(Message::Text(hs.clone())).await.unwrap();
    wait_until("first registration", || {
        bridge.registry().contains_key("mt5-node-3")
    })
    .await;
    let first_seen = bridge
        .registry()
        .get("mt5-node-3")
        .map(|h| h.connected_at)
        .unwrap();

    // Terminal restarts under the same identity while the old socket is
    // still up.
    let mut second = connect_with_retry(port).await;
    second.send(Message::Text(hs)).await.unwrap();
    wait_until("registry to switch to the new connection", || {
        bridge
            .registry()
            .get("mt5-node-3")
            .map(|h| h.connected_at != first_seen)
            .unwrap_or(false)
    })
    .await;

    // The stale socket's teardown must not write the live one off.
    first.close(None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let hb = TerminalMessage::Heartbeat(Heartbeat {
        node_id: "mt5-node-3".to_string(),
        balance: 10_000.0,
        equity: 10_000.0,
        open_positions_count: 0,
        timestamp: Utc::now(),
    });
    second
        .send(Message::Text(serde_json::to_string(&hb).unwrap()))
        .await
        .unwrap();
    wait_until("heartbeat to mark the terminal healthy", || {
        bridge
            .registry()
            .get("mt5-node-3")
            .map(|h| h.health == ConnectionHealth::Healthy)
            .unwrap_or(false)
    })
    .await;

    let cmd = fire_command("fire-itest-4", "mt5-node-3");
    bridge
        .send_to("mt5-node-3", &EngineMessage::Fire(cmd))
        .unwrap();
    let delivered = tokio::time::timeout(Duration::from_secs(5), second.next())
        .await
        .expect("no command within 5s")
        .expect("socket closed")
        .expect("read error");
    assert!(matches!(delivered, Message::Text(_)));
}

#[tokio::test]
async fn written_off_connection_is_closed_by_the_bridge() {
    let port = 49135;
    let ledger = Arc::new(PositionLedger::new());
    let (tick_tx, _tick_rx) = mpsc::channel::<Tick>(16);
    let mut cfg = exec_config(port);
    cfg.channel_read_timeout_secs = 1;
    let bridge = Arc::new(TerminalBridge::new(
        cfg,
        Arc::new(dashmap::DashMap::new()),
        ledger,
        tick_tx,
        EventSink::new(16),
    ));
    {
        let bridge = Arc::clone(&bridge);
        tokio::spawn(async move {
            let _ = bridge.start().await;
        });
    }

    let mut ws = connect_with_retry(port).await;
    let hs = serde_json::to_string(&handshake("mt5-node-4")).unwrap();
    ws.send(Message::Text(hs)).await.unwrap();
    wait_until("terminal registration", || {
        bridge.registry().contains_key("mt5-node-4")
    })
    .await;

    // Supervisor writes the silent terminal off.
    bridge
        .registry()
        .get_mut("mt5-node-4")
        .unwrap()
        .health = ConnectionHealth::Disconnected;

    // The bridge notices on its next read timeout and drops the socket.
    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(
        closed.is_ok(),
        "bridge kept the written-off connection open"
    );
}
