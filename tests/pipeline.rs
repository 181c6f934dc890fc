//! End-to-end runs of the decision pipeline over a scripted broker connection:
//! ticks → candles → indicators → model → fusion → risk gate → proposal/buy →
//! settlement → risk and model feedback.

use candlebot::config::Config;
use candlebot::engine::{SessionEnd, TradingEngine};
use candlebot::feeds::protocol::{FrameTransport, ProtocolClient, ProtocolError};
use candlebot::risk::risk_gate::RiskGate;
use candlebot::risk::state_store::{RiskState, RiskStateStore};
use candlebot::signals::model::{LogisticModel, ModelAdapter};

use chrono::Local;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::path::Path;
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Replays queued inbound frames, records outbound requests, and reports the
/// connection closed once the script runs out.
#[derive(Default)]
struct Script {
    inbound: VecDeque<String>,
    sent: Vec<Value>,
}

impl Script {
    fn push(&mut self, frame: Value) {
        self.inbound.push_back(frame.to_string());
    }

    fn sent_of(&self, key: &str) -> Vec<&Value> {
        self.sent.iter().filter(|v| v.get(key).is_some()).collect()
    }
}

impl FrameTransport for Script {
    async fn send_text(&mut self, text: String) -> Result<(), ProtocolError> {
        let v = serde_json::from_str(&text).map_err(|e| ProtocolError::Transport(e.to_string()))?;
        self.sent.push(v);
        Ok(())
    }

    async fn recv_text(&mut self) -> Option<Result<String, ProtocolError>> {
        self.inbound.pop_front().map(Ok)
    }
}

const INTERVAL: i64 = 60;

/// Twenty closes drifting lower in a saw-tooth, ending in a sharp drop:
/// RSI(14) ≈ 27 and the last close sits under the lower Bollinger band.
const OVERSOLD: [f64; 20] = [
    1.1000, 1.1004, 1.0998, 1.1003, 1.0996, 1.1000, 1.0993, 1.0997, 1.0990, 1.0994, 1.0987,
    1.0990, 1.0983, 1.0986, 1.0979, 1.0982, 1.0975, 1.0977, 1.0970, 1.0955,
];

fn tick(symbol: &str, epoch: i64, quote: f64) -> Value {
    json!({"msg_type":"tick","tick":{"symbol":symbol,"epoch":epoch,"quote":quote}})
}

/// One tick per bucket for every close, plus one more to seal the last candle.
fn push_candles(script: &mut Script, symbol: &str, closes: &[f64]) {
    for (i, close) in closes.iter().enumerate() {
        script.push(tick(symbol, i as i64 * INTERVAL, *close));
    }
    script.push(tick(symbol, closes.len() as i64 * INTERVAL, closes[closes.len() - 1]));
}

fn config(dir: &Path) -> Config {
    let mut c = Config::default();
    c.connection.api_token = "demo-token".into();
    c.trading.symbols = vec!["X".into()];
    c.candles.interval_secs = INTERVAL;
    c.risk.state_path = dir.join("state.json").display().to_string();
    c.model.path = dir.join("model.json").display().to_string();
    c
}

/// Logistic model whose constant margin ln(3) maps to P(CALL) = 0.75.
fn confident_call_model() -> LogisticModel {
    LogisticModel {
        weights: vec![0.0; 4],
        bias: 3f64.ln(),
        learning_rate: 0.01,
        updates: 0,
    }
}

fn engine_with(config: &Config, state: RiskState) -> TradingEngine {
    let model = ModelAdapter::with_artifact(confident_call_model(), &config.model.path);
    let risk = RiskGate::with_store(
        config.risk.clone(),
        state,
        RiskStateStore::new(&config.risk.state_path),
    );
    TradingEngine::new(config, model, risk)
}

async fn run(engine: &mut TradingEngine, script: Script) -> Script {
    let mut client = ProtocolClient::new(script);
    let (_tx, mut rx) = broadcast::channel(1);
    let end = engine.run_session(&mut client, &mut rx).await;
    assert!(matches!(end, SessionEnd::Disconnected(ProtocolError::Closed)));
    client.into_transport()
}

fn today() -> RiskState {
    RiskState::fresh(Local::now().date_naive())
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_oversold_signal_places_call_and_win_feeds_back() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let mut engine = engine_with(&cfg, today());

    let mut script = Script::default();
    push_candles(&mut script, "X", &OVERSOLD);
    script.push(json!({"msg_type":"proposal","req_id":1,
        "proposal":{"id":"prop-1","ask_price":1.0,"payout":1.95}}));
    script.push(json!({"msg_type":"buy","req_id":2,
        "buy":{"contract_id":4242,"buy_price":1.0,"payout":1.95}}));
    script.push(json!({"msg_type":"proposal_open_contract",
        "proposal_open_contract":{"contract_id":4242,"is_sold":0,"status":"open","profit":0.3}}));
    script.push(json!({"msg_type":"proposal_open_contract",
        "proposal_open_contract":{"contract_id":4242,"is_sold":1,"status":"won","profit":0.95}}));

    let script = run(&mut engine, script).await;

    let proposals = script.sent_of("proposal");
    assert_eq!(proposals.len(), 1);
    assert_eq!(proposals[0]["contract_type"], "CALL");
    assert_eq!(proposals[0]["symbol"], "X");
    assert_eq!(script.sent_of("buy")[0]["buy"], "prop-1");
    assert_eq!(script.sent_of("proposal_open_contract")[0]["contract_id"], 4242);

    let state = engine.risk().state();
    assert_eq!((state.wins, state.losses, state.consecutive_losses), (1, 0, 0));
    assert_eq!(RiskStateStore::new(&cfg.risk.state_path).load().unwrap().wins, 1);
    assert_eq!(engine.ledger().total(), dec!(0.95));
    assert_eq!(engine.tracker().open_count(), 0);

    let saved = LogisticModel::load(Path::new(&cfg.model.path)).unwrap();
    assert_eq!(saved.updates, 1);
}

#[tokio::test]
async fn test_rejected_buy_counts_as_loss() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let mut engine = engine_with(&cfg, today());

    let mut script = Script::default();
    push_candles(&mut script, "X", &OVERSOLD);
    script.push(json!({"msg_type":"proposal","req_id":1,"proposal":{"id":"prop-1","ask_price":1.0}}));
    script.push(json!({"msg_type":"buy","req_id":2,
        "error":{"code":"InsufficientBalance","message":"balance too low"}}));

    let script = run(&mut engine, script).await;

    assert_eq!(script.sent_of("buy").len(), 1);
    assert!(script.sent_of("proposal_open_contract").is_empty());
    let state = engine.risk().state();
    assert_eq!((state.losses, state.consecutive_losses), (1, 1));
    assert_eq!(engine.tracker().open_count(), 0);
}

#[tokio::test]
async fn test_rejected_proposal_leaves_risk_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let mut engine = engine_with(&cfg, today());

    let mut script = Script::default();
    push_candles(&mut script, "X", &OVERSOLD);
    script.push(json!({"msg_type":"proposal","req_id":1,
        "error":{"code":"OfferingsValidationError","message":"trading closed"}}));

    let script = run(&mut engine, script).await;

    assert!(script.sent_of("buy").is_empty());
    assert_eq!(engine.risk().state(), &today());
}

#[tokio::test]
async fn test_paused_gate_blocks_order() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let mut paused = today();
    paused.consecutive_losses = 2;
    paused.losses = 2;
    paused.paused_until = Local::now().timestamp() + 3600;
    let mut engine = engine_with(&cfg, paused.clone());

    let mut script = Script::default();
    push_candles(&mut script, "X", &OVERSOLD);
    let script = run(&mut engine, script).await;

    assert!(script.sent_of("proposal").is_empty());
    assert_eq!(engine.risk().state(), &paused);
}

#[tokio::test]
async fn test_frames_during_exchange_are_processed_afterwards() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path());
    cfg.trading.symbols = vec!["X".into(), "Y".into()];
    let mut engine = engine_with(&cfg, today());

    let mut script = Script::default();
    push_candles(&mut script, "X", &OVERSOLD);
    // Interleaved with the proposal/buy exchange
    script.push(tick("Y", 0, 150.0));
    script.push(json!({"msg_type":"proposal","req_id":1,"proposal":{"id":"prop-1","ask_price":1.0}}));
    script.push(tick("Y", 61, 151.0));
    script.push(json!({"msg_type":"buy","req_id":2,"buy":{"contract_id":9,"buy_price":1.0}}));
    // Settlement for the contract
    script.push(json!({"msg_type":"sell","sell":{"contract_id":9,"buy_price":1.0,"sell_price":0}}));

    run(&mut engine, script).await;

    let y = engine.aggregator();
    assert_eq!(y.history_len("Y"), 1);
    assert_eq!(y.current("Y").unwrap().close, 151.0);
    let state = engine.risk().state();
    assert_eq!((state.wins, state.losses), (0, 1));
    assert_eq!(engine.ledger().total(), dec!(-1.0));
}

#[tokio::test]
async fn test_malformed_frames_do_not_stop_the_loop() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let mut engine = engine_with(&cfg, today());

    let mut script = Script::default();
    script.inbound.push_back("not json".into());
    script.push(json!({"msg_type":"tick","tick":{"symbol":"X"}}));
    script.push(tick("X", 0, 1.0));
    script.push(tick("X", 60, 1.1));
    run(&mut engine, script).await;

    assert_eq!(engine.aggregator().history_len("X"), 1);
}
