use crate::config::Config;
use crate::execution::order_executor::{OrderExecutor, Placement};
use crate::execution::outcome_tracker::OutcomeTracker;
use crate::feeds::candles::{CandleAggregator, CandleError};
use crate::feeds::protocol::{FrameTransport, ProtocolClient, ProtocolError, WsTransport};
use crate::models::frame::{Frame, FrameKind};
use crate::models::order::{ContractTerms, Resolution};
use crate::risk::risk_gate::RiskGate;
use crate::signals::model::{Classifier, LogisticModel, ModelAdapter};
use crate::strategies::orchestrator::{Decision, Evaluation, StrategyOrchestrator};
use crate::telemetry::latency::RoundTripLatency;
use crate::telemetry::pnl::SessionLedger;
use serde_json::{Map, Value};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

const INITIAL_BACKOFF_MS: u64 = 500;
const MAX_BACKOFF_MS: u64 = 30_000;

/// Why a session's event loop returned.
#[derive(Debug)]
pub enum SessionEnd {
    Shutdown,
    Disconnected(ProtocolError),
}

/// The tick-to-decision pipeline and everything it owns.
///
/// One instance lives for the whole process; candle histories, risk state and
/// tracked contracts survive reconnects. All mutation happens on the single
/// task driving `run_session`.
pub struct TradingEngine<C = LogisticModel> {
    symbols: Vec<String>,
    api_token: String,
    timeout: Duration,
    aggregator: CandleAggregator,
    orchestrator: StrategyOrchestrator<C>,
    risk: RiskGate,
    executor: OrderExecutor,
    tracker: OutcomeTracker,
    ledger: SessionLedger,
}

impl TradingEngine<LogisticModel> {
    /// Engine over the persisted model and risk state named in `config`.
    pub fn from_config(config: &Config) -> Self {
        let model = ModelAdapter::load_or_bootstrap(&config.model.path, config.model.learning_rate);
        Self::new(config, model, RiskGate::load(config.risk.clone()))
    }
}

impl<C: Classifier> TradingEngine<C> {
    pub fn new(config: &Config, model: ModelAdapter<C>, risk: RiskGate) -> Self {
        let terms = ContractTerms {
            amount: config.trading.stake,
            basis: config.trading.basis.clone(),
            currency: config.trading.currency.clone(),
            duration: config.trading.duration,
            duration_unit: config.trading.duration_unit.clone(),
        };
        Self {
            symbols: config.trading.symbols.clone(),
            api_token: config.connection.api_token.clone(),
            timeout: config.response_timeout(),
            aggregator: CandleAggregator::new(
                config.trading.symbols.iter().cloned(),
                config.candles.interval_secs,
                config.candles.history_len,
            ),
            orchestrator: StrategyOrchestrator::new(&config.strategy, model),
            risk,
            executor: OrderExecutor::new(
                terms,
                config.response_timeout(),
                RoundTripLatency::new(config.telemetry.latency_samples),
            ),
            tracker: OutcomeTracker::new(),
            ledger: SessionLedger::new(),
        }
    }

    pub fn aggregator(&self) -> &CandleAggregator {
        &self.aggregator
    }

    pub fn risk(&self) -> &RiskGate {
        &self.risk
    }

    pub fn tracker(&self) -> &OutcomeTracker {
        &self.tracker
    }

    pub fn ledger(&self) -> &SessionLedger {
        &self.ledger
    }

    pub fn executor(&self) -> &OrderExecutor {
        &self.executor
    }

    pub fn orchestrator(&self) -> &StrategyOrchestrator<C> {
        &self.orchestrator
    }

    /// Authorize (when a token is configured), subscribe to every instrument,
    /// and resume settlement updates for contracts still open from an earlier
    /// connection.
    pub async fn open_session<T: FrameTransport>(
        &mut self,
        client: &mut ProtocolClient<T>,
    ) -> Result<(), ProtocolError> {
        if self.api_token.is_empty() {
            warn!("No API token configured — ticks only, purchases will be rejected");
        } else {
            let mut request = Map::new();
            request.insert("authorize".into(), Value::from(self.api_token.clone()));
            let started = Instant::now();
            let frame = client
                .request(request, FrameKind::Authorize, started + self.timeout)
                .await?;
            self.executor
                .latency()
                .observe("authorize", started.elapsed());
            let account = frame
                .payload()
                .and_then(|p| p.get("loginid"))
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            info!("Authorized as {account}");
        }

        for symbol in &self.symbols {
            let mut request = Map::new();
            request.insert("ticks".into(), Value::from(symbol.clone()));
            request.insert("subscribe".into(), Value::from(1));
            client.send(request).await?;
        }
        info!("Subscribed to {} instruments: {:?}", self.symbols.len(), self.symbols);

        let mut open: Vec<&str> = self.tracker.open_ids().collect();
        open.sort_unstable();
        for id in &open {
            self.executor.watch_contract(client, id).await?;
        }
        if !open.is_empty() {
            info!("Resumed tracking of {} open contracts", open.len());
        }
        Ok(())
    }

    /// Process frames until the connection drops or shutdown is signalled.
    /// Shutdown also abandons an exchange still waiting on the broker.
    pub async fn run_session<T: FrameTransport>(
        &mut self,
        client: &mut ProtocolClient<T>,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> SessionEnd {
        loop {
            let next = tokio::select! {
                frame = client.next_frame() => frame,
                _ = shutdown.recv() => return SessionEnd::Shutdown,
            };
            let frame = match next {
                Ok(frame) => frame,
                Err(e) => return SessionEnd::Disconnected(e),
            };
            tokio::select! {
                _ = self.handle_frame(client, frame) => {}
                _ = shutdown.recv() => {
                    warn!("Shutdown during an exchange, pending response abandoned");
                    return SessionEnd::Shutdown;
                }
            }
        }
    }

    pub async fn handle_frame<T: FrameTransport>(
        &mut self,
        client: &mut ProtocolClient<T>,
        frame: Frame,
    ) {
        match frame.kind {
            FrameKind::Tick => self.on_tick(client, &frame).await,
            k if k.is_notification() => self.on_notification(&frame),
            FrameKind::Error => {
                if let Some(err) = frame.error() {
                    warn!(
                        "Broker error ({}): {}: {}",
                        frame.msg_type.as_deref().unwrap_or("unsolicited"),
                        err.code,
                        err.message
                    );
                }
            }
            // Responses whose wait already timed out. A late buy acknowledgment
            // is not tracked: that attempt was already counted as a failure.
            FrameKind::Proposal | FrameKind::Buy | FrameKind::Authorize => {
                warn!(
                    "Late {:?} response ignored (req_id={:?})",
                    frame.kind, frame.req_id
                );
            }
            _ => debug!("Unhandled frame: {}", frame.body),
        }
    }

    async fn on_tick<T: FrameTransport>(&mut self, client: &mut ProtocolClient<T>, frame: &Frame) {
        let Some(tick) = frame.tick() else {
            warn!(event = "malformed_frame", "Tick frame without symbol/epoch/quote: {}", frame.body);
            return;
        };
        match self.aggregator.ingest(&tick.instrument, tick.epoch, tick.price) {
            Ok(Some(sealed)) => {
                debug!(
                    "{} candle sealed @{}: O={} H={} L={} C={}",
                    tick.instrument, sealed.bucket_start, sealed.open, sealed.high, sealed.low, sealed.close
                );
                self.on_candle_sealed(client, &tick.instrument).await;
            }
            Ok(None) => {}
            Err(e @ CandleError::UnknownInstrument(_)) => debug!("{e}"),
            Err(e) => warn!("Tick dropped: {e}"),
        }
    }

    async fn on_candle_sealed<T: FrameTransport>(
        &mut self,
        client: &mut ProtocolClient<T>,
        instrument: &str,
    ) {
        let Some(history) = self.aggregator.history(instrument) else {
            return;
        };
        let decision = match self.orchestrator.evaluate(instrument, history) {
            Ok(Evaluation::Trade(decision)) => decision,
            Ok(Evaluation::Warmup { have, needed }) => {
                debug!("{instrument}: warming up ({have}/{needed} candles)");
                return;
            }
            Ok(_) => return,
            Err(e) => {
                warn!("{instrument}: decision cycle aborted: {e}");
                return;
            }
        };

        if !self.risk.admit() {
            info!("{instrument}: {} signal skipped, risk gate closed", decision.side);
            return;
        }
        self.execute(client, decision).await;
    }

    async fn execute<T: FrameTransport>(&mut self, client: &mut ProtocolClient<T>, decision: Decision) {
        match self
            .executor
            .place(client, &decision.instrument, decision.side)
            .await
        {
            Placement::ProposalFailed(_) => {}
            Placement::BuyFailed(_) => {
                self.risk.report_order_failure();
                self.ledger.record_order_failure();
            }
            Placement::Placed(receipt) => {
                self.tracker.track(&receipt, Some(decision.features));
            }
        }
        self.executor.latency().log_summary();
    }

    fn on_notification(&mut self, frame: &Frame) {
        let Some(resolution) = self.tracker.on_notification(frame) else {
            return;
        };
        self.risk.report_outcome(resolution.profit);
        self.learn(&resolution);
        self.ledger.record(&resolution);
        self.ledger.log_summary();
    }

    /// Feed a settled contract back to the model. A win confirms the traded
    /// side; anything else teaches the opposite side.
    fn learn(&mut self, resolution: &Resolution) {
        let Some(contract) = &resolution.contract else {
            return;
        };
        let Some(features) = &contract.features else {
            return;
        };
        let observed = if resolution.is_win() {
            contract.side
        } else {
            contract.side.opposite()
        };
        self.orchestrator.model_mut().update(features, observed);
    }
}

/// Connection supervisor: connect, open a session, run it, and reconnect with
/// exponential backoff until shutdown.
pub async fn run<C: Classifier>(
    engine: &mut TradingEngine<C>,
    endpoint: url::Url,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    loop {
        let connected = tokio::select! {
            result = WsTransport::connect(&endpoint) => result,
            _ = shutdown.recv() => return Ok(()),
        };

        match connected {
            Ok(transport) => {
                let mut client = ProtocolClient::new(transport);
                match engine.open_session(&mut client).await {
                    Ok(()) => {
                        backoff_ms = INITIAL_BACKOFF_MS;
                        match engine.run_session(&mut client, &mut shutdown).await {
                            SessionEnd::Shutdown => return Ok(()),
                            SessionEnd::Disconnected(e) => warn!("Session ended: {e}"),
                        }
                    }
                    Err(e) => error!("Session setup failed: {e}"),
                }
            }
            Err(e) => error!("Broker connection failed: {e}"),
        }

        warn!("Reconnecting in {backoff_ms}ms...");
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(backoff_ms)) => {}
            _ = shutdown.recv() => return Ok(()),
        }
        backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feeds::protocol::testing::ScriptedTransport;
    use crate::models::order::BuyReceipt;
    use crate::models::signal::ContractSide;
    use crate::risk::state_store::RiskState;
    use crate::signals::model::{ClassifierOutput, ModelError};
    use chrono::{Local, Utc};
    use serde_json::json;

    struct Fixed(f64);

    impl Classifier for Fixed {
        fn predict(&self, _features: &[f64]) -> Result<ClassifierOutput, ModelError> {
            Ok(ClassifierOutput::CallProbability(self.0))
        }
    }

    fn config() -> Config {
        let mut c = Config::default();
        c.connection.api_token = "tok".into();
        c.trading.symbols = vec!["R_100".into()];
        c.candles.interval_secs = 60;
        c
    }

    fn engine() -> TradingEngine<Fixed> {
        let c = config();
        let risk = RiskGate::in_memory(c.risk.clone(), RiskState::fresh(Local::now().date_naive()));
        TradingEngine::new(&c, ModelAdapter::new(Fixed(0.9)), risk)
    }

    #[tokio::test]
    async fn test_open_session_authorizes_then_subscribes() {
        let mut t = ScriptedTransport::default();
        t.push(json!({"msg_type":"authorize","req_id":1,"authorize":{"loginid":"VRTC1"}}));
        let mut client = ProtocolClient::new(t);
        let mut e = engine();

        e.open_session(&mut client).await.unwrap();
        let sent = &client.transport().sent;
        assert_eq!(sent[0]["authorize"], "tok");
        assert_eq!(sent[1]["ticks"], "R_100");
        assert_eq!(sent[1]["subscribe"], 1);
    }

    #[tokio::test]
    async fn test_open_session_resubscribes_open_contracts() {
        let mut e = engine();
        e.tracker.track(
            &BuyReceipt {
                contract_id: Some("4242".into()),
                instrument: "R_100".into(),
                side: ContractSide::Call,
                buy_price: None,
                payout: None,
                purchased_at: Utc::now(),
            },
            None,
        );

        let mut t = ScriptedTransport::default();
        t.push(json!({"msg_type":"authorize","req_id":1,"authorize":{"loginid":"VRTC1"}}));
        let mut client = ProtocolClient::new(t);
        e.open_session(&mut client).await.unwrap();

        let sent = &client.transport().sent;
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[2]["proposal_open_contract"], 1);
        assert_eq!(sent[2]["contract_id"], 4242);
        assert_eq!(sent[2]["subscribe"], 1);
    }

    #[tokio::test]
    async fn test_rejected_authorization_fails_session() {
        let mut t = ScriptedTransport::default();
        t.push(json!({"msg_type":"authorize","error":{"code":"InvalidToken","message":"bad"}}));
        let mut client = ProtocolClient::new(t);
        let err = engine().open_session(&mut client).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_ticks_build_candles_and_session_ends_on_close() {
        let mut t = ScriptedTransport {
            close_when_drained: true,
            ..Default::default()
        };
        for (epoch, quote) in [(0, json!(1.0)), (30, json!(2.0)), (60, json!(1.5)), (61, json!("n/a"))] {
            t.push(json!({"msg_type":"tick","tick":{"symbol":"R_100","epoch":epoch,"quote":quote}}));
        }
        t.push(json!({"msg_type":"tick","tick":{"symbol":"OTHER","epoch":1,"quote":1.0}}));
        let mut client = ProtocolClient::new(t);
        let mut e = engine();
        let (_tx, mut rx) = broadcast::channel(1);

        let end = e.run_session(&mut client, &mut rx).await;
        assert!(matches!(end, SessionEnd::Disconnected(ProtocolError::Closed)));
        let hist = e.aggregator().history("R_100").unwrap();
        assert_eq!(hist.len(), 1);
        assert_eq!(hist[0].high, 2.0);
        assert_eq!(e.aggregator().current("R_100").unwrap().close, 1.5);
    }

    #[tokio::test]
    async fn test_untracked_settlement_updates_risk_once() {
        let mut t = ScriptedTransport {
            close_when_drained: true,
            ..Default::default()
        };
        let settled = json!({"msg_type":"proposal_open_contract",
            "proposal_open_contract":{"contract_id":77,"is_sold":1,"profit":-1.0}});
        t.push(settled.clone());
        t.push(settled);
        let mut client = ProtocolClient::new(t);
        let mut e = engine();
        let (_tx, mut rx) = broadcast::channel(1);

        e.run_session(&mut client, &mut rx).await;
        assert_eq!(e.risk().state().losses, 1);
        assert_eq!(e.ledger().trades().len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_order_in_flight() {
        // Oversold slide: the sealing tick triggers a CALL proposal that is never answered
        let closes = [
            1.1000, 1.1004, 1.0998, 1.1003, 1.0996, 1.1000, 1.0993, 1.0997, 1.0990, 1.0994,
            1.0987, 1.0990, 1.0983, 1.0986, 1.0979, 1.0982, 1.0975, 1.0977, 1.0970, 1.0955,
        ];
        let mut t = ScriptedTransport::default();
        for (i, close) in closes.iter().enumerate() {
            let epoch = i as i64 * 60;
            t.push(json!({"msg_type":"tick","tick":{"symbol":"R_100","epoch":epoch,"quote":close}}));
        }
        t.push(json!({"msg_type":"tick","tick":{"symbol":"R_100","epoch":1200,"quote":1.0955}}));
        let mut client = ProtocolClient::new(t);
        let mut e = engine();
        let (tx, mut rx) = broadcast::channel(1);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = tx.send(());
        });

        let end = tokio::time::timeout(Duration::from_secs(5), e.run_session(&mut client, &mut rx))
            .await
            .expect("shutdown waited for the response timeout");
        assert!(matches!(end, SessionEnd::Shutdown));
        let proposals = client
            .transport()
            .sent
            .iter()
            .filter(|v| v.get("proposal").is_some())
            .count();
        assert_eq!(proposals, 1);
    }

    #[tokio::test]
    async fn test_shutdown_ends_session() {
        let mut client = ProtocolClient::new(ScriptedTransport::default());
        let mut e = engine();
        let (tx, mut rx) = broadcast::channel(1);
        tx.send(()).unwrap();
        assert!(matches!(
            e.run_session(&mut client, &mut rx).await,
            SessionEnd::Shutdown
        ));
    }
}
