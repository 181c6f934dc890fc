//! One-shot purchase probe for demo accounts.
//!
//! Authorizes, requests a single proposal for `TEST_SYMBOL` / `TEST_SIDE`
//! (defaults `frxEURUSD` / `CALL`), buys it, prints the receipt and exits.
//! Risk state is not read or written.
//!
//! Usage:  cargo run --bin test_buy

use candlebot::config::Config;
use candlebot::execution::order_executor::{OrderExecutor, Placement};
use candlebot::feeds::protocol::{ProtocolClient, WsTransport};
use candlebot::models::frame::FrameKind;
use candlebot::models::order::ContractTerms;
use candlebot::models::signal::ContractSide;
use candlebot::telemetry::latency::RoundTripLatency;

use anyhow::{bail, Context};
use serde_json::{Map, Value};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load_or_default();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    anyhow::ensure!(
        !config.connection.api_token.is_empty(),
        "DERIV_TOKEN must be set"
    );
    let symbol = std::env::var("TEST_SYMBOL").unwrap_or_else(|_| "frxEURUSD".to_string());
    let side_raw = std::env::var("TEST_SIDE").unwrap_or_else(|_| "CALL".to_string());
    let Some(side) = ContractSide::parse(&side_raw) else {
        bail!("TEST_SIDE must be CALL or PUT, got {side_raw:?}");
    };

    warn!("TEST BUY: one real purchase of {symbol} {side} — use a demo account");

    let endpoint = config.ws_endpoint()?;
    let transport = WsTransport::connect(&endpoint)
        .await
        .context("connecting to broker")?;
    let mut client = ProtocolClient::new(transport);

    let mut auth = Map::new();
    auth.insert("authorize".into(), Value::from(config.connection.api_token.clone()));
    let deadline = tokio::time::Instant::now() + config.response_timeout();
    client
        .request(auth, FrameKind::Authorize, deadline)
        .await
        .context("authorize")?;
    info!("Authorized");

    let terms = ContractTerms {
        amount: config.trading.stake,
        basis: config.trading.basis.clone(),
        currency: config.trading.currency.clone(),
        duration: config.trading.duration,
        duration_unit: config.trading.duration_unit.clone(),
    };
    let mut executor = OrderExecutor::new(terms, config.response_timeout(), RoundTripLatency::new(4));

    match executor.place(&mut client, &symbol, side).await {
        Placement::Placed(receipt) => {
            info!(
                "Test buy placed: contract={} price={:?} payout={:?}",
                receipt.contract_id.as_deref().unwrap_or("<unidentified>"),
                receipt.buy_price,
                receipt.payout
            );
            executor.latency().log_summary();
            Ok(())
        }
        Placement::ProposalFailed(e) => bail!("test proposal failed: {e}"),
        Placement::BuyFailed(e) => bail!("test buy failed: {e}"),
    }
}
