use candlebot::config::Config;
use candlebot::engine::{self, TradingEngine};
use candlebot::telemetry::keepalive;

use tokio::sync::broadcast;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load and validate config (reads .env automatically)
    let config = Config::load_or_default();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.telemetry.log_level)),
        )
        .with_target(false)
        .with_thread_ids(true)
        .init();

    info!("================================================");
    info!("  CANDLEBOT — tick-to-decision trading engine v0.1.0");
    info!("  RSI/Bollinger signals, model confirmation, daily risk gate");
    info!("================================================");

    if let Err(e) = config.validate() {
        error!("Config validation failed: {e}");
        return Err(e);
    }
    let endpoint = config.ws_endpoint()?;

    info!("--- Trading configuration ---");
    info!("  Symbols:     {}", config.trading.symbols.join(", "));
    info!(
        "  Contract:    {} {} ({}), {}{}",
        config.trading.stake,
        config.trading.currency,
        config.trading.basis,
        config.trading.duration,
        config.trading.duration_unit
    );
    info!(
        "  Candles:     {}s, history {}",
        config.candles.interval_secs, config.candles.history_len
    );
    info!(
        "  Signal:      RSI({}) {}/{} + BB({}, {}σ), model ≥ {}",
        config.strategy.rsi_period,
        config.strategy.rsi_oversold,
        config.strategy.rsi_overbought,
        config.strategy.bb_period,
        config.strategy.bb_std,
        config.strategy.confidence_threshold
    );

    info!("--- Risk configuration ---");
    info!("  Daily max losses:   {}", config.risk.daily_loss_limit);
    info!("  Daily max wins:     {}", config.risk.daily_win_limit);
    info!("  Loss streak pause:  {}", config.risk.consecutive_loss_pause);
    info!("  Pause duration:     {}s", config.risk.pause_duration_secs);
    info!("  State file:         {}", config.risk.state_path);

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    tokio::spawn(keepalive::serve(
        config.telemetry.keepalive_port,
        shutdown_tx.subscribe(),
    ));

    let mut trading = TradingEngine::from_config(&config);
    let state = trading.risk().state();
    info!(
        "Risk state for {}: wins={} losses={} streak={} paused_until={}",
        state.date, state.wins, state.losses, state.consecutive_losses, state.paused_until
    );

    let session = tokio::spawn({
        let shutdown = shutdown_tx.subscribe();
        async move {
            let result = engine::run(&mut trading, endpoint, shutdown).await;
            trading.ledger().log_summary();
            trading.executor().latency().log_summary();
            result
        }
    });

    info!("Press Ctrl+C to shutdown.");
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Ctrl+C handler failed ({e}), shutting down");
    }
    info!("Shutdown signal received. Cleaning up...");
    let _ = shutdown_tx.send(());

    match session.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Engine stopped with error: {e:#}"),
        Err(e) => error!("Engine task failed: {e}"),
    }

    info!("CANDLEBOT shutdown complete.");
    Ok(())
}
