use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub connection: ConnectionConfig,
    pub trading: TradingConfig,
    pub candles: CandleConfig,
    pub strategy: StrategyConfig,
    pub risk: RiskConfig,
    pub model: ModelConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub ws_url: String,
    pub app_id: String,
    pub api_token: String,
    pub response_timeout_secs: u64, // Bound on proposal/buy/authorize waits
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    pub symbols: Vec<String>,
    pub stake: Decimal,
    pub basis: String,    // "stake" or "payout"
    pub currency: String,
    pub duration: u32,
    pub duration_unit: String, // "t", "s", "m", "h", "d"
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandleConfig {
    pub interval_secs: i64,
    pub history_len: usize, // Sealed candles kept per instrument
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub rsi_period: usize,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    pub bb_period: usize,
    pub bb_std: f64,
    pub ema_period: usize,
    pub adx_period: usize,
    pub confidence_threshold: f64, // Minimum model probability to confirm
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    pub daily_loss_limit: u32,
    pub daily_win_limit: u32,    // Quit-while-ahead cap
    pub consecutive_loss_pause: u32,
    pub pause_duration_secs: i64,
    pub state_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub path: String,
    pub learning_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub keepalive_port: u16,
    pub latency_samples: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            ws_url: "wss://ws.derivws.com/websockets/v3".into(),
            app_id: "1089".into(),
            api_token: String::new(),
            response_timeout_secs: 15,
        }
    }
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            symbols: vec![
                "frxEURUSD".into(),
                "frxUSDCHF".into(),
                "frxGBPCHF".into(),
                "frxUSDJPY".into(),
                "BTCUSD".into(),
            ],
            stake: dec!(1.0),
            basis: "stake".into(),
            currency: "USD".into(),
            duration: 5,
            duration_unit: "m".into(),
        }
    }
}

impl Default for CandleConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            history_len: 20,
        }
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            bb_period: 20,
            bb_std: 2.0,
            ema_period: 20,
            adx_period: 14,
            confidence_threshold: 0.7,
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            daily_loss_limit: 3,
            daily_win_limit: 5,
            consecutive_loss_pause: 2,
            pause_duration_secs: 2 * 60 * 60,
            state_path: "state.json".into(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: "model.json".into(),
            learning_rate: 0.01,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            keepalive_port: 10000,
            latency_samples: 500,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            trading: TradingConfig::default(),
            candles: CandleConfig::default(),
            strategy: StrategyConfig::default(),
            risk: RiskConfig::default(),
            model: ModelConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl StrategyConfig {
    /// Largest lookback the signal rule needs, in sealed candles.
    pub fn required_history(&self) -> usize {
        self.bb_period.max(self.rsi_period + 1)
    }
}

/// Parse an env var into `target`, leaving the default on absence or bad input.
fn env_parse<T: FromStr>(key: &str, target: &mut T) {
    if let Ok(raw) = std::env::var(key) {
        match raw.trim().parse::<T>() {
            Ok(v) => *target = v,
            Err(_) => tracing::warn!("Ignoring unparseable {key}={raw}"),
        }
    }
}

fn env_string(key: &str, target: &mut String) {
    if let Ok(v) = std::env::var(key) {
        if !v.trim().is_empty() {
            *target = v.trim().to_string();
        }
    }
}

impl Config {
    /// Load configuration from environment variables (.env file) with defaults.
    ///
    /// Required env vars:
    ///   DERIV_TOKEN — API token with trade scope
    ///
    /// Optional env vars:
    ///   DERIV_APP_ID, DERIV_WS_URL — connection endpoint
    ///   SYMBOLS — comma separated instrument list
    ///   STAKE_AMOUNT, CURRENCY, CONTRACT_DURATION, CONTRACT_DURATION_UNIT
    ///   CANDLE_SECONDS, HISTORY_CANDLES
    ///   RSI_OVERSOLD, RSI_OVERBOUGHT, MODEL_PROBA_THRESHOLD
    ///   DAILY_MAX_LOSSES, DAILY_MAX_WINS, CONSECUTIVE_LOSSES_TO_PAUSE, PAUSE_SECONDS
    ///   RESPONSE_TIMEOUT_SECS, STATE_FILE, MODEL_FILE, PORT, RUST_LOG
    pub fn load_or_default() -> Self {
        let _ = dotenv::dotenv();

        let mut config = Self::default();

        env_string("DERIV_TOKEN", &mut config.connection.api_token);
        env_string("DERIV_APP_ID", &mut config.connection.app_id);
        env_string("DERIV_WS_URL", &mut config.connection.ws_url);
        env_parse(
            "RESPONSE_TIMEOUT_SECS",
            &mut config.connection.response_timeout_secs,
        );

        if let Ok(list) = std::env::var("SYMBOLS") {
            let symbols: Vec<String> = list
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !symbols.is_empty() {
                config.trading.symbols = symbols;
            }
        }
        env_parse("STAKE_AMOUNT", &mut config.trading.stake);
        env_string("CURRENCY", &mut config.trading.currency);
        env_parse("CONTRACT_DURATION", &mut config.trading.duration);
        env_string("CONTRACT_DURATION_UNIT", &mut config.trading.duration_unit);

        env_parse("CANDLE_SECONDS", &mut config.candles.interval_secs);
        env_parse("HISTORY_CANDLES", &mut config.candles.history_len);

        env_parse("RSI_OVERSOLD", &mut config.strategy.rsi_oversold);
        env_parse("RSI_OVERBOUGHT", &mut config.strategy.rsi_overbought);
        env_parse(
            "MODEL_PROBA_THRESHOLD",
            &mut config.strategy.confidence_threshold,
        );

        env_parse("DAILY_MAX_LOSSES", &mut config.risk.daily_loss_limit);
        env_parse("DAILY_MAX_WINS", &mut config.risk.daily_win_limit);
        env_parse(
            "CONSECUTIVE_LOSSES_TO_PAUSE",
            &mut config.risk.consecutive_loss_pause,
        );
        env_parse("PAUSE_SECONDS", &mut config.risk.pause_duration_secs);
        env_string("STATE_FILE", &mut config.risk.state_path);

        env_string("MODEL_FILE", &mut config.model.path);

        env_parse("PORT", &mut config.telemetry.keepalive_port);
        env_string("RUST_LOG", &mut config.telemetry.log_level);

        config
    }

    /// Endpoint with the application id attached as a query parameter.
    pub fn ws_endpoint(&self) -> anyhow::Result<url::Url> {
        let url = url::Url::parse_with_params(
            &self.connection.ws_url,
            &[("app_id", self.connection.app_id.as_str())],
        )?;
        Ok(url)
    }

    pub fn response_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.connection.response_timeout_secs)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.connection.api_token.is_empty(),
            "DERIV_TOKEN must be set"
        );
        anyhow::ensure!(
            !self.trading.symbols.is_empty(),
            "At least one symbol must be configured"
        );
        anyhow::ensure!(
            self.trading.stake > Decimal::ZERO,
            "Stake must be positive, got {}",
            self.trading.stake
        );
        anyhow::ensure!(
            self.candles.interval_secs > 0,
            "Candle interval must be positive"
        );
        let needed = self.strategy.required_history();
        anyhow::ensure!(
            self.candles.history_len >= needed,
            "History window {} is shorter than the {} candles the indicators need",
            self.candles.history_len,
            needed
        );
        anyhow::ensure!(
            (0.5..=1.0).contains(&self.strategy.confidence_threshold),
            "Confidence threshold must be within [0.5, 1.0], got {}",
            self.strategy.confidence_threshold
        );
        anyhow::ensure!(
            self.strategy.rsi_oversold < self.strategy.rsi_overbought,
            "RSI oversold level must be below overbought level"
        );
        anyhow::ensure!(
            self.connection.response_timeout_secs > 0,
            "Response timeout must be positive"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Config {
        let mut c = Config::default();
        c.connection.api_token = "token".into();
        c
    }

    #[test]
    fn test_defaults_validate_with_token() {
        assert!(valid().validate().is_ok());
        assert!(Config::default().validate().is_err());
    }

    #[test]
    fn test_history_must_cover_indicators() {
        let mut c = valid();
        c.candles.history_len = 10;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_threshold_bounds() {
        let mut c = valid();
        c.strategy.confidence_threshold = 0.3;
        assert!(c.validate().is_err());
        c.strategy.confidence_threshold = 1.0;
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_rsi_levels_ordered() {
        let mut c = valid();
        c.strategy.rsi_oversold = 80.0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_ws_endpoint_carries_app_id() {
        let c = valid();
        let url = c.ws_endpoint().unwrap();
        assert_eq!(url.as_str(), "wss://ws.derivws.com/websockets/v3?app_id=1089");
    }

    #[test]
    fn test_required_history() {
        let s = StrategyConfig::default();
        assert_eq!(s.required_history(), 20);
    }
}
