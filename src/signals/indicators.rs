use crate::config::StrategyConfig;
use crate::models::candle::Candle;
use crate::models::signal::{IndicatorSnapshot, TechnicalSignal};
use statrs::statistics::Statistics;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum IndicatorError {
    #[error("need {needed} candles, have {have}")]
    InsufficientHistory { needed: usize, have: usize },
    #[error("{0} is not finite")]
    NonFinite(&'static str),
}

/// Computes RSI and Bollinger Bands over sealed candles and applies the
/// band-touch reversal rule.
#[derive(Debug, Clone)]
pub struct IndicatorEngine {
    rsi_period: usize,
    rsi_oversold: f64,
    rsi_overbought: f64,
    bb_period: usize,
    bb_std: f64,
    ema_period: usize,
    adx_period: usize,
}

impl IndicatorEngine {
    pub fn new(config: &StrategyConfig) -> Self {
        Self {
            rsi_period: config.rsi_period,
            rsi_oversold: config.rsi_oversold,
            rsi_overbought: config.rsi_overbought,
            bb_period: config.bb_period,
            bb_std: config.bb_std,
            ema_period: config.ema_period,
            adx_period: config.adx_period,
        }
    }

    /// Candles needed before `compute` can succeed.
    pub fn required_history(&self) -> usize {
        self.bb_period.max(self.rsi_period + 1)
    }

    /// Indicator snapshot for the latest sealed candle.
    pub fn compute<'a, I>(&self, history: I) -> Result<IndicatorSnapshot, IndicatorError>
    where
        I: IntoIterator<Item = &'a Candle>,
    {
        let candles: Vec<Candle> = history.into_iter().copied().collect();
        let needed = self.required_history();
        if candles.len() < needed {
            return Err(IndicatorError::InsufficientHistory {
                needed,
                have: candles.len(),
            });
        }

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let last_close = closes[closes.len() - 1];

        let rsi = wilder_rsi(&closes, self.rsi_period).ok_or(IndicatorError::NonFinite("rsi"))?;
        let (upper, middle, lower) = bollinger(&closes, self.bb_period, self.bb_std)
            .ok_or(IndicatorError::NonFinite("bollinger bands"))?;

        let signal = self.classify(rsi, last_close, upper, lower);

        Ok(IndicatorSnapshot {
            rsi,
            upper_band: upper,
            middle_band: middle,
            lower_band: lower,
            last_close,
            ema: ema(&closes, self.ema_period),
            adx: adx(&candles, self.adx_period),
            signal,
        })
    }

    /// Oversold close at or below the lower band is a CALL; overbought close at
    /// or above the upper band is a PUT. Both conditions must hold.
    pub fn classify(&self, rsi: f64, close: f64, upper: f64, lower: f64) -> TechnicalSignal {
        if rsi < self.rsi_oversold && close <= lower {
            TechnicalSignal::Call
        } else if rsi > self.rsi_overbought && close >= upper {
            TechnicalSignal::Put
        } else {
            TechnicalSignal::None
        }
    }
}

/// Wilder RSI: seed with the simple mean of the first `period` deltas, then
/// smooth the remaining deltas with `(prev * (period - 1) + x) / period`.
pub fn wilder_rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }

    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let gain = |d: &f64| d.max(0.0);
    let loss = |d: &f64| (-d).max(0.0);

    let p = period as f64;
    let mut avg_gain = deltas[..period].iter().map(gain).sum::<f64>() / p;
    let mut avg_loss = deltas[..period].iter().map(loss).sum::<f64>() / p;

    for d in &deltas[period..] {
        avg_gain = (avg_gain * (p - 1.0) + gain(d)) / p;
        avg_loss = (avg_loss * (p - 1.0) + loss(d)) / p;
    }

    let rsi = if avg_loss == 0.0 {
        if avg_gain == 0.0 {
            50.0
        } else {
            100.0
        }
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    };

    rsi.is_finite().then_some(rsi)
}

/// Bollinger Bands over the last `period` closes: (upper, middle, lower).
/// Uses the population standard deviation.
pub fn bollinger(closes: &[f64], period: usize, k: f64) -> Option<(f64, f64, f64)> {
    if period == 0 || closes.len() < period {
        return None;
    }
    let window = &closes[closes.len() - period..];
    let mean = window.mean();
    let sd = window.population_std_dev();
    if !mean.is_finite() || !sd.is_finite() {
        return None;
    }
    Some((mean + k * sd, mean, mean - k * sd))
}

/// EMA seeded with the SMA of the first `period` values.
pub fn ema(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut ema = values[..period].iter().sum::<f64>() / period as f64;
    for &val in &values[period..] {
        ema = (val - ema) * multiplier + ema;
    }
    Some(ema)
}

fn wilder_smooth(values: &[f64], period: usize) -> Vec<f64> {
    if values.len() < period {
        return Vec::new();
    }
    let p = period as f64;
    let mut out = Vec::with_capacity(values.len() - period + 1);
    let mut smoothed = values[..period].iter().sum::<f64>() / p;
    out.push(smoothed);
    for v in &values[period..] {
        smoothed = (smoothed * (p - 1.0) + v) / p;
        out.push(smoothed);
    }
    out
}

/// ADX with Wilder smoothing of both the directional movement and the DX
/// series. Needs `2 * period` candles.
pub fn adx(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < 2 * period {
        return None;
    }

    let mut trs = Vec::with_capacity(candles.len() - 1);
    let mut plus_dm = Vec::with_capacity(candles.len() - 1);
    let mut minus_dm = Vec::with_capacity(candles.len() - 1);

    for w in candles.windows(2) {
        let (prev, cur) = (&w[0], &w[1]);
        trs.push(cur.true_range(Some(prev.close)));
        let up = cur.high - prev.high;
        let down = prev.low - cur.low;
        plus_dm.push(if up > down && up > 0.0 { up } else { 0.0 });
        minus_dm.push(if down > up && down > 0.0 { down } else { 0.0 });
    }

    let tr_s = wilder_smooth(&trs, period);
    let plus_s = wilder_smooth(&plus_dm, period);
    let minus_s = wilder_smooth(&minus_dm, period);

    let dx: Vec<f64> = tr_s
        .iter()
        .zip(plus_s.iter().zip(minus_s.iter()))
        .map(|(tr, (p, m))| {
            if *tr <= 0.0 {
                return 0.0;
            }
            let pdi = p / tr * 100.0;
            let mdi = m / tr * 100.0;
            let sum = pdi + mdi;
            if sum > 0.0 {
                (pdi - mdi).abs() / sum * 100.0
            } else {
                0.0
            }
        })
        .collect();

    wilder_smooth(&dx, period).last().copied()
}
