use crate::models::candle::{bucket_of, Candle};
use std::collections::{HashMap, VecDeque};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq)]
pub enum CandleError {
    #[error("tick for unsubscribed instrument {0}")]
    UnknownInstrument(String),
    #[error("stale tick for {instrument}: bucket {bucket} is older than current bucket {current}")]
    StaleTick {
        instrument: String,
        bucket: i64,
        current: i64,
    },
    #[error("non-finite price {price} for {instrument}")]
    InvalidPrice { instrument: String, price: f64 },
}

/// Candle state for one instrument: the open candle plus sealed history.
#[derive(Debug, Default)]
struct InstrumentCandles {
    current: Option<Candle>,
    history: VecDeque<Candle>,
}

/// Folds ticks into fixed-width OHLC candles per instrument.
///
/// Instruments must be registered up front; a tick for anything else is an
/// error rather than a silently created series.
#[derive(Debug)]
pub struct CandleAggregator {
    interval_secs: i64,
    capacity: usize,
    series: HashMap<String, InstrumentCandles>,
}

impl CandleAggregator {
    pub fn new<I, S>(instruments: I, interval_secs: i64, capacity: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let series = instruments
            .into_iter()
            .map(|s| (s.into(), InstrumentCandles::default()))
            .collect();
        Self {
            interval_secs,
            capacity,
            series,
        }
    }

    /// Fold one tick. Returns the candle sealed by this tick, if the tick
    /// opened a new bucket.
    ///
    /// Ticks mapping to a bucket older than the open candle are rejected.
    /// An earlier epoch inside the open bucket still updates it.
    pub fn ingest(
        &mut self,
        instrument: &str,
        epoch: i64,
        price: f64,
    ) -> Result<Option<Candle>, CandleError> {
        if !price.is_finite() {
            return Err(CandleError::InvalidPrice {
                instrument: instrument.to_string(),
                price,
            });
        }
        let state = self
            .series
            .get_mut(instrument)
            .ok_or_else(|| CandleError::UnknownInstrument(instrument.to_string()))?;

        let bucket = bucket_of(epoch, self.interval_secs);

        match state.current.as_mut() {
            Some(c) if c.bucket_start == bucket => {
                c.update(price);
                Ok(None)
            }
            Some(c) if bucket < c.bucket_start => Err(CandleError::StaleTick {
                instrument: instrument.to_string(),
                bucket,
                current: c.bucket_start,
            }),
            _ => {
                let sealed = state.current.replace(Candle::open_at(bucket, price));
                if let Some(candle) = sealed {
                    if state.history.len() >= self.capacity {
                        state.history.pop_front();
                    }
                    state.history.push_back(candle);
                    debug!(
                        "Sealed {instrument} candle @{} o={} h={} l={} c={} (history={})",
                        candle.bucket_start,
                        candle.open,
                        candle.high,
                        candle.low,
                        candle.close,
                        state.history.len()
                    );
                }
                Ok(sealed)
            }
        }
    }

    /// Sealed candles for `instrument`, oldest first.
    pub fn history(&self, instrument: &str) -> Option<&VecDeque<Candle>> {
        self.series.get(instrument).map(|s| &s.history)
    }

    pub fn history_len(&self, instrument: &str) -> usize {
        self.series
            .get(instrument)
            .map(|s| s.history.len())
            .unwrap_or(0)
    }

    /// The candle still accumulating ticks.
    pub fn current(&self, instrument: &str) -> Option<&Candle> {
        self.series.get(instrument).and_then(|s| s.current.as_ref())
    }

    /// Sealed closing prices, oldest first.
    pub fn closes(&self, instrument: &str) -> Vec<f64> {
        self.series
            .get(instrument)
            .map(|s| s.history.iter().map(|c| c.close).collect())
            .unwrap_or_default()
    }
}
