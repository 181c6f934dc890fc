use serde::{Deserialize, Serialize};

/// A single price quote pushed by the broker for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub instrument: String,
    pub epoch: i64,
    pub price: f64,
}

/// OHLC aggregate over one fixed-width time bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Bucket start, unix seconds, aligned to the candle interval.
    pub bucket_start: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Candle {
    /// Start a fresh candle from the first price seen in a bucket.
    pub fn open_at(bucket_start: i64, price: f64) -> Self {
        Self {
            bucket_start,
            open: price,
            high: price,
            low: price,
            close: price,
        }
    }

    /// Fold another price from the same bucket into this candle.
    pub fn update(&mut self, price: f64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    pub fn true_range(&self, prev_close: Option<f64>) -> f64 {
        let hl = self.range();
        match prev_close {
            Some(pc) => hl.max((self.high - pc).abs()).max((self.low - pc).abs()),
            None => hl,
        }
    }
}

/// Align an epoch to the start of its bucket.
pub fn bucket_of(epoch: i64, interval_secs: i64) -> i64 {
    epoch.div_euclid(interval_secs) * interval_secs
}
