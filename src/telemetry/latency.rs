use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::info;

/// Percentile summary of one request kind's round trips.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencySummary {
    pub p50: Duration,
    pub p95: Duration,
    pub max: Duration,
    pub samples: usize,
}

/// Rolling request/response round-trip times, keyed by request kind
/// (`authorize`, `proposal`, `buy`).
pub struct RoundTripLatency {
    windows: DashMap<&'static str, VecDeque<Duration>>,
    window: usize,
}

impl RoundTripLatency {
    pub fn new(window: usize) -> Self {
        Self {
            windows: DashMap::new(),
            window: window.max(1),
        }
    }

    pub fn observe(&self, kind: &'static str, elapsed: Duration) {
        let mut samples = self
            .windows
            .entry(kind)
            .or_insert_with(|| VecDeque::with_capacity(self.window));
        if samples.len() == self.window {
            samples.pop_front();
        }
        samples.push_back(elapsed);
    }

    pub fn summary(&self, kind: &str) -> Option<LatencySummary> {
        self.windows.get(kind).and_then(|samples| summarize(&samples))
    }

    pub fn log_summary(&self) {
        for entry in self.windows.iter() {
            if let Some(s) = summarize(entry.value()) {
                info!(
                    "Round trip [{}]: p50={:.0}ms p95={:.0}ms max={:.0}ms n={}",
                    entry.key(),
                    s.p50.as_secs_f64() * 1000.0,
                    s.p95.as_secs_f64() * 1000.0,
                    s.max.as_secs_f64() * 1000.0,
                    s.samples,
                );
            }
        }
    }
}

fn summarize(samples: &VecDeque<Duration>) -> Option<LatencySummary> {
    if samples.is_empty() {
        return None;
    }
    let mut sorted: Vec<Duration> = samples.iter().copied().collect();
    sorted.sort_unstable();
    let rank = |q: f64| sorted[((sorted.len() - 1) as f64 * q).round() as usize];
    Some(LatencySummary {
        p50: rank(0.50),
        p95: rank(0.95),
        max: sorted[sorted.len() - 1],
        samples: sorted.len(),
    })
}

impl Default for RoundTripLatency {
    fn default() -> Self {
        Self::new(500)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_over_rolling_window() {
        let lat = RoundTripLatency::new(3);
        for ms in [500, 10, 20, 30] {
            lat.observe("buy", Duration::from_millis(ms));
        }
        let s = lat.summary("buy").unwrap();
        assert_eq!(s.samples, 3);
        assert_eq!(s.p50, Duration::from_millis(20));
        assert_eq!(s.max, Duration::from_millis(30));
        assert!(lat.summary("proposal").is_none());
    }
}
