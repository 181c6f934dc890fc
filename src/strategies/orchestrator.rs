use crate::config::StrategyConfig;
use crate::models::candle::Candle;
use crate::models::signal::{ContractSide, FeatureVector, IndicatorSnapshot, ModelVerdict};
use crate::signals::fusion::SignalFusion;
use crate::signals::indicators::{IndicatorEngine, IndicatorError};
use crate::signals::model::{Classifier, LogisticModel, ModelAdapter};
use std::collections::VecDeque;
use tracing::{debug, info};

/// A confirmed trade decision for one instrument.
#[derive(Debug, Clone)]
pub struct Decision {
    pub instrument: String,
    pub side: ContractSide,
    pub snapshot: IndicatorSnapshot,
    pub features: FeatureVector,
    pub verdict: ModelVerdict,
}

/// Result of evaluating an instrument after a candle seals.
#[derive(Debug, Clone)]
pub enum Evaluation {
    /// Not enough sealed candles yet.
    Warmup { have: usize, needed: usize },
    /// Indicators did not touch a band at an RSI extreme.
    NoSignal(IndicatorSnapshot),
    /// Indicators fired but the model did not confirm.
    Abstain {
        snapshot: IndicatorSnapshot,
        verdict: ModelVerdict,
    },
    Trade(Decision),
}

/// Runs indicators, model and fusion over a sealed-candle history.
///
/// The model is only consulted when the indicators produce a signal.
pub struct StrategyOrchestrator<C = LogisticModel> {
    indicators: IndicatorEngine,
    model: ModelAdapter<C>,
    fusion: SignalFusion,
}

impl<C: Classifier> StrategyOrchestrator<C> {
    pub fn new(config: &StrategyConfig, model: ModelAdapter<C>) -> Self {
        Self {
            indicators: IndicatorEngine::new(config),
            model,
            fusion: SignalFusion::new(config.confidence_threshold),
        }
    }

    pub fn required_history(&self) -> usize {
        self.indicators.required_history()
    }

    pub fn model_mut(&mut self) -> &mut ModelAdapter<C> {
        &mut self.model
    }

    pub fn evaluate(
        &self,
        instrument: &str,
        history: &VecDeque<Candle>,
    ) -> Result<Evaluation, IndicatorError> {
        let needed = self.required_history();
        if history.len() < needed {
            return Ok(Evaluation::Warmup {
                have: history.len(),
                needed,
            });
        }

        let snapshot = self.indicators.compute(history)?;
        debug!(
            "{instrument}: rsi={:.2} bb=[{:.5}, {:.5}, {:.5}] close={:.5} ema={:?} adx={:?}",
            snapshot.rsi,
            snapshot.lower_band,
            snapshot.middle_band,
            snapshot.upper_band,
            snapshot.last_close,
            snapshot.ema,
            snapshot.adx,
        );
        if snapshot.signal.side().is_none() {
            return Ok(Evaluation::NoSignal(snapshot));
        }

        let features = FeatureVector::from_snapshot(&snapshot);
        let verdict = self.model.predict(&features);
        match self.fusion.decide(snapshot.signal, &verdict) {
            Some(side) => {
                info!(
                    "SIGNAL {instrument} {side}: rsi={:.1} confidence={:.2}",
                    snapshot.rsi, verdict.confidence
                );
                Ok(Evaluation::Trade(Decision {
                    instrument: instrument.to_string(),
                    side,
                    snapshot,
                    features,
                    verdict,
                }))
            }
            None => {
                info!(
                    "{instrument}: technical {:?} not confirmed (model {} @ {:.2}, threshold {:.2})",
                    snapshot.signal,
                    verdict.label,
                    verdict.confidence,
                    self.fusion.threshold()
                );
                Ok(Evaluation::Abstain { snapshot, verdict })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::signal::TechnicalSignal;
    use crate::signals::model::{ClassifierOutput, ModelError};

    struct Fixed(f64);

    impl Classifier for Fixed {
        fn predict(&self, _features: &[f64]) -> Result<ClassifierOutput, ModelError> {
            Ok(ClassifierOutput::CallProbability(self.0))
        }
    }

    fn history(closes: &[f64]) -> VecDeque<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Candle {
                bucket_start: i as i64 * 300,
                open: c,
                high: c,
                low: c,
                close: c,
            })
            .collect()
    }

    /// Steady slide with a final plunge: RSI deep in oversold, close under the lower band.
    fn oversold() -> Vec<f64> {
        let mut closes: Vec<f64> = (0..19).map(|i| 100.0 - i as f64 * 0.5 + (i % 2) as f64 * 0.3).collect();
        closes.push(85.0);
        closes
    }

    fn orchestrator(p_call: f64) -> StrategyOrchestrator<Fixed> {
        StrategyOrchestrator::new(&StrategyConfig::default(), ModelAdapter::new(Fixed(p_call)))
    }

    #[test]
    fn test_warmup() {
        let o = orchestrator(0.9);
        match o.evaluate("X", &history(&[1.0; 5])).unwrap() {
            Evaluation::Warmup { have, needed } => assert_eq!((have, needed), (5, 20)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_confirmed_call() {
        let o = orchestrator(0.75);
        match o.evaluate("frxEURUSD", &history(&oversold())).unwrap() {
            Evaluation::Trade(d) => {
                assert_eq!(d.side, ContractSide::Call);
                assert_eq!(d.snapshot.signal, TechnicalSignal::Call);
                assert_eq!(d.features.as_slice().len(), FeatureVector::LEN);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_model_disagreement_abstains() {
        let o = orchestrator(0.4);
        assert!(matches!(
            o.evaluate("frxEURUSD", &history(&oversold())).unwrap(),
            Evaluation::Abstain { .. }
        ));
    }

    struct Broken;

    impl Classifier for Broken {
        fn predict(&self, _features: &[f64]) -> Result<ClassifierOutput, ModelError> {
            Err(ModelError::NonFinite("prediction"))
        }
    }

    #[test]
    fn test_model_fault_never_trades_at_lowest_threshold() {
        let config = StrategyConfig {
            confidence_threshold: 0.5,
            ..StrategyConfig::default()
        };
        let o = StrategyOrchestrator::new(&config, ModelAdapter::new(Broken));
        match o.evaluate("frxEURUSD", &history(&oversold())).unwrap() {
            Evaluation::Abstain { verdict, .. } => assert!(verdict.degraded),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_flat_market_has_no_signal() {
        let o = orchestrator(0.99);
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + (i % 2) as f64).collect();
        assert!(matches!(
            o.evaluate("X", &history(&closes)).unwrap(),
            Evaluation::NoSignal(_)
        ));
    }
}
