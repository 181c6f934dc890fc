use crate::models::signal::{ContractSide, ModelVerdict, TechnicalSignal};

/// Confirms a technical signal with the model's verdict.
#[derive(Debug, Clone, Copy)]
pub struct SignalFusion {
    threshold: f64,
}

impl SignalFusion {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// The side to trade, if the model agrees with the indicators at or above
    /// the confidence threshold. `None` is an abstention, not an error.
    /// A degraded verdict never confirms, whatever the threshold.
    pub fn decide(&self, technical: TechnicalSignal, verdict: &ModelVerdict) -> Option<ContractSide> {
        let side = technical.side()?;
        if verdict.degraded {
            return None;
        }
        (verdict.label == side && verdict.confidence >= self.threshold).then_some(side)
    }
}

impl Default for SignalFusion {
    fn default() -> Self {
        Self::new(0.7)
    }
}
